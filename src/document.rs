//! 文档模型模块
//!
//! # 设计思路
//!
//! 宿主编辑器的文档树以 ProseMirror `toJSON()` 的形状交换：
//! `{ "type", "attrs"?, "content"?, "text"?, "marks"? }`。
//! 本模块只提供嵌入图片所需的最小能力：反序列化、深度优先遍历、
//! 读取图片 `src` / `alt`，以及生成替换了 `src` 的副本。宿主文档本身从不被原地修改。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::AppError;

/// 图片节点的类型名。
pub const IMAGE_NODE_TYPE: &str = "image";

/// 文档节点。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocNode {
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub attrs: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content: Vec<DocNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub marks: Vec<Mark>,
}

/// 行内标记（加粗、链接等）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mark {
    #[serde(rename = "type")]
    pub mark_type: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub attrs: Map<String, Value>,
}

impl DocNode {
    pub fn new(node_type: impl Into<String>) -> Self {
        Self {
            node_type: node_type.into(),
            attrs: Map::new(),
            content: Vec::new(),
            text: None,
            marks: Vec::new(),
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::new("text")
        }
    }

    /// 构造图片节点；`alt` 为空时不写入该属性。
    pub fn image(src: impl Into<String>, alt: Option<&str>) -> Self {
        let mut node = Self::new(IMAGE_NODE_TYPE).with_attr("src", Value::String(src.into()));
        if let Some(alt) = alt {
            node = node.with_attr("alt", Value::String(alt.to_string()));
        }
        node
    }

    pub fn with_attr(mut self, key: &str, value: Value) -> Self {
        self.attrs.insert(key.to_string(), value);
        self
    }

    pub fn with_content(mut self, content: Vec<DocNode>) -> Self {
        self.content = content;
        self
    }

    pub fn with_mark(mut self, mark: Mark) -> Self {
        self.marks.push(mark);
        self
    }

    /// 从宿主提供的 JSON 构建节点树。
    pub fn from_json(value: Value) -> Result<Self, AppError> {
        serde_json::from_value(value).map_err(|e| AppError::Document(format!("无法解析文档：{}", e)))
    }

    pub fn to_json(&self) -> Result<Value, AppError> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn is_image(&self) -> bool {
        self.node_type == IMAGE_NODE_TYPE
    }

    /// 字符串属性；非字符串值视为缺失。
    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).and_then(Value::as_str)
    }

    pub fn src(&self) -> Option<&str> {
        self.attr_str("src")
    }

    pub fn alt(&self) -> Option<&str> {
        self.attr_str("alt")
    }

    /// 深度优先（先序）遍历所有后代节点，不含自身。
    pub fn descendants<'a, F>(&'a self, visit: &mut F)
    where
        F: FnMut(&'a DocNode),
    {
        for child in &self.content {
            visit(child);
            child.descendants(visit);
        }
    }

    /// 按文档顺序收集所有图片节点。
    pub fn images(&self) -> Vec<&DocNode> {
        let mut images = Vec::new();
        self.descendants(&mut |node| {
            if node.is_image() {
                images.push(node);
            }
        });
        images
    }

    /// 生成一份副本，其中每个图片节点的 `src` 由 `rewrite` 决定。
    ///
    /// `rewrite` 返回 `None` 时保留原值。
    pub fn map_image_src<F>(&self, rewrite: &F) -> DocNode
    where
        F: Fn(&DocNode) -> Option<String>,
    {
        let mut node = DocNode {
            node_type: self.node_type.clone(),
            attrs: self.attrs.clone(),
            content: self.content.iter().map(|child| child.map_image_src(rewrite)).collect(),
            text: self.text.clone(),
            marks: self.marks.clone(),
        };

        if node.is_image() {
            if let Some(src) = rewrite(self) {
                node.attrs.insert("src".to_string(), Value::String(src));
            }
        }

        node
    }
}

impl Mark {
    pub fn new(mark_type: impl Into<String>) -> Self {
        Self {
            mark_type: mark_type.into(),
            attrs: Map::new(),
        }
    }

    pub fn with_attr(mut self, key: &str, value: Value) -> Self {
        self.attrs.insert(key.to_string(), value);
        self
    }

    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).and_then(Value::as_str)
    }
}
