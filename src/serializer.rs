//! # 序列化模块
//!
//! ## 设计思路
//!
//! `MarkupSerializer` 按 `Schema` 中的规则把文档树输出为 HTML，规则形状与 ProseMirror
//! 的 `toDOM` 一致：元素、空元素、内容占位（hole）。
//!
//! `EmbeddingSerializer` 在默认规则基础上只替换 `image` 规则：
//!
//! - 缓存命中且处于嵌入模式 → `src` 替换为 Data URI
//! - 缓存命中但未处于嵌入模式 → 保留原始 `src`
//! - 缓存未命中 → 保留原始 `src`，并在后台懒加载写入缓存，下一次复制即可受益
//!
//! 同步返回值永远不受懒加载结果影响。

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use serde_json::Value;

use crate::cache::Base64Cache;
use crate::document::{DocNode, IMAGE_NODE_TYPE, Mark};
use crate::image_handler::{ImageError, ImageLoader, redact_url_for_log};
use crate::trigger::{ModeFlags, load_image};

/// 单个节点 / 标记的输出形状。
#[derive(Debug, Clone, PartialEq)]
pub enum OutputSpec {
    /// 带子内容的元素，子内容位置由 `inner` 决定。
    Element {
        tag: String,
        attrs: Vec<(String, String)>,
        inner: Box<OutputSpec>,
    },
    /// 无子内容、无闭合标签的元素（`img`、`br`、`hr`）。
    Void {
        tag: String,
        attrs: Vec<(String, String)>,
    },
    /// 子内容占位。
    Hole,
}

impl OutputSpec {
    pub fn element(tag: &str, attrs: Vec<(String, String)>) -> Self {
        Self::Element {
            tag: tag.to_string(),
            attrs,
            inner: Box::new(Self::Hole),
        }
    }

    pub fn void(tag: &str, attrs: Vec<(String, String)>) -> Self {
        Self::Void {
            tag: tag.to_string(),
            attrs,
        }
    }

    /// 在当前元素的占位处再嵌套一层元素，例如 `pre > code`。
    pub fn nest(self, tag: &str, attrs: Vec<(String, String)>) -> Self {
        match self {
            Self::Element {
                tag: outer,
                attrs: outer_attrs,
                inner,
            } => Self::Element {
                tag: outer,
                attrs: outer_attrs,
                inner: Box::new(inner.nest(tag, attrs)),
            },
            Self::Hole => Self::element(tag, attrs),
            void => void,
        }
    }

    fn write(&self, content: &str, out: &mut String) {
        match self {
            Self::Hole => out.push_str(content),
            Self::Void { tag, attrs } => {
                write_open_tag(tag, attrs, out);
            }
            Self::Element { tag, attrs, inner } => {
                write_open_tag(tag, attrs, out);
                inner.write(content, out);
                out.push_str("</");
                out.push_str(tag);
                out.push('>');
            }
        }
    }
}

pub type NodeRule = Arc<dyn Fn(&DocNode) -> OutputSpec + Send + Sync>;
pub type MarkRule = Arc<dyn Fn(&Mark) -> OutputSpec + Send + Sync>;

/// 节点与标记的输出规则表。
#[derive(Clone, Default)]
pub struct Schema {
    nodes: HashMap<String, NodeRule>,
    marks: HashMap<String, MarkRule>,
}

static BASIC_SCHEMA: Lazy<Schema> = Lazy::new(build_basic_schema);

impl Schema {
    /// 内置的基础规则集。
    pub fn basic() -> Self {
        BASIC_SCHEMA.clone()
    }

    pub fn with_node_rule<F>(mut self, node_type: &str, rule: F) -> Self
    where
        F: Fn(&DocNode) -> OutputSpec + Send + Sync + 'static,
    {
        self.nodes.insert(node_type.to_string(), Arc::new(rule));
        self
    }

    pub fn with_mark_rule<F>(mut self, mark_type: &str, rule: F) -> Self
    where
        F: Fn(&Mark) -> OutputSpec + Send + Sync + 'static,
    {
        self.marks.insert(mark_type.to_string(), Arc::new(rule));
        self
    }

    pub fn has_node(&self, node_type: &str) -> bool {
        self.nodes.contains_key(node_type)
    }

    fn node_spec(&self, node: &DocNode) -> OutputSpec {
        match self.nodes.get(&node.node_type) {
            Some(rule) => rule(node),
            None => OutputSpec::element("div", vec![attr("data-type", &node.node_type)]),
        }
    }

    fn mark_spec(&self, mark: &Mark) -> OutputSpec {
        match self.marks.get(&mark.mark_type) {
            Some(rule) => rule(mark),
            None => OutputSpec::element("span", vec![attr("data-mark", &mark.mark_type)]),
        }
    }
}

fn build_basic_schema() -> Schema {
    Schema::default()
        .with_node_rule("doc", |_| OutputSpec::Hole)
        .with_node_rule("paragraph", |_| OutputSpec::element("p", Vec::new()))
        .with_node_rule("heading", |node| {
            let level = node
                .attrs
                .get("level")
                .and_then(Value::as_u64)
                .unwrap_or(1)
                .clamp(1, 6);
            OutputSpec::element(&format!("h{}", level), Vec::new())
        })
        .with_node_rule("blockquote", |_| OutputSpec::element("blockquote", Vec::new()))
        .with_node_rule("code_block", |_| {
            OutputSpec::element("pre", Vec::new()).nest("code", Vec::new())
        })
        .with_node_rule("horizontal_rule", |_| OutputSpec::void("hr", Vec::new()))
        .with_node_rule("hard_break", |_| OutputSpec::void("br", Vec::new()))
        .with_node_rule("bullet_list", |_| OutputSpec::element("ul", Vec::new()))
        .with_node_rule("ordered_list", |node| {
            let attrs = match node.attrs.get("order").and_then(Value::as_u64) {
                Some(start) if start != 1 => vec![attr("start", &start.to_string())],
                _ => Vec::new(),
            };
            OutputSpec::element("ol", attrs)
        })
        .with_node_rule("list_item", |_| OutputSpec::element("li", Vec::new()))
        .with_node_rule(IMAGE_NODE_TYPE, |node| image_spec(node, node.src().unwrap_or_default()))
        .with_mark_rule("strong", |_| OutputSpec::element("strong", Vec::new()))
        .with_mark_rule("em", |_| OutputSpec::element("em", Vec::new()))
        .with_mark_rule("code", |_| OutputSpec::element("code", Vec::new()))
        .with_mark_rule("link", |mark| {
            let mut attrs = Vec::new();
            if let Some(href) = mark.attr_str("href") {
                attrs.push(attr("href", href));
            }
            if let Some(title) = mark.attr_str("title") {
                attrs.push(attr("title", title));
            }
            OutputSpec::element("a", attrs)
        })
        .with_mark_rule("underline", |_| OutputSpec::element("u", Vec::new()))
        .with_mark_rule("strike", |_| OutputSpec::element("s", Vec::new()))
}

/// `<img>` 输出；`src` 由调用方决定，其余属性沿用节点上的值。
pub fn image_spec(node: &DocNode, src: &str) -> OutputSpec {
    let mut attrs = vec![attr("src", src)];
    for (key, value) in &node.attrs {
        if key == "src" {
            continue;
        }
        if let Some(text) = attr_value_to_string(value) {
            attrs.push((key.clone(), text));
        }
    }
    OutputSpec::void("img", attrs)
}

fn attr(key: &str, value: &str) -> (String, String) {
    (key.to_string(), value.to_string())
}

fn attr_value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

fn write_open_tag(tag: &str, attrs: &[(String, String)], out: &mut String) {
    out.push('<');
    out.push_str(tag);
    for (key, value) in attrs {
        out.push(' ');
        out.push_str(key);
        out.push_str("=\"");
        out.push_str(&escape_html(value));
        out.push('"');
    }
    out.push('>');
}

pub(crate) fn escape_html(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// 通用的规则驱动 HTML 序列化器。
#[derive(Clone)]
pub struct MarkupSerializer {
    schema: Schema,
}

impl MarkupSerializer {
    pub fn new(schema: Schema) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// 输出节点的全部子内容（不含节点自身）。
    pub fn serialize_fragment(&self, node: &DocNode) -> String {
        let mut out = String::new();
        for child in &node.content {
            out.push_str(&self.serialize_node(child));
        }
        out
    }

    pub fn serialize_node(&self, node: &DocNode) -> String {
        let mut html = match &node.text {
            Some(text) if node.node_type == "text" => escape_html(text),
            _ => {
                let content = self.serialize_fragment(node);
                let mut out = String::new();
                self.schema.node_spec(node).write(&content, &mut out);
                out
            }
        };

        for mark in node.marks.iter().rev() {
            let mut wrapped = String::new();
            self.schema.mark_spec(mark).write(&html, &mut wrapped);
            html = wrapped;
        }

        html
    }
}

/// 替换图片规则后的序列化器，宿主将其安装为剪贴板序列化器。
#[derive(Clone)]
pub struct EmbeddingSerializer {
    inner: MarkupSerializer,
    cache: Base64Cache,
    flags: Arc<ModeFlags>,
}

impl EmbeddingSerializer {
    pub fn from_schema(
        schema: Schema,
        cache: Base64Cache,
        flags: Arc<ModeFlags>,
        loader: Arc<dyn ImageLoader>,
        marker: impl Into<String>,
    ) -> Self {
        let marker: Arc<str> = Arc::from(marker.into());
        let rule_cache = cache.clone();
        let rule_flags = Arc::clone(&flags);

        let schema = schema.with_node_rule(IMAGE_NODE_TYPE, move |node| {
            let src = node.src().unwrap_or_default();
            let emitted = match rule_cache.get(src) {
                Ok(Some(data_uri)) if rule_flags.is_embedding() => data_uri,
                Ok(Some(_)) => src.to_string(),
                Ok(None) => {
                    spawn_lazy_fill(&rule_cache, &loader, src, &marker);
                    src.to_string()
                }
                Err(e) => {
                    log::warn!("⚠️ 序列化时读取缓存失败，保留原始地址: {}", e);
                    src.to_string()
                }
            };
            image_spec(node, &emitted)
        });

        Self {
            inner: MarkupSerializer::new(schema),
            cache,
            flags,
        }
    }

    pub fn serialize_fragment(&self, node: &DocNode) -> String {
        self.inner.serialize_fragment(node)
    }

    pub fn serialize_node(&self, node: &DocNode) -> String {
        self.inner.serialize_node(node)
    }

    pub fn is_embedding(&self) -> bool {
        self.flags.is_embedding()
    }

    /// 生成替换了图片 `src` 的文档副本，交给导出写入器。
    ///
    /// `embed` 为假时只复制，不替换。
    pub fn resolve_document(&self, doc: &DocNode, embed: bool) -> Result<DocNode, ImageError> {
        if !embed {
            return Ok(doc.clone());
        }

        let entries = self.cache.snapshot()?;
        Ok(doc.map_image_src(&|node| node.src().and_then(|src| entries.get(src).cloned())))
    }
}

fn spawn_lazy_fill(cache: &Base64Cache, loader: &Arc<dyn ImageLoader>, src: &str, marker: &Arc<str>) {
    if src.is_empty() {
        return;
    }

    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        log::debug!("⏸️ 无可用异步运行时，跳过懒加载: {}", redact_url_for_log(src));
        return;
    };

    let fill = match cache.begin_fill(src) {
        Ok(Some(fill)) => fill,
        Ok(None) => return,
        Err(e) => {
            log::warn!("⚠️ 懒加载登记失败: {}", e);
            return;
        }
    };

    let cache = cache.clone();
    let loader = Arc::clone(loader);
    let marker = Arc::clone(marker);
    let src = src.to_string();

    runtime.spawn(async move {
        let _fill = fill;
        match load_image(loader.as_ref(), None, &src, &marker).await {
            Ok(data_uri) => match cache.insert_if_absent(&src, data_uri) {
                Ok(true) => log::debug!("🗃️ 懒加载写入缓存: {}", redact_url_for_log(&src)),
                Ok(false) => {}
                Err(e) => log::warn!("⚠️ 懒加载写入缓存失败: {}", e),
            },
            Err(e) => log::warn!(
                "⚠️ 懒加载图片失败 - 地址: {} code={} stage={} err={}",
                redact_url_for_log(&src),
                e.code(),
                e.stage(),
                e
            ),
        }
    });
}
