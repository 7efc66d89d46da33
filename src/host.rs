//! 宿主编辑器接口
//!
//! 嵌入引擎不持有编辑器本身，只通过 `EditorHost` 读取文档、获取代理能力、触发系统复制。

use async_trait::async_trait;
use serde_json::Value;

use crate::document::DocNode;
use crate::error::AppError;
use crate::resolver::ProxyCapability;

#[async_trait]
pub trait EditorHost: Send + Sync {
    /// 当前可见的文档。
    fn current_doc(&self) -> DocNode;

    /// 从宿主运行时拉取完整文档（JSON），不支持时返回 `None`。
    async fn fetch_complete_doc(&self) -> Option<Value> {
        None
    }

    /// 本次编辑会话的代理能力。
    fn proxy_capability(&self) -> Option<ProxyCapability> {
        None
    }

    /// 触发宿主的原生复制管线。
    async fn trigger_native_copy(&self) -> Result<(), AppError>;
}

/// 脱离宿主编辑状态的文档视图，缓存填充与导出都在它上面进行。
#[derive(Debug, Clone, PartialEq)]
pub struct EditorSnapshot {
    doc: DocNode,
}

impl EditorSnapshot {
    pub fn new(doc: DocNode) -> Self {
        Self { doc }
    }

    /// 优先使用完整文档，拉取不到或无法解析时回退到当前文档。
    pub async fn capture(host: &dyn EditorHost) -> Self {
        let Some(value) = host.fetch_complete_doc().await else {
            return Self::new(host.current_doc());
        };

        match DocNode::from_json(value) {
            Ok(doc) => Self::new(doc),
            Err(e) => {
                log::warn!("⚠️ 完整文档无法解析，改用当前文档: {}", e);
                Self::new(host.current_doc())
            }
        }
    }

    pub fn doc(&self) -> &DocNode {
        &self.doc
    }

    pub fn into_doc(self) -> DocNode {
        self.doc
    }
}
