//! # 富文本图片嵌入引擎 — 库入口
//!
//! ## 架构总览
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                宿主编辑器 (EditorHost)                    │
//! │  文档树 · 键盘事件 · 原生复制 · 完整文档 · 代理能力       │
//! └───────┬───────────────────────────────▲──────────────────┘
//!         │ KeyEvent                      │ clipboard_serializer()
//! ┌───────▼───────────────────────────────┼──────────────────┐
//! │  trigger ──── EmbedImagePlugin (状态机 + ModeFlags)       │
//! │  │                                    │                   │
//! │  ├─ resolver        代理改写 / 不支持格式跳过             │
//! │  ├─ image_handler   下载·解码·PNG Data URI                │
//! │  ├─ cache           原始 src → Data URI                   │
//! │  ├─ serializer ─────┘ 图片规则替换 + 懒加载               │
//! │  ├─ clipboard       arboard 触发系统复制 (重试)           │
//! │  └─ export          JSON 快照写入文件                     │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## 模块职责
//!
//! | 模块 | 职责 |
//! |------|------|
//! | [`error`] | 统一错误类型 `AppError` |
//! | [`document`] | ProseMirror JSON 形状的文档树与遍历 |
//! | [`resolver`] | 图片地址解析：代理改写、`x-emf` 跳过 |
//! | [`image_handler`] | 从 URL/Data URL/文件加载图片并栅格化为 PNG Data URI |
//! | [`cache`] | Base64 缓存，首次写入有效，不淘汰 |
//! | [`serializer`] | 规则驱动的 HTML 序列化与图片嵌入 |
//! | [`trigger`] | 组合键状态机、批量预加载、复制与导出编排 |
//! | [`host`] | 宿主编辑器接口与脱离态文档快照 |
//! | [`clipboard`] | 通过系统剪贴板触发复制 |
//! | [`export`] | 导出文件命名与写入 |
//! | [`settings`] | 可调参数的读取与校验 |

pub mod cache;
pub mod clipboard;
pub mod document;
pub mod error;
pub mod export;
pub mod host;
pub mod image_handler;
pub mod resolver;
pub mod serializer;
pub mod settings;
pub mod trigger;

pub use cache::Base64Cache;
pub use document::DocNode;
pub use error::AppError;
pub use host::{EditorHost, EditorSnapshot};
pub use trigger::{EmbedImagePlugin, KeyEvent, TriggerOutcome};
