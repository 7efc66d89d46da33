//! # 图片处理模块（image_handler）
//!
//! ## 设计思路
//!
//! 该模块将“图片来源识别 → 加载校验 → 解码栅格化 → PNG Data URI”按职责拆分为多个子模块，
//! 避免单文件膨胀与耦合。
//!
//! - `handler`：编排整条处理流水线，并实现 `ImageLoader`
//! - `loader`：负责 URL / Data URL / 文件加载与安全校验
//! - `pipeline`：负责解码、像素限制、PNG 编码
//! - `config/error/source`：配置、错误、中间数据模型
//!
//! ## 调用链
//!
//! ```text
//! trigger / serializer
//!    ↓
//! ImageLoader::load(url)
//!    ↓
//! handler.rs（统一编排 + 阶段耗时日志）
//!    ├─ loader.rs（来源加载 + URL/体积安全校验）
//!    └─ pipeline.rs（解码 + 像素限制 + PNG 编码，阻塞线程）
//!    ↓
//! data:image/png;base64,...
//! ```

mod config;
mod error;
mod handler;
mod loader;
mod pipeline;
mod source;

pub use config::ImageConfig;
pub use error::ImageError;
pub use handler::{ImageHandler, ImageLoader};
pub use source::{EncodedImage, ImageSource};

pub(crate) use loader::redact_url_for_log;
