//! # 错误模型模块
//!
//! ## 设计思路
//!
//! 使用单一错误枚举承载图片链路中的所有错误来源，避免字符串拼接式错误处理。
//! 通过 `thiserror` 保持人类可读错误，同时让调用侧可按分支匹配。
//! `code()` / `stage()` 提供稳定的结构化字段，便于日志检索。

/// 图片处理统一错误类型。
///
/// 批量预加载时会被上转为 `AppError`；懒加载路径仅记录日志。
#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("网络错误：{0}")]
    Network(String),

    #[error("超时错误：{0}")]
    Timeout(String),

    #[error("解码错误：{0}")]
    Decode(String),

    #[error("编码错误：{0}")]
    Encode(String),

    #[error("格式错误：{0}")]
    InvalidFormat(String),

    #[error("文件错误：{0}")]
    FileSystem(String),

    #[error("资源限制：{0}")]
    ResourceLimit(String),

    #[error("缓存错误：{0}")]
    Cache(String),
}

impl ImageError {
    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::Timeout(_) => "timeout",
            Self::Decode(_) => "decode",
            Self::Encode(_) => "encode",
            Self::InvalidFormat(_) => "invalid_format",
            Self::FileSystem(_) => "file_system",
            Self::ResourceLimit(_) => "resource_limit",
            Self::Cache(_) => "cache",
        }
    }

    /// 出错所在阶段：`load` / `decode` / `encode` / `cache`。
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Network(_) | Self::Timeout(_) | Self::FileSystem(_) | Self::InvalidFormat(_) => {
                "load"
            }
            Self::Decode(_) | Self::ResourceLimit(_) => "decode",
            Self::Encode(_) => "encode",
            Self::Cache(_) => "cache",
        }
    }
}

impl From<ImageError> for String {
    fn from(error: ImageError) -> Self {
        error.to_string()
    }
}
