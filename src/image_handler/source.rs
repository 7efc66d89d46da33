//! # 数据源与中间模型
//!
//! ## 设计思路
//!
//! 将“外部输入类型”和“流水线中间结果”解耦：
//! - `ImageSource` 表示按 URL 形态识别出的来源
//! - `RawImageData` 表示已加载但未解码的字节
//! - `EncodedImage` 表示已栅格化为 PNG 的 Data URI

use super::ImageError;

/// 图片输入来源。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// 网络地址来源（http / https）。
    Url(String),
    /// `data:image/...;base64,` 内联来源。
    DataUrl(String),
    /// 本地文件来源（`file://` 或裸路径）。
    FilePath(String),
}

impl ImageSource {
    /// 按 URL 形态识别来源。
    pub fn classify(src: &str) -> Result<Self, ImageError> {
        let trimmed = src.trim();
        if trimmed.is_empty() {
            return Err(ImageError::InvalidFormat("图片地址为空".to_string()));
        }

        let lower = trimmed.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            return Ok(Self::Url(trimmed.to_string()));
        }
        if lower.starts_with("data:") {
            return Ok(Self::DataUrl(trimmed.to_string()));
        }
        if let Some(path) = trimmed.strip_prefix("file://") {
            return Ok(Self::FilePath(path.to_string()));
        }
        if lower.contains("://") {
            return Err(ImageError::InvalidFormat(format!(
                "不支持的图片协议：{}",
                trimmed.split("://").next().unwrap_or_default()
            )));
        }

        Ok(Self::FilePath(trimmed.to_string()))
    }

    /// 来源提示（用于日志与诊断）。
    pub(crate) fn hint(&self) -> &'static str {
        match self {
            Self::Url(_) => "url",
            Self::DataUrl(_) => "data-url",
            Self::FilePath(_) => "file",
        }
    }
}

/// 加载阶段输出：原始字节与来源标识。
pub(crate) struct RawImageData {
    /// 原始图片字节。
    pub(crate) bytes: Vec<u8>,
    /// 来源提示（用于日志与诊断）。
    pub(crate) source_hint: &'static str,
}

/// 栅格化阶段输出。
#[derive(Debug, Clone)]
pub struct EncodedImage {
    /// 图像宽度（像素，原始尺寸）。
    pub width: u32,
    /// 图像高度（像素，原始尺寸）。
    pub height: u32,
    /// `data:image/png;base64,...`
    pub data_uri: String,
}
