//! 统一错误类型模块
//!
//! # 设计思路
//!
//! 定义全局统一的 `AppError` 枚举，图片链路之外的宿主交互、导出、设置等失败
//! 都收敛到这里，上层只需处理一种错误类型。
//!
//! # 实现思路
//!
//! - 使用 `thiserror` 派生可读错误消息。
//! - 为 `ImageError` / `io::Error` / `serde_json::Error` 提供 `From` 转换，无需手动 map。
//! - 实现 `Serialize` 将错误序列化为字符串，便于宿主侧展示或上报。

use serde::Serialize;

use crate::image_handler::ImageError;

/// 应用级统一错误类型
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// 图片处理流水线错误（加载 / 解码 / 编码）
    #[error("{0}")]
    Image(#[from] ImageError),

    /// 文件系统 I/O 错误
    #[error("文件系统错误: {0}")]
    Io(#[from] std::io::Error),

    /// 文档 JSON 读写失败
    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),

    /// 剪贴板读写操作失败
    #[error("剪贴板操作失败: {0}")]
    Clipboard(String),

    /// 导出文件写入失败
    #[error("导出失败: {0}")]
    Export(String),

    /// 宿主编辑器能力调用失败
    #[error("宿主调用失败: {0}")]
    Host(String),

    /// 设置文件不可用或取值非法
    #[error("设置错误: {0}")]
    Settings(String),

    /// 文档结构不符合预期
    #[error("文档结构错误: {0}")]
    Document(String),
}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_errors_convert_and_keep_message() {
        let err: AppError = ImageError::Network("HTTP 404: 未找到".to_string()).into();

        assert!(matches!(err, AppError::Image(_)));
        assert_eq!(err.to_string(), "网络错误：HTTP 404: 未找到");
    }

    #[test]
    fn serializes_as_plain_string() {
        let err = AppError::Export("磁盘已满".to_string());
        let json = serde_json::to_string(&err).expect("serialize failed");

        assert_eq!(json, "\"导出失败: 磁盘已满\"");
    }
}
