//! 导出写入模块
//!
//! 文件名约定：前缀 + 年、月（从 1 开始）、日、时、分、秒、毫秒，各段不补零、无分隔符。

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, TimeZone, Timelike};

use crate::error::AppError;

pub const EXPORT_CONTENT_TYPE: &str = "application/json";

/// 导出写入器：把已解析的文档快照落地为可下载文件。
#[async_trait]
pub trait ExportWriter: Send + Sync {
    /// 写入内容，返回写入位置。
    async fn write(&self, content: &str, filename: &str, content_type: &str) -> Result<PathBuf, AppError>;
}

pub fn export_file_name<Tz: TimeZone>(prefix: &str, now: &DateTime<Tz>) -> String {
    format!(
        "{}{}{}{}{}{}{}{}",
        prefix,
        now.year(),
        now.month(),
        now.day(),
        now.hour(),
        now.minute(),
        now.second(),
        now.timestamp_subsec_millis().min(999)
    )
}

/// 写入本地目录的导出器，目录不存在时自动创建。
#[derive(Debug, Clone)]
pub struct FileExportWriter {
    dir: PathBuf,
}

impl FileExportWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }
}

#[async_trait]
impl ExportWriter for FileExportWriter {
    async fn write(&self, content: &str, filename: &str, content_type: &str) -> Result<PathBuf, AppError> {
        if filename.is_empty() || filename.contains(['/', '\\']) {
            return Err(AppError::Export(format!("非法文件名: {}", filename)));
        }

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| AppError::Export(format!("创建导出目录失败: {}", e)))?;

        let path = self.dir.join(filename);
        tokio::fs::write(&path, content.as_bytes())
            .await
            .map_err(|e| AppError::Export(format!("写入导出文件失败: {}", e)))?;

        log::info!(
            "💾 导出完成 - 文件: {} 类型: {} 大小: {}KB",
            path.display(),
            content_type,
            content.len() / 1024
        );
        Ok(path)
    }
}
