//! # 设置模块
//!
//! `EmbedSettings` 汇总图片加载、导出与复制重试的可调参数，
//! 以 JSON 文件保存；缺省字段回落到默认值。

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::image_handler::ImageConfig;
use crate::resolver::DEFAULT_UNSUPPORTED_MARKER;
use crate::trigger::BatchFailurePolicy;

/// 导出文件名默认前缀。
pub const DEFAULT_EXPORT_PREFIX: &str = "licit-";

/// 嵌入插件的全部可调参数，缺省字段取默认值。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedSettings {
    pub image: ImageConfig,
    /// `src` 中含该子串的图片不加载
    pub unsupported_marker: String,
    pub export_prefix: String,
    pub export_dir: PathBuf,
    pub batch_failure_policy: BatchFailurePolicy,
    pub copy_retries: u32,
    pub copy_retry_delay_ms: u64,
}

impl Default for EmbedSettings {
    fn default() -> Self {
        Self {
            image: ImageConfig::default(),
            unsupported_marker: DEFAULT_UNSUPPORTED_MARKER.to_string(),
            export_prefix: DEFAULT_EXPORT_PREFIX.to_string(),
            export_dir: PathBuf::from("."),
            batch_failure_policy: BatchFailurePolicy::default(),
            copy_retries: 5,
            copy_retry_delay_ms: 50,
        }
    }
}

impl EmbedSettings {
    /// 从 JSON 文件读取设置；文件不存在时使用默认值。
    pub fn load(path: &Path) -> Result<Self, AppError> {
        if !path.exists() {
            log::debug!("⚙️ 设置文件不存在，使用默认设置: {}", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        let settings: Self = serde_json::from_str(&content)
            .map_err(|e| AppError::Settings(format!("解析设置文件失败: {}", e)))?;
        settings.validate()?;

        log::info!("⚙️ 已加载设置: {}", path.display());
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<(), AppError> {
        self.validate()?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| AppError::Settings(format!("序列化设置失败: {}", e)))?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), AppError> {
        self.image
            .validate()
            .map_err(|e| AppError::Settings(e.to_string()))?;

        if self.unsupported_marker.trim().is_empty() {
            return Err(AppError::Settings("unsupported_marker 不能为空".to_string()));
        }

        if self
            .export_prefix
            .chars()
            .any(|c| matches!(c, '/' | '\\') || c.is_control())
        {
            return Err(AppError::Settings(format!(
                "export_prefix 含非法字符: {}",
                self.export_prefix
            )));
        }

        if self.copy_retries == 0 || self.copy_retries > 20 {
            return Err(AppError::Settings(format!(
                "copy_retries 必须在 1-20 之间，当前为 {}",
                self.copy_retries
            )));
        }

        if self.copy_retry_delay_ms > 5_000 {
            return Err(AppError::Settings(format!(
                "copy_retry_delay_ms 不能超过 5000，当前为 {}",
                self.copy_retry_delay_ms
            )));
        }

        Ok(())
    }
}
