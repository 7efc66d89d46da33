//! # 配置模块
//!
//! ## 设计思路
//!
//! 将所有“可调策略”集中到 `ImageConfig`，保证运行时行为可观测、可调整、可测试。
//! 配置可从设置文件反序列化，缺省字段回落到 `Default`。

use serde::{Deserialize, Serialize};

use super::ImageError;

/// 图片加载配置。
///
/// 字段覆盖了下载与解码两个阶段。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    /// 下载/读取原始字节时允许的最大文件体积（字节）。
    pub max_file_size: u64,
    /// 网络下载超时时间（秒）。
    pub download_timeout: u64,
    /// 建立连接（TCP/TLS）超时时间（秒）。
    pub connect_timeout: u64,
    /// 下载首包超时时间（毫秒）。
    pub stream_first_byte_timeout_ms: u64,
    /// 下载分块读取超时时间（毫秒）。
    pub stream_chunk_timeout_ms: u64,
    /// 最大重定向次数，避免无限跳转。
    pub max_redirects: usize,
    /// 是否允许访问内网或本地地址。
    ///
    /// 编辑器中的图片常托管在内网服务器，因此默认开启。
    pub allow_private_network: bool,
    /// 关闭内网访问时，是否解析主机名并拒绝落在内网的解析结果。
    pub resolve_dns_for_url_safety: bool,
    /// 是否允许读取本地文件（`file://` 或裸路径）。
    ///
    /// 文档可能来自不可信来源，默认关闭。
    pub allow_local_files: bool,
    /// 解码后的像素上限（`width * height`）。
    pub max_decoded_pixels: u64,
    /// 解码阶段允许的预计内存上限（按 RGBA 估算，字节）。
    pub max_decoded_bytes: u64,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            max_file_size: 50 * 1024 * 1024,
            download_timeout: 30,
            connect_timeout: 8,
            stream_first_byte_timeout_ms: 10_000,
            stream_chunk_timeout_ms: 15_000,
            max_redirects: 5,
            allow_private_network: true,
            resolve_dns_for_url_safety: true,
            allow_local_files: false,
            max_decoded_pixels: 40_000_000,
            max_decoded_bytes: 160 * 1024 * 1024,
        }
    }
}

impl ImageConfig {
    /// 校验取值范围，拒绝会导致加载必然失败的配置。
    pub fn validate(&self) -> Result<(), ImageError> {
        if self.max_file_size == 0 {
            return Err(ImageError::InvalidFormat("max_file_size 不能为 0".to_string()));
        }
        if !(1..=600).contains(&self.download_timeout) {
            return Err(ImageError::InvalidFormat(
                "download_timeout 必须在 1~600 秒之间".to_string(),
            ));
        }
        if !(1..=120).contains(&self.connect_timeout) {
            return Err(ImageError::InvalidFormat(
                "connect_timeout 必须在 1~120 秒之间".to_string(),
            ));
        }
        if !(500..=120_000).contains(&self.stream_first_byte_timeout_ms) {
            return Err(ImageError::InvalidFormat(
                "stream_first_byte_timeout_ms 必须在 500~120000 毫秒之间".to_string(),
            ));
        }
        if !(500..=120_000).contains(&self.stream_chunk_timeout_ms) {
            return Err(ImageError::InvalidFormat(
                "stream_chunk_timeout_ms 必须在 500~120000 毫秒之间".to_string(),
            ));
        }
        if self.max_decoded_bytes < 8 * 1024 * 1024 {
            return Err(ImageError::InvalidFormat("max_decoded_bytes 不能小于 8MB".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(ImageConfig::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_connect_timeout() {
        let config = ImageConfig {
            connect_timeout: 0,
            ..ImageConfig::default()
        };

        assert!(matches!(config.validate(), Err(ImageError::InvalidFormat(_))));
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: ImageConfig =
            serde_json::from_str(r#"{ "max_redirects": 2 }"#).expect("parse config failed");

        assert_eq!(config.max_redirects, 2);
        assert_eq!(config.download_timeout, 30);
        assert!(config.allow_private_network);
        assert!(config.resolve_dns_for_url_safety);
        assert!(!config.allow_local_files);
    }
}
