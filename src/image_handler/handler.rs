//! # 核心编排模块
//!
//! ## 设计思路
//!
//! `ImageHandler` 只负责流程编排，不关心调用方是批量预加载还是序列化时的懒加载。
//! 处理链路固定为：
//! 1. 按 URL 形态识别来源
//! 2. 按来源加载原始字节
//! 3. 在阻塞线程中解码、栅格化并编码为 PNG Data URI
//!
//! ## 实现思路
//!
//! - 配置在构造时固定，HTTP 客户端复用。
//! - 通过 `ImageLoader` trait 暴露给上层，测试可替换为内存实现。
//! - 记录 `load/encode/total` 阶段耗时，便于性能诊断。

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use super::loader::{build_http_client, redact_url_for_log};
use super::pipeline::rasterize_to_png_data_uri;
use super::source::EncodedImage;
use super::{ImageConfig, ImageError, ImageSource};

/// 图片加载能力：URL → PNG Data URI。
#[async_trait]
pub trait ImageLoader: Send + Sync {
    /// 加载 `url` 指向的图片并返回 `data:image/png;base64,...`。
    async fn load(&self, url: &str) -> Result<String, ImageError>;
}

/// 图片处理器。
///
/// 封装了配置与 HTTP 客户端，并编排各子模块实现完整流程。
pub struct ImageHandler {
    pub(super) config: Arc<ImageConfig>,
    pub(super) http_client: reqwest::Client,
}

impl ImageHandler {
    /// 根据配置创建处理器。
    ///
    /// # 示例
    /// ```rust,no_run
    /// use rich_copy_embed::image_handler::{ImageConfig, ImageHandler};
    ///
    /// let handler = ImageHandler::new(ImageConfig::default())?;
    /// # Ok::<(), rich_copy_embed::image_handler::ImageError>(())
    /// ```
    pub fn new(config: ImageConfig) -> Result<Self, ImageError> {
        config.validate()?;
        let http_client = build_http_client(&config)?;
        Ok(Self {
            config: Arc::new(config),
            http_client,
        })
    }

    pub fn config(&self) -> &ImageConfig {
        &self.config
    }

    /// 处理主入口：加载并栅格化为 PNG Data URI。
    pub async fn load_and_encode(&self, src: &str) -> Result<EncodedImage, ImageError> {
        let config = Arc::clone(&self.config);
        let total_start = Instant::now();
        let source = ImageSource::classify(src)?;
        let hint = source.hint();

        let load_start = Instant::now();
        let raw = match &source {
            ImageSource::Url(url) => self.load_from_url(url, &config).await?,
            ImageSource::DataUrl(data) => self.load_from_data_url(data, &config)?,
            ImageSource::FilePath(path) => {
                if !config.allow_local_files {
                    log::warn!("🚫 本地文件读取未开启，拒绝加载: {}", path);
                    return Err(ImageError::InvalidFormat(
                        "未开启本地文件读取（allow_local_files）".to_string(),
                    ));
                }
                self.load_from_file(path, &config).await?
            }
        };
        let load_elapsed = load_start.elapsed();

        let encode_start = Instant::now();
        let encode_config = Arc::clone(&config);
        let encoded =
            tokio::task::spawn_blocking(move || rasterize_to_png_data_uri(raw, &encode_config))
                .await
                .map_err(|e| ImageError::Encode(format!("线程执行失败：{}", e)))??;
        let encode_elapsed = encode_start.elapsed();

        log::info!(
            "✅ 图片嵌入数据生成完成 - 来源: {} 地址: {} 尺寸: {}x{} load={}ms encode={}ms total={}ms",
            hint,
            redact_url_for_log(src),
            encoded.width,
            encoded.height,
            load_elapsed.as_millis(),
            encode_elapsed.as_millis(),
            total_start.elapsed().as_millis()
        );

        Ok(encoded)
    }
}

#[async_trait]
impl ImageLoader for ImageHandler {
    async fn load(&self, url: &str) -> Result<String, ImageError> {
        self.load_and_encode(url).await.map(|encoded| encoded.data_uri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_handler::pipeline::PNG_DATA_URI_PREFIX;
    use crate::image_handler::pipeline::tests::create_png_bytes;
    use base64::{Engine as _, engine::general_purpose};
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn new_rejects_invalid_config() {
        let config = ImageConfig {
            connect_timeout: 0,
            ..ImageConfig::default()
        };

        assert!(matches!(ImageHandler::new(config), Err(ImageError::InvalidFormat(_))));
    }

    #[tokio::test]
    async fn loads_png_over_http_as_data_uri() {
        let png = create_png_bytes(12, 8);
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind test server failed");
        let addr = listener.local_addr().expect("read local addr failed");

        let body = png.clone();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept failed");
            let mut req_buf = [0u8; 1024];
            let _ = stream.read(&mut req_buf);

            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: image/png\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            stream.write_all(head.as_bytes()).expect("write headers failed");
            stream.write_all(&body).expect("write body failed");
            stream.flush().expect("flush failed");
        });

        let handler = ImageHandler::new(ImageConfig::default()).expect("handler init failed");
        let url = format!("http://127.0.0.1:{}/image.png", addr.port());
        let encoded = handler.load_and_encode(&url).await.expect("load failed");

        server.join().expect("server thread failed");

        assert_eq!((encoded.width, encoded.height), (12, 8));
        assert!(encoded.data_uri.starts_with(PNG_DATA_URI_PREFIX));
    }

    #[tokio::test]
    async fn loads_inline_data_url() {
        let data_url = format!(
            "data:image/png;base64,{}",
            general_purpose::STANDARD.encode(create_png_bytes(4, 4))
        );
        let handler = ImageHandler::new(ImageConfig::default()).expect("handler init failed");

        let data_uri = handler.load(&data_url).await.expect("load failed");

        assert!(data_uri.starts_with(PNG_DATA_URI_PREFIX));
    }

    fn local_files_config() -> ImageConfig {
        ImageConfig {
            allow_local_files: true,
            ..ImageConfig::default()
        }
    }

    #[tokio::test]
    async fn loads_local_file_when_allowed() {
        let dir = tempfile::tempdir().expect("tempdir failed");
        let path = dir.path().join("local.png");
        std::fs::write(&path, create_png_bytes(3, 5)).expect("write fixture failed");
        let handler = ImageHandler::new(local_files_config()).expect("handler init failed");

        let encoded = handler
            .load_and_encode(&format!("file://{}", path.display()))
            .await
            .expect("load failed");

        assert_eq!((encoded.width, encoded.height), (3, 5));
    }

    #[tokio::test]
    async fn local_files_are_refused_by_default() {
        let dir = tempfile::tempdir().expect("tempdir failed");
        let path = dir.path().join("private.png");
        std::fs::write(&path, create_png_bytes(2, 2)).expect("write fixture failed");
        let handler = ImageHandler::new(ImageConfig::default()).expect("handler init failed");

        let from_url = handler.load(&format!("file://{}", path.display())).await;
        let from_bare_path = handler.load(&path.display().to_string()).await;

        assert!(matches!(from_url, Err(ImageError::InvalidFormat(_))));
        assert!(matches!(from_bare_path, Err(ImageError::InvalidFormat(_))));
    }

    #[tokio::test]
    async fn missing_file_is_a_load_failure() {
        let handler = ImageHandler::new(local_files_config()).expect("handler init failed");

        let result = handler.load("/definitely/not/here/image.jpg").await;

        assert!(matches!(result, Err(ImageError::FileSystem(_))));
    }
}
