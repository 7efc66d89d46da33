//! # 加载与校验模块
//!
//! ## 设计思路
//!
//! 统一处理不同来源（URL / Data URL / 本地文件）的原始字节加载，并在“尽可能早”的阶段执行输入校验。
//! 目标是尽快失败，减少不必要内存与 CPU 消耗。
//!
//! ## 实现思路
//!
//! - URL：协议 + 主机校验 + DNS 解析校验 + 手动重定向 + 内容类型 + 体积校验 + 流式下载。
//! - DNS 校验得到的公网地址会被钉到本次请求，避免二次解析落到内网。
//! - Data URL：格式解析 + 解码前体积估算。
//! - 文件：存在性 + metadata 体积限制 + 读取。
//! - 请求不携带 Cookie / 凭据，对端拒绝时按普通网络错误处理。
//! - 网络错误统一映射到 `ImageError`，便于上层处理。

use base64::{Engine as _, engine::general_purpose};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::net::lookup_host;

use super::source::RawImageData;
use super::{ImageConfig, ImageError, ImageHandler};

const STREAM_SIGNATURE_PROBE_BYTES: usize = 4096;
const NETWORK_RETRY_MAX_ATTEMPTS: u8 = 3;
const NETWORK_RETRY_BASE_DELAY_MS: u64 = 180;
/// 服务器 `Retry-After` 提示的上限，等待期间插件处于忙碌状态。
const RETRY_AFTER_MAX_MS: u64 = 5_000;
const BUFFER_INITIAL_CAPACITY: usize = 16 * 1024;

impl ImageHandler {
    /// 从 URL 加载图片原始字节。
    pub(super) async fn load_from_url(
        &self,
        url: &str,
        config: &ImageConfig,
    ) -> Result<RawImageData, ImageError> {
        log::info!("🌐 开始下载图片 - URL: {}", redact_url_for_log(url));

        let pinned = validate_url_safety(url, config).await?;
        let bytes = self.download_with_validation(url, pinned, config).await?;
        validate_image_signature(&bytes)?;

        Ok(RawImageData {
            bytes,
            source_hint: "url",
        })
    }

    /// 从 `data:` URL 加载图片原始字节。
    pub(super) fn load_from_data_url(
        &self,
        data: &str,
        config: &ImageConfig,
    ) -> Result<RawImageData, ImageError> {
        log::debug!("📝 开始处理内联 base64 图片");

        let bytes = parse_data_url_with_limit(data, config.max_file_size)?;

        if bytes.len() as u64 > config.max_file_size {
            return Err(ImageError::ResourceLimit(format!(
                "Base64 解码后体积过大：{:.2} MB（限制：{:.2} MB）",
                bytes.len() as f64 / 1024.0 / 1024.0,
                config.max_file_size as f64 / 1024.0 / 1024.0
            )));
        }
        validate_image_signature(&bytes)?;

        Ok(RawImageData {
            bytes,
            source_hint: "data-url",
        })
    }

    /// 从本地路径加载图片原始字节。
    pub(super) async fn load_from_file(
        &self,
        path: &str,
        config: &ImageConfig,
    ) -> Result<RawImageData, ImageError> {
        log::info!("📁 开始读取本地图片 - 路径: {}", path);

        let file_path = Path::new(path);
        let metadata = tokio::fs::metadata(file_path)
            .await
            .map_err(|e| ImageError::FileSystem(format!("无法读取文件信息 {}：{}", path, e)))?;

        if metadata.len() > config.max_file_size {
            return Err(ImageError::ResourceLimit(format!(
                "文件过大：{:.2} MB（限制：{:.2} MB）",
                metadata.len() as f64 / 1024.0 / 1024.0,
                config.max_file_size as f64 / 1024.0 / 1024.0
            )));
        }

        let bytes = tokio::fs::read(file_path)
            .await
            .map_err(|e| ImageError::FileSystem(format!("无法读取图片文件：{}", e)))?;
        validate_image_signature(&bytes)?;

        Ok(RawImageData {
            bytes,
            source_hint: "file",
        })
    }

    /// 执行带校验的网络下载。
    ///
    /// 重定向手动跟随，每一跳都重新做安全校验；使用流式读取，避免一次性读入导致内存峰值过高。
    /// `pinned` 为首跳已校验的解析地址。
    pub(super) async fn download_with_validation(
        &self,
        url: &str,
        mut pinned: Option<SocketAddr>,
        config: &ImageConfig,
    ) -> Result<Vec<u8>, ImageError> {
        log::debug!("📡 发送 HTTP 请求...");
        let mut current_url = reqwest::Url::parse(url)
            .map_err(|e| ImageError::InvalidFormat(format!("URL 格式错误：{}", e)))?;

        for redirect_count in 0..=config.max_redirects {
            let response = self.send_with_retry(&current_url, pinned, config).await?;

            if response.status().is_redirection() {
                if redirect_count >= config.max_redirects {
                    return Err(ImageError::Network(format!(
                        "重定向次数超过限制（{}）",
                        config.max_redirects
                    )));
                }

                let location = response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .ok_or_else(|| ImageError::Network("重定向响应缺少 Location 头".to_string()))?;

                let location_str = location
                    .to_str()
                    .map_err(|e| ImageError::InvalidFormat(format!("重定向地址无效：{}", e)))?;

                let next_url = current_url
                    .join(location_str)
                    .map_err(|e| ImageError::InvalidFormat(format!("重定向 URL 解析失败：{}", e)))?;

                pinned = validate_url_safety(next_url.as_str(), config).await?;

                log::debug!("↪️ 跳转到: {}", redact_url_for_log(next_url.as_str()));
                current_url = next_url;
                continue;
            }

            if !response.status().is_success() {
                return Err(ImageError::Network(format!(
                    "HTTP {}: {}",
                    response.status().as_u16(),
                    status_message(response.status().as_u16())
                )));
            }

            if let Some(ct) = response.headers().get(reqwest::header::CONTENT_TYPE) {
                if let Ok(ct_str) = ct.to_str() {
                    if !is_image_content_type(ct_str) {
                        return Err(ImageError::InvalidFormat(format!("不是图片类型：{}", ct_str)));
                    }
                }
            }

            let total_len = response
                .headers()
                .get(reqwest::header::CONTENT_LENGTH)
                .and_then(|cl| cl.to_str().ok())
                .and_then(|cl| cl.parse::<u64>().ok());

            if let Some(size) = total_len {
                if size > config.max_file_size {
                    return Err(ImageError::ResourceLimit(format!(
                        "文件过大：{:.2} MB（限制：{:.2} MB）",
                        size as f64 / 1024.0 / 1024.0,
                        config.max_file_size as f64 / 1024.0 / 1024.0
                    )));
                }
            }

            return read_body_with_limits(response, total_len, config).await;
        }

        Err(ImageError::Network("下载流程异常结束".to_string()))
    }

    /// 发送请求；超时、连接失败与 408/429/5xx 按指数退避重试。
    async fn send_with_retry(
        &self,
        url: &reqwest::Url,
        pinned: Option<SocketAddr>,
        config: &ImageConfig,
    ) -> Result<reqwest::Response, ImageError> {
        let client = match (pinned, url.host_str()) {
            (Some(addr), Some(host)) => build_pinned_http_client(config, host, addr)?,
            _ => self.http_client.clone(),
        };

        let mut attempt: u8 = 1;
        loop {
            let send_result = client
                .get(url.clone())
                .header(
                    reqwest::header::ACCEPT,
                    "image/avif,image/webp,image/apng,image/*,*/*;q=0.8",
                )
                .send()
                .await;

            match send_result {
                Ok(resp) => {
                    if attempt < NETWORK_RETRY_MAX_ATTEMPTS && is_retryable_http_status(resp.status()) {
                        let delay_ms = compute_retry_delay_with_jitter(
                            attempt,
                            retry_after_hint_ms(resp.headers()),
                        );
                        log::warn!(
                            "⚠️ HTTP {}（第 {}/{} 次，可重试）；{}ms 后重试",
                            resp.status().as_u16(),
                            attempt,
                            NETWORK_RETRY_MAX_ATTEMPTS,
                            delay_ms
                        );
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                        attempt = attempt.saturating_add(1);
                        continue;
                    }

                    return Ok(resp);
                }
                Err(err) => {
                    if attempt >= NETWORK_RETRY_MAX_ATTEMPTS || !is_retryable_network_error(&err) {
                        return Err(map_reqwest_error(err, url.as_str(), config));
                    }

                    let delay_ms = compute_retry_delay_with_jitter(attempt, None);
                    log::warn!(
                        "⚠️ 网络请求失败（第 {}/{} 次，可重试）：{}；{}ms 后重试",
                        attempt,
                        NETWORK_RETRY_MAX_ATTEMPTS,
                        sanitize_error_message_with_redacted_url(&err.to_string(), url.as_str()),
                        delay_ms
                    );
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }
}

fn http_client_builder(config: &ImageConfig) -> reqwest::ClientBuilder {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.download_timeout))
        .connect_timeout(Duration::from_secs(config.connect_timeout))
        .redirect(reqwest::redirect::Policy::none())
}

/// 构建复用型 HTTP 客户端：不跟随重定向、不保存 Cookie。
pub(super) fn build_http_client(config: &ImageConfig) -> Result<reqwest::Client, ImageError> {
    http_client_builder(config)
        .build()
        .map_err(|e| ImageError::Network(format!("无法创建 HTTP 客户端：{}", e)))
}

/// 把主机名固定解析到已校验的地址。
fn build_pinned_http_client(
    config: &ImageConfig,
    host: &str,
    addr: SocketAddr,
) -> Result<reqwest::Client, ImageError> {
    http_client_builder(config)
        .resolve(host, addr)
        .build()
        .map_err(|e| ImageError::Network(format!("无法创建 DNS 绑定客户端：{}", e)))
}

/// 分块读取响应体，首包与后续分块分别计时。
async fn read_body_with_limits(
    mut response: reqwest::Response,
    total_len: Option<u64>,
    config: &ImageConfig,
) -> Result<Vec<u8>, ImageError> {
    let initial_capacity = total_len
        .map(|len| len.min(config.max_file_size).min(usize::MAX as u64) as usize)
        .filter(|len| *len > 0)
        .unwrap_or(BUFFER_INITIAL_CAPACITY);
    let mut buffer = Vec::with_capacity(initial_capacity);
    let mut total: u64 = 0;
    let mut signature_validated = false;
    let mut received_first_chunk = false;

    loop {
        let read_timeout = if received_first_chunk {
            Duration::from_millis(config.stream_chunk_timeout_ms)
        } else {
            Duration::from_millis(config.stream_first_byte_timeout_ms)
        };

        let next_chunk_result = tokio::time::timeout(read_timeout, response.chunk())
            .await
            .map_err(|_| {
                if received_first_chunk {
                    ImageError::Timeout("下载数据流读取超时".to_string())
                } else {
                    ImageError::Timeout("下载首包超时".to_string())
                }
            })?;

        let Some(chunk) =
            next_chunk_result.map_err(|e| ImageError::Network(format!("下载失败：{}", e)))?
        else {
            break;
        };

        received_first_chunk = true;

        total = total.saturating_add(chunk.len() as u64);
        if total > config.max_file_size {
            return Err(ImageError::ResourceLimit("下载后文件超过大小限制".to_string()));
        }
        buffer.extend_from_slice(&chunk);

        if !signature_validated {
            signature_validated =
                validate_stream_signature_probe(&buffer, STREAM_SIGNATURE_PROBE_BYTES)?;
        }
    }

    if !signature_validated {
        validate_image_signature(&buffer)?;
    }

    log::debug!("✅ 下载完成 - {} bytes", total);
    Ok(buffer)
}

/// 校验 URL：仅允许 http/https；关闭内网访问时拦截本地主机、内网 IP，
/// 以及解析结果落在内网的主机名。
///
/// 返回值为 DNS 校验通过的地址，供请求钉住解析结果；未做解析时为 `None`。
pub(super) async fn validate_url_safety(
    url: &str,
    config: &ImageConfig,
) -> Result<Option<SocketAddr>, ImageError> {
    let parsed = reqwest::Url::parse(url)
        .map_err(|e| ImageError::InvalidFormat(format!("URL 格式错误：{}", e)))?;

    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(ImageError::InvalidFormat("仅支持 HTTP/HTTPS".to_string()));
    }

    if config.allow_private_network {
        return Ok(None);
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| ImageError::InvalidFormat("URL 缺少主机地址".to_string()))?;

    if is_local_hostname(host) {
        return Err(ImageError::InvalidFormat(format!("禁止访问本地网络地址：{}", host)));
    }

    let bare_host = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = bare_host.parse::<IpAddr>() {
        if is_private_or_local_ip(ip) {
            return Err(ImageError::InvalidFormat(format!("禁止访问内网 IP：{}", ip)));
        }
        return Ok(None);
    }

    if !config.resolve_dns_for_url_safety {
        return Ok(None);
    }

    let port = parsed
        .port_or_known_default()
        .ok_or_else(|| ImageError::InvalidFormat("URL 缺少端口信息".to_string()))?;
    resolve_public_socket_addr(host, port).await.map(Some)
}

/// 解析主机名；任一结果命中内网即拒绝，否则返回第一个地址。
async fn resolve_public_socket_addr(host: &str, port: u16) -> Result<SocketAddr, ImageError> {
    let addrs = lookup_host((host, port))
        .await
        .map_err(|e| ImageError::InvalidFormat(format!("URL 主机解析失败：{}", e)))?;

    let mut first = None;
    for addr in addrs {
        if is_private_or_local_ip(addr.ip()) {
            return Err(ImageError::InvalidFormat(format!(
                "URL 解析结果命中内网地址：{}",
                addr.ip()
            )));
        }
        first.get_or_insert(addr);
    }

    first.ok_or_else(|| ImageError::InvalidFormat("URL 未解析到有效地址".to_string()))
}

fn is_local_hostname(host: &str) -> bool {
    host.eq_ignore_ascii_case("localhost")
        || host.eq_ignore_ascii_case("localhost.")
        || host.ends_with(".local")
}

/// 判断 IP 是否属于本地/内网/链路本地等受限范围。
fn is_private_or_local_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            if v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                || v4.is_multicast()
            {
                return true;
            }

            let octets = v4.octets();
            octets[0] == 0 || (octets[0] == 100 && (octets[1] & 0b1100_0000) == 0b0100_0000)
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                || v6.is_unique_local()
                || v6.is_unicast_link_local()
                || v6.is_multicast()
        }
    }
}

fn retry_after_hint_ms(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    let value = headers.get(reqwest::header::RETRY_AFTER)?;
    let secs = value.to_str().ok()?.trim().parse::<u64>().ok()?;
    Some(secs.saturating_mul(1000).min(RETRY_AFTER_MAX_MS))
}

fn compute_retry_delay_with_jitter(attempt: u8, server_hint_ms: Option<u64>) -> u64 {
    let exp = NETWORK_RETRY_BASE_DELAY_MS.saturating_mul(1_u64 << (attempt.saturating_sub(1) as u32));
    let base = server_hint_ms.unwrap_or(exp);
    let jitter_bound = (base / 2).max(1);
    let seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    base.saturating_add(seed % (jitter_bound + 1))
}

fn is_retryable_http_status(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::REQUEST_TIMEOUT
        || status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

fn is_retryable_network_error(error: &reqwest::Error) -> bool {
    if error.is_timeout() || error.is_connect() {
        return true;
    }

    let msg = error.to_string().to_lowercase();
    msg.contains("connection reset")
        || msg.contains("connection closed before message completed")
        || msg.contains("peer closed connection")
}

fn is_image_content_type(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(|base| base.trim().to_ascii_lowercase().starts_with("image/"))
        .unwrap_or(false)
}

/// 日志中去掉 query 与 fragment，避免泄露签名参数。
pub(crate) fn redact_url_for_log(url: &str) -> String {
    if url.starts_with("data:") {
        return "<data-url>".to_string();
    }

    let Ok(parsed) = reqwest::Url::parse(url) else {
        return url.split(['?', '#']).next().unwrap_or_default().to_string();
    };

    let host = parsed.host_str().unwrap_or("<unknown-host>");
    let port = parsed.port().map(|p| format!(":{}", p)).unwrap_or_default();

    format!("{}://{}{}{}", parsed.scheme(), host, port, parsed.path())
}

fn sanitize_error_message_with_redacted_url(error_msg: &str, url: &str) -> String {
    error_msg.replace(url, &redact_url_for_log(url))
}

/// 统一映射 reqwest 错误到业务错误。
fn map_reqwest_error(e: reqwest::Error, url: &str, config: &ImageConfig) -> ImageError {
    let err_msg = sanitize_error_message_with_redacted_url(&e.to_string(), url);

    if e.is_timeout() {
        ImageError::Timeout(format!("下载超时（{}秒）", config.download_timeout))
    } else if e.is_connect() {
        ImageError::Network(format!("无法连接：{}", err_msg))
    } else {
        ImageError::Network(format!("请求失败：{}", err_msg))
    }
}

/// 常见 HTTP 状态码文案。
fn status_message(code: u16) -> &'static str {
    match code {
        404 => "未找到",
        401 | 403 => "访问被拒绝",
        500..=599 => "服务器错误",
        _ => "请求失败",
    }
}

fn estimate_base64_decoded_upper_bound_len(base64_data: &str) -> Result<u64, ImageError> {
    let len = base64_data.trim().len() as u64;
    let groups = len
        .checked_add(3)
        .ok_or_else(|| ImageError::ResourceLimit("Base64 输入长度溢出".to_string()))?
        / 4;

    groups
        .checked_mul(3)
        .ok_or_else(|| ImageError::ResourceLimit("Base64 解码体积估算溢出".to_string()))
}

/// 解析 `data:image/...;base64,` 输入，解码前先按长度估算体积。
pub(super) fn parse_data_url_with_limit(data: &str, max_file_size: u64) -> Result<Vec<u8>, ImageError> {
    let normalized = data.trim();

    if !normalized.to_ascii_lowercase().starts_with("data:image/") {
        return Err(ImageError::InvalidFormat("Data URL 不是图片类型".to_string()));
    }

    let base64_start = normalized
        .find(";base64,")
        .ok_or_else(|| ImageError::InvalidFormat("缺少 base64 标记".to_string()))?;
    let base64_data = &normalized[base64_start + 8..];

    let estimated_len = estimate_base64_decoded_upper_bound_len(base64_data)?;
    if estimated_len > max_file_size {
        return Err(ImageError::ResourceLimit(format!(
            "Base64 预计解码体积过大：{:.2} MB（限制：{:.2} MB）",
            estimated_len as f64 / 1024.0 / 1024.0,
            max_file_size as f64 / 1024.0 / 1024.0
        )));
    }

    general_purpose::STANDARD
        .decode(base64_data.trim())
        .map_err(|e| ImageError::Decode(format!("Base64 解码失败：{}", e)))
}

/// 通过文件签名（magic bytes）校验输入是否为图片。
fn validate_image_signature(bytes: &[u8]) -> Result<(), ImageError> {
    if bytes.is_empty() {
        return Err(ImageError::InvalidFormat("图片内容为空".to_string()));
    }

    let kind =
        infer::get(bytes).ok_or_else(|| ImageError::InvalidFormat("无法识别图片类型".to_string()))?;

    if kind.matcher_type() != infer::MatcherType::Image {
        return Err(ImageError::InvalidFormat(format!(
            "文件签名不是图片类型：{}",
            kind.mime_type()
        )));
    }

    Ok(())
}

/// 流式下载阶段的签名探测：尽早识别并拒绝非图片内容。
///
/// 返回值：
/// - `Ok(true)`：已识别为图片
/// - `Ok(false)`：当前字节不足以判断，继续下载
/// - `Err(...)`：已识别为非图片，或达到探测上限仍无法识别
fn validate_stream_signature_probe(bytes: &[u8], probe_limit: usize) -> Result<bool, ImageError> {
    if bytes.is_empty() {
        return Ok(false);
    }

    if let Some(kind) = infer::get(bytes) {
        if kind.matcher_type() != infer::MatcherType::Image {
            return Err(ImageError::InvalidFormat(format!(
                "下载内容不是图片类型：{}",
                kind.mime_type()
            )));
        }
        return Ok(true);
    }

    if bytes.len() >= probe_limit {
        return Err(ImageError::InvalidFormat(format!(
            "下载前 {} 字节内无法识别图片类型",
            probe_limit
        )));
    }

    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    #[tokio::test]
    async fn url_safety_blocks_private_targets_when_disabled() {
        let config = ImageConfig {
            allow_private_network: false,
            ..ImageConfig::default()
        };

        assert!(matches!(
            validate_url_safety("http://127.0.0.1/image.png", &config).await,
            Err(ImageError::InvalidFormat(_))
        ));
        assert!(matches!(
            validate_url_safety("https://localhost/image.png", &config).await,
            Err(ImageError::InvalidFormat(_))
        ));
        assert!(matches!(
            validate_url_safety("https://93.184.216.34/image.png", &config).await,
            Ok(None)
        ));
    }

    #[tokio::test]
    async fn url_safety_rejects_non_http_schemes() {
        let config = ImageConfig::default();

        assert!(matches!(
            validate_url_safety("ftp://example.com/image.png", &config).await,
            Err(ImageError::InvalidFormat(_))
        ));
    }

    #[tokio::test]
    async fn hostname_resolving_to_loopback_is_rejected() {
        let result = resolve_public_socket_addr("localhost", 80).await;

        assert!(matches!(result, Err(ImageError::InvalidFormat(_))));
    }

    #[tokio::test]
    async fn unresolvable_hostname_is_rejected_when_private_network_disabled() {
        let config = ImageConfig {
            allow_private_network: false,
            ..ImageConfig::default()
        };

        let result = validate_url_safety("http://image-host.invalid/a.png", &config).await;

        assert!(matches!(result, Err(ImageError::InvalidFormat(_))));
    }

    #[tokio::test]
    async fn dns_check_can_be_turned_off() {
        let config = ImageConfig {
            allow_private_network: false,
            resolve_dns_for_url_safety: false,
            ..ImageConfig::default()
        };

        let result = validate_url_safety("http://image-host.invalid/a.png", &config).await;

        assert!(matches!(result, Ok(None)));
    }

    #[test]
    fn retry_after_hint_is_capped() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::RETRY_AFTER,
            reqwest::header::HeaderValue::from_static("86400"),
        );

        let hint = retry_after_hint_ms(&headers);
        assert_eq!(hint, Some(RETRY_AFTER_MAX_MS));

        let delay = compute_retry_delay_with_jitter(1, hint);
        assert!(delay >= RETRY_AFTER_MAX_MS);
        assert!(delay <= RETRY_AFTER_MAX_MS + RETRY_AFTER_MAX_MS / 2);
    }

    #[test]
    fn data_url_parser_rejects_large_payload_before_decode() {
        let huge = format!("data:image/png;base64,{}", "A".repeat(1024 * 1024));
        let result = parse_data_url_with_limit(&huge, 32);

        assert!(matches!(result, Err(ImageError::ResourceLimit(_))));
    }

    #[test]
    fn data_url_parser_requires_base64_marker() {
        let result = parse_data_url_with_limit("data:image/svg+xml,<svg/>", 1024);

        assert!(matches!(result, Err(ImageError::InvalidFormat(_))));
    }

    #[test]
    fn content_type_parser_accepts_image_with_params() {
        assert!(is_image_content_type("image/png; charset=utf-8"));
        assert!(is_image_content_type("IMAGE/JPEG"));
        assert!(!is_image_content_type("text/html; charset=utf-8"));
    }

    #[test]
    fn retryable_http_status_is_expected() {
        assert!(is_retryable_http_status(reqwest::StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_http_status(reqwest::StatusCode::INTERNAL_SERVER_ERROR));
        assert!(!is_retryable_http_status(reqwest::StatusCode::BAD_REQUEST));
    }

    #[test]
    fn redact_url_for_log_removes_query_and_fragment() {
        let redacted = redact_url_for_log("https://example.com:8443/path/img.png?token=abc123#hash");

        assert_eq!(redacted, "https://example.com:8443/path/img.png");
        assert_eq!(redact_url_for_log("data:image/png;base64,AAAA"), "<data-url>");
    }

    #[test]
    fn stream_signature_probe_recognizes_png_header() {
        let png_signature = [137_u8, 80, 78, 71, 13, 10, 26, 10, 0, 0, 0, 13];

        assert!(matches!(validate_stream_signature_probe(&png_signature, 64), Ok(true)));
    }

    #[test]
    fn stream_signature_probe_rejects_non_image_payload() {
        let payload = b"<html><body>not an image</body></html>";

        assert!(matches!(
            validate_stream_signature_probe(payload, 64),
            Err(ImageError::InvalidFormat(_))
        ));
    }

    fn serve_once<F>(make_head: F, body: Vec<u8>) -> (u16, thread::JoinHandle<()>)
    where
        F: FnOnce(u16) -> String,
    {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind test server failed");
        let port = listener.local_addr().expect("read local addr failed").port();
        let response_head = make_head(port);

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept failed");
            let mut req_buf = [0u8; 1024];
            let _ = stream.read(&mut req_buf);

            stream
                .write_all(response_head.as_bytes())
                .expect("write headers failed");
            stream.write_all(&body).expect("write body failed");
            stream.flush().expect("flush failed");
        });

        (port, server)
    }

    #[tokio::test]
    async fn load_from_url_rejects_non_image_body_even_when_content_type_is_image() {
        let body = b"hello world".to_vec();
        let body_len = body.len();
        let (port, server) = serve_once(
            |_| {
                format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: image/png\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body_len
                )
            },
            body,
        );

        let handler = ImageHandler::new(ImageConfig::default()).expect("handler init failed");
        let config = ImageConfig::default();
        let url = format!("http://127.0.0.1:{}/fake.png", port);
        let result = handler.load_from_url(&url, &config).await;

        server.join().expect("server thread failed");

        assert!(matches!(result, Err(ImageError::InvalidFormat(_))));
    }

    #[tokio::test]
    async fn download_reports_http_status_as_network_error() {
        let (port, server) = serve_once(
            |_| "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string(),
            Vec::new(),
        );

        let handler = ImageHandler::new(ImageConfig::default()).expect("handler init failed");
        let config = ImageConfig::default();
        let url = format!("http://127.0.0.1:{}/missing.png", port);
        let result = handler.download_with_validation(&url, None, &config).await;

        server.join().expect("server thread failed");

        assert!(matches!(result, Err(ImageError::Network(msg)) if msg.contains("404")));
    }

    #[tokio::test]
    async fn download_blocks_redirect_to_localhost_when_private_network_disabled() {
        let (port, server) = serve_once(
            |port| {
                format!(
                    "HTTP/1.1 302 Found\r\nLocation: http://localhost:{}/final.png\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                    port
                )
            },
            Vec::new(),
        );

        let config = ImageConfig {
            allow_private_network: false,
            ..ImageConfig::default()
        };
        let handler = ImageHandler::new(config.clone()).expect("handler init failed");
        let url = format!("http://127.0.0.1:{}/start.png", port);

        let result = handler.download_with_validation(&url, None, &config).await;

        server.join().expect("server thread failed");

        assert!(matches!(result, Err(ImageError::InvalidFormat(_))));
    }
}
