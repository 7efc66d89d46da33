//! # 解码与栅格化流水线模块
//!
//! ## 设计思路
//!
//! 将“字节 → 图像 → RGBA 画布 → PNG Data URI”的过程集中管理，并在关键节点增加资源上限控制。
//! 优先做尺寸检查，再进行完整解码，降低恶意输入触发高内存开销的风险。
//!
//! ## 实现思路
//!
//! 1. 猜测格式并读取 header 尺寸
//! 2. 按像素 / 内存上限快速拒绝
//! 3. 完整解码
//! 4. 以原始尺寸绘制到 RGBA 画布（不缩放）
//! 5. 编码为 PNG 并包装为 `data:image/png;base64,`

use base64::{Engine as _, engine::general_purpose};
use image::{DynamicImage, GenericImageView, ImageFormat};
use std::io::Cursor;

use super::source::{EncodedImage, RawImageData};
use super::{ImageConfig, ImageError};

pub(crate) const PNG_DATA_URI_PREFIX: &str = "data:image/png;base64,";

/// 将原始字节解码并编码为 PNG Data URI。
///
/// CPU 密集，调用方应放在阻塞线程中执行。
pub(crate) fn rasterize_to_png_data_uri(
    raw: RawImageData,
    config: &ImageConfig,
) -> Result<EncodedImage, ImageError> {
    let (header_width, header_height) = inspect_dimensions_from_memory(&raw.bytes)?;
    validate_pixel_limits(config, header_width, header_height)?;
    validate_decoded_memory_limits(config, header_width, header_height)?;

    let decoded = image::load_from_memory(&raw.bytes)
        .map_err(|e| ImageError::Decode(format!("图片解码失败：{}", e)))?;

    let (width, height) = decoded.dimensions();
    validate_pixel_limits(config, width, height)?;
    validate_decoded_memory_limits(config, width, height)?;

    let canvas = DynamicImage::ImageRgba8(decoded.to_rgba8());

    let mut png = Cursor::new(Vec::new());
    canvas
        .write_to(&mut png, ImageFormat::Png)
        .map_err(|e| ImageError::Encode(format!("PNG 编码失败：{}", e)))?;
    let png = png.into_inner();

    log::debug!(
        "🎨 栅格化完成 - 来源: {} 尺寸: {}x{} 输入={}KB PNG={}KB",
        raw.source_hint,
        width,
        height,
        raw.bytes.len() / 1024,
        png.len() / 1024
    );

    Ok(EncodedImage {
        width,
        height,
        data_uri: format!("{}{}", PNG_DATA_URI_PREFIX, general_purpose::STANDARD.encode(&png)),
    })
}

/// 仅通过内存中的图片头信息读取宽高。
fn inspect_dimensions_from_memory(bytes: &[u8]) -> Result<(u32, u32), ImageError> {
    let reader = image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| ImageError::InvalidFormat(format!("无法识别图片格式：{}", e)))?;

    if reader.format().is_none() {
        return Err(ImageError::InvalidFormat("不支持的图片格式".to_string()));
    }

    reader
        .into_dimensions()
        .map_err(|e| ImageError::Decode(format!("无法读取图片尺寸：{}", e)))
}

fn validate_pixel_limits(config: &ImageConfig, width: u32, height: u32) -> Result<(), ImageError> {
    let pixels = (width as u64)
        .checked_mul(height as u64)
        .ok_or_else(|| ImageError::ResourceLimit("图片像素数溢出".to_string()))?;

    if pixels == 0 {
        return Err(ImageError::Decode("图片尺寸为 0".to_string()));
    }

    if pixels > config.max_decoded_pixels {
        return Err(ImageError::ResourceLimit(format!(
            "图片像素过大：{} 像素（限制：{} 像素）",
            pixels, config.max_decoded_pixels
        )));
    }

    Ok(())
}

fn validate_decoded_memory_limits(
    config: &ImageConfig,
    width: u32,
    height: u32,
) -> Result<(), ImageError> {
    let estimated = (width as u64)
        .checked_mul(height as u64)
        .and_then(|pixels| pixels.checked_mul(4))
        .ok_or_else(|| ImageError::ResourceLimit("图片解码内存估算溢出".to_string()))?;

    if estimated > config.max_decoded_bytes {
        return Err(ImageError::ResourceLimit(format!(
            "图片解码预计内存过大：{:.2} MB（限制：{:.2} MB）",
            estimated as f64 / 1024.0 / 1024.0,
            config.max_decoded_bytes as f64 / 1024.0 / 1024.0
        )));
    }

    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{ImageBuffer, Rgba};

    pub(crate) fn create_png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = ImageBuffer::from_fn(width, height, |x, y| {
            Rgba([(x % 255) as u8, (y % 255) as u8, ((x + y) % 255) as u8, 255])
        });

        let mut cursor = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(img)
            .write_to(&mut cursor, ImageFormat::Png)
            .expect("failed to encode test image");
        cursor.into_inner()
    }

    fn create_jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = ImageBuffer::from_fn(width, height, |x, _| image::Rgb([(x % 255) as u8, 40, 90]));

        let mut cursor = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut cursor, ImageFormat::Jpeg)
            .expect("failed to encode test image");
        cursor.into_inner()
    }

    #[test]
    fn rasterize_keeps_natural_dimensions_and_emits_png() {
        let encoded = rasterize_to_png_data_uri(
            RawImageData {
                bytes: create_jpeg_bytes(37, 21),
                source_hint: "test",
            },
            &ImageConfig::default(),
        )
        .expect("rasterize failed");

        assert_eq!((encoded.width, encoded.height), (37, 21));
        assert!(encoded.data_uri.starts_with(PNG_DATA_URI_PREFIX));

        let png = general_purpose::STANDARD
            .decode(&encoded.data_uri[PNG_DATA_URI_PREFIX.len()..])
            .expect("data uri payload is not base64");
        assert_eq!(image::guess_format(&png).expect("guess failed"), ImageFormat::Png);
        let round = image::load_from_memory(&png).expect("png decode failed");
        assert_eq!(round.dimensions(), (37, 21));
    }

    #[test]
    fn rasterize_rejects_too_many_pixels() {
        let config = ImageConfig {
            max_decoded_pixels: 1_000,
            ..ImageConfig::default()
        };

        let result = rasterize_to_png_data_uri(
            RawImageData {
                bytes: create_png_bytes(100, 100),
                source_hint: "test",
            },
            &config,
        );

        assert!(matches!(result, Err(ImageError::ResourceLimit(_))));
    }

    #[test]
    fn rasterize_rejects_garbage() {
        let result = rasterize_to_png_data_uri(
            RawImageData {
                bytes: b"definitely not an image".to_vec(),
                source_hint: "test",
            },
            &ImageConfig::default(),
        );

        assert!(matches!(result, Err(ImageError::InvalidFormat(_))));
    }
}
