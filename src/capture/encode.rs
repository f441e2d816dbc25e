use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;

use crate::models::EncodedImage;

const JPEG_MIME: &str = "image/jpeg";

/// Decodes a raw screenshot, downsizes it to `max_width` (aspect preserved)
/// and re-encodes it as JPEG. Screenshots are mostly text, so quality 60-80
/// keeps them legible at a fraction of the PNG size.
pub fn normalize(raw: &[u8], max_width: u32, quality: u8) -> Result<EncodedImage> {
    let img = image::load_from_memory(raw).context("screenshot is not a readable image")?;

    let img = if max_width > 0 && img.width() > max_width {
        let height = scaled_height(img.width(), img.height(), max_width);
        img.resize_exact(max_width, height, FilterType::Triangle)
    } else {
        img
    };

    // JPEG has no alpha channel.
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let mut bytes = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut bytes, quality.clamp(1, 100));
    rgb.write_with_encoder(encoder)
        .context("failed to encode screenshot as JPEG")?;

    Ok(EncodedImage {
        bytes,
        mime: JPEG_MIME.into(),
        width: rgb.width(),
        height: rgb.height(),
    })
}

fn scaled_height(width: u32, height: u32, target_width: u32) -> u32 {
    let scaled = u64::from(height) * u64::from(target_width) / u64::from(width.max(1));
    scaled.clamp(1, u64::from(u32::MAX)) as u32
}
