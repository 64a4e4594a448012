use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageEncoder, RgbaImage};

use crate::error::EncodeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeFormat {
    Jpeg,
    Png,
}

impl EncodeFormat {
    pub fn content_type(self) -> &'static str {
        match self {
            EncodeFormat::Jpeg => "image/jpeg",
            EncodeFormat::Png => "image/png",
        }
    }
}

/// Encode a raster. JPEG drops alpha; `quality` is 1-100 and ignored for PNG.
pub fn encode(surface: &RgbaImage, format: EncodeFormat, quality: u8) -> Result<Vec<u8>, EncodeError> {
    let (width, height) = surface.dimensions();
    if width == 0 || height == 0 {
        return Err(EncodeError::Empty { width, height });
    }

    let mut out = Vec::new();
    match format {
        EncodeFormat::Jpeg => {
            let rgb = DynamicImage::ImageRgba8(surface.clone()).to_rgb8();
            let encoder = JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100));
            encoder.write_image(rgb.as_raw(), width, height, image::ExtendedColorType::Rgb8)?;
        }
        EncodeFormat::Png => {
            PngEncoder::new(&mut out).write_image(
                surface.as_raw(),
                width,
                height,
                image::ExtendedColorType::Rgba8,
            )?;
        }
    }

    if out.is_empty() {
        return Err(EncodeError::Empty { width, height });
    }
    Ok(out)
}

/// Downscale an encoded composite to at most `max_width` pixels wide and
/// re-encode it as JPEG. Narrower images are re-encoded without resizing.
pub fn compress_for_upload(bytes: &[u8], max_width: u32, quality: u8) -> Result<Vec<u8>, EncodeError> {
    let img = image::load_from_memory(bytes)?;
    let img = if max_width > 0 && img.width() > max_width {
        let height = ((img.height() as f64) * max_width as f64 / img.width() as f64)
            .round()
            .max(1.0) as u32;
        img.resize_exact(max_width, height, FilterType::Triangle)
    } else {
        img
    };
    encode(&img.to_rgba8(), EncodeFormat::Jpeg, quality)
}
