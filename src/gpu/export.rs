//! Readback conveniences for preview and export collaborators

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{imageops, DynamicImage, RgbaImage};
use serde::{Deserialize, Serialize};

use super::{GpuContext, PixelFormat, TextureId};
use crate::error::{GpuError, GpuResult};

/// Options for copying a texture into a canvas-sized image
#[derive(Debug, Clone, Default)]
pub struct CopyOptions {
    /// Target width; defaults to the texture width
    pub width: Option<u32>,
    /// Target height; defaults to the texture height
    pub height: Option<u32>,
    pub flip_y: bool,
}

/// Encoded output formats
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "lowercase")]
pub enum ExportFormat {
    Png,
    Jpeg { quality: u8 },
}

impl ExportFormat {
    /// Map a format name and a 0..=1 quality onto an encoder choice
    pub fn from_name(name: &str, quality: f32) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => ExportFormat::Jpeg {
                quality: (quality.clamp(0.0, 1.0) * 100.0).round().max(1.0) as u8,
            },
            _ => ExportFormat::Png,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Png => "png",
            ExportFormat::Jpeg { .. } => "jpg",
        }
    }
}

/// Read an RGBA8 texture back, optionally resized and flipped vertically
pub fn copy_to_image<G: GpuContext + ?Sized>(
    gpu: &mut G,
    texture: TextureId,
    options: &CopyOptions,
) -> GpuResult<RgbaImage> {
    let info = gpu.texture_info(texture).ok_or(GpuError::TextureNotFound(texture))?;
    if info.format != PixelFormat::Rgba8 {
        return Err(GpuError::Encode(format!("{:?} textures cannot be copied as RGBA", info.format)));
    }
    let pixels = gpu.read_pixels(texture, info.width, info.height)?;
    let mut image = RgbaImage::from_raw(info.width, info.height, pixels)
        .ok_or_else(|| GpuError::readback("pixel buffer does not match texture size"))?;

    let width = options.width.unwrap_or(info.width);
    let height = options.height.unwrap_or(info.height);
    if (width, height) != (info.width, info.height) {
        image = imageops::resize(&image, width, height, imageops::FilterType::Triangle);
    }
    if options.flip_y {
        imageops::flip_vertical_in_place(&mut image);
    }
    Ok(image)
}

/// Encode a texture into PNG or JPEG bytes
pub fn export_image<G: GpuContext + ?Sized>(gpu: &mut G, texture: TextureId, format: ExportFormat) -> GpuResult<Vec<u8>> {
    let image = copy_to_image(gpu, texture, &CopyOptions::default())?;
    let mut bytes = Vec::new();
    let result = match format {
        ExportFormat::Png => DynamicImage::ImageRgba8(image).write_with_encoder(PngEncoder::new(&mut bytes)),
        ExportFormat::Jpeg { quality } => {
            let rgb = DynamicImage::ImageRgba8(image).to_rgb8();
            DynamicImage::ImageRgb8(rgb).write_with_encoder(JpegEncoder::new_with_quality(&mut bytes, quality))
        }
    };
    result.map_err(|e| GpuError::Encode(e.to_string()))?;
    Ok(bytes)
}
