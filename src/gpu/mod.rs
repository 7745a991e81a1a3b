//! GPU resource layer
//!
//! Node kinds never touch the graphics API directly. They go through the
//! [`GpuContext`] trait, which hands out opaque handles and owns every
//! texture, render target and program behind them.
//!
//! ## Architecture
//!
//! - [`context`] - wgpu-backed context (shader, texture and framebuffer managers plus the quad pass)
//! - [`memory`] - in-memory context for headless hosts and tests
//! - [`pool`] - backend-neutral texture bookkeeping with eviction
//! - [`shader_library`] - built-in WGSL programs
//! - [`export`] - readback conveniences (RGBA images, PNG/JPEG bytes)

pub mod config;
pub mod context;
pub mod export;
pub mod framebuffer;
pub mod memory;
pub mod pool;
pub mod readback;
pub mod shader;
pub mod shader_library;
pub mod texture;

use glam::{Mat4, Vec2, Vec3, Vec4};
use serde::{Deserialize, Serialize};

use crate::error::GpuResult;

pub use config::GpuConfig;
pub use context::WgpuContext;
pub use export::{CopyOptions, ExportFormat};
pub use memory::MemoryGpu;

/// Opaque handle to a texture owned by a GPU context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TextureId(pub(crate) u64);

impl TextureId {
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Opaque handle to a cached render target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FramebufferId(pub(crate) u64);

/// Pixel formats understood by the texture and framebuffer managers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    R8,
    Rg8,
    Rgba8,
    Rgba16F,
    Rgba32F,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            PixelFormat::R8 => 1,
            PixelFormat::Rg8 => 2,
            PixelFormat::Rgba8 => 4,
            PixelFormat::Rgba16F => 8,
            PixelFormat::Rgba32F => 16,
        }
    }

    /// Formats that can be filled from 8-bit client pixel buffers
    pub fn is_uploadable(&self) -> bool {
        matches!(self, PixelFormat::R8 | PixelFormat::Rg8 | PixelFormat::Rgba8)
    }

    pub fn to_wgpu(&self) -> wgpu::TextureFormat {
        match self {
            PixelFormat::R8 => wgpu::TextureFormat::R8Unorm,
            PixelFormat::Rg8 => wgpu::TextureFormat::Rg8Unorm,
            PixelFormat::Rgba8 => wgpu::TextureFormat::Rgba8Unorm,
            PixelFormat::Rgba16F => wgpu::TextureFormat::Rgba16Float,
            PixelFormat::Rgba32F => wgpu::TextureFormat::Rgba32Float,
        }
    }
}

/// Width and height of a node's render target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputSize {
    pub width: u32,
    pub height: u32,
}

impl OutputSize {
    pub const DEFAULT_CANVAS: OutputSize = OutputSize {
        width: 1920,
        height: 1080,
    };

    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl Default for OutputSize {
    fn default() -> Self {
        Self::DEFAULT_CANVAS
    }
}

/// Snapshot of a texture's bookkeeping
#[derive(Debug, Clone, PartialEq)]
pub struct TextureInfo {
    pub id: TextureId,
    pub name: Option<String>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub used: bool,
}

/// Tightly packed client pixels, rows top to bottom
#[derive(Debug, Clone, Copy)]
pub struct PixelSource<'a> {
    pub width: u32,
    pub height: u32,
    pub data: &'a [u8],
}

impl<'a> PixelSource<'a> {
    pub fn new(width: u32, height: u32, data: &'a [u8]) -> Self {
        Self { width, height, data }
    }

    pub fn from_image(image: &'a image::RgbaImage) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
            data: image.as_raw(),
        }
    }

    /// Checks the buffer length against the format and returns the rows,
    /// reversed when `flip_y` is set
    pub(crate) fn validated_rows(&self, format: PixelFormat, flip_y: bool) -> GpuResult<Vec<u8>> {
        use crate::error::GpuError;

        if !format.is_uploadable() {
            return Err(GpuError::invalid_pixels(format!(
                "{format:?} cannot be uploaded from 8-bit pixels"
            )));
        }
        if self.width == 0 || self.height == 0 {
            return Err(GpuError::invalid_pixels("image has zero size"));
        }
        let row = (self.width * format.bytes_per_pixel()) as usize;
        let expected = row * self.height as usize;
        if self.data.len() != expected {
            return Err(GpuError::invalid_pixels(format!(
                "expected {expected} bytes for {}x{} {format:?}, got {}",
                self.width,
                self.height,
                self.data.len()
            )));
        }
        if !flip_y {
            return Ok(self.data.to_vec());
        }
        Ok(self.data.chunks_exact(row).rev().flatten().copied().collect())
    }
}

/// Options for `GpuContext::upload_texture`
#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// Pool key; unnamed uploads are never matched on later uploads
    pub name: Option<String>,
    pub format: PixelFormat,
    pub flip_y: bool,
}

impl UploadOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            name: None,
            format: PixelFormat::Rgba8,
            flip_y: false,
        }
    }
}

/// Shader stage of a compiled module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    pub fn entry_point(&self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vs_main",
            ShaderStage::Fragment => "fs_main",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
        }
    }

    pub fn to_naga(&self) -> naga::ShaderStage {
        match self {
            ShaderStage::Vertex => naga::ShaderStage::Vertex,
            ShaderStage::Fragment => naga::ShaderStage::Fragment,
        }
    }
}

/// A value bound to a named shader uniform
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    /// `None` binds the transparent fallback texture
    Texture(Option<TextureId>),
    Float(f32),
    Int(i32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Mat4(Mat4),
}

impl UniformValue {
    /// Number of 32-bit components the value occupies
    pub fn components(&self) -> usize {
        match self {
            UniformValue::Texture(_) => 0,
            UniformValue::Float(_) | UniformValue::Int(_) => 1,
            UniformValue::Vec2(_) => 2,
            UniformValue::Vec3(_) => 3,
            UniformValue::Vec4(_) => 4,
            UniformValue::Mat4(_) => 16,
        }
    }

    pub fn as_f32s(&self) -> Vec<f32> {
        match self {
            UniformValue::Texture(_) => Vec::new(),
            UniformValue::Float(v) => vec![*v],
            UniformValue::Int(v) => vec![*v as f32],
            UniformValue::Vec2(v) => v.to_array().to_vec(),
            UniformValue::Vec3(v) => v.to_array().to_vec(),
            UniformValue::Vec4(v) => v.to_array().to_vec(),
            UniformValue::Mat4(m) => m.to_cols_array().to_vec(),
        }
    }
}

/// Ordered name to value map handed to `render_shader`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Uniforms {
    values: Vec<(String, UniformValue)>,
}

impl Uniforms {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a value, replacing an earlier one with the same name
    pub fn set(&mut self, name: &str, value: UniformValue) {
        match self.values.iter_mut().find(|(n, _)| n == name) {
            Some(slot) => slot.1 = value,
            None => self.values.push((name.to_string(), value)),
        }
    }

    pub fn with(mut self, name: &str, value: UniformValue) -> Self {
        self.set(name, value);
        self
    }

    pub fn texture(self, name: &str, texture: Option<TextureId>) -> Self {
        self.with(name, UniformValue::Texture(texture))
    }

    pub fn float(self, name: &str, value: f32) -> Self {
        self.with(name, UniformValue::Float(value))
    }

    pub fn int(self, name: &str, value: i32) -> Self {
        self.with(name, UniformValue::Int(value))
    }

    pub fn vec2(self, name: &str, value: Vec2) -> Self {
        self.with(name, UniformValue::Vec2(value))
    }

    pub fn vec3(self, name: &str, value: Vec3) -> Self {
        self.with(name, UniformValue::Vec3(value))
    }

    pub fn vec4(self, name: &str, value: Vec4) -> Self {
        self.with(name, UniformValue::Vec4(value))
    }

    pub fn mat4(self, name: &str, value: Mat4) -> Self {
        self.with(name, UniformValue::Mat4(value))
    }

    pub fn get(&self, name: &str) -> Option<&UniformValue> {
        self.values.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &UniformValue)> {
        self.values.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Texture uniforms in the order they were set
    pub fn textures(&self) -> impl Iterator<Item = (&str, Option<TextureId>)> {
        self.values.iter().filter_map(|(n, v)| match v {
            UniformValue::Texture(t) => Some((n.as_str(), *t)),
            _ => None,
        })
    }
}

/// Everything node kinds and the engine need from a GPU backend
pub trait GpuContext {
    /// Compile and link a program under `name`; repeated names are no-ops
    fn create_program(&mut self, name: &str, vertex_source: &str, fragment_source: &str) -> GpuResult<()>;

    fn has_program(&self, name: &str) -> bool;

    /// Draw the full-screen quad with `program` into a fresh texture of `size`
    fn render_shader(&mut self, program: &str, uniforms: &Uniforms, size: OutputSize) -> GpuResult<TextureId>;

    fn upload_texture(&mut self, source: &PixelSource<'_>, options: &UploadOptions) -> GpuResult<TextureId>;

    /// Allocate an uninitialised anonymous texture
    fn create_texture(&mut self, size: OutputSize, format: PixelFormat) -> GpuResult<TextureId>;

    /// Tightly packed pixels of the top-left `width` x `height` region
    fn read_pixels(&mut self, texture: TextureId, width: u32, height: u32) -> GpuResult<Vec<u8>>;

    fn texture_info(&self, texture: TextureId) -> Option<TextureInfo>;

    fn texture_ids(&self) -> Vec<TextureId>;

    fn release_texture(&mut self, texture: TextureId) -> bool;

    fn mark_unused(&mut self, texture: TextureId);

    /// Free every texture currently marked unused, returning how many were freed
    fn collect_garbage(&mut self) -> usize;

    /// Release programs, textures and render targets
    fn dispose(&mut self);

    /// Read a texture back as an RGBA image, scaled to the requested size
    fn copy_to_image(&mut self, texture: TextureId, options: &CopyOptions) -> GpuResult<image::RgbaImage>
    where
        Self: Sized,
    {
        export::copy_to_image(self, texture, options)
    }

    /// Encode a texture as PNG or JPEG bytes
    fn export_image(&mut self, texture: TextureId, format: ExportFormat) -> GpuResult<Vec<u8>>
    where
        Self: Sized,
    {
        export::export_image(self, texture, format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniforms_replace_by_name() {
        let uniforms = Uniforms::new()
            .float("u_radius", 2.0)
            .vec2("u_direction", Vec2::X)
            .float("u_radius", 4.0);
        assert_eq!(uniforms.get("u_radius"), Some(&UniformValue::Float(4.0)));
        assert_eq!(uniforms.iter().count(), 2);
    }

    #[test]
    fn test_texture_uniforms_keep_order() {
        let uniforms = Uniforms::new()
            .texture("u_base", Some(TextureId(3)))
            .float("u_opacity", 1.0)
            .texture("u_mask", None);
        let names: Vec<_> = uniforms.textures().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["u_base", "u_mask"]);
    }

    #[test]
    fn test_pixel_source_validation() {
        let data = vec![0u8; 2 * 2 * 4];
        let source = PixelSource::new(2, 2, &data);
        assert!(source.validated_rows(PixelFormat::Rgba8, false).is_ok());
        assert!(source.validated_rows(PixelFormat::R8, false).is_err());
        assert!(source.validated_rows(PixelFormat::Rgba16F, false).is_err());
    }

    #[test]
    fn test_pixel_source_flip_reverses_rows() {
        let data = vec![1u8, 1, 2, 2];
        let source = PixelSource::new(1, 2, &data);
        let flipped = source.validated_rows(PixelFormat::Rg8, true).unwrap();
        assert_eq!(flipped, vec![2, 2, 1, 1]);
    }

    #[test]
    fn test_uniform_components() {
        assert_eq!(UniformValue::Mat4(Mat4::IDENTITY).as_f32s().len(), 16);
        assert_eq!(UniformValue::Int(3).as_f32s(), vec![3.0]);
        assert_eq!(UniformValue::Texture(None).components(), 0);
    }
}
