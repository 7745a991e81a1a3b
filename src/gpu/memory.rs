//! In-memory GPU context
//!
//! Keeps textures as CPU byte buffers and runs programs through optional CPU
//! kernels registered by name. Programs are still validated as WGSL, every
//! render call is recorded, and a program can be told to fail, which makes
//! this backend suitable for headless hosts and for exercising the engine.

use std::collections::{HashMap, HashSet};

use log::debug;

use super::framebuffer::{check_complete, FramebufferKey};
use super::pool::{TexturePool, DEFAULT_POOL_LIMIT};
use super::shader::parse_and_validate;
use super::{
    GpuContext, OutputSize, PixelFormat, PixelSource, ShaderStage, TextureId, TextureInfo, UniformValue,
    Uniforms, UploadOptions,
};
use crate::error::{GpuError, GpuResult};

/// Largest target the in-memory backend accepts
const MAX_DIMENSION: u32 = 8192;

#[derive(Debug, Clone)]
pub struct MemoryTexture {
    pub pixels: Vec<u8>,
}

/// Read-only view of an input texture inside a kernel
#[derive(Debug, Clone, Copy)]
pub struct SampledImage<'a> {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub pixels: &'a [u8],
}

impl SampledImage<'_> {
    /// Clamp-to-edge texel fetch as normalised RGBA
    pub fn texel(&self, x: i64, y: i64) -> [f32; 4] {
        if self.width == 0 || self.height == 0 {
            return [0.0; 4];
        }
        let x = x.clamp(0, self.width as i64 - 1) as usize;
        let y = y.clamp(0, self.height as i64 - 1) as usize;
        let bpp = self.format.bytes_per_pixel() as usize;
        let start = (y * self.width as usize + x) * bpp;
        let px = &self.pixels[start..start + bpp.min(4)];
        let channel = |i: usize| px.get(i).map(|v| *v as f32 / 255.0);
        match self.format {
            PixelFormat::R8 => {
                let r = channel(0).unwrap_or(0.0);
                [r, r, r, 1.0]
            }
            PixelFormat::Rg8 => [channel(0).unwrap_or(0.0), channel(1).unwrap_or(0.0), 0.0, 1.0],
            _ => [
                channel(0).unwrap_or(0.0),
                channel(1).unwrap_or(0.0),
                channel(2).unwrap_or(0.0),
                channel(3).unwrap_or(0.0),
            ],
        }
    }
}

/// What a kernel sees: target size, uniforms and bound textures by name
pub struct KernelInput<'a> {
    pub size: OutputSize,
    pub uniforms: &'a Uniforms,
    textures: HashMap<&'a str, SampledImage<'a>>,
}

impl KernelInput<'_> {
    /// Fetch the texel of `name` that covers output pixel (x, y); unbound
    /// textures read as transparent black
    pub fn sample(&self, name: &str, x: i64, y: i64) -> [f32; 4] {
        let Some(image) = self.textures.get(name) else {
            return [0.0; 4];
        };
        let sx = ((x as f64 + 0.5) * image.width as f64 / self.size.width as f64).floor() as i64;
        let sy = ((y as f64 + 0.5) * image.height as f64 / self.size.height as f64).floor() as i64;
        image.texel(sx, sy)
    }

    pub fn float(&self, name: &str) -> f32 {
        match self.uniforms.get(name) {
            Some(UniformValue::Float(v)) => *v,
            Some(UniformValue::Int(v)) => *v as f32,
            _ => 0.0,
        }
    }

    pub fn int(&self, name: &str) -> i32 {
        match self.uniforms.get(name) {
            Some(UniformValue::Int(v)) => *v,
            Some(UniformValue::Float(v)) => *v as i32,
            _ => 0,
        }
    }

    pub fn vec2(&self, name: &str) -> [f32; 2] {
        match self.uniforms.get(name) {
            Some(UniformValue::Vec2(v)) => v.to_array(),
            _ => [0.0; 2],
        }
    }

    pub fn vec4(&self, name: &str) -> [f32; 4] {
        match self.uniforms.get(name) {
            Some(UniformValue::Vec4(v)) => v.to_array(),
            _ => [0.0; 4],
        }
    }

    /// Build an RGBA8 buffer by evaluating `f` for every output pixel
    pub fn shade(&self, mut f: impl FnMut(i64, i64) -> [f32; 4]) -> Vec<u8> {
        let (w, h) = (self.size.width as i64, self.size.height as i64);
        let mut out = Vec::with_capacity((w * h * 4) as usize);
        for y in 0..h {
            for x in 0..w {
                out.extend(f(x, y).map(to_unorm8));
            }
        }
        out
    }
}

fn to_unorm8(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

pub type Kernel = Box<dyn Fn(&KernelInput<'_>) -> Vec<u8>>;

/// One recorded `render_shader` call
#[derive(Debug, Clone, PartialEq)]
pub struct RenderCall {
    pub program: String,
    pub size: OutputSize,
    pub uniforms: Uniforms,
    pub output: TextureId,
}

/// CPU-side GPU context
pub struct MemoryGpu {
    textures: TexturePool<MemoryTexture>,
    programs: HashSet<String>,
    kernels: HashMap<String, Kernel>,
    framebuffers: HashSet<FramebufferKey>,
    failing: HashSet<String>,
    render_log: Vec<RenderCall>,
    disposed: bool,
}

impl MemoryGpu {
    /// Context with the reference kernels for the built-in programs
    pub fn new() -> Self {
        let mut gpu = Self::without_kernels(DEFAULT_POOL_LIMIT);
        for (name, kernel) in builtin_kernels() {
            gpu.register_kernel(name, kernel);
        }
        gpu
    }

    pub fn without_kernels(pool_limit: usize) -> Self {
        Self {
            textures: TexturePool::new(pool_limit),
            programs: HashSet::new(),
            kernels: HashMap::new(),
            framebuffers: HashSet::new(),
            failing: HashSet::new(),
            render_log: Vec::new(),
            disposed: false,
        }
    }

    pub fn with_pool_limit(pool_limit: usize) -> Self {
        let mut gpu = Self::new();
        gpu.textures = TexturePool::new(pool_limit);
        gpu
    }

    pub fn register_kernel(&mut self, program: &str, kernel: Kernel) {
        self.kernels.insert(program.to_string(), kernel);
    }

    /// Make every later render of `program` fail
    pub fn fail_program(&mut self, program: &str) {
        self.failing.insert(program.to_string());
    }

    pub fn heal_program(&mut self, program: &str) {
        self.failing.remove(program);
    }

    pub fn render_log(&self) -> &[RenderCall] {
        &self.render_log
    }

    pub fn clear_render_log(&mut self) {
        self.render_log.clear();
    }

    pub fn framebuffer_count(&self) -> usize {
        self.framebuffers.len()
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    fn ensure_live(&self) -> GpuResult<()> {
        if self.disposed {
            Err(GpuError::Disposed)
        } else {
            Ok(())
        }
    }
}

impl Default for MemoryGpu {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuContext for MemoryGpu {
    fn create_program(&mut self, name: &str, vertex_source: &str, fragment_source: &str) -> GpuResult<()> {
        self.ensure_live()?;
        if self.programs.contains(name) {
            return Ok(());
        }
        parse_and_validate(vertex_source, ShaderStage::Vertex)?;
        parse_and_validate(fragment_source, ShaderStage::Fragment)?;
        self.programs.insert(name.to_string());
        Ok(())
    }

    fn has_program(&self, name: &str) -> bool {
        self.programs.contains(name)
    }

    fn render_shader(&mut self, program: &str, uniforms: &Uniforms, size: OutputSize) -> GpuResult<TextureId> {
        self.ensure_live()?;
        if !self.programs.contains(program) {
            return Err(GpuError::ProgramNotFound(program.to_string()));
        }
        if self.failing.contains(program) {
            return Err(GpuError::device(format!("simulated failure in '{program}'")));
        }
        let key = FramebufferKey {
            width: size.width,
            height: size.height,
            format: PixelFormat::Rgba8,
        };
        check_complete(key, MAX_DIMENSION)?;
        self.framebuffers.insert(key);

        let pixels = {
            let mut textures = HashMap::new();
            for (name, texture) in uniforms.textures() {
                let Some(id) = texture else { continue };
                let entry = self.textures.get(id).ok_or(GpuError::TextureNotFound(id))?;
                let info = self.textures.info(id).ok_or(GpuError::TextureNotFound(id))?;
                textures.insert(
                    name,
                    SampledImage {
                        width: info.width,
                        height: info.height,
                        format: info.format,
                        pixels: &entry.pixels,
                    },
                );
            }
            let input = KernelInput {
                size,
                uniforms,
                textures,
            };
            match self.kernels.get(program) {
                Some(kernel) => kernel(&input),
                None => vec![0; (size.width * size.height * 4) as usize],
            }
        };

        let (output, _) = self
            .textures
            .insert(None, size.width, size.height, PixelFormat::Rgba8, MemoryTexture { pixels });
        debug!("Rendered '{}' into {:?}", program, output);
        self.render_log.push(RenderCall {
            program: program.to_string(),
            size,
            uniforms: uniforms.clone(),
            output,
        });
        Ok(output)
    }

    fn upload_texture(&mut self, source: &PixelSource<'_>, options: &UploadOptions) -> GpuResult<TextureId> {
        self.ensure_live()?;
        let pixels = source.validated_rows(options.format, options.flip_y)?;
        if let Some(id) = options.name.as_deref().and_then(|name| self.textures.lookup(name)) {
            self.textures
                .replace(id, source.width, source.height, options.format, MemoryTexture { pixels });
            return Ok(id);
        }
        let (id, evicted) = self.textures.insert(
            options.name.clone(),
            source.width,
            source.height,
            options.format,
            MemoryTexture { pixels },
        );
        if let Some((evicted, _)) = evicted {
            debug!("Evicted {:?} from the in-memory pool", evicted);
        }
        Ok(id)
    }

    fn create_texture(&mut self, size: OutputSize, format: PixelFormat) -> GpuResult<TextureId> {
        self.ensure_live()?;
        if size.is_empty() {
            return Err(GpuError::invalid_pixels("texture has zero size"));
        }
        let pixels = vec![0; (size.width * size.height * format.bytes_per_pixel()) as usize];
        let (id, _) = self
            .textures
            .insert(None, size.width, size.height, format, MemoryTexture { pixels });
        Ok(id)
    }

    fn read_pixels(&mut self, texture: TextureId, width: u32, height: u32) -> GpuResult<Vec<u8>> {
        let info = self.textures.info(texture).ok_or(GpuError::TextureNotFound(texture))?;
        let entry = self.textures.get(texture).ok_or(GpuError::TextureNotFound(texture))?;
        if width > info.width || height > info.height {
            return Err(GpuError::readback(format!(
                "region {width}x{height} exceeds texture {}x{}",
                info.width, info.height
            )));
        }
        let bpp = info.format.bytes_per_pixel() as usize;
        let stride = info.width as usize * bpp;
        let row = width as usize * bpp;
        Ok((0..height as usize)
            .flat_map(|y| entry.pixels[y * stride..y * stride + row].iter().copied())
            .collect())
    }

    fn texture_info(&self, texture: TextureId) -> Option<TextureInfo> {
        self.textures.info(texture)
    }

    fn texture_ids(&self) -> Vec<TextureId> {
        self.textures.ids()
    }

    fn release_texture(&mut self, texture: TextureId) -> bool {
        self.textures.remove(texture).is_some()
    }

    fn mark_unused(&mut self, texture: TextureId) {
        self.textures.mark_unused(texture);
    }

    fn collect_garbage(&mut self) -> usize {
        self.textures.collect_garbage().len()
    }

    fn dispose(&mut self) {
        self.textures.drain();
        self.programs.clear();
        self.framebuffers.clear();
        self.disposed = true;
    }
}

fn builtin_kernels() -> Vec<(&'static str, Kernel)> {
    vec![
        ("copy_texture", Box::new(copy_kernel) as Kernel),
        ("solid_color", Box::new(solid_color_kernel)),
        ("brightness_contrast", Box::new(brightness_contrast_kernel)),
        ("hsl", Box::new(hsl_kernel)),
        ("gaussian_blur", Box::new(gaussian_blur_kernel)),
        ("blend", Box::new(blend_kernel)),
        ("flip", Box::new(flip_kernel)),
    ]
}

fn copy_kernel(input: &KernelInput<'_>) -> Vec<u8> {
    input.shade(|x, y| input.sample("u_texture", x, y))
}

fn solid_color_kernel(input: &KernelInput<'_>) -> Vec<u8> {
    let color = input.vec4("u_color");
    input.shade(|_, _| color)
}

fn mask_weight(input: &KernelInput<'_>, x: i64, y: i64) -> f32 {
    if input.float("u_has_mask") > 0.5 {
        input.sample("u_mask", x, y)[0]
    } else {
        1.0
    }
}

fn mix(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

fn brightness_contrast_kernel(input: &KernelInput<'_>) -> Vec<u8> {
    let brightness = input.float("u_brightness");
    let contrast = input.float("u_contrast");
    input.shade(|x, y| {
        let color = input.sample("u_texture", x, y);
        let m = mask_weight(input, x, y);
        let mut out = color;
        for c in 0..3 {
            let adjusted = ((color[c] + brightness - 0.5) * contrast + 0.5).clamp(0.0, 1.0);
            out[c] = mix(color[c], adjusted, m);
        }
        out
    })
}

fn rgb_to_hsl([r, g, b]: [f32; 3]) -> [f32; 3] {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let l = (max + min) * 0.5;
    let d = max - min;
    if d < 1e-5 {
        return [0.0, 0.0, l];
    }
    let s = if l > 0.5 { d / (2.0 - max - min) } else { d / (max + min) };
    let h = if max == r {
        (g - b) / d + if g < b { 6.0 } else { 0.0 }
    } else if max == g {
        (b - r) / d + 2.0
    } else {
        (r - g) / d + 4.0
    };
    [h / 6.0, s, l]
}

fn hue_to_rgb(p: f32, q: f32, t: f32) -> f32 {
    let t = t - t.floor();
    if t < 1.0 / 6.0 {
        p + (q - p) * 6.0 * t
    } else if t < 0.5 {
        q
    } else if t < 2.0 / 3.0 {
        p + (q - p) * (2.0 / 3.0 - t) * 6.0
    } else {
        p
    }
}

fn hsl_to_rgb([h, s, l]: [f32; 3]) -> [f32; 3] {
    if s < 1e-5 {
        return [l, l, l];
    }
    let q = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let p = 2.0 * l - q;
    [
        hue_to_rgb(p, q, h + 1.0 / 3.0),
        hue_to_rgb(p, q, h),
        hue_to_rgb(p, q, h - 1.0 / 3.0),
    ]
}

fn hsl_kernel(input: &KernelInput<'_>) -> Vec<u8> {
    let hue = input.float("u_hue");
    let saturation = input.float("u_saturation");
    let lightness = input.float("u_lightness");
    input.shade(|x, y| {
        let color = input.sample("u_texture", x, y);
        let [h, s, l] = rgb_to_hsl([color[0], color[1], color[2]]);
        let shifted = h + hue / 360.0;
        let hsl = [
            shifted - shifted.floor(),
            (s * (1.0 + saturation)).clamp(0.0, 1.0),
            (l + lightness).clamp(0.0, 1.0),
        ];
        let [r, g, b] = hsl_to_rgb(hsl);
        [r, g, b, color[3]]
    })
}

fn gaussian_blur_kernel(input: &KernelInput<'_>) -> Vec<u8> {
    let radius = input.float("u_radius").max(0.0);
    let taps = radius.ceil() as i64;
    let sigma = (radius / 2.0).max(0.5);
    let direction = input.vec2("u_direction");
    let (dx, dy) = (
        (direction[0] * input.size.width as f32).round() as i64,
        (direction[1] * input.size.height as f32).round() as i64,
    );
    input.shade(|x, y| {
        let mut sum = [0.0f32; 4];
        let mut total = 0.0;
        for i in -taps..=taps {
            let w = (-((i * i) as f32) / (2.0 * sigma * sigma)).exp();
            let texel = input.sample("u_texture", x + dx * i, y + dy * i);
            for c in 0..4 {
                sum[c] += texel[c] * w;
            }
            total += w;
        }
        let original = input.sample("u_original", x, y);
        let m = mask_weight(input, x, y);
        let mut out = [0.0; 4];
        for c in 0..4 {
            out[c] = mix(original[c], sum[c] / total, m);
        }
        out
    })
}

/// Per-channel blend of `s` over `b` for the mode index used by the blend program
pub fn blend_channel(mode: i32, b: f32, s: f32) -> f32 {
    match mode {
        1 => b * s,
        2 => 1.0 - (1.0 - b) * (1.0 - s),
        3 => {
            if b < 0.5 {
                2.0 * b * s
            } else {
                1.0 - 2.0 * (1.0 - b) * (1.0 - s)
            }
        }
        4 => b.min(s),
        5 => b.max(s),
        6 => (b / (1.0 - s).max(1e-5)).min(1.0),
        7 => 1.0 - ((1.0 - b) / s.max(1e-5)).min(1.0),
        8 => (1.0 - 2.0 * s) * b * b + 2.0 * s * b,
        9 => {
            if s < 0.5 {
                2.0 * b * s
            } else {
                1.0 - 2.0 * (1.0 - b) * (1.0 - s)
            }
        }
        10 => (b - s).abs(),
        11 => b + s - 2.0 * b * s,
        _ => s,
    }
}

fn blend_kernel(input: &KernelInput<'_>) -> Vec<u8> {
    let mode = input.int("u_mode");
    let opacity = input.float("u_opacity");
    input.shade(|x, y| {
        let base = input.sample("u_base", x, y);
        let top = input.sample("u_blend", x, y);
        let amount = opacity * top[3] * mask_weight(input, x, y);
        let mut out = [0.0; 4];
        for c in 0..3 {
            out[c] = mix(base[c], blend_channel(mode, base[c], top[c]), amount);
        }
        out[3] = base[3] + amount * (1.0 - base[3]);
        out
    })
}

fn flip_kernel(input: &KernelInput<'_>) -> Vec<u8> {
    let flip = input.vec2("u_flip");
    let (w, h) = (input.size.width as i64, input.size.height as i64);
    input.shade(|x, y| {
        let sx = if flip[0] > 0.5 { w - 1 - x } else { x };
        let sy = if flip[1] > 0.5 { h - 1 - y } else { y };
        input.sample("u_texture", sx, sy)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::shader_library;
    use glam::{Vec2, Vec4};

    fn loaded() -> MemoryGpu {
        let mut gpu = MemoryGpu::new();
        shader_library::load_all_shaders(&mut gpu).unwrap();
        gpu
    }

    #[test]
    fn test_solid_color_kernel_fills_target() {
        let mut gpu = loaded();
        let id = gpu
            .render_shader(
                "solid_color",
                &Uniforms::new().vec4("u_color", Vec4::new(1.0, 0.0, 0.0, 1.0)),
                OutputSize::new(2, 2),
            )
            .unwrap();
        let pixels = gpu.read_pixels(id, 2, 2).unwrap();
        assert_eq!(pixels, [255, 0, 0, 255].repeat(4));
    }

    #[test]
    fn test_render_outputs_are_distinct_textures() {
        let mut gpu = loaded();
        let color = Uniforms::new().vec4("u_color", Vec4::ONE);
        let a = gpu.render_shader("solid_color", &color, OutputSize::new(4, 4)).unwrap();
        let b = gpu.render_shader("solid_color", &color, OutputSize::new(4, 4)).unwrap();
        assert_ne!(a, b);
        assert_eq!(gpu.framebuffer_count(), 1);
    }

    #[test]
    fn test_unknown_program_is_an_error() {
        let mut gpu = loaded();
        let err = gpu
            .render_shader("missing", &Uniforms::new(), OutputSize::new(1, 1))
            .unwrap_err();
        assert!(matches!(err, GpuError::ProgramNotFound(_)));
    }

    #[test]
    fn test_zero_sized_render_is_incomplete() {
        let mut gpu = loaded();
        let err = gpu
            .render_shader("solid_color", &Uniforms::new(), OutputSize::new(0, 4))
            .unwrap_err();
        assert!(matches!(err, GpuError::IncompleteFramebuffer { .. }));
    }

    #[test]
    fn test_missing_texture_samples_transparent() {
        let mut gpu = loaded();
        let id = gpu
            .render_shader("copy_texture", &Uniforms::new().texture("u_texture", None), OutputSize::new(1, 1))
            .unwrap();
        assert_eq!(gpu.read_pixels(id, 1, 1).unwrap(), vec![0, 0, 0, 0]);
    }

    #[test]
    fn test_flip_kernel_mirrors_columns() {
        let mut gpu = loaded();
        let data = [255u8, 0, 0, 255, 0, 0, 255, 255];
        let src = gpu
            .upload_texture(&PixelSource::new(2, 1, &data), &UploadOptions::default())
            .unwrap();
        let out = gpu
            .render_shader(
                "flip",
                &Uniforms::new().texture("u_texture", Some(src)).vec2("u_flip", Vec2::new(1.0, 0.0)),
                OutputSize::new(2, 1),
            )
            .unwrap();
        assert_eq!(gpu.read_pixels(out, 2, 1).unwrap(), vec![0, 0, 255, 255, 255, 0, 0, 255]);
    }

    #[test]
    fn test_failing_program_reports_error() {
        let mut gpu = loaded();
        gpu.fail_program("solid_color");
        assert!(gpu
            .render_shader("solid_color", &Uniforms::new(), OutputSize::new(1, 1))
            .is_err());
        gpu.heal_program("solid_color");
        assert!(gpu
            .render_shader("solid_color", &Uniforms::new(), OutputSize::new(1, 1))
            .is_ok());
    }

    #[test]
    fn test_upload_hit_reuses_handle() {
        let mut gpu = loaded();
        let first = [0u8; 4];
        let second = [9u8; 16];
        let a = gpu
            .upload_texture(&PixelSource::new(1, 1, &first), &UploadOptions::named("img"))
            .unwrap();
        let b = gpu
            .upload_texture(&PixelSource::new(2, 2, &second), &UploadOptions::named("img"))
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(gpu.texture_info(a).unwrap().width, 2);
        assert_eq!(gpu.read_pixels(a, 1, 1).unwrap(), vec![9, 9, 9, 9]);
    }

    #[test]
    fn test_blend_channel_modes() {
        assert_eq!(blend_channel(0, 0.2, 0.8), 0.8);
        assert!((blend_channel(1, 0.5, 0.5) - 0.25).abs() < 1e-6);
        assert!((blend_channel(2, 0.5, 0.5) - 0.75).abs() < 1e-6);
        assert_eq!(blend_channel(4, 0.3, 0.6), 0.3);
        assert!((blend_channel(10, 0.3, 0.8) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_dispose_rejects_further_work() {
        let mut gpu = loaded();
        gpu.dispose();
        assert!(matches!(
            gpu.create_texture(OutputSize::new(1, 1), PixelFormat::Rgba8),
            Err(GpuError::Disposed)
        ));
    }
}
