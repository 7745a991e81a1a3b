//! wgpu-backed GPU context
//!
//! Owns the device, the three resource managers and the static full-screen
//! quad. `render_shader` draws into a cached render target and copies the
//! result into a texture of its own, so results handed to the engine never
//! alias a target that the next pass will overwrite.

use bytemuck::{Pod, Zeroable};
use log::{debug, info, trace};
use wgpu::util::DeviceExt;

use super::config::GpuConfig;
use super::framebuffer::{FramebufferManager, FramebufferOptions};
use super::shader::{BindingKind, ShaderManager};
use super::texture::TextureManager;
use super::{
    GpuContext, OutputSize, PixelFormat, PixelSource, TextureId, TextureInfo, UploadOptions, Uniforms,
};
use crate::error::{GpuError, GpuResult};

/// Run `f` inside a validation error scope and report what the device rejected
pub(crate) fn validation_scope<R>(device: &wgpu::Device, f: impl FnOnce() -> R) -> (R, Option<String>) {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let result = f();
    let error = pollster::block_on(device.pop_error_scope()).map(|e| e.to_string());
    (result, error)
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct QuadVertex {
    position: [f32; 2],
    uv: [f32; 2],
}

/// Clip-space quad; uv (0,0) is the top-left texel
const QUAD_VERTICES: [QuadVertex; 4] = [
    QuadVertex { position: [-1.0, -1.0], uv: [0.0, 1.0] },
    QuadVertex { position: [1.0, -1.0], uv: [1.0, 1.0] },
    QuadVertex { position: [-1.0, 1.0], uv: [0.0, 0.0] },
    QuadVertex { position: [1.0, 1.0], uv: [1.0, 0.0] },
];

const QUAD_INDICES: [u16; 6] = [0, 1, 2, 1, 3, 2];

/// Real GPU context
pub struct WgpuContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    shaders: ShaderManager,
    textures: TextureManager,
    framebuffers: FramebufferManager,
    quad_vertices: wgpu::Buffer,
    quad_indices: wgpu::Buffer,
    sampler: wgpu::Sampler,
    fallback: wgpu::TextureView,
    disposed: bool,
}

impl WgpuContext {
    /// Create a context on a headless adapter
    pub fn new_headless(config: &GpuConfig) -> GpuResult<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: config.power_preference.to_wgpu(),
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|e| GpuError::device(format!("no suitable adapter: {e}")))?;
        info!("Using adapter {}", adapter.get_info().name);

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some(&config.label),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            experimental_features: wgpu::ExperimentalFeatures::default(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::Off,
        }))
        .map_err(|e| GpuError::device(format!("request_device failed: {e}")))?;

        Ok(Self::from_device(device, queue, config))
    }

    /// Wrap a device the host application already owns
    pub fn from_device(device: wgpu::Device, queue: wgpu::Queue, config: &GpuConfig) -> Self {
        let quad_vertices = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("pixelgraph_quad_vertices"),
            contents: bytemuck::cast_slice(&QUAD_VERTICES),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let quad_indices = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("pixelgraph_quad_indices"),
            contents: bytemuck::cast_slice(&QUAD_INDICES),
            usage: wgpu::BufferUsages::INDEX,
        });
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("pixelgraph_linear_clamp"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        let fallback = device
            .create_texture_with_data(
                &queue,
                &wgpu::TextureDescriptor {
                    label: Some("pixelgraph_transparent"),
                    size: wgpu::Extent3d {
                        width: 1,
                        height: 1,
                        depth_or_array_layers: 1,
                    },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: wgpu::TextureFormat::Rgba8Unorm,
                    usage: wgpu::TextureUsages::TEXTURE_BINDING,
                    view_formats: &[],
                },
                wgpu::util::TextureDataOrder::LayerMajor,
                &[0, 0, 0, 0],
            )
            .create_view(&wgpu::TextureViewDescriptor::default());

        Self {
            shaders: ShaderManager::new(device.clone()),
            textures: TextureManager::new(device.clone(), queue.clone(), config.texture_pool_limit),
            framebuffers: FramebufferManager::new(device.clone(), queue.clone()),
            device,
            queue,
            quad_vertices,
            quad_indices,
            sampler,
            fallback,
            disposed: false,
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn shaders(&self) -> &ShaderManager {
        &self.shaders
    }

    pub fn textures(&self) -> &TextureManager {
        &self.textures
    }

    pub fn framebuffers(&mut self) -> &mut FramebufferManager {
        &mut self.framebuffers
    }

    /// View of a result texture, for hosts that draw previews themselves
    pub fn texture_view(&self, id: TextureId) -> Option<&wgpu::TextureView> {
        self.textures.get(id).map(|t| &t.view)
    }

    fn ensure_live(&self) -> GpuResult<()> {
        if self.disposed {
            Err(GpuError::Disposed)
        } else {
            Ok(())
        }
    }
}

impl GpuContext for WgpuContext {
    fn create_program(&mut self, name: &str, vertex_source: &str, fragment_source: &str) -> GpuResult<()> {
        self.ensure_live()?;
        self.shaders.create_program(name, vertex_source, fragment_source)
    }

    fn has_program(&self, name: &str) -> bool {
        self.shaders.program(name).is_some()
    }

    fn render_shader(&mut self, program: &str, uniforms: &Uniforms, size: OutputSize) -> GpuResult<TextureId> {
        self.ensure_live()?;
        let target = self.framebuffers.create(
            size,
            &FramebufferOptions {
                name: Some(format!("render_{}x{}", size.width, size.height)),
                format: PixelFormat::Rgba8,
            },
        )?;
        self.framebuffers.bind(Some(target));

        let result = self.draw_into_bound(program, uniforms, size);
        self.framebuffers.bind(None);
        result
    }

    fn upload_texture(&mut self, source: &PixelSource<'_>, options: &UploadOptions) -> GpuResult<TextureId> {
        self.ensure_live()?;
        self.textures.upload(source, options)
    }

    fn create_texture(&mut self, size: OutputSize, format: PixelFormat) -> GpuResult<TextureId> {
        self.ensure_live()?;
        self.textures.create_empty(size, format)
    }

    fn read_pixels(&mut self, texture: TextureId, width: u32, height: u32) -> GpuResult<Vec<u8>> {
        self.ensure_live()?;
        self.textures.read_pixels(texture, width, height)
    }

    fn texture_info(&self, texture: TextureId) -> Option<TextureInfo> {
        self.textures.info(texture)
    }

    fn texture_ids(&self) -> Vec<TextureId> {
        self.textures.ids()
    }

    fn release_texture(&mut self, texture: TextureId) -> bool {
        self.textures.release(texture)
    }

    fn mark_unused(&mut self, texture: TextureId) {
        self.textures.mark_unused(texture);
    }

    fn collect_garbage(&mut self) -> usize {
        self.textures.collect_garbage()
    }

    fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.shaders.dispose();
        self.textures.dispose();
        self.framebuffers.dispose();
        self.quad_vertices.destroy();
        self.quad_indices.destroy();
        self.disposed = true;
        info!("GPU context disposed");
    }
}

impl WgpuContext {
    fn draw_into_bound(&mut self, program_name: &str, uniforms: &Uniforms, size: OutputSize) -> GpuResult<TextureId> {
        let program = self
            .shaders
            .program(program_name)
            .ok_or_else(|| GpuError::ProgramNotFound(program_name.to_string()))?;
        let target = self
            .framebuffers
            .bound()
            .ok_or_else(|| GpuError::device("no framebuffer bound"))?;

        let uniform_bytes = program.bindings.encode_uniforms(uniforms)?;
        let uniform_buffer = (!uniform_bytes.is_empty()).then(|| {
            self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("pixelgraph_uniforms"),
                contents: &uniform_bytes,
                usage: wgpu::BufferUsages::UNIFORM,
            })
        });

        let mut entries = Vec::with_capacity(program.bindings.resources.len());
        for (unit, resource) in program.bindings.resources.iter().enumerate() {
            let binding = match &resource.kind {
                BindingKind::Uniform { .. } => match uniform_buffer.as_ref() {
                    Some(buffer) => buffer.as_entire_binding(),
                    None => continue,
                },
                BindingKind::Sampler => wgpu::BindingResource::Sampler(&self.sampler),
                BindingKind::Texture => {
                    let bound = match uniforms.get(&resource.name) {
                        Some(super::UniformValue::Texture(Some(id))) => {
                            let texture = self.textures.get(*id).ok_or(GpuError::TextureNotFound(*id))?;
                            trace!("Texture unit {} <- {:?} ({})", unit, id, resource.name);
                            &texture.view
                        }
                        _ => &self.fallback,
                    };
                    wgpu::BindingResource::TextureView(bound)
                }
            };
            entries.push(wgpu::BindGroupEntry {
                binding: resource.binding,
                resource: binding,
            });
        }
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(program_name),
            layout: &program.bind_group_layout,
            entries: &entries,
        });

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("pixelgraph_render"),
        });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(program_name),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_viewport(0.0, 0.0, size.width as f32, size.height as f32, 0.0, 1.0);
            pass.set_pipeline(&program.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.set_vertex_buffer(0, self.quad_vertices.slice(..));
            pass.set_index_buffer(self.quad_indices.slice(..), wgpu::IndexFormat::Uint16);
            pass.draw_indexed(0..QUAD_INDICES.len() as u32, 0, 0..1);
        }

        let target_texture = target.texture.clone();
        let output = self.textures.create_empty(size, PixelFormat::Rgba8)?;
        let output_texture = self
            .textures
            .get(output)
            .ok_or(GpuError::TextureNotFound(output))?;
        encoder.copy_texture_to_texture(
            target_texture.as_image_copy(),
            output_texture.texture.as_image_copy(),
            wgpu::Extent3d {
                width: size.width,
                height: size.height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));
        debug!("Rendered '{}' at {}x{} into {:?}", program_name, size.width, size.height, output);
        Ok(output)
    }
}
