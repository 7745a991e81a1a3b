//! Offscreen render targets keyed by size and format

use std::collections::HashMap;

use log::debug;

use super::context::validation_scope;
use super::readback::read_texture;
use super::{FramebufferId, OutputSize, PixelFormat};
use crate::error::{GpuError, GpuResult};

/// Identity of a cached render target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FramebufferKey {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

/// Options for `FramebufferManager::create`
#[derive(Debug, Clone)]
pub struct FramebufferOptions {
    /// Logical name that `release` can later drop
    pub name: Option<String>,
    pub format: PixelFormat,
}

impl Default for FramebufferOptions {
    fn default() -> Self {
        Self {
            name: None,
            format: PixelFormat::Rgba8,
        }
    }
}

pub struct Framebuffer {
    pub key: FramebufferKey,
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
}

/// Creates, caches and validates render targets
pub struct FramebufferManager {
    device: wgpu::Device,
    queue: wgpu::Queue,
    framebuffers: HashMap<FramebufferId, Framebuffer>,
    by_key: HashMap<FramebufferKey, FramebufferId>,
    names: HashMap<String, FramebufferId>,
    bound: Option<FramebufferId>,
    next_id: u64,
}

/// Check a requested target against device limits before allocating
pub fn check_complete(key: FramebufferKey, max_dimension: u32) -> GpuResult<()> {
    let reason = if key.width == 0 || key.height == 0 {
        Some("zero-sized attachment".to_string())
    } else if key.width > max_dimension || key.height > max_dimension {
        Some(format!("exceeds the device limit of {max_dimension}"))
    } else {
        None
    };
    match reason {
        Some(reason) => Err(GpuError::IncompleteFramebuffer {
            width: key.width,
            height: key.height,
            format: key.format,
            reason,
        }),
        None => Ok(()),
    }
}

impl FramebufferManager {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self {
            device,
            queue,
            framebuffers: HashMap::new(),
            by_key: HashMap::new(),
            names: HashMap::new(),
            bound: None,
            next_id: 1,
        }
    }

    /// Return the cached target for this size and format, creating it if needed
    pub fn create(&mut self, size: OutputSize, options: &FramebufferOptions) -> GpuResult<FramebufferId> {
        let key = FramebufferKey {
            width: size.width,
            height: size.height,
            format: options.format,
        };
        if let Some(id) = self.by_key.get(&key).copied() {
            if let Some(name) = options.name.as_ref() {
                self.names.insert(name.clone(), id);
            }
            return Ok(id);
        }

        check_complete(key, self.device.limits().max_texture_dimension_2d)?;
        let (texture, scope_error) = validation_scope(&self.device, || {
            self.device.create_texture(&wgpu::TextureDescriptor {
                label: options.name.as_deref().or(Some("pixelgraph_framebuffer")),
                size: wgpu::Extent3d {
                    width: key.width,
                    height: key.height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: key.format.to_wgpu(),
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                    | wgpu::TextureUsages::COPY_SRC
                    | wgpu::TextureUsages::TEXTURE_BINDING,
                view_formats: &[],
            })
        });
        if let Some(reason) = scope_error {
            texture.destroy();
            return Err(GpuError::IncompleteFramebuffer {
                width: key.width,
                height: key.height,
                format: key.format,
                reason,
            });
        }

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let id = FramebufferId(self.next_id);
        self.next_id += 1;
        debug!("Created framebuffer {:?} {}x{} {:?}", id, key.width, key.height, key.format);
        self.framebuffers.insert(id, Framebuffer { key, texture, view });
        self.by_key.insert(key, id);
        if let Some(name) = options.name.as_ref() {
            self.names.insert(name.clone(), id);
        }
        Ok(id)
    }

    /// Make `id` the active target, or return to the default target with `None`
    pub fn bind(&mut self, id: Option<FramebufferId>) {
        self.bound = id.filter(|id| self.framebuffers.contains_key(id));
    }

    pub fn bound(&self) -> Option<&Framebuffer> {
        self.bound.and_then(|id| self.framebuffers.get(&id))
    }

    /// Viewport of the active target
    pub fn viewport(&self) -> Option<OutputSize> {
        self.bound().map(|fb| OutputSize::new(fb.key.width, fb.key.height))
    }

    pub fn get(&self, id: FramebufferId) -> Option<&Framebuffer> {
        self.framebuffers.get(&id)
    }

    pub fn read_pixels(&self, id: FramebufferId) -> GpuResult<Vec<u8>> {
        let fb = self
            .framebuffers
            .get(&id)
            .ok_or_else(|| GpuError::readback(format!("unknown framebuffer {id:?}")))?;
        read_texture(
            &self.device,
            &self.queue,
            &fb.texture,
            fb.key.width,
            fb.key.height,
            fb.key.format.bytes_per_pixel(),
        )
    }

    /// Clear a target to a solid colour
    pub fn clear(&self, id: FramebufferId, rgba: [f64; 4]) -> GpuResult<()> {
        let fb = self
            .framebuffers
            .get(&id)
            .ok_or_else(|| GpuError::device(format!("unknown framebuffer {id:?}")))?;
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("pixelgraph_clear"),
        });
        {
            let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("pixelgraph_clear_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &fb.view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: rgba[0],
                            g: rgba[1],
                            b: rgba[2],
                            a: rgba[3],
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
        }
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    /// Drop the target registered under a logical name
    pub fn release(&mut self, name: &str) -> bool {
        let Some(id) = self.names.remove(name) else {
            return false;
        };
        self.names.retain(|_, other| *other != id);
        if self.bound == Some(id) {
            self.bound = None;
        }
        match self.framebuffers.remove(&id) {
            Some(fb) => {
                self.by_key.remove(&fb.key);
                fb.texture.destroy();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.framebuffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.framebuffers.is_empty()
    }

    pub fn dispose(&mut self) {
        for (_, fb) in self.framebuffers.drain() {
            fb.texture.destroy();
        }
        self.by_key.clear();
        self.names.clear();
        self.bound = None;
    }
}
