//! wgpu texture allocation on top of the shared pool

use log::{debug, info};

use super::pool::TexturePool;
use super::readback::read_texture;
use super::{OutputSize, PixelFormat, PixelSource, TextureId, TextureInfo, UploadOptions};
use crate::error::{GpuError, GpuResult};

/// A texture and its default view
#[derive(Debug)]
pub struct GpuTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
}

impl GpuTexture {
    fn destroy(self) {
        self.texture.destroy();
    }
}

/// Owns every sampled texture: named uploads, anonymous targets and render results
pub struct TextureManager {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pool: TexturePool<GpuTexture>,
}

impl TextureManager {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue, pool_limit: usize) -> Self {
        Self {
            device,
            queue,
            pool: TexturePool::new(pool_limit),
        }
    }

    fn allocate(&self, width: u32, height: u32, format: PixelFormat) -> GpuResult<GpuTexture> {
        let max = self.device.limits().max_texture_dimension_2d;
        if width == 0 || height == 0 || width > max || height > max {
            return Err(GpuError::invalid_pixels(format!(
                "texture size {width}x{height} outside 1..={max}"
            )));
        }
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("pixelgraph_texture"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: format.to_wgpu(),
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Ok(GpuTexture { texture, view })
    }

    fn write(&self, texture: &wgpu::Texture, rows: &[u8], width: u32, height: u32, format: PixelFormat) {
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            rows,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * format.bytes_per_pixel()),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
    }

    /// Upload client pixels. A pool hit on `options.name` re-uploads into the
    /// existing handle; a miss allocates, evicting when the pool is full.
    pub fn upload(&mut self, source: &PixelSource<'_>, options: &UploadOptions) -> GpuResult<TextureId> {
        let rows = source.validated_rows(options.format, options.flip_y)?;
        let (width, height, format) = (source.width, source.height, options.format);

        if let Some(id) = options.name.as_deref().and_then(|name| self.pool.lookup(name)) {
            let reusable = self
                .pool
                .info(id)
                .is_some_and(|i| i.width == width && i.height == height && i.format == format);
            if reusable {
                if let Some(existing) = self.pool.get(id) {
                    self.write(&existing.texture, &rows, width, height, format);
                }
            } else {
                let replacement = self.allocate(width, height, format)?;
                self.write(&replacement.texture, &rows, width, height, format);
                if let Some(old) = self.pool.replace(id, width, height, format, replacement) {
                    old.destroy();
                }
            }
            debug!("Re-uploaded pooled texture {:?}", id);
            return Ok(id);
        }

        let texture = self.allocate(width, height, format)?;
        self.write(&texture.texture, &rows, width, height, format);
        let (id, evicted) = self.pool.insert(options.name.clone(), width, height, format, texture);
        if let Some((evicted_id, old)) = evicted {
            info!("Texture pool full, evicted {:?}", evicted_id);
            old.destroy();
        }
        Ok(id)
    }

    /// Allocate an anonymous texture, tracked for garbage collection
    pub fn create_empty(&mut self, size: OutputSize, format: PixelFormat) -> GpuResult<TextureId> {
        let texture = self.allocate(size.width, size.height, format)?;
        let (id, _) = self.pool.insert(None, size.width, size.height, format, texture);
        Ok(id)
    }

    pub fn get(&self, id: TextureId) -> Option<&GpuTexture> {
        self.pool.get(id)
    }

    pub fn info(&self, id: TextureId) -> Option<TextureInfo> {
        self.pool.info(id)
    }

    pub fn ids(&self) -> Vec<TextureId> {
        self.pool.ids()
    }

    pub fn read_pixels(&self, id: TextureId, width: u32, height: u32) -> GpuResult<Vec<u8>> {
        let texture = self.pool.get(id).ok_or(GpuError::TextureNotFound(id))?;
        let format = self.pool.info(id).map(|i| i.format).unwrap_or(PixelFormat::Rgba8);
        read_texture(
            &self.device,
            &self.queue,
            &texture.texture,
            width,
            height,
            format.bytes_per_pixel(),
        )
    }

    pub fn release(&mut self, id: TextureId) -> bool {
        match self.pool.remove(id) {
            Some(texture) => {
                texture.destroy();
                true
            }
            None => false,
        }
    }

    pub fn mark_unused(&mut self, id: TextureId) {
        self.pool.mark_unused(id);
    }

    pub fn collect_garbage(&mut self) -> usize {
        let freed = self.pool.collect_garbage();
        let count = freed.len();
        for (_, texture) in freed {
            texture.destroy();
        }
        if count > 0 {
            debug!("Collected {} unused textures", count);
        }
        count
    }

    pub fn dispose(&mut self) {
        for texture in self.pool.drain() {
            texture.destroy();
        }
    }
}
