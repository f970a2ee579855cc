//! WebGPU queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::command::WebGpuCommandBuffer;
use super::texture::WebGpuTexture;
use super::{downcast, WebGpuContext};
use crate::{CommandBuffer, Queue, Result, RhiError, Texture, TextureDataLayout};

#[derive(Debug)]
pub struct WebGpuQueue {
    ctx: Arc<WebGpuContext>,
    released: AtomicBool,
}

impl WebGpuQueue {
    pub(crate) fn new(ctx: Arc<WebGpuContext>) -> Self {
        Self {
            ctx,
            released: AtomicBool::new(false),
        }
    }

    pub fn raw(&self) -> &wgpu::Queue {
        &self.ctx.queue
    }

    pub(crate) fn context(&self) -> &WebGpuContext {
        &self.ctx
    }

    fn ensure_live(&self) -> Result<()> {
        if self.released.load(Ordering::Acquire) {
            return Err(RhiError::Disposed("queue"));
        }
        Ok(())
    }

    /// Called by the owning device during dispose.
    pub(crate) fn release(&self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            log::debug!("queue released");
        }
    }
}

impl Queue for WebGpuQueue {
    fn submit(&self, command_buffers: Vec<Box<dyn CommandBuffer>>) -> Result<()> {
        self.ensure_live()?;
        let mut raw = Vec::with_capacity(command_buffers.len());
        for buffer in command_buffers {
            let buffer = buffer
                .into_any()
                .downcast::<WebGpuCommandBuffer>()
                .map_err(|_| RhiError::ForeignResource("command buffer"))?;
            self.ctx.check_owner(buffer.device, "command buffer")?;
            raw.push(buffer.into_raw());
        }
        log::trace!("submitting {} command buffers", raw.len());
        self.ctx.queue.submit(raw);
        Ok(())
    }

    fn write_texture(
        &self,
        texture: &dyn Texture,
        mip_level: u32,
        origin: (u32, u32, u32),
        data: &[u8],
        layout: TextureDataLayout,
        size: (u32, u32, u32),
    ) -> Result<()> {
        self.ensure_live()?;
        let texture: &WebGpuTexture = downcast(texture.as_any(), "texture")?;
        self.ctx.check_owner(texture.device, "texture")?;
        let raw = texture.raw().ok_or_else(|| {
            RhiError::Unsupported("write_texture into a surface texture".to_string())
        })?;
        let tight = size.0 * texture.format().bytes_per_pixel();
        let bytes_per_row = layout.bytes_per_row.unwrap_or(tight);
        if bytes_per_row < tight {
            return Err(RhiError::InvalidDescriptor(format!(
                "bytes_per_row {} is less than one row ({} bytes)",
                bytes_per_row, tight
            )));
        }
        let rows_per_image = layout.rows_per_image.unwrap_or(size.1);
        let required = if size.0 == 0 || size.1 == 0 || size.2 == 0 {
            0
        } else {
            u64::from(bytes_per_row) * u64::from(rows_per_image) * u64::from(size.2 - 1)
                + u64::from(bytes_per_row) * u64::from(size.1 - 1)
                + u64::from(tight)
        };
        if layout.offset + required > data.len() as u64 {
            return Err(RhiError::OutOfBounds {
                offset: layout.offset,
                len: required,
                size: data.len() as u64,
            });
        }
        self.ctx.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: raw,
                mip_level,
                origin: wgpu::Origin3d {
                    x: origin.0,
                    y: origin.1,
                    z: origin.2,
                },
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::ImageDataLayout {
                offset: layout.offset,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(rows_per_image),
            },
            wgpu::Extent3d {
                width: size.0,
                height: size.1,
                depth_or_array_layers: size.2,
            },
        );
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
