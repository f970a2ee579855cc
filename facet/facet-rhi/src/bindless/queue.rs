//! Bindless command queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::command::BindlessCommandBuffer;
use super::native::NativeCommandQueue;
use super::texture::BindlessTexture;
use super::{downcast, DeviceContext};
use crate::{CommandBuffer, Queue, Result, RhiError, Texture, TextureDataLayout};

pub struct BindlessQueue {
    ctx: Arc<DeviceContext>,
    native: Box<dyn NativeCommandQueue>,
    released: AtomicBool,
}

impl std::fmt::Debug for BindlessQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindlessQueue")
            .field("released", &self.released.load(Ordering::Relaxed))
            .finish()
    }
}

impl BindlessQueue {
    pub(crate) fn new(ctx: Arc<DeviceContext>, native: Box<dyn NativeCommandQueue>) -> Self {
        native.add_residency_set(ctx.residency.native());
        Self {
            ctx,
            native,
            released: AtomicBool::new(false),
        }
    }

    pub fn native(&self) -> &dyn NativeCommandQueue {
        self.native.as_ref()
    }

    pub fn wait_idle(&self) -> Result<()> {
        self.ensure_live()?;
        self.native.wait_until_idle()
    }

    fn ensure_live(&self) -> Result<()> {
        if self.released.load(Ordering::Acquire) {
            return Err(RhiError::Disposed("queue"));
        }
        Ok(())
    }

    /// Called by the owning device during dispose.
    pub(crate) fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        self.native.release();
    }
}

impl Queue for BindlessQueue {
    fn submit(&self, command_buffers: Vec<Box<dyn CommandBuffer>>) -> Result<()> {
        self.ensure_live()?;
        let mut native = Vec::with_capacity(command_buffers.len());
        for buffer in command_buffers {
            let buffer = buffer
                .into_any()
                .downcast::<BindlessCommandBuffer>()
                .map_err(|_| RhiError::ForeignResource("command buffer"))?;
            self.ctx.check_owner(buffer.device, "command buffer")?;
            native.push(buffer.into_native());
        }
        self.ctx.residency.commit();
        log::trace!("submitting {} command buffers", native.len());
        self.native.commit(native)
    }

    /// Textures live in shared storage, so the upload is a direct CPU copy that completes before
    /// this returns.
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
        let texture: &BindlessTexture = downcast(texture.as_any(), "texture")?;
        self.ctx.check_owner(texture.device_context().id, "texture")?;
        let tight = size
            .0
            .checked_mul(texture.format().bytes_per_pixel())
            .ok_or_else(|| {
                RhiError::InvalidDescriptor(format!("copy width {} overflows a row", size.0))
            })?;
        let bytes_per_row = layout.bytes_per_row.unwrap_or(tight);
        if bytes_per_row < tight {
            return Err(RhiError::InvalidDescriptor(format!(
                "bytes_per_row {} is less than one row ({} bytes)",
                bytes_per_row, tight
            )));
        }
        let rows_per_image = layout.rows_per_image.unwrap_or(size.1);
        if rows_per_image != size.1 {
            return Err(RhiError::Unsupported(
                "rows_per_image other than the copy height".to_string(),
            ));
        }
        let data = data.get(layout.offset as usize..).ok_or(RhiError::OutOfBounds {
            offset: layout.offset,
            len: 0,
            size: data.len() as u64,
        })?;
        self.ctx.native.replace_texture_region(
            &texture.allocation(),
            mip_level,
            origin,
            size,
            bytes_per_row,
            data,
        )
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
