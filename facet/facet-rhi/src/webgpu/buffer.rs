//! WebGPU buffer.

use std::sync::atomic::{AtomicBool, Ordering};

use super::queue::WebGpuQueue;
use super::{conv, downcast, WebGpuContext};
use crate::validate::{check_write_range, COPY_BUFFER_ALIGNMENT};
use crate::{Buffer, BufferUsage, DeviceId, Queue, ResourceId, Result, RhiError};

pub struct WebGpuBuffer {
    pub(crate) device: DeviceId,
    id: ResourceId,
    raw: wgpu::Buffer,
    size: u64,
    usage: BufferUsage,
    disposed: AtomicBool,
}

impl std::fmt::Debug for WebGpuBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebGpuBuffer")
            .field("id", &self.id)
            .field("size", &self.size)
            .field("usage", &self.usage)
            .finish()
    }
}

impl WebGpuBuffer {
    /// `size` is already rounded to the copy alignment.
    pub(crate) fn new(
        ctx: &WebGpuContext,
        label: Option<&'static str>,
        size: u64,
        usage: BufferUsage,
    ) -> Self {
        let raw = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label,
            size,
            usage: conv::buffer_usage_to_wgpu(usage),
            mapped_at_creation: false,
        });
        let id = ctx.next_resource_id();
        log::debug!("buffer {} created: {:?}, {} bytes, {:?}", id, label, size, usage);
        Self {
            device: ctx.id,
            id,
            raw,
            size,
            usage,
            disposed: AtomicBool::new(false),
        }
    }

    pub fn raw(&self) -> &wgpu::Buffer {
        &self.raw
    }

    pub(crate) fn ensure_live(&self) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(RhiError::Disposed("buffer"));
        }
        Ok(())
    }
}

impl Buffer for WebGpuBuffer {
    fn id(&self) -> ResourceId {
        self.id
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn usage(&self) -> BufferUsage {
        self.usage
    }

    /// Queued write. Offset and length must both be word aligned.
    fn update_data(&self, queue: &dyn Queue, offset: u64, data: &[u8]) -> Result<()> {
        self.ensure_live()?;
        let queue: &WebGpuQueue = downcast(queue.as_any(), "queue")?;
        queue.context().check_owner(self.device, "buffer")?;
        if offset % COPY_BUFFER_ALIGNMENT != 0 {
            return Err(RhiError::Misaligned {
                what: "write offset",
                value: offset,
                alignment: COPY_BUFFER_ALIGNMENT,
            });
        }
        if data.len() as u64 % COPY_BUFFER_ALIGNMENT != 0 {
            return Err(RhiError::Misaligned {
                what: "write length",
                value: data.len() as u64,
                alignment: COPY_BUFFER_ALIGNMENT,
            });
        }
        check_write_range(offset, data.len(), self.size)?;
        if self.usage.intersects(BufferUsage::MAP_READ | BufferUsage::MAP_WRITE)
            && !self.usage.contains(BufferUsage::COPY_DST)
        {
            return Err(RhiError::Unsupported(
                "update_data on a mappable buffer without COPY_DST".to_string(),
            ));
        }
        if data.is_empty() {
            return Ok(());
        }
        queue.raw().write_buffer(&self.raw, offset, data);
        Ok(())
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.raw.destroy();
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl Drop for WebGpuBuffer {
    fn drop(&mut self) {
        self.dispose();
    }
}
