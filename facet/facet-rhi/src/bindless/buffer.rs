//! Shared-storage buffers. Uniform buffers are frame-multiplexed: one allocation per frame in
//! flight. A write lands in the current frame's slot and is staged for the others, which receive
//! it when their frame next opens.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::native::Allocation;
use super::DeviceContext;
use crate::validate::check_write_range;
use crate::{Buffer, BufferUsage, Queue, ResourceId, Result, RhiError, MAX_FRAMES_IN_FLIGHT};

pub struct BindlessBuffer {
    ctx: Arc<DeviceContext>,
    id: ResourceId,
    label: Option<&'static str>,
    size: u64,
    usage: BufferUsage,
    slots: Vec<Allocation>,
    disposed: AtomicBool,
}

impl std::fmt::Debug for BindlessBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindlessBuffer")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("size", &self.size)
            .field("slots", &self.slots.len())
            .finish()
    }
}

impl BindlessBuffer {
    pub(crate) fn new(
        ctx: Arc<DeviceContext>,
        label: Option<&'static str>,
        size: u64,
        usage: BufferUsage,
    ) -> Result<Self> {
        let slot_count = if usage.contains(BufferUsage::UNIFORM) {
            MAX_FRAMES_IN_FLIGHT
        } else {
            1
        };
        let mut slots = Vec::with_capacity(slot_count);
        for _ in 0..slot_count {
            match ctx.native.new_buffer(size, label) {
                Ok(allocation) => {
                    ctx.residency.add(&allocation);
                    slots.push(allocation);
                }
                Err(e) => {
                    for allocation in &slots {
                        ctx.residency.remove(allocation);
                        ctx.native.release_allocation(allocation);
                    }
                    return Err(e);
                }
            }
        }
        let id = ctx.next_resource_id();
        log::debug!(
            "buffer {} ({:?}) created: {} bytes x{} slots",
            id,
            label,
            size,
            slot_count
        );
        Ok(Self {
            ctx,
            id,
            label,
            size,
            usage,
            slots,
            disposed: AtomicBool::new(false),
        })
    }

    pub(crate) fn device_context(&self) -> &Arc<DeviceContext> {
        &self.ctx
    }

    /// Allocation backing the frame currently being recorded.
    pub fn allocation(&self) -> Allocation {
        let index = self.ctx.frame.frame_index() % self.slots.len();
        self.slots[index]
    }

    /// Every slot, in frame-index order.
    pub fn allocations(&self) -> &[Allocation] {
        &self.slots
    }

    fn ensure_live(&self) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(RhiError::Disposed("buffer"));
        }
        Ok(())
    }
}

impl Buffer for BindlessBuffer {
    fn id(&self) -> ResourceId {
        self.id
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn usage(&self) -> BufferUsage {
        self.usage
    }

    fn slot_count(&self) -> usize {
        self.slots.len()
    }

    fn update_data(&self, _queue: &dyn Queue, offset: u64, data: &[u8]) -> Result<()> {
        self.ensure_live()?;
        self.ctx.ensure_live()?;
        check_write_range(offset, data.len(), self.size)?;
        if self.slots.len() == 1 {
            return self.ctx.native.write_contents(&self.slots[0], offset, data);
        }
        // Opening the frame waits until the GPU is done with the current slot.
        let current = self.ctx.begin_frame()?;
        self.ctx
            .native
            .write_contents(&self.slots[current], offset, data)?;
        let data: Arc<[u8]> = Arc::from(data);
        for (slot, allocation) in self.slots.iter().enumerate() {
            if slot != current {
                self.ctx.stage_write(slot, *allocation, offset, data.clone());
            }
        }
        Ok(())
    }

    fn gpu_address(&self) -> Option<u64> {
        if self.disposed.load(Ordering::Acquire) {
            return None;
        }
        Some(self.allocation().gpu_address)
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.ctx.is_disposed() {
            log::debug!("buffer {} dropped after its device", self.id);
            return;
        }
        self.ctx.discard_staged(&self.slots);
        for allocation in &self.slots {
            self.ctx.residency.remove(allocation);
            self.ctx.native.release_allocation(allocation);
        }
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl Drop for BindlessBuffer {
    fn drop(&mut self) {
        self.dispose();
    }
}
