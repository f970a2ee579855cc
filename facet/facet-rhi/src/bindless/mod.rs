//! Metal-style bindless backend.
//!
//! Resources are addressed directly: buffers by GPU virtual address, textures and samplers by
//! resource id. Bind groups are flattened into per-stage argument tables, every allocation is
//! tracked in a residency set, and the CPU runs at most [`MAX_FRAMES_IN_FLIGHT`] frames ahead of
//! the GPU. The native driver sits behind [`native::NativeDevice`]; [`software`] is the CPU driver.

pub mod binding;
pub mod buffer;
pub mod command;
pub mod conv;
pub mod layout;
pub mod native;
pub mod pacing;
pub mod queue;
pub mod residency;
pub mod shader;
pub mod software;
pub mod surface;
pub mod texture;

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use self::binding::{BindlessBindGroup, BindlessBindGroupLayout};
use self::buffer::BindlessBuffer;
use self::command::BindlessCommandEncoder;
use self::native::{Allocation, NativeCompiler, NativeDevice};
use self::pacing::FramePacer;
use self::queue::BindlessQueue;
use self::residency::ResidencyTracker;
use self::shader::{BindlessRenderPipeline, BindlessShaderModule};
use self::software::{SoftwareConfig, SoftwareDevice};
use self::surface::BindlessSurface;
use self::texture::{BindlessSampler, BindlessTexture};
use crate::validate::{buffer_allocation_size, COPY_BUFFER_ALIGNMENT};
use crate::{
    AdapterInfo, Backend, BindGroup, BindGroupDescriptor, BindGroupLayout,
    BindGroupLayoutDescriptor, Buffer, BufferDescriptor, BufferInitDescriptor, CommandEncoder,
    Device, DeviceDescriptor, DeviceId, FrameCounter, Limits, Queue, RenderPipeline,
    RenderPipelineDescriptor, ResourceId, Result, RhiError, Sampler, SamplerDescriptor,
    ShaderLanguage, ShaderModule, ShaderModuleDescriptor, Surface, Texture, TextureDescriptor,
    MAX_FRAMES_IN_FLIGHT,
};

/// State shared by a bindless device and every resource it creates.
#[derive(Debug)]
pub(crate) struct DeviceContext {
    pub id: DeviceId,
    pub native: Arc<dyn NativeDevice>,
    pub residency: ResidencyTracker,
    pub frame: FrameCounter,
    pub pacer: Arc<FramePacer>,
    /// Writes to multiplexed buffers waiting for their slot's frame to open, by slot index.
    staged: Mutex<Vec<Vec<StagedWrite>>>,
    next_resource_id: AtomicU64,
    disposed: AtomicBool,
}

#[derive(Debug)]
struct StagedWrite {
    allocation: Allocation,
    offset: u64,
    data: Arc<[u8]>,
}

impl DeviceContext {
    pub fn next_resource_id(&self) -> ResourceId {
        self.next_resource_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    pub fn ensure_live(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(RhiError::Disposed("device"));
        }
        Ok(())
    }

    /// Open the current frame and apply the writes staged for its slot. The pacer has waited for
    /// the GPU to finish with the slot by the time they land.
    pub fn begin_frame(&self) -> Result<usize> {
        let index = self.pacer.begin_frame();
        let pending = std::mem::take(&mut self.staged.lock()[index]);
        if !pending.is_empty() {
            log::trace!("applying {} staged writes to slot {}", pending.len(), index);
        }
        for write in pending {
            self.native
                .write_contents(&write.allocation, write.offset, &write.data)?;
        }
        Ok(index)
    }

    /// Queue a write to `allocation` until the frame using `slot` next opens.
    pub fn stage_write(&self, slot: usize, allocation: Allocation, offset: u64, data: Arc<[u8]>) {
        self.staged.lock()[slot].push(StagedWrite {
            allocation,
            offset,
            data,
        });
    }

    /// Drop staged writes to allocations that are being released.
    pub fn discard_staged(&self, allocations: &[Allocation]) {
        for slot in self.staged.lock().iter_mut() {
            slot.retain(|write| !allocations.contains(&write.allocation));
        }
    }

    pub fn check_owner(&self, owner: DeviceId, what: &'static str) -> Result<()> {
        if owner != self.id {
            return Err(RhiError::ForeignResource(what));
        }
        Ok(())
    }
}

/// Downcast a trait object to this backend's concrete type.
pub(crate) fn downcast<'a, T: 'static>(any: &'a dyn Any, what: &'static str) -> Result<&'a T> {
    any.downcast_ref::<T>()
        .ok_or(RhiError::ForeignResource(what))
}

/// Constructor registered as "software" in [`crate::DeviceRegistry`].
pub fn create_software_device(desc: &DeviceDescriptor) -> Result<Arc<dyn Device>> {
    Ok(Arc::new(BindlessDevice::new_software(
        desc,
        SoftwareConfig::default(),
    )?))
}

pub struct BindlessDevice {
    ctx: Arc<DeviceContext>,
    compiler: Box<dyn NativeCompiler>,
    queue: Arc<BindlessQueue>,
    pacer: Arc<FramePacer>,
    surface: Option<Arc<BindlessSurface>>,
    validation: bool,
}

impl std::fmt::Debug for BindlessDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindlessDevice")
            .field("id", &self.ctx.id)
            .field("native", &self.ctx.native)
            .field("frame", &self.ctx.frame.get())
            .finish()
    }
}

impl BindlessDevice {
    /// Bring up a device on `native`.
    pub fn new(native: Arc<dyn NativeDevice>, desc: &DeviceDescriptor) -> Result<Self> {
        let residency = ResidencyTracker::new(native.new_residency_set(desc.label)?);
        let compiler = native.new_compiler()?;
        let frame = FrameCounter::new();
        let pacer = Arc::new(FramePacer::new(native.as_ref(), frame.clone())?);
        let native_queue = native.new_command_queue()?;
        let ctx = Arc::new(DeviceContext {
            id: DeviceId::next(),
            native,
            residency,
            frame,
            pacer: pacer.clone(),
            staged: Mutex::new((0..MAX_FRAMES_IN_FLIGHT).map(|_| Vec::new()).collect()),
            next_resource_id: AtomicU64::new(1),
            disposed: AtomicBool::new(false),
        });
        let queue = Arc::new(BindlessQueue::new(ctx.clone(), native_queue));
        let surface = desc
            .surface
            .map(|target| BindlessSurface::new(ctx.clone(), queue.clone(), pacer.clone(), target))
            .transpose()?
            .map(Arc::new);
        log::info!(
            "bindless device created on '{}' (validation: {})",
            ctx.native.name(),
            desc.validation
        );
        Ok(Self {
            ctx,
            compiler,
            queue,
            pacer,
            surface,
            validation: desc.validation,
        })
    }

    /// Device on the software driver.
    pub fn new_software(desc: &DeviceDescriptor, config: SoftwareConfig) -> Result<Self> {
        Self::new(Arc::new(SoftwareDevice::new(config)?), desc)
    }

    pub fn native(&self) -> &Arc<dyn NativeDevice> {
        &self.ctx.native
    }

    /// The software driver, when this device runs on it.
    pub fn software(&self) -> Option<&SoftwareDevice> {
        self.ctx.native.as_any().downcast_ref::<SoftwareDevice>()
    }

    pub fn frame(&self) -> &FrameCounter {
        &self.ctx.frame
    }

    pub fn residency(&self) -> &ResidencyTracker {
        &self.ctx.residency
    }

    pub fn bindless_queue(&self) -> &Arc<BindlessQueue> {
        &self.queue
    }

    pub fn bindless_surface(&self) -> Option<&Arc<BindlessSurface>> {
        self.surface.as_ref()
    }

    fn new_buffer(&self, label: Option<&'static str>, size: u64, usage: crate::BufferUsage) -> Result<BindlessBuffer> {
        self.ctx.ensure_live()?;
        let size = buffer_allocation_size(size, COPY_BUFFER_ALIGNMENT)?;
        BindlessBuffer::new(self.ctx.clone(), label, size, usage)
    }
}

impl Device for BindlessDevice {
    fn backend(&self) -> Backend {
        Backend::Bindless
    }

    fn adapter_info(&self) -> AdapterInfo {
        AdapterInfo {
            name: self.ctx.native.name(),
            backend: Backend::Bindless,
            driver: if self.software().is_some() {
                "software".to_string()
            } else {
                "Metal".to_string()
            },
        }
    }

    fn shader_language(&self) -> ShaderLanguage {
        ShaderLanguage::Msl
    }

    fn limits(&self) -> Limits {
        Limits {
            copy_buffer_alignment: COPY_BUFFER_ALIGNMENT,
            max_bind_groups: layout::MAX_BIND_GROUPS,
            max_vertex_buffers: layout::VERTEX_BUFFER_SLOT_COUNT,
            frames_in_flight: MAX_FRAMES_IN_FLIGHT,
        }
    }

    fn create_buffer(&self, desc: &BufferDescriptor) -> Result<Box<dyn Buffer>> {
        Ok(Box::new(self.new_buffer(desc.label, desc.size, desc.usage)?))
    }

    fn create_buffer_init(&self, desc: &BufferInitDescriptor<'_>) -> Result<Box<dyn Buffer>> {
        let buffer = self.new_buffer(desc.label, desc.contents.len() as u64, desc.usage)?;
        buffer.update_data(self.queue.as_ref(), 0, desc.contents)?;
        Ok(Box::new(buffer))
    }

    fn create_texture(&self, desc: &TextureDescriptor) -> Result<Box<dyn Texture>> {
        self.ctx.ensure_live()?;
        Ok(Box::new(BindlessTexture::new(self.ctx.clone(), desc)?))
    }

    fn create_sampler(&self, desc: &SamplerDescriptor) -> Result<Box<dyn Sampler>> {
        self.ctx.ensure_live()?;
        Ok(Box::new(BindlessSampler::new(self.ctx.clone(), desc)?))
    }

    fn create_shader_module(&self, desc: &ShaderModuleDescriptor) -> Result<Box<dyn ShaderModule>> {
        self.ctx.ensure_live()?;
        Ok(Box::new(BindlessShaderModule::new(
            &self.ctx,
            self.compiler.as_ref(),
            desc,
        )?))
    }

    fn create_bind_group_layout(
        &self,
        desc: &BindGroupLayoutDescriptor,
    ) -> Result<Box<dyn BindGroupLayout>> {
        self.ctx.ensure_live()?;
        Ok(Box::new(BindlessBindGroupLayout::new(&self.ctx, desc)?))
    }

    fn create_bind_group(&self, desc: &BindGroupDescriptor<'_>) -> Result<Box<dyn BindGroup>> {
        self.ctx.ensure_live()?;
        Ok(Box::new(BindlessBindGroup::new(&self.ctx, desc)?))
    }

    fn create_render_pipeline(
        &self,
        desc: &RenderPipelineDescriptor<'_>,
    ) -> Result<Box<dyn RenderPipeline>> {
        self.ctx.ensure_live()?;
        Ok(Box::new(BindlessRenderPipeline::new(
            &self.ctx,
            self.compiler.as_ref(),
            desc,
        )?))
    }

    fn create_command_encoder(&self) -> Result<Box<dyn CommandEncoder>> {
        self.ctx.ensure_live()?;
        let allocator_index = self.ctx.begin_frame()?;
        Ok(Box::new(BindlessCommandEncoder::new(
            self.ctx.clone(),
            allocator_index,
        )))
    }

    fn queue(&self) -> Arc<dyn Queue> {
        self.queue.clone()
    }

    fn surface(&self) -> Option<Arc<dyn Surface>> {
        self.surface
            .as_ref()
            .map(|surface| surface.clone() as Arc<dyn Surface>)
    }

    fn frame_counter(&self) -> u64 {
        self.ctx.frame.get()
    }

    fn end_frame(&self) -> Result<()> {
        self.ctx.ensure_live()?;
        self.pacer.end_frame(self.queue.native())?;
        Ok(())
    }

    fn wait_idle(&self) -> Result<()> {
        self.ctx.ensure_live()?;
        self.queue.wait_idle()
    }

    fn dispose(&self) {
        if self.ctx.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        log::info!("disposing bindless device '{}'", self.ctx.native.name());
        if let Err(e) = self.queue.wait_idle() {
            log::warn!("wait for GPU before dispose failed: {}", e);
        }
        if self.validation && self.ctx.residency.len() > 0 {
            log::warn!(
                "{} allocations still resident at dispose",
                self.ctx.residency.len()
            );
        }
        self.queue.release();
        if let Some(surface) = &self.surface {
            surface.release();
        }
        self.pacer.release();
        self.compiler.release();
        self.ctx.residency.release();
        self.ctx.native.release();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for BindlessDevice {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests;
