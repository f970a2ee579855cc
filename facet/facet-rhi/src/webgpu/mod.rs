//! WebGPU descriptor-set backend on top of `wgpu`.
//!
//! Every Facet object wraps the matching `wgpu` object; bind groups are native `wgpu::BindGroup`s
//! and `wgpu` itself orders queued writes against submissions, so uniform buffers need only one
//! allocation here.

pub mod binding;
pub mod buffer;
pub mod command;
pub mod conv;
pub mod queue;
pub mod shader;
pub mod surface;
pub mod texture;

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use wgpu::SurfaceTargetUnsafe;

use self::binding::{WebGpuBindGroup, WebGpuBindGroupLayout};
use self::buffer::WebGpuBuffer;
use self::command::WebGpuCommandEncoder;
use self::queue::WebGpuQueue;
use self::shader::{WebGpuRenderPipeline, WebGpuShaderModule};
use self::surface::WebGpuSurface;
use self::texture::{WebGpuSampler, WebGpuTexture};
use crate::validate::{buffer_allocation_size, COPY_BUFFER_ALIGNMENT};
use crate::{
    AdapterInfo, Backend, BindGroup, BindGroupDescriptor, BindGroupLayout,
    BindGroupLayoutDescriptor, Buffer, BufferDescriptor, BufferInitDescriptor, BufferUsage,
    CommandEncoder, Device, DeviceDescriptor, DeviceId, FrameCounter, Limits, Queue,
    RenderPipeline, RenderPipelineDescriptor, ResourceId, Result, RhiError, Sampler,
    SamplerDescriptor, ShaderLanguage, ShaderModule, ShaderModuleDescriptor, Surface,
    SurfaceTarget, Texture, TextureDescriptor, WindowPlatform, MAX_FRAMES_IN_FLIGHT,
};

/// Bind groups per pipeline (`wgpu::Limits::default().max_bind_groups`).
pub const MAX_BIND_GROUPS: u32 = 4;
/// Vertex buffer slots per pipeline (`wgpu::Limits::default().max_vertex_buffers`).
pub const MAX_VERTEX_BUFFERS: u32 = 8;

/// State shared by a WebGPU device, its queue and its surface.
#[derive(Debug)]
pub(crate) struct WebGpuContext {
    pub id: DeviceId,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub frame: FrameCounter,
    next_resource_id: AtomicU64,
    disposed: AtomicBool,
}

impl WebGpuContext {
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

    pub fn check_owner(&self, owner: DeviceId, what: &'static str) -> Result<()> {
        if owner != self.id {
            return Err(RhiError::ForeignResource(what));
        }
        Ok(())
    }

    /// Run `create` inside a validation error scope and turn a captured error into `map(text)`.
    pub fn validated<T>(&self, create: impl FnOnce(&wgpu::Device) -> T, map: fn(String) -> RhiError) -> Result<T> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = create(&self.device);
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(err) => Err(map(err.to_string())),
            None => Ok(value),
        }
    }
}

/// Downcast a trait object to this backend's concrete type.
pub(crate) fn downcast<'a, T: 'static>(any: &'a dyn Any, what: &'static str) -> Result<&'a T> {
    any.downcast_ref::<T>()
        .ok_or(RhiError::ForeignResource(what))
}

/// Constructor registered as "webgpu" in [`crate::DeviceRegistry`].
pub fn create_device(desc: &DeviceDescriptor) -> Result<Arc<dyn Device>> {
    Ok(Arc::new(WebGpuDevice::new(desc)?))
}

pub struct WebGpuDevice {
    ctx: Arc<WebGpuContext>,
    #[allow(dead_code)]
    instance: wgpu::Instance,
    adapter: wgpu::Adapter,
    queue: Arc<WebGpuQueue>,
    surface: Option<Arc<WebGpuSurface>>,
}

impl std::fmt::Debug for WebGpuDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebGpuDevice")
            .field("id", &self.ctx.id)
            .field("adapter", &self.adapter.get_info().name)
            .field("frame", &self.ctx.frame.get())
            .finish()
    }
}

impl WebGpuDevice {
    /// Pick an adapter (compatible with the window, if one is given) and open a device on it.
    pub fn new(desc: &DeviceDescriptor) -> Result<Self> {
        pollster::block_on(Self::new_async(desc))
    }

    async fn new_async(desc: &DeviceDescriptor) -> Result<Self> {
        let flags = if desc.validation {
            wgpu::InstanceFlags::debugging()
        } else {
            wgpu::InstanceFlags::from_build_config()
        };
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            flags,
            ..Default::default()
        });

        let window_surface = match desc.surface {
            Some(SurfaceTarget::Window {
                window,
                display,
                width,
                height,
            }) => {
                let platform = WindowPlatform::of(&window)?;
                log::debug!("creating {:?} window surface", platform);
                let target = SurfaceTargetUnsafe::RawHandle {
                    raw_display_handle: display,
                    raw_window_handle: window,
                };
                // The window outlives the device (documented on SurfaceTarget::Window).
                let surface = unsafe { instance.create_surface_unsafe(target)? };
                Some((surface, width, height))
            }
            _ => None,
        };

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: conv::power_preference_to_wgpu(desc.power_preference),
                force_fallback_adapter: desc.force_fallback_adapter,
                compatible_surface: window_surface.as_ref().map(|(surface, _, _)| surface),
            })
            .await
            .ok_or_else(|| RhiError::AdapterUnavailable("no wgpu adapter matches the request".to_string()))?;
        let info = adapter.get_info();
        log::info!(
            "using adapter \"{}\" ({:?}, {:?})",
            info.name,
            info.backend,
            info.device_type
        );

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: desc.label,
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: wgpu::MemoryHints::default(),
                },
                None,
            )
            .await?;
        device.on_uncaptured_error(Box::new(|e| {
            log::error!("wgpu uncaptured error: {}", e);
        }));

        let ctx = Arc::new(WebGpuContext {
            id: DeviceId::next(),
            device,
            queue,
            frame: FrameCounter::new(),
            next_resource_id: AtomicU64::new(1),
            disposed: AtomicBool::new(false),
        });
        let surface = match (desc.surface, window_surface) {
            (_, Some((surface, width, height))) => Some(WebGpuSurface::window(
                ctx.clone(),
                surface,
                &adapter,
                (width, height),
            )?),
            (Some(SurfaceTarget::Headless {
                width,
                height,
                format,
            }), None) => Some(WebGpuSurface::headless(ctx.clone(), format, (width, height))?),
            _ => None,
        };
        log::info!("webgpu device created (validation: {})", desc.validation);
        Ok(Self {
            queue: Arc::new(WebGpuQueue::new(ctx.clone())),
            ctx,
            instance,
            adapter,
            surface: surface.map(Arc::new),
        })
    }

    pub fn raw(&self) -> &wgpu::Device {
        &self.ctx.device
    }

    pub fn raw_queue(&self) -> &wgpu::Queue {
        &self.ctx.queue
    }

    pub fn adapter(&self) -> &wgpu::Adapter {
        &self.adapter
    }

    pub fn frame(&self) -> &FrameCounter {
        &self.ctx.frame
    }

    pub fn webgpu_surface(&self) -> Option<&Arc<WebGpuSurface>> {
        self.surface.as_ref()
    }

    fn new_buffer(&self, label: Option<&'static str>, size: u64, usage: BufferUsage) -> Result<WebGpuBuffer> {
        self.ctx.ensure_live()?;
        let size = buffer_allocation_size(size, COPY_BUFFER_ALIGNMENT)?;
        Ok(WebGpuBuffer::new(&self.ctx, label, size, usage))
    }
}

impl Device for WebGpuDevice {
    fn backend(&self) -> Backend {
        Backend::WebGpu
    }

    fn adapter_info(&self) -> AdapterInfo {
        let info = self.adapter.get_info();
        AdapterInfo {
            name: info.name,
            backend: Backend::WebGpu,
            driver: format!("{:?}", info.backend),
        }
    }

    fn shader_language(&self) -> ShaderLanguage {
        ShaderLanguage::Wgsl
    }

    fn limits(&self) -> Limits {
        Limits {
            copy_buffer_alignment: wgpu::COPY_BUFFER_ALIGNMENT,
            max_bind_groups: MAX_BIND_GROUPS,
            max_vertex_buffers: MAX_VERTEX_BUFFERS,
            frames_in_flight: MAX_FRAMES_IN_FLIGHT,
        }
    }

    fn create_buffer(&self, desc: &BufferDescriptor) -> Result<Box<dyn Buffer>> {
        Ok(Box::new(self.new_buffer(desc.label, desc.size, desc.usage)?))
    }

    fn create_buffer_init(&self, desc: &BufferInitDescriptor<'_>) -> Result<Box<dyn Buffer>> {
        let buffer = self.new_buffer(desc.label, desc.contents.len() as u64, desc.usage)?;
        if desc.contents.len() as u64 == buffer.size() {
            buffer.update_data(self.queue.as_ref(), 0, desc.contents)?;
        } else {
            // The new buffer is zeroed, so padding the tail loses nothing.
            let mut padded = desc.contents.to_vec();
            padded.resize(buffer.size() as usize, 0);
            buffer.update_data(self.queue.as_ref(), 0, &padded)?;
        }
        Ok(Box::new(buffer))
    }

    fn create_texture(&self, desc: &TextureDescriptor) -> Result<Box<dyn Texture>> {
        self.ctx.ensure_live()?;
        Ok(Box::new(WebGpuTexture::new(&self.ctx, desc)?))
    }

    fn create_sampler(&self, desc: &SamplerDescriptor) -> Result<Box<dyn Sampler>> {
        self.ctx.ensure_live()?;
        Ok(Box::new(WebGpuSampler::new(&self.ctx, desc)?))
    }

    fn create_shader_module(&self, desc: &ShaderModuleDescriptor) -> Result<Box<dyn ShaderModule>> {
        self.ctx.ensure_live()?;
        Ok(Box::new(WebGpuShaderModule::new(&self.ctx, desc)?))
    }

    fn create_bind_group_layout(
        &self,
        desc: &BindGroupLayoutDescriptor,
    ) -> Result<Box<dyn BindGroupLayout>> {
        self.ctx.ensure_live()?;
        Ok(Box::new(WebGpuBindGroupLayout::new(&self.ctx, desc)?))
    }

    fn create_bind_group(&self, desc: &BindGroupDescriptor<'_>) -> Result<Box<dyn BindGroup>> {
        self.ctx.ensure_live()?;
        Ok(Box::new(WebGpuBindGroup::new(&self.ctx, desc)?))
    }

    fn create_render_pipeline(
        &self,
        desc: &RenderPipelineDescriptor<'_>,
    ) -> Result<Box<dyn RenderPipeline>> {
        self.ctx.ensure_live()?;
        Ok(Box::new(WebGpuRenderPipeline::new(&self.ctx, desc)?))
    }

    fn create_command_encoder(&self) -> Result<Box<dyn CommandEncoder>> {
        self.ctx.ensure_live()?;
        Ok(Box::new(WebGpuCommandEncoder::new(self.ctx.clone())))
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
        let frame = self.ctx.frame.advance();
        log::debug!("frame {} ended", frame);
        Ok(())
    }

    fn wait_idle(&self) -> Result<()> {
        self.ctx.ensure_live()?;
        self.ctx.device.poll(wgpu::Maintain::Wait);
        Ok(())
    }

    fn dispose(&self) {
        if self.ctx.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        log::info!("disposing webgpu device");
        self.ctx.device.poll(wgpu::Maintain::Wait);
        self.queue.release();
        if let Some(surface) = &self.surface {
            surface.release();
        }
        self.ctx.device.destroy();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for WebGpuDevice {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests;
