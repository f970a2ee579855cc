//! Presentation for the bindless backend.
//!
//! Headless targets get a ring of one drawable texture per frame in flight; `present` ends the
//! frame. Window targets need a `CAMetalLayer`-backed driver.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::native::{Allocation, NativeTextureDescriptor};
use super::pacing::FramePacer;
use super::queue::BindlessQueue;
use super::texture::{native_texture_descriptor, BindlessTexture};
use super::DeviceContext;
use crate::{
    Result, RhiError, Surface, SurfaceTarget, Texture, TextureDescriptor, TextureDimension,
    TextureFormat, TextureUsage, WindowPlatform, MAX_FRAMES_IN_FLIGHT,
};

#[derive(Debug)]
struct Swapchain {
    extent: (u32, u32),
    drawables: Vec<Allocation>,
    acquired: Option<usize>,
    last_presented: Option<usize>,
}

#[derive(Debug)]
pub struct BindlessSurface {
    ctx: Arc<DeviceContext>,
    queue: Arc<BindlessQueue>,
    pacer: Arc<FramePacer>,
    format: TextureFormat,
    swapchain: Mutex<Swapchain>,
    released: AtomicBool,
}

impl BindlessSurface {
    pub(crate) fn new(
        ctx: Arc<DeviceContext>,
        queue: Arc<BindlessQueue>,
        pacer: Arc<FramePacer>,
        target: SurfaceTarget,
    ) -> Result<Self> {
        let (width, height, format) = match target {
            SurfaceTarget::Headless {
                width,
                height,
                format,
            } => (width, height, format),
            SurfaceTarget::Window { window, .. } => {
                let platform = WindowPlatform::of(&window)?;
                if !platform.is_apple() {
                    return Err(RhiError::UnsupportedPlatform(format!(
                        "bindless presentation needs a CAMetalLayer; {:?} has none",
                        platform
                    )));
                }
                return Err(RhiError::Unsupported(format!(
                    "driver '{}' cannot present to {:?} windows",
                    ctx.native.name(),
                    platform
                )));
            }
        };
        if format.is_depth() {
            return Err(RhiError::InvalidDescriptor(format!(
                "{:?} is not a presentable format",
                format
            )));
        }
        let drawables = allocate_drawables(&ctx, format, (width, height))?;
        log::info!(
            "headless surface created: {}x{} {:?}, {} drawables",
            width,
            height,
            format,
            drawables.len()
        );
        Ok(Self {
            ctx,
            queue,
            pacer,
            format,
            swapchain: Mutex::new(Swapchain {
                extent: (width, height),
                drawables,
                acquired: None,
                last_presented: None,
            }),
            released: AtomicBool::new(false),
        })
    }

    /// Drawable that received the most recent `present`, for readback.
    pub fn last_presented(&self) -> Option<Allocation> {
        let swapchain = self.swapchain.lock();
        swapchain.last_presented.map(|i| swapchain.drawables[i])
    }

    fn ensure_live(&self) -> Result<()> {
        if self.released.load(Ordering::Acquire) {
            return Err(RhiError::Disposed("surface"));
        }
        Ok(())
    }

    fn free_drawables(&self, drawables: &[Allocation]) {
        for drawable in drawables {
            self.ctx.residency.remove(drawable);
            self.ctx.native.release_allocation(drawable);
        }
    }

    /// Called by the owning device during dispose.
    pub(crate) fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        let drawables = std::mem::take(&mut self.swapchain.lock().drawables);
        self.free_drawables(&drawables);
        log::info!("surface released");
    }
}

fn drawable_descriptor(format: TextureFormat, extent: (u32, u32)) -> Result<NativeTextureDescriptor> {
    native_texture_descriptor(&TextureDescriptor {
        label: Some("drawable"),
        size: (extent.0, extent.1, 1),
        format,
        usage: TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
        dimension: TextureDimension::D2,
        mip_level_count: 1,
    })
}

fn allocate_drawables(
    ctx: &DeviceContext,
    format: TextureFormat,
    extent: (u32, u32),
) -> Result<Vec<Allocation>> {
    let desc = drawable_descriptor(format, extent)?;
    let mut drawables = Vec::with_capacity(MAX_FRAMES_IN_FLIGHT);
    for _ in 0..MAX_FRAMES_IN_FLIGHT {
        match ctx.native.new_texture(&desc, Some("drawable")) {
            Ok(allocation) => {
                ctx.residency.add(&allocation);
                drawables.push(allocation);
            }
            Err(e) => {
                for allocation in &drawables {
                    ctx.residency.remove(allocation);
                    ctx.native.release_allocation(allocation);
                }
                return Err(RhiError::Surface(e.to_string()));
            }
        }
    }
    Ok(drawables)
}

impl Surface for BindlessSurface {
    fn configure(&self, width: u32, height: u32) -> Result<()> {
        self.ensure_live()?;
        if width == 0 || height == 0 {
            return Err(RhiError::InvalidDescriptor(format!(
                "surface size {}x{}",
                width, height
            )));
        }
        if self.swapchain.lock().extent == (width, height) {
            return Ok(());
        }
        // In-flight frames may still render into the old drawables.
        self.queue.wait_idle()?;
        let drawables = allocate_drawables(&self.ctx, self.format, (width, height))?;
        let old = {
            let mut swapchain = self.swapchain.lock();
            swapchain.extent = (width, height);
            swapchain.acquired = None;
            swapchain.last_presented = None;
            std::mem::replace(&mut swapchain.drawables, drawables)
        };
        self.free_drawables(&old);
        log::info!("surface reconfigured to {}x{}", width, height);
        Ok(())
    }

    fn extent(&self) -> (u32, u32) {
        self.swapchain.lock().extent
    }

    fn format(&self) -> TextureFormat {
        self.format
    }

    fn acquire_texture(&self) -> Result<Box<dyn Texture>> {
        self.ensure_live()?;
        let index = self.pacer.counter().frame_index();
        let mut swapchain = self.swapchain.lock();
        swapchain.acquired = Some(index);
        Ok(Box::new(BindlessTexture::borrowed(
            self.ctx.clone(),
            swapchain.drawables[index],
            self.format,
            swapchain.extent,
        )))
    }

    fn present(&self) -> Result<()> {
        self.ensure_live()?;
        {
            let mut swapchain = self.swapchain.lock();
            match swapchain.acquired.take() {
                Some(index) => swapchain.last_presented = Some(index),
                None => log::warn!("present without an acquired drawable"),
            }
        }
        self.pacer.end_frame(self.queue.native())?;
        Ok(())
    }

    /// The surface belongs to its device; the device releases it during dispose.
    fn dispose(&self) {
        log::debug!("ignoring dispose of a device-owned surface");
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
