//! Swap chain for the WebGPU backend: a configured `wgpu::Surface` or an offscreen texture.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::texture::WebGpuTexture;
use super::{conv, WebGpuContext};
use crate::{Result, RhiError, Surface, Texture, TextureFormat, MAX_FRAMES_IN_FLIGHT};

enum Presenter {
    Window {
        surface: wgpu::Surface<'static>,
        config: wgpu::SurfaceConfiguration,
        current: Option<wgpu::SurfaceTexture>,
    },
    Headless {
        texture: Arc<wgpu::Texture>,
        view: Arc<wgpu::TextureView>,
        extent: (u32, u32),
    },
}

impl Presenter {
    fn extent(&self) -> (u32, u32) {
        match self {
            Presenter::Window { config, .. } => (config.width, config.height),
            Presenter::Headless { extent, .. } => *extent,
        }
    }
}

pub struct WebGpuSurface {
    ctx: Arc<WebGpuContext>,
    format: TextureFormat,
    presenter: Mutex<Presenter>,
    released: AtomicBool,
}

impl std::fmt::Debug for WebGpuSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let presenter = self.presenter.lock();
        f.debug_struct("WebGpuSurface")
            .field("format", &self.format)
            .field("extent", &presenter.extent())
            .field("headless", &matches!(*presenter, Presenter::Headless { .. }))
            .finish()
    }
}

impl WebGpuSurface {
    /// Configure a window surface, preferring an sRGB format the RHI can name.
    pub(crate) fn window(
        ctx: Arc<WebGpuContext>,
        surface: wgpu::Surface<'static>,
        adapter: &wgpu::Adapter,
        extent: (u32, u32),
    ) -> Result<Self> {
        let caps = surface.get_capabilities(adapter);
        let supported: Vec<(wgpu::TextureFormat, TextureFormat)> = caps
            .formats
            .iter()
            .filter_map(|f| conv::texture_format_from_wgpu(*f).map(|ours| (*f, ours)))
            .collect();
        let (native_format, format) = supported
            .iter()
            .find(|(native, _)| native.is_srgb())
            .or_else(|| supported.first())
            .copied()
            .ok_or_else(|| {
                RhiError::Surface(format!(
                    "none of the surface formats {:?} is supported",
                    caps.formats
                ))
            })?;
        let alpha_mode = caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: native_format,
            width: extent.0.max(1),
            height: extent.1.max(1),
            present_mode: wgpu::PresentMode::Fifo,
            desired_maximum_frame_latency: (MAX_FRAMES_IN_FLIGHT - 1) as u32,
            alpha_mode,
            view_formats: vec![],
        };
        surface.configure(&ctx.device, &config);
        log::info!(
            "window surface configured: {}x{} {:?}",
            config.width,
            config.height,
            native_format
        );
        Ok(Self {
            ctx,
            format,
            presenter: Mutex::new(Presenter::Window {
                surface,
                config,
                current: None,
            }),
            released: AtomicBool::new(false),
        })
    }

    pub(crate) fn headless(
        ctx: Arc<WebGpuContext>,
        format: TextureFormat,
        extent: (u32, u32),
    ) -> Result<Self> {
        let (texture, view) = offscreen_target(&ctx, format, extent)?;
        log::info!("headless surface created: {}x{} {:?}", extent.0, extent.1, format);
        Ok(Self {
            ctx,
            format,
            presenter: Mutex::new(Presenter::Headless {
                texture,
                view,
                extent,
            }),
            released: AtomicBool::new(false),
        })
    }

    /// The offscreen target of a headless surface, for readback.
    pub fn headless_texture(&self) -> Option<Arc<wgpu::Texture>> {
        match &*self.presenter.lock() {
            Presenter::Headless { texture, .. } => Some(texture.clone()),
            Presenter::Window { .. } => None,
        }
    }

    fn ensure_live(&self) -> Result<()> {
        if self.released.load(Ordering::Acquire) {
            return Err(RhiError::Disposed("surface"));
        }
        self.ctx.ensure_live()
    }

    /// Called by the owning device during dispose.
    pub(crate) fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Presenter::Window { current, .. } = &mut *self.presenter.lock() {
            // An unpresented frame is discarded when dropped.
            current.take();
        }
        log::debug!("surface released");
    }
}

fn offscreen_target(
    ctx: &WebGpuContext,
    format: TextureFormat,
    extent: (u32, u32),
) -> Result<(Arc<wgpu::Texture>, Arc<wgpu::TextureView>)> {
    if extent.0 == 0 || extent.1 == 0 {
        return Err(RhiError::InvalidDescriptor(format!(
            "surface size {}x{}",
            extent.0, extent.1
        )));
    }
    let texture = ctx.validated(
        |device| {
            device.create_texture(&wgpu::TextureDescriptor {
                label: Some("headless surface"),
                size: wgpu::Extent3d {
                    width: extent.0,
                    height: extent.1,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: conv::texture_format_to_wgpu(format),
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                    | wgpu::TextureUsages::COPY_SRC
                    | wgpu::TextureUsages::TEXTURE_BINDING,
                view_formats: &[],
            })
        },
        RhiError::Surface,
    )?;
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    Ok((Arc::new(texture), Arc::new(view)))
}

impl Surface for WebGpuSurface {
    fn configure(&self, width: u32, height: u32) -> Result<()> {
        self.ensure_live()?;
        if width == 0 || height == 0 {
            return Err(RhiError::InvalidDescriptor(format!(
                "surface size {}x{}",
                width, height
            )));
        }
        let mut presenter = self.presenter.lock();
        if presenter.extent() == (width, height) {
            return Ok(());
        }
        match &mut *presenter {
            Presenter::Window {
                surface,
                config,
                current,
            } => {
                current.take();
                config.width = width;
                config.height = height;
                surface.configure(&self.ctx.device, config);
            }
            Presenter::Headless {
                texture,
                view,
                extent,
            } => {
                let (new_texture, new_view) = offscreen_target(&self.ctx, self.format, (width, height))?;
                texture.destroy();
                *texture = new_texture;
                *view = new_view;
                *extent = (width, height);
            }
        }
        log::info!("surface reconfigured to {}x{}", width, height);
        Ok(())
    }

    fn extent(&self) -> (u32, u32) {
        self.presenter.lock().extent()
    }

    fn format(&self) -> TextureFormat {
        self.format
    }

    fn acquire_texture(&self) -> Result<Box<dyn Texture>> {
        self.ensure_live()?;
        let mut presenter = self.presenter.lock();
        let extent = presenter.extent();
        let view = match &mut *presenter {
            Presenter::Window {
                surface,
                config,
                current,
            } => {
                let frame = match surface.get_current_texture() {
                    Ok(frame) => frame,
                    Err(err @ (wgpu::SurfaceError::Outdated | wgpu::SurfaceError::Lost)) => {
                        // Reconfigured for the next acquire; this frame is skipped.
                        log::warn!("surface {}, reconfiguring", err);
                        surface.configure(&self.ctx.device, config);
                        return Err(err.into());
                    }
                    Err(err) => return Err(err.into()),
                };
                if frame.suboptimal {
                    log::debug!("surface frame is suboptimal");
                }
                let view = Arc::new(
                    frame
                        .texture
                        .create_view(&wgpu::TextureViewDescriptor::default()),
                );
                *current = Some(frame);
                view
            }
            Presenter::Headless { view, .. } => view.clone(),
        };
        Ok(Box::new(WebGpuTexture::from_surface(
            &self.ctx,
            view,
            self.format,
            extent,
        )))
    }

    fn present(&self) -> Result<()> {
        self.ensure_live()?;
        if let Presenter::Window { current, .. } = &mut *self.presenter.lock() {
            match current.take() {
                Some(frame) => frame.present(),
                None => log::warn!("present without an acquired drawable"),
            }
        }
        let frame = self.ctx.frame.advance();
        log::trace!("presented; frame {} begins", frame);
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
