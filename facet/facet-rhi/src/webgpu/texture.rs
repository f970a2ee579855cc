//! WebGPU textures, texture views and samplers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::{conv, WebGpuContext};
use crate::{
    DeviceId, ResourceId, Result, RhiError, Sampler, SamplerDescriptor, Texture,
    TextureDescriptor, TextureDimension, TextureFormat, TextureUsage, TextureView,
    TextureViewDescriptor, TextureViewDimension,
};

#[derive(Debug)]
enum Storage {
    Owned(wgpu::Texture),
    /// Swap-chain image: only its default view is reachable.
    Surface(Arc<wgpu::TextureView>),
}

#[derive(Debug)]
pub struct WebGpuTexture {
    pub(crate) device: DeviceId,
    id: ResourceId,
    storage: Storage,
    format: TextureFormat,
    size: (u32, u32, u32),
    dimension: TextureDimension,
    mip_level_count: u32,
    usage: TextureUsage,
    disposed: AtomicBool,
}

impl WebGpuTexture {
    pub(crate) fn new(ctx: &WebGpuContext, desc: &TextureDescriptor) -> Result<Self> {
        let (width, height, depth) = desc.size;
        if width == 0 || height == 0 || depth == 0 {
            return Err(RhiError::InvalidDescriptor(format!(
                "texture size {}x{}x{}",
                width, height, depth
            )));
        }
        if desc.dimension == TextureDimension::Cube && depth != 6 {
            return Err(RhiError::InvalidDescriptor(format!(
                "cube texture needs 6 layers, got {}",
                depth
            )));
        }
        if desc.mip_level_count == 0 {
            return Err(RhiError::InvalidDescriptor("mip_level_count is zero".to_string()));
        }
        let raw = ctx.validated(
            |device| {
                device.create_texture(&wgpu::TextureDescriptor {
                    label: desc.label,
                    size: wgpu::Extent3d {
                        width,
                        height,
                        depth_or_array_layers: depth,
                    },
                    mip_level_count: desc.mip_level_count,
                    sample_count: 1,
                    dimension: conv::texture_dimension_to_wgpu(desc.dimension),
                    format: conv::texture_format_to_wgpu(desc.format),
                    usage: conv::texture_usage_to_wgpu(desc.usage),
                    view_formats: &[],
                })
            },
            RhiError::InvalidDescriptor,
        )?;
        let id = ctx.next_resource_id();
        log::debug!(
            "texture {} created: {:?}, {}x{}x{} {:?}",
            id,
            desc.label,
            width,
            height,
            depth,
            desc.format
        );
        Ok(Self {
            device: ctx.id,
            id,
            storage: Storage::Owned(raw),
            format: desc.format,
            size: desc.size,
            dimension: desc.dimension,
            mip_level_count: desc.mip_level_count,
            usage: desc.usage,
            disposed: AtomicBool::new(false),
        })
    }

    /// Borrowed wrapper around the current swap-chain image.
    pub(crate) fn from_surface(
        ctx: &WebGpuContext,
        view: Arc<wgpu::TextureView>,
        format: TextureFormat,
        extent: (u32, u32),
    ) -> Self {
        Self {
            device: ctx.id,
            id: ctx.next_resource_id(),
            storage: Storage::Surface(view),
            format,
            size: (extent.0, extent.1, 1),
            dimension: TextureDimension::D2,
            mip_level_count: 1,
            usage: TextureUsage::RENDER_ATTACHMENT,
            disposed: AtomicBool::new(false),
        }
    }

    /// The native texture; None for swap-chain images.
    pub fn raw(&self) -> Option<&wgpu::Texture> {
        match &self.storage {
            Storage::Owned(raw) => Some(raw),
            Storage::Surface(_) => None,
        }
    }

    fn layer_count(&self) -> u32 {
        match self.dimension {
            TextureDimension::D3 => 1,
            _ => self.size.2,
        }
    }
}

impl Texture for WebGpuTexture {
    fn id(&self) -> ResourceId {
        self.id
    }

    fn format(&self) -> TextureFormat {
        self.format
    }

    fn size(&self) -> (u32, u32, u32) {
        self.size
    }

    fn dimension(&self) -> TextureDimension {
        self.dimension
    }

    fn mip_level_count(&self) -> u32 {
        self.mip_level_count
    }

    fn usage(&self) -> TextureUsage {
        self.usage
    }

    fn is_owned(&self) -> bool {
        matches!(self.storage, Storage::Owned(_))
    }

    fn create_view(&self, desc: &TextureViewDescriptor) -> Result<Box<dyn TextureView>> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(RhiError::Disposed("texture"));
        }
        let format = desc.format.unwrap_or(self.format);
        let dimension = desc.dimension.unwrap_or_else(|| self.dimension.into());
        let mip_count = desc
            .mip_level_count
            .unwrap_or(self.mip_level_count.saturating_sub(desc.base_mip_level));
        if mip_count == 0 || desc.base_mip_level + mip_count > self.mip_level_count {
            return Err(RhiError::InvalidDescriptor(format!(
                "mip range {}+{} outside {} levels",
                desc.base_mip_level, mip_count, self.mip_level_count
            )));
        }
        let layers = self.layer_count();
        let layer_count = desc
            .array_layer_count
            .unwrap_or(layers.saturating_sub(desc.base_array_layer));
        if layer_count == 0 || desc.base_array_layer + layer_count > layers {
            return Err(RhiError::InvalidDescriptor(format!(
                "layer range {}+{} outside {} layers",
                desc.base_array_layer, layer_count, layers
            )));
        }
        let size = (
            (self.size.0 >> desc.base_mip_level).max(1),
            (self.size.1 >> desc.base_mip_level).max(1),
        );
        let raw = match &self.storage {
            Storage::Owned(texture) => Arc::new(texture.create_view(&wgpu::TextureViewDescriptor {
                label: desc.label,
                format: Some(conv::texture_format_to_wgpu(format)),
                dimension: Some(conv::view_dimension_to_wgpu(dimension)),
                aspect: wgpu::TextureAspect::All,
                base_mip_level: desc.base_mip_level,
                mip_level_count: Some(mip_count),
                base_array_layer: desc.base_array_layer,
                array_layer_count: Some(layer_count),
            })),
            Storage::Surface(view) => {
                if format != self.format || dimension != TextureViewDimension::D2 {
                    return Err(RhiError::Unsupported(
                        "reinterpreting a surface texture".to_string(),
                    ));
                }
                view.clone()
            }
        };
        Ok(Box::new(WebGpuTextureView {
            device: self.device,
            texture_id: self.id,
            raw,
            format,
            size,
            dimension,
        }))
    }

    /// Swap-chain images belong to the surface; disposing the wrapper leaves them alone.
    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Storage::Owned(raw) = &self.storage {
            raw.destroy();
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl Drop for WebGpuTexture {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[derive(Debug)]
pub struct WebGpuTextureView {
    pub(crate) device: DeviceId,
    texture_id: ResourceId,
    raw: Arc<wgpu::TextureView>,
    format: TextureFormat,
    size: (u32, u32),
    dimension: TextureViewDimension,
}

impl WebGpuTextureView {
    pub fn raw(&self) -> &wgpu::TextureView {
        &self.raw
    }
}

impl TextureView for WebGpuTextureView {
    fn texture_id(&self) -> ResourceId {
        self.texture_id
    }

    fn format(&self) -> TextureFormat {
        self.format
    }

    fn size(&self) -> (u32, u32) {
        self.size
    }

    fn dimension(&self) -> TextureViewDimension {
        self.dimension
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

#[derive(Debug)]
pub struct WebGpuSampler {
    pub(crate) device: DeviceId,
    id: ResourceId,
    raw: wgpu::Sampler,
}

impl WebGpuSampler {
    pub(crate) fn new(ctx: &WebGpuContext, desc: &SamplerDescriptor) -> Result<Self> {
        if desc.lod_min_clamp > desc.lod_max_clamp || desc.lod_min_clamp < 0.0 {
            return Err(RhiError::InvalidDescriptor(format!(
                "lod clamp {}..{}",
                desc.lod_min_clamp, desc.lod_max_clamp
            )));
        }
        let anisotropy = desc.anisotropy_clamp.unwrap_or(1);
        if !(1..=16).contains(&anisotropy) {
            return Err(RhiError::InvalidDescriptor(format!(
                "anisotropy {} outside 1..=16",
                anisotropy
            )));
        }
        let all_linear = [desc.min_filter, desc.mag_filter, desc.mipmap_filter]
            .iter()
            .all(|f| *f == crate::FilterMode::Linear);
        if anisotropy > 1 && !all_linear {
            return Err(RhiError::InvalidDescriptor(
                "anisotropic filtering needs linear min, mag and mip filters".to_string(),
            ));
        }
        let uses_border = [desc.address_mode_u, desc.address_mode_v, desc.address_mode_w]
            .contains(&crate::AddressMode::ClampToBorder);
        let raw = ctx.device.create_sampler(&wgpu::SamplerDescriptor {
            label: desc.label,
            address_mode_u: conv::address_mode_to_wgpu(desc.address_mode_u),
            address_mode_v: conv::address_mode_to_wgpu(desc.address_mode_v),
            address_mode_w: conv::address_mode_to_wgpu(desc.address_mode_w),
            mag_filter: conv::filter_mode_to_wgpu(desc.mag_filter),
            min_filter: conv::filter_mode_to_wgpu(desc.min_filter),
            mipmap_filter: conv::filter_mode_to_wgpu(desc.mipmap_filter),
            lod_min_clamp: desc.lod_min_clamp,
            lod_max_clamp: desc.lod_max_clamp,
            compare: desc.compare.map(conv::compare_function_to_wgpu),
            anisotropy_clamp: anisotropy,
            border_color: uses_border.then_some(wgpu::SamplerBorderColor::TransparentBlack),
        });
        Ok(Self {
            device: ctx.id,
            id: ctx.next_resource_id(),
            raw,
        })
    }

    pub fn raw(&self) -> &wgpu::Sampler {
        &self.raw
    }
}

impl Sampler for WebGpuSampler {
    fn id(&self) -> ResourceId {
        self.id
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
