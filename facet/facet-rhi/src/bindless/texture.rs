//! Bindless textures, views and samplers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::conv;
use super::native::{Allocation, NativeSamplerDescriptor, NativeTextureDescriptor};
use super::DeviceContext;
use crate::{
    ResourceId, Result, RhiError, Sampler, SamplerDescriptor, Texture, TextureDescriptor,
    TextureDimension, TextureFormat, TextureUsage, TextureView, TextureViewDescriptor,
    TextureViewDimension,
};

pub struct BindlessTexture {
    ctx: Arc<DeviceContext>,
    id: ResourceId,
    allocation: Allocation,
    format: TextureFormat,
    size: (u32, u32, u32),
    dimension: TextureDimension,
    mip_level_count: u32,
    usage: TextureUsage,
    owned: bool,
    disposed: AtomicBool,
}

impl std::fmt::Debug for BindlessTexture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindlessTexture")
            .field("id", &self.id)
            .field("format", &self.format)
            .field("size", &self.size)
            .field("owned", &self.owned)
            .finish()
    }
}

/// Native descriptor for an RHI texture description.
pub(crate) fn native_texture_descriptor(desc: &TextureDescriptor) -> Result<NativeTextureDescriptor> {
    let (width, height, depth) = desc.size;
    if width == 0 || height == 0 || depth == 0 {
        return Err(RhiError::InvalidDescriptor(format!(
            "texture size {:?} has a zero extent",
            desc.size
        )));
    }
    if desc.mip_level_count == 0 {
        return Err(RhiError::InvalidDescriptor(
            "mip_level_count must be at least 1".to_string(),
        ));
    }
    let depth_or_layers = match desc.dimension {
        TextureDimension::Cube => {
            if depth != 6 {
                return Err(RhiError::InvalidDescriptor(format!(
                    "cube textures have 6 layers, got {}",
                    depth
                )));
            }
            6
        }
        TextureDimension::D2 => 1,
        TextureDimension::D2Array | TextureDimension::D3 => depth,
    };
    Ok(NativeTextureDescriptor {
        texture_type: conv::texture_type_to_native(desc.dimension),
        pixel_format: conv::texture_format_to_native(desc.format),
        width,
        height,
        depth_or_layers,
        mipmap_level_count: desc.mip_level_count,
        usage: conv::texture_usage_to_native(desc.usage),
        bytes_per_pixel: desc.format.bytes_per_pixel(),
    })
}

impl BindlessTexture {
    pub(crate) fn new(ctx: Arc<DeviceContext>, desc: &TextureDescriptor) -> Result<Self> {
        let native = native_texture_descriptor(desc)?;
        let allocation = ctx.native.new_texture(&native, desc.label)?;
        ctx.residency.add(&allocation);
        let id = ctx.next_resource_id();
        log::debug!(
            "texture {} ({:?}) created: {:?} {:?}",
            id,
            desc.label,
            desc.format,
            desc.size
        );
        Ok(Self {
            ctx,
            id,
            allocation,
            format: desc.format,
            size: desc.size,
            dimension: desc.dimension,
            mip_level_count: desc.mip_level_count,
            usage: desc.usage,
            owned: true,
            disposed: AtomicBool::new(false),
        })
    }

    /// Wrap a drawable owned by a surface. Disposing the wrapper leaves the allocation alone.
    pub(crate) fn borrowed(
        ctx: Arc<DeviceContext>,
        allocation: Allocation,
        format: TextureFormat,
        extent: (u32, u32),
    ) -> Self {
        let id = ctx.next_resource_id();
        Self {
            ctx,
            id,
            allocation,
            format,
            size: (extent.0, extent.1, 1),
            dimension: TextureDimension::D2,
            mip_level_count: 1,
            usage: TextureUsage::RENDER_ATTACHMENT | TextureUsage::COPY_SRC,
            owned: false,
            disposed: AtomicBool::new(false),
        }
    }

    pub(crate) fn device_context(&self) -> &Arc<DeviceContext> {
        &self.ctx
    }

    pub fn allocation(&self) -> Allocation {
        self.allocation
    }

    /// Opaque id bound into argument tables.
    pub fn resource_id(&self) -> u64 {
        self.allocation.resource_id()
    }

    fn layer_count(&self) -> u32 {
        match self.dimension {
            TextureDimension::D2 | TextureDimension::D3 => 1,
            TextureDimension::D2Array | TextureDimension::Cube => self.size.2,
        }
    }
}

impl Texture for BindlessTexture {
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
        self.owned
    }

    fn create_view(&self, desc: &TextureViewDescriptor) -> Result<Box<dyn TextureView>> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(RhiError::Disposed("texture"));
        }
        let format = desc.format.unwrap_or(self.format);
        if format.bytes_per_pixel() != self.format.bytes_per_pixel()
            || format.is_depth() != self.format.is_depth()
        {
            return Err(RhiError::InvalidDescriptor(format!(
                "view format {:?} is incompatible with texture format {:?}",
                format, self.format
            )));
        }
        let mip_level_count = desc
            .mip_level_count
            .unwrap_or(self.mip_level_count.saturating_sub(desc.base_mip_level));
        if mip_level_count == 0 || desc.base_mip_level + mip_level_count > self.mip_level_count {
            return Err(RhiError::InvalidDescriptor(format!(
                "mip range {}..{} outside {} levels",
                desc.base_mip_level,
                desc.base_mip_level + mip_level_count,
                self.mip_level_count
            )));
        }
        let layers = self.layer_count();
        let array_layer_count = desc
            .array_layer_count
            .unwrap_or(layers.saturating_sub(desc.base_array_layer));
        if array_layer_count == 0 || desc.base_array_layer + array_layer_count > layers {
            return Err(RhiError::InvalidDescriptor(format!(
                "layer range {}..{} outside {} layers",
                desc.base_array_layer,
                desc.base_array_layer + array_layer_count,
                layers
            )));
        }
        let width = (self.size.0 >> desc.base_mip_level).max(1);
        let height = (self.size.1 >> desc.base_mip_level).max(1);
        Ok(Box::new(BindlessTextureView {
            device: self.ctx.id,
            texture_id: self.id,
            allocation: self.allocation,
            format,
            size: (width, height),
            dimension: desc.dimension.unwrap_or_else(|| self.dimension.into()),
            base_mip_level: desc.base_mip_level,
            base_array_layer: desc.base_array_layer,
        }))
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) || !self.owned {
            return;
        }
        if self.ctx.is_disposed() {
            log::debug!("texture {} dropped after its device", self.id);
            return;
        }
        self.ctx.residency.remove(&self.allocation);
        self.ctx.native.release_allocation(&self.allocation);
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl Drop for BindlessTexture {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[derive(Debug)]
pub struct BindlessTextureView {
    pub(crate) device: crate::DeviceId,
    texture_id: ResourceId,
    allocation: Allocation,
    format: TextureFormat,
    size: (u32, u32),
    dimension: TextureViewDimension,
    base_mip_level: u32,
    base_array_layer: u32,
}

impl BindlessTextureView {
    pub fn allocation(&self) -> Allocation {
        self.allocation
    }

    pub fn resource_id(&self) -> u64 {
        self.allocation.resource_id()
    }

    pub fn base_mip_level(&self) -> u32 {
        self.base_mip_level
    }

    pub fn base_array_layer(&self) -> u32 {
        self.base_array_layer
    }
}

impl TextureView for BindlessTextureView {
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

pub struct BindlessSampler {
    ctx: Arc<DeviceContext>,
    id: ResourceId,
    sampler_id: u64,
}

impl std::fmt::Debug for BindlessSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindlessSampler")
            .field("id", &self.id)
            .field("sampler_id", &self.sampler_id)
            .finish()
    }
}

impl BindlessSampler {
    pub(crate) fn new(ctx: Arc<DeviceContext>, desc: &SamplerDescriptor) -> Result<Self> {
        if desc.lod_min_clamp > desc.lod_max_clamp {
            return Err(RhiError::InvalidDescriptor(format!(
                "lod_min_clamp {} exceeds lod_max_clamp {}",
                desc.lod_min_clamp, desc.lod_max_clamp
            )));
        }
        let native = NativeSamplerDescriptor {
            min_filter: conv::min_mag_filter_to_native(desc.min_filter),
            mag_filter: conv::min_mag_filter_to_native(desc.mag_filter),
            mip_filter: conv::mip_filter_to_native(desc.mipmap_filter),
            s_address_mode: conv::address_mode_to_native(desc.address_mode_u),
            t_address_mode: conv::address_mode_to_native(desc.address_mode_v),
            r_address_mode: conv::address_mode_to_native(desc.address_mode_w),
            lod_min_clamp: desc.lod_min_clamp,
            lod_max_clamp: desc.lod_max_clamp,
            max_anisotropy: desc.anisotropy_clamp.unwrap_or(1),
            compare_function: desc.compare.map(conv::compare_function_to_native),
        };
        let sampler_id = ctx.native.new_sampler(&native)?;
        let id = ctx.next_resource_id();
        Ok(Self {
            ctx,
            id,
            sampler_id,
        })
    }

    pub(crate) fn device_context(&self) -> &Arc<DeviceContext> {
        &self.ctx
    }

    pub fn resource_id(&self) -> u64 {
        self.sampler_id
    }
}

impl Sampler for BindlessSampler {
    fn id(&self) -> ResourceId {
        self.id
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl Drop for BindlessSampler {
    fn drop(&mut self) {
        if !self.ctx.is_disposed() {
            self.ctx.native.release_sampler(self.sampler_id);
        }
    }
}
