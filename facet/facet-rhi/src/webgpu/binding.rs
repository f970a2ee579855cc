//! Bind group layouts and bind groups as native `wgpu` objects.

use std::num::NonZeroU64;

use super::buffer::WebGpuBuffer;
use super::texture::{WebGpuSampler, WebGpuTextureView};
use super::{conv, downcast, WebGpuContext};
use crate::validate::{check_bind_group_entries, check_layout_entries};
use crate::{
    BindGroup, BindGroupDescriptor, BindGroupLayout, BindGroupLayoutDescriptor,
    BindGroupLayoutEntry, BindingResource, Buffer, DeviceId, ResourceId, Result, RhiError,
};

#[derive(Debug)]
pub struct WebGpuBindGroupLayout {
    pub(crate) device: DeviceId,
    pub(crate) id: ResourceId,
    raw: wgpu::BindGroupLayout,
    entries: Vec<BindGroupLayoutEntry>,
}

impl WebGpuBindGroupLayout {
    pub(crate) fn new(ctx: &WebGpuContext, desc: &BindGroupLayoutDescriptor) -> Result<Self> {
        check_layout_entries(&desc.entries)?;
        let entries: Vec<wgpu::BindGroupLayoutEntry> = desc
            .entries
            .iter()
            .map(|e| wgpu::BindGroupLayoutEntry {
                binding: e.binding,
                visibility: conv::shader_stages_to_wgpu(e.visibility),
                ty: conv::binding_type_to_wgpu(e.ty),
                count: None,
            })
            .collect();
        let raw = ctx.validated(
            |device| {
                device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: desc.label,
                    entries: &entries,
                })
            },
            RhiError::InvalidDescriptor,
        )?;
        Ok(Self {
            device: ctx.id,
            id: ctx.next_resource_id(),
            raw,
            entries: desc.entries.clone(),
        })
    }

    pub fn raw(&self) -> &wgpu::BindGroupLayout {
        &self.raw
    }
}

impl BindGroupLayout for WebGpuBindGroupLayout {
    fn id(&self) -> ResourceId {
        self.id
    }

    fn entries(&self) -> &[BindGroupLayoutEntry] {
        &self.entries
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

#[derive(Debug)]
pub struct WebGpuBindGroup {
    pub(crate) device: DeviceId,
    id: ResourceId,
    layout_id: ResourceId,
    raw: wgpu::BindGroup,
}

impl WebGpuBindGroup {
    pub(crate) fn new(ctx: &WebGpuContext, desc: &BindGroupDescriptor<'_>) -> Result<Self> {
        let layout: &WebGpuBindGroupLayout = downcast(desc.layout.as_any(), "bind group layout")?;
        ctx.check_owner(layout.device, "bind group layout")?;
        check_bind_group_entries(&layout.entries, &desc.entries)?;

        let mut entries = Vec::with_capacity(desc.entries.len());
        for entry in &desc.entries {
            let resource = match entry.resource {
                BindingResource::Buffer {
                    buffer,
                    offset,
                    size,
                } => {
                    let native: &WebGpuBuffer = downcast(buffer.as_any(), "buffer")?;
                    ctx.check_owner(native.device, "buffer")?;
                    native.ensure_live()?;
                    let len = size.unwrap_or(buffer.size() - offset);
                    wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: native.raw(),
                        offset,
                        size: NonZeroU64::new(len),
                    })
                }
                BindingResource::TextureView(view) => {
                    let native: &WebGpuTextureView = downcast(view.as_any(), "texture view")?;
                    ctx.check_owner(native.device, "texture view")?;
                    wgpu::BindingResource::TextureView(native.raw())
                }
                BindingResource::Sampler(sampler) => {
                    let native: &WebGpuSampler = downcast(sampler.as_any(), "sampler")?;
                    ctx.check_owner(native.device, "sampler")?;
                    wgpu::BindingResource::Sampler(native.raw())
                }
            };
            entries.push(wgpu::BindGroupEntry {
                binding: entry.binding,
                resource,
            });
        }
        let raw = ctx.validated(
            |device| {
                device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: desc.label,
                    layout: layout.raw(),
                    entries: &entries,
                })
            },
            RhiError::LayoutMismatch,
        )?;
        let id = ctx.next_resource_id();
        log::debug!("bind group {} created against layout {}", id, layout.id);
        Ok(Self {
            device: ctx.id,
            id,
            layout_id: layout.id,
            raw,
        })
    }

    pub fn raw(&self) -> &wgpu::BindGroup {
        &self.raw
    }
}

impl BindGroup for WebGpuBindGroup {
    fn id(&self) -> ResourceId {
        self.id
    }

    fn layout_id(&self) -> ResourceId {
        self.layout_id
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
