//! Bind groups on the bindless backend are plain lists of resolved resources; binding one writes
//! them into the pass's per-stage argument tables at the slots [`super::layout`] computes.

use super::buffer::BindlessBuffer;
use super::layout::{self, check_layout_bindings};
use super::native::{Allocation, ArgumentTable};
use super::texture::{BindlessSampler, BindlessTextureView};
use super::{downcast, DeviceContext};
use crate::validate::{check_bind_group_entries, check_layout_entries};
use crate::{
    BindGroup, BindGroupDescriptor, BindGroupLayout, BindGroupLayoutDescriptor,
    BindGroupLayoutEntry, BindingResource, DeviceId, ResourceId, Result, ShaderStages,
};

#[derive(Debug)]
pub struct BindlessBindGroupLayout {
    pub(crate) device: DeviceId,
    id: ResourceId,
    entries: Vec<BindGroupLayoutEntry>,
}

impl BindlessBindGroupLayout {
    pub(crate) fn new(ctx: &DeviceContext, desc: &BindGroupLayoutDescriptor) -> Result<Self> {
        check_layout_entries(&desc.entries)?;
        check_layout_bindings(&desc.entries)?;
        Ok(Self {
            device: ctx.id,
            id: ctx.next_resource_id(),
            entries: desc.entries.clone(),
        })
    }
}

impl BindGroupLayout for BindlessBindGroupLayout {
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

#[derive(Debug, Clone)]
enum BoundResource {
    /// Every frame slot of the buffer; the slot is chosen when the group is bound.
    Buffer { slots: Vec<Allocation>, offset: u64 },
    Texture(u64),
    Sampler(u64),
}

#[derive(Debug, Clone)]
struct BoundEntry {
    binding: u32,
    visibility: ShaderStages,
    resource: BoundResource,
}

#[derive(Debug)]
pub struct BindlessBindGroup {
    pub(crate) device: DeviceId,
    id: ResourceId,
    layout_id: ResourceId,
    entries: Vec<BoundEntry>,
}

impl BindlessBindGroup {
    pub(crate) fn new(ctx: &DeviceContext, desc: &BindGroupDescriptor<'_>) -> Result<Self> {
        let layout: &BindlessBindGroupLayout = downcast(desc.layout.as_any(), "bind group layout")?;
        ctx.check_owner(layout.device, "bind group layout")?;
        check_bind_group_entries(&layout.entries, &desc.entries)?;

        let mut entries = Vec::with_capacity(desc.entries.len());
        for (entry, layout_entry) in desc.entries.iter().zip(&layout.entries) {
            let resource = match entry.resource {
                BindingResource::Buffer { buffer, offset, .. } => {
                    let buffer: &BindlessBuffer = downcast(buffer.as_any(), "buffer")?;
                    ctx.check_owner(buffer.device_context().id, "buffer")?;
                    BoundResource::Buffer {
                        slots: buffer.allocations().to_vec(),
                        offset,
                    }
                }
                BindingResource::TextureView(view) => {
                    let view: &BindlessTextureView = downcast(view.as_any(), "texture view")?;
                    ctx.check_owner(view.device, "texture view")?;
                    BoundResource::Texture(view.resource_id())
                }
                BindingResource::Sampler(sampler) => {
                    let sampler: &BindlessSampler = downcast(sampler.as_any(), "sampler")?;
                    ctx.check_owner(sampler.device_context().id, "sampler")?;
                    BoundResource::Sampler(sampler.resource_id())
                }
            };
            entries.push(BoundEntry {
                binding: entry.binding,
                visibility: layout_entry.visibility,
                resource,
            });
        }
        Ok(Self {
            device: ctx.id,
            id: ctx.next_resource_id(),
            layout_id: layout.id,
            entries,
        })
    }

    /// Write every entry into the tables of the stages it is visible to. `frame_index` picks the
    /// slot of multiplexed buffers.
    pub(crate) fn write_tables(
        &self,
        group: u32,
        frame_index: usize,
        vertex: &mut ArgumentTable,
        fragment: &mut ArgumentTable,
    ) -> Result<()> {
        for entry in &self.entries {
            let mut stages: Vec<&mut ArgumentTable> = Vec::with_capacity(2);
            if entry.visibility.contains(ShaderStages::VERTEX) {
                stages.push(&mut *vertex);
            }
            if entry.visibility.contains(ShaderStages::FRAGMENT) {
                stages.push(&mut *fragment);
            }
            match &entry.resource {
                BoundResource::Buffer { slots, offset } => {
                    let slot = layout::buffer_slot(group, entry.binding)?;
                    let address = slots[frame_index % slots.len()].gpu_address + offset;
                    for table in stages {
                        table.set_address(slot, address)?;
                    }
                }
                BoundResource::Texture(resource_id) => {
                    let slot = layout::texture_slot(group, entry.binding)?;
                    for table in stages {
                        table.set_texture(slot, *resource_id)?;
                    }
                }
                BoundResource::Sampler(sampler_id) => {
                    let slot = layout::sampler_slot(group, entry.binding)?;
                    for table in stages {
                        table.set_sampler(slot, *sampler_id)?;
                    }
                }
            }
        }
        Ok(())
    }
}

impl BindGroup for BindlessBindGroup {
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
