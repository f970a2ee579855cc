//! MSL shader libraries and render pipeline states.

use std::sync::Arc;

use super::conv;
use super::native::{
    CullMode, NativeColorAttachmentDescriptor, NativeCompiler, NativeDepthStencilDescriptor,
    NativeFunction, NativeLibrary, NativeRenderPipelineDescriptor, NativeVertexAttribute,
    NativeVertexBufferLayout, PixelFormat, PrimitiveType, Winding,
};
use super::{downcast, DeviceContext};
use super::binding::BindlessBindGroupLayout;
use super::layout::{vertex_buffer_slot, MAX_BIND_GROUPS};
use crate::{
    DeviceId, PrimitiveTopology, RenderPipeline, RenderPipelineDescriptor, ResourceId, Result,
    RhiError, ShaderLanguage, ShaderModule, ShaderModuleDescriptor,
};

#[derive(Debug)]
pub struct BindlessShaderModule {
    pub(crate) device: DeviceId,
    id: ResourceId,
    library: NativeLibrary,
}

impl BindlessShaderModule {
    pub(crate) fn new(
        ctx: &DeviceContext,
        compiler: &dyn NativeCompiler,
        desc: &ShaderModuleDescriptor,
    ) -> Result<Self> {
        if desc.source.language != ShaderLanguage::Msl {
            return Err(RhiError::UnsupportedShaderLanguage {
                expected: ShaderLanguage::Msl,
                got: desc.source.language,
            });
        }
        let library = compiler.new_library(&desc.source.code, desc.label)?;
        let id = ctx.next_resource_id();
        log::debug!(
            "shader module {} ({:?}) compiled: {:?}",
            id,
            desc.label,
            library.functions
        );
        Ok(Self {
            device: ctx.id,
            id,
            library,
        })
    }

    pub fn library(&self) -> &NativeLibrary {
        &self.library
    }

    fn function(&self, entry_point: &str) -> Result<NativeFunction> {
        if !self.library.has_function(entry_point) {
            return Err(RhiError::PipelineCreation(format!(
                "entry point '{}' not found (library exports {:?})",
                entry_point, self.library.functions
            )));
        }
        Ok(NativeFunction {
            library: self.library.id,
            name: entry_point.to_string(),
        })
    }
}

impl ShaderModule for BindlessShaderModule {
    fn id(&self) -> ResourceId {
        self.id
    }

    fn language(&self) -> ShaderLanguage {
        ShaderLanguage::Msl
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

#[derive(Debug)]
pub struct BindlessRenderPipeline {
    pub(crate) device: DeviceId,
    id: ResourceId,
    state: u64,
    depth_stencil_state: Option<u64>,
    topology: PrimitiveTopology,
    primitive: PrimitiveType,
    cull_mode: CullMode,
    winding: Winding,
    layout_ids: Vec<ResourceId>,
}

impl BindlessRenderPipeline {
    pub(crate) fn new(
        ctx: &Arc<DeviceContext>,
        compiler: &dyn NativeCompiler,
        desc: &RenderPipelineDescriptor<'_>,
    ) -> Result<Self> {
        if desc.bind_group_layouts.len() > MAX_BIND_GROUPS as usize {
            return Err(RhiError::InvalidDescriptor(format!(
                "{} bind group layouts, at most {} supported",
                desc.bind_group_layouts.len(),
                MAX_BIND_GROUPS
            )));
        }
        let mut layout_ids = Vec::with_capacity(desc.bind_group_layouts.len());
        for layout in &desc.bind_group_layouts {
            let layout: &BindlessBindGroupLayout =
                downcast(layout.as_any(), "bind group layout")?;
            ctx.check_owner(layout.device, "bind group layout")?;
            layout_ids.push(crate::BindGroupLayout::id(layout));
        }

        let vertex_module: &BindlessShaderModule =
            downcast(desc.vertex.module.as_any(), "shader module")?;
        ctx.check_owner(vertex_module.device, "shader module")?;
        let vertex_function = vertex_module.function(desc.vertex.entry_point)?;

        let (fragment_function, color_attachments) = match &desc.fragment {
            Some(fragment) => {
                let module: &BindlessShaderModule =
                    downcast(fragment.module.as_any(), "shader module")?;
                ctx.check_owner(module.device, "shader module")?;
                let attachments = fragment
                    .targets
                    .iter()
                    .map(|target| NativeColorAttachmentDescriptor {
                        pixel_format: conv::texture_format_to_native(target.format),
                        blending: target.blend.as_ref().map(conv::blend_state_to_native),
                        write_mask: conv::color_write_mask_to_native(target.write_mask),
                    })
                    .collect();
                (Some(module.function(fragment.entry_point)?), attachments)
            }
            None => (None, Vec::new()),
        };

        let mut vertex_layouts = Vec::with_capacity(desc.vertex.buffers.len());
        let mut vertex_attributes = Vec::new();
        for (index, buffer) in desc.vertex.buffers.iter().enumerate() {
            let buffer_index = vertex_buffer_slot(index as u32)?;
            vertex_layouts.push(NativeVertexBufferLayout {
                buffer_index,
                stride: buffer.array_stride,
                step_function: conv::step_mode_to_native(buffer.step_mode),
            });
            for attribute in &buffer.attributes {
                if attribute.offset + attribute.format.size() > buffer.array_stride {
                    return Err(RhiError::InvalidDescriptor(format!(
                        "attribute at location {} overruns stride {}",
                        attribute.shader_location, buffer.array_stride
                    )));
                }
                vertex_attributes.push(NativeVertexAttribute {
                    location: attribute.shader_location,
                    format: conv::vertex_format_to_native(attribute.format),
                    offset: attribute.offset,
                    buffer_index,
                });
            }
        }

        let (depth_format, stencil_format) = match &desc.depth_stencil {
            Some(ds) => {
                if !ds.format.is_depth() {
                    return Err(RhiError::InvalidDescriptor(format!(
                        "{:?} is not a depth format",
                        ds.format
                    )));
                }
                let native = conv::texture_format_to_native(ds.format);
                let stencil = if ds.format.has_stencil() {
                    native
                } else {
                    PixelFormat::Invalid
                };
                (native, stencil)
            }
            None => (PixelFormat::Invalid, PixelFormat::Invalid),
        };

        let state = compiler.new_render_pipeline_state(&NativeRenderPipelineDescriptor {
            label: desc.label.map(str::to_string),
            vertex_function,
            fragment_function,
            color_attachments,
            depth_attachment_pixel_format: depth_format,
            stencil_attachment_pixel_format: stencil_format,
            vertex_layouts,
            vertex_attributes,
            input_primitive_topology: conv::topology_class_to_native(desc.primitive.topology),
        })?;
        let depth_stencil_state = desc
            .depth_stencil
            .as_ref()
            .map(|ds| {
                compiler.new_depth_stencil_state(&NativeDepthStencilDescriptor {
                    depth_compare_function: conv::compare_function_to_native(ds.depth_compare),
                    depth_write_enabled: ds.depth_write_enabled,
                })
            })
            .transpose()?;

        let id = ctx.next_resource_id();
        log::debug!("render pipeline {} ({:?}) created", id, desc.label);
        Ok(Self {
            device: ctx.id,
            id,
            state,
            depth_stencil_state,
            topology: desc.primitive.topology,
            primitive: conv::primitive_type_to_native(desc.primitive.topology),
            cull_mode: conv::cull_mode_to_native(desc.primitive.cull_mode),
            winding: conv::winding_to_native(desc.primitive.front_face),
            layout_ids,
        })
    }

    pub fn state(&self) -> u64 {
        self.state
    }

    pub fn depth_stencil_state(&self) -> Option<u64> {
        self.depth_stencil_state
    }

    pub(crate) fn primitive(&self) -> PrimitiveType {
        self.primitive
    }

    pub(crate) fn cull_mode(&self) -> CullMode {
        self.cull_mode
    }

    pub(crate) fn winding(&self) -> Winding {
        self.winding
    }

    /// Layout id expected at each bind-group index.
    pub fn layout_ids(&self) -> &[ResourceId] {
        &self.layout_ids
    }
}

impl RenderPipeline for BindlessRenderPipeline {
    fn id(&self) -> ResourceId {
        self.id
    }

    fn topology(&self) -> PrimitiveTopology {
        self.topology
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
