//! WGSL shader modules and render pipelines.

use std::borrow::Cow;

use super::binding::WebGpuBindGroupLayout;
use super::{conv, downcast, WebGpuContext, MAX_BIND_GROUPS, MAX_VERTEX_BUFFERS};
use crate::{
    DeviceId, PrimitiveTopology, RenderPipeline, RenderPipelineDescriptor, ResourceId, Result,
    RhiError, ShaderLanguage, ShaderModule, ShaderModuleDescriptor,
};

#[derive(Debug)]
pub struct WebGpuShaderModule {
    pub(crate) device: DeviceId,
    id: ResourceId,
    raw: wgpu::ShaderModule,
}

impl WebGpuShaderModule {
    /// Compile WGSL; parse and validation errors come back as [`RhiError::ShaderCompilation`].
    pub(crate) fn new(ctx: &WebGpuContext, desc: &ShaderModuleDescriptor) -> Result<Self> {
        if desc.source.language != ShaderLanguage::Wgsl {
            return Err(RhiError::UnsupportedShaderLanguage {
                expected: ShaderLanguage::Wgsl,
                got: desc.source.language,
            });
        }
        let raw = ctx.validated(
            |device| {
                device.create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: desc.label,
                    source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(&desc.source.code)),
                })
            },
            RhiError::ShaderCompilation,
        )?;
        let id = ctx.next_resource_id();
        log::debug!("shader module {} created: {:?}", id, desc.label);
        Ok(Self {
            device: ctx.id,
            id,
            raw,
        })
    }

    pub fn raw(&self) -> &wgpu::ShaderModule {
        &self.raw
    }
}

impl ShaderModule for WebGpuShaderModule {
    fn id(&self) -> ResourceId {
        self.id
    }

    fn language(&self) -> ShaderLanguage {
        ShaderLanguage::Wgsl
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

#[derive(Debug)]
pub struct WebGpuRenderPipeline {
    pub(crate) device: DeviceId,
    id: ResourceId,
    raw: wgpu::RenderPipeline,
    topology: PrimitiveTopology,
    layout_ids: Vec<ResourceId>,
}

impl WebGpuRenderPipeline {
    pub(crate) fn new(ctx: &WebGpuContext, desc: &RenderPipelineDescriptor<'_>) -> Result<Self> {
        if desc.bind_group_layouts.len() > MAX_BIND_GROUPS as usize {
            return Err(RhiError::InvalidDescriptor(format!(
                "{} bind group layouts, at most {}",
                desc.bind_group_layouts.len(),
                MAX_BIND_GROUPS
            )));
        }
        if desc.vertex.buffers.len() > MAX_VERTEX_BUFFERS as usize {
            return Err(RhiError::InvalidDescriptor(format!(
                "{} vertex buffers, at most {}",
                desc.vertex.buffers.len(),
                MAX_VERTEX_BUFFERS
            )));
        }
        let vertex: &WebGpuShaderModule = downcast(desc.vertex.module.as_any(), "shader module")?;
        ctx.check_owner(vertex.device, "shader module")?;
        let fragment = match &desc.fragment {
            Some(state) => {
                let module: &WebGpuShaderModule = downcast(state.module.as_any(), "shader module")?;
                ctx.check_owner(module.device, "shader module")?;
                Some((module, state))
            }
            None => None,
        };
        let mut layouts = Vec::with_capacity(desc.bind_group_layouts.len());
        for layout in &desc.bind_group_layouts {
            let layout: &WebGpuBindGroupLayout = downcast(layout.as_any(), "bind group layout")?;
            ctx.check_owner(layout.device, "bind group layout")?;
            layouts.push(layout);
        }

        let pipeline_layout = ctx.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: desc.label,
            bind_group_layouts: &layouts.iter().map(|l| l.raw()).collect::<Vec<_>>(),
            push_constant_ranges: &[],
        });
        let attributes: Vec<Vec<wgpu::VertexAttribute>> = desc
            .vertex
            .buffers
            .iter()
            .map(|buffer| {
                buffer
                    .attributes
                    .iter()
                    .map(|a| wgpu::VertexAttribute {
                        format: conv::vertex_format_to_wgpu(a.format),
                        offset: a.offset,
                        shader_location: a.shader_location,
                    })
                    .collect()
            })
            .collect();
        let buffers: Vec<wgpu::VertexBufferLayout<'_>> = desc
            .vertex
            .buffers
            .iter()
            .zip(&attributes)
            .map(|(buffer, attributes)| wgpu::VertexBufferLayout {
                array_stride: buffer.array_stride,
                step_mode: conv::step_mode_to_wgpu(buffer.step_mode),
                attributes,
            })
            .collect();
        let targets: Vec<Option<wgpu::ColorTargetState>> = fragment
            .map(|(_, state)| {
                state
                    .targets
                    .iter()
                    .map(|t| {
                        Some(wgpu::ColorTargetState {
                            format: conv::texture_format_to_wgpu(t.format),
                            blend: t.blend.as_ref().map(conv::blend_state_to_wgpu),
                            write_mask: conv::color_writes_to_wgpu(t.write_mask),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        let depth_stencil = desc.depth_stencil.map(|ds| wgpu::DepthStencilState {
            format: conv::texture_format_to_wgpu(ds.format),
            depth_write_enabled: ds.depth_write_enabled,
            depth_compare: conv::compare_function_to_wgpu(ds.depth_compare),
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        });

        let raw = ctx.validated(
            |device| {
                device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                    label: desc.label,
                    layout: Some(&pipeline_layout),
                    vertex: wgpu::VertexState {
                        module: vertex.raw(),
                        entry_point: Some(desc.vertex.entry_point),
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                        buffers: &buffers,
                    },
                    primitive: wgpu::PrimitiveState {
                        topology: conv::topology_to_wgpu(desc.primitive.topology),
                        strip_index_format: None,
                        front_face: conv::front_face_to_wgpu(desc.primitive.front_face),
                        cull_mode: conv::cull_mode_to_wgpu(desc.primitive.cull_mode),
                        unclipped_depth: false,
                        polygon_mode: wgpu::PolygonMode::Fill,
                        conservative: false,
                    },
                    depth_stencil,
                    multisample: wgpu::MultisampleState::default(),
                    fragment: fragment.map(|(module, state)| wgpu::FragmentState {
                        module: module.raw(),
                        entry_point: Some(state.entry_point),
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                        targets: &targets,
                    }),
                    multiview: None,
                    cache: None,
                })
            },
            RhiError::PipelineCreation,
        )?;
        let id = ctx.next_resource_id();
        log::debug!("render pipeline {} created: {:?}", id, desc.label);
        Ok(Self {
            device: ctx.id,
            id,
            raw,
            topology: desc.primitive.topology,
            layout_ids: layouts.iter().map(|l| l.id).collect(),
        })
    }

    pub fn raw(&self) -> &wgpu::RenderPipeline {
        &self.raw
    }

    /// Layout expected at each bind-group index.
    pub fn layout_ids(&self) -> &[ResourceId] {
        &self.layout_ids
    }
}

impl RenderPipeline for WebGpuRenderPipeline {
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
