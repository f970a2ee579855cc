//! Command recording: encoders, render passes and finished command buffers.

use std::ops::Range;
use std::sync::Arc;

use parking_lot::Mutex;

use super::binding::BindlessBindGroup;
use super::buffer::BindlessBuffer;
use super::conv;
use super::layout::{vertex_buffer_slot, MAX_BIND_GROUPS};
use super::native::{
    ArgumentTable, NativeColorTarget, NativeCommand, NativeCommandBuffer, NativeDepthTarget,
    NativeRenderPassDescriptor, PrimitiveType, RenderStages,
};
use super::shader::BindlessRenderPipeline;
use super::texture::BindlessTextureView;
use super::{downcast, DeviceContext};
use crate::validate::COPY_BUFFER_ALIGNMENT;
use crate::{
    BindGroup, Buffer, ClearColor, CommandBuffer, CommandEncoder, IndexFormat, PassState,
    RenderPass, RenderPassDescriptor, RenderPipeline, ResourceId, Result, RhiError, ScissorRect,
    TextureView, Viewport,
};

/// Commands recorded so far, shared by an encoder and its open pass.
#[derive(Debug, Default)]
struct Recording {
    commands: Vec<NativeCommand>,
    pass_open: bool,
}

#[derive(Debug)]
pub struct BindlessCommandEncoder {
    ctx: Arc<DeviceContext>,
    allocator_index: usize,
    recording: Arc<Mutex<Recording>>,
}

impl BindlessCommandEncoder {
    pub(crate) fn new(ctx: Arc<DeviceContext>, allocator_index: usize) -> Self {
        Self {
            ctx,
            allocator_index,
            recording: Arc::new(Mutex::new(Recording::default())),
        }
    }

    fn view<'a>(&self, view: &'a dyn TextureView) -> Result<&'a BindlessTextureView> {
        let view: &BindlessTextureView = downcast(view.as_any(), "texture view")?;
        self.ctx.check_owner(view.device, "texture view")?;
        Ok(view)
    }

    fn buffer<'a>(&self, buffer: &'a dyn Buffer) -> Result<&'a BindlessBuffer> {
        let buffer: &BindlessBuffer = downcast(buffer.as_any(), "buffer")?;
        self.ctx.check_owner(buffer.device_context().id, "buffer")?;
        Ok(buffer)
    }
}

impl CommandEncoder for BindlessCommandEncoder {
    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor<'_>) -> Result<Box<dyn RenderPass>> {
        self.ctx.ensure_live()?;
        if self.recording.lock().pass_open {
            return Err(RhiError::InvalidPassState {
                state: PassState::Recording,
                operation: "begin a second render pass",
            });
        }
        if desc.color_attachments.is_empty() && desc.depth_stencil_attachment.is_none() {
            return Err(RhiError::InvalidDescriptor(
                "render pass has no attachments".to_string(),
            ));
        }

        let mut extent = None;
        let mut color_targets = Vec::with_capacity(desc.color_attachments.len());
        for attachment in &desc.color_attachments {
            let view = self.view(attachment.view)?;
            extent.get_or_insert(view.size());
            let clear = attachment.clear_value.unwrap_or(ClearColor::BLACK);
            color_targets.push(NativeColorTarget {
                texture: view.allocation(),
                level: view.base_mip_level(),
                slice: view.base_array_layer(),
                pixel_format: conv::texture_format_to_native(view.format()),
                load_action: conv::load_op_to_native(attachment.load_op),
                store_action: conv::store_op_to_native(attachment.store_op),
                clear_color: [clear.r, clear.g, clear.b, clear.a],
            });
        }
        let depth_target = match &desc.depth_stencil_attachment {
            Some(attachment) => {
                let view = self.view(attachment.view)?;
                extent.get_or_insert(view.size());
                Some(NativeDepthTarget {
                    texture: view.allocation(),
                    pixel_format: conv::texture_format_to_native(view.format()),
                    load_action: conv::load_op_to_native(attachment.depth_load_op),
                    store_action: conv::store_op_to_native(attachment.depth_store_op),
                    clear_depth: attachment.clear_depth as f64,
                })
            }
            None => None,
        };
        let (width, height) = extent.unwrap_or((0, 0));

        // Residency changes must land before the GPU sees the pass's resources.
        self.ctx.residency.commit();

        {
            let mut recording = self.recording.lock();
            recording
                .commands
                .push(NativeCommand::BeginRenderPass(NativeRenderPassDescriptor {
                    label: desc.label.map(str::to_string),
                    color_targets,
                    depth_target,
                    render_target_width: width,
                    render_target_height: height,
                }));
            recording.pass_open = true;
        }
        log::trace!("render pass {:?} begins ({}x{})", desc.label, width, height);
        Ok(Box::new(BindlessRenderPass::new(
            self.ctx.clone(),
            self.recording.clone(),
        )))
    }

    fn copy_buffer_to_buffer(
        &mut self,
        src: &dyn Buffer,
        src_offset: u64,
        dst: &dyn Buffer,
        dst_offset: u64,
        size: u64,
    ) -> Result<()> {
        let src = self.buffer(src)?;
        let dst = self.buffer(dst)?;
        for (what, value) in [("copy size", size), ("source offset", src_offset), ("destination offset", dst_offset)] {
            if value % COPY_BUFFER_ALIGNMENT != 0 {
                return Err(RhiError::Misaligned {
                    what,
                    value,
                    alignment: COPY_BUFFER_ALIGNMENT,
                });
            }
        }
        crate::validate::check_write_range(src_offset, size as usize, src.size())?;
        crate::validate::check_write_range(dst_offset, size as usize, dst.size())?;
        let mut recording = self.recording.lock();
        if recording.pass_open {
            return Err(RhiError::InvalidPassState {
                state: PassState::Recording,
                operation: "copy buffers inside a render pass",
            });
        }
        recording.commands.push(NativeCommand::CopyBuffer {
            source: src.allocation().gpu_address + src_offset,
            destination: dst.allocation().gpu_address + dst_offset,
            size,
        });
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<Box<dyn CommandBuffer>> {
        let mut recording = self.recording.lock();
        if recording.pass_open {
            return Err(RhiError::InvalidPassState {
                state: PassState::Recording,
                operation: "finish the encoder",
            });
        }
        Ok(Box::new(BindlessCommandBuffer {
            device: self.ctx.id,
            native: NativeCommandBuffer {
                label: None,
                allocator_index: self.allocator_index,
                commands: std::mem::take(&mut recording.commands),
            },
        }))
    }
}

#[derive(Debug)]
pub struct BindlessCommandBuffer {
    pub(crate) device: crate::DeviceId,
    native: NativeCommandBuffer,
}

impl BindlessCommandBuffer {
    pub fn native(&self) -> &NativeCommandBuffer {
        &self.native
    }

    pub(crate) fn into_native(self) -> NativeCommandBuffer {
        self.native
    }
}

impl CommandBuffer for BindlessCommandBuffer {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn std::any::Any + Send> {
        self
    }
}

/// Per-stage argument tables, rewritten in place for the lifetime of a pass.
#[derive(Debug, Default)]
struct StageTables {
    vertex: ArgumentTable,
    fragment: ArgumentTable,
    dirty: RenderStages,
}

#[derive(Debug, Clone, Copy)]
struct BoundPipeline {
    primitive: PrimitiveType,
}

#[derive(Debug, Clone, Copy)]
struct BoundIndexBuffer {
    gpu_address: u64,
    length: u64,
    format: IndexFormat,
}

pub struct BindlessRenderPass {
    ctx: Arc<DeviceContext>,
    recording: Arc<Mutex<Recording>>,
    state: PassState,
    tables: Option<StageTables>,
    pipeline: Option<BoundPipeline>,
    pipeline_layouts: Vec<ResourceId>,
    index_buffer: Option<BoundIndexBuffer>,
}

impl std::fmt::Debug for BindlessRenderPass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindlessRenderPass")
            .field("state", &self.state)
            .field("pipeline", &self.pipeline)
            .finish()
    }
}

impl BindlessRenderPass {
    fn new(ctx: Arc<DeviceContext>, recording: Arc<Mutex<Recording>>) -> Self {
        Self {
            ctx,
            recording,
            state: PassState::Recording,
            tables: Some(StageTables::default()),
            pipeline: None,
            pipeline_layouts: Vec::new(),
            index_buffer: None,
        }
    }

    fn push(&self, command: NativeCommand) {
        self.recording.lock().commands.push(command);
    }

    fn tables(&mut self) -> Result<&mut StageTables> {
        let state = self.state;
        self.tables.as_mut().ok_or(RhiError::InvalidPassState {
            state,
            operation: "use argument tables",
        })
    }

    /// Encode snapshots of the tables that changed since the last draw.
    fn flush_tables(&mut self) -> Result<()> {
        let tables = self.tables()?;
        if tables.dirty.is_empty() {
            return Ok(());
        }
        let mut commands = Vec::with_capacity(2);
        if tables.dirty.contains(RenderStages::VERTEX) {
            commands.push(NativeCommand::SetArgumentTable {
                stages: RenderStages::VERTEX,
                table: tables.vertex.clone(),
            });
        }
        if tables.dirty.contains(RenderStages::FRAGMENT) {
            commands.push(NativeCommand::SetArgumentTable {
                stages: RenderStages::FRAGMENT,
                table: tables.fragment.clone(),
            });
        }
        tables.dirty = RenderStages::empty();
        self.recording.lock().commands.extend(commands);
        Ok(())
    }

    fn require_pipeline(&self, operation: &'static str) -> Result<BoundPipeline> {
        self.pipeline.ok_or_else(|| {
            RhiError::InvalidDescriptor(format!("{} without a pipeline", operation))
        })
    }
}

impl RenderPass for BindlessRenderPass {
    fn set_pipeline(&mut self, pipeline: &dyn RenderPipeline) -> Result<()> {
        self.state.ensure_recording("set_pipeline")?;
        let pipeline: &BindlessRenderPipeline = downcast(pipeline.as_any(), "render pipeline")?;
        self.ctx.check_owner(pipeline.device, "render pipeline")?;
        self.push(NativeCommand::SetRenderPipelineState(pipeline.state()));
        if let Some(ds) = pipeline.depth_stencil_state() {
            self.push(NativeCommand::SetDepthStencilState(ds));
        }
        self.push(NativeCommand::SetCullMode(pipeline.cull_mode()));
        self.push(NativeCommand::SetFrontFacingWinding(pipeline.winding()));
        self.pipeline = Some(BoundPipeline {
            primitive: pipeline.primitive(),
        });
        self.pipeline_layouts = pipeline.layout_ids().to_vec();
        Ok(())
    }

    fn set_bind_group(&mut self, index: u32, group: &dyn BindGroup) -> Result<()> {
        self.state.ensure_recording("set_bind_group")?;
        if index >= MAX_BIND_GROUPS {
            return Err(RhiError::BindingOutOfRange {
                kind: "bind group",
                group: index,
                binding: 0,
            });
        }
        let group: &BindlessBindGroup = downcast(group.as_any(), "bind group")?;
        self.ctx.check_owner(group.device, "bind group")?;
        if self.pipeline.is_some() {
            match self.pipeline_layouts.get(index as usize) {
                Some(&expected) if expected == group.layout_id() => {}
                expected => {
                    return Err(RhiError::LayoutMismatch(format!(
                        "pipeline expects layout {:?} at group {}, got {}",
                        expected,
                        index,
                        group.layout_id()
                    )))
                }
            }
        }
        let frame_index = self.ctx.frame.frame_index();
        let tables = self.tables()?;
        group.write_tables(index, frame_index, &mut tables.vertex, &mut tables.fragment)?;
        tables.dirty |= RenderStages::VERTEX | RenderStages::FRAGMENT;
        log::trace!("bind group {} set at index {}", group.id(), index);
        Ok(())
    }

    fn set_vertex_buffer(&mut self, slot: u32, buffer: &dyn Buffer, offset: u64) -> Result<()> {
        self.state.ensure_recording("set_vertex_buffer")?;
        let slot = vertex_buffer_slot(slot)?;
        let buffer: &BindlessBuffer = downcast(buffer.as_any(), "buffer")?;
        self.ctx.check_owner(buffer.device_context().id, "buffer")?;
        if offset >= buffer.size() {
            return Err(RhiError::OutOfBounds {
                offset,
                len: 0,
                size: buffer.size(),
            });
        }
        let address = buffer.allocation().gpu_address + offset;
        let tables = self.tables()?;
        tables.vertex.set_address(slot, address)?;
        tables.dirty |= RenderStages::VERTEX;
        Ok(())
    }

    fn set_index_buffer(&mut self, buffer: &dyn Buffer, offset: u64, format: IndexFormat) -> Result<()> {
        self.state.ensure_recording("set_index_buffer")?;
        let buffer: &BindlessBuffer = downcast(buffer.as_any(), "buffer")?;
        self.ctx.check_owner(buffer.device_context().id, "buffer")?;
        if offset % format.size() != 0 {
            return Err(RhiError::Misaligned {
                what: "index buffer offset",
                value: offset,
                alignment: format.size(),
            });
        }
        if offset >= buffer.size() {
            return Err(RhiError::OutOfBounds {
                offset,
                len: 0,
                size: buffer.size(),
            });
        }
        self.index_buffer = Some(BoundIndexBuffer {
            gpu_address: buffer.allocation().gpu_address + offset,
            length: buffer.size() - offset,
            format,
        });
        Ok(())
    }

    fn set_viewport(&mut self, viewport: Viewport) -> Result<()> {
        self.state.ensure_recording("set_viewport")?;
        self.push(NativeCommand::SetViewport {
            origin_x: viewport.x as f64,
            origin_y: viewport.y as f64,
            width: viewport.width as f64,
            height: viewport.height as f64,
            znear: viewport.min_depth as f64,
            zfar: viewport.max_depth as f64,
        });
        Ok(())
    }

    fn set_scissor_rect(&mut self, rect: ScissorRect) -> Result<()> {
        self.state.ensure_recording("set_scissor_rect")?;
        self.push(NativeCommand::SetScissorRect {
            x: rect.x,
            y: rect.y,
            width: rect.width,
            height: rect.height,
        });
        Ok(())
    }

    fn draw(&mut self, vertices: Range<u32>, instances: Range<u32>) -> Result<()> {
        self.state.ensure_recording("draw")?;
        let pipeline = self.require_pipeline("draw")?;
        self.flush_tables()?;
        self.push(NativeCommand::DrawPrimitives {
            primitive: pipeline.primitive,
            vertex_start: vertices.start,
            vertex_count: vertices.len() as u32,
            instance_count: instances.len() as u32,
            base_instance: instances.start,
        });
        Ok(())
    }

    fn draw_indexed(&mut self, indices: Range<u32>, base_vertex: i32, instances: Range<u32>) -> Result<()> {
        self.state.ensure_recording("draw_indexed")?;
        let pipeline = self.require_pipeline("draw_indexed")?;
        let index = self.index_buffer.ok_or_else(|| {
            RhiError::InvalidDescriptor("draw_indexed without an index buffer".to_string())
        })?;
        let stride = index.format.size();
        let start = indices.start as u64 * stride;
        let len = indices.len() as u64 * stride;
        if start + len > index.length {
            return Err(RhiError::OutOfBounds {
                offset: start,
                len,
                size: index.length,
            });
        }
        self.flush_tables()?;
        self.push(NativeCommand::DrawIndexedPrimitives {
            primitive: pipeline.primitive,
            index_count: indices.len() as u32,
            index_type: conv::index_format_to_native(index.format),
            index_buffer: index.gpu_address + start,
            index_buffer_length: index.length - start,
            base_vertex,
            instance_count: instances.len() as u32,
            base_instance: instances.start,
        });
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        self.state.ensure_recording("end")?;
        let mut recording = self.recording.lock();
        recording.commands.push(NativeCommand::Barrier {
            after: RenderStages::FRAGMENT,
            before: RenderStages::VERTEX | RenderStages::FRAGMENT,
        });
        recording.commands.push(NativeCommand::EndRenderPass);
        recording.pass_open = false;
        self.state = PassState::Ended;
        Ok(())
    }

    fn dispose(&mut self) -> Result<()> {
        match self.state {
            PassState::Recording => Err(RhiError::InvalidPassState {
                state: PassState::Recording,
                operation: "dispose before end",
            }),
            PassState::Ended => {
                self.tables = None;
                self.state = PassState::Disposed;
                Ok(())
            }
            PassState::Disposed => Ok(()),
        }
    }

    fn state(&self) -> PassState {
        self.state
    }
}

impl Drop for BindlessRenderPass {
    fn drop(&mut self) {
        if self.state == PassState::Recording {
            log::warn!("render pass dropped while recording; ending it");
            let _ = self.end();
        }
    }
}
