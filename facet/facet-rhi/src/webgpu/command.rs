//! Command recording on `wgpu` encoders and render passes.

use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::binding::WebGpuBindGroup;
use super::buffer::WebGpuBuffer;
use super::shader::WebGpuRenderPipeline;
use super::texture::WebGpuTextureView;
use super::{conv, downcast, WebGpuContext, MAX_BIND_GROUPS, MAX_VERTEX_BUFFERS};
use crate::validate::{check_write_range, COPY_BUFFER_ALIGNMENT};
use crate::{
    BindGroup, Buffer, CommandBuffer, CommandEncoder, DeviceId, IndexFormat, PassState,
    RenderPass, RenderPassDescriptor, RenderPipeline, ResourceId, Result, RhiError, ScissorRect,
    TextureView, Viewport,
};

#[derive(Debug)]
pub struct WebGpuCommandEncoder {
    ctx: Arc<WebGpuContext>,
    raw: wgpu::CommandEncoder,
    /// Set while a pass borrowed from `raw` is recording.
    pass_open: Arc<AtomicBool>,
}

impl WebGpuCommandEncoder {
    pub(crate) fn new(ctx: Arc<WebGpuContext>) -> Self {
        let raw = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
        Self {
            ctx,
            raw,
            pass_open: Arc::new(AtomicBool::new(false)),
        }
    }

    fn view<'a>(&self, view: &'a dyn TextureView) -> Result<&'a WebGpuTextureView> {
        let view: &WebGpuTextureView = downcast(view.as_any(), "texture view")?;
        self.ctx.check_owner(view.device, "texture view")?;
        Ok(view)
    }

    fn buffer<'a>(&self, buffer: &'a dyn Buffer) -> Result<&'a WebGpuBuffer> {
        let buffer: &WebGpuBuffer = downcast(buffer.as_any(), "buffer")?;
        self.ctx.check_owner(buffer.device, "buffer")?;
        buffer.ensure_live()?;
        Ok(buffer)
    }

    fn ensure_no_pass(&self, operation: &'static str) -> Result<()> {
        if self.pass_open.load(Ordering::Acquire) {
            return Err(RhiError::InvalidPassState {
                state: PassState::Recording,
                operation,
            });
        }
        Ok(())
    }
}

impl CommandEncoder for WebGpuCommandEncoder {
    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor<'_>) -> Result<Box<dyn RenderPass>> {
        self.ctx.ensure_live()?;
        self.ensure_no_pass("begin a second render pass")?;
        if desc.color_attachments.is_empty() && desc.depth_stencil_attachment.is_none() {
            return Err(RhiError::InvalidDescriptor(
                "render pass has no attachments".to_string(),
            ));
        }

        let mut extent = None;
        let mut color_attachments = Vec::with_capacity(desc.color_attachments.len());
        for attachment in &desc.color_attachments {
            let view = self.view(attachment.view)?;
            extent.get_or_insert(view.size());
            color_attachments.push(Some(wgpu::RenderPassColorAttachment {
                view: view.raw(),
                resolve_target: None,
                ops: wgpu::Operations {
                    load: conv::color_load_op_to_wgpu(attachment.load_op, attachment.clear_value),
                    store: conv::store_op_to_wgpu(attachment.store_op),
                },
            }));
        }
        let depth_stencil_attachment = match &desc.depth_stencil_attachment {
            Some(attachment) => {
                let view = self.view(attachment.view)?;
                extent.get_or_insert(view.size());
                Some(wgpu::RenderPassDepthStencilAttachment {
                    view: view.raw(),
                    depth_ops: Some(wgpu::Operations {
                        load: conv::depth_load_op_to_wgpu(
                            attachment.depth_load_op,
                            attachment.clear_depth,
                        ),
                        store: conv::store_op_to_wgpu(attachment.depth_store_op),
                    }),
                    stencil_ops: None,
                })
            }
            None => None,
        };
        let extent = extent.unwrap_or((0, 0));

        let raw = self
            .raw
            .begin_render_pass(&wgpu::RenderPassDescriptor {
                label: desc.label,
                color_attachments: &color_attachments,
                depth_stencil_attachment,
                timestamp_writes: None,
                occlusion_query_set: None,
            })
            .forget_lifetime();
        self.pass_open.store(true, Ordering::Release);
        log::trace!("render pass {:?} begins ({}x{})", desc.label, extent.0, extent.1);
        Ok(Box::new(WebGpuRenderPass::new(
            self.ctx.id,
            raw,
            self.pass_open.clone(),
            extent,
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
        self.ensure_no_pass("copy buffers inside a render pass")?;
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
        check_write_range(src_offset, size as usize, src.size())?;
        check_write_range(dst_offset, size as usize, dst.size())?;
        self.raw
            .copy_buffer_to_buffer(src.raw(), src_offset, dst.raw(), dst_offset, size);
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<Box<dyn CommandBuffer>> {
        self.ensure_no_pass("finish the encoder")?;
        let device = self.ctx.id;
        Ok(Box::new(WebGpuCommandBuffer {
            device,
            raw: self.raw.finish(),
        }))
    }
}

#[derive(Debug)]
pub struct WebGpuCommandBuffer {
    pub(crate) device: DeviceId,
    raw: wgpu::CommandBuffer,
}

impl WebGpuCommandBuffer {
    pub(crate) fn into_raw(self) -> wgpu::CommandBuffer {
        self.raw
    }
}

impl CommandBuffer for WebGpuCommandBuffer {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn std::any::Any + Send> {
        self
    }
}

#[derive(Debug, Clone, Copy)]
struct BoundIndexBuffer {
    length: u64,
    format: IndexFormat,
}

pub struct WebGpuRenderPass {
    device: DeviceId,
    raw: Option<wgpu::RenderPass<'static>>,
    state: PassState,
    pass_open: Arc<AtomicBool>,
    target_extent: (u32, u32),
    pipeline_layouts: Option<Vec<ResourceId>>,
    bound_groups: [Option<ResourceId>; MAX_BIND_GROUPS as usize],
    index_buffer: Option<BoundIndexBuffer>,
}

impl std::fmt::Debug for WebGpuRenderPass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebGpuRenderPass")
            .field("state", &self.state)
            .field("target_extent", &self.target_extent)
            .field("bound_groups", &self.bound_groups)
            .finish()
    }
}

impl WebGpuRenderPass {
    fn new(
        device: DeviceId,
        raw: wgpu::RenderPass<'static>,
        pass_open: Arc<AtomicBool>,
        target_extent: (u32, u32),
    ) -> Self {
        Self {
            device,
            raw: Some(raw),
            state: PassState::Recording,
            pass_open,
            target_extent,
            pipeline_layouts: None,
            bound_groups: [None; MAX_BIND_GROUPS as usize],
            index_buffer: None,
        }
    }

    fn check_owner(&self, owner: DeviceId, what: &'static str) -> Result<()> {
        if owner != self.device {
            return Err(RhiError::ForeignResource(what));
        }
        Ok(())
    }

    fn raw(&mut self, operation: &'static str) -> Result<&mut wgpu::RenderPass<'static>> {
        let state = self.state;
        self.raw
            .as_mut()
            .ok_or(RhiError::InvalidPassState { state, operation })
    }

    fn buffer<'a>(&self, buffer: &'a dyn Buffer) -> Result<&'a WebGpuBuffer> {
        let buffer: &WebGpuBuffer = downcast(buffer.as_any(), "buffer")?;
        self.check_owner(buffer.device, "buffer")?;
        buffer.ensure_live()?;
        Ok(buffer)
    }

    /// Every group the pipeline declares must be bound with its layout before a draw.
    fn check_draw_state(&self, operation: &'static str) -> Result<()> {
        let layouts = self.pipeline_layouts.as_ref().ok_or_else(|| {
            RhiError::InvalidDescriptor(format!("{} without a pipeline", operation))
        })?;
        for (index, expected) in layouts.iter().enumerate() {
            match self.bound_groups[index] {
                Some(bound) if bound == *expected => {}
                Some(bound) => {
                    return Err(RhiError::LayoutMismatch(format!(
                        "pipeline expects layout {} at group {}, got {}",
                        expected, index, bound
                    )))
                }
                None => {
                    return Err(RhiError::LayoutMismatch(format!(
                        "{} with no bind group at index {}",
                        operation, index
                    )))
                }
            }
        }
        Ok(())
    }
}

impl RenderPass for WebGpuRenderPass {
    fn set_pipeline(&mut self, pipeline: &dyn RenderPipeline) -> Result<()> {
        self.state.ensure_recording("set_pipeline")?;
        let pipeline: &WebGpuRenderPipeline = downcast(pipeline.as_any(), "render pipeline")?;
        self.check_owner(pipeline.device, "render pipeline")?;
        self.raw("set_pipeline")?.set_pipeline(pipeline.raw());
        self.pipeline_layouts = Some(pipeline.layout_ids().to_vec());
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
        let group: &WebGpuBindGroup = downcast(group.as_any(), "bind group")?;
        self.check_owner(group.device, "bind group")?;
        if let Some(layouts) = &self.pipeline_layouts {
            match layouts.get(index as usize) {
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
        self.raw("set_bind_group")?
            .set_bind_group(index, group.raw(), &[]);
        self.bound_groups[index as usize] = Some(group.layout_id());
        log::trace!("bind group {} set at index {}", group.id(), index);
        Ok(())
    }

    fn set_vertex_buffer(&mut self, slot: u32, buffer: &dyn Buffer, offset: u64) -> Result<()> {
        self.state.ensure_recording("set_vertex_buffer")?;
        if slot >= MAX_VERTEX_BUFFERS {
            return Err(RhiError::BindingOutOfRange {
                kind: "vertex buffer",
                group: 0,
                binding: slot,
            });
        }
        let buffer = self.buffer(buffer)?;
        if offset >= buffer.size() {
            return Err(RhiError::OutOfBounds {
                offset,
                len: 0,
                size: buffer.size(),
            });
        }
        let slice = buffer.raw().slice(offset..);
        self.raw("set_vertex_buffer")?.set_vertex_buffer(slot, slice);
        Ok(())
    }

    fn set_index_buffer(&mut self, buffer: &dyn Buffer, offset: u64, format: IndexFormat) -> Result<()> {
        self.state.ensure_recording("set_index_buffer")?;
        let buffer = self.buffer(buffer)?;
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
        let slice = buffer.raw().slice(offset..);
        let length = buffer.size() - offset;
        self.raw("set_index_buffer")?
            .set_index_buffer(slice, conv::index_format_to_wgpu(format));
        self.index_buffer = Some(BoundIndexBuffer { length, format });
        Ok(())
    }

    fn set_viewport(&mut self, viewport: Viewport) -> Result<()> {
        self.state.ensure_recording("set_viewport")?;
        if viewport.width <= 0.0
            || viewport.height <= 0.0
            || !(0.0..=1.0).contains(&viewport.min_depth)
            || !(0.0..=1.0).contains(&viewport.max_depth)
            || viewport.min_depth > viewport.max_depth
        {
            return Err(RhiError::InvalidDescriptor(format!("viewport {:?}", viewport)));
        }
        self.raw("set_viewport")?.set_viewport(
            viewport.x,
            viewport.y,
            viewport.width,
            viewport.height,
            viewport.min_depth,
            viewport.max_depth,
        );
        Ok(())
    }

    fn set_scissor_rect(&mut self, rect: ScissorRect) -> Result<()> {
        self.state.ensure_recording("set_scissor_rect")?;
        let (width, height) = self.target_extent;
        if rect.x as u64 + rect.width as u64 > width as u64
            || rect.y as u64 + rect.height as u64 > height as u64
        {
            return Err(RhiError::InvalidDescriptor(format!(
                "scissor {:?} outside the {}x{} target",
                rect, width, height
            )));
        }
        self.raw("set_scissor_rect")?
            .set_scissor_rect(rect.x, rect.y, rect.width, rect.height);
        Ok(())
    }

    fn draw(&mut self, vertices: Range<u32>, instances: Range<u32>) -> Result<()> {
        self.state.ensure_recording("draw")?;
        self.check_draw_state("draw")?;
        self.raw("draw")?.draw(vertices, instances);
        Ok(())
    }

    fn draw_indexed(&mut self, indices: Range<u32>, base_vertex: i32, instances: Range<u32>) -> Result<()> {
        self.state.ensure_recording("draw_indexed")?;
        self.check_draw_state("draw_indexed")?;
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
        self.raw("draw_indexed")?
            .draw_indexed(indices, base_vertex, instances);
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        self.state.ensure_recording("end")?;
        // Dropping the wgpu pass records its end on the encoder.
        self.raw = None;
        self.pass_open.store(false, Ordering::Release);
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
                self.pipeline_layouts = None;
                self.index_buffer = None;
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

impl Drop for WebGpuRenderPass {
    fn drop(&mut self) {
        if self.state == PassState::Recording {
            log::warn!("render pass dropped while recording; ending it");
            let _ = self.end();
        }
    }
}
