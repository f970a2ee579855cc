//! The software GPU: a worker thread that executes committed command buffers in order.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use super::memory::{ResidencyView, SoftwareMemory};
use super::SoftwareStats;
use crate::bindless::layout::VERTEX_BUFFER_SLOT_COUNT;
use crate::bindless::native::{
    ArgumentTable, LoadAction, NativeCommand, NativeCommandBuffer, NativeRenderPassDescriptor,
    NativeSharedEvent, PixelFormat, PrimitiveType, RenderStages,
};
use crate::{Result, RhiError};

/// Bytes of each bound buffer captured into the draw log.
pub const CAPTURE_BYTES: u64 = 256;

/// A buffer bound to a draw, with the bytes the draw observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundBuffer {
    pub slot: u32,
    pub gpu_address: u64,
    pub contents: Vec<u8>,
}

/// One draw as the software GPU executed it.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedDraw {
    pub command_buffer: Option<String>,
    pub pipeline: Option<u64>,
    pub primitive: PrimitiveType,
    pub element_count: u32,
    pub instance_count: u32,
    pub indexed: bool,
    /// Vertex buffers in the reserved low slots.
    pub vertex_buffers: Vec<BoundBuffer>,
    /// Bind-group buffers visible to the vertex stage.
    pub vertex_stage_buffers: Vec<BoundBuffer>,
    pub fragment_stage_buffers: Vec<BoundBuffer>,
    /// (slot, resource id), union of both stages.
    pub textures: Vec<(u32, u64)>,
    pub samplers: Vec<(u32, u64)>,
}

impl ExecutedDraw {
    /// Buffer bound at `slot` for the vertex stage, if any.
    pub fn vertex_stage_buffer(&self, slot: u32) -> Option<&BoundBuffer> {
        self.vertex_stage_buffers.iter().find(|b| b.slot == slot)
    }

    pub fn fragment_stage_buffer(&self, slot: u32) -> Option<&BoundBuffer> {
        self.fragment_stage_buffers.iter().find(|b| b.slot == slot)
    }
}

pub(crate) enum Message {
    Execute(Vec<NativeCommandBuffer>),
    Signal(Arc<dyn NativeSharedEvent>, u64),
    Flush(Sender<()>),
    Shutdown,
}

/// Handle to the worker thread. Dropping it drains queued work and joins the thread.
#[derive(Debug)]
pub(crate) struct Timeline {
    sender: Sender<Message>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Timeline {
    pub fn spawn(
        memory: Arc<SoftwareMemory>,
        residency: Arc<ResidencyView>,
        stats: Arc<SoftwareStats>,
        draws: Arc<Mutex<Vec<ExecutedDraw>>>,
        execution_delay: Duration,
    ) -> Result<Self> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let executor = Executor {
            memory,
            residency,
            stats,
            draws,
            execution_delay,
        };
        let worker = std::thread::Builder::new()
            .name("facet-software-gpu".to_string())
            .spawn(move || executor.run(receiver))
            .map_err(|e| RhiError::DeviceCreation(format!("failed to start GPU thread: {}", e)))?;
        Ok(Self {
            sender,
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn send(&self, message: Message) -> Result<()> {
        self.sender
            .send(message)
            .map_err(|_| RhiError::Driver("software GPU timeline has stopped".to_string()))
    }

    /// Block until everything sent so far has executed.
    pub fn flush(&self) -> Result<()> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.send(Message::Flush(tx))?;
        rx.recv()
            .map_err(|_| RhiError::Driver("software GPU timeline has stopped".to_string()))
    }

    pub fn shutdown(&self) {
        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        let _ = self.sender.send(Message::Shutdown);
        if worker.join().is_err() {
            log::warn!("software GPU thread panicked");
        }
    }
}

impl Drop for Timeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Executor {
    memory: Arc<SoftwareMemory>,
    residency: Arc<ResidencyView>,
    stats: Arc<SoftwareStats>,
    draws: Arc<Mutex<Vec<ExecutedDraw>>>,
    execution_delay: Duration,
}

#[derive(Default)]
struct PassContext {
    pass: Option<NativeRenderPassDescriptor>,
    pipeline: Option<u64>,
    vertex_table: ArgumentTable,
    fragment_table: ArgumentTable,
}

impl Executor {
    fn run(self, receiver: Receiver<Message>) {
        log::debug!("software GPU timeline started");
        for message in receiver.iter() {
            match message {
                Message::Execute(buffers) => {
                    for buffer in buffers {
                        if !self.execution_delay.is_zero() {
                            std::thread::sleep(self.execution_delay);
                        }
                        self.execute(&buffer);
                    }
                }
                Message::Signal(event, value) => event.signal(value),
                Message::Flush(done) => {
                    let _ = done.send(());
                }
                Message::Shutdown => break,
            }
        }
        log::debug!("software GPU timeline stopped");
    }

    fn execute(&self, buffer: &NativeCommandBuffer) {
        log::trace!(
            "executing {:?} ({} commands)",
            buffer.label,
            buffer.commands.len()
        );
        self.stats.command_buffers_executed.fetch_add(1, Ordering::Relaxed);
        let mut ctx = PassContext::default();
        for command in &buffer.commands {
            match command {
                NativeCommand::BeginRenderPass(desc) => {
                    self.begin_pass(desc);
                    ctx.pass = Some(desc.clone());
                }
                NativeCommand::EndRenderPass => {
                    ctx = PassContext::default();
                }
                NativeCommand::SetRenderPipelineState(id) => ctx.pipeline = Some(*id),
                NativeCommand::SetArgumentTable { stages, table } => {
                    if stages.contains(RenderStages::VERTEX) {
                        ctx.vertex_table = table.clone();
                    }
                    if stages.contains(RenderStages::FRAGMENT) {
                        ctx.fragment_table = table.clone();
                    }
                }
                NativeCommand::DrawPrimitives {
                    primitive,
                    vertex_count,
                    instance_count,
                    ..
                } => self.draw(buffer, &ctx, *primitive, *vertex_count, *instance_count, false),
                NativeCommand::DrawIndexedPrimitives {
                    primitive,
                    index_count,
                    index_buffer,
                    instance_count,
                    ..
                } => {
                    self.check_address(*index_buffer, "index buffer");
                    self.draw(buffer, &ctx, *primitive, *index_count, *instance_count, true)
                }
                NativeCommand::CopyBuffer {
                    source,
                    destination,
                    size,
                } => self.copy(*source, *destination, *size),
                NativeCommand::SetDepthStencilState(_)
                | NativeCommand::SetCullMode(_)
                | NativeCommand::SetFrontFacingWinding(_)
                | NativeCommand::SetViewport { .. }
                | NativeCommand::SetScissorRect { .. }
                | NativeCommand::Barrier { .. } => {}
            }
        }
        if ctx.pass.is_some() {
            log::warn!("command buffer {:?} ended inside a render pass", buffer.label);
        }
    }

    fn fault(&self, what: &str, detail: String) {
        self.stats.residency_faults.fetch_add(1, Ordering::Relaxed);
        log::error!("residency fault: {} {}", what, detail);
    }

    fn check_allocation(&self, id: u64, what: &str) -> bool {
        if !self.memory.contains(id) {
            self.fault(what, format!("allocation {} was freed", id));
            return false;
        }
        if !self.residency.is_resident(id) {
            self.fault(what, format!("allocation {} is not resident", id));
            return false;
        }
        true
    }

    fn check_address(&self, address: u64, what: &str) -> Option<(u64, u64)> {
        match self.memory.resolve(address) {
            Some((id, offset)) => self.check_allocation(id, what).then_some((id, offset)),
            None => {
                self.fault(what, format!("address {:#x} is not mapped", address));
                None
            }
        }
    }

    fn begin_pass(&self, desc: &NativeRenderPassDescriptor) {
        for target in &desc.color_targets {
            if !self.check_allocation(target.texture.id, "color attachment") {
                continue;
            }
            if target.load_action == LoadAction::Clear {
                match clear_texel(target.pixel_format, target.clear_color) {
                    Some(texel) => {
                        if let Err(e) = self.memory.fill_texture(
                            target.texture.id,
                            target.level,
                            target.slice,
                            &texel,
                        ) {
                            log::error!("clear of color attachment failed: {}", e);
                        }
                    }
                    None => log::debug!("clear of {:?} is not emulated", target.pixel_format),
                }
            }
        }
        if let Some(depth) = &desc.depth_target {
            if self.check_allocation(depth.texture.id, "depth attachment")
                && depth.load_action == LoadAction::Clear
            {
                let texel = (depth.clear_depth as f32).to_le_bytes();
                if let Err(e) = self.memory.fill_texture(depth.texture.id, 0, 0, &texel) {
                    log::error!("clear of depth attachment failed: {}", e);
                }
            }
        }
    }

    fn capture(&self, table: &ArgumentTable, slots: impl Fn(u32) -> bool, what: &str) -> Vec<BoundBuffer> {
        table
            .bound_addresses()
            .filter(|(slot, _)| slots(*slot))
            .map(|(slot, gpu_address)| {
                let contents = self
                    .check_address(gpu_address, what)
                    .and_then(|(id, offset)| self.memory.read(id, offset, CAPTURE_BYTES).ok())
                    .unwrap_or_default();
                BoundBuffer {
                    slot,
                    gpu_address,
                    contents,
                }
            })
            .collect()
    }

    fn draw(
        &self,
        buffer: &NativeCommandBuffer,
        ctx: &PassContext,
        primitive: PrimitiveType,
        element_count: u32,
        instance_count: u32,
        indexed: bool,
    ) {
        if ctx.pass.is_none() {
            log::error!("draw outside a render pass in {:?}", buffer.label);
            return;
        }
        let is_vertex_slot = |slot: u32| slot < VERTEX_BUFFER_SLOT_COUNT;
        let vertex_buffers = self.capture(&ctx.vertex_table, is_vertex_slot, "vertex buffer");
        let vertex_stage_buffers =
            self.capture(&ctx.vertex_table, |s| !is_vertex_slot(s), "vertex-stage buffer");
        let fragment_stage_buffers =
            self.capture(&ctx.fragment_table, |s| !is_vertex_slot(s), "fragment-stage buffer");

        let mut textures: Vec<(u32, u64)> = ctx.vertex_table.bound_textures().collect();
        textures.extend(ctx.fragment_table.bound_textures());
        textures.sort_unstable();
        textures.dedup();
        for &(_, id) in &textures {
            self.check_allocation(id, "texture");
        }
        let mut samplers: Vec<(u32, u64)> = ctx.vertex_table.bound_samplers().collect();
        samplers.extend(ctx.fragment_table.bound_samplers());
        samplers.sort_unstable();
        samplers.dedup();

        log::trace!(
            "draw {:?} x{} ({} elements, indexed={})",
            primitive,
            instance_count,
            element_count,
            indexed
        );
        self.draws.lock().push(ExecutedDraw {
            command_buffer: buffer.label.clone(),
            pipeline: ctx.pipeline,
            primitive,
            element_count,
            instance_count,
            indexed,
            vertex_buffers,
            vertex_stage_buffers,
            fragment_stage_buffers,
            textures,
            samplers,
        });
    }

    fn copy(&self, source: u64, destination: u64, size: u64) {
        let (Some(src), Some(dst)) = (
            self.check_address(source, "copy source"),
            self.check_address(destination, "copy destination"),
        ) else {
            return;
        };
        if let Err(e) = self.memory.copy(src, dst, size) {
            log::error!("buffer copy failed: {}", e);
        }
    }
}

/// Encoded clear texel for formats whose layout the software GPU knows.
fn clear_texel(format: PixelFormat, [r, g, b, a]: [f64; 4]) -> Option<Vec<u8>> {
    let unorm = |v: f64| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
    let float = |v: f64| (v as f32).to_le_bytes();
    match format {
        PixelFormat::R8Unorm => Some(vec![unorm(r)]),
        PixelFormat::Rg8Unorm => Some(vec![unorm(r), unorm(g)]),
        PixelFormat::Rgba8Unorm | PixelFormat::Rgba8UnormSrgb => {
            Some(vec![unorm(r), unorm(g), unorm(b), unorm(a)])
        }
        PixelFormat::Bgra8Unorm | PixelFormat::Bgra8UnormSrgb => {
            Some(vec![unorm(b), unorm(g), unorm(r), unorm(a)])
        }
        PixelFormat::R32Float => Some(float(r).to_vec()),
        PixelFormat::Rgba32Float => Some([float(r), float(g), float(b), float(a)].concat()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bgra_clear_swizzles() {
        assert_eq!(
            clear_texel(PixelFormat::Bgra8Unorm, [1.0, 0.0, 0.5, 1.0]),
            Some(vec![128, 0, 255, 255])
        );
        assert_eq!(
            clear_texel(PixelFormat::R32Float, [0.25, 0.0, 0.0, 0.0]),
            Some(0.25f32.to_le_bytes().to_vec())
        );
        assert_eq!(clear_texel(PixelFormat::Rgba16Float, [0.0; 4]), None);
    }
}
