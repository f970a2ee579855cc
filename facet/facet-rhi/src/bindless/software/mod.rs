//! CPU implementation of the native driver seam.
//!
//! Memory is a heap of byte vectors addressed by fake GPU virtual addresses. Command buffers run on
//! a dedicated timeline thread, which records every draw (with the bytes its bound buffers held at
//! execution time) and counts accesses to allocations that were not resident.

mod memory;
mod timeline;

pub use timeline::{BoundBuffer, ExecutedDraw, CAPTURE_BYTES};

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use self::memory::{ResidencyView, SoftwareMemory};
use self::timeline::{Message, Timeline};
use super::native::{
    Allocation, AllocationId, NativeCommandAllocator, NativeCommandBuffer, NativeCommandQueue,
    NativeCompiler, NativeDepthStencilDescriptor, NativeDevice, NativeLibrary,
    NativeRenderPipelineDescriptor, NativeResidencySet, NativeSamplerDescriptor, NativeSharedEvent,
    NativeTextureDescriptor, PixelFormat,
};
use crate::{Result, RhiError};

/// Knobs for the software driver.
#[derive(Debug, Clone)]
pub struct SoftwareConfig {
    pub name: String,
    /// Sleep before executing each command buffer, to make the GPU lag the CPU.
    pub execution_delay: Duration,
}

impl Default for SoftwareConfig {
    fn default() -> Self {
        Self {
            name: "Facet Software GPU".to_string(),
            execution_delay: Duration::ZERO,
        }
    }
}

/// Counters observable from tests and tools.
#[derive(Debug, Default)]
pub struct SoftwareStats {
    pub residency_commits: AtomicU64,
    pub residency_faults: AtomicU64,
    pub allocator_resets: AtomicU64,
    pub command_buffers_executed: AtomicU64,
}

/// Software GPU device.
pub struct SoftwareDevice {
    config: SoftwareConfig,
    memory: Arc<SoftwareMemory>,
    residency: Arc<ResidencyView>,
    stats: Arc<SoftwareStats>,
    draws: Arc<Mutex<Vec<ExecutedDraw>>>,
    timeline: Arc<Timeline>,
    /// Names of native objects in the order they were released.
    release_log: Arc<Mutex<Vec<&'static str>>>,
    released: AtomicBool,
}

impl std::fmt::Debug for SoftwareDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftwareDevice")
            .field("name", &self.config.name)
            .field("live_allocations", &self.memory.live_count())
            .finish()
    }
}

impl SoftwareDevice {
    pub fn new(config: SoftwareConfig) -> Result<Self> {
        let memory = Arc::new(SoftwareMemory::default());
        let residency = Arc::new(ResidencyView::default());
        let stats = Arc::new(SoftwareStats::default());
        let draws = Arc::new(Mutex::new(Vec::new()));
        let timeline = Arc::new(Timeline::spawn(
            memory.clone(),
            residency.clone(),
            stats.clone(),
            draws.clone(),
            config.execution_delay,
        )?);
        log::info!("software GPU '{}' started", config.name);
        Ok(Self {
            config,
            memory,
            residency,
            stats,
            draws,
            timeline,
            release_log: Arc::new(Mutex::new(Vec::new())),
            released: AtomicBool::new(false),
        })
    }

    /// Read back buffer contents. Call after the GPU is idle to see completed writes.
    pub fn read_buffer(&self, buffer: &Allocation, offset: u64, len: u64) -> Result<Vec<u8>> {
        self.memory.read(buffer.id, offset, len)
    }

    /// Tightly packed texels of one slice of one mip level.
    pub fn read_texture(&self, texture: &Allocation, level: u32, slice: u32) -> Result<Vec<u8>> {
        self.memory.read_texture(texture.id, level, slice)
    }

    pub fn executed_draws(&self) -> Vec<ExecutedDraw> {
        self.draws.lock().clone()
    }

    pub fn take_executed_draws(&self) -> Vec<ExecutedDraw> {
        std::mem::take(&mut *self.draws.lock())
    }

    pub fn stats(&self) -> &SoftwareStats {
        &self.stats
    }

    pub fn residency_faults(&self) -> u64 {
        self.stats.residency_faults.load(Ordering::Relaxed)
    }

    pub fn residency_commits(&self) -> u64 {
        self.stats.residency_commits.load(Ordering::Relaxed)
    }

    pub fn allocator_resets(&self) -> u64 {
        self.stats.allocator_resets.load(Ordering::Relaxed)
    }

    pub fn live_allocations(&self) -> usize {
        self.memory.live_count()
    }

    pub fn is_live(&self, allocation: &Allocation) -> bool {
        self.memory.contains(allocation.id)
    }

    pub fn release_log(&self) -> Vec<&'static str> {
        self.release_log.lock().clone()
    }

    fn log_release(&self, what: &'static str) {
        self.release_log.lock().push(what);
    }
}

impl NativeDevice for SoftwareDevice {
    fn name(&self) -> String {
        self.config.name.clone()
    }

    fn new_buffer(&self, length: u64, label: Option<&str>) -> Result<Allocation> {
        if length == 0 {
            return Err(RhiError::Driver("zero-length buffer".to_string()));
        }
        Ok(self.memory.alloc_buffer(length, label))
    }

    fn new_texture(&self, desc: &NativeTextureDescriptor, label: Option<&str>) -> Result<Allocation> {
        if desc.pixel_format == PixelFormat::Invalid || desc.width == 0 || desc.height == 0 {
            return Err(RhiError::Driver(format!(
                "cannot allocate texture {:?}",
                desc
            )));
        }
        Ok(self.memory.alloc_texture(desc, label))
    }

    fn new_sampler(&self, desc: &NativeSamplerDescriptor) -> Result<u64> {
        if !(1..=16).contains(&desc.max_anisotropy) {
            return Err(RhiError::Driver(format!(
                "max anisotropy {} outside 1..=16",
                desc.max_anisotropy
            )));
        }
        Ok(self.memory.next_id())
    }

    fn release_allocation(&self, allocation: &Allocation) {
        if !self.memory.free(allocation.id) {
            log::warn!("double release of allocation {}", allocation.id);
        }
    }

    fn release_sampler(&self, _sampler_id: u64) {}

    fn write_contents(&self, buffer: &Allocation, offset: u64, data: &[u8]) -> Result<()> {
        self.memory.write(buffer.id, offset, data)
    }

    fn replace_texture_region(
        &self,
        texture: &Allocation,
        level: u32,
        origin: (u32, u32, u32),
        size: (u32, u32, u32),
        bytes_per_row: u32,
        data: &[u8],
    ) -> Result<()> {
        self.memory
            .replace_region(texture.id, level, origin, size, bytes_per_row, data)
    }

    fn new_compiler(&self) -> Result<Box<dyn NativeCompiler>> {
        Ok(Box::new(SoftwareCompiler {
            memory: self.memory.clone(),
            libraries: Mutex::new(HashMap::new()),
            release_log: self.release_log.clone(),
        }))
    }

    fn new_residency_set(&self, label: Option<&str>) -> Result<Box<dyn NativeResidencySet>> {
        let id = self.memory.next_id();
        log::debug!("residency set {} ({:?}) created", id, label);
        Ok(Box::new(SoftwareResidencySet {
            id,
            members: Mutex::new(HashSet::new()),
            view: self.residency.clone(),
            stats: self.stats.clone(),
            release_log: self.release_log.clone(),
        }))
    }

    fn new_command_allocator(&self) -> Result<Box<dyn NativeCommandAllocator>> {
        Ok(Box::new(SoftwareCommandAllocator {
            stats: self.stats.clone(),
            release_log: self.release_log.clone(),
        }))
    }

    fn new_command_queue(&self) -> Result<Box<dyn NativeCommandQueue>> {
        Ok(Box::new(SoftwareCommandQueue {
            timeline: self.timeline.clone(),
            residency: self.residency.clone(),
            residency_sets: Mutex::new(Vec::new()),
            released: AtomicBool::new(false),
            release_log: self.release_log.clone(),
        }))
    }

    fn new_shared_event(&self) -> Result<Arc<dyn NativeSharedEvent>> {
        Ok(Arc::new(SoftwareSharedEvent::default()))
    }

    fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        self.timeline.shutdown();
        let leaked = self.memory.live_count();
        if leaked > 0 {
            log::warn!("software GPU released with {} live allocations", leaked);
        }
        self.log_release("device");
        log::info!("software GPU '{}' released", self.config.name);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Compiles MSL by checking its structure and collecting the stage functions it declares.
#[derive(Debug)]
struct SoftwareCompiler {
    memory: Arc<SoftwareMemory>,
    libraries: Mutex<HashMap<u64, Vec<String>>>,
    release_log: Arc<Mutex<Vec<&'static str>>>,
}

fn is_ident(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Names of functions declared with a `vertex`, `fragment` or `kernel` qualifier.
fn stage_functions(source: &str) -> Vec<String> {
    let mut names = Vec::new();
    for qualifier in ["vertex", "fragment", "kernel"] {
        for (pos, _) in source.match_indices(qualifier) {
            if source[..pos].chars().next_back().is_some_and(is_ident) {
                continue;
            }
            let rest = &source[pos + qualifier.len()..];
            if !rest.starts_with(char::is_whitespace) {
                continue;
            }
            let Some(paren) = rest.find('(') else {
                continue;
            };
            let head = rest[..paren].trim_end();
            if head.contains([';', '{', '}']) {
                continue;
            }
            let name = head.rsplit(|c: char| !is_ident(c)).next().unwrap_or_default();
            if !name.is_empty() && !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
    }
    names
}

impl SoftwareCompiler {
    fn check_function(&self, library: u64, name: &str) -> Result<()> {
        let libraries = self.libraries.lock();
        let functions = libraries.get(&library).ok_or_else(|| {
            RhiError::PipelineCreation(format!("library {} is unknown", library))
        })?;
        if !functions.iter().any(|f| f == name) {
            return Err(RhiError::PipelineCreation(format!(
                "function '{}' not found in library {} (has {:?})",
                name, library, functions
            )));
        }
        Ok(())
    }
}

impl NativeCompiler for SoftwareCompiler {
    fn new_library(&self, source: &str, label: Option<&str>) -> Result<NativeLibrary> {
        if source.trim().is_empty() {
            return Err(RhiError::ShaderCompilation("empty source".to_string()));
        }
        let mut depth: i64 = 0;
        for (line, text) in source.lines().enumerate() {
            for c in text.chars() {
                match c {
                    '{' => depth += 1,
                    '}' => depth -= 1,
                    _ => {}
                }
                if depth < 0 {
                    return Err(RhiError::ShaderCompilation(format!(
                        "{}: line {}: unexpected '}}'",
                        label.unwrap_or("<library>"),
                        line + 1
                    )));
                }
            }
        }
        if depth != 0 {
            return Err(RhiError::ShaderCompilation(format!(
                "{}: expected '}}' at end of input",
                label.unwrap_or("<library>")
            )));
        }
        let functions = stage_functions(source);
        if functions.is_empty() {
            return Err(RhiError::ShaderCompilation(format!(
                "{}: no vertex, fragment or kernel function",
                label.unwrap_or("<library>")
            )));
        }
        let id = self.memory.next_id();
        self.libraries.lock().insert(id, functions.clone());
        Ok(NativeLibrary { id, functions })
    }

    fn new_render_pipeline_state(&self, desc: &NativeRenderPipelineDescriptor) -> Result<u64> {
        self.check_function(desc.vertex_function.library, &desc.vertex_function.name)?;
        if let Some(fragment) = &desc.fragment_function {
            self.check_function(fragment.library, &fragment.name)?;
        }
        if desc
            .color_attachments
            .iter()
            .any(|a| a.pixel_format == PixelFormat::Invalid)
        {
            return Err(RhiError::PipelineCreation(
                "color attachment has an invalid pixel format".to_string(),
            ));
        }
        for attribute in &desc.vertex_attributes {
            if !desc
                .vertex_layouts
                .iter()
                .any(|l| l.buffer_index == attribute.buffer_index)
            {
                return Err(RhiError::PipelineCreation(format!(
                    "attribute {} reads buffer {} which has no layout",
                    attribute.location, attribute.buffer_index
                )));
            }
        }
        Ok(self.memory.next_id())
    }

    fn new_depth_stencil_state(&self, _desc: &NativeDepthStencilDescriptor) -> Result<u64> {
        Ok(self.memory.next_id())
    }

    fn release(&self) {
        self.libraries.lock().clear();
        self.release_log.lock().push("compiler");
    }
}

#[derive(Debug)]
struct SoftwareResidencySet {
    id: u64,
    members: Mutex<HashSet<AllocationId>>,
    view: Arc<ResidencyView>,
    stats: Arc<SoftwareStats>,
    release_log: Arc<Mutex<Vec<&'static str>>>,
}

impl NativeResidencySet for SoftwareResidencySet {
    fn add_allocation(&self, allocation: &Allocation) {
        self.members.lock().insert(allocation.id);
    }

    fn remove_allocation(&self, allocation: &Allocation) {
        self.members.lock().remove(&allocation.id);
    }

    fn commit(&self) {
        self.view.publish(self.id, self.members.lock().clone());
        self.stats.residency_commits.fetch_add(1, Ordering::Relaxed);
    }

    fn allocation_count(&self) -> usize {
        self.members.lock().len()
    }

    fn id(&self) -> u64 {
        self.id
    }

    fn release(&self) {
        self.view.detach(self.id);
        self.members.lock().clear();
        self.release_log.lock().push("residency_set");
    }
}

#[derive(Debug)]
struct SoftwareCommandAllocator {
    stats: Arc<SoftwareStats>,
    release_log: Arc<Mutex<Vec<&'static str>>>,
}

impl NativeCommandAllocator for SoftwareCommandAllocator {
    fn reset(&self) {
        self.stats.allocator_resets.fetch_add(1, Ordering::Relaxed);
    }

    fn release(&self) {
        self.release_log.lock().push("command_allocator");
    }
}

#[derive(Debug)]
struct SoftwareCommandQueue {
    timeline: Arc<Timeline>,
    residency: Arc<ResidencyView>,
    residency_sets: Mutex<Vec<u64>>,
    released: AtomicBool,
    release_log: Arc<Mutex<Vec<&'static str>>>,
}

impl SoftwareCommandQueue {
    fn ensure_live(&self) -> Result<()> {
        if self.released.load(Ordering::Acquire) {
            return Err(RhiError::Disposed("command queue"));
        }
        Ok(())
    }
}

impl NativeCommandQueue for SoftwareCommandQueue {
    fn add_residency_set(&self, set: &dyn NativeResidencySet) {
        self.residency.attach(set.id());
        self.residency_sets.lock().push(set.id());
    }

    fn commit(&self, buffers: Vec<NativeCommandBuffer>) -> Result<()> {
        self.ensure_live()?;
        self.timeline.send(Message::Execute(buffers))
    }

    fn signal_event(&self, event: &Arc<dyn NativeSharedEvent>, value: u64) -> Result<()> {
        self.ensure_live()?;
        self.timeline.send(Message::Signal(event.clone(), value))
    }

    fn wait_until_idle(&self) -> Result<()> {
        self.ensure_live()?;
        self.timeline.flush()
    }

    fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(e) = self.timeline.flush() {
            log::warn!("queue release: {}", e);
        }
        for set in self.residency_sets.lock().drain(..) {
            self.residency.detach(set);
        }
        self.release_log.lock().push("command_queue");
    }
}

#[derive(Debug, Default)]
struct SoftwareSharedEvent {
    value: AtomicU64,
}

impl NativeSharedEvent for SoftwareSharedEvent {
    fn signaled_value(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }

    fn signal(&self, value: u64) {
        self.value.fetch_max(value, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bindless::native::NativeFunction;

    const TRIANGLE_MSL: &str = r#"
        #include <metal_stdlib>
        using namespace metal;
        struct VOut { float4 position [[position]]; };
        vertex VOut vs_main(uint vid [[vertex_id]], constant float4x4& mvp [[buffer(4)]]) {
            VOut out;
            out.position = mvp * float4(0.0, 0.0, 0.0, 1.0);
            return out;
        }
        fragment float4 fs_main(VOut in [[stage_in]]) { return float4(1.0); }
    "#;

    #[test]
    fn stage_functions_are_found() {
        assert_eq!(stage_functions(TRIANGLE_MSL), vec!["vs_main", "fs_main"]);
        assert!(stage_functions("float helper(float x) { return x; }").is_empty());
    }

    #[test]
    fn compiler_reports_diagnostics() {
        let device = SoftwareDevice::new(SoftwareConfig::default()).unwrap();
        let compiler = device.new_compiler().unwrap();
        assert!(matches!(
            compiler.new_library("", None),
            Err(RhiError::ShaderCompilation(_))
        ));
        assert!(matches!(
            compiler.new_library("vertex float4 f() {", Some("broken")),
            Err(RhiError::ShaderCompilation(msg)) if msg.contains("broken")
        ));
        let library = compiler.new_library(TRIANGLE_MSL, None).unwrap();
        assert!(library.has_function("vs_main"));

        let desc = NativeRenderPipelineDescriptor {
            label: None,
            vertex_function: NativeFunction {
                library: library.id,
                name: "missing".to_string(),
            },
            fragment_function: None,
            color_attachments: Vec::new(),
            depth_attachment_pixel_format: PixelFormat::Invalid,
            stencil_attachment_pixel_format: PixelFormat::Invalid,
            vertex_layouts: Vec::new(),
            vertex_attributes: Vec::new(),
            input_primitive_topology: crate::bindless::native::PrimitiveTopologyClass::Triangle,
        };
        assert!(matches!(
            compiler.new_render_pipeline_state(&desc),
            Err(RhiError::PipelineCreation(_))
        ));
        device.release();
    }

    #[test]
    fn shared_event_only_moves_forward() {
        let event = SoftwareSharedEvent::default();
        event.signal(3);
        event.signal(2);
        assert_eq!(event.signaled_value(), 3);
    }

    #[test]
    fn queue_signals_after_committed_work() {
        let device = SoftwareDevice::new(SoftwareConfig {
            execution_delay: Duration::from_millis(5),
            ..Default::default()
        })
        .unwrap();
        let queue = device.new_command_queue().unwrap();
        let event = device.new_shared_event().unwrap();
        queue.commit(vec![NativeCommandBuffer::default()]).unwrap();
        queue.signal_event(&event, 1).unwrap();
        queue.wait_until_idle().unwrap();
        assert_eq!(event.signaled_value(), 1);
        assert_eq!(device.stats().command_buffers_executed.load(Ordering::Relaxed), 1);
        queue.release();
        assert!(matches!(
            queue.commit(Vec::new()),
            Err(RhiError::Disposed(_))
        ));
        device.release();
        assert_eq!(device.release_log(), vec!["command_queue", "device"]);
    }
}
