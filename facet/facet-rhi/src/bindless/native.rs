//! Native driver seam for the bindless backend.
//!
//! The traits here mirror the handful of Metal 4 objects the backend drives: a device, a shader
//! compiler, a residency set, per-frame command allocators, a command queue and a shared event.
//! Enum values use the Metal constants so a hardware driver can pass them straight through.
//! [`super::software`] implements the seam on the CPU.

use std::any::Any;
use std::fmt::Debug;
use std::sync::Arc;

use super::layout::{MAX_BUFFER_BINDINGS, MAX_SAMPLER_BINDINGS, MAX_TEXTURE_BINDINGS};
use crate::{Result, RhiError};

pub type AllocationId = u64;

/// One native GPU allocation (buffer or texture).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Allocation {
    pub id: AllocationId,
    /// GPU virtual address for buffers; 0 for textures.
    pub gpu_address: u64,
    pub length: u64,
}

impl Allocation {
    /// Opaque resource id used to bind textures in argument tables.
    pub fn resource_id(&self) -> u64 {
        self.id
    }
}

#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Invalid = 0,
    R8Unorm = 10,
    R16Float = 25,
    Rg8Unorm = 30,
    R32Float = 55,
    Rgba8Unorm = 70,
    Rgba8UnormSrgb = 71,
    Bgra8Unorm = 80,
    Bgra8UnormSrgb = 81,
    Rgba16Float = 115,
    Rgba32Float = 125,
    Depth32Float = 252,
    Depth32FloatStencil8 = 260,
}

#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    Point = 0,
    Line = 1,
    LineStrip = 2,
    Triangle = 3,
    TriangleStrip = 4,
}

#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveTopologyClass {
    Point = 1,
    Line = 2,
    Triangle = 3,
}

#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CullMode {
    None = 0,
    Front = 1,
    Back = 2,
}

#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Winding {
    Clockwise = 0,
    CounterClockwise = 1,
}

#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareFunction {
    Never = 0,
    Less = 1,
    Equal = 2,
    LessEqual = 3,
    Greater = 4,
    NotEqual = 5,
    GreaterEqual = 6,
    Always = 7,
}

#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero = 0,
    One = 1,
    SourceColor = 2,
    OneMinusSourceColor = 3,
    SourceAlpha = 4,
    OneMinusSourceAlpha = 5,
    DestinationColor = 6,
    OneMinusDestinationColor = 7,
    DestinationAlpha = 8,
    OneMinusDestinationAlpha = 9,
    SourceAlphaSaturated = 10,
    BlendColor = 11,
    OneMinusBlendColor = 12,
}

#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendOperation {
    Add = 0,
    Subtract = 1,
    ReverseSubtract = 2,
    Min = 3,
    Max = 4,
}

#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SamplerMinMagFilter {
    Nearest = 0,
    Linear = 1,
}

#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SamplerMipFilter {
    NotMipmapped = 0,
    Nearest = 1,
    Linear = 2,
}

#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SamplerAddressMode {
    ClampToEdge = 0,
    MirrorClampToEdge = 1,
    Repeat = 2,
    MirrorRepeat = 3,
    ClampToZero = 4,
    ClampToBorderColor = 5,
}

#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexFormat {
    UChar4Normalized = 9,
    Half2 = 25,
    Half4 = 27,
    Float = 28,
    Float2 = 29,
    Float3 = 30,
    Float4 = 31,
    UInt = 36,
    UInt2 = 37,
    UInt3 = 38,
    UInt4 = 39,
}

#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexStepFunction {
    Constant = 0,
    PerVertex = 1,
    PerInstance = 2,
}

#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexType {
    UInt16 = 0,
    UInt32 = 1,
}

#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadAction {
    DontCare = 0,
    Load = 1,
    Clear = 2,
}

#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreAction {
    DontCare = 0,
    Store = 1,
}

#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureType {
    Type2D = 2,
    Type2DArray = 3,
    TypeCube = 5,
    Type3D = 7,
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u64 {
        const SHADER_READ = 0x0001;
        const SHADER_WRITE = 0x0002;
        const RENDER_TARGET = 0x0004;
    }
}

bitflags::bitflags! {
    /// Pipeline stages used for argument-table binding and barriers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RenderStages: u64 {
        const VERTEX = 1 << 0;
        const FRAGMENT = 1 << 1;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeTextureDescriptor {
    pub texture_type: TextureType,
    pub pixel_format: PixelFormat,
    pub width: u32,
    pub height: u32,
    /// Depth for 3D textures, array length otherwise (6 per cube).
    pub depth_or_layers: u32,
    pub mipmap_level_count: u32,
    pub usage: TextureUsage,
    pub bytes_per_pixel: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NativeSamplerDescriptor {
    pub min_filter: SamplerMinMagFilter,
    pub mag_filter: SamplerMinMagFilter,
    pub mip_filter: SamplerMipFilter,
    pub s_address_mode: SamplerAddressMode,
    pub t_address_mode: SamplerAddressMode,
    pub r_address_mode: SamplerAddressMode,
    pub lod_min_clamp: f32,
    pub lod_max_clamp: f32,
    pub max_anisotropy: u16,
    pub compare_function: Option<CompareFunction>,
}

/// A compiled shader library and the function names it exports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeLibrary {
    pub id: u64,
    pub functions: Vec<String>,
}

impl NativeLibrary {
    pub fn has_function(&self, name: &str) -> bool {
        self.functions.iter().any(|f| f == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeFunction {
    pub library: u64,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeBlendState {
    pub rgb_blend_operation: BlendOperation,
    pub alpha_blend_operation: BlendOperation,
    pub source_rgb_blend_factor: BlendFactor,
    pub source_alpha_blend_factor: BlendFactor,
    pub destination_rgb_blend_factor: BlendFactor,
    pub destination_alpha_blend_factor: BlendFactor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeColorAttachmentDescriptor {
    pub pixel_format: PixelFormat,
    pub blending: Option<NativeBlendState>,
    /// MTLColorWriteMask bits (R=8, G=4, B=2, A=1).
    pub write_mask: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeVertexBufferLayout {
    pub buffer_index: u32,
    pub stride: u64,
    pub step_function: VertexStepFunction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeVertexAttribute {
    pub location: u32,
    pub format: VertexFormat,
    pub offset: u64,
    pub buffer_index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeRenderPipelineDescriptor {
    pub label: Option<String>,
    pub vertex_function: NativeFunction,
    pub fragment_function: Option<NativeFunction>,
    pub color_attachments: Vec<NativeColorAttachmentDescriptor>,
    pub depth_attachment_pixel_format: PixelFormat,
    pub stencil_attachment_pixel_format: PixelFormat,
    pub vertex_layouts: Vec<NativeVertexBufferLayout>,
    pub vertex_attributes: Vec<NativeVertexAttribute>,
    pub input_primitive_topology: PrimitiveTopologyClass,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeDepthStencilDescriptor {
    pub depth_compare_function: CompareFunction,
    pub depth_write_enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NativeColorTarget {
    pub texture: Allocation,
    pub level: u32,
    pub slice: u32,
    pub pixel_format: PixelFormat,
    pub load_action: LoadAction,
    pub store_action: StoreAction,
    pub clear_color: [f64; 4],
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NativeDepthTarget {
    pub texture: Allocation,
    pub pixel_format: PixelFormat,
    pub load_action: LoadAction,
    pub store_action: StoreAction,
    pub clear_depth: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NativeRenderPassDescriptor {
    pub label: Option<String>,
    pub color_targets: Vec<NativeColorTarget>,
    pub depth_target: Option<NativeDepthTarget>,
    pub render_target_width: u32,
    pub render_target_height: u32,
}

/// Flat per-stage binding table: buffer addresses, texture resource ids and sampler ids indexed by
/// slot number. Unset slots are `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentTable {
    buffers: Vec<Option<u64>>,
    textures: Vec<Option<u64>>,
    samplers: Vec<Option<u64>>,
}

impl Default for ArgumentTable {
    fn default() -> Self {
        Self {
            buffers: vec![None; MAX_BUFFER_BINDINGS as usize],
            textures: vec![None; MAX_TEXTURE_BINDINGS as usize],
            samplers: vec![None; MAX_SAMPLER_BINDINGS as usize],
        }
    }
}

impl ArgumentTable {
    pub fn set_address(&mut self, slot: u32, gpu_address: u64) -> Result<()> {
        Self::set(&mut self.buffers, "buffer", slot, gpu_address)
    }

    pub fn set_texture(&mut self, slot: u32, resource_id: u64) -> Result<()> {
        Self::set(&mut self.textures, "texture", slot, resource_id)
    }

    pub fn set_sampler(&mut self, slot: u32, sampler_id: u64) -> Result<()> {
        Self::set(&mut self.samplers, "sampler", slot, sampler_id)
    }

    fn set(slots: &mut [Option<u64>], kind: &'static str, slot: u32, value: u64) -> Result<()> {
        let entry = slots
            .get_mut(slot as usize)
            .ok_or(RhiError::BindingOutOfRange {
                kind,
                group: u32::MAX,
                binding: slot,
            })?;
        *entry = Some(value);
        Ok(())
    }

    pub fn address(&self, slot: u32) -> Option<u64> {
        self.buffers.get(slot as usize).copied().flatten()
    }

    pub fn texture(&self, slot: u32) -> Option<u64> {
        self.textures.get(slot as usize).copied().flatten()
    }

    pub fn sampler(&self, slot: u32) -> Option<u64> {
        self.samplers.get(slot as usize).copied().flatten()
    }

    /// Occupied buffer slots as (slot, address).
    pub fn bound_addresses(&self) -> impl Iterator<Item = (u32, u64)> + '_ {
        occupied(&self.buffers)
    }

    pub fn bound_textures(&self) -> impl Iterator<Item = (u32, u64)> + '_ {
        occupied(&self.textures)
    }

    pub fn bound_samplers(&self) -> impl Iterator<Item = (u32, u64)> + '_ {
        occupied(&self.samplers)
    }
}

fn occupied(slots: &[Option<u64>]) -> impl Iterator<Item = (u32, u64)> + '_ {
    slots
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.map(|v| (i as u32, v)))
}

/// One encoded GPU command.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeCommand {
    BeginRenderPass(NativeRenderPassDescriptor),
    SetRenderPipelineState(u64),
    SetDepthStencilState(u64),
    SetCullMode(CullMode),
    SetFrontFacingWinding(Winding),
    SetViewport {
        origin_x: f64,
        origin_y: f64,
        width: f64,
        height: f64,
        znear: f64,
        zfar: f64,
    },
    SetScissorRect {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    },
    SetArgumentTable {
        stages: RenderStages,
        table: ArgumentTable,
    },
    DrawPrimitives {
        primitive: PrimitiveType,
        vertex_start: u32,
        vertex_count: u32,
        instance_count: u32,
        base_instance: u32,
    },
    DrawIndexedPrimitives {
        primitive: PrimitiveType,
        index_count: u32,
        index_type: IndexType,
        index_buffer: u64,
        index_buffer_length: u64,
        base_vertex: i32,
        instance_count: u32,
        base_instance: u32,
    },
    /// Work in `before` stages of later passes waits for `after` stages of this pass.
    Barrier {
        after: RenderStages,
        before: RenderStages,
    },
    EndRenderPass,
    CopyBuffer {
        source: u64,
        destination: u64,
        size: u64,
    },
}

/// A finished, committable command buffer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NativeCommandBuffer {
    pub label: Option<String>,
    /// Frame slot whose command allocator backs this buffer.
    pub allocator_index: usize,
    pub commands: Vec<NativeCommand>,
}

/// Native GPU device.
pub trait NativeDevice: Send + Sync + Debug {
    fn name(&self) -> String;
    /// Allocate a shared-storage (CPU-visible) buffer.
    fn new_buffer(&self, length: u64, label: Option<&str>) -> Result<Allocation>;
    fn new_texture(&self, desc: &NativeTextureDescriptor, label: Option<&str>) -> Result<Allocation>;
    /// Returns the sampler's resource id.
    fn new_sampler(&self, desc: &NativeSamplerDescriptor) -> Result<u64>;
    fn release_allocation(&self, allocation: &Allocation);
    fn release_sampler(&self, sampler_id: u64);
    /// Copy into a shared-storage buffer's contents pointer.
    fn write_contents(&self, buffer: &Allocation, offset: u64, data: &[u8]) -> Result<()>;
    fn replace_texture_region(
        &self,
        texture: &Allocation,
        level: u32,
        origin: (u32, u32, u32),
        size: (u32, u32, u32),
        bytes_per_row: u32,
        data: &[u8],
    ) -> Result<()>;
    fn new_compiler(&self) -> Result<Box<dyn NativeCompiler>>;
    fn new_residency_set(&self, label: Option<&str>) -> Result<Box<dyn NativeResidencySet>>;
    fn new_command_allocator(&self) -> Result<Box<dyn NativeCommandAllocator>>;
    fn new_command_queue(&self) -> Result<Box<dyn NativeCommandQueue>>;
    fn new_shared_event(&self) -> Result<Arc<dyn NativeSharedEvent>>;
    fn release(&self);
    fn as_any(&self) -> &dyn Any;
}

pub trait NativeCompiler: Send + Sync + Debug {
    fn new_library(&self, source: &str, label: Option<&str>) -> Result<NativeLibrary>;
    fn new_render_pipeline_state(&self, desc: &NativeRenderPipelineDescriptor) -> Result<u64>;
    fn new_depth_stencil_state(&self, desc: &NativeDepthStencilDescriptor) -> Result<u64>;
    fn release(&self);
}

/// Driver-side residency set. Not synchronized; callers serialize access.
pub trait NativeResidencySet: Send + Sync + Debug {
    fn add_allocation(&self, allocation: &Allocation);
    fn remove_allocation(&self, allocation: &Allocation);
    /// Make pending additions/removals effective for subsequently committed work.
    fn commit(&self);
    fn allocation_count(&self) -> usize;
    fn id(&self) -> u64;
    fn release(&self);
}

pub trait NativeCommandAllocator: Send + Sync + Debug {
    /// Recycle the memory of every command buffer encoded from this allocator.
    fn reset(&self);
    fn release(&self);
}

pub trait NativeCommandQueue: Send + Sync + Debug {
    /// Keep the set's committed allocations resident for all work on this queue.
    fn add_residency_set(&self, set: &dyn NativeResidencySet);
    fn commit(&self, buffers: Vec<NativeCommandBuffer>) -> Result<()>;
    /// Signal `event` with `value` once all previously committed work completes.
    fn signal_event(&self, event: &Arc<dyn NativeSharedEvent>, value: u64) -> Result<()>;
    fn wait_until_idle(&self) -> Result<()>;
    fn release(&self);
}

/// Monotonic GPU-to-CPU timeline value.
pub trait NativeSharedEvent: Send + Sync + Debug {
    fn signaled_value(&self) -> u64;
    fn signal(&self, value: u64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argument_table_slots() {
        let mut table = ArgumentTable::default();
        table.set_address(4, 0x1000).unwrap();
        table.set_texture(0, 7).unwrap();
        assert_eq!(table.address(4), Some(0x1000));
        assert_eq!(table.address(5), None);
        assert_eq!(table.texture(0), Some(7));
        assert_eq!(table.bound_addresses().collect::<Vec<_>>(), vec![(4, 0x1000)]);
        assert!(table.set_sampler(MAX_SAMPLER_BINDINGS, 1).is_err());
    }

    #[test]
    fn metal_constant_values() {
        assert_eq!(PixelFormat::Bgra8Unorm as u64, 80);
        assert_eq!(PixelFormat::Depth32Float as u64, 252);
        assert_eq!(PrimitiveType::Triangle as u64, 3);
        assert_eq!(CompareFunction::LessEqual as u64, 3);
        assert_eq!(SamplerAddressMode::Repeat as u64, 2);
    }
}
