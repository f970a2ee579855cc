//! Facet RHI: Backend-agnostic Rendering Hardware Interface.
//! This crate defines the traits and types a renderer uses to drive either a WebGPU-style
//! descriptor-set backend or a Metal-style bindless backend without knowing which one it got.

use std::any::Any;
use std::fmt::Debug;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub mod error;
pub mod frame;
pub mod registry;
pub mod surface;
pub mod typed;
pub mod validate;

pub mod bindless;
#[cfg(feature = "webgpu")]
pub mod webgpu;

pub use error::{Result, RhiError};
pub use frame::{FrameCounter, MAX_FRAMES_IN_FLIGHT};
pub use registry::{DeviceConstructor, DeviceDescriptor, DeviceRegistry, PowerPreference};
pub use surface::{SurfaceTarget, WindowPlatform};
pub use typed::TypedBuffer;

pub use bindless::BindlessDevice;
#[cfg(feature = "webgpu")]
pub use webgpu::WebGpuDevice;

/// Unique identifier for a GPU resource, unique per device.
pub type ResourceId = u64;

/// Identifies the device that created a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId(u64);

impl DeviceId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        DeviceId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Which native programming model a device drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// Per-draw descriptor binding through native bind-group objects (wgpu).
    WebGpu,
    /// Flat argument tables, explicit residency and frame pacing (Metal-style).
    Bindless,
}

/// Shading language of a [`ShaderSource`]. Each backend accepts exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderLanguage {
    Wgsl,
    Msl,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterInfo {
    pub name: String,
    pub backend: Backend,
    /// Native API or driver the backend sits on (e.g. "Vulkan", "software").
    pub driver: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Buffer sizes are rounded up to, and write offsets must respect, this alignment.
    pub copy_buffer_alignment: u64,
    pub max_bind_groups: u32,
    pub max_vertex_buffers: u32,
    pub frames_in_flight: usize,
}

bitflags::bitflags! {
    /// Buffer usage flags; combine for buffers used in multiple ways (e.g. Vertex | CopyDst).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        const VERTEX = 1 << 0;
        const INDEX = 1 << 1;
        const UNIFORM = 1 << 2;
        const STORAGE = 1 << 3;
        const COPY_SRC = 1 << 4;
        const COPY_DST = 1 << 5;
        const INDIRECT = 1 << 6;
        const MAP_READ = 1 << 7;
        const MAP_WRITE = 1 << 8;
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct TextureUsage: u32 {
        const COPY_SRC = 1 << 0;
        const COPY_DST = 1 << 1;
        const TEXTURE_BINDING = 1 << 2;
        const STORAGE_BINDING = 1 << 3;
        const RENDER_ATTACHMENT = 1 << 4;
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShaderStages: u32 {
        const VERTEX = 1 << 0;
        const FRAGMENT = 1 << 1;
        const COMPUTE = 1 << 2;
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ColorWrites: u32 {
        const RED = 1 << 0;
        const GREEN = 1 << 1;
        const BLUE = 1 << 2;
        const ALPHA = 1 << 3;
        const ALL = Self::RED.bits() | Self::GREEN.bits() | Self::BLUE.bits() | Self::ALPHA.bits();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    R8Unorm,
    Rg8Unorm,
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    R16Float,
    R32Float,
    Rgba16Float,
    Rgba32Float,
    Depth32Float,
    Depth24PlusStencil8,
}

impl TextureFormat {
    /// Size of one texel in bytes.
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            TextureFormat::R8Unorm => 1,
            TextureFormat::Rg8Unorm | TextureFormat::R16Float => 2,
            TextureFormat::Rgba8Unorm
            | TextureFormat::Rgba8UnormSrgb
            | TextureFormat::Bgra8Unorm
            | TextureFormat::Bgra8UnormSrgb
            | TextureFormat::R32Float
            | TextureFormat::Depth32Float
            | TextureFormat::Depth24PlusStencil8 => 4,
            TextureFormat::Rgba16Float => 8,
            TextureFormat::Rgba32Float => 16,
        }
    }

    pub fn is_depth(self) -> bool {
        matches!(
            self,
            TextureFormat::Depth32Float | TextureFormat::Depth24PlusStencil8
        )
    }

    pub fn has_stencil(self) -> bool {
        matches!(self, TextureFormat::Depth24PlusStencil8)
    }
}

/// Texture dimension / type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum TextureDimension {
    #[default]
    D2,
    D2Array,
    D3,
    Cube,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum TextureViewDimension {
    #[default]
    D2,
    D2Array,
    D3,
    Cube,
}

impl From<TextureDimension> for TextureViewDimension {
    fn from(d: TextureDimension) -> Self {
        match d {
            TextureDimension::D2 => TextureViewDimension::D2,
            TextureDimension::D2Array => TextureViewDimension::D2Array,
            TextureDimension::D3 => TextureViewDimension::D3,
            TextureDimension::Cube => TextureViewDimension::Cube,
        }
    }
}

/// The core device trait that all backends must implement.
///
/// A device is the single owner and factory of every other resource. Resources from one device
/// must never be handed to another; factories reject them with [`RhiError::ForeignResource`].
pub trait Device: Send + Sync + Debug {
    fn backend(&self) -> Backend;
    fn adapter_info(&self) -> AdapterInfo;
    /// The only shading language [`Device::create_shader_module`] accepts.
    fn shader_language(&self) -> ShaderLanguage;
    fn limits(&self) -> Limits;

    /// Allocate a buffer. Fails if `desc.size` is zero; the size is rounded up to
    /// [`Limits::copy_buffer_alignment`].
    fn create_buffer(&self, desc: &BufferDescriptor) -> Result<Box<dyn Buffer>>;
    /// Allocate a buffer sized to `desc.contents` and upload the contents immediately.
    fn create_buffer_init(&self, desc: &BufferInitDescriptor<'_>) -> Result<Box<dyn Buffer>>;
    fn create_texture(&self, desc: &TextureDescriptor) -> Result<Box<dyn Texture>>;
    fn create_sampler(&self, desc: &SamplerDescriptor) -> Result<Box<dyn Sampler>>;
    /// Compile a shader. A source whose language is not [`Device::shader_language`] is rejected.
    fn create_shader_module(&self, desc: &ShaderModuleDescriptor) -> Result<Box<dyn ShaderModule>>;
    fn create_bind_group_layout(
        &self,
        desc: &BindGroupLayoutDescriptor,
    ) -> Result<Box<dyn BindGroupLayout>>;
    /// Create a bind group. Entries must match the layout's entries in count, order and kind.
    fn create_bind_group(&self, desc: &BindGroupDescriptor<'_>) -> Result<Box<dyn BindGroup>>;
    fn create_render_pipeline(
        &self,
        desc: &RenderPipelineDescriptor<'_>,
    ) -> Result<Box<dyn RenderPipeline>>;

    /// Begin a recording scope. On a frame-paced backend the first encoder of a frame waits until
    /// the GPU has released this frame slot and resets the slot's command allocator.
    fn create_command_encoder(&self) -> Result<Box<dyn CommandEncoder>>;

    /// The device's queue. The handle is shared: [`Queue::dispose`] on it is a no-op and the real
    /// release happens in [`Device::dispose`].
    fn queue(&self) -> Arc<dyn Queue>;

    /// The presentable surface, if the device was created with a [`SurfaceTarget`].
    fn surface(&self) -> Option<Arc<dyn Surface>>;

    /// Number of frames ended so far.
    fn frame_counter(&self) -> u64;

    /// End the current frame without presenting (headless rendering). [`Surface::present`] ends
    /// the frame itself.
    fn end_frame(&self) -> Result<()>;

    /// Wait for all submitted work to complete.
    fn wait_idle(&self) -> Result<()>;

    /// Wait for the GPU, then release queue, surface, allocator pool, compiler, residency set and
    /// the native device in that order. Idempotent; never panics.
    fn dispose(&self);

    fn as_any(&self) -> &dyn Any;
}

/// Queue for submitting work and uploading texture data.
pub trait Queue: Send + Sync + Debug {
    /// Submit finished command buffers in order. Does not block.
    fn submit(&self, command_buffers: Vec<Box<dyn CommandBuffer>>) -> Result<()>;

    /// Upload `data` into a texture region.
    fn write_texture(
        &self,
        texture: &dyn Texture,
        mip_level: u32,
        origin: (u32, u32, u32),
        data: &[u8],
        layout: TextureDataLayout,
        size: (u32, u32, u32),
    ) -> Result<()>;

    /// Queues handed out by [`Device::queue`] are borrowed; disposing them does nothing.
    fn dispose(&self) {
        log::debug!("ignoring dispose of a borrowed queue");
    }

    fn as_any(&self) -> &dyn Any;
}

#[derive(Debug, Clone)]
pub struct BufferDescriptor {
    pub label: Option<&'static str>,
    pub size: u64,
    pub usage: BufferUsage,
}

impl Default for BufferDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            size: 0,
            usage: BufferUsage::VERTEX,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BufferInitDescriptor<'a> {
    pub label: Option<&'static str>,
    pub contents: &'a [u8],
    pub usage: BufferUsage,
}

pub trait Buffer: Send + Sync + Debug {
    fn id(&self) -> ResourceId;
    /// Allocated size in bytes (after alignment rounding).
    fn size(&self) -> u64;
    fn usage(&self) -> BufferUsage;
    /// Number of native allocations behind this buffer (N for frame-multiplexed buffers).
    fn slot_count(&self) -> usize {
        1
    }

    /// Copy `data` into the buffer at `offset`. Frame-multiplexed buffers replicate the write into
    /// every slot. Writing past `size() - offset` fails with [`RhiError::OutOfBounds`].
    fn update_data(&self, queue: &dyn Queue, offset: u64, data: &[u8]) -> Result<()>;

    /// GPU virtual address of the current frame's slot, on backends with direct GPU addressing.
    /// Re-query every frame.
    fn gpu_address(&self) -> Option<u64> {
        None
    }

    /// Release the native allocation(s). Idempotent.
    fn dispose(&self);
    fn is_disposed(&self) -> bool;
    fn as_any(&self) -> &dyn Any;
}

#[derive(Debug, Clone)]
pub struct TextureDescriptor {
    pub label: Option<&'static str>,
    /// (width, height, depth_or_layers). For 2D: depth=1. For 2DArray: depth=array_layers. For 3D: depth=depth.
    pub size: (u32, u32, u32),
    pub format: TextureFormat,
    pub usage: TextureUsage,
    pub dimension: TextureDimension,
    pub mip_level_count: u32,
}

impl Default for TextureDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            size: (1, 1, 1),
            format: TextureFormat::Rgba8Unorm,
            usage: TextureUsage::empty(),
            dimension: TextureDimension::D2,
            mip_level_count: 1,
        }
    }
}

pub trait Texture: Send + Sync + Debug {
    fn id(&self) -> ResourceId;
    fn format(&self) -> TextureFormat;
    fn size(&self) -> (u32, u32, u32);
    fn dimension(&self) -> TextureDimension;
    fn mip_level_count(&self) -> u32;
    fn usage(&self) -> TextureUsage;
    /// False for textures borrowed from a surface; disposing those never frees the image.
    fn is_owned(&self) -> bool {
        true
    }
    fn create_view(&self, desc: &TextureViewDescriptor) -> Result<Box<dyn TextureView>>;
    fn dispose(&self);
    fn as_any(&self) -> &dyn Any;
}

#[derive(Debug, Clone, Default)]
pub struct TextureViewDescriptor {
    pub label: Option<&'static str>,
    /// None = texture's format.
    pub format: Option<TextureFormat>,
    /// None = derived from the texture's dimension.
    pub dimension: Option<TextureViewDimension>,
    pub base_mip_level: u32,
    /// None = all remaining levels.
    pub mip_level_count: Option<u32>,
    pub base_array_layer: u32,
    pub array_layer_count: Option<u32>,
}

/// Typed window into a texture's mip/array range. Does not own the texture.
pub trait TextureView: Send + Sync + Debug {
    fn texture_id(&self) -> ResourceId;
    fn format(&self) -> TextureFormat;
    /// Size of the view's base mip level.
    fn size(&self) -> (u32, u32);
    fn dimension(&self) -> TextureViewDimension;
    fn as_any(&self) -> &dyn Any;
}

/// Filter mode for sampler min/mag/mip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum FilterMode {
    #[default]
    Nearest,
    Linear,
}

/// Address mode for sampler U/V/W.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum AddressMode {
    #[default]
    Repeat,
    MirrorRepeat,
    ClampToEdge,
    ClampToBorder,
}

#[derive(Debug, Clone)]
pub struct SamplerDescriptor {
    pub label: Option<&'static str>,
    pub min_filter: FilterMode,
    pub mag_filter: FilterMode,
    pub mipmap_filter: FilterMode,
    pub address_mode_u: AddressMode,
    pub address_mode_v: AddressMode,
    pub address_mode_w: AddressMode,
    pub lod_min_clamp: f32,
    pub lod_max_clamp: f32,
    /// Comparison samplers (shadow maps).
    pub compare: Option<CompareFunction>,
    /// 1..=16; None disables anisotropic filtering.
    pub anisotropy_clamp: Option<u16>,
}

impl Default for SamplerDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            min_filter: FilterMode::Linear,
            mag_filter: FilterMode::Linear,
            mipmap_filter: FilterMode::Nearest,
            address_mode_u: AddressMode::Repeat,
            address_mode_v: AddressMode::Repeat,
            address_mode_w: AddressMode::Repeat,
            lod_min_clamp: 0.0,
            lod_max_clamp: 32.0,
            compare: None,
            anisotropy_clamp: None,
        }
    }
}

pub trait Sampler: Send + Sync + Debug {
    fn id(&self) -> ResourceId;
    fn as_any(&self) -> &dyn Any;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderSource {
    pub language: ShaderLanguage,
    pub code: String,
}

impl ShaderSource {
    pub fn wgsl(code: impl Into<String>) -> Self {
        Self {
            language: ShaderLanguage::Wgsl,
            code: code.into(),
        }
    }

    pub fn msl(code: impl Into<String>) -> Self {
        Self {
            language: ShaderLanguage::Msl,
            code: code.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ShaderModuleDescriptor {
    pub label: Option<&'static str>,
    pub source: ShaderSource,
}

pub trait ShaderModule: Send + Sync + Debug {
    fn id(&self) -> ResourceId;
    fn language(&self) -> ShaderLanguage;
    fn as_any(&self) -> &dyn Any;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureSampleType {
    Float { filterable: bool },
    Depth,
    Uint,
    Sint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SamplerBindingType {
    Filtering,
    NonFiltering,
    Comparison,
}

/// Resource kind plus kind-specific sub-type of one bind-group layout entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingType {
    UniformBuffer,
    StorageBuffer {
        read_only: bool,
    },
    Texture {
        sample_type: TextureSampleType,
        view_dimension: TextureViewDimension,
        multisampled: bool,
    },
    Sampler(SamplerBindingType),
}

/// Coarse resource kind, used to check bind groups against their layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKind {
    Buffer,
    Texture,
    Sampler,
}

impl BindingType {
    pub fn kind(&self) -> BindingKind {
        match self {
            BindingType::UniformBuffer | BindingType::StorageBuffer { .. } => BindingKind::Buffer,
            BindingType::Texture { .. } => BindingKind::Texture,
            BindingType::Sampler(_) => BindingKind::Sampler,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindGroupLayoutEntry {
    pub binding: u32,
    pub visibility: ShaderStages,
    pub ty: BindingType,
}

#[derive(Debug, Clone, Default)]
pub struct BindGroupLayoutDescriptor {
    pub label: Option<&'static str>,
    pub entries: Vec<BindGroupLayoutEntry>,
}

/// Ordered, immutable list of binding-slot descriptors.
pub trait BindGroupLayout: Send + Sync + Debug {
    fn id(&self) -> ResourceId;
    fn entries(&self) -> &[BindGroupLayoutEntry];
    fn as_any(&self) -> &dyn Any;
}

#[derive(Debug, Clone, Copy)]
pub enum BindingResource<'a> {
    Buffer {
        buffer: &'a dyn Buffer,
        offset: u64,
        /// None = rest of the buffer.
        size: Option<u64>,
    },
    TextureView(&'a dyn TextureView),
    Sampler(&'a dyn Sampler),
}

impl BindingResource<'_> {
    pub fn kind(&self) -> BindingKind {
        match self {
            BindingResource::Buffer { .. } => BindingKind::Buffer,
            BindingResource::TextureView(_) => BindingKind::Texture,
            BindingResource::Sampler(_) => BindingKind::Sampler,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BindGroupEntry<'a> {
    pub binding: u32,
    pub resource: BindingResource<'a>,
}

#[derive(Debug, Clone)]
pub struct BindGroupDescriptor<'a> {
    pub label: Option<&'static str>,
    pub layout: &'a dyn BindGroupLayout,
    pub entries: Vec<BindGroupEntry<'a>>,
}

/// Concrete set of resource bindings conforming to one [`BindGroupLayout`].
pub trait BindGroup: Send + Sync + Debug {
    fn id(&self) -> ResourceId;
    fn layout_id(&self) -> ResourceId;
    fn as_any(&self) -> &dyn Any;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum VertexFormat {
    Float32,
    Float32x2,
    #[default]
    Float32x3,
    Float32x4,
    Uint32,
    Uint32x2,
    Uint32x3,
    Uint32x4,
    Unorm8x4,
    Float16x2,
    Float16x4,
}

impl VertexFormat {
    pub fn size(self) -> u64 {
        match self {
            VertexFormat::Float32 | VertexFormat::Uint32 => 4,
            VertexFormat::Unorm8x4 | VertexFormat::Float16x2 => 4,
            VertexFormat::Float32x2 | VertexFormat::Uint32x2 | VertexFormat::Float16x4 => 8,
            VertexFormat::Float32x3 | VertexFormat::Uint32x3 => 12,
            VertexFormat::Float32x4 | VertexFormat::Uint32x4 => 16,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum VertexStepMode {
    #[default]
    Vertex,
    Instance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexAttribute {
    pub format: VertexFormat,
    pub offset: u64,
    pub shader_location: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexBufferLayout {
    pub array_stride: u64,
    pub step_mode: VertexStepMode,
    pub attributes: Vec<VertexAttribute>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    LineStrip,
    #[default]
    TriangleList,
    TriangleStrip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum CullMode {
    #[default]
    None,
    Front,
    Back,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum FrontFace {
    #[default]
    CounterClockwise,
    Clockwise,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PrimitiveState {
    pub topology: PrimitiveTopology,
    pub front_face: FrontFace,
    pub cull_mode: CullMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareFunction {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    Src,
    OneMinusSrc,
    SrcAlpha,
    OneMinusSrcAlpha,
    Dst,
    OneMinusDst,
    DstAlpha,
    OneMinusDstAlpha,
    SrcAlphaSaturated,
    Constant,
    OneMinusConstant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendOperation {
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlendComponent {
    pub src_factor: BlendFactor,
    pub dst_factor: BlendFactor,
    pub operation: BlendOperation,
}

impl BlendComponent {
    pub const REPLACE: Self = Self {
        src_factor: BlendFactor::One,
        dst_factor: BlendFactor::Zero,
        operation: BlendOperation::Add,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlendState {
    pub color: BlendComponent,
    pub alpha: BlendComponent,
}

impl BlendState {
    pub const ALPHA_BLENDING: Self = Self {
        color: BlendComponent {
            src_factor: BlendFactor::SrcAlpha,
            dst_factor: BlendFactor::OneMinusSrcAlpha,
            operation: BlendOperation::Add,
        },
        alpha: BlendComponent {
            src_factor: BlendFactor::One,
            dst_factor: BlendFactor::OneMinusSrcAlpha,
            operation: BlendOperation::Add,
        },
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorTargetState {
    pub format: TextureFormat,
    pub blend: Option<BlendState>,
    pub write_mask: ColorWrites,
}

impl From<TextureFormat> for ColorTargetState {
    fn from(format: TextureFormat) -> Self {
        Self {
            format,
            blend: None,
            write_mask: ColorWrites::ALL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthStencilState {
    pub format: TextureFormat,
    pub depth_write_enabled: bool,
    pub depth_compare: CompareFunction,
}

#[derive(Debug, Clone)]
pub struct VertexState<'a> {
    pub module: &'a dyn ShaderModule,
    pub entry_point: &'a str,
    pub buffers: Vec<VertexBufferLayout>,
}

#[derive(Debug, Clone)]
pub struct FragmentState<'a> {
    pub module: &'a dyn ShaderModule,
    pub entry_point: &'a str,
    pub targets: Vec<ColorTargetState>,
}

/// Descriptor for creating a render pipeline.
/// `bind_group_layouts[i]` is the layout expected at bind-group index `i`.
#[derive(Debug, Clone)]
pub struct RenderPipelineDescriptor<'a> {
    pub label: Option<&'static str>,
    pub vertex: VertexState<'a>,
    pub fragment: Option<FragmentState<'a>>,
    pub primitive: PrimitiveState,
    pub depth_stencil: Option<DepthStencilState>,
    pub bind_group_layouts: Vec<&'a dyn BindGroupLayout>,
}

/// Compiled fixed-function and shader-stage state for one draw configuration.
pub trait RenderPipeline: Send + Sync + Debug {
    fn id(&self) -> ResourceId;
    fn topology(&self) -> PrimitiveTopology;
    fn as_any(&self) -> &dyn Any;
}

/// Render pass descriptor for begin_render_pass.
#[derive(Debug, Clone)]
pub struct RenderPassDescriptor<'a> {
    pub label: Option<&'static str>,
    pub color_attachments: Vec<ColorAttachment<'a>>,
    pub depth_stencil_attachment: Option<DepthStencilAttachment<'a>>,
}

#[derive(Debug, Clone)]
pub struct ColorAttachment<'a> {
    pub view: &'a dyn TextureView,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
    /// Used when `load_op` is Clear; None clears to opaque black.
    pub clear_value: Option<ClearColor>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClearColor {
    pub r: f64,
    pub g: f64,
    pub b: f64,
    pub a: f64,
}

impl ClearColor {
    pub const BLACK: Self = Self {
        r: 0.0,
        g: 0.0,
        b: 0.0,
        a: 1.0,
    };
}

#[derive(Debug, Clone)]
pub struct DepthStencilAttachment<'a> {
    pub view: &'a dyn TextureView,
    pub depth_load_op: LoadOp,
    pub depth_store_op: StoreOp,
    pub clear_depth: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadOp {
    Load,
    Clear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Store,
    Discard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexFormat {
    Uint16,
    Uint32,
}

impl IndexFormat {
    pub fn size(self) -> u64 {
        match self {
            IndexFormat::Uint16 => 2,
            IndexFormat::Uint32 => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScissorRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Layout of texel data handed to [`Queue::write_texture`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TextureDataLayout {
    pub offset: u64,
    /// None = tightly packed rows.
    pub bytes_per_row: Option<u32>,
    pub rows_per_image: Option<u32>,
}

pub trait CommandEncoder: Debug {
    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor<'_>) -> Result<Box<dyn RenderPass>>;
    fn copy_buffer_to_buffer(
        &mut self,
        src: &dyn Buffer,
        src_offset: u64,
        dst: &dyn Buffer,
        dst_offset: u64,
        size: u64,
    ) -> Result<()>;
    /// Close the recording. Fails while a render pass from this encoder is still recording.
    fn finish(self: Box<Self>) -> Result<Box<dyn CommandBuffer>>;
}

pub trait CommandBuffer: Send + Debug {
    fn as_any(&self) -> &dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;
}

/// Lifecycle of a [`RenderPass`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassState {
    /// Pipeline, buffers, bind groups and draws may be issued.
    Recording,
    /// Immutable and ready for submission.
    Ended,
    /// Native handles released.
    Disposed,
}

impl PassState {
    pub(crate) fn ensure_recording(self, operation: &'static str) -> Result<()> {
        match self {
            PassState::Recording => Ok(()),
            state => Err(RhiError::InvalidPassState { state, operation }),
        }
    }
}

/// Render pass for recording draw calls.
///
/// Every method after [`RenderPass::end`] fails with [`RhiError::InvalidPassState`].
pub trait RenderPass: Debug {
    fn set_pipeline(&mut self, pipeline: &dyn RenderPipeline) -> Result<()>;
    /// Bind a group at `index`; must match the pipeline's layout at that index.
    fn set_bind_group(&mut self, index: u32, group: &dyn BindGroup) -> Result<()>;
    fn set_vertex_buffer(&mut self, slot: u32, buffer: &dyn Buffer, offset: u64) -> Result<()>;
    fn set_index_buffer(&mut self, buffer: &dyn Buffer, offset: u64, format: IndexFormat) -> Result<()>;
    fn set_viewport(&mut self, viewport: Viewport) -> Result<()>;
    fn set_scissor_rect(&mut self, rect: ScissorRect) -> Result<()>;
    fn draw(&mut self, vertices: Range<u32>, instances: Range<u32>) -> Result<()>;
    fn draw_indexed(&mut self, indices: Range<u32>, base_vertex: i32, instances: Range<u32>) -> Result<()>;
    /// Recording -> Ended. Inserts the backend's end-of-pass barrier.
    fn end(&mut self) -> Result<()>;
    /// Ended -> Disposed. Rejected while still recording; a no-op once disposed.
    fn dispose(&mut self) -> Result<()>;
    fn state(&self) -> PassState;
}

/// Presentable swap chain yielding one drawable texture per frame.
pub trait Surface: Send + Sync + Debug {
    /// Recreate the swap chain at a new size.
    fn configure(&self, width: u32, height: u32) -> Result<()>;
    fn extent(&self) -> (u32, u32);
    fn format(&self) -> TextureFormat;
    /// Acquire this frame's drawable. The texture is borrowed from the swap chain
    /// (`is_owned() == false`).
    fn acquire_texture(&self) -> Result<Box<dyn Texture>>;
    /// Present the acquired drawable and end the frame.
    fn present(&self) -> Result<()>;
    fn dispose(&self);
    fn as_any(&self) -> &dyn Any;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn texture_format_sizes() {
        assert_eq!(TextureFormat::R8Unorm.bytes_per_pixel(), 1);
        assert_eq!(TextureFormat::Bgra8UnormSrgb.bytes_per_pixel(), 4);
        assert_eq!(TextureFormat::Rgba16Float.bytes_per_pixel(), 8);
        assert_eq!(TextureFormat::Rgba32Float.bytes_per_pixel(), 16);
        assert!(TextureFormat::Depth24PlusStencil8.is_depth());
        assert!(TextureFormat::Depth24PlusStencil8.has_stencil());
        assert!(!TextureFormat::Depth32Float.has_stencil());
        assert!(!TextureFormat::Rgba8Unorm.is_depth());
    }

    #[test]
    fn binding_kinds() {
        assert_eq!(BindingType::UniformBuffer.kind(), BindingKind::Buffer);
        assert_eq!(
            BindingType::StorageBuffer { read_only: true }.kind(),
            BindingKind::Buffer
        );
        assert_eq!(
            BindingType::Sampler(SamplerBindingType::Comparison).kind(),
            BindingKind::Sampler
        );
    }

    #[test]
    fn pass_state_only_recording_accepts_commands() {
        assert!(PassState::Recording.ensure_recording("draw").is_ok());
        assert_eq!(
            PassState::Ended.ensure_recording("draw"),
            Err(RhiError::InvalidPassState {
                state: PassState::Ended,
                operation: "draw"
            })
        );
        assert!(PassState::Disposed.ensure_recording("set_pipeline").is_err());
    }

    #[test]
    fn device_ids_are_unique() {
        assert_ne!(DeviceId::next(), DeviceId::next());
    }
}
