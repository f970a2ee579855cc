//! Facet -> wgpu enum and descriptor translation. Pure functions, no device state.

use crate::{
    AddressMode, BindingType, BlendComponent, BlendFactor, BlendOperation, BlendState, BufferUsage,
    ClearColor, ColorWrites, CompareFunction, CullMode, FilterMode, FrontFace, IndexFormat, LoadOp,
    PowerPreference, PrimitiveTopology, SamplerBindingType, ShaderStages, StoreOp,
    TextureDimension, TextureFormat, TextureSampleType, TextureUsage, TextureViewDimension,
    VertexFormat, VertexStepMode,
};

pub fn texture_format_to_wgpu(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::R8Unorm => wgpu::TextureFormat::R8Unorm,
        TextureFormat::Rg8Unorm => wgpu::TextureFormat::Rg8Unorm,
        TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        TextureFormat::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
        TextureFormat::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
        TextureFormat::Bgra8UnormSrgb => wgpu::TextureFormat::Bgra8UnormSrgb,
        TextureFormat::R16Float => wgpu::TextureFormat::R16Float,
        TextureFormat::R32Float => wgpu::TextureFormat::R32Float,
        TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        TextureFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
        TextureFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
        TextureFormat::Depth24PlusStencil8 => wgpu::TextureFormat::Depth24PlusStencil8,
    }
}

/// Inverse of [`texture_format_to_wgpu`]; None for formats Facet does not expose.
pub fn texture_format_from_wgpu(format: wgpu::TextureFormat) -> Option<TextureFormat> {
    Some(match format {
        wgpu::TextureFormat::R8Unorm => TextureFormat::R8Unorm,
        wgpu::TextureFormat::Rg8Unorm => TextureFormat::Rg8Unorm,
        wgpu::TextureFormat::Rgba8Unorm => TextureFormat::Rgba8Unorm,
        wgpu::TextureFormat::Rgba8UnormSrgb => TextureFormat::Rgba8UnormSrgb,
        wgpu::TextureFormat::Bgra8Unorm => TextureFormat::Bgra8Unorm,
        wgpu::TextureFormat::Bgra8UnormSrgb => TextureFormat::Bgra8UnormSrgb,
        wgpu::TextureFormat::R16Float => TextureFormat::R16Float,
        wgpu::TextureFormat::R32Float => TextureFormat::R32Float,
        wgpu::TextureFormat::Rgba16Float => TextureFormat::Rgba16Float,
        wgpu::TextureFormat::Rgba32Float => TextureFormat::Rgba32Float,
        wgpu::TextureFormat::Depth32Float => TextureFormat::Depth32Float,
        wgpu::TextureFormat::Depth24PlusStencil8 => TextureFormat::Depth24PlusStencil8,
        _ => return None,
    })
}

pub fn buffer_usage_to_wgpu(usage: BufferUsage) -> wgpu::BufferUsages {
    let mut out = wgpu::BufferUsages::empty();
    if usage.contains(BufferUsage::VERTEX) {
        out |= wgpu::BufferUsages::VERTEX;
    }
    if usage.contains(BufferUsage::INDEX) {
        out |= wgpu::BufferUsages::INDEX;
    }
    if usage.contains(BufferUsage::UNIFORM) {
        out |= wgpu::BufferUsages::UNIFORM;
    }
    if usage.contains(BufferUsage::STORAGE) {
        out |= wgpu::BufferUsages::STORAGE;
    }
    if usage.contains(BufferUsage::COPY_SRC) {
        out |= wgpu::BufferUsages::COPY_SRC;
    }
    if usage.contains(BufferUsage::COPY_DST) {
        out |= wgpu::BufferUsages::COPY_DST;
    }
    if usage.contains(BufferUsage::INDIRECT) {
        out |= wgpu::BufferUsages::INDIRECT;
    }
    if usage.contains(BufferUsage::MAP_READ) {
        out |= wgpu::BufferUsages::MAP_READ;
    }
    if usage.contains(BufferUsage::MAP_WRITE) {
        out |= wgpu::BufferUsages::MAP_WRITE;
    }
    // update_data goes through queue.write_buffer.
    if !usage.intersects(BufferUsage::MAP_READ | BufferUsage::MAP_WRITE) {
        out |= wgpu::BufferUsages::COPY_DST;
    }
    out
}

pub fn texture_usage_to_wgpu(usage: TextureUsage) -> wgpu::TextureUsages {
    let mut out = wgpu::TextureUsages::empty();
    if usage.contains(TextureUsage::COPY_SRC) {
        out |= wgpu::TextureUsages::COPY_SRC;
    }
    if usage.contains(TextureUsage::COPY_DST) {
        out |= wgpu::TextureUsages::COPY_DST;
    }
    if usage.contains(TextureUsage::TEXTURE_BINDING) {
        out |= wgpu::TextureUsages::TEXTURE_BINDING;
    }
    if usage.contains(TextureUsage::STORAGE_BINDING) {
        out |= wgpu::TextureUsages::STORAGE_BINDING;
    }
    if usage.contains(TextureUsage::RENDER_ATTACHMENT) {
        out |= wgpu::TextureUsages::RENDER_ATTACHMENT;
    }
    out
}

/// Cube and 2D-array textures are 2D images with layers in wgpu.
pub fn texture_dimension_to_wgpu(dimension: TextureDimension) -> wgpu::TextureDimension {
    match dimension {
        TextureDimension::D2 | TextureDimension::D2Array | TextureDimension::Cube => {
            wgpu::TextureDimension::D2
        }
        TextureDimension::D3 => wgpu::TextureDimension::D3,
    }
}

pub fn view_dimension_to_wgpu(dimension: TextureViewDimension) -> wgpu::TextureViewDimension {
    match dimension {
        TextureViewDimension::D2 => wgpu::TextureViewDimension::D2,
        TextureViewDimension::D2Array => wgpu::TextureViewDimension::D2Array,
        TextureViewDimension::D3 => wgpu::TextureViewDimension::D3,
        TextureViewDimension::Cube => wgpu::TextureViewDimension::Cube,
    }
}

pub fn shader_stages_to_wgpu(stages: ShaderStages) -> wgpu::ShaderStages {
    let mut out = wgpu::ShaderStages::NONE;
    if stages.contains(ShaderStages::VERTEX) {
        out |= wgpu::ShaderStages::VERTEX;
    }
    if stages.contains(ShaderStages::FRAGMENT) {
        out |= wgpu::ShaderStages::FRAGMENT;
    }
    if stages.contains(ShaderStages::COMPUTE) {
        out |= wgpu::ShaderStages::COMPUTE;
    }
    out
}

fn sample_type_to_wgpu(sample_type: TextureSampleType) -> wgpu::TextureSampleType {
    match sample_type {
        TextureSampleType::Float { filterable } => wgpu::TextureSampleType::Float { filterable },
        TextureSampleType::Depth => wgpu::TextureSampleType::Depth,
        TextureSampleType::Uint => wgpu::TextureSampleType::Uint,
        TextureSampleType::Sint => wgpu::TextureSampleType::Sint,
    }
}

fn sampler_binding_to_wgpu(ty: SamplerBindingType) -> wgpu::SamplerBindingType {
    match ty {
        SamplerBindingType::Filtering => wgpu::SamplerBindingType::Filtering,
        SamplerBindingType::NonFiltering => wgpu::SamplerBindingType::NonFiltering,
        SamplerBindingType::Comparison => wgpu::SamplerBindingType::Comparison,
    }
}

pub fn binding_type_to_wgpu(ty: BindingType) -> wgpu::BindingType {
    match ty {
        BindingType::UniformBuffer => wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        BindingType::StorageBuffer { read_only } => wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        BindingType::Texture {
            sample_type,
            view_dimension,
            multisampled,
        } => wgpu::BindingType::Texture {
            sample_type: sample_type_to_wgpu(sample_type),
            view_dimension: view_dimension_to_wgpu(view_dimension),
            multisampled,
        },
        BindingType::Sampler(ty) => wgpu::BindingType::Sampler(sampler_binding_to_wgpu(ty)),
    }
}

pub fn filter_mode_to_wgpu(mode: FilterMode) -> wgpu::FilterMode {
    match mode {
        FilterMode::Nearest => wgpu::FilterMode::Nearest,
        FilterMode::Linear => wgpu::FilterMode::Linear,
    }
}

pub fn address_mode_to_wgpu(mode: AddressMode) -> wgpu::AddressMode {
    match mode {
        AddressMode::Repeat => wgpu::AddressMode::Repeat,
        AddressMode::MirrorRepeat => wgpu::AddressMode::MirrorRepeat,
        AddressMode::ClampToEdge => wgpu::AddressMode::ClampToEdge,
        AddressMode::ClampToBorder => wgpu::AddressMode::ClampToBorder,
    }
}

pub fn compare_function_to_wgpu(func: CompareFunction) -> wgpu::CompareFunction {
    match func {
        CompareFunction::Never => wgpu::CompareFunction::Never,
        CompareFunction::Less => wgpu::CompareFunction::Less,
        CompareFunction::Equal => wgpu::CompareFunction::Equal,
        CompareFunction::LessEqual => wgpu::CompareFunction::LessEqual,
        CompareFunction::Greater => wgpu::CompareFunction::Greater,
        CompareFunction::NotEqual => wgpu::CompareFunction::NotEqual,
        CompareFunction::GreaterEqual => wgpu::CompareFunction::GreaterEqual,
        CompareFunction::Always => wgpu::CompareFunction::Always,
    }
}

pub fn topology_to_wgpu(topology: PrimitiveTopology) -> wgpu::PrimitiveTopology {
    match topology {
        PrimitiveTopology::PointList => wgpu::PrimitiveTopology::PointList,
        PrimitiveTopology::LineList => wgpu::PrimitiveTopology::LineList,
        PrimitiveTopology::LineStrip => wgpu::PrimitiveTopology::LineStrip,
        PrimitiveTopology::TriangleList => wgpu::PrimitiveTopology::TriangleList,
        PrimitiveTopology::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
    }
}

pub fn cull_mode_to_wgpu(mode: CullMode) -> Option<wgpu::Face> {
    match mode {
        CullMode::None => None,
        CullMode::Front => Some(wgpu::Face::Front),
        CullMode::Back => Some(wgpu::Face::Back),
    }
}

pub fn front_face_to_wgpu(face: FrontFace) -> wgpu::FrontFace {
    match face {
        FrontFace::CounterClockwise => wgpu::FrontFace::Ccw,
        FrontFace::Clockwise => wgpu::FrontFace::Cw,
    }
}

pub fn blend_factor_to_wgpu(factor: BlendFactor) -> wgpu::BlendFactor {
    match factor {
        BlendFactor::Zero => wgpu::BlendFactor::Zero,
        BlendFactor::One => wgpu::BlendFactor::One,
        BlendFactor::Src => wgpu::BlendFactor::Src,
        BlendFactor::OneMinusSrc => wgpu::BlendFactor::OneMinusSrc,
        BlendFactor::SrcAlpha => wgpu::BlendFactor::SrcAlpha,
        BlendFactor::OneMinusSrcAlpha => wgpu::BlendFactor::OneMinusSrcAlpha,
        BlendFactor::Dst => wgpu::BlendFactor::Dst,
        BlendFactor::OneMinusDst => wgpu::BlendFactor::OneMinusDst,
        BlendFactor::DstAlpha => wgpu::BlendFactor::DstAlpha,
        BlendFactor::OneMinusDstAlpha => wgpu::BlendFactor::OneMinusDstAlpha,
        BlendFactor::SrcAlphaSaturated => wgpu::BlendFactor::SrcAlphaSaturated,
        BlendFactor::Constant => wgpu::BlendFactor::Constant,
        BlendFactor::OneMinusConstant => wgpu::BlendFactor::OneMinusConstant,
    }
}

pub fn blend_operation_to_wgpu(op: BlendOperation) -> wgpu::BlendOperation {
    match op {
        BlendOperation::Add => wgpu::BlendOperation::Add,
        BlendOperation::Subtract => wgpu::BlendOperation::Subtract,
        BlendOperation::ReverseSubtract => wgpu::BlendOperation::ReverseSubtract,
        BlendOperation::Min => wgpu::BlendOperation::Min,
        BlendOperation::Max => wgpu::BlendOperation::Max,
    }
}

fn blend_component_to_wgpu(component: BlendComponent) -> wgpu::BlendComponent {
    wgpu::BlendComponent {
        src_factor: blend_factor_to_wgpu(component.src_factor),
        dst_factor: blend_factor_to_wgpu(component.dst_factor),
        operation: blend_operation_to_wgpu(component.operation),
    }
}

pub fn blend_state_to_wgpu(state: &BlendState) -> wgpu::BlendState {
    wgpu::BlendState {
        color: blend_component_to_wgpu(state.color),
        alpha: blend_component_to_wgpu(state.alpha),
    }
}

pub fn color_writes_to_wgpu(mask: ColorWrites) -> wgpu::ColorWrites {
    let mut out = wgpu::ColorWrites::empty();
    if mask.contains(ColorWrites::RED) {
        out |= wgpu::ColorWrites::RED;
    }
    if mask.contains(ColorWrites::GREEN) {
        out |= wgpu::ColorWrites::GREEN;
    }
    if mask.contains(ColorWrites::BLUE) {
        out |= wgpu::ColorWrites::BLUE;
    }
    if mask.contains(ColorWrites::ALPHA) {
        out |= wgpu::ColorWrites::ALPHA;
    }
    out
}

pub fn vertex_format_to_wgpu(format: VertexFormat) -> wgpu::VertexFormat {
    match format {
        VertexFormat::Float32 => wgpu::VertexFormat::Float32,
        VertexFormat::Float32x2 => wgpu::VertexFormat::Float32x2,
        VertexFormat::Float32x3 => wgpu::VertexFormat::Float32x3,
        VertexFormat::Float32x4 => wgpu::VertexFormat::Float32x4,
        VertexFormat::Uint32 => wgpu::VertexFormat::Uint32,
        VertexFormat::Uint32x2 => wgpu::VertexFormat::Uint32x2,
        VertexFormat::Uint32x3 => wgpu::VertexFormat::Uint32x3,
        VertexFormat::Uint32x4 => wgpu::VertexFormat::Uint32x4,
        VertexFormat::Unorm8x4 => wgpu::VertexFormat::Unorm8x4,
        VertexFormat::Float16x2 => wgpu::VertexFormat::Float16x2,
        VertexFormat::Float16x4 => wgpu::VertexFormat::Float16x4,
    }
}

pub fn step_mode_to_wgpu(mode: VertexStepMode) -> wgpu::VertexStepMode {
    match mode {
        VertexStepMode::Vertex => wgpu::VertexStepMode::Vertex,
        VertexStepMode::Instance => wgpu::VertexStepMode::Instance,
    }
}

pub fn index_format_to_wgpu(format: IndexFormat) -> wgpu::IndexFormat {
    match format {
        IndexFormat::Uint16 => wgpu::IndexFormat::Uint16,
        IndexFormat::Uint32 => wgpu::IndexFormat::Uint32,
    }
}

pub fn color_load_op_to_wgpu(op: LoadOp, clear: Option<ClearColor>) -> wgpu::LoadOp<wgpu::Color> {
    match op {
        LoadOp::Load => wgpu::LoadOp::Load,
        LoadOp::Clear => {
            let c = clear.unwrap_or(ClearColor::BLACK);
            wgpu::LoadOp::Clear(wgpu::Color {
                r: c.r,
                g: c.g,
                b: c.b,
                a: c.a,
            })
        }
    }
}

pub fn depth_load_op_to_wgpu(op: LoadOp, clear_depth: f32) -> wgpu::LoadOp<f32> {
    match op {
        LoadOp::Load => wgpu::LoadOp::Load,
        LoadOp::Clear => wgpu::LoadOp::Clear(clear_depth),
    }
}

pub fn store_op_to_wgpu(op: StoreOp) -> wgpu::StoreOp {
    match op {
        StoreOp::Store => wgpu::StoreOp::Store,
        StoreOp::Discard => wgpu::StoreOp::Discard,
    }
}

pub fn power_preference_to_wgpu(pref: PowerPreference) -> wgpu::PowerPreference {
    match pref {
        PowerPreference::None => wgpu::PowerPreference::None,
        PowerPreference::LowPower => wgpu::PowerPreference::LowPower,
        PowerPreference::HighPerformance => wgpu::PowerPreference::HighPerformance,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn texture_formats_round_trip() {
        let formats = [
            TextureFormat::R8Unorm,
            TextureFormat::Rgba8UnormSrgb,
            TextureFormat::Bgra8Unorm,
            TextureFormat::Rgba32Float,
            TextureFormat::Depth24PlusStencil8,
        ];
        for format in formats {
            assert_eq!(
                texture_format_from_wgpu(texture_format_to_wgpu(format)),
                Some(format)
            );
        }
        assert_eq!(texture_format_from_wgpu(wgpu::TextureFormat::Rgb10a2Unorm), None);
    }

    #[test]
    fn writable_buffers_get_copy_dst() {
        let usage = buffer_usage_to_wgpu(BufferUsage::UNIFORM);
        assert!(usage.contains(wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST));
        let mapped = buffer_usage_to_wgpu(BufferUsage::MAP_READ | BufferUsage::COPY_DST);
        assert_eq!(
            mapped,
            wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST
        );
    }

    #[test]
    fn cube_textures_are_layered_2d() {
        assert_eq!(
            texture_dimension_to_wgpu(TextureDimension::Cube),
            wgpu::TextureDimension::D2
        );
        assert_eq!(
            view_dimension_to_wgpu(TextureViewDimension::Cube),
            wgpu::TextureViewDimension::Cube
        );
    }

    #[test]
    fn cull_none_disables_culling() {
        assert_eq!(cull_mode_to_wgpu(CullMode::None), None);
        assert_eq!(cull_mode_to_wgpu(CullMode::Back), Some(wgpu::Face::Back));
        assert_eq!(front_face_to_wgpu(FrontFace::Clockwise), wgpu::FrontFace::Cw);
    }

    #[test]
    fn clear_defaults_to_opaque_black() {
        match color_load_op_to_wgpu(LoadOp::Clear, None) {
            wgpu::LoadOp::Clear(color) => assert_eq!(color, wgpu::Color::BLACK),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            color_load_op_to_wgpu(LoadOp::Load, None),
            wgpu::LoadOp::Load
        ));
        assert!(matches!(
            depth_load_op_to_wgpu(LoadOp::Clear, 1.0),
            wgpu::LoadOp::Clear(d) if d == 1.0
        ));
    }

    #[test]
    fn stage_visibility() {
        assert_eq!(
            shader_stages_to_wgpu(ShaderStages::VERTEX | ShaderStages::FRAGMENT),
            wgpu::ShaderStages::VERTEX_FRAGMENT
        );
        assert_eq!(shader_stages_to_wgpu(ShaderStages::empty()), wgpu::ShaderStages::NONE);
    }

    #[test]
    fn blend_and_write_mask() {
        let blend = blend_state_to_wgpu(&BlendState::ALPHA_BLENDING);
        assert_eq!(blend, wgpu::BlendState::ALPHA_BLENDING);
        assert_eq!(color_writes_to_wgpu(ColorWrites::ALL), wgpu::ColorWrites::ALL);
    }
}
