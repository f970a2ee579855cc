//! Conversions from RHI types to native (Metal-valued) enums.

use super::native;
use crate::{
    AddressMode, BlendFactor, BlendOperation, BlendState, ColorWrites, CompareFunction, CullMode,
    FilterMode, FrontFace, IndexFormat, LoadOp, PrimitiveTopology, StoreOp, TextureDimension,
    TextureFormat, TextureUsage, VertexFormat, VertexStepMode,
};

pub fn texture_format_to_native(format: TextureFormat) -> native::PixelFormat {
    use native::PixelFormat as P;
    match format {
        TextureFormat::R8Unorm => P::R8Unorm,
        TextureFormat::Rg8Unorm => P::Rg8Unorm,
        TextureFormat::Rgba8Unorm => P::Rgba8Unorm,
        TextureFormat::Rgba8UnormSrgb => P::Rgba8UnormSrgb,
        TextureFormat::Bgra8Unorm => P::Bgra8Unorm,
        TextureFormat::Bgra8UnormSrgb => P::Bgra8UnormSrgb,
        TextureFormat::R16Float => P::R16Float,
        TextureFormat::R32Float => P::R32Float,
        TextureFormat::Rgba16Float => P::Rgba16Float,
        TextureFormat::Rgba32Float => P::Rgba32Float,
        TextureFormat::Depth32Float => P::Depth32Float,
        // Apple GPUs have no packed 24-bit depth.
        TextureFormat::Depth24PlusStencil8 => P::Depth32FloatStencil8,
    }
}

pub fn texture_type_to_native(dimension: TextureDimension) -> native::TextureType {
    match dimension {
        TextureDimension::D2 => native::TextureType::Type2D,
        TextureDimension::D2Array => native::TextureType::Type2DArray,
        TextureDimension::D3 => native::TextureType::Type3D,
        TextureDimension::Cube => native::TextureType::TypeCube,
    }
}

pub fn texture_usage_to_native(usage: TextureUsage) -> native::TextureUsage {
    let mut out = native::TextureUsage::empty();
    if usage.contains(TextureUsage::TEXTURE_BINDING) {
        out |= native::TextureUsage::SHADER_READ;
    }
    if usage.contains(TextureUsage::STORAGE_BINDING) {
        out |= native::TextureUsage::SHADER_WRITE;
    }
    if usage.contains(TextureUsage::RENDER_ATTACHMENT) {
        out |= native::TextureUsage::RENDER_TARGET;
    }
    out
}

pub fn primitive_type_to_native(topology: PrimitiveTopology) -> native::PrimitiveType {
    match topology {
        PrimitiveTopology::PointList => native::PrimitiveType::Point,
        PrimitiveTopology::LineList => native::PrimitiveType::Line,
        PrimitiveTopology::LineStrip => native::PrimitiveType::LineStrip,
        PrimitiveTopology::TriangleList => native::PrimitiveType::Triangle,
        PrimitiveTopology::TriangleStrip => native::PrimitiveType::TriangleStrip,
    }
}

pub fn topology_class_to_native(topology: PrimitiveTopology) -> native::PrimitiveTopologyClass {
    match topology {
        PrimitiveTopology::PointList => native::PrimitiveTopologyClass::Point,
        PrimitiveTopology::LineList | PrimitiveTopology::LineStrip => {
            native::PrimitiveTopologyClass::Line
        }
        PrimitiveTopology::TriangleList | PrimitiveTopology::TriangleStrip => {
            native::PrimitiveTopologyClass::Triangle
        }
    }
}

pub fn cull_mode_to_native(mode: CullMode) -> native::CullMode {
    match mode {
        CullMode::None => native::CullMode::None,
        CullMode::Front => native::CullMode::Front,
        CullMode::Back => native::CullMode::Back,
    }
}

pub fn winding_to_native(face: FrontFace) -> native::Winding {
    match face {
        FrontFace::Clockwise => native::Winding::Clockwise,
        FrontFace::CounterClockwise => native::Winding::CounterClockwise,
    }
}

pub fn compare_function_to_native(func: CompareFunction) -> native::CompareFunction {
    use native::CompareFunction as C;
    match func {
        CompareFunction::Never => C::Never,
        CompareFunction::Less => C::Less,
        CompareFunction::Equal => C::Equal,
        CompareFunction::LessEqual => C::LessEqual,
        CompareFunction::Greater => C::Greater,
        CompareFunction::NotEqual => C::NotEqual,
        CompareFunction::GreaterEqual => C::GreaterEqual,
        CompareFunction::Always => C::Always,
    }
}

pub fn blend_factor_to_native(factor: BlendFactor) -> native::BlendFactor {
    use native::BlendFactor as B;
    match factor {
        BlendFactor::Zero => B::Zero,
        BlendFactor::One => B::One,
        BlendFactor::Src => B::SourceColor,
        BlendFactor::OneMinusSrc => B::OneMinusSourceColor,
        BlendFactor::SrcAlpha => B::SourceAlpha,
        BlendFactor::OneMinusSrcAlpha => B::OneMinusSourceAlpha,
        BlendFactor::Dst => B::DestinationColor,
        BlendFactor::OneMinusDst => B::OneMinusDestinationColor,
        BlendFactor::DstAlpha => B::DestinationAlpha,
        BlendFactor::OneMinusDstAlpha => B::OneMinusDestinationAlpha,
        BlendFactor::SrcAlphaSaturated => B::SourceAlphaSaturated,
        BlendFactor::Constant => B::BlendColor,
        BlendFactor::OneMinusConstant => B::OneMinusBlendColor,
    }
}

pub fn blend_operation_to_native(op: BlendOperation) -> native::BlendOperation {
    match op {
        BlendOperation::Add => native::BlendOperation::Add,
        BlendOperation::Subtract => native::BlendOperation::Subtract,
        BlendOperation::ReverseSubtract => native::BlendOperation::ReverseSubtract,
        BlendOperation::Min => native::BlendOperation::Min,
        BlendOperation::Max => native::BlendOperation::Max,
    }
}

pub fn blend_state_to_native(state: &BlendState) -> native::NativeBlendState {
    native::NativeBlendState {
        rgb_blend_operation: blend_operation_to_native(state.color.operation),
        alpha_blend_operation: blend_operation_to_native(state.alpha.operation),
        source_rgb_blend_factor: blend_factor_to_native(state.color.src_factor),
        source_alpha_blend_factor: blend_factor_to_native(state.alpha.src_factor),
        destination_rgb_blend_factor: blend_factor_to_native(state.color.dst_factor),
        destination_alpha_blend_factor: blend_factor_to_native(state.alpha.dst_factor),
    }
}

/// MTLColorWriteMask: Red=8, Green=4, Blue=2, Alpha=1.
pub fn color_write_mask_to_native(writes: ColorWrites) -> u64 {
    let mut mask = 0;
    if writes.contains(ColorWrites::RED) {
        mask |= 8;
    }
    if writes.contains(ColorWrites::GREEN) {
        mask |= 4;
    }
    if writes.contains(ColorWrites::BLUE) {
        mask |= 2;
    }
    if writes.contains(ColorWrites::ALPHA) {
        mask |= 1;
    }
    mask
}

pub fn min_mag_filter_to_native(filter: FilterMode) -> native::SamplerMinMagFilter {
    match filter {
        FilterMode::Nearest => native::SamplerMinMagFilter::Nearest,
        FilterMode::Linear => native::SamplerMinMagFilter::Linear,
    }
}

pub fn mip_filter_to_native(filter: FilterMode) -> native::SamplerMipFilter {
    match filter {
        FilterMode::Nearest => native::SamplerMipFilter::Nearest,
        FilterMode::Linear => native::SamplerMipFilter::Linear,
    }
}

pub fn address_mode_to_native(mode: AddressMode) -> native::SamplerAddressMode {
    match mode {
        AddressMode::Repeat => native::SamplerAddressMode::Repeat,
        AddressMode::MirrorRepeat => native::SamplerAddressMode::MirrorRepeat,
        AddressMode::ClampToEdge => native::SamplerAddressMode::ClampToEdge,
        AddressMode::ClampToBorder => native::SamplerAddressMode::ClampToBorderColor,
    }
}

pub fn vertex_format_to_native(format: VertexFormat) -> native::VertexFormat {
    use native::VertexFormat as V;
    match format {
        VertexFormat::Float32 => V::Float,
        VertexFormat::Float32x2 => V::Float2,
        VertexFormat::Float32x3 => V::Float3,
        VertexFormat::Float32x4 => V::Float4,
        VertexFormat::Uint32 => V::UInt,
        VertexFormat::Uint32x2 => V::UInt2,
        VertexFormat::Uint32x3 => V::UInt3,
        VertexFormat::Uint32x4 => V::UInt4,
        VertexFormat::Unorm8x4 => V::UChar4Normalized,
        VertexFormat::Float16x2 => V::Half2,
        VertexFormat::Float16x4 => V::Half4,
    }
}

pub fn step_mode_to_native(mode: VertexStepMode) -> native::VertexStepFunction {
    match mode {
        VertexStepMode::Vertex => native::VertexStepFunction::PerVertex,
        VertexStepMode::Instance => native::VertexStepFunction::PerInstance,
    }
}

pub fn index_format_to_native(format: IndexFormat) -> native::IndexType {
    match format {
        IndexFormat::Uint16 => native::IndexType::UInt16,
        IndexFormat::Uint32 => native::IndexType::UInt32,
    }
}

pub fn load_op_to_native(op: LoadOp) -> native::LoadAction {
    match op {
        LoadOp::Load => native::LoadAction::Load,
        LoadOp::Clear => native::LoadAction::Clear,
    }
}

pub fn store_op_to_native(op: StoreOp) -> native::StoreAction {
    match op {
        StoreOp::Store => native::StoreAction::Store,
        StoreOp::Discard => native::StoreAction::DontCare,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixel_formats_carry_metal_values() {
        assert_eq!(texture_format_to_native(TextureFormat::Rgba8Unorm) as u64, 70);
        assert_eq!(texture_format_to_native(TextureFormat::Bgra8UnormSrgb) as u64, 81);
        assert_eq!(
            texture_format_to_native(TextureFormat::Depth24PlusStencil8),
            native::PixelFormat::Depth32FloatStencil8
        );
    }

    #[test]
    fn strips_share_topology_class() {
        assert_eq!(
            topology_class_to_native(PrimitiveTopology::TriangleStrip),
            native::PrimitiveTopologyClass::Triangle
        );
        assert_eq!(
            primitive_type_to_native(PrimitiveTopology::LineStrip),
            native::PrimitiveType::LineStrip
        );
    }

    #[test]
    fn write_mask_bits() {
        assert_eq!(color_write_mask_to_native(ColorWrites::ALL), 0xF);
        assert_eq!(color_write_mask_to_native(ColorWrites::RED), 8);
        assert_eq!(color_write_mask_to_native(ColorWrites::empty()), 0);
    }

    #[test]
    fn texture_usage_maps_to_shader_and_target_bits() {
        let usage = texture_usage_to_native(
            TextureUsage::TEXTURE_BINDING | TextureUsage::RENDER_ATTACHMENT | TextureUsage::COPY_DST,
        );
        assert_eq!(
            usage,
            native::TextureUsage::SHADER_READ | native::TextureUsage::RENDER_TARGET
        );
    }
}
