//! One frame through the public API on the software bindless device.

use std::sync::Arc;

use facet_rhi::bindless::layout::buffer_slot;
use facet_rhi::bindless::software::SoftwareConfig;
use facet_rhi::{
    BindGroupDescriptor, BindGroupEntry, BindGroupLayoutDescriptor, BindGroupLayoutEntry,
    BindingResource, BindingType, BindlessDevice, BufferUsage, ClearColor, ColorAttachment,
    ColorTargetState, Device, DeviceDescriptor, DeviceRegistry, FragmentState, LoadOp,
    PrimitiveState, RenderPassDescriptor, RenderPipelineDescriptor, RhiError, ShaderModuleDescriptor,
    ShaderSource, ShaderStages, StoreOp, SurfaceTarget, TextureFormat, TypedBuffer, VertexState,
};

const MSL: &str = r#"
#include <metal_stdlib>
using namespace metal;

vertex float4 vs_main(uint vid [[vertex_id]], constant float4x4& mvp [[buffer(4)]]) {
    float2 corners[3] = { float2(0.0, 0.5), float2(-0.5, -0.5), float2(0.5, -0.5) };
    return mvp * float4(corners[vid], 0.0, 1.0);
}

fragment float4 fs_main() {
    return float4(0.2, 0.8, 0.2, 1.0);
}
"#;

const IDENTITY: [[f32; 4]; 4] = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
];

fn headless() -> DeviceDescriptor {
    let _ = env_logger::builder().is_test(true).try_init();
    DeviceDescriptor::default().with_surface(SurfaceTarget::Headless {
        width: 8,
        height: 8,
        format: TextureFormat::Rgba8Unorm,
    })
}

/// Identity MVP at (0,0), one triangle, submit and present.
fn draw_one_frame(device: &dyn Device) {
    let queue = device.queue();
    let surface = device.surface().expect("headless surface");

    let mvp = TypedBuffer::with_data(device, Some("mvp"), &IDENTITY, BufferUsage::UNIFORM).unwrap();
    let layout = device
        .create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("mvp"),
            entries: vec![BindGroupLayoutEntry {
                binding: 0,
                visibility: ShaderStages::VERTEX,
                ty: BindingType::UniformBuffer,
            }],
        })
        .unwrap();
    let group = device
        .create_bind_group(&BindGroupDescriptor {
            label: Some("mvp"),
            layout: layout.as_ref(),
            entries: vec![BindGroupEntry {
                binding: 0,
                resource: BindingResource::Buffer {
                    buffer: mvp.raw(),
                    offset: 0,
                    size: None,
                },
            }],
        })
        .unwrap();
    let module = device
        .create_shader_module(&ShaderModuleDescriptor {
            label: Some("triangle"),
            source: ShaderSource::msl(MSL),
        })
        .unwrap();
    let pipeline = device
        .create_render_pipeline(&RenderPipelineDescriptor {
            label: Some("triangle"),
            vertex: VertexState {
                module: module.as_ref(),
                entry_point: "vs_main",
                buffers: Vec::new(),
            },
            fragment: Some(FragmentState {
                module: module.as_ref(),
                entry_point: "fs_main",
                targets: vec![ColorTargetState::from(surface.format())],
            }),
            primitive: PrimitiveState::default(),
            depth_stencil: None,
            bind_group_layouts: vec![layout.as_ref()],
        })
        .unwrap();

    let frame = surface.acquire_texture().unwrap();
    let view = frame.create_view(&Default::default()).unwrap();
    let mut encoder = device.create_command_encoder().unwrap();
    let mut pass = encoder
        .begin_render_pass(&RenderPassDescriptor {
            label: Some("main"),
            color_attachments: vec![ColorAttachment {
                view: view.as_ref(),
                load_op: LoadOp::Clear,
                store_op: StoreOp::Store,
                clear_value: Some(ClearColor {
                    r: 0.0,
                    g: 0.0,
                    b: 1.0,
                    a: 1.0,
                }),
            }],
            depth_stencil_attachment: None,
        })
        .unwrap();
    pass.set_pipeline(pipeline.as_ref()).unwrap();
    pass.set_bind_group(0, group.as_ref()).unwrap();
    pass.draw(0..3, 0..1).unwrap();
    pass.end().unwrap();
    pass.dispose().unwrap();
    queue.submit(vec![encoder.finish().unwrap()]).unwrap();
    surface.present().unwrap();
}

#[test]
fn identity_triangle_advances_one_frame() {
    let device = BindlessDevice::new_software(&headless(), SoftwareConfig::default()).unwrap();
    let before = device.frame_counter();
    draw_one_frame(&device);
    assert_eq!(device.frame_counter(), before + 1);
    device.wait_idle().unwrap();

    let software = device.software().unwrap();
    let draws = software.executed_draws();
    assert_eq!(draws.len(), 1);
    assert_eq!(draws[0].element_count, 3);
    assert_eq!(draws[0].instance_count, 1);
    let bound = draws[0].vertex_stage_buffer(buffer_slot(0, 0).unwrap()).unwrap();
    let observed: [[f32; 4]; 4] = bytemuck::pod_read_unaligned(&bound.contents[..64]);
    assert_eq!(observed, IDENTITY);
    assert_eq!(software.residency_faults(), 0);

    let drawable = device.bindless_surface().unwrap().last_presented().unwrap();
    let texels = software.read_texture(&drawable, 0, 0).unwrap();
    assert!(texels.chunks(4).all(|t| t == [0, 0, 255, 255]));
}

#[test]
fn registry_builds_the_software_backend() {
    let registry = DeviceRegistry::with_default_backends();
    assert!(registry.contains("software"));
    let device: Arc<dyn Device> = registry.create("software", &headless()).unwrap();
    assert_eq!(device.backend(), facet_rhi::Backend::Bindless);
    assert_eq!(device.shader_language(), facet_rhi::ShaderLanguage::Msl);
    draw_one_frame(device.as_ref());
    assert_eq!(device.frame_counter(), 1);

    device.dispose();
    assert!(matches!(
        device.create_command_encoder(),
        Err(RhiError::Disposed("device"))
    ));
    assert_eq!(
        registry.create("vulkan", &headless()).unwrap_err(),
        RhiError::UnknownBackend("vulkan".into())
    );
}
