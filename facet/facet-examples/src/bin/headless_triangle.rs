//! Headless triangle on the software bindless device: vertex buffer, per-frame MVP uniform,
//! three frames through the offscreen surface, then readback of the last drawable.
//! Run: RUST_LOG=debug cargo run --bin headless_triangle

use bytemuck::{Pod, Zeroable};
use facet_rhi::bindless::software::SoftwareConfig;
use facet_rhi::{
    BindGroupDescriptor, BindGroupEntry, BindGroupLayoutDescriptor, BindGroupLayoutEntry,
    BindingResource, BindingType, BindlessDevice, BufferUsage, ClearColor, ColorAttachment,
    ColorTargetState, Device, DeviceDescriptor, FragmentState, LoadOp, PrimitiveState,
    RenderPassDescriptor, RenderPipelineDescriptor, ShaderModuleDescriptor, ShaderSource,
    ShaderStages, StoreOp, SurfaceTarget, TextureFormat, TypedBuffer, VertexAttribute,
    VertexBufferLayout, VertexFormat, VertexState, VertexStepMode,
};

const WIDTH: u32 = 64;
const HEIGHT: u32 = 64;
const FRAMES: u32 = 3;

const SHADER: &str = r#"
#include <metal_stdlib>
using namespace metal;

struct VertexIn {
    float3 position [[attribute(0)]];
};

struct VertexOut {
    float4 position [[position]];
};

vertex VertexOut vs_main(VertexIn in [[stage_in]], constant float4x4& mvp [[buffer(4)]]) {
    VertexOut out;
    out.position = mvp * float4(in.position, 1.0);
    return out;
}

fragment float4 fs_main(VertexOut in [[stage_in]]) {
    return float4(0.2, 0.8, 0.2, 1.0);
}
"#;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct Uniforms {
    mvp: [[f32; 4]; 4],
}

/// Rotation about Z, column-major.
fn rotation_z(radians: f32) -> Uniforms {
    let (s, c) = radians.sin_cos();
    Uniforms {
        mvp: [
            [c, s, 0.0, 0.0],
            [-s, c, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ],
    }
}

fn main() {
    env_logger::init();

    let desc = DeviceDescriptor::from_env().with_surface(SurfaceTarget::Headless {
        width: WIDTH,
        height: HEIGHT,
        format: TextureFormat::Rgba8Unorm,
    });
    let device = BindlessDevice::new_software(&desc, SoftwareConfig::default())
        .expect("create software device");
    log::info!("device: {:?}", device.adapter_info());
    let queue = device.queue();
    let surface = device.surface().expect("headless surface");

    let vertices: [[f32; 3]; 3] = [[0.0, 0.6, 0.0], [-0.6, -0.6, 0.0], [0.6, -0.6, 0.0]];
    let vertex_buffer = TypedBuffer::with_slice(&device, Some("vertices"), &vertices, BufferUsage::VERTEX)
        .expect("create vertex buffer");
    let mvp = TypedBuffer::<Uniforms>::new(&device, Some("mvp"), BufferUsage::UNIFORM)
        .expect("create mvp buffer");

    let layout = device
        .create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("mvp"),
            entries: vec![BindGroupLayoutEntry {
                binding: 0,
                visibility: ShaderStages::VERTEX,
                ty: BindingType::UniformBuffer,
            }],
        })
        .expect("create bind group layout");
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
        .expect("create bind group");

    let module = device
        .create_shader_module(&ShaderModuleDescriptor {
            label: Some("triangle"),
            source: ShaderSource::msl(SHADER),
        })
        .expect("compile shader");
    let pipeline = device
        .create_render_pipeline(&RenderPipelineDescriptor {
            label: Some("triangle"),
            vertex: VertexState {
                module: module.as_ref(),
                entry_point: "vs_main",
                buffers: vec![VertexBufferLayout {
                    array_stride: 12,
                    step_mode: VertexStepMode::Vertex,
                    attributes: vec![VertexAttribute {
                        format: VertexFormat::Float32x3,
                        offset: 0,
                        shader_location: 0,
                    }],
                }],
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
        .expect("create pipeline");

    for frame in 0..FRAMES {
        // Each frame writes its own uniform slot; earlier frames still in flight keep theirs.
        mvp.write(queue.as_ref(), 0, &rotation_z(frame as f32 * 0.5))
            .expect("write mvp");
        let target = surface.acquire_texture().expect("acquire drawable");
        let view = target.create_view(&Default::default()).expect("drawable view");
        let mut encoder = device.create_command_encoder().expect("create encoder");
        let mut pass = encoder
            .begin_render_pass(&RenderPassDescriptor {
                label: Some("main_pass"),
                color_attachments: vec![ColorAttachment {
                    view: view.as_ref(),
                    load_op: LoadOp::Clear,
                    store_op: StoreOp::Store,
                    clear_value: Some(ClearColor {
                        r: 0.1,
                        g: 0.1,
                        b: 0.15,
                        a: 1.0,
                    }),
                }],
                depth_stencil_attachment: None,
            })
            .expect("begin render pass");
        pass.set_pipeline(pipeline.as_ref()).expect("set pipeline");
        pass.set_bind_group(0, group.as_ref()).expect("set bind group");
        pass.set_vertex_buffer(0, vertex_buffer.raw(), 0)
            .expect("set vertex buffer");
        pass.draw(0..3, 0..1).expect("draw");
        pass.end().expect("end pass");
        queue
            .submit(vec![encoder.finish().expect("finish")])
            .expect("submit");
        surface.present().expect("present");
    }
    device.wait_idle().expect("wait idle");

    let software = device.software().expect("software driver");
    for (i, draw) in software.executed_draws().iter().enumerate() {
        let mvp_address = draw
            .vertex_stage_buffers
            .first()
            .map(|b| b.gpu_address)
            .unwrap_or_default();
        println!(
            "frame {}: {} vertices, mvp at {:#x}",
            i, draw.element_count, mvp_address
        );
    }
    let drawable = device
        .bindless_surface()
        .and_then(|s| s.last_presented())
        .expect("presented drawable");
    let texels = software.read_texture(&drawable, 0, 0).expect("read back drawable");
    println!(
        "read back {} bytes, first texel {:?}, residency faults {}",
        texels.len(),
        &texels[..4],
        software.residency_faults()
    );
    println!("frames ended: {}", device.frame_counter());
    device.dispose();
}
