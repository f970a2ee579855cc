use super::command::BindlessCommandBuffer;
use super::layout::{buffer_slot, sampler_slot, texture_slot};
use super::native::NativeCommand;
use super::*;
use std::time::Duration;
use crate::{
    BindGroupEntry, BindGroupLayoutEntry, BindingResource, BindingType, BufferUsage, ColorAttachment,
    ColorTargetState, FragmentState, IndexFormat, LoadOp, PassState, PrimitiveState,
    RenderPassDescriptor, SamplerBindingType, ShaderSource, ShaderStages, StoreOp, SurfaceTarget,
    TextureDataLayout, TextureFormat, TextureSampleType, TextureUsage, TextureView,
    TextureViewDimension, TypedBuffer, VertexState,
};

const MSL: &str = r#"
#include <metal_stdlib>
using namespace metal;

struct VertexOut {
    float4 position [[position]];
};

vertex VertexOut vs_main(uint vid [[vertex_id]], constant float4x4& mvp [[buffer(4)]]) {
    float2 corners[3] = { float2(0.0, 0.5), float2(-0.5, -0.5), float2(0.5, -0.5) };
    VertexOut out;
    out.position = mvp * float4(corners[vid], 0.0, 1.0);
    return out;
}

fragment float4 fs_main(VertexOut in [[stage_in]]) {
    return float4(1.0, 0.0, 0.0, 1.0);
}
"#;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn device() -> BindlessDevice {
    init_logger();
    BindlessDevice::new_software(&DeviceDescriptor::default(), SoftwareConfig::default())
        .expect("software device")
}

fn software(device: &BindlessDevice) -> &SoftwareDevice {
    device.software().expect("software driver")
}

fn uniform_layout(device: &BindlessDevice, visibility: ShaderStages) -> Box<dyn BindGroupLayout> {
    device
        .create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("uniforms"),
            entries: vec![BindGroupLayoutEntry {
                binding: 0,
                visibility,
                ty: BindingType::UniformBuffer,
            }],
        })
        .unwrap()
}

fn uniform_group(
    device: &BindlessDevice,
    layout: &dyn BindGroupLayout,
    buffer: &dyn Buffer,
) -> Box<dyn BindGroup> {
    device
        .create_bind_group(&BindGroupDescriptor {
            label: None,
            layout,
            entries: vec![BindGroupEntry {
                binding: 0,
                resource: BindingResource::Buffer {
                    buffer,
                    offset: 0,
                    size: None,
                },
            }],
        })
        .unwrap()
}

fn pipeline(device: &BindlessDevice, layouts: Vec<&dyn BindGroupLayout>) -> Box<dyn RenderPipeline> {
    let module = device
        .create_shader_module(&ShaderModuleDescriptor {
            label: Some("triangle"),
            source: ShaderSource::msl(MSL),
        })
        .unwrap();
    device
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
                targets: vec![ColorTargetState::from(TextureFormat::Rgba8Unorm)],
            }),
            primitive: PrimitiveState::default(),
            depth_stencil: None,
            bind_group_layouts: layouts,
        })
        .unwrap()
}

fn render_target(device: &BindlessDevice) -> Box<dyn Texture> {
    device
        .create_texture(&TextureDescriptor {
            label: Some("target"),
            size: (4, 4, 1),
            format: TextureFormat::Rgba8Unorm,
            usage: TextureUsage::RENDER_ATTACHMENT | TextureUsage::COPY_SRC,
            ..Default::default()
        })
        .unwrap()
}

fn pass_desc(view: &dyn TextureView) -> RenderPassDescriptor<'_> {
    RenderPassDescriptor {
        label: Some("main"),
        color_attachments: vec![ColorAttachment {
            view,
            load_op: LoadOp::Clear,
            store_op: StoreOp::Store,
            clear_value: None,
        }],
        depth_stencil_attachment: None,
    }
}

fn bindless_buffer(buffer: &dyn Buffer) -> &BindlessBuffer {
    buffer.as_any().downcast_ref::<BindlessBuffer>().unwrap()
}

fn lagging_device() -> BindlessDevice {
    init_logger();
    BindlessDevice::new_software(
        &DeviceDescriptor::default(),
        SoftwareConfig {
            execution_delay: Duration::from_millis(20),
            ..Default::default()
        },
    )
    .expect("software device")
}

#[test]
fn uniform_slots_follow_the_frame_counter() {
    // The GPU lags behind, so earlier frames are still queued while later ones write.
    let device = lagging_device();
    let queue = device.queue();
    let layout = uniform_layout(&device, ShaderStages::VERTEX);
    let pipeline = pipeline(&device, vec![layout.as_ref()]);
    let target = render_target(&device);
    let view = target.create_view(&Default::default()).unwrap();
    let tag = TypedBuffer::<[u32; 4]>::new(&device, Some("tag"), BufferUsage::UNIFORM).unwrap();
    assert_eq!(tag.raw().slot_count(), MAX_FRAMES_IN_FLIGHT);
    let group = uniform_group(&device, layout.as_ref(), tag.raw());

    let frames = 2 * MAX_FRAMES_IN_FLIGHT;
    let mut addresses = Vec::new();
    for frame in 0..frames as u32 {
        tag.write(queue.as_ref(), 0, &[frame; 4]).unwrap();
        addresses.push(tag.raw().gpu_address().unwrap());
        let mut encoder = device.create_command_encoder().unwrap();
        let mut pass = encoder.begin_render_pass(&pass_desc(view.as_ref())).unwrap();
        pass.set_pipeline(pipeline.as_ref()).unwrap();
        pass.set_bind_group(0, group.as_ref()).unwrap();
        pass.draw(0..3, 0..1).unwrap();
        pass.end().unwrap();
        queue.submit(vec![encoder.finish().unwrap()]).unwrap();
        device.end_frame().unwrap();
    }
    device.wait_idle().unwrap();

    let slots = bindless_buffer(tag.raw()).allocations().to_vec();
    let draws = software(&device).executed_draws();
    assert_eq!(draws.len(), frames);
    let observed: Vec<u32> = draws
        .iter()
        .map(|draw| {
            let bound = draw.vertex_stage_buffer(buffer_slot(0, 0).unwrap()).unwrap();
            bytemuck::pod_read_unaligned::<[u32; 4]>(&bound.contents[..16])[0]
        })
        .collect();
    assert_eq!(observed, (0..frames as u32).collect::<Vec<_>>());
    for (frame, draw) in draws.iter().enumerate() {
        let bound = draw.vertex_stage_buffer(buffer_slot(0, 0).unwrap()).unwrap();
        assert_eq!(bound.gpu_address, addresses[frame]);
        assert_eq!(bound.gpu_address, slots[frame % MAX_FRAMES_IN_FLIGHT].gpu_address);
        assert!(draw.fragment_stage_buffers.is_empty());
    }
    assert_ne!(addresses[0], addresses[1]);
    assert_ne!(addresses[1], addresses[2]);
    assert_ne!(addresses[0], addresses[2]);
    assert_eq!(addresses[0], addresses[MAX_FRAMES_IN_FLIGHT]);
    assert_eq!(device.frame_counter(), frames as u64);
    assert_eq!(software(&device).residency_faults(), 0);
}

#[test]
fn a_single_write_reaches_every_later_frame() {
    let device = lagging_device();
    let queue = device.queue();
    let layout = uniform_layout(&device, ShaderStages::VERTEX);
    let pipeline = pipeline(&device, vec![layout.as_ref()]);
    let target = render_target(&device);
    let view = target.create_view(&Default::default()).unwrap();
    let tag = TypedBuffer::<[u32; 4]>::new(&device, Some("tag"), BufferUsage::UNIFORM).unwrap();
    let group = uniform_group(&device, layout.as_ref(), tag.raw());

    tag.write(queue.as_ref(), 0, &[7; 4]).unwrap();
    for _ in 0..MAX_FRAMES_IN_FLIGHT + 1 {
        let mut encoder = device.create_command_encoder().unwrap();
        let mut pass = encoder.begin_render_pass(&pass_desc(view.as_ref())).unwrap();
        pass.set_pipeline(pipeline.as_ref()).unwrap();
        pass.set_bind_group(0, group.as_ref()).unwrap();
        pass.draw(0..3, 0..1).unwrap();
        pass.end().unwrap();
        queue.submit(vec![encoder.finish().unwrap()]).unwrap();
        device.end_frame().unwrap();
    }
    device.wait_idle().unwrap();

    for draw in software(&device).executed_draws() {
        let bound = draw.vertex_stage_buffer(buffer_slot(0, 0).unwrap()).unwrap();
        let observed: [u32; 4] = bytemuck::pod_read_unaligned(&bound.contents[..16]);
        assert_eq!(observed, [7; 4]);
    }

    // Writes still staged for other slots are dropped with the buffer.
    tag.write(queue.as_ref(), 0, &[8; 4]).unwrap();
    tag.raw().dispose();
    device.create_command_encoder().unwrap();
    device.end_frame().unwrap();
    device.create_command_encoder().unwrap();
}

#[test]
fn bind_group_ranges_past_the_buffer_are_rejected() {
    let device = device();
    let layout = uniform_layout(&device, ShaderStages::VERTEX);
    let buffer = device
        .create_buffer(&BufferDescriptor {
            label: None,
            size: 64,
            usage: BufferUsage::UNIFORM,
        })
        .unwrap();
    let group = |offset: u64, size: Option<u64>| {
        device.create_bind_group(&BindGroupDescriptor {
            label: None,
            layout: layout.as_ref(),
            entries: vec![BindGroupEntry {
                binding: 0,
                resource: BindingResource::Buffer {
                    buffer: buffer.as_ref(),
                    offset,
                    size,
                },
            }],
        })
    };
    assert!(group(0, Some(64)).is_ok());
    assert!(matches!(
        group(48, Some(32)),
        Err(RhiError::OutOfBounds { offset: 48, len: 32, size: 64 })
    ));
    assert!(matches!(
        group(u64::MAX - 4, Some(16)),
        Err(RhiError::OutOfBounds { len: 16, .. })
    ));
    assert!(matches!(group(128, None), Err(RhiError::OutOfBounds { .. })));
}

#[test]
fn buffer_lifetime_restores_residency() {
    let device = device();
    let before = device.residency().len();
    let buffer = device
        .create_buffer(&BufferDescriptor {
            label: None,
            size: 64,
            usage: BufferUsage::UNIFORM,
        })
        .unwrap();
    assert_eq!(device.residency().len(), before + MAX_FRAMES_IN_FLIGHT);
    buffer.dispose();
    assert!(buffer.is_disposed());
    assert_eq!(device.residency().len(), before);
    assert!(buffer.gpu_address().is_none());

    let sw = software(&device);
    let base = sw.residency_commits();
    device.residency().commit();
    device.residency().commit();
    assert!(sw.residency_commits() - base <= 1);
}

#[test]
fn pass_rejects_commands_after_end() {
    let device = device();
    let layout = uniform_layout(&device, ShaderStages::VERTEX);
    let pipeline = pipeline(&device, vec![layout.as_ref()]);
    let ubo = device
        .create_buffer(&BufferDescriptor {
            label: None,
            size: 64,
            usage: BufferUsage::UNIFORM,
        })
        .unwrap();
    let group = uniform_group(&device, layout.as_ref(), ubo.as_ref());
    let target = render_target(&device);
    let view = target.create_view(&Default::default()).unwrap();

    let mut encoder = device.create_command_encoder().unwrap();
    let mut pass = encoder.begin_render_pass(&pass_desc(view.as_ref())).unwrap();
    assert_eq!(pass.state(), PassState::Recording);
    pass.end().unwrap();
    assert_eq!(pass.state(), PassState::Ended);
    assert!(matches!(
        pass.draw(0..3, 0..1),
        Err(RhiError::InvalidPassState {
            state: PassState::Ended,
            ..
        })
    ));
    assert!(pass.set_pipeline(pipeline.as_ref()).is_err());
    assert!(pass.set_bind_group(0, group.as_ref()).is_err());
    assert!(pass.end().is_err());
    pass.dispose().unwrap();
    assert_eq!(pass.state(), PassState::Disposed);
    pass.dispose().unwrap();
    assert!(pass.draw(0..3, 0..1).is_err());

    let mut open = encoder.begin_render_pass(&pass_desc(view.as_ref())).unwrap();
    assert!(matches!(
        open.dispose(),
        Err(RhiError::InvalidPassState {
            state: PassState::Recording,
            ..
        })
    ));
    assert_eq!(open.state(), PassState::Recording);
    assert!(matches!(
        encoder.finish(),
        Err(RhiError::InvalidPassState { .. })
    ));
}

#[test]
fn dropping_a_recording_pass_ends_it() {
    let device = device();
    let target = render_target(&device);
    let view = target.create_view(&Default::default()).unwrap();
    let mut encoder = device.create_command_encoder().unwrap();
    let pass = encoder.begin_render_pass(&pass_desc(view.as_ref())).unwrap();
    drop(pass);
    let buffer = encoder.finish().unwrap();
    let buffer = buffer
        .as_any()
        .downcast_ref::<BindlessCommandBuffer>()
        .unwrap();
    let commands = &buffer.native().commands;
    assert!(matches!(commands[0], NativeCommand::BeginRenderPass(_)));
    assert!(matches!(
        commands[commands.len() - 2],
        NativeCommand::Barrier { .. }
    ));
    assert_eq!(commands.last(), Some(&NativeCommand::EndRenderPass));
}

#[test]
fn sizes_round_to_copy_alignment() {
    let device = device();
    let queue = device.queue();
    let buffer = device
        .create_buffer(&BufferDescriptor {
            label: None,
            size: 1,
            usage: BufferUsage::VERTEX,
        })
        .unwrap();
    assert_eq!(buffer.size(), 4);
    assert!(buffer.update_data(queue.as_ref(), 0, &[1, 2, 3, 4]).is_ok());
    assert_eq!(
        buffer.update_data(queue.as_ref(), 2, &[0; 4]),
        Err(RhiError::OutOfBounds {
            offset: 2,
            len: 4,
            size: 4
        })
    );
    assert!(matches!(
        device.create_buffer(&BufferDescriptor::default()),
        Err(RhiError::InvalidDescriptor(_))
    ));
}

#[test]
fn only_msl_is_accepted() {
    let device = device();
    let err = device
        .create_shader_module(&ShaderModuleDescriptor {
            label: None,
            source: ShaderSource::wgsl("@vertex fn main() {}"),
        })
        .unwrap_err();
    assert_eq!(
        err,
        RhiError::UnsupportedShaderLanguage {
            expected: ShaderLanguage::Msl,
            got: ShaderLanguage::Wgsl,
        }
    );
    assert!(matches!(
        device.create_shader_module(&ShaderModuleDescriptor {
            label: None,
            source: ShaderSource::msl("float helper() { return 1.0; }"),
        }),
        Err(RhiError::ShaderCompilation(_))
    ));
}

#[test]
fn resources_from_another_device_are_rejected() {
    let a = device();
    let b = device();
    let layout = uniform_layout(&a, ShaderStages::VERTEX);
    let foreign = b
        .create_buffer(&BufferDescriptor {
            label: None,
            size: 16,
            usage: BufferUsage::UNIFORM,
        })
        .unwrap();
    let err = a
        .create_bind_group(&BindGroupDescriptor {
            label: None,
            layout: layout.as_ref(),
            entries: vec![BindGroupEntry {
                binding: 0,
                resource: BindingResource::Buffer {
                    buffer: foreign.as_ref(),
                    offset: 0,
                    size: None,
                },
            }],
        })
        .unwrap_err();
    assert_eq!(err, RhiError::ForeignResource("buffer"));
}

#[test]
fn dispose_releases_in_order_once() {
    let device = BindlessDevice::new_software(
        &DeviceDescriptor::default().with_surface(SurfaceTarget::Headless {
            width: 8,
            height: 8,
            format: TextureFormat::Bgra8Unorm,
        }),
        SoftwareConfig::default(),
    )
    .unwrap();
    device.dispose();
    device.dispose();
    assert_eq!(
        software(&device).release_log(),
        vec![
            "command_queue",
            "command_allocator",
            "command_allocator",
            "command_allocator",
            "compiler",
            "residency_set",
            "device",
        ]
    );
    assert!(matches!(
        device.create_buffer(&BufferDescriptor {
            label: None,
            size: 4,
            usage: BufferUsage::VERTEX,
        }),
        Err(RhiError::Disposed("device"))
    ));
    // The borrowed queue handle ignores dispose.
    device.queue().dispose();
}

#[test]
fn freed_buffers_fault_on_the_gpu() {
    let device = device();
    let queue = device.queue();
    let layout = uniform_layout(&device, ShaderStages::VERTEX | ShaderStages::FRAGMENT);
    let pipeline = pipeline(&device, vec![layout.as_ref()]);
    let ubo = device
        .create_buffer(&BufferDescriptor {
            label: None,
            size: 64,
            usage: BufferUsage::UNIFORM,
        })
        .unwrap();
    let group = uniform_group(&device, layout.as_ref(), ubo.as_ref());
    let target = render_target(&device);
    let view = target.create_view(&Default::default()).unwrap();

    let mut encoder = device.create_command_encoder().unwrap();
    let mut pass = encoder.begin_render_pass(&pass_desc(view.as_ref())).unwrap();
    pass.set_pipeline(pipeline.as_ref()).unwrap();
    pass.set_bind_group(0, group.as_ref()).unwrap();
    pass.draw(0..3, 0..1).unwrap();
    pass.end().unwrap();
    let commands = encoder.finish().unwrap();
    ubo.dispose();
    queue.submit(vec![commands]).unwrap();
    device.wait_idle().unwrap();

    let draws = software(&device).executed_draws();
    assert_eq!(draws.len(), 1);
    assert!(draws[0].vertex_stage_buffers[0].contents.is_empty());
    // Visible to both stages, so both tables fault.
    assert_eq!(software(&device).residency_faults(), 2);
}

#[test]
fn headless_present_clears_and_advances() {
    init_logger();
    let device = BindlessDevice::new_software(
        &DeviceDescriptor::default().with_surface(SurfaceTarget::Headless {
            width: 4,
            height: 4,
            format: TextureFormat::Bgra8Unorm,
        }),
        SoftwareConfig::default(),
    )
    .unwrap();
    let queue = device.queue();
    let surface = device.surface().unwrap();
    assert_eq!(surface.extent(), (4, 4));

    let mut encoder = device.create_command_encoder().unwrap();
    let frame = surface.acquire_texture().unwrap();
    assert!(!frame.is_owned());
    let view = frame.create_view(&Default::default()).unwrap();
    let mut pass = encoder
        .begin_render_pass(&RenderPassDescriptor {
            label: None,
            color_attachments: vec![ColorAttachment {
                view: view.as_ref(),
                load_op: LoadOp::Clear,
                store_op: StoreOp::Store,
                clear_value: Some(crate::ClearColor {
                    r: 1.0,
                    g: 0.0,
                    b: 0.0,
                    a: 1.0,
                }),
            }],
            depth_stencil_attachment: None,
        })
        .unwrap();
    pass.end().unwrap();
    queue.submit(vec![encoder.finish().unwrap()]).unwrap();
    surface.present().unwrap();
    assert_eq!(device.frame_counter(), 1);

    device.wait_idle().unwrap();
    let drawable = device.bindless_surface().unwrap().last_presented().unwrap();
    let texels = software(&device).read_texture(&drawable, 0, 0).unwrap();
    assert_eq!(texels.len(), 4 * 4 * 4);
    assert!(texels.chunks(4).all(|t| t == [0, 0, 255, 255]));

    frame.dispose();
    assert!(software(&device).is_live(&drawable));

    surface.configure(8, 2).unwrap();
    assert_eq!(surface.extent(), (8, 2));
    assert!(!software(&device).is_live(&drawable));
}

#[test]
fn bind_order_across_groups_commutes() {
    let device = device();
    let queue = device.queue();
    let layout0 = uniform_layout(&device, ShaderStages::VERTEX);
    let layout1 = device
        .create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("material"),
            entries: vec![
                BindGroupLayoutEntry {
                    binding: 0,
                    visibility: ShaderStages::FRAGMENT,
                    ty: BindingType::Texture {
                        sample_type: TextureSampleType::Float { filterable: true },
                        view_dimension: TextureViewDimension::D2,
                        multisampled: false,
                    },
                },
                BindGroupLayoutEntry {
                    binding: 1,
                    visibility: ShaderStages::FRAGMENT,
                    ty: BindingType::Sampler(SamplerBindingType::Filtering),
                },
            ],
        })
        .unwrap();
    let pipeline = pipeline(&device, vec![layout0.as_ref(), layout1.as_ref()]);
    let ubo = device
        .create_buffer(&BufferDescriptor {
            label: None,
            size: 64,
            usage: BufferUsage::UNIFORM,
        })
        .unwrap();
    let group0 = uniform_group(&device, layout0.as_ref(), ubo.as_ref());
    let albedo = device
        .create_texture(&TextureDescriptor {
            label: Some("albedo"),
            size: (2, 2, 1),
            usage: TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
            ..Default::default()
        })
        .unwrap();
    let albedo_view = albedo.create_view(&Default::default()).unwrap();
    let sampler = device.create_sampler(&SamplerDescriptor::default()).unwrap();
    let group1 = device
        .create_bind_group(&BindGroupDescriptor {
            label: None,
            layout: layout1.as_ref(),
            entries: vec![
                BindGroupEntry {
                    binding: 0,
                    resource: BindingResource::TextureView(albedo_view.as_ref()),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: BindingResource::Sampler(sampler.as_ref()),
                },
            ],
        })
        .unwrap();
    let target = render_target(&device);
    let view = target.create_view(&Default::default()).unwrap();

    let mut encoder = device.create_command_encoder().unwrap();
    for order in [[0u32, 1], [1, 0]] {
        let mut pass = encoder.begin_render_pass(&pass_desc(view.as_ref())).unwrap();
        pass.set_pipeline(pipeline.as_ref()).unwrap();
        for index in order {
            let group = if index == 0 { &group0 } else { &group1 };
            pass.set_bind_group(index, group.as_ref()).unwrap();
        }
        pass.draw(0..3, 0..1).unwrap();
        pass.end().unwrap();
    }
    queue.submit(vec![encoder.finish().unwrap()]).unwrap();
    device.wait_idle().unwrap();

    let draws = software(&device).executed_draws();
    assert_eq!(draws.len(), 2);
    assert_eq!(draws[0].vertex_stage_buffers, draws[1].vertex_stage_buffers);
    assert_eq!(draws[0].textures, draws[1].textures);
    assert_eq!(draws[0].samplers, draws[1].samplers);
    let albedo_id = albedo
        .as_any()
        .downcast_ref::<BindlessTexture>()
        .unwrap()
        .resource_id();
    assert_eq!(draws[0].textures, vec![(texture_slot(1, 0).unwrap(), albedo_id)]);
    assert_eq!(draws[0].samplers.len(), 1);
    assert_eq!(draws[0].samplers[0].0, sampler_slot(1, 1).unwrap());
    assert_eq!(software(&device).residency_faults(), 0);

    // Group 1's layout does not fit index 0 of this pipeline.
    let mut encoder = device.create_command_encoder().unwrap();
    let mut pass = encoder.begin_render_pass(&pass_desc(view.as_ref())).unwrap();
    pass.set_pipeline(pipeline.as_ref()).unwrap();
    assert!(matches!(
        pass.set_bind_group(0, group1.as_ref()),
        Err(RhiError::LayoutMismatch(_))
    ));
    assert!(matches!(
        pass.set_bind_group(4, group0.as_ref()),
        Err(RhiError::BindingOutOfRange { group: 4, .. })
    ));
    pass.end().unwrap();
}

#[test]
fn texture_upload_and_buffer_copy() {
    let device = device();
    let queue = device.queue();
    let texture = device
        .create_texture(&TextureDescriptor {
            label: Some("upload"),
            size: (2, 2, 1),
            usage: TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
            ..Default::default()
        })
        .unwrap();
    let texels: Vec<u8> = (0..16).collect();
    queue
        .write_texture(
            texture.as_ref(),
            0,
            (0, 0, 0),
            &texels,
            TextureDataLayout::default(),
            (2, 2, 1),
        )
        .unwrap();
    let allocation = texture
        .as_any()
        .downcast_ref::<BindlessTexture>()
        .unwrap()
        .allocation();
    assert_eq!(software(&device).read_texture(&allocation, 0, 0).unwrap(), texels);
    for (origin, size) in [((u32::MAX, 0, 0), (2, 1, 1)), ((0, 0, 0), (u32::MAX, 1, 1))] {
        assert!(matches!(
            queue.write_texture(
                texture.as_ref(),
                0,
                origin,
                &texels,
                TextureDataLayout::default(),
                size,
            ),
            Err(RhiError::InvalidDescriptor(_))
        ));
    }

    let src = device
        .create_buffer_init(&BufferInitDescriptor {
            label: Some("src"),
            contents: &[1, 2, 3, 4, 5, 6, 7, 8],
            usage: BufferUsage::COPY_SRC,
        })
        .unwrap();
    let dst = device
        .create_buffer(&BufferDescriptor {
            label: Some("dst"),
            size: 8,
            usage: BufferUsage::COPY_DST,
        })
        .unwrap();
    let mut encoder = device.create_command_encoder().unwrap();
    assert!(matches!(
        encoder.copy_buffer_to_buffer(src.as_ref(), 0, dst.as_ref(), 0, 3),
        Err(RhiError::Misaligned { .. })
    ));
    encoder
        .copy_buffer_to_buffer(src.as_ref(), 0, dst.as_ref(), 4, 4)
        .unwrap();
    queue.submit(vec![encoder.finish().unwrap()]).unwrap();
    device.wait_idle().unwrap();
    let dst_allocation = bindless_buffer(dst.as_ref()).allocation();
    assert_eq!(
        software(&device).read_buffer(&dst_allocation, 0, 8).unwrap(),
        vec![0, 0, 0, 0, 1, 2, 3, 4]
    );
}

#[test]
fn indexed_draws_check_the_index_range() {
    let device = device();
    let queue = device.queue();
    let pipeline = pipeline(&device, Vec::new());
    let indices = device
        .create_buffer_init(&BufferInitDescriptor {
            label: Some("indices"),
            contents: bytemuck::cast_slice(&[0u16, 1, 2]),
            usage: BufferUsage::INDEX,
        })
        .unwrap();
    assert_eq!(indices.size(), 8);
    let target = render_target(&device);
    let view = target.create_view(&Default::default()).unwrap();

    let mut encoder = device.create_command_encoder().unwrap();
    let mut pass = encoder.begin_render_pass(&pass_desc(view.as_ref())).unwrap();
    pass.set_pipeline(pipeline.as_ref()).unwrap();
    assert!(matches!(
        pass.draw_indexed(0..3, 0, 0..1),
        Err(RhiError::InvalidDescriptor(_))
    ));
    pass.set_index_buffer(indices.as_ref(), 0, IndexFormat::Uint16)
        .unwrap();
    assert!(matches!(
        pass.draw_indexed(0..5, 0, 0..1),
        Err(RhiError::OutOfBounds { .. })
    ));
    pass.draw_indexed(0..3, 0, 0..2).unwrap();
    pass.end().unwrap();
    queue.submit(vec![encoder.finish().unwrap()]).unwrap();
    device.wait_idle().unwrap();

    let draws = software(&device).executed_draws();
    assert_eq!(draws.len(), 1);
    assert!(draws[0].indexed);
    assert_eq!(draws[0].element_count, 3);
    assert_eq!(draws[0].instance_count, 2);
}

#[test]
fn encoders_in_one_frame_share_its_allocator() {
    let device = device();
    let sw = software(&device);
    let _first = device.create_command_encoder().unwrap();
    let _second = device.create_command_encoder().unwrap();
    assert_eq!(sw.allocator_resets(), 1);
    device.end_frame().unwrap();
    let _third = device.create_command_encoder().unwrap();
    assert_eq!(sw.allocator_resets(), 2);
}
