//! Device tests. They need a wgpu adapter (a fallback adapter is fine) and skip without one.

use super::*;
use crate::{
    BindGroupEntry, BindGroupLayoutEntry, BindingResource, BindingType, ClearColor,
    ColorAttachment, ColorTargetState, FragmentState, LoadOp, PassState, PrimitiveState,
    RenderPassDescriptor, ScissorRect, ShaderSource, ShaderStages, StoreOp, TextureFormat,
    TextureView, TypedBuffer, VertexState,
};

const WGSL: &str = r#"
struct Uniforms {
    mvp: mat4x4<f32>,
};

@group(0) @binding(0) var<uniform> uniforms: Uniforms;

@vertex
fn vs_main(@builtin(vertex_index) vid: u32) -> @builtin(position) vec4<f32> {
    var corners = array<vec2<f32>, 3>(vec2(0.0, 0.5), vec2(-0.5, -0.5), vec2(0.5, -0.5));
    return uniforms.mvp * vec4<f32>(corners[vid], 0.0, 1.0);
}

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return vec4<f32>(1.0, 0.0, 0.0, 1.0);
}
"#;

const IDENTITY: [[f32; 4]; 4] = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
];

fn device() -> Option<WebGpuDevice> {
    let _ = env_logger::builder().is_test(true).try_init();
    let desc = DeviceDescriptor {
        label: Some("test"),
        surface: Some(SurfaceTarget::Headless {
            width: 4,
            height: 4,
            format: TextureFormat::Rgba8Unorm,
        }),
        ..Default::default()
    };
    match WebGpuDevice::new(&desc) {
        Ok(device) => Some(device),
        Err(err @ (RhiError::AdapterUnavailable(_) | RhiError::DeviceCreation(_))) => {
            eprintln!("skipping webgpu test: {}", err);
            None
        }
        Err(err) => panic!("unexpected device error: {}", err),
    }
}

fn uniform_layout(device: &WebGpuDevice) -> Box<dyn BindGroupLayout> {
    device
        .create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("uniforms"),
            entries: vec![BindGroupLayoutEntry {
                binding: 0,
                visibility: ShaderStages::VERTEX,
                ty: BindingType::UniformBuffer,
            }],
        })
        .unwrap()
}

fn pipeline(device: &WebGpuDevice, layouts: Vec<&dyn BindGroupLayout>) -> Box<dyn RenderPipeline> {
    let module = device
        .create_shader_module(&ShaderModuleDescriptor {
            label: Some("triangle"),
            source: ShaderSource::wgsl(WGSL),
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

fn pass_desc(view: &dyn TextureView, clear: ClearColor) -> RenderPassDescriptor<'_> {
    RenderPassDescriptor {
        label: Some("main"),
        color_attachments: vec![ColorAttachment {
            view,
            load_op: LoadOp::Clear,
            store_op: StoreOp::Store,
            clear_value: Some(clear),
        }],
        depth_stencil_attachment: None,
    }
}

#[test]
fn buffer_sizes_round_and_writes_are_checked() {
    let Some(device) = device() else { return };
    let queue = device.queue();
    let buffer = device
        .create_buffer(&BufferDescriptor {
            label: None,
            size: 6,
            usage: BufferUsage::VERTEX,
        })
        .unwrap();
    assert_eq!(buffer.size(), 8);
    assert_eq!(buffer.slot_count(), 1);

    buffer.update_data(queue.as_ref(), 0, &[1, 2, 3, 4]).unwrap();
    // A partial word would clobber bytes the caller did not supply.
    assert!(matches!(
        buffer.update_data(queue.as_ref(), 0, &[9]),
        Err(RhiError::Misaligned {
            what: "write length",
            value: 1,
            ..
        })
    ));
    let init = device
        .create_buffer_init(&BufferInitDescriptor {
            label: None,
            contents: &[1, 2, 3, 4, 5, 6],
            usage: BufferUsage::VERTEX,
        })
        .unwrap();
    assert_eq!(init.size(), 8);
    assert!(matches!(
        buffer.update_data(queue.as_ref(), 2, &[1, 2]),
        Err(RhiError::Misaligned { value: 2, .. })
    ));
    assert_eq!(
        buffer.update_data(queue.as_ref(), 4, &[0; 8]),
        Err(RhiError::OutOfBounds {
            offset: 4,
            len: 8,
            size: 8
        })
    );
    assert!(matches!(
        device.create_buffer(&BufferDescriptor {
            label: None,
            size: 0,
            usage: BufferUsage::UNIFORM,
        }),
        Err(RhiError::InvalidDescriptor(_))
    ));
}

#[test]
fn only_valid_wgsl_is_accepted() {
    let Some(device) = device() else { return };
    let msl = device.create_shader_module(&ShaderModuleDescriptor {
        label: None,
        source: ShaderSource::msl("vertex float4 vs_main() { return 0; }"),
    });
    assert_eq!(
        msl.unwrap_err(),
        RhiError::UnsupportedShaderLanguage {
            expected: ShaderLanguage::Wgsl,
            got: ShaderLanguage::Msl,
        }
    );
    let broken = device.create_shader_module(&ShaderModuleDescriptor {
        label: Some("broken"),
        source: ShaderSource::wgsl("@vertex fn vs_main( -> {"),
    });
    assert!(matches!(broken, Err(RhiError::ShaderCompilation(_))));
    assert_eq!(device.shader_language(), ShaderLanguage::Wgsl);
}

#[test]
fn pass_rejects_commands_after_end() {
    let Some(device) = device() else { return };
    let surface = device.surface().unwrap();
    let target = surface.acquire_texture().unwrap();
    assert!(!target.is_owned());
    let view = target.create_view(&Default::default()).unwrap();
    let layout = uniform_layout(&device);
    let pipeline = pipeline(&device, vec![layout.as_ref()]);

    let mut encoder = device.create_command_encoder().unwrap();
    let mut pass = encoder
        .begin_render_pass(&pass_desc(view.as_ref(), ClearColor::BLACK))
        .unwrap();
    assert!(matches!(
        encoder.begin_render_pass(&pass_desc(view.as_ref(), ClearColor::BLACK)),
        Err(RhiError::InvalidPassState { .. })
    ));
    assert!(matches!(
        pass.draw(0..3, 0..1),
        Err(RhiError::InvalidDescriptor(_))
    ));
    pass.set_pipeline(pipeline.as_ref()).unwrap();
    assert!(matches!(pass.draw(0..3, 0..1), Err(RhiError::LayoutMismatch(_))));
    assert!(matches!(
        pass.dispose(),
        Err(RhiError::InvalidPassState {
            state: PassState::Recording,
            ..
        })
    ));

    pass.end().unwrap();
    assert_eq!(pass.state(), PassState::Ended);
    assert_eq!(
        pass.set_pipeline(pipeline.as_ref()),
        Err(RhiError::InvalidPassState {
            state: PassState::Ended,
            operation: "set_pipeline",
        })
    );
    pass.dispose().unwrap();
    pass.dispose().unwrap();
    assert_eq!(pass.state(), PassState::Disposed);
    assert!(matches!(
        pass.draw(0..3, 0..1),
        Err(RhiError::InvalidPassState {
            state: PassState::Disposed,
            ..
        })
    ));
    encoder.finish().unwrap();
}

#[test]
fn bind_groups_are_checked_against_the_pipeline() {
    let Some(device) = device() else { return };
    let queue = device.queue();
    let layout = uniform_layout(&device);
    let other_layout = uniform_layout(&device);
    let pipeline = pipeline(&device, vec![layout.as_ref()]);
    let mvp = TypedBuffer::with_data(&device, Some("mvp"), &IDENTITY, BufferUsage::UNIFORM).unwrap();
    mvp.write(queue.as_ref(), 0, &IDENTITY).unwrap();
    let make_group = |layout: &dyn BindGroupLayout| {
        device
            .create_bind_group(&BindGroupDescriptor {
                label: None,
                layout,
                entries: vec![BindGroupEntry {
                    binding: 0,
                    resource: BindingResource::Buffer {
                        buffer: mvp.raw(),
                        offset: 0,
                        size: None,
                    },
                }],
            })
            .unwrap()
    };
    let group = make_group(layout.as_ref());
    let wrong = make_group(other_layout.as_ref());
    assert_eq!(group.layout_id(), layout.id());

    let surface = device.surface().unwrap();
    let target = surface.acquire_texture().unwrap();
    let view = target.create_view(&Default::default()).unwrap();
    let mut encoder = device.create_command_encoder().unwrap();
    let mut pass = encoder
        .begin_render_pass(&pass_desc(view.as_ref(), ClearColor::BLACK))
        .unwrap();
    pass.set_pipeline(pipeline.as_ref()).unwrap();
    assert!(matches!(
        pass.set_bind_group(0, wrong.as_ref()),
        Err(RhiError::LayoutMismatch(_))
    ));
    assert!(matches!(
        pass.set_bind_group(4, group.as_ref()),
        Err(RhiError::BindingOutOfRange { group: 4, .. })
    ));
    assert!(matches!(
        pass.set_scissor_rect(ScissorRect {
            x: 2,
            y: 0,
            width: 4,
            height: 4,
        }),
        Err(RhiError::InvalidDescriptor(_))
    ));
    pass.set_bind_group(0, group.as_ref()).unwrap();
    pass.draw(0..3, 0..1).unwrap();
    pass.end().unwrap();
    queue.submit(vec![encoder.finish().unwrap()]).unwrap();
    surface.present().unwrap();
    assert_eq!(device.frame_counter(), 1);
}

#[test]
fn clear_reaches_the_headless_surface() {
    let Some(device) = device() else { return };
    let queue = device.queue();
    let surface = device.surface().unwrap();
    let target = surface.acquire_texture().unwrap();
    let view = target.create_view(&Default::default()).unwrap();
    let red = ClearColor {
        r: 1.0,
        g: 0.0,
        b: 0.0,
        a: 1.0,
    };
    let mut encoder = device.create_command_encoder().unwrap();
    let mut pass = encoder.begin_render_pass(&pass_desc(view.as_ref(), red)).unwrap();
    pass.end().unwrap();
    queue.submit(vec![encoder.finish().unwrap()]).unwrap();
    surface.present().unwrap();

    // Rows of a texture-to-buffer copy are padded to 256 bytes.
    let texture = device.webgpu_surface().unwrap().headless_texture().unwrap();
    let readback = device.raw().create_buffer(&wgpu::BufferDescriptor {
        label: Some("readback"),
        size: 256 * 4,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let mut copy = device
        .raw()
        .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
    copy.copy_texture_to_buffer(
        wgpu::ImageCopyTexture {
            texture: &*texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::ImageCopyBuffer {
            buffer: &readback,
            layout: wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(256),
                rows_per_image: Some(4),
            },
        },
        wgpu::Extent3d {
            width: 4,
            height: 4,
            depth_or_array_layers: 1,
        },
    );
    device.raw_queue().submit([copy.finish()]);
    let slice = readback.slice(..);
    slice.map_async(wgpu::MapMode::Read, |result| result.unwrap());
    device.raw().poll(wgpu::Maintain::Wait);
    let texels = slice.get_mapped_range();
    for row in 0..4 {
        let start = row * 256;
        assert_eq!(&texels[start..start + 4], &[255, 0, 0, 255]);
        assert_eq!(&texels[start + 12..start + 16], &[255, 0, 0, 255]);
    }
}

#[test]
fn copies_check_alignment_and_bounds() {
    let Some(device) = device() else { return };
    let src = device
        .create_buffer(&BufferDescriptor {
            label: None,
            size: 16,
            usage: BufferUsage::COPY_SRC,
        })
        .unwrap();
    let dst = device
        .create_buffer(&BufferDescriptor {
            label: None,
            size: 8,
            usage: BufferUsage::COPY_DST,
        })
        .unwrap();
    let mut encoder = device.create_command_encoder().unwrap();
    assert!(matches!(
        encoder.copy_buffer_to_buffer(src.as_ref(), 0, dst.as_ref(), 0, 3),
        Err(RhiError::Misaligned { value: 3, .. })
    ));
    assert!(matches!(
        encoder.copy_buffer_to_buffer(src.as_ref(), 0, dst.as_ref(), 4, 8),
        Err(RhiError::OutOfBounds { .. })
    ));
    encoder
        .copy_buffer_to_buffer(src.as_ref(), 8, dst.as_ref(), 0, 8)
        .unwrap();
    dst.dispose();
    assert!(matches!(
        encoder.copy_buffer_to_buffer(src.as_ref(), 0, dst.as_ref(), 0, 4),
        Err(RhiError::Disposed("buffer"))
    ));
    device.queue().submit(vec![encoder.finish().unwrap()]).unwrap();
}

#[test]
fn resources_from_another_device_are_rejected() {
    let Some(device) = device() else { return };
    let Some(other) = self::device() else { return };
    let layout = uniform_layout(&device);
    let buffer = other
        .create_buffer(&BufferDescriptor {
            label: None,
            size: 64,
            usage: BufferUsage::UNIFORM,
        })
        .unwrap();
    let group = device.create_bind_group(&BindGroupDescriptor {
        label: None,
        layout: layout.as_ref(),
        entries: vec![BindGroupEntry {
            binding: 0,
            resource: BindingResource::Buffer {
                buffer: buffer.as_ref(),
                offset: 0,
                size: None,
            },
        }],
    });
    assert_eq!(group.unwrap_err(), RhiError::ForeignResource("buffer"));
    assert_eq!(
        buffer.update_data(device.queue().as_ref(), 0, &[0; 4]),
        Err(RhiError::ForeignResource("buffer"))
    );
}

#[test]
fn end_frame_and_dispose() {
    let Some(device) = device() else { return };
    assert_eq!(device.frame_counter(), 0);
    device.end_frame().unwrap();
    device.end_frame().unwrap();
    assert_eq!(device.frame_counter(), 2);
    assert_eq!(device.frame().frame_index(), 2);
    device.wait_idle().unwrap();

    device.dispose();
    device.dispose();
    assert!(matches!(
        device.create_buffer(&BufferDescriptor::default()),
        Err(RhiError::Disposed("device"))
    ));
    assert_eq!(device.end_frame(), Err(RhiError::Disposed("device")));
    assert!(matches!(
        device.surface().unwrap().acquire_texture(),
        Err(RhiError::Disposed(_))
    ));
}
