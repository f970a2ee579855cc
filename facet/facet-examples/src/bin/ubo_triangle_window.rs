//! UBO triangle in a window: WebGPU device presenting to a winit window, MVP uniform rotated
//! every frame.
//! Run: cargo run --bin ubo_triangle_window --features webgpu

#[cfg(feature = "webgpu")]
use std::sync::Arc;
#[cfg(feature = "webgpu")]
use std::time::Instant;

#[cfg(feature = "webgpu")]
use bytemuck::{Pod, Zeroable};
#[cfg(feature = "webgpu")]
use facet_rhi::{
    BindGroup, BindGroupDescriptor, BindGroupEntry, BindGroupLayoutDescriptor,
    BindGroupLayoutEntry, BindingResource, BindingType, BufferUsage, ClearColor, ColorAttachment,
    ColorTargetState, Device, DeviceDescriptor, FragmentState, LoadOp, PrimitiveState,
    RenderPassDescriptor, RenderPipeline, RenderPipelineDescriptor, RhiError,
    ShaderModuleDescriptor, ShaderSource, ShaderStages, StoreOp, SurfaceTarget, TypedBuffer,
    VertexAttribute, VertexBufferLayout, VertexFormat, VertexState, VertexStepMode, WebGpuDevice,
};
#[cfg(feature = "webgpu")]
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
#[cfg(feature = "webgpu")]
use winit::application::ApplicationHandler;
#[cfg(feature = "webgpu")]
use winit::event::WindowEvent;
#[cfg(feature = "webgpu")]
use winit::event_loop::{ActiveEventLoop, EventLoop};
#[cfg(feature = "webgpu")]
use winit::window::{Window, WindowId};

#[cfg(feature = "webgpu")]
const SHADER: &str = r#"
@group(0) @binding(0) var<uniform> mvp: mat4x4<f32>;

@vertex
fn vs_main(@location(0) position: vec3<f32>) -> @builtin(position) vec4<f32> {
    return mvp * vec4<f32>(position, 1.0);
}

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return vec4<f32>(0.2, 0.8, 0.2, 1.0);
}
"#;

#[cfg(feature = "webgpu")]
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct Uniforms {
    mvp: [[f32; 4]; 4],
}

/// GPU objects; dropped before the window they present to.
#[cfg(feature = "webgpu")]
struct Renderer {
    device: Arc<dyn Device>,
    pipeline: Box<dyn RenderPipeline>,
    vertex_buffer: TypedBuffer<[[f32; 3]; 3]>,
    uniforms: TypedBuffer<Uniforms>,
    group: Box<dyn BindGroup>,
}

#[cfg(feature = "webgpu")]
impl Renderer {
    fn new(window: &Window) -> Self {
        let size = window.inner_size();
        let target = SurfaceTarget::Window {
            window: window.window_handle().expect("window handle").as_raw(),
            display: window.display_handle().expect("display handle").as_raw(),
            width: size.width.max(1),
            height: size.height.max(1),
        };
        let desc = DeviceDescriptor::from_env().with_surface(target);
        let device: Arc<dyn Device> =
            Arc::new(WebGpuDevice::new(&desc).expect("create webgpu device"));
        log::info!("device: {:?}", device.adapter_info());
        let surface = device.surface().expect("window surface");

        let vertices: [[f32; 3]; 3] = [[0.0, 0.6, 0.0], [-0.6, -0.6, 0.0], [0.6, -0.6, 0.0]];
        let vertex_buffer = TypedBuffer::with_data(
            device.as_ref(),
            Some("vertices"),
            &vertices,
            BufferUsage::VERTEX,
        )
        .expect("create vertex buffer");
        let uniforms =
            TypedBuffer::<Uniforms>::new(device.as_ref(), Some("uniforms"), BufferUsage::UNIFORM)
                .expect("create uniform buffer");

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
                        buffer: uniforms.raw(),
                        offset: 0,
                        size: None,
                    },
                }],
            })
            .expect("create bind group");
        let module = device
            .create_shader_module(&ShaderModuleDescriptor {
                label: Some("ubo_triangle"),
                source: ShaderSource::wgsl(SHADER),
            })
            .expect("compile shader");
        let pipeline = device
            .create_render_pipeline(&RenderPipelineDescriptor {
                label: Some("ubo_triangle"),
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

        Self {
            device,
            pipeline,
            vertex_buffer,
            uniforms,
            group,
        }
    }

    fn render(&self, seconds: f32) -> Result<(), RhiError> {
        let surface = self.device.surface().ok_or(RhiError::Surface("no surface".into()))?;
        let (s, c) = seconds.sin_cos();
        let uniforms = Uniforms {
            mvp: [
                [c, s, 0.0, 0.0],
                [-s, c, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
                [0.0, 0.0, 0.0, 1.0],
            ],
        };
        self.uniforms.write(self.device.queue().as_ref(), 0, &uniforms)?;

        let frame = surface.acquire_texture()?;
        let view = frame.create_view(&Default::default())?;
        let mut encoder = self.device.create_command_encoder()?;
        let mut pass = encoder.begin_render_pass(&RenderPassDescriptor {
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
        })?;
        pass.set_pipeline(self.pipeline.as_ref())?;
        pass.set_bind_group(0, self.group.as_ref())?;
        pass.set_vertex_buffer(0, self.vertex_buffer.raw(), 0)?;
        pass.draw(0..3, 0..1)?;
        pass.end()?;
        self.device.queue().submit(vec![encoder.finish()?])?;
        surface.present()
    }
}

#[cfg(feature = "webgpu")]
#[derive(Default)]
struct App {
    // Field order matters: the renderer drops before the window.
    renderer: Option<Renderer>,
    window: Option<Window>,
    started: Option<Instant>,
}

#[cfg(feature = "webgpu")]
impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let attrs = Window::default_attributes()
            .with_title("Facet UBO Triangle")
            .with_inner_size(winit::dpi::LogicalSize::new(640, 480));
        let window = event_loop.create_window(attrs).expect("create window");
        self.renderer = Some(Renderer::new(&window));
        self.started = Some(Instant::now());
        window.request_redraw();
        self.window = Some(window);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                if let Some(renderer) = self.renderer.take() {
                    let _ = renderer.device.wait_idle();
                    renderer.device.dispose();
                }
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if size.width == 0 || size.height == 0 {
                    return;
                }
                if let Some(surface) = self.renderer.as_ref().and_then(|r| r.device.surface()) {
                    if let Err(e) = surface.configure(size.width, size.height) {
                        log::warn!("surface resize failed: {}", e);
                    }
                }
            }
            WindowEvent::RedrawRequested => {
                if let (Some(renderer), Some(started)) = (&self.renderer, self.started) {
                    if let Err(e) = renderer.render(started.elapsed().as_secs_f32()) {
                        log::error!("frame failed: {}", e);
                    }
                }
                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }
            _ => {}
        }
    }
}

#[cfg(feature = "webgpu")]
fn main() {
    env_logger::init();
    let event_loop = EventLoop::new().expect("EventLoop::new");
    let mut app = App::default();
    if let Err(e) = event_loop.run_app(&mut app) {
        log::error!("event loop error: {}", e);
    }
}

#[cfg(not(feature = "webgpu"))]
fn main() {
    eprintln!("Build and run with: cargo run --bin ubo_triangle_window --features webgpu");
}
