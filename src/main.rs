use std::sync::Arc;
use std::time::Instant;
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowId};

use nodemesh::{
    Camera, Color, DataDescriptor, DataUpdate, Geometry, GpuContext, MaterialKind, MeshConfig,
    Node, NodeMesh, NodeMeshPass, NodeType, Operation, PrimitiveKind,
};

/// A translucent, wobbling sphere sorted back to front every frame.
fn build_sphere() -> Result<NodeMesh, nodemesh::MeshError> {
    let mut mesh = NodeMesh::with_config(
        PrimitiveKind::Mesh,
        MaterialKind::Lit,
        Geometry::sphere(48, 24),
        vec![DataDescriptor::single("phase", 1)],
        MeshConfig::new()
            .default_color(Color::from_hex(0x4c9aff))
            .label("sphere"),
    )?;

    let phase = Node::attribute("phase", NodeType::Float);
    let wobble = (Node::time() * 2.0 + &phase).sin() * 0.04;
    mesh.add_transform_node(Operation::Add, Node::normal_local() * wobble);

    let height = Node::position_local().y();
    mesh.add_expression_node(Node::assign_varying("height", &height));
    mesh.add_color_node(
        Operation::Mul,
        Node::varying("height", NodeType::Float) * 0.8 + 0.6,
    );

    mesh.add_alpha_node(Operation::Mul, Node::float(0.55));
    mesh.add_mask_node(height.gt(&Node::float(-0.35)));

    mesh.build_material()?;
    Ok(mesh)
}

fn phases(vertex_count: usize, time: f32) -> Vec<f32> {
    (0..vertex_count)
        .map(|i| (i as f32 * 0.618 + time * 0.1).fract() * std::f32::consts::TAU)
        .collect()
}

struct Scene {
    gpu: GpuContext,
    pass: NodeMeshPass,
    sphere: NodeMesh,
}

struct App {
    window: Option<Arc<Window>>,
    scene: Option<Scene>,
    start_time: Instant,
}

impl Default for App {
    fn default() -> Self {
        Self {
            window: None,
            scene: None,
            start_time: Instant::now(),
        }
    }
}

impl App {
    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<(), Box<dyn std::error::Error>> {
        let window = Arc::new(
            event_loop.create_window(Window::default_attributes().with_title("nodemesh"))?,
        );
        let gpu = GpuContext::new(window.clone())?;
        let pass = NodeMeshPass::new(&gpu);
        let sphere = build_sphere()?;

        self.scene = Some(Scene { gpu, pass, sphere });
        self.window = Some(window);
        Ok(())
    }

    fn frame(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        let Some(scene) = &mut self.scene else {
            return Ok(());
        };
        let time = self.start_time.elapsed().as_secs_f32();

        let camera = Camera::new().orbit(time * 0.3, 0.35, 2.5);
        let vertex_count = scene.sphere.geometry().borrow().vertex_count();
        let mut update = DataUpdate::new();
        update.insert("phase".to_string(), phases(vertex_count, time));
        scene.sphere.update_data(&update)?;
        scene.sphere.sort_triangle_indices(camera.position)?;

        scene.pass.ensure_depth_size(&scene.gpu);
        scene.pass.update_camera(&scene.gpu, &camera, time);
        scene.pass.prepare(&scene.gpu, &mut scene.sphere)?;

        let output = scene.gpu.surface.get_current_texture()?;
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = scene
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("nodemesh demo"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: 0.02,
                            g: 0.02,
                            b: 0.03,
                            a: 1.0,
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: scene.pass.depth_view(),
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            scene.pass.render(&mut render_pass, &[&scene.sphere]);
        }

        scene.gpu.queue.submit(std::iter::once(encoder.finish()));
        output.present();
        Ok(())
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.scene.is_some() {
            return;
        }
        if let Err(e) = self.init(event_loop) {
            log::error!("startup failed: {e}");
            event_loop.exit();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                if let Some(scene) = self.scene.take() {
                    scene.sphere.dispose();
                }
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(scene) = &mut self.scene {
                    scene.gpu.resize(size.width, size.height);
                }
            }
            WindowEvent::RedrawRequested => {
                if let Err(e) = self.frame() {
                    log::warn!("frame skipped: {e}");
                }
                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }
            _ => (),
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::default();
    event_loop.run_app(&mut app)?;
    Ok(())
}
