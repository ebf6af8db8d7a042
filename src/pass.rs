//! Render pass for node meshes.
//!
//! [`NodeMeshPass`] owns the camera uniforms and a depth buffer. Every
//! [`NodeMesh`] gets its own pipeline, built from the mesh's compiled material,
//! plus one vertex buffer per shader attribute.
//!
//! # Architecture
//!
//! - **Group 0**: camera uniforms (view-projection, camera position, time)
//! - **Group 1**: model uniforms (model matrix, normal matrix), one buffer per mesh
//!
//! # Usage
//!
//! Each frame:
//! 1. [`update_camera`](NodeMeshPass::update_camera)
//! 2. [`prepare`](NodeMeshPass::prepare) every mesh, after sorting and data updates
//! 3. [`render`](NodeMeshPass::render) inside a render pass that attaches
//!    [`depth_view`](NodeMeshPass::depth_view)
//!
//! `prepare` rebuilds a mesh's pipeline only when its material version changed.
//! Vertex and index buffers follow the CPU buffers: a new [`BufferId`] allocates
//! a new GPU buffer, a new version alone is a `write_buffer`.

use std::collections::HashMap;

use wgpu::util::DeviceExt;

use crate::camera::Camera;
use crate::geometry::{BufferAttribute, BufferId};
use crate::gpu::GpuContext;
use crate::material::NodeMaterial;
use crate::mesh::PrimitiveKind;
use crate::node::NodeType;
use crate::node_mesh::NodeMesh;
use crate::wgsl::{CompiledShader, ShaderAttribute};

const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Camera uniforms, group 0.
#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CameraUniforms {
    pub view_proj: [[f32; 4]; 4],
    /// Camera position in world space.
    pub position: [f32; 3],
    /// Elapsed time in seconds.
    pub time: f32,
}

/// Per-mesh uniforms, group 1.
#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ModelUniforms {
    pub model: [[f32; 4]; 4],
    /// Inverse transpose of `model`.
    pub normal_matrix: [[f32; 4]; 4],
}

/// Errors raised while preparing a mesh for drawing.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderError {
    /// `build_material` has not succeeded yet.
    MaterialNotBuilt,
    /// The shader reads an attribute the geometry does not have.
    MissingAttribute(String),
    /// The geometry attribute width differs from the shader input type.
    ItemSize {
        name: String,
        expected: usize,
        found: usize,
    },
    /// A vertex or index count does not fit a `u32` draw call.
    TooLarge(usize),
}

impl std::fmt::Display for RenderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RenderError::MaterialNotBuilt => write!(f, "material has not been built"),
            RenderError::MissingAttribute(name) => {
                write!(f, "shader reads attribute '{}' the geometry lacks", name)
            }
            RenderError::ItemSize {
                name,
                expected,
                found,
            } => write!(
                f,
                "attribute '{}' has item size {}, shader expects {}",
                name, found, expected
            ),
            RenderError::TooLarge(count) => {
                write!(f, "{} elements exceed the u32 draw range", count)
            }
        }
    }
}

impl std::error::Error for RenderError {}

struct GpuBuffer {
    id: BufferId,
    version: u32,
    buffer: wgpu::Buffer,
}

impl GpuBuffer {
    fn create<T: bytemuck::Pod>(
        device: &wgpu::Device,
        source: &BufferAttribute<T>,
        usage: wgpu::BufferUsages,
        label: &str,
    ) -> Self {
        let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: bytemuck::cast_slice(source.array()),
            usage: usage | wgpu::BufferUsages::COPY_DST,
        });
        Self {
            id: source.id(),
            version: source.version(),
            buffer,
        }
    }

    /// Brings `slot` in line with `source`.
    fn sync<T: bytemuck::Pod>(
        slot: &mut Option<GpuBuffer>,
        gpu: &GpuContext,
        source: &BufferAttribute<T>,
        usage: wgpu::BufferUsages,
        label: &str,
    ) {
        if let Some(current) = slot.as_mut().filter(|b| b.id == source.id()) {
            if current.version != source.version() {
                gpu.queue
                    .write_buffer(&current.buffer, 0, bytemuck::cast_slice(source.array()));
                current.version = source.version();
            }
            return;
        }

        if let Some(old) = slot.take() {
            old.buffer.destroy();
        }
        log::trace!("allocating {} ({} items)", label, source.count());
        *slot = Some(GpuBuffer::create(&gpu.device, source, usage, label));
    }
}

/// GPU state of one [`NodeMesh`], released by [`NodeMesh::dispose`].
pub struct GpuMesh {
    pipeline: wgpu::RenderPipeline,
    material_version: u32,
    /// Attribute names in vertex buffer slot order.
    layout: Vec<String>,
    vertex_buffers: HashMap<String, GpuBuffer>,
    index: Option<GpuBuffer>,
    vertex_count: u32,
    index_count: u32,
    model_buffer: wgpu::Buffer,
    model_bind_group: wgpu::BindGroup,
}

impl GpuMesh {
    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    /// Material version the pipeline was built from.
    pub fn material_version(&self) -> u32 {
        self.material_version
    }

    pub(crate) fn destroy(self) {
        for (_, buffer) in self.vertex_buffers {
            buffer.buffer.destroy();
        }
        if let Some(index) = self.index {
            index.buffer.destroy();
        }
        self.model_buffer.destroy();
    }
}

pub struct NodeMeshPass {
    camera_buffer: wgpu::Buffer,
    camera_bind_group: wgpu::BindGroup,
    model_bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    color_format: wgpu::TextureFormat,
    depth_texture: wgpu::Texture,
    depth_view: wgpu::TextureView,
    depth_size: (u32, u32),
}

impl NodeMeshPass {
    pub fn new(gpu: &GpuContext) -> Self {
        let device = &gpu.device;

        let camera_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Camera Uniforms"),
            size: std::mem::size_of::<CameraUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let camera_bind_group_layout = uniform_layout(device, "Camera Bind Group Layout");
        let camera_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Camera Bind Group"),
            layout: &camera_bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: camera_buffer.as_entire_binding(),
            }],
        });

        let model_bind_group_layout = uniform_layout(device, "Model Bind Group Layout");

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Node Mesh Pipeline Layout"),
            bind_group_layouts: &[&camera_bind_group_layout, &model_bind_group_layout],
            push_constant_ranges: &[],
        });

        let (depth_texture, depth_view) = Self::create_depth_texture(gpu);

        Self {
            camera_buffer,
            camera_bind_group,
            model_bind_group_layout,
            pipeline_layout,
            color_format: gpu.config.format,
            depth_texture,
            depth_view,
            depth_size: (gpu.width(), gpu.height()),
        }
    }

    fn create_depth_texture(gpu: &GpuContext) -> (wgpu::Texture, wgpu::TextureView) {
        let texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Depth Texture"),
            size: wgpu::Extent3d {
                width: gpu.width(),
                height: gpu.height(),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        (texture, view)
    }

    /// Recreates the depth buffer if the surface was resized.
    pub fn ensure_depth_size(&mut self, gpu: &GpuContext) {
        if self.depth_size != (gpu.width(), gpu.height()) {
            self.depth_texture.destroy();
            let (texture, view) = Self::create_depth_texture(gpu);
            self.depth_texture = texture;
            self.depth_view = view;
            self.depth_size = (gpu.width(), gpu.height());
        }
    }

    pub fn depth_view(&self) -> &wgpu::TextureView {
        &self.depth_view
    }

    pub fn update_camera(&self, gpu: &GpuContext, camera: &Camera, time: f32) {
        let uniforms = CameraUniforms {
            view_proj: camera.view_proj(gpu.aspect()).to_cols_array_2d(),
            position: camera.position.to_array(),
            time,
        };
        gpu.queue
            .write_buffer(&self.camera_buffer, 0, bytemuck::cast_slice(&[uniforms]));
    }

    /// Uploads whatever changed in `mesh` since the last call.
    pub fn prepare(&self, gpu: &GpuContext, mesh: &mut NodeMesh) -> Result<(), RenderError> {
        let previous = mesh.gpu.take();
        let material = mesh.material();
        let Some(shader) = material.compiled() else {
            mesh.gpu = previous;
            return Err(RenderError::MaterialNotBuilt);
        };

        let mut state = match previous {
            Some(mut state) => {
                if state.material_version != material.version() {
                    log::debug!(
                        "rebuilding pipeline for '{}' (material v{})",
                        mesh.label(),
                        material.version()
                    );
                    state.pipeline = self.create_pipeline(gpu, mesh.kind(), material, shader);
                    state.material_version = material.version();
                    state.layout = layout_names(shader);
                }
                state
            }
            None => self.create_gpu_mesh(gpu, mesh.kind(), material, shader, mesh.label()),
        };

        let synced = self.sync_geometry(gpu, mesh, shader, &mut state);
        let model = mesh.matrix();
        let uniforms = ModelUniforms {
            model: model.to_cols_array_2d(),
            normal_matrix: model.inverse().transpose().to_cols_array_2d(),
        };
        gpu.queue
            .write_buffer(&state.model_buffer, 0, bytemuck::cast_slice(&[uniforms]));

        mesh.gpu = Some(state);
        synced
    }

    fn sync_geometry(
        &self,
        gpu: &GpuContext,
        mesh: &NodeMesh,
        shader: &CompiledShader,
        state: &mut GpuMesh,
    ) -> Result<(), RenderError> {
        let geometry = mesh.geometry().borrow();

        for attribute in shader.attributes() {
            let source = geometry
                .attribute(&attribute.name)
                .ok_or_else(|| RenderError::MissingAttribute(attribute.name.clone()))?;
            let expected = attribute.ty.components();
            if source.item_size() != expected {
                return Err(RenderError::ItemSize {
                    name: attribute.name.clone(),
                    expected,
                    found: source.item_size(),
                });
            }

            let mut slot = state.vertex_buffers.remove(&attribute.name);
            GpuBuffer::sync(
                &mut slot,
                gpu,
                source,
                wgpu::BufferUsages::VERTEX,
                &format!("{} {}", mesh.label(), attribute.name),
            );
            if let Some(buffer) = slot {
                state.vertex_buffers.insert(attribute.name.clone(), buffer);
            }
        }

        state.vertex_count = draw_count(geometry.vertex_count())?;

        match geometry.index() {
            Some(index) => {
                GpuBuffer::sync(
                    &mut state.index,
                    gpu,
                    index,
                    wgpu::BufferUsages::INDEX,
                    &format!("{} index", mesh.label()),
                );
                state.index_count = draw_count(index.count())?;
            }
            None => {
                if let Some(old) = state.index.take() {
                    old.buffer.destroy();
                }
                state.index_count = 0;
            }
        }

        Ok(())
    }

    fn create_gpu_mesh(
        &self,
        gpu: &GpuContext,
        kind: PrimitiveKind,
        material: &NodeMaterial,
        shader: &CompiledShader,
        label: &str,
    ) -> GpuMesh {
        let model_buffer = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&format!("{} model uniforms", label)),
            size: std::mem::size_of::<ModelUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let model_bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Model Bind Group"),
            layout: &self.model_bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: model_buffer.as_entire_binding(),
            }],
        });

        GpuMesh {
            pipeline: self.create_pipeline(gpu, kind, material, shader),
            material_version: material.version(),
            layout: layout_names(shader),
            vertex_buffers: HashMap::new(),
            index: None,
            vertex_count: 0,
            index_count: 0,
            model_buffer,
            model_bind_group,
        }
    }

    fn create_pipeline(
        &self,
        gpu: &GpuContext,
        kind: PrimitiveKind,
        material: &NodeMaterial,
        shader: &CompiledShader,
    ) -> wgpu::RenderPipeline {
        let device = &gpu.device;
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Node Material Shader"),
            source: wgpu::ShaderSource::Wgsl(shader.source().into()),
        });

        let vertex_attributes: Vec<wgpu::VertexAttribute> =
            shader.attributes().iter().map(vertex_attribute).collect();
        let buffers: Vec<wgpu::VertexBufferLayout> = vertex_attributes
            .iter()
            .map(|attribute| wgpu::VertexBufferLayout {
                array_stride: attribute.format.size(),
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: std::slice::from_ref(attribute),
            })
            .collect();

        let blend = if material.transparent {
            wgpu::BlendState::ALPHA_BLENDING
        } else {
            wgpu::BlendState::REPLACE
        };

        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Node Mesh Pipeline"),
            layout: Some(&self.pipeline_layout),
            vertex: wgpu::VertexState {
                module: &module,
                entry_point: Some("vs"),
                buffers: &buffers,
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &module,
                entry_point: Some("fs"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: self.color_format,
                    blend: Some(blend),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: kind.topology(),
                cull_mode: material.side.cull_mode(),
                front_face: wgpu::FrontFace::Ccw,
                ..Default::default()
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                // Sorted transparent geometry still tests against opaque depth.
                depth_write_enabled: !material.transparent,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        })
    }

    /// Draws prepared meshes in the given order. Meshes without GPU state are
    /// skipped.
    pub fn render(&self, render_pass: &mut wgpu::RenderPass, meshes: &[&NodeMesh]) {
        render_pass.set_bind_group(0, &self.camera_bind_group, &[]);

        for mesh in meshes {
            let Some(state) = mesh.gpu_mesh() else {
                log::warn!("'{}' drawn before prepare, skipping", mesh.label());
                continue;
            };
            if state.vertex_count == 0 {
                continue;
            }

            render_pass.set_pipeline(&state.pipeline);
            render_pass.set_bind_group(1, &state.model_bind_group, &[]);
            for (slot, name) in state.layout.iter().enumerate() {
                if let Some(buffer) = state.vertex_buffers.get(name) {
                    render_pass.set_vertex_buffer(slot as u32, buffer.buffer.slice(..));
                }
            }

            match &state.index {
                Some(index) if state.index_count > 0 => {
                    render_pass.set_index_buffer(index.buffer.slice(..), wgpu::IndexFormat::Uint32);
                    render_pass.draw_indexed(0..state.index_count, 0, 0..1);
                }
                _ => render_pass.draw(0..state.vertex_count, 0..1),
            }
        }
    }
}

fn uniform_layout(device: &wgpu::Device, label: &str) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(label),
        entries: &[wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        }],
    })
}

fn layout_names(shader: &CompiledShader) -> Vec<String> {
    shader.attributes().iter().map(|a| a.name.clone()).collect()
}

fn draw_count(count: usize) -> Result<u32, RenderError> {
    u32::try_from(count).map_err(|_| RenderError::TooLarge(count))
}

fn vertex_format(ty: NodeType) -> wgpu::VertexFormat {
    match ty {
        NodeType::Vec2 => wgpu::VertexFormat::Float32x2,
        NodeType::Vec3 => wgpu::VertexFormat::Float32x3,
        NodeType::Vec4 => wgpu::VertexFormat::Float32x4,
        // Attributes are numeric, so this is `Float`.
        NodeType::Float | NodeType::Bool => wgpu::VertexFormat::Float32,
    }
}

fn vertex_attribute(attribute: &ShaderAttribute) -> wgpu::VertexAttribute {
    wgpu::VertexAttribute {
        offset: 0,
        shader_location: attribute.location,
        format: vertex_format(attribute.ty),
    }
}
