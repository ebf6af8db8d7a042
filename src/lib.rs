//! # nodemesh
//!
//! **Meshes shaded by expression graphs, rendered with wgpu.**
//!
//! A [`NodeMesh`] collects operator chains for its transform, color, alpha and
//! mask channels, folds them into [`Node`] graphs and compiles those to WGSL.
//! Transparent meshes can be re-sorted back to front every frame.
//!
//! ## Quick Start
//!
//! ```
//! use nodemesh::*;
//!
//! let mut mesh = NodeMesh::new(
//!     PrimitiveKind::Mesh,
//!     MaterialKind::Basic,
//!     Geometry::plane(2.0),
//!     vec![DataDescriptor::single("heat", 1)],
//! )
//! .unwrap();
//!
//! let heat = Node::attribute("heat", NodeType::Float);
//! mesh.add_color_node(Operation::Mul, heat.clone());
//! mesh.add_alpha_node(Operation::Assign, heat);
//! mesh.build_material().unwrap();
//!
//! mesh.sort_triangle_indices(Vec3::new(0.0, 5.0, 5.0)).unwrap();
//! ```
//!
//! On the GPU side, [`NodeMeshPass::prepare`] uploads whatever changed and
//! [`NodeMeshPass::render`] draws. The `nodemesh-demo` binary shows the full loop.

mod camera;
mod color;
mod geometry;
mod gpu;
mod material;
mod mesh;
mod node;
mod node_mesh;
mod operator;
mod pass;
mod sort;
pub mod wgsl;

pub use camera::Camera;
pub use color::Color;
pub use geometry::{
    BufferAttribute, BufferId, BufferUpdate, Geometry, GeometryError, SharedGeometry,
};
pub use gpu::{GpuContext, GpuError};
pub use material::{MaterialKind, NodeMaterial, Side};
pub use mesh::{PrimitiveKind, Transform};
pub use node::{
    ArithOp, Builtin, CompareOp, ExpressionNode, LogicalNode, Node, NodeType, SideEffectNode,
};
pub use node_mesh::{
    DataComponent, DataDescriptor, DataUpdate, MeshConfig, MeshError, NodeMesh,
};
pub use operator::{Operation, Operator, fold_conjunction, fold_operators, wrap_effects};
pub use pass::{CameraUniforms, GpuMesh, ModelUniforms, NodeMeshPass, RenderError};
pub use sort::sort_back_to_front;
pub use wgsl::{CompiledShader, ShaderAttribute, ShaderError};

// Re-export glam math types for convenience
pub use glam::{Mat4, Quat, Vec2, Vec3, Vec4};
