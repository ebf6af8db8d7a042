//! Meshes whose shading is assembled from operator chains.
//!
//! A [`NodeMesh`] keeps one operator list per channel. Nothing reaches the GPU
//! until [`NodeMesh::build_material`] folds the lists into expression graphs and
//! compiles them:
//!
//! ```
//! use nodemesh::{Geometry, MaterialKind, Node, NodeMesh, Operation, PrimitiveKind};
//!
//! let mut mesh = NodeMesh::new(
//!     PrimitiveKind::Mesh,
//!     MaterialKind::Basic,
//!     Geometry::sphere(16, 8),
//!     Vec::new(),
//! )
//! .unwrap();
//!
//! // Fade out over time, then double the size.
//! mesh.add_alpha_node(Operation::Mul, Node::time().sin().abs());
//! mesh.add_transform_node(Operation::Mul, Node::float(2.0));
//! mesh.build_material().unwrap();
//! assert!(mesh.material().transparent);
//! ```
//!
//! Channel seeds:
//!
//! | Channel   | Seed                         | Material slot   |
//! |-----------|------------------------------|-----------------|
//! | transform | local vertex position        | `position_node` |
//! | color     | the mesh's default color     | `color_node`    |
//! | alpha     | `1.0`                        | `opacity_node`  |
//! | mask      | `true`                       | `mask_node`     |

use std::collections::HashMap;
use std::rc::Rc;

use glam::{Mat4, Vec3};

use crate::color::Color;
use crate::geometry::{BufferAttribute, Geometry, GeometryError, SharedGeometry};
use crate::material::{MaterialKind, NodeMaterial, Side};
use crate::mesh::{PrimitiveKind, Transform};
use crate::node::Node;
use crate::operator::{Operation, Operator, fold_conjunction, fold_operators, wrap_effects};
use crate::pass::GpuMesh;
use crate::sort::sort_back_to_front;
use crate::wgsl::ShaderError;

/// New per-vertex values keyed by attribute name.
pub type DataUpdate = HashMap<String, Vec<f32>>;

/// One vertex attribute backing a data descriptor.
#[derive(Clone, Debug, PartialEq)]
pub struct DataComponent {
    pub attribute: String,
    pub item_size: usize,
}

/// A named group of per-vertex attributes, e.g. `"velocity"` backed by a
/// single 3-wide attribute.
#[derive(Clone, Debug, PartialEq)]
pub struct DataDescriptor {
    pub name: String,
    pub components: Vec<DataComponent>,
}

impl DataDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            components: Vec::new(),
        }
    }

    /// A descriptor backed by one attribute of the same name.
    pub fn single(name: impl Into<String>, item_size: usize) -> Self {
        let name = name.into();
        Self::new(name.clone()).component(name, item_size)
    }

    pub fn component(mut self, attribute: impl Into<String>, item_size: usize) -> Self {
        self.components.push(DataComponent {
            attribute: attribute.into(),
            item_size,
        });
        self
    }
}

/// Per-mesh settings.
///
/// ```
/// use nodemesh::{Color, MeshConfig};
///
/// let config = MeshConfig::new()
///     .default_color(Color::from_hex(0x3366ff))
///     .alpha_test(0.1)
///     .label("particles");
/// ```
#[derive(Clone, Debug)]
pub struct MeshConfig {
    /// Seed of the color channel. Only the RGB part is used: the color
    /// channel is a `vec3`, and opacity comes from the alpha channel alone.
    pub default_color: Color,
    /// Fragments with a final alpha below this are discarded.
    pub alpha_test: f32,
    /// Used for GPU resource labels and log messages.
    pub label: Option<String>,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            default_color: Color::WHITE,
            alpha_test: 0.01,
            label: None,
        }
    }
}

impl MeshConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the color channel seed. `color.a` is ignored; use an alpha node
    /// for transparency.
    pub fn default_color(mut self, color: Color) -> Self {
        self.default_color = color;
        self
    }

    pub fn alpha_test(mut self, threshold: f32) -> Self {
        self.alpha_test = threshold;
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Errors from node mesh operations.
#[derive(Debug, Clone, PartialEq)]
pub enum MeshError {
    Geometry(GeometryError),
    Shader(ShaderError),
}

impl std::fmt::Display for MeshError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MeshError::Geometry(e) => write!(f, "geometry error: {}", e),
            MeshError::Shader(e) => write!(f, "shader error: {}", e),
        }
    }
}

impl std::error::Error for MeshError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MeshError::Geometry(e) => Some(e),
            MeshError::Shader(e) => Some(e),
        }
    }
}

impl From<GeometryError> for MeshError {
    fn from(e: GeometryError) -> Self {
        MeshError::Geometry(e)
    }
}

impl From<ShaderError> for MeshError {
    fn from(e: ShaderError) -> Self {
        MeshError::Shader(e)
    }
}

pub struct NodeMesh {
    kind: PrimitiveKind,
    geometry: SharedGeometry,
    material: NodeMaterial,
    data: Rc<[DataDescriptor]>,
    transform_nodes: Vec<Operator<Node>>,
    color_nodes: Vec<Operator<Node>>,
    alpha_nodes: Vec<Operator<Node>>,
    mask_nodes: Vec<Node>,
    expression_nodes: Vec<Node>,
    has_index: bool,
    matrix: Mat4,
    config: MeshConfig,
    pub(crate) gpu: Option<GpuMesh>,
}

impl NodeMesh {
    pub fn new(
        kind: PrimitiveKind,
        material_kind: MaterialKind,
        geometry: Geometry,
        data: Vec<DataDescriptor>,
    ) -> Result<Self, MeshError> {
        Self::with_config(kind, material_kind, geometry, data, MeshConfig::default())
    }

    /// Creates the mesh, adding a zero-filled attribute for every data
    /// component the geometry lacks.
    pub fn with_config(
        kind: PrimitiveKind,
        material_kind: MaterialKind,
        mut geometry: Geometry,
        data: Vec<DataDescriptor>,
        config: MeshConfig,
    ) -> Result<Self, MeshError> {
        let vertex_count = geometry.positions()?.count();

        for component in data.iter().flat_map(|d| &d.components) {
            match geometry.attribute(&component.attribute) {
                Some(existing) if existing.item_size() != component.item_size => {
                    return Err(GeometryError::Width {
                        name: component.attribute.clone(),
                        item_size: existing.item_size(),
                        required: component.item_size,
                    }
                    .into());
                }
                Some(_) => {}
                None => {
                    let zeros = vec![0.0; vertex_count * component.item_size];
                    geometry.set_attribute(
                        component.attribute.clone(),
                        BufferAttribute::new(zeros, component.item_size)?,
                    );
                }
            }
        }

        if !geometry.has_attribute("normal") {
            geometry.compute_vertex_normals()?;
        }

        let has_index = geometry.index().is_some();
        log::debug!(
            "created {:?} node mesh '{}' with {} vertices",
            kind,
            config.label.as_deref().unwrap_or("unnamed"),
            vertex_count
        );

        Ok(Self {
            kind,
            geometry: geometry.into_shared(),
            material: NodeMaterial::new(material_kind),
            data: data.into(),
            transform_nodes: Vec::new(),
            color_nodes: Vec::new(),
            alpha_nodes: Vec::new(),
            mask_nodes: Vec::new(),
            expression_nodes: Vec::new(),
            has_index,
            matrix: Mat4::IDENTITY,
            config,
            gpu: None,
        })
    }

    pub fn add_transform_node(&mut self, operation: Operation, node: Node) {
        self.transform_nodes.push(Operator::new(operation, node));
    }

    pub fn add_color_node(&mut self, operation: Operation, node: Node) {
        self.color_nodes.push(Operator::new(operation, node));
    }

    pub fn add_alpha_node(&mut self, operation: Operation, node: Node) {
        self.alpha_nodes.push(Operator::new(operation, node));
    }

    /// Adds a boolean node. A fragment is kept only where every mask holds.
    pub fn add_mask_node(&mut self, node: Node) {
        self.mask_nodes.push(node);
    }

    /// Adds a node evaluated in the vertex stage for its side effect only,
    /// typically a [`Node::assign_varying`].
    pub fn add_expression_node(&mut self, node: Node) {
        self.expression_nodes.push(node);
    }

    pub fn transform_nodes(&self) -> &[Operator<Node>] {
        &self.transform_nodes
    }

    pub fn color_nodes(&self) -> &[Operator<Node>] {
        &self.color_nodes
    }

    pub fn alpha_nodes(&self) -> &[Operator<Node>] {
        &self.alpha_nodes
    }

    pub fn mask_nodes(&self) -> &[Node] {
        &self.mask_nodes
    }

    pub fn expression_nodes(&self) -> &[Node] {
        &self.expression_nodes
    }

    pub fn position_graph(&self) -> Node {
        let position = fold_operators(Node::position_local(), &self.transform_nodes);
        wrap_effects(position, &self.expression_nodes)
    }

    pub fn color_graph(&self) -> Node {
        fold_operators(Node::color(self.config.default_color), &self.color_nodes)
    }

    pub fn alpha_graph(&self) -> Node {
        fold_operators(Node::float(1.0), &self.alpha_nodes)
    }

    pub fn mask_graph(&self) -> Node {
        fold_conjunction(Node::boolean(true), &self.mask_nodes)
    }

    /// Folds every channel into the material and compiles it.
    ///
    /// Each call recompiles the shader, so add all nodes first. The material
    /// is always flat shaded and double sided. It is transparent exactly when
    /// there are alpha nodes.
    pub fn build_material(&mut self) -> Result<(), MeshError> {
        let position = self.position_graph();
        let color = self.color_graph();
        let alpha = self.alpha_graph();
        let mask = self.mask_graph();

        let material = &mut self.material;
        material.position_node = Some(position);
        material.color_node = Some(color);
        material.opacity_node = Some(alpha);
        material.mask_node = Some(mask);
        material.flat_shading = true;
        material.side = Side::Double;
        material.alpha_test = self.config.alpha_test;
        material.transparent = !self.alpha_nodes.is_empty();
        if self.kind == PrimitiveKind::Points {
            // Points have no derivatives to shade from.
            material.normal_node = Some(Node::vec3(0.0, 0.0, 1.0));
        }

        material.build()?;
        Ok(())
    }

    /// Writes new values for every data component present in `update`.
    ///
    /// A value array of the current length is written in place. Any other
    /// length replaces the attribute with a new buffer. Normals are recomputed
    /// when `position` changes.
    ///
    /// Every array is checked before the first write, so on error the
    /// geometry is left as it was.
    pub fn update_data(&mut self, update: &DataUpdate) -> Result<(), MeshError> {
        let mut geometry = self.geometry.borrow_mut();
        let writes: Vec<(&str, &[f32])> = self
            .data
            .iter()
            .flat_map(|d| &d.components)
            .filter_map(|c| {
                let values = update.get(&c.attribute)?;
                Some((c.attribute.as_str(), values.as_slice()))
            })
            .collect();

        for &(name, values) in &writes {
            geometry.check_update(name, values)?;
        }

        let mut position_changed = false;
        for &(name, values) in &writes {
            geometry.update_attribute(name, values)?;
            position_changed |= name == "position";
        }

        if position_changed {
            geometry.compute_vertex_normals()?;
        }
        Ok(())
    }

    /// Replaces the vertex positions and recomputes normals.
    ///
    /// Nothing is written when `positions` does not fit the geometry.
    pub fn set_vertices(&mut self, positions: &[f32]) -> Result<(), MeshError> {
        let mut geometry = self.geometry.borrow_mut();
        geometry.check_update("position", positions)?;
        geometry.update_attribute("position", positions)?;
        geometry.compute_vertex_normals()?;
        Ok(())
    }

    pub fn matrix(&self) -> Mat4 {
        self.matrix
    }

    pub fn set_matrix(&mut self, matrix: Mat4) {
        self.matrix = matrix;
    }

    pub fn set_transform(&mut self, transform: Transform) {
        self.matrix = transform.matrix();
    }

    /// Orders triangles back to front as seen from `camera` (world space).
    ///
    /// Does nothing for non-solid primitives, or when the world matrix is
    /// singular.
    pub fn sort_triangle_indices(&mut self, camera: Vec3) -> Result<(), MeshError> {
        if !self.kind.is_solid() {
            return Ok(());
        }
        let det = self.matrix.determinant();
        if det == 0.0 || !det.is_finite() {
            log::warn!(
                "skipping triangle sort for '{}': world matrix is not invertible",
                self.label()
            );
            return Ok(());
        }
        let local = self.matrix.inverse().transform_point3(camera);

        let mut geometry = self.geometry.borrow_mut();
        let sorted = {
            let g = &*geometry;
            sort_back_to_front(g.positions()?, g.index().map(BufferAttribute::array), local)?
        };
        geometry.set_index(&sorted)?;
        Ok(())
    }

    /// A new mesh sharing this one's geometry and data.
    ///
    /// The operator lists are copied, so later additions to either mesh stay
    /// local to it. The copy has its own material, which needs
    /// [`build_material`](Self::build_material) before rendering.
    pub fn copy(&self) -> Self {
        Self {
            kind: self.kind,
            geometry: Rc::clone(&self.geometry),
            material: NodeMaterial::new(self.material.kind()),
            data: Rc::clone(&self.data),
            transform_nodes: self.transform_nodes.clone(),
            color_nodes: self.color_nodes.clone(),
            alpha_nodes: self.alpha_nodes.clone(),
            mask_nodes: self.mask_nodes.clone(),
            expression_nodes: self.expression_nodes.clone(),
            has_index: self.has_index,
            matrix: self.matrix,
            config: self.config.clone(),
            gpu: None,
        }
    }

    /// Replaces this mesh's operator lists and default color with `other`'s.
    pub fn copy_material(&mut self, other: &NodeMesh) {
        self.transform_nodes = other.transform_nodes.clone();
        self.color_nodes = other.color_nodes.clone();
        self.alpha_nodes = other.alpha_nodes.clone();
        self.mask_nodes = other.mask_nodes.clone();
        self.expression_nodes = other.expression_nodes.clone();
        self.config.default_color = other.config.default_color;
    }

    /// Releases the GPU buffers and the compiled material.
    pub fn dispose(mut self) {
        if let Some(gpu) = self.gpu.take() {
            gpu.destroy();
        }
        self.material.dispose();
        log::debug!("disposed node mesh '{}'", self.label());
    }

    pub fn kind(&self) -> PrimitiveKind {
        self.kind
    }

    pub fn geometry(&self) -> &SharedGeometry {
        &self.geometry
    }

    pub fn data(&self) -> &[DataDescriptor] {
        &self.data
    }

    pub fn material(&self) -> &NodeMaterial {
        &self.material
    }

    /// Whether the geometry had an index buffer when the mesh was created.
    pub fn has_index(&self) -> bool {
        self.has_index
    }

    pub fn default_color(&self) -> Color {
        self.config.default_color
    }

    pub fn set_default_color(&mut self, color: Color) {
        self.config.default_color = color;
    }

    pub fn config(&self) -> &MeshConfig {
        &self.config
    }

    pub fn label(&self) -> &str {
        self.config.label.as_deref().unwrap_or("unnamed")
    }

    pub fn gpu_mesh(&self) -> Option<&GpuMesh> {
        self.gpu.as_ref()
    }
}
