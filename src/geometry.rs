//! CPU-side geometry: named attribute buffers and an optional index buffer.
//!
//! Attributes are flat arrays with an item size (3 for positions and normals,
//! 2 for UVs, ...). Every buffer carries a process-unique [`BufferId`] and a
//! `version` counter so the GPU side can tell a new buffer from an updated one:
//!
//! - writing an array of the same length reuses the buffer and bumps the version,
//! - writing an array of a different length allocates a new buffer with a new id.
//!
//! ```
//! use nodemesh::Geometry;
//!
//! let mut geometry = Geometry::new()
//!     .with_attribute("position", vec![0.0; 9], 3)
//!     .unwrap();
//! let id = geometry.attribute("position").unwrap().id();
//!
//! geometry.update_attribute("position", &[1.0; 9]).unwrap();
//! assert_eq!(geometry.attribute("position").unwrap().id(), id);
//!
//! geometry.update_attribute("position", &[1.0; 12]).unwrap();
//! assert_ne!(geometry.attribute("position").unwrap().id(), id);
//! ```
//!
//! Geometry is shared between mesh copies through [`SharedGeometry`].

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use glam::Vec3;

/// Geometry shared between several meshes.
pub type SharedGeometry = Rc<RefCell<Geometry>>;

/// Errors raised by attribute and index operations.
#[derive(Debug, Clone, PartialEq)]
pub enum GeometryError {
    /// The array length is not a multiple of the item size, or the item size is zero.
    ItemSize { len: usize, item_size: usize },
    /// A required attribute is not present.
    MissingAttribute(String),
    /// An attribute is too narrow for the operation (e.g. positions with item size 2).
    Width {
        name: String,
        item_size: usize,
        required: usize,
    },
    /// An index refers past the end of the vertex attributes.
    IndexOutOfRange { index: u32, count: usize },
    /// More vertices than a `u32` index can address.
    TooManyVertices(usize),
}

impl std::fmt::Display for GeometryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GeometryError::ItemSize { len, item_size } => write!(
                f,
                "array of length {} does not fit item size {}",
                len, item_size
            ),
            GeometryError::MissingAttribute(name) => write!(f, "missing attribute '{}'", name),
            GeometryError::Width {
                name,
                item_size,
                required,
            } => write!(
                f,
                "attribute '{}' has item size {}, need at least {}",
                name, item_size, required
            ),
            GeometryError::IndexOutOfRange { index, count } => {
                write!(f, "index {} out of range for {} vertices", index, count)
            }
            GeometryError::TooManyVertices(count) => {
                write!(f, "{} vertices cannot be addressed by a u32 index", count)
            }
        }
    }
}

impl std::error::Error for GeometryError {}

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one allocated buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferId(u64);

impl BufferId {
    fn next() -> Self {
        BufferId(NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// A flat array of items of `item_size` elements.
///
/// Not `Clone`: a copy would share the id of a distinct allocation.
#[derive(Debug)]
pub struct BufferAttribute<T = f32> {
    id: BufferId,
    array: Vec<T>,
    item_size: usize,
    version: u32,
}

/// Result of writing a new array into a [`BufferAttribute`].
#[derive(Debug)]
pub enum BufferUpdate<T = f32> {
    /// Same length: copied in place, version bumped.
    Reused,
    /// Different length: the caller must install this buffer in place of the old one.
    Replaced(BufferAttribute<T>),
}

impl<T: Copy> BufferAttribute<T> {
    pub fn new(array: Vec<T>, item_size: usize) -> Result<Self, GeometryError> {
        if item_size == 0 || array.len() % item_size != 0 {
            return Err(GeometryError::ItemSize {
                len: array.len(),
                item_size,
            });
        }
        Ok(Self {
            id: BufferId::next(),
            array,
            item_size,
            version: 0,
        })
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn array(&self) -> &[T] {
        &self.array
    }

    pub fn item_size(&self) -> usize {
        self.item_size
    }

    /// Number of items.
    pub fn count(&self) -> usize {
        self.array.len() / self.item_size
    }

    pub fn is_empty(&self) -> bool {
        self.array.is_empty()
    }

    /// Incremented on every in-place write.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Writes `values`, reusing this buffer when the length matches.
    pub fn set_array(&mut self, values: &[T]) -> Result<BufferUpdate<T>, GeometryError> {
        if values.len() % self.item_size != 0 {
            return Err(GeometryError::ItemSize {
                len: values.len(),
                item_size: self.item_size,
            });
        }
        if values.len() == self.array.len() {
            self.array.copy_from_slice(values);
            self.version = self.version.wrapping_add(1);
            Ok(BufferUpdate::Reused)
        } else {
            Ok(BufferUpdate::Replaced(Self::new(
                values.to_vec(),
                self.item_size,
            )?))
        }
    }
}

impl BufferAttribute<f32> {
    /// The first three components of item `i`.
    pub fn vec3(&self, i: usize) -> Vec3 {
        let base = i * self.item_size;
        Vec3::new(
            self.array[base],
            self.array[base + 1],
            self.array[base + 2],
        )
    }

    fn require_width(&self, name: &str, required: usize) -> Result<(), GeometryError> {
        if self.item_size < required {
            return Err(GeometryError::Width {
                name: name.to_string(),
                item_size: self.item_size,
                required,
            });
        }
        Ok(())
    }
}

/// Named vertex attributes plus an optional triangle index.
#[derive(Debug, Default)]
pub struct Geometry {
    attributes: BTreeMap<String, BufferAttribute<f32>>,
    index: Option<BufferAttribute<u32>>,
}

impl Geometry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_shared(self) -> SharedGeometry {
        Rc::new(RefCell::new(self))
    }

    pub fn with_attribute(
        mut self,
        name: impl Into<String>,
        values: Vec<f32>,
        item_size: usize,
    ) -> Result<Self, GeometryError> {
        self.set_attribute(name, BufferAttribute::new(values, item_size)?);
        Ok(self)
    }

    pub fn with_index(mut self, indices: Vec<u32>) -> Result<Self, GeometryError> {
        self.index = Some(BufferAttribute::new(indices, 1)?);
        Ok(self)
    }

    /// Installs `attribute` under `name`, returning the binding it replaced.
    pub fn set_attribute(
        &mut self,
        name: impl Into<String>,
        attribute: BufferAttribute<f32>,
    ) -> Option<BufferAttribute<f32>> {
        self.attributes.insert(name.into(), attribute)
    }

    pub fn attribute(&self, name: &str) -> Option<&BufferAttribute<f32>> {
        self.attributes.get(name)
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    /// The `position` attribute, required to be at least 3 wide.
    pub fn positions(&self) -> Result<&BufferAttribute<f32>, GeometryError> {
        let positions = self
            .attribute("position")
            .ok_or_else(|| GeometryError::MissingAttribute("position".to_string()))?;
        positions.require_width("position", 3)?;
        Ok(positions)
    }

    pub fn vertex_count(&self) -> usize {
        self.attribute("position").map_or(0, BufferAttribute::count)
    }

    /// Writes `values` into the named attribute.
    ///
    /// When the length changes the old binding is removed and the new buffer is
    /// installed in its place. Otherwise the existing buffer is updated in place
    /// and marked dirty.
    pub fn update_attribute(&mut self, name: &str, values: &[f32]) -> Result<(), GeometryError> {
        let attribute = self
            .attributes
            .get_mut(name)
            .ok_or_else(|| GeometryError::MissingAttribute(name.to_string()))?;
        match attribute.set_array(values)? {
            BufferUpdate::Reused => {
                log::trace!("attribute '{}' updated in place", name);
            }
            BufferUpdate::Replaced(replacement) => {
                log::trace!(
                    "attribute '{}' rebound ({} -> {} items)",
                    name,
                    attribute.count(),
                    replacement.count()
                );
                self.attributes.insert(name.to_string(), replacement);
            }
        }
        Ok(())
    }

    /// Checks that [`update_attribute`](Self::update_attribute) would accept
    /// `values` without writing anything.
    ///
    /// For `position` the new vertex count must also cover every entry of the
    /// index buffer.
    pub fn check_update(&self, name: &str, values: &[f32]) -> Result<(), GeometryError> {
        let attribute = self
            .attribute(name)
            .ok_or_else(|| GeometryError::MissingAttribute(name.to_string()))?;
        let item_size = attribute.item_size();
        if values.len() % item_size != 0 {
            return Err(GeometryError::ItemSize {
                len: values.len(),
                item_size,
            });
        }
        if name == "position" {
            attribute.require_width(name, 3)?;
            let count = values.len() / item_size;
            if let Some(index) = &self.index {
                if let Some(&i) = index.array().iter().find(|&&i| i as usize >= count) {
                    return Err(GeometryError::IndexOutOfRange { index: i, count });
                }
            }
        }
        Ok(())
    }

    pub fn index(&self) -> Option<&BufferAttribute<u32>> {
        self.index.as_ref()
    }

    /// Writes the index buffer, reusing the existing one when the length matches.
    pub fn set_index(&mut self, indices: &[u32]) -> Result<(), GeometryError> {
        match &mut self.index {
            Some(index) => {
                if let BufferUpdate::Replaced(replacement) = index.set_array(indices)? {
                    *index = replacement;
                }
            }
            None => self.index = Some(BufferAttribute::new(indices.to_vec(), 1)?),
        }
        Ok(())
    }

    /// Triangle corner indices: the index buffer, or `0..vertex_count` when
    /// there is none.
    pub fn corner_indices(&self) -> Result<Vec<u32>, GeometryError> {
        match &self.index {
            Some(index) => Ok(index.array().to_vec()),
            None => implicit_indices(self.vertex_count()),
        }
    }

    /// Recomputes the `normal` attribute from the current positions.
    ///
    /// Face normals are accumulated unnormalized, so larger faces weigh more,
    /// then normalized per vertex. Vertices not referenced by any triangle get a
    /// zero normal.
    pub fn compute_vertex_normals(&mut self) -> Result<(), GeometryError> {
        let positions = self.positions()?;
        let count = positions.count();
        let corners = self.corner_indices()?;
        let mut accumulated = vec![Vec3::ZERO; count];

        for tri in corners.chunks_exact(3) {
            for &i in tri {
                if i as usize >= count {
                    return Err(GeometryError::IndexOutOfRange { index: i, count });
                }
            }
            let (a, b, c) = (tri[0] as usize, tri[1] as usize, tri[2] as usize);
            let (pa, pb, pc) = (positions.vec3(a), positions.vec3(b), positions.vec3(c));
            let face = (pb - pa).cross(pc - pa);
            accumulated[a] += face;
            accumulated[b] += face;
            accumulated[c] += face;
        }

        let normals: Vec<f32> = accumulated
            .into_iter()
            .flat_map(|n| n.normalize_or_zero().to_array())
            .collect();

        if self.has_attribute("normal") {
            self.update_attribute("normal", &normals)
        } else {
            self.set_attribute("normal", BufferAttribute::new(normals, 3)?);
            Ok(())
        }
    }

    /// Axis-aligned bounds of the positions as `(min, max)`.
    ///
    /// Empty geometry yields `(+inf, -inf)`.
    pub fn bounds(&self) -> (Vec3, Vec3) {
        let mut min = Vec3::splat(f32::INFINITY);
        let mut max = Vec3::splat(f32::NEG_INFINITY);

        if let Ok(positions) = self.positions() {
            for i in 0..positions.count() {
                let p = positions.vec3(i);
                min = min.min(p);
                max = max.max(p);
            }
        }

        (min, max)
    }

    pub fn center(&self) -> Vec3 {
        let (min, max) = self.bounds();
        (min + max) * 0.5
    }

    /// A UV sphere of radius 0.5 with `position`, `normal` and `uv`.
    pub fn sphere(segments: u32, rings: u32) -> Self {
        let segments = segments.max(3);
        let rings = rings.max(2);
        let mut positions = Vec::new();
        let mut normals = Vec::new();
        let mut uvs = Vec::new();
        let mut indices = Vec::new();

        for ring in 0..=rings {
            let phi = std::f32::consts::PI * ring as f32 / rings as f32;
            let y = phi.cos();
            let ring_radius = phi.sin();

            for seg in 0..=segments {
                let theta = 2.0 * std::f32::consts::PI * seg as f32 / segments as f32;
                let x = ring_radius * theta.cos();
                let z = ring_radius * theta.sin();

                positions.extend_from_slice(&[x * 0.5, y * 0.5, z * 0.5]);
                normals.extend_from_slice(&[x, y, z]);
                uvs.extend_from_slice(&[seg as f32 / segments as f32, ring as f32 / rings as f32]);
            }
        }

        for ring in 0..rings {
            for seg in 0..segments {
                let current = ring * (segments + 1) + seg;
                let next = current + segments + 1;

                indices.extend_from_slice(&[current, next, current + 1]);
                indices.extend_from_slice(&[current + 1, next, next + 1]);
            }
        }

        Self::from_parts(positions, Some(normals), Some(uvs), Some(indices))
    }

    /// A square on the XZ plane, normal +Y.
    pub fn plane(size: f32) -> Self {
        let half = size * 0.5;
        #[rustfmt::skip]
        let positions = vec![
            -half, 0.0, -half,
             half, 0.0, -half,
             half, 0.0,  half,
            -half, 0.0,  half,
        ];
        let normals = [0.0, 1.0, 0.0].repeat(4);
        let uvs = vec![0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 1.0];
        let indices = vec![0, 2, 1, 2, 0, 3];

        Self::from_parts(positions, Some(normals), Some(uvs), Some(indices))
    }

    /// Unindexed geometry with only positions, for point clouds.
    pub fn points(points: &[Vec3]) -> Self {
        let positions = points.iter().flat_map(|p| p.to_array()).collect();
        Self::from_parts(positions, None, None, None)
    }

    // Inputs are built with matching item sizes, so construction cannot fail.
    fn from_parts(
        positions: Vec<f32>,
        normals: Option<Vec<f32>>,
        uvs: Option<Vec<f32>>,
        indices: Option<Vec<u32>>,
    ) -> Self {
        let mut attributes = BTreeMap::new();
        let attr = |array: Vec<f32>, item_size: usize| BufferAttribute {
            id: BufferId::next(),
            array,
            item_size,
            version: 0,
        };
        attributes.insert("position".to_string(), attr(positions, 3));
        if let Some(normals) = normals {
            attributes.insert("normal".to_string(), attr(normals, 3));
        }
        if let Some(uvs) = uvs {
            attributes.insert("uv".to_string(), attr(uvs, 2));
        }
        Self {
            attributes,
            index: indices.map(|array| BufferAttribute {
                id: BufferId::next(),
                array,
                item_size: 1,
                version: 0,
            }),
        }
    }
}

/// The indices `0..count`.
pub(crate) fn implicit_indices(count: usize) -> Result<Vec<u32>, GeometryError> {
    let end = u32::try_from(count).map_err(|_| GeometryError::TooManyVertices(count))?;
    Ok((0..end).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle() -> Geometry {
        Geometry::new()
            .with_attribute(
                "position",
                vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
                3,
            )
            .unwrap()
    }

    #[test]
    fn rejects_ragged_arrays() {
        assert_eq!(
            BufferAttribute::new(vec![0.0f32; 4], 3).unwrap_err(),
            GeometryError::ItemSize {
                len: 4,
                item_size: 3
            }
        );
        assert!(BufferAttribute::new(vec![0.0f32; 3], 0).is_err());
    }

    #[test]
    fn same_length_write_reuses_buffer() {
        let mut attr = BufferAttribute::new(vec![0.0f32; 6], 3).unwrap();
        let id = attr.id();
        let update = attr.set_array(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        assert!(matches!(update, BufferUpdate::Reused));
        assert_eq!(attr.id(), id);
        assert_eq!(attr.version(), 1);
        assert_eq!(attr.array(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn different_length_write_replaces_buffer() {
        let mut attr = BufferAttribute::new(vec![0.0f32; 6], 3).unwrap();
        let id = attr.id();
        match attr.set_array(&[1.0; 9]).unwrap() {
            BufferUpdate::Replaced(new) => {
                assert_ne!(new.id(), id);
                assert_eq!(new.count(), 3);
            }
            BufferUpdate::Reused => panic!("expected a new buffer"),
        }
        // The old buffer is untouched.
        assert_eq!(attr.count(), 2);
        assert_eq!(attr.version(), 0);
    }

    #[test]
    fn update_attribute_round_trips() {
        let mut geom = triangle();
        let values = [5.0, 4.0, 3.0, 2.0, 1.0, 0.0, 1.0, 2.0, 3.0];
        geom.update_attribute("position", &values).unwrap();
        assert_eq!(geom.attribute("position").unwrap().array(), &values);

        assert_eq!(
            geom.update_attribute("missing", &values).unwrap_err(),
            GeometryError::MissingAttribute("missing".to_string())
        );
    }

    #[test]
    fn check_update_leaves_geometry_alone() {
        let geom = triangle().with_index(vec![0, 1, 2]).unwrap();
        assert_eq!(
            geom.check_update("position", &[0.0; 7]).unwrap_err(),
            GeometryError::ItemSize {
                len: 7,
                item_size: 3
            }
        );
        assert_eq!(
            geom.check_update("position", &[0.0; 6]).unwrap_err(),
            GeometryError::IndexOutOfRange { index: 2, count: 2 }
        );
        assert!(geom.check_update("position", &[0.0; 12]).is_ok());
        assert_eq!(geom.vertex_count(), 3);

        // Without an index any whole number of vertices is fine.
        assert!(triangle().check_update("position", &[0.0; 6]).is_ok());
    }

    #[test]
    fn implicit_indices_count_up() {
        assert_eq!(implicit_indices(4).unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(triangle().corner_indices().unwrap(), vec![0, 1, 2]);
        assert_eq!(
            GeometryError::TooManyVertices(7).to_string(),
            "7 vertices cannot be addressed by a u32 index"
        );
    }

    #[test]
    fn set_index_creates_then_reuses() {
        let mut geom = triangle();
        assert!(geom.index().is_none());
        geom.set_index(&[0, 1, 2]).unwrap();
        let id = geom.index().unwrap().id();
        geom.set_index(&[2, 1, 0]).unwrap();
        assert_eq!(geom.index().unwrap().id(), id);
        assert_eq!(geom.index().unwrap().array(), &[2, 1, 0]);
    }

    #[test]
    fn normals_follow_winding() {
        let mut geom = triangle();
        geom.compute_vertex_normals().unwrap();
        let normals = geom.attribute("normal").unwrap();
        for i in 0..3 {
            assert_eq!(normals.vec3(i), Vec3::Z);
        }

        // Recomputing reuses the existing normal buffer.
        let id = normals.id();
        geom.compute_vertex_normals().unwrap();
        assert_eq!(geom.attribute("normal").unwrap().id(), id);
    }

    #[test]
    fn normals_reject_bad_indices() {
        let mut geom = triangle().with_index(vec![0, 1, 7]).unwrap();
        assert_eq!(
            geom.compute_vertex_normals().unwrap_err(),
            GeometryError::IndexOutOfRange { index: 7, count: 3 }
        );
    }

    #[test]
    fn bounds_and_center() {
        let geom = Geometry::new()
            .with_attribute(
                "position",
                vec![0.0, 0.0, 0.0, 1.0, 2.0, 3.0, -1.0, -1.0, -1.0],
                3,
            )
            .unwrap();
        let (min, max) = geom.bounds();
        assert_eq!(min, Vec3::new(-1.0, -1.0, -1.0));
        assert_eq!(max, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(geom.center(), Vec3::new(0.0, 0.5, 1.0));
    }

    #[test]
    fn sphere_indices_stay_in_range() {
        let geom = Geometry::sphere(8, 4);
        let count = geom.vertex_count() as u32;
        assert_eq!(count, 9 * 5);
        assert!(geom.index().unwrap().array().iter().all(|&i| i < count));
        assert_eq!(geom.index().unwrap().count(), 8 * 4 * 6);
    }

    #[test]
    fn plane_faces_up() {
        let mut geom = Geometry::plane(2.0);
        geom.compute_vertex_normals().unwrap();
        let normals = geom.attribute("normal").unwrap();
        for i in 0..4 {
            assert!((normals.vec3(i) - Vec3::Y).length() < 1e-6);
        }
    }
}
