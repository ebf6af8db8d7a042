//! Placement and primitive kinds for node meshes.
//!
//! [`Transform`] uses a builder pattern:
//!
//! ```
//! use nodemesh::{Quat, Transform, Vec3};
//!
//! let transform = Transform::new()
//!     .position(Vec3::new(0.0, 2.0, -5.0))
//!     .rotation(Quat::from_rotation_y(0.5))
//!     .uniform_scale(2.0);
//! let matrix = transform.matrix();
//! ```

use glam::{Mat4, Quat, Vec3};

/// How the vertex stream is assembled into primitives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum PrimitiveKind {
    /// Triangle list.
    #[default]
    Mesh,
    /// Line list.
    Lines,
    /// Point list. Points have no surface, so no geometric normal.
    Points,
}

impl PrimitiveKind {
    /// Whether primitives enclose area. Only solid primitives are depth sorted.
    pub fn is_solid(self) -> bool {
        matches!(self, PrimitiveKind::Mesh)
    }

    pub(crate) fn topology(self) -> wgpu::PrimitiveTopology {
        match self {
            PrimitiveKind::Mesh => wgpu::PrimitiveTopology::TriangleList,
            PrimitiveKind::Lines => wgpu::PrimitiveTopology::LineList,
            PrimitiveKind::Points => wgpu::PrimitiveTopology::PointList,
        }
    }
}

/// Position, rotation and scale of a mesh in world space.
///
/// The default places the object at the origin with no rotation and unit scale.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    /// Rotation as a unit quaternion.
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    pub fn position(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    pub fn rotation(mut self, rotation: Quat) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    pub fn uniform_scale(mut self, scale: f32) -> Self {
        self.scale = Vec3::splat(scale);
        self
    }

    /// The model matrix, applied scale first, then rotation, then translation.
    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }
}
