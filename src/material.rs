//! Node materials.
//!
//! A [`NodeMaterial`] holds one optional expression graph per channel plus the
//! fixed-function state the pipeline needs. Empty channels fall back to the
//! defaults: untransformed position, white, fully opaque, always visible.
//!
//! Channels take effect on [`NodeMaterial::build`], which compiles the whole
//! material to WGSL. Building is comparatively expensive; set every channel
//! first and build once.

use crate::node::Node;
use crate::wgsl::{self, CompiledShader, ShaderError};

/// Lighting model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum MaterialKind {
    /// Unlit: the color channel is written as is.
    #[default]
    Basic,
    /// Diffuse lighting from a fixed directional light.
    Lit,
}

/// Which faces are rasterized.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Side {
    #[default]
    Front,
    Back,
    Double,
}

impl Side {
    pub(crate) fn cull_mode(self) -> Option<wgpu::Face> {
        match self {
            Side::Front => Some(wgpu::Face::Back),
            Side::Back => Some(wgpu::Face::Front),
            Side::Double => None,
        }
    }
}

pub struct NodeMaterial {
    kind: MaterialKind,
    /// Local-space vertex position (`vec3f`), vertex stage.
    pub position_node: Option<Node>,
    /// Surface color (`f32`, `vec3f` or `vec4f`), fragment stage.
    pub color_node: Option<Node>,
    /// Opacity (`f32`), fragment stage. Multiplied with the color's alpha.
    pub opacity_node: Option<Node>,
    /// Visibility (`bool`), fragment stage. Fragments where it is false are discarded.
    pub mask_node: Option<Node>,
    /// Local-space shading normal (`vec3f`), fragment stage. Overrides the
    /// geometric normal for lit materials.
    pub normal_node: Option<Node>,
    pub flat_shading: bool,
    pub side: Side,
    /// Fragments with a final alpha below this are discarded.
    pub alpha_test: f32,
    /// Blend with the framebuffer instead of replacing it.
    pub transparent: bool,
    version: u32,
    compiled: Option<CompiledShader>,
}

impl NodeMaterial {
    pub fn new(kind: MaterialKind) -> Self {
        Self {
            kind,
            position_node: None,
            color_node: None,
            opacity_node: None,
            mask_node: None,
            normal_node: None,
            flat_shading: false,
            side: Side::Front,
            alpha_test: 0.0,
            transparent: false,
            version: 0,
            compiled: None,
        }
    }

    pub fn kind(&self) -> MaterialKind {
        self.kind
    }

    /// Number of successful builds. Consumers compare it to detect recompiles.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// The shader from the last successful build.
    pub fn compiled(&self) -> Option<&CompiledShader> {
        self.compiled.as_ref()
    }

    /// Compiles the current channels.
    ///
    /// On failure the previously compiled shader stays in place.
    pub fn build(&mut self) -> Result<&CompiledShader, ShaderError> {
        match wgsl::compile(self) {
            Ok(shader) => {
                self.version = self.version.wrapping_add(1);
                log::debug!(
                    "compiled node material v{} with {} vertex attributes",
                    self.version,
                    shader.attributes().len()
                );
                let shader: &CompiledShader = self.compiled.insert(shader);
                Ok(shader)
            }
            Err(e) => {
                log::error!("node material failed to compile, keeping previous version: {e}");
                Err(e)
            }
        }
    }

    /// Drops the compiled shader.
    pub fn dispose(&mut self) {
        self.compiled = None;
    }
}

impl Default for NodeMaterial {
    fn default() -> Self {
        Self::new(MaterialKind::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeType;

    #[test]
    fn build_bumps_version() {
        let mut material = NodeMaterial::new(MaterialKind::Basic);
        assert_eq!(material.version(), 0);
        assert!(material.compiled().is_none());

        material.build().unwrap();
        material.build().unwrap();
        assert_eq!(material.version(), 2);
        assert!(material.compiled().is_some());
    }

    #[test]
    fn failed_build_keeps_previous_shader() {
        let mut material = NodeMaterial::new(MaterialKind::Basic);
        material.build().unwrap();
        let before = material.compiled().unwrap().source().to_string();

        material.opacity_node = Some(Node::attribute("weights", NodeType::Vec2));
        assert!(material.build().is_err());
        assert_eq!(material.version(), 1);
        assert_eq!(material.compiled().unwrap().source(), before);
    }

    #[test]
    fn dispose_releases_shader() {
        let mut material = NodeMaterial::default();
        material.build().unwrap();
        material.dispose();
        assert!(material.compiled().is_none());
    }
}
