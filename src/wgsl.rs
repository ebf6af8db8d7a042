//! WGSL generation for node materials.
//!
//! [`compile`] turns the channels of a [`NodeMaterial`] into a single WGSL module
//! with a `vs` vertex entry point and an `fs` fragment entry point.
//!
//! # Bindings
//!
//! ```wgsl
//! struct Camera {
//!     view_proj: mat4x4f,
//!     position: vec3f,
//!     time: f32,
//! }
//! @group(0) @binding(0) var<uniform> camera: Camera;
//!
//! struct Model {
//!     model: mat4x4f,
//!     normal_matrix: mat4x4f,
//! }
//! @group(1) @binding(0) var<uniform> model: Model;
//! ```
//!
//! # Vertex inputs
//!
//! `position` is always bound at location 0. Every other attribute a channel
//! reads gets the next free location, in first-use order. The resulting list is
//! available as [`CompiledShader::attributes`] so the caller can bind one vertex
//! buffer per attribute.
//!
//! # Stages
//!
//! The position channel and any effects wrapped around it run in the vertex
//! stage. Color, opacity, mask and normal run in the fragment stage. Attribute
//! reads in the fragment stage are carried over by generated varyings.

use std::collections::HashMap;
use std::fmt;
use std::fmt::Write as _;

use glam::Vec3;

use crate::color::Color;
use crate::material::{MaterialKind, NodeMaterial};
use crate::node::{self, Node, NodeKind, NodeType};

const LIGHT_DIRECTION: Vec3 = Vec3::new(0.4, 0.8, 0.6);
const AMBIENT: f32 = 0.35;

/// Shader stage a node is emitted into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Vertex,
    Fragment,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Vertex => write!(f, "vertex"),
            Stage::Fragment => write!(f, "fragment"),
        }
    }
}

/// Errors raised while typing or emitting a node graph.
#[derive(Clone, Debug, PartialEq)]
pub enum ShaderError {
    /// An operator received operand types it cannot combine.
    TypeMismatch {
        operation: &'static str,
        lhs: NodeType,
        rhs: NodeType,
    },
    /// A node or channel evaluated to the wrong type.
    UnexpectedType {
        context: String,
        expected: &'static str,
        found: NodeType,
    },
    /// Wrong argument count or component count.
    Arity {
        function: &'static str,
        expected: usize,
        found: usize,
    },
    InvalidSwizzle(String),
    /// Attribute and varying names must be WGSL identifiers.
    InvalidName(String),
    /// NaN and infinities have no WGSL literal.
    NonFinite(f32),
    /// A node was used in a stage it is not available in.
    WrongStage { node: &'static str, stage: Stage },
    /// A varying was read but never written by the vertex stage.
    UnknownVarying(String),
    /// The same attribute or varying name was used with two types.
    InterfaceConflict {
        name: String,
        first: NodeType,
        second: NodeType,
    },
}

impl fmt::Display for ShaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderError::TypeMismatch {
                operation,
                lhs,
                rhs,
            } => write!(
                f,
                "cannot apply '{}' to {} and {}",
                operation,
                lhs.wgsl(),
                rhs.wgsl()
            ),
            ShaderError::UnexpectedType {
                context,
                expected,
                found,
            } => write!(f, "{} must be {}, found {}", context, expected, found.wgsl()),
            ShaderError::Arity {
                function,
                expected,
                found,
            } => write!(f, "{} expects {} inputs, got {}", function, expected, found),
            ShaderError::InvalidSwizzle(s) => write!(f, "invalid swizzle '{}'", s),
            ShaderError::InvalidName(name) => write!(f, "'{}' is not a valid identifier", name),
            ShaderError::NonFinite(v) => write!(f, "constant {} is not finite", v),
            ShaderError::WrongStage { node, stage } => {
                write!(f, "{} is not available in the {} stage", node, stage)
            }
            ShaderError::UnknownVarying(name) => {
                write!(f, "varying '{}' is read but never written", name)
            }
            ShaderError::InterfaceConflict {
                name,
                first,
                second,
            } => write!(
                f,
                "'{}' used as both {} and {}",
                name,
                first.wgsl(),
                second.wgsl()
            ),
        }
    }
}

impl std::error::Error for ShaderError {}

/// A vertex input the compiled shader expects.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShaderAttribute {
    pub name: String,
    pub ty: NodeType,
    pub location: u32,
}

/// Output of [`compile`].
#[derive(Clone, Debug)]
pub struct CompiledShader {
    source: String,
    attributes: Vec<ShaderAttribute>,
}

impl CompiledShader {
    /// The WGSL module.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Vertex inputs, ordered by location.
    pub fn attributes(&self) -> &[ShaderAttribute] {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&ShaderAttribute> {
        self.attributes.iter().find(|a| a.name == name)
    }
}

fn register(
    list: &mut Vec<(String, NodeType)>,
    name: &str,
    ty: NodeType,
) -> Result<(), ShaderError> {
    match list.iter().find(|(n, _)| n == name) {
        Some((_, first)) if *first != ty => Err(ShaderError::InterfaceConflict {
            name: name.to_string(),
            first: *first,
            second: ty,
        }),
        Some(_) => Ok(()),
        None => {
            list.push((name.to_string(), ty));
            Ok(())
        }
    }
}

/// Stage-crossing values discovered while emitting.
#[derive(Default)]
struct Interface {
    attributes: Vec<(String, NodeType)>,
    passthrough: Vec<(String, NodeType)>,
    varyings: Vec<(String, NodeType)>,
}

#[derive(Clone, Debug)]
struct Operand {
    expr: String,
    ty: NodeType,
}

struct StageEmitter<'i> {
    stage: Stage,
    interface: &'i mut Interface,
    lines: Vec<String>,
    memo: HashMap<*const NodeKind, Operand>,
    next: usize,
}

impl<'i> StageEmitter<'i> {
    fn new(stage: Stage, interface: &'i mut Interface) -> Self {
        Self {
            stage,
            interface,
            lines: Vec::new(),
            memo: HashMap::new(),
            next: 0,
        }
    }

    fn bind(&mut self, expr: String, ty: NodeType) -> Operand {
        let name = format!("n{}", self.next);
        self.next += 1;
        self.lines
            .push(format!("let {}: {} = {};", name, ty.wgsl(), expr));
        Operand { expr: name, ty }
    }

    fn emit(&mut self, node: &Node) -> Result<Operand, ShaderError> {
        if let Some(operand) = self.memo.get(&node.key()) {
            return Ok(operand.clone());
        }
        let operand = self.emit_kind(node.kind())?;
        self.memo.insert(node.key(), operand.clone());
        Ok(operand)
    }

    fn emit_kind(&mut self, kind: &NodeKind) -> Result<Operand, ShaderError> {
        let operand = match kind {
            NodeKind::Float(v) => Operand {
                expr: float_literal(*v)?,
                ty: NodeType::Float,
            },
            NodeKind::Bool(b) => Operand {
                expr: b.to_string(),
                ty: NodeType::Bool,
            },
            NodeKind::Vec3(v) => Operand {
                expr: format!(
                    "vec3f({}, {}, {})",
                    float_literal(v.x)?,
                    float_literal(v.y)?,
                    float_literal(v.z)?
                ),
                ty: NodeType::Vec3,
            },
            NodeKind::Vec4(v) => Operand {
                expr: format!(
                    "vec4f({}, {}, {}, {})",
                    float_literal(v.x)?,
                    float_literal(v.y)?,
                    float_literal(v.z)?,
                    float_literal(v.w)?
                ),
                ty: NodeType::Vec4,
            },
            NodeKind::Time => Operand {
                expr: "camera.time".to_string(),
                ty: NodeType::Float,
            },
            NodeKind::Attribute { name, ty } => {
                let ty = node::interface_type(name, *ty)?;
                register(&mut self.interface.attributes, name, ty)?;
                match self.stage {
                    Stage::Vertex => Operand {
                        expr: format!("in.a_{}", name),
                        ty,
                    },
                    Stage::Fragment => {
                        register(&mut self.interface.passthrough, name, ty)?;
                        Operand {
                            expr: format!("in.p_{}", name),
                            ty,
                        }
                    }
                }
            }
            NodeKind::Varying { name, ty } => {
                let ty = node::interface_type(name, *ty)?;
                if self.stage != Stage::Fragment {
                    return Err(ShaderError::WrongStage {
                        node: "varying read",
                        stage: self.stage,
                    });
                }
                match self.interface.varyings.iter().find(|(n, _)| n == name) {
                    None => return Err(ShaderError::UnknownVarying(name.clone())),
                    Some((_, written)) if *written != ty => {
                        return Err(ShaderError::InterfaceConflict {
                            name: name.clone(),
                            first: *written,
                            second: ty,
                        });
                    }
                    Some(_) => {}
                }
                Operand {
                    expr: format!("in.v_{}", name),
                    ty,
                }
            }
            NodeKind::AssignVarying { name, value } => {
                if self.stage != Stage::Vertex {
                    return Err(ShaderError::WrongStage {
                        node: "varying write",
                        stage: self.stage,
                    });
                }
                let value = self.emit(value)?;
                let ty = node::interface_type(name, value.ty)?;
                register(&mut self.interface.varyings, name, ty)?;
                self.lines.push(format!("out.v_{} = {};", name, value.expr));
                value
            }
            NodeKind::Binary { op, lhs, rhs } => {
                let l = self.emit(lhs)?;
                let r = self.emit(rhs)?;
                let ty = node::arith_type(op.symbol(), l.ty, r.ty)?;
                self.bind(format!("{} {} {}", l.expr, op.symbol(), r.expr), ty)
            }
            NodeKind::Compare { op, lhs, rhs } => {
                let l = self.emit(lhs)?;
                let r = self.emit(rhs)?;
                let ty = node::compare_type(*op, l.ty, r.ty)?;
                self.bind(format!("{} {} {}", l.expr, op.symbol(), r.expr), ty)
            }
            NodeKind::And(lhs, rhs) => {
                let l = self.emit(lhs)?;
                let r = self.emit(rhs)?;
                let ty = node::and_type(l.ty, r.ty)?;
                self.bind(format!("{} && {}", l.expr, r.expr), ty)
            }
            NodeKind::Swizzle {
                node: inner,
                components,
            } => {
                let input = self.emit(inner)?;
                let ty = node::swizzle_type(input.ty, components)?;
                self.bind(format!("{}.{}", input.expr, components), ty)
            }
            NodeKind::Construct { ty, args } => {
                let args = self.emit_all(args)?;
                let types: Vec<NodeType> = args.iter().map(|a| a.ty).collect();
                let ty = node::construct_type(*ty, &types)?;
                self.bind(format!("{}({})", ty.wgsl(), join(&args)), ty)
            }
            NodeKind::Call { func, args } => {
                let args = self.emit_all(args)?;
                let types: Vec<NodeType> = args.iter().map(|a| a.ty).collect();
                let ty = node::call_type(*func, &types)?;
                self.bind(format!("{}({})", func.name(), join(&args)), ty)
            }
            NodeKind::Bypass { effect, value } => {
                self.emit(effect)?;
                self.emit(value)?
            }
        };
        Ok(operand)
    }

    fn emit_all(&mut self, nodes: &[Node]) -> Result<Vec<Operand>, ShaderError> {
        nodes.iter().map(|n| self.emit(n)).collect()
    }
}

fn join(operands: &[Operand]) -> String {
    operands
        .iter()
        .map(|o| o.expr.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn float_literal(v: f32) -> Result<String, ShaderError> {
    if !v.is_finite() {
        return Err(ShaderError::NonFinite(v));
    }
    // Debug formatting always keeps a decimal point or exponent.
    let text = format!("{:?}", v);
    if text.starts_with('-') {
        Ok(format!("({})", text))
    } else {
        Ok(text)
    }
}

fn expect_type(channel: &str, operand: &Operand, expected: NodeType) -> Result<(), ShaderError> {
    if operand.ty == expected {
        Ok(())
    } else {
        Err(ShaderError::UnexpectedType {
            context: format!("{} channel", channel),
            expected: expected.wgsl(),
            found: operand.ty,
        })
    }
}

/// Compiles `material` into a WGSL module.
pub fn compile(material: &NodeMaterial) -> Result<CompiledShader, ShaderError> {
    let mut interface = Interface::default();
    register(&mut interface.attributes, "position", NodeType::Vec3)?;

    let position = material
        .position_node
        .clone()
        .unwrap_or_else(Node::position_local);
    let color = material
        .color_node
        .clone()
        .unwrap_or_else(|| Node::color(Color::WHITE));
    let opacity = material
        .opacity_node
        .clone()
        .unwrap_or_else(|| Node::float(1.0));
    let mask = material
        .mask_node
        .clone()
        .unwrap_or_else(|| Node::boolean(true));
    let alpha_test = float_literal(material.alpha_test)?;

    let (vertex_lines, local) = {
        let mut vs = StageEmitter::new(Stage::Vertex, &mut interface);
        let local = vs.emit(&position)?;
        expect_type("position", &local, NodeType::Vec3)?;
        (vs.lines, local.expr)
    };

    let mut fs = StageEmitter::new(Stage::Fragment, &mut interface);

    // Derivatives must run before any discard, so shading comes first.
    let lit = material.kind() == MaterialKind::Lit;
    if lit {
        let normal = match (&material.normal_node, material.flat_shading) {
            (Some(n), _) => Some(fs.emit(n)?),
            (None, true) => None,
            (None, false) => Some(fs.emit(&Node::normal_local())?),
        };
        let shading_normal = match normal {
            Some(n) => {
                expect_type("normal", &n, NodeType::Vec3)?;
                format!("normalize((model.normal_matrix * vec4f({}, 0.0)).xyz)", n.expr)
            }
            None => "normalize(cross(dpdx(in.world), dpdy(in.world)))".to_string(),
        };
        let light = LIGHT_DIRECTION.normalize();
        fs.lines
            .push(format!("let shading_normal = {};", shading_normal));
        fs.lines.push(format!(
            "let light = {} + {} * abs(dot(shading_normal, vec3f({}, {}, {})));",
            float_literal(AMBIENT)?,
            float_literal(1.0 - AMBIENT)?,
            float_literal(light.x)?,
            float_literal(light.y)?,
            float_literal(light.z)?
        ));
    }

    let color = fs.emit(&color)?;
    let base = match color.ty {
        NodeType::Float => format!("vec4f(vec3f({}), 1.0)", color.expr),
        NodeType::Vec3 => format!("vec4f({}, 1.0)", color.expr),
        NodeType::Vec4 => color.expr.clone(),
        found => {
            return Err(ShaderError::UnexpectedType {
                context: "color channel".to_string(),
                expected: "f32, vec3f or vec4f",
                found,
            });
        }
    };
    let opacity = fs.emit(&opacity)?;
    expect_type("opacity", &opacity, NodeType::Float)?;
    let mask = fs.emit(&mask)?;
    expect_type("mask", &mask, NodeType::Bool)?;
    let fragment_lines = fs.lines;

    let attributes: Vec<ShaderAttribute> = interface
        .attributes
        .iter()
        .enumerate()
        .map(|(i, (name, ty))| ShaderAttribute {
            name: name.clone(),
            ty: *ty,
            location: i as u32,
        })
        .collect();

    let mut src = String::new();
    src.push_str(HEADER);

    src.push_str("struct VertexInput {\n");
    for a in &attributes {
        let _ = writeln!(src, "    @location({}) a_{}: {},", a.location, a.name, a.ty.wgsl());
    }
    src.push_str("}\n\n");

    src.push_str("struct VertexOutput {\n");
    src.push_str("    @builtin(position) clip: vec4f,\n");
    src.push_str("    @location(0) world: vec3f,\n");
    let mut location = 1;
    for (name, ty) in &interface.passthrough {
        let _ = writeln!(src, "    @location({}) p_{}: {},", location, name, ty.wgsl());
        location += 1;
    }
    for (name, ty) in &interface.varyings {
        let _ = writeln!(src, "    @location({}) v_{}: {},", location, name, ty.wgsl());
        location += 1;
    }
    src.push_str("}\n\n");

    src.push_str("@vertex\nfn vs(in: VertexInput) -> VertexOutput {\n");
    src.push_str("    var out: VertexOutput;\n");
    for line in &vertex_lines {
        let _ = writeln!(src, "    {}", line);
    }
    let _ = writeln!(src, "    let world = model.model * vec4f({}, 1.0);", local);
    src.push_str("    out.clip = camera.view_proj * world;\n");
    src.push_str("    out.world = world.xyz;\n");
    for (name, _) in &interface.passthrough {
        let _ = writeln!(src, "    out.p_{} = in.a_{};", name, name);
    }
    src.push_str("    return out;\n}\n\n");

    src.push_str("@fragment\nfn fs(in: VertexOutput) -> @location(0) vec4f {\n");
    for line in &fragment_lines {
        let _ = writeln!(src, "    {}", line);
    }
    let _ = writeln!(src, "    if !({}) {{\n        discard;\n    }}", mask.expr);
    let _ = writeln!(src, "    let base = {};", base);
    let _ = writeln!(src, "    let alpha = {} * base.a;", opacity.expr);
    let _ = writeln!(src, "    if alpha < {} {{\n        discard;\n    }}", alpha_test);
    if lit {
        src.push_str("    return vec4f(base.rgb * light, alpha);\n}\n");
    } else {
        src.push_str("    return vec4f(base.rgb, alpha);\n}\n");
    }

    Ok(CompiledShader {
        source: src,
        attributes,
    })
}

const HEADER: &str = "struct Camera {
    view_proj: mat4x4f,
    position: vec3f,
    time: f32,
}
@group(0) @binding(0) var<uniform> camera: Camera;

struct Model {
    model: mat4x4f,
    normal_matrix: mat4x4f,
}
@group(1) @binding(0) var<uniform> model: Model;

";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::Side;

    fn material(kind: MaterialKind) -> NodeMaterial {
        NodeMaterial::new(kind)
    }

    #[test]
    fn default_material_has_both_entry_points() {
        let shader = compile(&material(MaterialKind::Basic)).unwrap();
        let src = shader.source();
        assert!(src.contains("fn vs(in: VertexInput) -> VertexOutput"));
        assert!(src.contains("fn fs(in: VertexOutput) -> @location(0) vec4f"));
        assert!(src.contains("@location(0) a_position: vec3f"));
        assert!(src.contains("vec4f(in.a_position, 1.0)"));
        assert_eq!(shader.attributes().len(), 1);
    }

    #[test]
    fn attributes_get_locations_in_first_use_order() {
        let mut m = material(MaterialKind::Basic);
        m.position_node = Some(
            Node::position_local() + Node::attribute("offset", NodeType::Vec3),
        );
        m.color_node = Some(Node::attribute("tint", NodeType::Vec3));
        let shader = compile(&m).unwrap();

        let names: Vec<_> = shader.attributes().iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, ["position", "offset", "tint"]);
        assert_eq!(shader.attribute("tint").unwrap().location, 2);
        // Fragment reads go through a generated varying.
        assert!(shader.source().contains("out.p_tint = in.a_tint;"));
        assert!(shader.source().contains("p_tint: vec3f"));
    }

    #[test]
    fn shared_subgraphs_are_emitted_once() {
        let wave = Node::time().sin();
        let mut m = material(MaterialKind::Basic);
        m.opacity_node = Some(&wave * &wave);
        let shader = compile(&m).unwrap();
        assert_eq!(shader.source().matches("sin(").count(), 1);
    }

    #[test]
    fn varyings_flow_from_vertex_to_fragment() {
        let height = Node::position_local().y();
        let effect = Node::assign_varying("height", &height);
        let mut m = material(MaterialKind::Basic);
        m.position_node = Some(Node::position_local().bypass(&effect));
        m.opacity_node = Some(Node::varying("height", NodeType::Float));
        let shader = compile(&m).unwrap();
        let src = shader.source();
        assert!(src.contains("v_height: f32"));
        assert!(src.contains("out.v_height = "));
        assert!(src.contains("in.v_height"));
    }

    #[test]
    fn unknown_varying_is_an_error() {
        let mut m = material(MaterialKind::Basic);
        m.opacity_node = Some(Node::varying("missing", NodeType::Float));
        assert_eq!(
            compile(&m).unwrap_err(),
            ShaderError::UnknownVarying("missing".to_string())
        );
    }

    #[test]
    fn varying_write_outside_vertex_stage_is_an_error() {
        let mut m = material(MaterialKind::Basic);
        m.opacity_node = Some(Node::assign_varying("a", &Node::float(1.0)));
        assert!(matches!(
            compile(&m),
            Err(ShaderError::WrongStage {
                stage: Stage::Fragment,
                ..
            })
        ));
    }

    #[test]
    fn channel_types_are_checked() {
        let mut m = material(MaterialKind::Basic);
        m.mask_node = Some(Node::float(1.0));
        assert!(matches!(
            compile(&m),
            Err(ShaderError::UnexpectedType { found: NodeType::Float, .. })
        ));

        let mut m = material(MaterialKind::Basic);
        m.position_node = Some(Node::float(1.0));
        assert!(compile(&m).is_err());
    }

    #[test]
    fn mask_and_alpha_test_discard() {
        let mut m = material(MaterialKind::Basic);
        m.mask_node = Some(Node::position_local().y().gt(&Node::float(0.0)));
        m.alpha_test = 0.25;
        let src = compile(&m).unwrap().source().to_string();
        assert!(src.contains("let n1: bool = n0 > 0.0;"));
        assert!(src.contains("if !(n1) {"));
        assert!(src.contains("if alpha < 0.25 {"));
    }

    #[test]
    fn vec4_color_alpha_multiplies_opacity() {
        let mut m = material(MaterialKind::Basic);
        m.color_node = Some(Node::vec4(1.0, 0.0, 0.0, 0.5));
        m.opacity_node = Some(Node::float(0.5));
        let src = compile(&m).unwrap().source().to_string();
        assert!(src.contains("let base = vec4f(1.0, 0.0, 0.0, 0.5);"));
        assert!(src.contains("let alpha = 0.5 * base.a;"));
    }

    #[test]
    fn flat_lit_material_uses_derivatives() {
        let mut m = material(MaterialKind::Lit);
        m.flat_shading = true;
        m.side = Side::Double;
        let shader = compile(&m).unwrap();
        assert!(shader.source().contains("dpdx(in.world)"));
        assert!(shader.attribute("normal").is_none());
    }

    #[test]
    fn smooth_lit_material_reads_normals() {
        let shader = compile(&material(MaterialKind::Lit)).unwrap();
        assert!(shader.attribute("normal").is_some());
        assert!(shader.source().contains("in.p_normal"));
    }

    #[test]
    fn normal_node_overrides_geometric_normal() {
        let mut m = material(MaterialKind::Lit);
        m.flat_shading = true;
        m.normal_node = Some(Node::vec3(0.0, 0.0, 1.0));
        let src = compile(&m).unwrap().source().to_string();
        assert!(!src.contains("dpdx"));
        assert!(src.contains("vec4f(vec3f(0.0, 0.0, 1.0), 0.0)"));
    }

    #[test]
    fn negative_and_non_finite_literals() {
        assert_eq!(float_literal(-2.5).unwrap(), "(-2.5)");
        assert_eq!(float_literal(3.0).unwrap(), "3.0");
        assert!(matches!(
            float_literal(f32::NAN),
            Err(ShaderError::NonFinite(_))
        ));
    }

    #[test]
    fn conflicting_attribute_types_are_rejected() {
        let mut m = material(MaterialKind::Basic);
        m.position_node = Some(Node::attribute("position", NodeType::Vec4).swizzle("xyz"));
        assert!(matches!(
            compile(&m),
            Err(ShaderError::InterfaceConflict { .. })
        ));
    }
}
