//! Shader expression nodes.
//!
//! A [`Node`] is an opaque, cheaply clonable handle to one vertex of a shader
//! expression graph. Graphs are built bottom-up from constants, vertex inputs and
//! combinators, then handed to a [`NodeMaterial`](crate::NodeMaterial) which
//! compiles them to WGSL.
//!
//! ```
//! use nodemesh::{Node, NodeType};
//!
//! let wobble = (Node::time() * 2.0).sin() * 0.1;
//! let height = Node::position_local().y();
//! let lifted = Node::position_local() + Node::vec3_from(&[&Node::float(0.0), &wobble, &Node::float(0.0)]);
//!
//! assert_eq!(lifted.ty().unwrap(), NodeType::Vec3);
//! assert_eq!(height.gt(&Node::float(0.0)).ty().unwrap(), NodeType::Bool);
//! ```
//!
//! Two nodes compare equal only when they are the same handle. The graph is
//! never compared structurally.
//!
//! Code that only needs to combine nodes (the operator chain, see
//! [`fold_operators`](crate::fold_operators)) is written against the [`ExpressionNode`],
//! [`LogicalNode`] and [`SideEffectNode`] traits rather than against `Node`.

use std::collections::HashMap;
use std::ops::{Add, Div, Mul, Sub};
use std::rc::Rc;

use glam::{Vec3, Vec4};

use crate::color::Color;
use crate::wgsl::ShaderError;

/// The value type a node evaluates to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeType {
    Bool,
    Float,
    Vec2,
    Vec3,
    Vec4,
}

impl NodeType {
    /// WGSL spelling of the type.
    pub fn wgsl(self) -> &'static str {
        match self {
            NodeType::Bool => "bool",
            NodeType::Float => "f32",
            NodeType::Vec2 => "vec2f",
            NodeType::Vec3 => "vec3f",
            NodeType::Vec4 => "vec4f",
        }
    }

    /// Number of scalar components.
    pub fn components(self) -> usize {
        match self {
            NodeType::Bool | NodeType::Float => 1,
            NodeType::Vec2 => 2,
            NodeType::Vec3 => 3,
            NodeType::Vec4 => 4,
        }
    }

    pub fn is_numeric(self) -> bool {
        self != NodeType::Bool
    }

    pub fn is_vector(self) -> bool {
        matches!(self, NodeType::Vec2 | NodeType::Vec3 | NodeType::Vec4)
    }

    /// The float type with `n` components, if there is one.
    pub fn float_with_components(n: usize) -> Option<NodeType> {
        match n {
            1 => Some(NodeType::Float),
            2 => Some(NodeType::Vec2),
            3 => Some(NodeType::Vec3),
            4 => Some(NodeType::Vec4),
            _ => None,
        }
    }
}

/// Binary arithmetic operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl ArithOp {
    pub fn symbol(self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
        }
    }
}

/// Scalar comparisons producing a boolean.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub fn symbol(self) -> &'static str {
        match self {
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }
}

/// WGSL builtin functions available as nodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Builtin {
    Sin,
    Cos,
    Abs,
    Fract,
    Sqrt,
    Length,
    Normalize,
    Min,
    Max,
}

impl Builtin {
    pub fn name(self) -> &'static str {
        match self {
            Builtin::Sin => "sin",
            Builtin::Cos => "cos",
            Builtin::Abs => "abs",
            Builtin::Fract => "fract",
            Builtin::Sqrt => "sqrt",
            Builtin::Length => "length",
            Builtin::Normalize => "normalize",
            Builtin::Min => "min",
            Builtin::Max => "max",
        }
    }

    pub fn arity(self) -> usize {
        match self {
            Builtin::Min | Builtin::Max => 2,
            _ => 1,
        }
    }
}

#[derive(Debug)]
pub(crate) enum NodeKind {
    Float(f32),
    Bool(bool),
    Vec3(Vec3),
    Vec4(Vec4),
    Time,
    /// A named per-vertex input. Local position and normal are the attributes
    /// `position` and `normal`.
    Attribute {
        name: String,
        ty: NodeType,
    },
    /// Fragment-stage read of a value written in the vertex stage.
    Varying {
        name: String,
        ty: NodeType,
    },
    /// Vertex-stage write of a varying. Evaluates to `value`.
    AssignVarying {
        name: String,
        value: Node,
    },
    Binary {
        op: ArithOp,
        lhs: Node,
        rhs: Node,
    },
    Compare {
        op: CompareOp,
        lhs: Node,
        rhs: Node,
    },
    And(Node, Node),
    Swizzle {
        node: Node,
        components: String,
    },
    Construct {
        ty: NodeType,
        args: Vec<Node>,
    },
    Call {
        func: Builtin,
        args: Vec<Node>,
    },
    /// Evaluates `effect` for its side effect, yields `value`.
    Bypass {
        effect: Node,
        value: Node,
    },
}

/// Handle to a node in a shader expression graph.
#[derive(Clone, Debug)]
pub struct Node(Rc<NodeKind>);

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Node {}

impl Node {
    fn from_kind(kind: NodeKind) -> Self {
        Node(Rc::new(kind))
    }

    pub(crate) fn kind(&self) -> &NodeKind {
        &self.0
    }

    pub(crate) fn key(&self) -> *const NodeKind {
        Rc::as_ptr(&self.0)
    }

    pub fn float(value: f32) -> Self {
        Self::from_kind(NodeKind::Float(value))
    }

    pub fn boolean(value: bool) -> Self {
        Self::from_kind(NodeKind::Bool(value))
    }

    pub fn vec3(x: f32, y: f32, z: f32) -> Self {
        Self::from_kind(NodeKind::Vec3(Vec3::new(x, y, z)))
    }

    pub fn vec4(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self::from_kind(NodeKind::Vec4(Vec4::new(x, y, z, w)))
    }

    /// An RGB constant. The alpha component is dropped; use
    /// [`Node::color_alpha`] to keep it.
    pub fn color(color: Color) -> Self {
        Self::vec3(color.r, color.g, color.b)
    }

    pub fn color_alpha(color: Color) -> Self {
        Self::vec4(color.r, color.g, color.b, color.a)
    }

    /// The untransformed vertex position.
    pub fn position_local() -> Self {
        Self::attribute("position", NodeType::Vec3)
    }

    /// The untransformed vertex normal.
    pub fn normal_local() -> Self {
        Self::attribute("normal", NodeType::Vec3)
    }

    /// Seconds since start, as uploaded through the camera uniforms.
    pub fn time() -> Self {
        Self::from_kind(NodeKind::Time)
    }

    /// A named geometry attribute read per vertex.
    pub fn attribute(name: impl Into<String>, ty: NodeType) -> Self {
        Self::from_kind(NodeKind::Attribute {
            name: name.into(),
            ty,
        })
    }

    /// Reads a varying written by [`Node::assign_varying`] in the vertex stage.
    pub fn varying(name: impl Into<String>, ty: NodeType) -> Self {
        Self::from_kind(NodeKind::Varying {
            name: name.into(),
            ty,
        })
    }

    /// Writes `value` to a varying. Only valid in vertex-stage channels.
    pub fn assign_varying(name: impl Into<String>, value: &Node) -> Self {
        Self::from_kind(NodeKind::AssignVarying {
            name: name.into(),
            value: value.clone(),
        })
    }

    pub fn binary(op: ArithOp, lhs: &Node, rhs: &Node) -> Self {
        Self::from_kind(NodeKind::Binary {
            op,
            lhs: lhs.clone(),
            rhs: rhs.clone(),
        })
    }

    fn compare(&self, op: CompareOp, rhs: &Node) -> Self {
        Self::from_kind(NodeKind::Compare {
            op,
            lhs: self.clone(),
            rhs: rhs.clone(),
        })
    }

    pub fn lt(&self, rhs: &Node) -> Self {
        self.compare(CompareOp::Lt, rhs)
    }

    pub fn le(&self, rhs: &Node) -> Self {
        self.compare(CompareOp::Le, rhs)
    }

    pub fn gt(&self, rhs: &Node) -> Self {
        self.compare(CompareOp::Gt, rhs)
    }

    pub fn ge(&self, rhs: &Node) -> Self {
        self.compare(CompareOp::Ge, rhs)
    }

    /// Logical conjunction of two boolean nodes.
    pub fn and(&self, rhs: &Node) -> Self {
        Self::from_kind(NodeKind::And(self.clone(), rhs.clone()))
    }

    /// Selects components, e.g. `"x"` or `"xz"`.
    pub fn swizzle(&self, components: &str) -> Self {
        Self::from_kind(NodeKind::Swizzle {
            node: self.clone(),
            components: components.to_string(),
        })
    }

    pub fn x(&self) -> Self {
        self.swizzle("x")
    }

    pub fn y(&self) -> Self {
        self.swizzle("y")
    }

    pub fn z(&self) -> Self {
        self.swizzle("z")
    }

    /// Builds a vector of type `ty` from scalar and vector parts.
    pub fn construct(ty: NodeType, args: &[&Node]) -> Self {
        Self::from_kind(NodeKind::Construct {
            ty,
            args: args.iter().map(|n| (*n).clone()).collect(),
        })
    }

    pub fn vec3_from(args: &[&Node]) -> Self {
        Self::construct(NodeType::Vec3, args)
    }

    pub fn call(func: Builtin, args: &[&Node]) -> Self {
        Self::from_kind(NodeKind::Call {
            func,
            args: args.iter().map(|n| (*n).clone()).collect(),
        })
    }

    pub fn sin(&self) -> Self {
        Self::call(Builtin::Sin, &[self])
    }

    pub fn cos(&self) -> Self {
        Self::call(Builtin::Cos, &[self])
    }

    pub fn abs(&self) -> Self {
        Self::call(Builtin::Abs, &[self])
    }

    pub fn fract(&self) -> Self {
        Self::call(Builtin::Fract, &[self])
    }

    pub fn sqrt(&self) -> Self {
        Self::call(Builtin::Sqrt, &[self])
    }

    pub fn length(&self) -> Self {
        Self::call(Builtin::Length, &[self])
    }

    pub fn normalize(&self) -> Self {
        Self::call(Builtin::Normalize, &[self])
    }

    pub fn min(&self, rhs: &Node) -> Self {
        Self::call(Builtin::Min, &[self, rhs])
    }

    pub fn max(&self, rhs: &Node) -> Self {
        Self::call(Builtin::Max, &[self, rhs])
    }

    /// Evaluates `effect` for its side effect and yields `self`.
    pub fn bypass(&self, effect: &Node) -> Self {
        Self::from_kind(NodeKind::Bypass {
            effect: effect.clone(),
            value: self.clone(),
        })
    }

    /// Infers the type this node evaluates to.
    ///
    /// Shared subgraphs are typed once, so the cost is linear in the number
    /// of distinct nodes.
    pub fn ty(&self) -> Result<NodeType, ShaderError> {
        self.ty_memo(&mut HashMap::new())
    }

    fn ty_memo(
        &self,
        memo: &mut HashMap<*const NodeKind, NodeType>,
    ) -> Result<NodeType, ShaderError> {
        if let Some(&ty) = memo.get(&self.key()) {
            return Ok(ty);
        }
        let ty = match self.kind() {
            NodeKind::Float(_) => NodeType::Float,
            NodeKind::Bool(_) => NodeType::Bool,
            NodeKind::Vec3(_) => NodeType::Vec3,
            NodeKind::Vec4(_) => NodeType::Vec4,
            NodeKind::Time => NodeType::Float,
            NodeKind::Attribute { name, ty } | NodeKind::Varying { name, ty } => {
                interface_type(name, *ty)?
            }
            NodeKind::AssignVarying { name, value } => {
                interface_type(name, value.ty_memo(memo)?)?
            }
            NodeKind::Binary { op, lhs, rhs } => {
                arith_type(op.symbol(), lhs.ty_memo(memo)?, rhs.ty_memo(memo)?)?
            }
            NodeKind::Compare { op, lhs, rhs } => {
                compare_type(*op, lhs.ty_memo(memo)?, rhs.ty_memo(memo)?)?
            }
            NodeKind::And(lhs, rhs) => and_type(lhs.ty_memo(memo)?, rhs.ty_memo(memo)?)?,
            NodeKind::Swizzle { node, components } => {
                swizzle_type(node.ty_memo(memo)?, components)?
            }
            NodeKind::Construct { ty, args } => {
                let arg_types = args
                    .iter()
                    .map(|arg| arg.ty_memo(memo))
                    .collect::<Result<Vec<_>, _>>()?;
                construct_type(*ty, &arg_types)?
            }
            NodeKind::Call { func, args } => {
                let arg_types = args
                    .iter()
                    .map(|arg| arg.ty_memo(memo))
                    .collect::<Result<Vec<_>, _>>()?;
                call_type(*func, &arg_types)?
            }
            NodeKind::Bypass { effect, value } => {
                effect.ty_memo(memo)?;
                value.ty_memo(memo)?
            }
        };
        memo.insert(self.key(), ty);
        Ok(ty)
    }
}

pub(crate) fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub(crate) fn interface_type(name: &str, ty: NodeType) -> Result<NodeType, ShaderError> {
    if !is_valid_name(name) {
        return Err(ShaderError::InvalidName(name.to_string()));
    }
    if !ty.is_numeric() {
        return Err(ShaderError::UnexpectedType {
            context: format!("interface value '{name}'"),
            expected: "a numeric type",
            found: ty,
        });
    }
    Ok(ty)
}

pub(crate) fn arith_type(
    operation: &'static str,
    lhs: NodeType,
    rhs: NodeType,
) -> Result<NodeType, ShaderError> {
    if !lhs.is_numeric() || !rhs.is_numeric() {
        return Err(ShaderError::TypeMismatch {
            operation,
            lhs,
            rhs,
        });
    }
    // WGSL broadcasts a scalar against a vector for + - * /.
    match (lhs, rhs) {
        (l, r) if l == r => Ok(l),
        (NodeType::Float, r) => Ok(r),
        (l, NodeType::Float) => Ok(l),
        _ => Err(ShaderError::TypeMismatch {
            operation,
            lhs,
            rhs,
        }),
    }
}

pub(crate) fn compare_type(
    op: CompareOp,
    lhs: NodeType,
    rhs: NodeType,
) -> Result<NodeType, ShaderError> {
    if lhs == NodeType::Float && rhs == NodeType::Float {
        Ok(NodeType::Bool)
    } else {
        Err(ShaderError::TypeMismatch {
            operation: op.symbol(),
            lhs,
            rhs,
        })
    }
}

pub(crate) fn and_type(lhs: NodeType, rhs: NodeType) -> Result<NodeType, ShaderError> {
    if lhs == NodeType::Bool && rhs == NodeType::Bool {
        Ok(NodeType::Bool)
    } else {
        Err(ShaderError::TypeMismatch {
            operation: "&&",
            lhs,
            rhs,
        })
    }
}

pub(crate) fn swizzle_type(input: NodeType, components: &str) -> Result<NodeType, ShaderError> {
    let invalid = || ShaderError::InvalidSwizzle(components.to_string());
    if !input.is_vector() {
        return Err(invalid());
    }
    let in_range = components.chars().all(|c| match c {
        'x' => true,
        'y' => true,
        'z' => input.components() >= 3,
        'w' => input.components() >= 4,
        _ => false,
    });
    if !in_range {
        return Err(invalid());
    }
    NodeType::float_with_components(components.len()).ok_or_else(invalid)
}

pub(crate) fn construct_type(ty: NodeType, args: &[NodeType]) -> Result<NodeType, ShaderError> {
    if !ty.is_vector() {
        return Err(ShaderError::UnexpectedType {
            context: "vector construction".to_string(),
            expected: "a vector type",
            found: ty,
        });
    }
    if let Some(bad) = args.iter().find(|a| !a.is_numeric()) {
        return Err(ShaderError::UnexpectedType {
            context: format!("{} constructor argument", ty.wgsl()),
            expected: "a numeric type",
            found: *bad,
        });
    }
    let provided: usize = args.iter().map(|a| a.components()).sum();
    if provided != ty.components() {
        return Err(ShaderError::Arity {
            function: ty.wgsl(),
            expected: ty.components(),
            found: provided,
        });
    }
    Ok(ty)
}

pub(crate) fn call_type(func: Builtin, args: &[NodeType]) -> Result<NodeType, ShaderError> {
    if args.len() != func.arity() {
        return Err(ShaderError::Arity {
            function: func.name(),
            expected: func.arity(),
            found: args.len(),
        });
    }
    let first = args[0];
    if !first.is_numeric() {
        return Err(ShaderError::UnexpectedType {
            context: format!("argument of {}", func.name()),
            expected: "a numeric type",
            found: first,
        });
    }
    match func {
        Builtin::Sin | Builtin::Cos | Builtin::Abs | Builtin::Fract | Builtin::Sqrt => Ok(first),
        Builtin::Length => Ok(NodeType::Float),
        Builtin::Normalize => {
            if first.is_vector() {
                Ok(first)
            } else {
                Err(ShaderError::UnexpectedType {
                    context: "argument of normalize".to_string(),
                    expected: "a vector type",
                    found: first,
                })
            }
        }
        Builtin::Min | Builtin::Max => {
            if first == args[1] {
                Ok(first)
            } else {
                Err(ShaderError::TypeMismatch {
                    operation: func.name(),
                    lhs: first,
                    rhs: args[1],
                })
            }
        }
    }
}

/// A node that can be combined with another under an arithmetic operator.
///
/// `self` is always the left operand.
pub trait ExpressionNode: Clone {
    fn combine(&self, op: ArithOp, rhs: &Self) -> Self;
}

/// A node that can be AND-ed with another.
pub trait LogicalNode: Clone {
    fn and(&self, rhs: &Self) -> Self;
}

/// A node that can carry another node's side effect while keeping its value.
pub trait SideEffectNode: Clone {
    fn bypass(&self, effect: &Self) -> Self;
}

impl ExpressionNode for Node {
    fn combine(&self, op: ArithOp, rhs: &Self) -> Self {
        Node::binary(op, self, rhs)
    }
}

impl LogicalNode for Node {
    fn and(&self, rhs: &Self) -> Self {
        Node::and(self, rhs)
    }
}

impl SideEffectNode for Node {
    fn bypass(&self, effect: &Self) -> Self {
        Node::bypass(self, effect)
    }
}

impl From<f32> for Node {
    fn from(value: f32) -> Self {
        Node::float(value)
    }
}

impl From<bool> for Node {
    fn from(value: bool) -> Self {
        Node::boolean(value)
    }
}

macro_rules! impl_arith {
    ($trait:ident, $method:ident, $op:expr) => {
        impl $trait<&Node> for &Node {
            type Output = Node;
            fn $method(self, rhs: &Node) -> Node {
                Node::binary($op, self, rhs)
            }
        }

        impl $trait<Node> for Node {
            type Output = Node;
            fn $method(self, rhs: Node) -> Node {
                Node::binary($op, &self, &rhs)
            }
        }

        impl $trait<&Node> for Node {
            type Output = Node;
            fn $method(self, rhs: &Node) -> Node {
                Node::binary($op, &self, rhs)
            }
        }

        impl $trait<f32> for Node {
            type Output = Node;
            fn $method(self, rhs: f32) -> Node {
                Node::binary($op, &self, &Node::float(rhs))
            }
        }

        impl $trait<f32> for &Node {
            type Output = Node;
            fn $method(self, rhs: f32) -> Node {
                Node::binary($op, self, &Node::float(rhs))
            }
        }
    };
}

impl_arith!(Add, add, ArithOp::Add);
impl_arith!(Sub, sub, ArithOp::Sub);
impl_arith!(Mul, mul, ArithOp::Mul);
impl_arith!(Div, div, ArithOp::Div);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_subgraphs_are_typed_once() {
        // 2^64 paths through 65 distinct nodes.
        let mut x = Node::attribute("w", NodeType::Float);
        for _ in 0..64 {
            x = &x + &x;
        }
        assert_eq!(x.ty().unwrap(), NodeType::Float);

        let v = Node::position_local();
        let mut y = v.clone();
        for _ in 0..64 {
            y = &y * &y;
        }
        assert_eq!((y.x() + 1.0).ty().unwrap(), NodeType::Float);
    }

    #[test]
    fn equality_is_handle_identity() {
        let a = Node::float(1.0);
        let b = Node::float(1.0);
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[test]
    fn scalar_broadcasts_against_vector() {
        let scaled = Node::position_local() * 2.0;
        assert_eq!(scaled.ty().unwrap(), NodeType::Vec3);

        let shifted = Node::float(1.0) + Node::vec4(0.0, 0.0, 0.0, 1.0);
        assert_eq!(shifted.ty().unwrap(), NodeType::Vec4);
    }

    #[test]
    fn mismatched_vectors_are_rejected() {
        let bad = Node::position_local() + Node::vec4(0.0, 0.0, 0.0, 1.0);
        assert!(matches!(
            bad.ty(),
            Err(ShaderError::TypeMismatch { operation: "+", .. })
        ));
    }

    #[test]
    fn booleans_do_not_mix_with_arithmetic() {
        let bad = Node::boolean(true) * 2.0;
        assert!(bad.ty().is_err());

        let mask = Node::time().gt(&Node::float(1.0)).and(&Node::boolean(true));
        assert_eq!(mask.ty().unwrap(), NodeType::Bool);
    }

    #[test]
    fn swizzles_respect_input_width() {
        assert_eq!(Node::position_local().swizzle("xz").ty().unwrap(), NodeType::Vec2);
        assert!(matches!(
            Node::position_local().swizzle("w").ty(),
            Err(ShaderError::InvalidSwizzle(_))
        ));
        assert!(Node::time().x().ty().is_err());
    }

    #[test]
    fn construction_counts_components() {
        let xy = Node::position_local().swizzle("xy");
        let built = Node::vec3_from(&[&xy, &Node::float(0.0)]);
        assert_eq!(built.ty().unwrap(), NodeType::Vec3);

        let short = Node::vec3_from(&[&xy]);
        assert!(matches!(
            short.ty(),
            Err(ShaderError::Arity { expected: 3, found: 2, .. })
        ));
    }

    #[test]
    fn builtin_result_types() {
        let p = Node::position_local();
        assert_eq!(p.length().ty().unwrap(), NodeType::Float);
        assert_eq!(p.normalize().ty().unwrap(), NodeType::Vec3);
        assert!(Node::float(1.0).normalize().ty().is_err());
        assert!(p.min(&Node::float(0.0)).ty().is_err());
    }

    #[test]
    fn bypass_yields_the_wrapped_value_type() {
        let effect = Node::assign_varying("height", &Node::position_local().y());
        let wrapped = Node::position_local().bypass(&effect);
        assert_eq!(wrapped.ty().unwrap(), NodeType::Vec3);
    }

    #[test]
    fn interface_names_are_validated() {
        assert!(Node::attribute("uv", NodeType::Vec2).ty().is_ok());
        assert!(matches!(
            Node::attribute("my attr", NodeType::Float).ty(),
            Err(ShaderError::InvalidName(_))
        ));
        assert!(Node::attribute("flag", NodeType::Bool).ty().is_err());
    }
}
