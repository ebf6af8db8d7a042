//! Operator chains over expression nodes.
//!
//! Each channel of a [`NodeMesh`](crate::NodeMesh) keeps an ordered list of
//! [`Operator`]s. Building the channel folds the list left to right over a seed:
//!
//! ```
//! use nodemesh::{Node, Operation, Operator, fold_operators};
//!
//! let chain = vec![
//!     Operator::new(Operation::Add, Node::float(2.0)),
//!     Operator::new(Operation::Mul, Node::float(3.0)),
//! ];
//! // ((1 + 2) * 3)
//! let alpha = fold_operators(Node::float(1.0), &chain);
//! ```
//!
//! There is no precedence: the chain is linear, so the fold order is the
//! evaluation order.

use crate::node::{ArithOp, ExpressionNode, LogicalNode, SideEffectNode};

/// How an operator combines its operand with the running value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Replace the running value with the operand.
    Assign,
    Add,
    Sub,
    Mul,
    Div,
}

impl Operation {
    fn arith(self) -> Option<ArithOp> {
        match self {
            Operation::Assign => None,
            Operation::Add => Some(ArithOp::Add),
            Operation::Sub => Some(ArithOp::Sub),
            Operation::Mul => Some(ArithOp::Mul),
            Operation::Div => Some(ArithOp::Div),
        }
    }
}

/// An operation paired with its right-hand operand.
#[derive(Clone, Debug, PartialEq)]
pub struct Operator<N> {
    operation: Operation,
    operand: N,
}

impl<N: ExpressionNode> Operator<N> {
    pub fn new(operation: Operation, operand: N) -> Self {
        Self { operation, operand }
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn operand(&self) -> &N {
        &self.operand
    }

    /// Applies this operator to `seed`.
    ///
    /// `Assign` discards the seed. The arithmetic operations keep the seed on the
    /// left, so `Sub` yields `seed - operand`.
    pub fn operate(&self, seed: N) -> N {
        match self.operation.arith() {
            None => self.operand.clone(),
            Some(op) => seed.combine(op, &self.operand),
        }
    }
}

/// Left fold of `operators` over `seed` in insertion order.
pub fn fold_operators<N: ExpressionNode>(seed: N, operators: &[Operator<N>]) -> N {
    operators.iter().fold(seed, |acc, op| op.operate(acc))
}

/// AND-folds `masks` onto `seed`.
pub fn fold_conjunction<N: LogicalNode>(seed: N, masks: &[N]) -> N {
    masks.iter().fold(seed, |acc, mask| acc.and(mask))
}

/// Wraps `value` in each effect in turn. Later effects wrap earlier ones, and
/// the result still evaluates to `value`.
pub fn wrap_effects<N: SideEffectNode>(value: N, effects: &[N]) -> N {
    effects.iter().fold(value, |acc, effect| acc.bypass(effect))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A node that is just its scalar value.
    #[derive(Clone, Copy, Debug, PartialEq)]
    struct Scalar(f64);

    impl ExpressionNode for Scalar {
        fn combine(&self, op: ArithOp, rhs: &Self) -> Self {
            Scalar(match op {
                ArithOp::Add => self.0 + rhs.0,
                ArithOp::Sub => self.0 - rhs.0,
                ArithOp::Mul => self.0 * rhs.0,
                ArithOp::Div => self.0 / rhs.0,
            })
        }
    }

    /// Records evaluation order as text.
    #[derive(Clone, Debug, PartialEq)]
    struct Trace(String);

    impl LogicalNode for Trace {
        fn and(&self, rhs: &Self) -> Self {
            Trace(format!("({} && {})", self.0, rhs.0))
        }
    }

    impl SideEffectNode for Trace {
        fn bypass(&self, effect: &Self) -> Self {
            Trace(format!("[{}; {}]", effect.0, self.0))
        }
    }

    fn op(operation: Operation, v: f64) -> Operator<Scalar> {
        Operator::new(operation, Scalar(v))
    }

    #[test]
    fn assign_discards_seed() {
        for seed in [-3.0, 0.0, 42.0] {
            let result = fold_operators(Scalar(seed), &[op(Operation::Assign, 7.0)]);
            assert_eq!(result, Scalar(7.0));
        }
    }

    #[test]
    fn last_assign_wins() {
        let chain = [
            op(Operation::Assign, 1.0),
            op(Operation::Add, 5.0),
            op(Operation::Assign, 2.0),
        ];
        assert_eq!(fold_operators(Scalar(9.0), &chain), Scalar(2.0));
    }

    #[test]
    fn add_then_mul_is_left_to_right() {
        let chain = [op(Operation::Add, 2.0), op(Operation::Mul, 3.0)];
        assert_eq!(fold_operators(Scalar(1.0), &chain), Scalar(9.0));

        let reversed = [op(Operation::Mul, 3.0), op(Operation::Add, 2.0)];
        assert_eq!(fold_operators(Scalar(1.0), &reversed), Scalar(5.0));
    }

    #[test]
    fn seed_is_left_operand() {
        assert_eq!(op(Operation::Sub, 3.0).operate(Scalar(10.0)), Scalar(7.0));
        assert_eq!(op(Operation::Div, 4.0).operate(Scalar(10.0)), Scalar(2.5));
    }

    #[test]
    fn empty_chain_returns_seed() {
        assert_eq!(fold_operators(Scalar(4.0), &[]), Scalar(4.0));
    }

    #[test]
    fn conjunction_folds_in_order() {
        let masks = [Trace("a".into()), Trace("b".into())];
        let result = fold_conjunction(Trace("true".into()), &masks);
        assert_eq!(result.0, "((true && a) && b)");
    }

    #[test]
    fn effects_nest_around_value() {
        let effects = [Trace("e1".into()), Trace("e2".into())];
        let result = wrap_effects(Trace("pos".into()), &effects);
        assert_eq!(result.0, "[e2; [e1; pos]]");
    }
}
