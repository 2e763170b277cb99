use codlua_bytecode::constant::Constant;

use crate::expr::HirExpr;
use crate::types::{BinOp, UnOp};

/// Opaque expression identifier. Index into ExprArena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExprId(pub u32);

/// Flat arena storing all expressions in a function.
///
/// Expressions reference each other by ExprId, not by nesting, so inlining a
/// register definition is a single slot overwrite.
#[derive(Debug, Clone, Default)]
pub struct ExprArena {
    exprs: Vec<HirExpr>,
}

impl ExprArena {
    pub fn new() -> Self {
        Self { exprs: Vec::new() }
    }

    /// Allocate a new expression, returns its id.
    pub fn alloc(&mut self, expr: HirExpr) -> ExprId {
        let id = ExprId(self.exprs.len() as u32);
        self.exprs.push(expr);
        id
    }

    pub fn get(&self, id: ExprId) -> &HirExpr {
        &self.exprs[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: ExprId) -> &mut HirExpr {
        &mut self.exprs[id.0 as usize]
    }

    /// Replace an expression in-place.
    pub fn replace(&mut self, id: ExprId, expr: HirExpr) {
        self.exprs[id.0 as usize] = expr;
    }

    /// Overwrite `slot` with a copy of `source`. Children stay shared.
    pub fn copy_into(&mut self, slot: ExprId, source: ExprId) {
        let expr = self.get(source).clone();
        self.replace(slot, expr);
    }

    pub fn len(&self) -> usize {
        self.exprs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exprs.is_empty()
    }

    /// Every allocated id, including orphaned ones.
    pub fn ids(&self) -> impl Iterator<Item = ExprId> {
        (0..self.exprs.len() as u32).map(ExprId)
    }

    /// Every `Register` node reachable from `root`, in evaluation order.
    pub fn register_reads(&self, root: ExprId, out: &mut Vec<ExprId>) {
        match self.get(root) {
            HirExpr::Register(_) => out.push(root),
            other => {
                for child in other.children() {
                    self.register_reads(child, out);
                }
            }
        }
    }

    /// True if evaluating `root` may call into user code.
    pub fn contains_call(&self, root: ExprId) -> bool {
        let expr = self.get(root);
        matches!(expr, HirExpr::Call { .. } | HirExpr::MethodCall { .. })
            || expr.children().into_iter().any(|c| self.contains_call(c))
    }

    /// True if `root` reads nothing that a side effect could change.
    pub fn is_pure(&self, root: ExprId) -> bool {
        match self.get(root) {
            HirExpr::ConstantRef(_)
            | HirExpr::Literal(_)
            | HirExpr::Register(_)
            | HirExpr::Closure { .. }
            | HirExpr::VarArg => true,
            HirExpr::Binary { left, right, .. } => self.is_pure(*left) && self.is_pure(*right),
            HirExpr::Unary { operand, .. } | HirExpr::Paren(operand) => self.is_pure(*operand),
            HirExpr::Concat(parts) => parts.iter().all(|p| self.is_pure(*p)),
            HirExpr::Table { array, hash } => {
                array.iter().all(|e| self.is_pure(*e))
                    && hash.iter().all(|(k, v)| self.is_pure(*k) && self.is_pure(*v))
            }
            HirExpr::Upvalue(_)
            | HirExpr::Global(_)
            | HirExpr::Index { .. }
            | HirExpr::Call { .. }
            | HirExpr::MethodCall { .. } => false,
        }
    }

    /// Build the logical negation of a condition.
    ///
    /// Comparisons flip their operator (`<` becomes `>=`), `not x` unwraps,
    /// and `and`/`or` follow De Morgan. The comparison flip is exact for
    /// everything except NaN operands.
    pub fn negate_condition(&mut self, condition: ExprId) -> ExprId {
        match self.get(condition).clone() {
            HirExpr::Unary {
                op: UnOp::Not,
                operand,
            } => operand,
            HirExpr::Binary { op, left, right } => {
                if let Some(flipped) = op.negated_comparison() {
                    return self.alloc(HirExpr::Binary {
                        op: flipped,
                        left,
                        right,
                    });
                }
                match op {
                    BinOp::And | BinOp::Or => {
                        let left = self.negate_condition(left);
                        let right = self.negate_condition(right);
                        let op = if op == BinOp::And { BinOp::Or } else { BinOp::And };
                        self.alloc(HirExpr::Binary { op, left, right })
                    }
                    _ => self.alloc(HirExpr::Unary {
                        op: UnOp::Not,
                        operand: condition,
                    }),
                }
            }
            HirExpr::Literal(Constant::Boolean(b)) => {
                self.alloc(HirExpr::Literal(Constant::Boolean(!b)))
            }
            _ => self.alloc(HirExpr::Unary {
                op: UnOp::Not,
                operand: condition,
            }),
        }
    }

    /// Structural equality of two expression trees.
    pub fn same_tree(&self, a: ExprId, b: ExprId) -> bool {
        if a == b {
            return true;
        }
        match (self.get(a), self.get(b)) {
            (HirExpr::Register(x), HirExpr::Register(y)) => x.register == y.register,
            (HirExpr::Upvalue(x), HirExpr::Upvalue(y)) => x == y,
            (HirExpr::Global(x), HirExpr::Global(y)) => x == y,
            (HirExpr::ConstantRef(x), HirExpr::ConstantRef(y)) => x == y,
            (HirExpr::Literal(x), HirExpr::Literal(y)) => x == y,
            (
                HirExpr::Index { table: t1, key: k1 },
                HirExpr::Index { table: t2, key: k2 },
            ) => self.same_tree(*t1, *t2) && self.same_tree(*k1, *k2),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::var::RegRef;

    fn reg(arena: &mut ExprArena, r: u8) -> ExprId {
        arena.alloc(HirExpr::Register(RegRef::new(r, 0)))
    }

    #[test]
    fn negation_flips_comparisons() {
        let mut arena = ExprArena::new();
        let a = reg(&mut arena, 0);
        let b = reg(&mut arena, 1);
        let lt = arena.alloc(HirExpr::Binary {
            op: BinOp::Lt,
            left: a,
            right: b,
        });
        let neg = arena.negate_condition(lt);
        assert!(matches!(
            arena.get(neg),
            HirExpr::Binary { op: BinOp::Ge, .. }
        ));
    }

    #[test]
    fn negation_unwraps_not() {
        let mut arena = ExprArena::new();
        let a = reg(&mut arena, 0);
        let not_a = arena.alloc(HirExpr::Unary {
            op: UnOp::Not,
            operand: a,
        });
        assert_eq!(arena.negate_condition(not_a), a);
        let neg = arena.negate_condition(a);
        assert!(matches!(arena.get(neg), HirExpr::Unary { op: UnOp::Not, operand } if *operand == a));
    }

    #[test]
    fn register_reads_follow_evaluation_order() {
        let mut arena = ExprArena::new();
        let f = reg(&mut arena, 0);
        let x = reg(&mut arena, 1);
        let y = reg(&mut arena, 2);
        let call = arena.alloc(HirExpr::Call {
            func: f,
            args: vec![x, y],
        });
        let mut reads = Vec::new();
        arena.register_reads(call, &mut reads);
        assert_eq!(reads, vec![f, x, y]);
        assert!(arena.contains_call(call));
        assert!(!arena.is_pure(call));
        assert!(arena.is_pure(x));
    }
}
