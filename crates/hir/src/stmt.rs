use crate::arena::{ExprArena, ExprId};
use crate::var::RegRef;

/// A flat statement inside a basic block.
///
/// Control flow lives in block terminators and, after structuring, in
/// `ControlNode`; statements never nest.
#[derive(Debug, Clone, PartialEq)]
pub enum HirStmt {
    /// `r = value`
    RegAssign { target: RegRef, value: ExprId },
    /// `r1, r2, ... = value` for a multi-result call or vararg.
    MultiAssign { targets: Vec<RegRef>, value: ExprId },
    /// Store into a global, upvalue or table slot.
    Assign { target: LValue, value: ExprId },
    /// An expression evaluated for its effects (a call).
    ExprStmt(ExprId),
    /// `table[first_index + i] = values[i]` from a batched list store.
    SetList {
        table: RegRef,
        first_index: u32,
        values: Vec<ExprId>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum LValue {
    Global(String),
    Upvalue(u16),
    Index { table: ExprId, key: ExprId },
}

impl HirStmt {
    /// Registers written by this statement.
    pub fn defined_registers(&self) -> Vec<RegRef> {
        match self {
            HirStmt::RegAssign { target, .. } => vec![*target],
            HirStmt::MultiAssign { targets, .. } => targets.clone(),
            _ => Vec::new(),
        }
    }

    /// Root expressions read by this statement, in evaluation order.
    pub fn expr_roots(&self) -> Vec<ExprId> {
        match self {
            HirStmt::RegAssign { value, .. } | HirStmt::MultiAssign { value, .. } => {
                vec![*value]
            }
            HirStmt::Assign { target, value } => match target {
                LValue::Index { table, key } => vec![*table, *key, *value],
                LValue::Global(_) | LValue::Upvalue(_) => vec![*value],
            },
            HirStmt::ExprStmt(e) => vec![*e],
            HirStmt::SetList { values, .. } => values.clone(),
        }
    }

    /// Registers read by `SetList` outside its expression roots.
    pub fn implicit_reads(&self) -> Option<RegRef> {
        match self {
            HirStmt::SetList { table, .. } => Some(*table),
            _ => None,
        }
    }

    /// True if running this statement can be observed outside the
    /// registers it defines.
    pub fn has_side_effects(&self, arena: &ExprArena) -> bool {
        match self {
            HirStmt::Assign { .. } | HirStmt::SetList { .. } | HirStmt::ExprStmt(_) => true,
            HirStmt::RegAssign { value, .. } | HirStmt::MultiAssign { value, .. } => {
                arena.contains_call(*value)
            }
        }
    }
}
