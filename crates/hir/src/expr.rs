use codlua_bytecode::constant::Constant;
use codlua_bytecode::instruction::{ConstIdx, ProtoIdx};

use crate::arena::ExprId;
use crate::types::{BinOp, UnOp};
use crate::var::RegRef;

/// An expression node. Children are arena ids.
#[derive(Debug, Clone, PartialEq)]
pub enum HirExpr {
    /// A slot of the function's constant table.
    ConstantRef(ConstIdx),
    /// An immediate value; also used for expanded table templates.
    Literal(Constant),
    /// A register read.
    Register(RegRef),
    Upvalue(u16),
    Global(String),
    /// `table[key]`; the emitter prints `table.key` for identifier keys.
    Index {
        table: ExprId,
        key: ExprId,
    },
    Binary {
        op: BinOp,
        left: ExprId,
        right: ExprId,
    },
    Unary {
        op: UnOp,
        operand: ExprId,
    },
    Call {
        func: ExprId,
        args: Vec<ExprId>,
    },
    /// `obj:name(args)`. `callee` is the `obj.name` lookup; `args` excludes
    /// the implicit receiver.
    MethodCall {
        callee: ExprId,
        args: Vec<ExprId>,
    },
    /// `{ a, b, [k] = v }`
    Table {
        array: Vec<ExprId>,
        hash: Vec<(ExprId, ExprId)>,
    },
    /// A nested function, by index into the owner's children.
    Closure {
        proto: ProtoIdx,
    },
    VarArg,
    /// `a .. b .. c`, from a single register-range concat.
    Concat(Vec<ExprId>),
    /// `(e)`: truncates a multi-value expression to one value.
    Paren(ExprId),
}

impl HirExpr {
    /// Direct children in evaluation order.
    pub fn children(&self) -> Vec<ExprId> {
        match self {
            HirExpr::ConstantRef(_)
            | HirExpr::Literal(_)
            | HirExpr::Register(_)
            | HirExpr::Upvalue(_)
            | HirExpr::Global(_)
            | HirExpr::Closure { .. }
            | HirExpr::VarArg => Vec::new(),
            HirExpr::Index { table, key } => vec![*table, *key],
            HirExpr::Binary { left, right, .. } => vec![*left, *right],
            HirExpr::Unary { operand, .. } | HirExpr::Paren(operand) => vec![*operand],
            HirExpr::Call { func, args } => {
                let mut out = vec![*func];
                out.extend(args.iter().copied());
                out
            }
            HirExpr::MethodCall { callee, args } => {
                let mut out = vec![*callee];
                out.extend(args.iter().copied());
                out
            }
            HirExpr::Table { array, hash } => {
                let mut out = array.clone();
                for (k, v) in hash {
                    out.push(*k);
                    out.push(*v);
                }
                out
            }
            HirExpr::Concat(parts) => parts.clone(),
        }
    }

    /// True for expressions that can yield several values in a list tail.
    pub fn is_multi_value(&self) -> bool {
        matches!(
            self,
            HirExpr::Call { .. } | HirExpr::MethodCall { .. } | HirExpr::VarArg
        )
    }

    pub fn as_register(&self) -> Option<RegRef> {
        match self {
            HirExpr::Register(r) => Some(*r),
            _ => None,
        }
    }
}
