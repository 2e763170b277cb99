use codlua_bytecode::instruction::{ArithOp, CmpOp, UnaryOp};

/// Binary operators of the Lua 5.1 surface language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinOp {
    /// The comparison that holds exactly when `self` does not.
    pub fn negated_comparison(self) -> Option<BinOp> {
        Some(match self {
            BinOp::Eq => BinOp::Ne,
            BinOp::Ne => BinOp::Eq,
            BinOp::Lt => BinOp::Ge,
            BinOp::Ge => BinOp::Lt,
            BinOp::Le => BinOp::Gt,
            BinOp::Gt => BinOp::Le,
            _ => return None,
        })
    }

    pub fn is_comparison(self) -> bool {
        self.negated_comparison().is_some()
    }

    /// The comparison with operands swapped: `a < b` is `b > a`.
    pub fn mirrored(self) -> BinOp {
        match self {
            BinOp::Lt => BinOp::Gt,
            BinOp::Gt => BinOp::Lt,
            BinOp::Le => BinOp::Ge,
            BinOp::Ge => BinOp::Le,
            other => other,
        }
    }

    pub fn from_cmp(op: CmpOp) -> BinOp {
        match op {
            CmpOp::Eq => BinOp::Eq,
            CmpOp::Lt => BinOp::Lt,
            CmpOp::Le => BinOp::Le,
        }
    }
}

impl From<ArithOp> for BinOp {
    fn from(op: ArithOp) -> Self {
        match op {
            ArithOp::Add => BinOp::Add,
            ArithOp::Sub => BinOp::Sub,
            ArithOp::Mul => BinOp::Mul,
            ArithOp::Div => BinOp::Div,
            ArithOp::Mod => BinOp::Mod,
            ArithOp::Pow => BinOp::Pow,
        }
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnOp {
    Not,
    Neg,
    Len,
}

impl From<UnaryOp> for UnOp {
    fn from(op: UnaryOp) -> Self {
        match op {
            UnaryOp::Neg => UnOp::Neg,
            UnaryOp::Not => UnOp::Not,
            UnaryOp::Len => UnOp::Len,
        }
    }
}
