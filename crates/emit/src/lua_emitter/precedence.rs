use codlua_hir::types::BinOp;

/// Operator precedence levels of Lua 5.1 (higher = binds tighter).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(super) struct Precedence(pub(super) u8);

impl Precedence {
    pub(super) const LOWEST: Self = Precedence(0);
    pub(super) const OR: Self = Precedence(1);
    pub(super) const AND: Self = Precedence(2);
    pub(super) const COMPARE: Self = Precedence(3);
    pub(super) const CONCAT: Self = Precedence(4);
    pub(super) const ADD: Self = Precedence(5);
    pub(super) const MUL: Self = Precedence(6);
    pub(super) const UNARY: Self = Precedence(7);
    pub(super) const POW: Self = Precedence(8);

    pub(super) const ATOM: Self = Precedence(20);
}

pub(super) fn binop_precedence(op: BinOp) -> Precedence {
    match op {
        BinOp::Or => Precedence::OR,
        BinOp::And => Precedence::AND,
        BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            Precedence::COMPARE
        }
        BinOp::Concat => Precedence::CONCAT,
        BinOp::Add | BinOp::Sub => Precedence::ADD,
        BinOp::Mul | BinOp::Div | BinOp::Mod => Precedence::MUL,
        BinOp::Pow => Precedence::POW,
    }
}

/// `..` and `^` associate to the right.
pub(super) fn is_right_assoc(op: BinOp) -> bool {
    matches!(op, BinOp::Concat | BinOp::Pow)
}

pub(super) fn binop_str(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
        BinOp::Mod => "%",
        BinOp::Pow => "^",
        BinOp::Concat => "..",
        BinOp::Eq => "==",
        BinOp::Ne => "~=",
        BinOp::Lt => "<",
        BinOp::Le => "<=",
        BinOp::Gt => ">",
        BinOp::Ge => ">=",
        BinOp::And => "and",
        BinOp::Or => "or",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_follow_the_reference_manual() {
        assert!(binop_precedence(BinOp::Or) < binop_precedence(BinOp::And));
        assert!(binop_precedence(BinOp::And) < binop_precedence(BinOp::Lt));
        assert!(binop_precedence(BinOp::Lt) < binop_precedence(BinOp::Concat));
        assert!(binop_precedence(BinOp::Concat) < binop_precedence(BinOp::Add));
        assert!(binop_precedence(BinOp::Add) < binop_precedence(BinOp::Mod));
        assert!(binop_precedence(BinOp::Mod) < Precedence::UNARY);
        assert!(Precedence::UNARY < binop_precedence(BinOp::Pow));
        assert!(is_right_assoc(BinOp::Pow) && !is_right_assoc(BinOp::Sub));
    }
}
