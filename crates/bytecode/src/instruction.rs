//! Dialect-independent instruction model.
//!
//! Every reader lowers its native encoding into [`Op`]. Register, constant,
//! upvalue and prototype operands are distinct newtypes so a stage can never
//! confuse a register slot with a constant index.

/// A register slot in the function's frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Reg(pub u8);

impl Reg {
    /// The register `n` slots above this one.
    pub fn offset(self, n: u8) -> Reg {
        Reg(self.0.wrapping_add(n))
    }
}

/// Index into the owning function's constant table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConstIdx(pub u32);

/// Index into the function's upvalue list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UpvalIdx(pub u16);

/// Index into the owning function's `children`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProtoIdx(pub u32);

/// Absolute jump target. Signed so that corrupt offsets pointing before the
/// first instruction survive decoding and are rejected by the CFG builder.
pub type Target = i64;

/// Immediate operand values encoded directly in an instruction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Literal {
    Nil,
    Bool(bool),
    Int(i64),
}

/// A value-producing operand: register, constant, or immediate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operand {
    Reg(Reg),
    Const(ConstIdx),
    Lit(Literal),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
    Len,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Lt,
    Le,
}

/// A decoded instruction.
///
/// Conditional tests (`Compare`, `Test`) are always followed by a `Jump`;
/// that jump is taken iff the test evaluates to `jump_when`, otherwise it is
/// skipped. Counts given as `None` mean "up to the top of the stack" (multret).
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    /// dst = src
    Move { dst: Reg, src: Reg },
    /// dst = value
    Load { dst: Reg, value: Operand },
    /// dst = value; if skip_next, pc += 1
    LoadBool { dst: Reg, value: bool, skip_next: bool },
    /// first..=last = nil
    LoadNil { first: Reg, last: Reg },
    /// dst = upvalues[upval]
    GetUpval { dst: Reg, upval: UpvalIdx },
    /// upvalues[upval] = value
    SetUpval { upval: UpvalIdx, value: Operand },
    /// dst = _G[constants[name]]
    GetGlobal { dst: Reg, name: ConstIdx },
    /// _G[constants[name]] = value
    SetGlobal { name: ConstIdx, value: Reg },
    /// dst = table[key]
    GetIndex { dst: Reg, table: Reg, key: Operand },
    /// table[key] = value
    SetIndex { table: Reg, key: Operand, value: Operand },
    /// dst = {} or a copy of a template table constant
    NewTable { dst: Reg, template: Option<ConstIdx> },
    /// table[first_index + i] = first_value + i
    SetList { table: Reg, first_value: Reg, count: Option<u16>, first_index: u32 },
    /// dst + 1 = object; dst = object[method]
    SelfLookup { dst: Reg, object: Reg, method: Operand },
    /// dst = lhs op rhs
    Arith { op: ArithOp, dst: Reg, lhs: Operand, rhs: Operand },
    /// dst = op src
    Unary { op: UnaryOp, dst: Reg, src: Reg },
    /// dst = first .. ... .. last
    Concat { dst: Reg, first: Reg, last: Reg },
    /// pc = target
    Jump { target: Target },
    /// next jump taken iff (lhs op rhs) == jump_when
    Compare { op: CmpOp, lhs: Operand, rhs: Operand, jump_when: bool },
    /// next jump taken iff truthy(value) == jump_when; on the taken path
    /// `copy_to` receives `value`
    Test { value: Reg, copy_to: Option<Reg>, jump_when: bool },
    /// func .. func+results-1 = func(first_arg .. first_arg+args-1)
    Call { func: Reg, first_arg: Reg, args: Option<u8>, results: Option<u8> },
    /// return func(first_arg ..)
    TailCall { func: Reg, first_arg: Reg, args: Option<u8> },
    /// return first .. first+count-1
    Return { first: Reg, count: Option<u8> },
    /// Numeric loop setup; `loop_pc` is the matching `ForNumLoop`.
    /// Layout: base = index, base+1 = limit, base+2 = step, base+3 = visible var.
    ForNumPrep { base: Reg, loop_pc: Target },
    /// Numeric loop step; jumps back to `body` while the loop continues.
    ForNumLoop { base: Reg, body: Target },
    /// Generic loop iterator call: base+3 .. base+2+vars = base(base+1, base+2)
    ForGenCall { base: Reg, vars: u8 },
    /// Generic loop test; jumps back to `body` while base+3 is non-nil.
    ForGenLoop { base: Reg, body: Target },
    /// dst = closure over children[proto]
    Closure { dst: Reg, proto: ProtoIdx },
    /// dst .. dst+count-1 = ...
    VarArg { dst: Reg, count: Option<u8> },
    /// close upvalues >= from
    Close { from: Reg },
    /// Placeholder for slots whose meaning is carried by a neighbour
    /// (closure capture pseudo-ops, SETLIST extension words, JIT hints).
    Nop,
}

impl Op {
    /// All explicit jump targets of this instruction.
    pub fn jump_targets(&self) -> Vec<Target> {
        match *self {
            Op::Jump { target } => vec![target],
            Op::ForNumPrep { loop_pc, .. } => vec![loop_pc],
            Op::ForNumLoop { body, .. } | Op::ForGenLoop { body, .. } => vec![body],
            _ => Vec::new(),
        }
    }

    /// True for instructions that only set up the following jump.
    pub fn is_conditional_test(&self) -> bool {
        matches!(self, Op::Compare { .. } | Op::Test { .. })
    }

    /// True if control never falls through to pc + 1.
    pub fn ends_flow(&self) -> bool {
        matches!(
            self,
            Op::Jump { .. } | Op::Return { .. } | Op::TailCall { .. } | Op::ForNumPrep { .. }
        )
    }
}

/// Compute an absolute target from a pc and a relative offset.
pub(crate) fn relative_target(pc: usize, offset: i64) -> Target {
    pc as i64 + 1 + offset
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jump_targets_cover_loops() {
        let prep = Op::ForNumPrep {
            base: Reg(0),
            loop_pc: 5,
        };
        assert_eq!(prep.jump_targets(), vec![5]);
        assert!(prep.ends_flow());

        let back = Op::ForGenLoop {
            base: Reg(0),
            body: 2,
        };
        assert_eq!(back.jump_targets(), vec![2]);
        assert!(!back.ends_flow());
    }

    #[test]
    fn relative_targets_can_go_negative() {
        assert_eq!(relative_target(0, -3), -2);
        assert_eq!(relative_target(4, 2), 7);
    }
}
