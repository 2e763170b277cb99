use codlua_bytecode::instruction::{Op, Reg};

use codlua_hir::arena::ExprId;
use codlua_hir::cfg::{HirEdge, Terminator};
use codlua_hir::expr::HirExpr;
use codlua_hir::types::{BinOp, UnOp};

use crate::block_discovery::checked_target;
use crate::CfgError;

impl<'a> super::Lifter<'a> {
    /// Lift `op` if it ends the current block. Returns `true` when it did.
    pub(super) fn lift_terminator(&mut self, op: &Op, pc: usize, end_pc: usize) -> Result<bool, CfgError> {
        let len = self.func.instructions.len();
        match *op {
            Op::Compare { .. } | Op::Test { .. } => {
                let condition = self.lift_condition(op, pc)?;
                // The jump normally shares this block; when another branch
                // targets it, the taken path goes through its block instead.
                let taken = if pc + 1 < end_pc {
                    match self.func.instructions[pc + 1] {
                        Op::Jump { target } => checked_target(pc + 1, target, len)?,
                        _ => return Err(CfgError::MissingBranchJump { pc }),
                    }
                } else {
                    pc + 1
                };
                self.flush_pending_self();
                self.set_terminator(Terminator::Branch { condition });
                self.add_edge_to(pc + 2, HirEdge::then_edge());
                self.add_edge_to(taken, HirEdge::else_edge());
                Ok(true)
            }

            Op::Jump { target } => {
                let target = checked_target(pc, target, len)?;
                self.flush_pending_self();
                let terminator = match self.generic_loop_at(target) {
                    Some(base) if self.is_generic_prep(pc, target) => {
                        let iterators = (0..3).map(|i| self.read_reg(base.wrapping_add(i), pc)).collect();
                        Terminator::ForGenPrep { base, iterators }
                    }
                    _ => Terminator::Jump,
                };
                self.set_terminator(terminator);
                self.add_edge_to(target, HirEdge::unconditional());
                Ok(true)
            }

            Op::LoadBool {
                skip_next: true, ..
            } => {
                self.lift_instruction(op, pc)?;
                self.flush_pending_self();
                self.set_terminator(Terminator::Jump);
                self.add_edge_to(pc + 2, HirEdge::unconditional());
                Ok(true)
            }

            Op::Return { first, count } => {
                self.flush_pending_self();
                let values = self.read_range(first.0, count, pc);
                self.set_terminator(Terminator::Return(values));
                Ok(true)
            }

            Op::TailCall {
                func,
                first_arg,
                args,
            } => {
                let call = self.lift_call(func, first_arg, args, pc);
                self.set_terminator(Terminator::Return(vec![call]));
                Ok(true)
            }

            Op::ForNumPrep { base, loop_pc } => {
                let loop_pc = checked_target(pc, loop_pc, len)?;
                self.flush_pending_self();
                let [start, limit, step] = self.read_triple(base, pc);
                self.set_terminator(Terminator::ForNumPrep {
                    base: base.0,
                    loop_pc,
                    start,
                    limit,
                    step,
                });
                self.add_edge_to(pc + 1, HirEdge::unconditional());
                self.add_edge_to(loop_pc + 1, HirEdge::loop_exit());
                Ok(true)
            }

            Op::ForNumLoop { base, body } => {
                let body = checked_target(pc, body, len)?;
                self.set_terminator(Terminator::ForNumBack { base: base.0 });
                self.add_edge_to(body, HirEdge::loop_back());
                self.add_edge_to(pc + 1, HirEdge::loop_exit());
                Ok(true)
            }

            Op::ForGenCall { base, vars } => {
                let Some(Op::ForGenLoop { body, .. }) = self.func.instructions.get(pc + 1) else {
                    return Err(CfgError::MalformedLoop { pc });
                };
                let body = checked_target(pc + 1, *body, len)?;
                self.set_terminator(Terminator::ForGenBack {
                    base: base.0,
                    var_count: vars,
                });
                self.add_edge_to(body, HirEdge::loop_back());
                self.add_edge_to(pc + 2, HirEdge::loop_exit());
                Ok(true)
            }

            Op::ForGenLoop { .. } => Err(CfgError::MalformedLoop { pc }),

            _ => Ok(false),
        }
    }

    /// Condition under which a test falls through (skips its jump).
    fn lift_condition(&mut self, op: &Op, pc: usize) -> Result<ExprId, CfgError> {
        match *op {
            Op::Compare {
                op: cmp,
                lhs,
                rhs,
                jump_when,
            } => {
                let left = self.lift_operand(lhs, pc)?;
                let right = self.lift_operand(rhs, pc)?;
                let plain = BinOp::from_cmp(cmp);
                let op = if jump_when {
                    plain.negated_comparison().unwrap_or(plain)
                } else {
                    plain
                };
                Ok(self.alloc_expr(HirExpr::Binary { op, left, right }))
            }
            Op::Test {
                value,
                copy_to,
                jump_when,
            } => {
                let tested = match copy_to {
                    // Hoisted ahead of the branch: the skip path always
                    // overwrites `dst` before reading it.
                    Some(dst) if dst != value => {
                        let src = self.read_reg(value.0, pc);
                        self.emit_assign_reg(dst.0, pc, src);
                        dst
                    }
                    _ => value,
                };
                let operand = self.read_reg(tested.0, pc);
                if jump_when {
                    Ok(self.alloc_expr(HirExpr::Unary {
                        op: UnOp::Not,
                        operand,
                    }))
                } else {
                    Ok(operand)
                }
            }
            _ => Err(CfgError::MissingBranchJump { pc }),
        }
    }

    fn set_terminator(&mut self, terminator: Terminator) {
        self.hir.cfg[self.current_block].terminator = terminator;
    }

    fn read_triple(&mut self, base: Reg, pc: usize) -> [ExprId; 3] {
        [
            self.read_reg(base.0, pc),
            self.read_reg(base.0.wrapping_add(1), pc),
            self.read_reg(base.0.wrapping_add(2), pc),
        ]
    }

    /// Base register of the generic-for call at `pc`, if there is one.
    fn generic_loop_at(&self, pc: usize) -> Option<u8> {
        match self.func.instructions.get(pc) {
            Some(Op::ForGenCall { base, .. }) => Some(base.0),
            _ => None,
        }
    }

    /// A jump is a generic-for setup when the loop it enters resumes its
    /// body right after the jump.
    fn is_generic_prep(&self, pc: usize, call_pc: usize) -> bool {
        call_pc > pc
            && self.is_instruction(call_pc + 1, |op| {
                matches!(op, Op::ForGenLoop { body, .. } if *body == pc as i64 + 1)
            })
    }
}
