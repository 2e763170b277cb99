use codlua_bytecode::constant::Constant;
use codlua_bytecode::instruction::{ConstIdx, Op, Reg};

use codlua_hir::arena::ExprId;
use codlua_hir::expr::HirExpr;
use codlua_hir::stmt::{HirStmt, LValue};
use codlua_hir::types::{BinOp, UnOp};

use super::PendingSelf;
use crate::CfgError;

impl<'a> super::Lifter<'a> {
    /// Lift a single non-terminating instruction into block statements.
    pub(super) fn lift_instruction(&mut self, op: &Op, pc: usize) -> Result<(), CfgError> {
        match *op {
            Op::Nop | Op::Close { .. } => {}

            Op::Move { dst, src } => {
                let value = self.read_reg(src.0, pc);
                self.emit_assign_reg(dst.0, pc, value);
            }

            Op::Load { dst, value } => {
                let value = self.lift_operand(value, pc)?;
                self.emit_assign_reg(dst.0, pc, value);
            }

            Op::LoadBool { dst, value, .. } => {
                let value = self.alloc_expr(HirExpr::Literal(Constant::Boolean(value)));
                self.emit_assign_reg(dst.0, pc, value);
            }

            Op::LoadNil { first, last } => {
                for r in first.0..=last.0 {
                    let nil = self.alloc_expr(HirExpr::Literal(Constant::Nil));
                    self.emit_assign_reg(r, pc, nil);
                }
            }

            Op::GetUpval { dst, upval } => {
                let value = self.alloc_expr(HirExpr::Upvalue(upval.0));
                self.emit_assign_reg(dst.0, pc, value);
            }

            Op::SetUpval { upval, value } => {
                let value = self.lift_operand(value, pc)?;
                self.emit_stmt(HirStmt::Assign {
                    target: LValue::Upvalue(upval.0),
                    value,
                });
            }

            Op::GetGlobal { dst, name } => {
                let name = self.constant_name(name, pc)?;
                let value = self.alloc_expr(HirExpr::Global(name));
                self.emit_assign_reg(dst.0, pc, value);
            }

            Op::SetGlobal { name, value } => {
                let name = self.constant_name(name, pc)?;
                let value = self.read_reg(value.0, pc);
                self.emit_stmt(HirStmt::Assign {
                    target: LValue::Global(name),
                    value,
                });
            }

            Op::GetIndex { dst, table, key } => {
                let table = self.read_reg(table.0, pc);
                let key = self.lift_operand(key, pc)?;
                let value = self.alloc_expr(HirExpr::Index { table, key });
                self.emit_assign_reg(dst.0, pc, value);
            }

            Op::SetIndex { table, key, value } => {
                let table = self.read_reg(table.0, pc);
                let key = self.lift_operand(key, pc)?;
                let value = self.lift_operand(value, pc)?;
                self.emit_stmt(HirStmt::Assign {
                    target: LValue::Index { table, key },
                    value,
                });
            }

            Op::NewTable { dst, template } => {
                let value = match template {
                    Some(k) => self.lift_table_template(k, pc)?,
                    None => self.alloc_expr(HirExpr::Table {
                        array: Vec::new(),
                        hash: Vec::new(),
                    }),
                };
                self.emit_assign_reg(dst.0, pc, value);
            }

            Op::SetList {
                table,
                first_value,
                count,
                first_index,
            } => {
                let values = self.read_range(first_value.0, count.map(|c| c as u8), pc);
                let table = self.reg_ref(table.0, pc);
                self.emit_stmt(HirStmt::SetList {
                    table,
                    first_index,
                    values,
                });
            }

            Op::SelfLookup {
                dst,
                object,
                method,
            } => {
                self.flush_pending_self();
                let table = self.read_reg(object.0, pc);
                let key = self.lift_operand(method, pc)?;
                let value = self.alloc_expr(HirExpr::Index { table, key });
                self.emit_assign_reg(dst.0, pc, value);
                self.pending_self = Some(PendingSelf {
                    dst: dst.0,
                    object: self.reg_ref(object.0, pc),
                });
            }

            Op::Arith { op, dst, lhs, rhs } => {
                let left = self.lift_operand(lhs, pc)?;
                let right = self.lift_operand(rhs, pc)?;
                let value = self.alloc_expr(HirExpr::Binary {
                    op: BinOp::from(op),
                    left,
                    right,
                });
                self.emit_assign_reg(dst.0, pc, value);
            }

            Op::Unary { op, dst, src } => {
                let operand = self.read_reg(src.0, pc);
                let value = self.alloc_expr(HirExpr::Unary {
                    op: UnOp::from(op),
                    operand,
                });
                self.emit_assign_reg(dst.0, pc, value);
            }

            Op::Concat { dst, first, last } => {
                let parts = (first.0..=last.0).map(|r| self.read_reg(r, pc)).collect();
                let value = self.alloc_expr(HirExpr::Concat(parts));
                self.emit_assign_reg(dst.0, pc, value);
            }

            Op::Call {
                func,
                first_arg,
                args,
                results,
            } => {
                let call = self.lift_call(func, first_arg, args, pc);
                self.assign_results(func.0, results, call, pc);
            }

            Op::Closure { dst, proto } => {
                if self.func.child(proto).is_none() {
                    return Err(CfgError::BadPrototype { pc, index: proto.0 });
                }
                let value = self.alloc_expr(HirExpr::Closure { proto });
                self.emit_assign_reg(dst.0, pc, value);
            }

            Op::VarArg { dst, count } => {
                let value = self.alloc_expr(HirExpr::VarArg);
                self.assign_results(dst.0, count, value, pc);
            }

            // Terminators are consumed in `lift_terminator` before reaching
            // here; a stray one means the block split was wrong.
            Op::Jump { .. }
            | Op::Compare { .. }
            | Op::Test { .. }
            | Op::Return { .. }
            | Op::TailCall { .. }
            | Op::ForNumPrep { .. }
            | Op::ForNumLoop { .. }
            | Op::ForGenCall { .. }
            | Op::ForGenLoop { .. } => return Err(CfgError::MalformedLoop { pc }),
        }
        Ok(())
    }

    /// Build the call expression, folding a preceding `SelfLookup` on the
    /// same register into a method call.
    pub(crate) fn lift_call(
        &mut self,
        func: Reg,
        first_arg: Reg,
        args: Option<u8>,
        pc: usize,
    ) -> ExprId {
        let pending = self.pending_self.take();
        let callee = self.read_reg(func.0, pc);
        match pending {
            Some(p) if p.dst == func.0 && first_arg.0 == func.0.wrapping_add(1) => {
                let rest = match args {
                    Some(n) => self.read_range(first_arg.0.wrapping_add(1), Some(n.saturating_sub(1)), pc),
                    None => self.read_range(first_arg.0.wrapping_add(1), None, pc),
                };
                self.alloc_expr(HirExpr::MethodCall { callee, args: rest })
            }
            other => {
                self.pending_self = other;
                self.flush_pending_self();
                let args = self.read_range(first_arg.0, args, pc);
                self.alloc_expr(HirExpr::Call { func: callee, args })
            }
        }
    }

    /// Write a producer's results into `base..`. `None` leaves an
    /// open-ended result recorded as the multi-value top.
    pub(crate) fn assign_results(&mut self, base: u8, results: Option<u8>, value: ExprId, pc: usize) {
        match results {
            Some(0) => {
                if matches!(
                    self.hir.exprs.get(value),
                    HirExpr::Call { .. } | HirExpr::MethodCall { .. }
                ) {
                    self.emit_stmt(HirStmt::ExprStmt(value));
                }
            }
            Some(1) => self.emit_assign_reg(base, pc, value),
            Some(n) => {
                let targets = (0..n)
                    .map(|i| self.reg_ref(base.wrapping_add(i), pc))
                    .collect();
                self.emit_stmt(HirStmt::MultiAssign { targets, value });
            }
            None => {
                self.emit_assign_reg(base, pc, value);
                self.top = Some(base);
            }
        }
    }

    /// A self lookup whose call never came: materialize the receiver copy.
    pub(crate) fn flush_pending_self(&mut self) {
        if let Some(p) = self.pending_self.take() {
            let value = self.alloc_expr(HirExpr::Register(p.object));
            let target = self.reg_ref(p.dst.wrapping_add(1), p.object.pc);
            self.emit_stmt(HirStmt::RegAssign { target, value });
        }
    }

    /// Expand a template table constant into a constructor expression.
    fn lift_table_template(&mut self, k: ConstIdx, pc: usize) -> Result<ExprId, CfgError> {
        let Constant::Table(template) = self.constant(k, pc)? else {
            return Err(CfgError::BadConstant { pc, index: k.0 });
        };

        let mut array = Vec::new();
        let mut hash = Vec::new();
        for (i, item) in template.array.iter().enumerate() {
            if i == 0 {
                // t[0] only exists when the source wrote it explicitly.
                if *item != Constant::Nil {
                    let key = self.alloc_expr(HirExpr::Literal(Constant::Integer(0)));
                    let value = self.alloc_expr(HirExpr::Literal(item.clone()));
                    hash.push((key, value));
                }
                continue;
            }
            array.push(self.alloc_expr(HirExpr::Literal(item.clone())));
        }
        for (key, value) in &template.hash {
            let key = self.alloc_expr(HirExpr::Literal(key.clone()));
            let value = self.alloc_expr(HirExpr::Literal(value.clone()));
            hash.push((key, value));
        }
        Ok(self.alloc_expr(HirExpr::Table { array, hash }))
    }
}
