use codlua_bytecode::constant::Constant;
use codlua_bytecode::instruction::{ConstIdx, Literal, Operand};

use codlua_hir::arena::ExprId;
use codlua_hir::expr::HirExpr;

use crate::CfgError;

impl<'a> super::Lifter<'a> {
    /// Lift an operand read at `pc`.
    pub(crate) fn lift_operand(&mut self, operand: Operand, pc: usize) -> Result<ExprId, CfgError> {
        let expr = match operand {
            Operand::Reg(r) => HirExpr::Register(self.reg_ref(r.0, pc)),
            Operand::Const(k) => {
                self.constant(k, pc)?;
                HirExpr::ConstantRef(k)
            }
            Operand::Lit(lit) => HirExpr::Literal(literal_constant(lit)),
        };
        Ok(self.alloc_expr(expr))
    }

    pub(crate) fn constant(&self, k: ConstIdx, pc: usize) -> Result<&'a Constant, CfgError> {
        self.func
            .constant(k)
            .ok_or(CfgError::BadConstant { pc, index: k.0 })
    }

    /// The name stored in a string constant, for global accesses.
    pub(crate) fn constant_name(&self, k: ConstIdx, pc: usize) -> Result<String, CfgError> {
        self.constant(k, pc)?
            .to_string_lossy()
            .ok_or(CfgError::BadConstant { pc, index: k.0 })
    }

    /// Read `count` consecutive registers, or up to the pending multi-value
    /// top when `count` is `None`.
    pub(crate) fn read_range(&mut self, first: u8, count: Option<u8>, pc: usize) -> Vec<ExprId> {
        match count {
            Some(n) => (0..n)
                .map(|i| self.read_reg(first.wrapping_add(i), pc))
                .collect(),
            None => self.collect_multret_args(first, pc),
        }
    }

    /// Collect arguments for an open-ended consumer.
    ///
    /// The fixed registers from `from_reg` run up to the register where the
    /// previous multi-value producer placed its result; that register is read
    /// last so inlining can splice the producer into the tail position.
    pub(crate) fn collect_multret_args(&mut self, from_reg: u8, pc: usize) -> Vec<ExprId> {
        match self.top.take() {
            Some(top_reg) if top_reg >= from_reg => {
                let args: Vec<ExprId> = (from_reg..=top_reg)
                    .map(|r| self.read_reg(r, pc))
                    .collect();
                if let Some(&last) = args.last() {
                    self.hir.open_reads.insert(last);
                }
                args
            }
            Some(top_reg) => {
                log::warn!("multi-value top r{top_reg} below consumer base r{from_reg} at pc {pc}");
                Vec::new()
            }
            None => {
                log::warn!("open-ended read at pc {pc} without a multi-value producer");
                Vec::new()
            }
        }
    }
}

pub(crate) fn literal_constant(lit: Literal) -> Constant {
    match lit {
        Literal::Nil => Constant::Nil,
        Literal::Bool(b) => Constant::Boolean(b),
        Literal::Int(i) => Constant::Integer(i),
    }
}
