mod expressions;
mod opcodes;
mod terminators;

use petgraph::stable_graph::NodeIndex;
use petgraph::visit::{Bfs, Walker};
use rustc_hash::FxHashSet;

use codlua_bytecode::function::Function;
use codlua_bytecode::instruction::Op;

use codlua_hir::arena::ExprId;
use codlua_hir::cfg::{HirBlock, HirEdge, Terminator};
use codlua_hir::expr::HirExpr;
use codlua_hir::func::HirFunc;
use codlua_hir::stmt::HirStmt;
use codlua_hir::var::RegRef;

use crate::block_discovery;
use crate::CfgError;

/// Lift a decoded function into an unstructured CFG.
///
/// Blocks unreachable from the entry are dropped.
pub fn build_cfg(func: &Function) -> Result<HirFunc, CfgError> {
    let mut lifter = Lifter::new(func);
    lifter.lift()?;
    lifter.prune_unreachable();
    Ok(lifter.hir)
}

/// A `SelfLookup` whose call has not been seen yet.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PendingSelf {
    pub(crate) dst: u8,
    pub(crate) object: RegRef,
}

pub(crate) struct Lifter<'a> {
    pub(crate) func: &'a Function,
    pub(crate) hir: HirFunc,
    /// Current block being built.
    pub(crate) current_block: NodeIndex,
    /// Register holding the last multi-value producer in this block. The
    /// next open-ended consumer reads up to and including it.
    pub(crate) top: Option<u8>,
    pub(crate) pending_self: Option<PendingSelf>,
}

impl<'a> Lifter<'a> {
    fn new(func: &'a Function) -> Self {
        let hir = HirFunc::new(func.num_params, func.is_vararg, func.num_upvalues);
        let entry = hir.entry;
        Self {
            func,
            hir,
            current_block: entry,
            top: None,
            pending_self: None,
        }
    }

    fn lift(&mut self) -> Result<(), CfgError> {
        let func = self.func;
        let instructions = &func.instructions;
        if instructions.is_empty() {
            return Ok(());
        }

        let starts = block_discovery::discover_block_starts(instructions)?;
        let ranges = block_discovery::block_ranges(&starts, instructions.len());

        // Create all blocks first so edges can point forward.
        for &(start_pc, end_pc) in &ranges {
            let node = match self.hir.block_at.get(&start_pc) {
                Some(&node) => node,
                None => {
                    let node = self.hir.cfg.add_node(HirBlock::new((start_pc, end_pc)));
                    self.hir.block_at.insert(start_pc, node);
                    node
                }
            };
            self.hir.cfg[node].pc_range = (start_pc, end_pc);
        }

        for (start_pc, end_pc) in ranges {
            self.current_block = self.hir.block_at[&start_pc];
            self.lift_block(start_pc, end_pc)?;
        }
        Ok(())
    }

    fn lift_block(&mut self, start_pc: usize, end_pc: usize) -> Result<(), CfgError> {
        self.top = None;
        self.pending_self = None;

        let func = self.func;
        let mut pc = start_pc;
        while pc < end_pc {
            let op = &func.instructions[pc];
            if self.lift_terminator(op, pc, end_pc)? {
                break;
            }
            self.lift_instruction(op, pc)?;
            pc += 1;
        }
        self.flush_pending_self();

        if matches!(self.hir.cfg[self.current_block].terminator, Terminator::None) {
            if let Some(&next) = self.hir.block_at.get(&end_pc) {
                self.hir
                    .cfg
                    .add_edge(self.current_block, next, HirEdge::unconditional());
                self.hir.cfg[self.current_block].terminator = Terminator::Jump;
            }
        }
        Ok(())
    }

    fn prune_unreachable(&mut self) {
        let reachable: FxHashSet<NodeIndex> =
            Bfs::new(&self.hir.cfg, self.hir.entry).iter(&self.hir.cfg).collect();
        let dead: Vec<NodeIndex> = self
            .hir
            .cfg
            .node_indices()
            .filter(|n| !reachable.contains(n))
            .collect();
        if !dead.is_empty() {
            log::debug!("dropping {} unreachable blocks", dead.len());
        }
        for node in dead {
            self.hir.remove_block(node);
        }
    }

    // ---- Helpers ----

    pub(crate) fn reg_ref(&self, register: u8, pc: usize) -> RegRef {
        RegRef::new(register, pc)
    }

    pub(crate) fn alloc_expr(&mut self, expr: HirExpr) -> ExprId {
        self.hir.exprs.alloc(expr)
    }

    pub(crate) fn read_reg(&mut self, register: u8, pc: usize) -> ExprId {
        let r = self.reg_ref(register, pc);
        self.alloc_expr(HirExpr::Register(r))
    }

    pub(crate) fn emit_stmt(&mut self, stmt: HirStmt) {
        self.hir.cfg[self.current_block].stmts.push(stmt);
    }

    pub(crate) fn emit_assign_reg(&mut self, register: u8, pc: usize, value: ExprId) {
        let target = self.reg_ref(register, pc);
        self.emit_stmt(HirStmt::RegAssign { target, value });
    }

    pub(crate) fn node_at(&self, pc: usize) -> Option<NodeIndex> {
        self.hir.block_at.get(&pc).copied()
    }

    pub(crate) fn add_edge_to(&mut self, target_pc: usize, edge: HirEdge) {
        if let Some(target) = self.node_at(target_pc) {
            self.hir.cfg.add_edge(self.current_block, target, edge);
        }
    }

    pub(crate) fn is_instruction(&self, pc: usize, pred: impl Fn(&Op) -> bool) -> bool {
        self.func.instructions.get(pc).map_or(false, pred)
    }
}

#[cfg(test)]
mod tests;
