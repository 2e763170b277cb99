use petgraph::stable_graph::NodeIndex;
use petgraph::Direction;
use rustc_hash::FxHashMap;

use codlua_hir::arena::ExprArena;
use codlua_hir::cfg::{HirBlock, Terminator};
use codlua_hir::func::HirFunc;

/// A set of register slots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegSet([u64; 4]);

impl RegSet {
    pub fn insert(&mut self, r: u8) {
        self.0[(r >> 6) as usize] |= 1 << (r & 63);
    }

    pub fn remove(&mut self, r: u8) {
        self.0[(r >> 6) as usize] &= !(1 << (r & 63));
    }

    pub fn contains(&self, r: u8) -> bool {
        self.0[(r >> 6) as usize] & (1 << (r & 63)) != 0
    }

    pub fn union_with(&mut self, other: &RegSet) {
        for (a, b) in self.0.iter_mut().zip(other.0.iter()) {
            *a |= b;
        }
    }

    fn minus(&self, other: &RegSet) -> RegSet {
        let mut out = *self;
        for (a, b) in out.0.iter_mut().zip(other.0.iter()) {
            *a &= !b;
        }
        out
    }
}

/// Registers live on exit from each block.
#[derive(Debug, Clone, Default)]
pub struct Liveness {
    live_out: FxHashMap<NodeIndex, RegSet>,
}

impl Liveness {
    pub fn compute(func: &HirFunc) -> Self {
        let order = func.blocks_in_pc_order();
        let mut summaries: FxHashMap<NodeIndex, (RegSet, RegSet)> = FxHashMap::default();
        for &node in &order {
            summaries.insert(node, block_summary(&func.cfg[node], &func.exprs));
        }

        let mut live_in: FxHashMap<NodeIndex, RegSet> = FxHashMap::default();
        let mut live_out: FxHashMap<NodeIndex, RegSet> = FxHashMap::default();
        let mut changed = true;
        while changed {
            changed = false;
            for &node in order.iter().rev() {
                let mut out = RegSet::default();
                for succ in func.cfg.neighbors_directed(node, Direction::Outgoing) {
                    if let Some(s) = live_in.get(&succ) {
                        out.union_with(s);
                    }
                }
                let (gen, kill) = summaries[&node];
                let mut inn = out.minus(&kill);
                inn.union_with(&gen);
                if live_in.get(&node) != Some(&inn) {
                    live_in.insert(node, inn);
                    changed = true;
                }
                live_out.insert(node, out);
            }
        }
        Self { live_out }
    }

    pub fn live_out(&self, node: NodeIndex) -> RegSet {
        self.live_out.get(&node).copied().unwrap_or_default()
    }
}

/// (gen, kill) for one block: registers read before any write, and
/// registers written.
fn block_summary(block: &HirBlock, arena: &ExprArena) -> (RegSet, RegSet) {
    let mut gen = RegSet::default();
    let mut kill = RegSet::default();
    let mut reads = Vec::new();
    for stmt in &block.stmts {
        reads.clear();
        for root in stmt.expr_roots() {
            arena.register_reads(root, &mut reads);
        }
        for id in &reads {
            if let Some(r) = arena.get(*id).as_register() {
                read(r.register, &mut gen, &kill);
            }
        }
        if let Some(r) = stmt.implicit_reads() {
            read(r.register, &mut gen, &kill);
        }
        for def in stmt.defined_registers() {
            kill.insert(def.register);
        }
    }

    reads.clear();
    for root in block.terminator.expr_roots() {
        arena.register_reads(root, &mut reads);
    }
    for id in &reads {
        if let Some(r) = arena.get(*id).as_register() {
            read(r.register, &mut gen, &kill);
        }
    }
    // Loop steps rewrite the visible variables. Their hidden control slots
    // are read only by the loop machinery, which the source form restates.
    match block.terminator {
        Terminator::ForNumBack { base } | Terminator::ForNumPrep { base, .. } => {
            kill.insert(base.saturating_add(3));
        }
        Terminator::ForGenBack { base, var_count } => {
            let vars_end = base.saturating_add(3).saturating_add(var_count);
            for r in base.saturating_add(3)..vars_end {
                kill.insert(r);
            }
        }
        _ => {}
    }
    (gen, kill)
}

fn read(r: u8, gen: &mut RegSet, kill: &RegSet) {
    if !kill.contains(r) {
        gen.insert(r);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codlua_hir::cfg::{HirBlock, HirEdge};
    use codlua_hir::expr::HirExpr;
    use codlua_hir::stmt::HirStmt;
    use codlua_hir::var::RegRef;

    #[test]
    fn regset_basics() {
        let mut s = RegSet::default();
        s.insert(0);
        s.insert(200);
        assert!(s.contains(0) && s.contains(200));
        assert!(!s.contains(1));
        s.remove(200);
        assert!(!s.contains(200));
    }

    #[test]
    fn reads_in_successor_make_a_register_live() {
        // b0: r0 = 1; r1 = 2  ->  b1: return r0
        let mut func = HirFunc::new(0, false, 0);
        let one = func.exprs.alloc(HirExpr::Literal(codlua_bytecode::constant::Constant::Integer(1)));
        let two = func.exprs.alloc(HirExpr::Literal(codlua_bytecode::constant::Constant::Integer(2)));
        let entry = func.entry;
        func.cfg[entry].stmts = vec![
            HirStmt::RegAssign {
                target: RegRef::new(0, 0),
                value: one,
            },
            HirStmt::RegAssign {
                target: RegRef::new(1, 1),
                value: two,
            },
        ];
        func.cfg[entry].terminator = Terminator::Jump;
        let exit = func.cfg.add_node(HirBlock::new((2, 3)));
        let read = func.exprs.alloc(HirExpr::Register(RegRef::new(0, 2)));
        func.cfg[exit].terminator = Terminator::Return(vec![read]);
        func.cfg.add_edge(entry, exit, HirEdge::unconditional());

        let live = Liveness::compute(&func);
        let out = live.live_out(entry);
        assert!(out.contains(0));
        assert!(!out.contains(1));
        assert_eq!(live.live_out(exit), RegSet::default());
    }
}
