//! Collapse the branch diamonds that `and`, `or` and comparisons used as
//! values compile to, so the structurer sees them as single blocks.
//!
//! Five rewrites, repeated until none applies:
//!
//! - value `and`/`or`: `r = a; if r then r = b end` becomes `r = a and b`
//! - value chains: a reload of `r` that is itself tested and shares an
//!   exit with the test it follows joins that test, so `a and b or c`
//!   folds from the inside out
//! - materialized booleans: `if c then r = true else r = false end`
//!   becomes `r = c`
//! - condition chains: a test whose arm is another bare test merges into
//!   one condition
//! - straight-line merge: a block entered only by a jump from its single
//!   predecessor joins that predecessor

use petgraph::stable_graph::NodeIndex;
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use codlua_bytecode::constant::Constant;
use codlua_bytecode::function::Function;
use codlua_exprs::{reconstruct_expressions, Liveness};
use codlua_hir::arena::{ExprArena, ExprId};
use codlua_hir::cfg::{successor_of_kind, EdgeKind, HirEdge, Terminator};
use codlua_hir::expr::HirExpr;
use codlua_hir::func::HirFunc;
use codlua_hir::stmt::HirStmt;
use codlua_hir::types::{BinOp, UnOp};

const MAX_ROUNDS: usize = 256;

/// Fold short-circuit shapes and re-run expression reconstruction after
/// each round. Returns the number of control-flow folds.
pub fn fold_short_circuits(func: &mut HirFunc, proto: &Function) -> usize {
    let mut total = 0;
    reconstruct_expressions(func, proto);
    for _ in 0..MAX_ROUNDS {
        let mut changed = fold_values(func);
        changed += fold_value_chains(func);
        changed += fold_booleans(func);
        changed += fold_condition_chains(func);
        changed += merge_straight_lines(func);
        if changed == 0 {
            break;
        }
        total += changed;
        reconstruct_expressions(func, proto);
    }
    if total > 0 {
        log::trace!("folded {total} short-circuit shapes");
    }
    total
}

fn branch_arms(func: &HirFunc, node: NodeIndex) -> Option<(NodeIndex, NodeIndex)> {
    let Terminator::Branch { .. } = func.cfg[node].terminator else {
        return None;
    };
    let then_n = successor_of_kind(&func.cfg, node, EdgeKind::Then)?;
    let else_n = successor_of_kind(&func.cfg, node, EdgeKind::Else)?;
    (then_n != else_n && then_n != node && else_n != node).then_some((then_n, else_n))
}

fn single_predecessor(func: &HirFunc, node: NodeIndex) -> Option<NodeIndex> {
    let mut preds = func.cfg.neighbors_directed(node, Direction::Incoming);
    let first = preds.next()?;
    preds.all(|p| p == first).then_some(first)
}

/// The block `node` jumps to, when it ends in a plain jump.
fn jump_target(func: &HirFunc, node: NodeIndex) -> Option<NodeIndex> {
    match func.cfg[node].terminator {
        Terminator::Jump => successor_of_kind(&func.cfg, node, EdgeKind::Unconditional),
        _ => None,
    }
}

/// An arm made of a single register load that jumps to `join`.
fn lone_load(func: &HirFunc, arm: NodeIndex, head: NodeIndex, join: NodeIndex) -> Option<(u8, ExprId)> {
    if single_predecessor(func, arm) != Some(head) || jump_target(func, arm) != Some(join) {
        return None;
    }
    match func.cfg[arm].stmts.as_slice() {
        [HirStmt::RegAssign { target, value }] => Some((target.register, *value)),
        _ => None,
    }
}

fn reads_register(arena: &ExprArena, root: ExprId, reg: u8) -> bool {
    let mut reads = Vec::new();
    arena.register_reads(root, &mut reads);
    reads
        .iter()
        .any(|id| arena.get(*id).as_register().map(|r| r.register) == Some(reg))
}

/// True when `reg` is read on entry to `node` before anything writes it.
fn live_on_entry(func: &HirFunc, live: &Liveness, node: NodeIndex, reg: u8) -> bool {
    let block = &func.cfg[node];
    for stmt in &block.stmts {
        let read = stmt
            .expr_roots()
            .into_iter()
            .any(|root| reads_register(&func.exprs, root, reg))
            || stmt.implicit_reads().map(|r| r.register) == Some(reg);
        if read {
            return true;
        }
        if stmt.defined_registers().iter().any(|d| d.register == reg) {
            return false;
        }
    }
    block
        .terminator
        .expr_roots()
        .into_iter()
        .any(|root| reads_register(&func.exprs, root, reg))
        || live.live_out(node).contains(reg)
}

/// `Some(true)` for a branch on `r`, `Some(false)` for a branch on `not r`.
fn tests_register(arena: &ExprArena, condition: ExprId, reg: u8) -> Option<bool> {
    match arena.get(condition) {
        HirExpr::Register(r) if r.register == reg => Some(true),
        HirExpr::Unary {
            op: UnOp::Not,
            operand,
        } => match arena.get(*operand) {
            HirExpr::Register(r) if r.register == reg => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Replace `head`'s out-edges with a jump to `target`.
fn redirect(func: &mut HirFunc, head: NodeIndex, target: NodeIndex) {
    let edges: Vec<_> = func.cfg.edges(head).map(|e| e.id()).collect();
    for e in edges {
        func.cfg.remove_edge(e);
    }
    func.cfg[head].terminator = Terminator::Jump;
    func.cfg.add_edge(head, target, HirEdge::unconditional());
}

fn fold_values(func: &mut HirFunc) -> usize {
    let mut changed = 0;
    let live = Liveness::compute(func);
    for head in func.blocks_in_pc_order() {
        if !func.cfg.contains_node(head) {
            continue;
        }
        let Some((then_n, else_n)) = branch_arms(func, head) else {
            continue;
        };
        let Terminator::Branch { condition } = func.cfg[head].terminator else {
            continue;
        };
        let Some(&HirStmt::RegAssign { target, value: first }) = func.cfg[head].stmts.last() else {
            continue;
        };
        let reg = target.register;
        let Some(on_truthy) = tests_register(&func.exprs, condition, reg) else {
            continue;
        };
        // The arm that reloads `reg` and the join it rejoins.
        let (arm, join, arm_on_truthy) = if lone_load(func, then_n, head, else_n).is_some() {
            (then_n, else_n, on_truthy)
        } else if lone_load(func, else_n, head, then_n).is_some() {
            (else_n, then_n, !on_truthy)
        } else {
            continue;
        };
        let Some((arm_reg, second)) = lone_load(func, arm, head, join) else {
            continue;
        };
        if arm_reg != reg
            || reads_register(&func.exprs, second, reg)
            || !live_on_entry(func, &live, join, reg)
        {
            continue;
        }

        let op = if arm_on_truthy { BinOp::And } else { BinOp::Or };
        let combined = func.exprs.alloc(HirExpr::Binary {
            op,
            left: first,
            right: second,
        });
        if let Some(HirStmt::RegAssign { value, .. }) = func.cfg[head].stmts.last_mut() {
            *value = combined;
        }
        redirect(func, head, join);
        func.remove_block(arm);
        changed += 1;
    }
    changed
}

/// The `(truthy, falsy)` arms of a branch that tests `reg`.
fn register_arms(func: &HirFunc, node: NodeIndex, reg: u8) -> Option<(NodeIndex, NodeIndex)> {
    let Terminator::Branch { condition } = func.cfg[node].terminator else {
        return None;
    };
    let (then_n, else_n) = branch_arms(func, node)?;
    match tests_register(&func.exprs, condition, reg)? {
        true => Some((then_n, else_n)),
        false => Some((else_n, then_n)),
    }
}

/// `r = a; if r then r = b; if r goto T else goto F end else goto F end`
/// becomes `r = a and b; if r goto T else goto F end`, and the mirror
/// image with `or`. The path that skips the reload leaves `a` in `r`,
/// the same value the combined expression yields on that path.
fn fold_value_chains(func: &mut HirFunc) -> usize {
    let mut changed = 0;
    for head in func.blocks_in_pc_order() {
        if !func.cfg.contains_node(head) {
            continue;
        }
        let Some(&HirStmt::RegAssign { target, value: first }) = func.cfg[head].stmts.last() else {
            continue;
        };
        let reg = target.register;
        let Some((h_truthy, h_falsy)) = register_arms(func, head, reg) else {
            continue;
        };
        let op = if reloads_and_tests(func, h_truthy, head, reg) {
            BinOp::And
        } else if reloads_and_tests(func, h_falsy, head, reg) {
            BinOp::Or
        } else {
            continue;
        };
        let middle = if op == BinOp::And { h_truthy } else { h_falsy };
        let Some((m_truthy, m_falsy)) = register_arms(func, middle, reg) else {
            continue;
        };
        let shared = match op {
            BinOp::And => m_falsy == h_falsy,
            _ => m_truthy == h_truthy,
        };
        if !shared || m_truthy == head || m_falsy == head {
            continue;
        }
        let [HirStmt::RegAssign { value: second, .. }] = func.cfg[middle].stmts.as_slice() else {
            continue;
        };
        let second = *second;

        let combined = func.exprs.alloc(HirExpr::Binary {
            op,
            left: first,
            right: second,
        });
        if let Some(HirStmt::RegAssign { value, .. }) = func.cfg[head].stmts.last_mut() {
            *value = combined;
        }
        let out: Vec<(NodeIndex, HirEdge)> = func
            .cfg
            .edges(middle)
            .map(|e| (e.target(), *e.weight()))
            .collect();
        let edges: Vec<_> = func.cfg.edges(head).map(|e| e.id()).collect();
        for e in edges {
            func.cfg.remove_edge(e);
        }
        let terminator = func.cfg[middle].terminator.clone();
        func.cfg[head].terminator = terminator;
        func.remove_block(middle);
        for (target, weight) in out {
            func.cfg.add_edge(head, target, weight);
        }
        changed += 1;
    }
    changed
}

/// A block reached only from `head` that reloads `reg` from a value not
/// depending on it, then branches on `reg`.
fn reloads_and_tests(func: &HirFunc, node: NodeIndex, head: NodeIndex, reg: u8) -> bool {
    if node == func.entry || single_predecessor(func, node) != Some(head) {
        return false;
    }
    match func.cfg[node].stmts.as_slice() {
        [HirStmt::RegAssign { target, value }] => {
            target.register == reg
                && !reads_register(&func.exprs, *value, reg)
                && register_arms(func, node, reg).is_some()
        }
        _ => false,
    }
}

fn fold_booleans(func: &mut HirFunc) -> usize {
    let mut changed = 0;
    for head in func.blocks_in_pc_order() {
        if !func.cfg.contains_node(head) {
            continue;
        }
        let Some((then_n, else_n)) = branch_arms(func, head) else {
            continue;
        };
        let Terminator::Branch { condition } = func.cfg[head].terminator else {
            continue;
        };
        let Some(join) = jump_target(func, then_n) else {
            continue;
        };
        let (Some((r1, v1)), Some((r2, v2))) = (
            lone_load(func, then_n, head, join),
            lone_load(func, else_n, head, join),
        ) else {
            continue;
        };
        let literal = |id: ExprId| match func.exprs.get(id) {
            HirExpr::Literal(Constant::Boolean(b)) => Some(*b),
            _ => None,
        };
        let (Some(b1), Some(b2)) = (literal(v1), literal(v2)) else {
            continue;
        };
        if r1 != r2 || b1 == b2 {
            continue;
        }
        let Some(HirStmt::RegAssign { target, .. }) = func.cfg[then_n].stmts.first().cloned() else {
            continue;
        };
        let value = if b1 {
            condition
        } else {
            func.exprs.negate_condition(condition)
        };
        func.cfg[head].stmts.push(HirStmt::RegAssign { target, value });
        redirect(func, head, join);
        func.remove_block(then_n);
        func.remove_block(else_n);
        changed += 1;
    }
    changed
}

fn fold_condition_chains(func: &mut HirFunc) -> usize {
    let mut changed = 0;
    for head in func.blocks_in_pc_order() {
        if !func.cfg.contains_node(head) {
            continue;
        }
        let Some((h_then, h_else)) = branch_arms(func, head) else {
            continue;
        };
        let Terminator::Branch { condition: c1 } = func.cfg[head].terminator else {
            continue;
        };
        let (inner, via_then) = if chainable(func, h_then, head) {
            (h_then, true)
        } else if chainable(func, h_else, head) {
            (h_else, false)
        } else {
            continue;
        };
        let Some((b_then, b_else)) = branch_arms(func, inner) else {
            continue;
        };
        let Terminator::Branch { condition: c2 } = func.cfg[inner].terminator else {
            continue;
        };
        let outer_other = if via_then { h_else } else { h_then };
        let (op, negate_first) = match (via_then, outer_other == b_else, outer_other == b_then) {
            (true, true, _) => (BinOp::And, false),
            (true, _, true) => (BinOp::Or, true),
            (false, _, true) => (BinOp::Or, false),
            (false, true, _) => (BinOp::And, true),
            _ => continue,
        };
        let left = if negate_first {
            func.exprs.negate_condition(c1)
        } else {
            c1
        };
        let condition = func.exprs.alloc(HirExpr::Binary {
            op,
            left,
            right: c2,
        });

        let edges: Vec<_> = func.cfg.edges(head).map(|e| e.id()).collect();
        for e in edges {
            func.cfg.remove_edge(e);
        }
        func.cfg[head].terminator = Terminator::Branch { condition };
        func.cfg.add_edge(head, b_then, HirEdge::then_edge());
        func.cfg.add_edge(head, b_else, HirEdge::else_edge());
        func.remove_block(inner);
        changed += 1;
    }
    changed
}

/// A bare test reached only from `head`.
fn chainable(func: &HirFunc, node: NodeIndex, head: NodeIndex) -> bool {
    node != func.entry
        && func.cfg[node].stmts.is_empty()
        && single_predecessor(func, node) == Some(head)
        && branch_arms(func, node).is_some()
}

fn merge_straight_lines(func: &mut HirFunc) -> usize {
    let mut changed = 0;
    for head in func.blocks_in_pc_order() {
        if !func.cfg.contains_node(head) {
            continue;
        }
        let Some(next) = jump_target(func, head) else {
            continue;
        };
        if next == head
            || next == func.entry
            || func.cfg[next].terminator.is_loop_control()
            || single_predecessor(func, next) != Some(head)
        {
            continue;
        }
        let out: Vec<(NodeIndex, HirEdge)> = func
            .cfg
            .edges(next)
            .map(|e| (e.target(), *e.weight()))
            .collect();
        let Some(block) = func.cfg.node_weight(next).cloned() else {
            continue;
        };
        let merged = &mut func.cfg[head];
        merged.stmts.extend(block.stmts);
        merged.terminator = block.terminator;
        merged.pc_range.1 = merged.pc_range.1.max(block.pc_range.1);

        let edges: Vec<_> = func.cfg.edges(head).map(|e| e.id()).collect();
        for e in edges {
            func.cfg.remove_edge(e);
        }
        func.remove_block(next);
        for (target, weight) in out {
            let target = if target == next { head } else { target };
            func.cfg.add_edge(head, target, weight);
        }
        changed += 1;
    }
    changed
}
