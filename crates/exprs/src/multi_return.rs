use petgraph::stable_graph::NodeIndex;

use codlua_bytecode::function::Function;
use codlua_hir::access::AccessIndex;
use codlua_hir::arena::{ExprArena, ExprId};
use codlua_hir::cfg::Terminator;
use codlua_hir::expr::HirExpr;
use codlua_hir::func::HirFunc;
use codlua_hir::stmt::HirStmt;
use codlua_hir::var::RegRef;

use crate::events::{effect_of, stmt_events, terminator_events, Effect, Event};
use crate::liveness::Liveness;

/// Splice a fixed multi-result capture back into the list that consumes it.
///
/// Recognizes:
///   r1, r2 = g()
///   f(x, r1, r2)           (or `return r1, r2`, a list store, or the
///                           iterator triple of a generic for)
///
/// where `r1..r2` are unnamed temporaries read nowhere else, and rewrites it
/// into `f(x, g())`. This assumes `g` returns exactly as many values as were
/// captured.
pub fn fold_multi_assigns(func: &mut HirFunc, proto: &Function, live: &Liveness) -> usize {
    let accesses = AccessIndex::build(func);
    let mut changed = 0;
    for node in func.blocks_in_pc_order() {
        let mut i = 0;
        while i < func.cfg[node].stmts.len() {
            if let Some(site) = find_site(func, proto, &accesses, live, node, i) {
                let HirStmt::MultiAssign { targets, value } = func.cfg[node].stmts.remove(i) else {
                    i += 1;
                    continue;
                };
                splice(func, node, site, targets.len(), value);
                changed += 1;
            } else {
                i += 1;
            }
        }
    }
    changed
}

/// Where the captured registers are consumed.
#[derive(Debug, Clone, Copy)]
enum Site {
    CallArgs(ExprId),
    /// List store at this statement index, counted before the capture is removed.
    SetList(usize),
    /// Return values or generic-for iterators.
    Terminator,
}

fn find_site(
    func: &HirFunc,
    proto: &Function,
    accesses: &AccessIndex,
    live: &Liveness,
    node: NodeIndex,
    i: usize,
) -> Option<Site> {
    let block = &func.cfg[node];
    let arena = &func.exprs;
    let HirStmt::MultiAssign { targets, value } = &block.stmts[i] else {
        return None;
    };
    let consecutive = targets
        .windows(2)
        .all(|w| w[1].register == w[0].register.wrapping_add(1));
    if targets.is_empty() || !consecutive {
        return None;
    }
    let named = |t: &RegRef| t.register < func.num_params || accesses.write_name(proto, *t).is_some();
    if targets.iter().any(named) {
        return None;
    }

    // Every captured register must be read exactly once, by the consumer.
    let consumer = block.stmts.get(i + 1);
    let mut reads = Vec::new();
    let mut redefined = vec![false; targets.len()];
    for stmt in &block.stmts[i + 1..] {
        for root in stmt.expr_roots() {
            collect_target_reads(arena, root, targets, &redefined, &mut reads);
        }
        if let Some(t) = stmt.implicit_reads() {
            if targets.iter().any(|x| x.register == t.register) {
                return None;
            }
        }
        for def in stmt.defined_registers() {
            if let Some(k) = targets.iter().position(|t| t.register == def.register) {
                redefined[k] = true;
            }
        }
    }
    for root in block.terminator.expr_roots() {
        collect_target_reads(arena, root, targets, &redefined, &mut reads);
    }
    let out = live.live_out(node);
    if targets
        .iter()
        .zip(&redefined)
        .any(|(t, r)| !r && out.contains(t.register))
    {
        return None;
    }
    if reads.len() != targets.len() {
        return None;
    }

    let (site, list) = match consumer {
        Some(HirStmt::SetList { values, .. }) => (Site::SetList(i + 1), values.clone()),
        Some(stmt) => {
            let call = stmt
                .expr_roots()
                .into_iter()
                .find_map(|root| call_ending_with(arena, root, targets))?;
            (Site::CallArgs(call), call_args(arena, call).to_vec())
        }
        None => match &block.terminator {
            Terminator::Return(values) | Terminator::ForGenPrep { iterators: values, .. } => {
                (Site::Terminator, values.clone())
            }
            _ => return None,
        },
    };
    if !ends_with_targets(arena, &list, targets) {
        return None;
    }
    let first_tail = list[list.len() - targets.len()];
    if !reads.contains(&first_tail) {
        return None;
    }

    // The capture moves past whatever the consumer evaluates first.
    let effect = effect_of(arena, *value);
    let events = match consumer {
        Some(stmt) => stmt_events(arena, stmt),
        None => terminator_events(arena, &block.terminator),
    };
    for ev in events {
        match ev {
            Event::Read { id, .. } if id == first_tail => break,
            Event::Call | Event::StateRead if effect != Effect::Pure => return None,
            _ => {}
        }
    }
    Some(site)
}

fn collect_target_reads(
    arena: &ExprArena,
    root: ExprId,
    targets: &[RegRef],
    redefined: &[bool],
    out: &mut Vec<ExprId>,
) {
    let mut regs = Vec::new();
    arena.register_reads(root, &mut regs);
    for id in regs {
        let Some(r) = arena.get(id).as_register() else {
            continue;
        };
        if let Some(k) = targets.iter().position(|t| t.register == r.register) {
            if !redefined[k] {
                out.push(id);
            }
        }
    }
}

fn call_args(arena: &ExprArena, call: ExprId) -> &[ExprId] {
    match arena.get(call) {
        HirExpr::Call { args, .. } | HirExpr::MethodCall { args, .. } => args,
        _ => &[],
    }
}

fn ends_with_targets(arena: &ExprArena, list: &[ExprId], targets: &[RegRef]) -> bool {
    list.len() >= targets.len()
        && list[list.len() - targets.len()..]
            .iter()
            .zip(targets)
            .all(|(id, t)| arena.get(*id).as_register().map(|r| r.register) == Some(t.register))
}

/// The first call under `root` whose argument list ends with the targets.
fn call_ending_with(arena: &ExprArena, root: ExprId, targets: &[RegRef]) -> Option<ExprId> {
    if matches!(arena.get(root), HirExpr::Call { .. } | HirExpr::MethodCall { .. })
        && ends_with_targets(arena, call_args(arena, root), targets)
    {
        return Some(root);
    }
    arena
        .get(root)
        .children()
        .into_iter()
        .find_map(|child| call_ending_with(arena, child, targets))
}

fn splice(func: &mut HirFunc, node: NodeIndex, site: Site, n: usize, value: ExprId) {
    let replace_tail = |list: &mut Vec<ExprId>| {
        list.truncate(list.len().saturating_sub(n));
        list.push(value);
    };
    match site {
        Site::CallArgs(call) => {
            if let HirExpr::Call { args, .. } | HirExpr::MethodCall { args, .. } = func.exprs.get_mut(call) {
                replace_tail(args);
            }
        }
        Site::SetList(index) => {
            // The capture at `index - 1` has already been removed.
            if let Some(HirStmt::SetList { values, .. }) = func.cfg[node].stmts.get_mut(index - 1) {
                replace_tail(values);
            }
        }
        Site::Terminator => match &mut func.cfg[node].terminator {
            Terminator::Return(values) | Terminator::ForGenPrep { iterators: values, .. } => {
                replace_tail(values)
            }
            _ => {}
        },
    }
}
