use petgraph::stable_graph::NodeIndex;
use petgraph::visit::EdgeRef;
use rustc_hash::FxHashSet;

use codlua_hir::cfg::{CfgGraph, EdgeKind, Terminator};

use super::postdom::EdgeSet;

pub(super) fn single_successor(cfg: &CfgGraph, node: NodeIndex) -> Option<NodeIndex> {
    cfg.edges(node).next().map(|e| e.target())
}

pub(super) fn successor(cfg: &CfgGraph, node: NodeIndex, kind: EdgeKind) -> Option<NodeIndex> {
    codlua_hir::cfg::successor_of_kind(cfg, node, kind)
}

/// Nodes reachable from `start` over forward edges, not entering `stop`.
pub(super) fn collect_reachable(
    cfg: &CfgGraph,
    start: NodeIndex,
    stop: Option<NodeIndex>,
    back_edges: &EdgeSet,
) -> FxHashSet<NodeIndex> {
    let mut visited = FxHashSet::default();
    let mut stack = vec![start];
    while let Some(node) = stack.pop() {
        if Some(node) == stop || !visited.insert(node) {
            continue;
        }
        for e in cfg.edges(node) {
            if !back_edges.contains(&(node, e.target())) {
                stack.push(e.target());
            }
        }
    }
    visited
}

/// Earliest block both arms reach, by first pc.
pub(super) fn find_join_point(
    cfg: &CfgGraph,
    then_node: NodeIndex,
    else_node: NodeIndex,
    stop: Option<NodeIndex>,
    back_edges: &EdgeSet,
) -> Option<NodeIndex> {
    let then_reachable = collect_reachable(cfg, then_node, stop, back_edges);
    let else_reachable = collect_reachable(cfg, else_node, stop, back_edges);
    let mut common: Vec<NodeIndex> = then_reachable
        .intersection(&else_reachable)
        .copied()
        .filter(|n| is_valid_join_candidate(cfg, *n, back_edges))
        .collect();
    common.sort_by_key(|n| cfg[*n].pc_range.0);
    common.first().copied()
}

/// A bare terminal block is a destination of both arms, not a place where
/// code continues after the `end`.
fn is_valid_join_candidate(cfg: &CfgGraph, node: NodeIndex, back_edges: &EdgeSet) -> bool {
    cfg.edges(node)
        .any(|e| !back_edges.contains(&(node, e.target())))
        || !cfg[node].stmts.is_empty()
}

/// True when every path from `start` ends in a `return`, or reaches
/// `leave`, before reaching `stop`.
pub(super) fn branch_always_returns(
    cfg: &CfgGraph,
    start: NodeIndex,
    stop: Option<NodeIndex>,
    leave: Option<NodeIndex>,
    back_edges: &EdgeSet,
) -> bool {
    let mut stack = vec![start];
    let mut visited = FxHashSet::default();
    while let Some(node) = stack.pop() {
        if Some(node) == stop {
            return false;
        }
        if Some(node) == leave || !visited.insert(node) {
            continue;
        }
        match cfg[node].terminator {
            Terminator::Return(_) => {}
            Terminator::None => return false,
            _ => {
                let before = stack.len();
                for e in cfg.edges(node) {
                    if !back_edges.contains(&(node, e.target())) {
                        stack.push(e.target());
                    }
                }
                // Only back edges: an endless loop, not a return.
                if stack.len() == before {
                    return false;
                }
            }
        }
    }
    true
}
