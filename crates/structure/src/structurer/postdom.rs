//! Post-dominator tree for the forward CFG.
//!
//! A node X post-dominates Y if every path from Y to an exit passes through
//! X. The join point of an if/else is the immediate post-dominator of the
//! branch block.
//!
//! Cooper, Harvey & Kennedy's iterative algorithm on the reverse CFG, with a
//! virtual exit joining every real exit. Back edges are ignored, so a loop
//! latch counts as an exit of the forward graph.

use petgraph::stable_graph::NodeIndex;
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use rustc_hash::{FxHashMap, FxHashSet};

use codlua_hir::cfg::{CfgGraph, Terminator};

pub(crate) type EdgeSet = FxHashSet<(NodeIndex, NodeIndex)>;

pub(crate) struct PostDomTree {
    ipdom: FxHashMap<NodeIndex, NodeIndex>,
}

impl PostDomTree {
    pub(crate) fn ipdom(&self, node: NodeIndex) -> Option<NodeIndex> {
        self.ipdom.get(&node).copied()
    }
}

fn forward_edges<'a>(
    cfg: &'a CfgGraph,
    node: NodeIndex,
    back_edges: &'a EdgeSet,
) -> impl Iterator<Item = NodeIndex> + 'a {
    cfg.edges(node)
        .map(|e| e.target())
        .filter(move |t| !back_edges.contains(&(node, *t)))
}

pub(crate) fn compute_postdom_tree(cfg: &CfgGraph, back_edges: &EdgeSet) -> PostDomTree {
    let exit_nodes: Vec<NodeIndex> = cfg
        .node_indices()
        .filter(|&n| {
            matches!(cfg[n].terminator, Terminator::Return(_))
                || forward_edges(cfg, n, back_edges).next().is_none()
        })
        .collect();
    if exit_nodes.is_empty() {
        return PostDomTree {
            ipdom: FxHashMap::default(),
        };
    }

    let rpo_nodes = reverse_postorder_on_reverse_cfg(cfg, &exit_nodes, back_edges);

    // Index 0 is the virtual exit; real nodes are 1-based.
    let virtual_exit: usize = 0;
    let total = rpo_nodes.len() + 1;
    let rpo_idx: FxHashMap<NodeIndex, usize> = rpo_nodes
        .iter()
        .enumerate()
        .map(|(i, &n)| (n, i + 1))
        .collect();

    const UNDEFINED: usize = usize::MAX;
    let mut dom = vec![UNDEFINED; total];
    dom[virtual_exit] = virtual_exit;
    for ex in &exit_nodes {
        if let Some(&idx) = rpo_idx.get(ex) {
            dom[idx] = virtual_exit;
        }
    }

    let mut changed = true;
    while changed {
        changed = false;
        for rpo_i in 1..total {
            let node = rpo_nodes[rpo_i - 1];
            if exit_nodes.contains(&node) {
                continue;
            }
            let mut new_idom = UNDEFINED;
            for succ in forward_edges(cfg, node, back_edges) {
                let Some(&succ_rpo) = rpo_idx.get(&succ) else {
                    continue;
                };
                if dom[succ_rpo] == UNDEFINED {
                    continue;
                }
                new_idom = if new_idom == UNDEFINED {
                    succ_rpo
                } else {
                    intersect(&dom, new_idom, succ_rpo)
                };
            }
            if new_idom != UNDEFINED && dom[rpo_i] != new_idom {
                dom[rpo_i] = new_idom;
                changed = true;
            }
        }
    }

    let mut ipdom = FxHashMap::default();
    for (rpo_i, &d) in dom.iter().enumerate().skip(1) {
        if d != UNDEFINED && d != rpo_i && d != virtual_exit {
            ipdom.insert(rpo_nodes[rpo_i - 1], rpo_nodes[d - 1]);
        }
    }
    PostDomTree { ipdom }
}

fn intersect(dom: &[usize], mut a: usize, mut b: usize) -> usize {
    while a != b {
        while a > b {
            a = dom[a];
        }
        while b > a {
            b = dom[b];
        }
    }
    a
}

fn reverse_postorder_on_reverse_cfg(
    cfg: &CfgGraph,
    exits: &[NodeIndex],
    back_edges: &EdgeSet,
) -> Vec<NodeIndex> {
    let mut visited = FxHashSet::default();
    let mut postorder = Vec::new();
    for &exit in exits {
        dfs_reverse(cfg, exit, back_edges, &mut visited, &mut postorder);
    }
    postorder.reverse();
    postorder
}

fn dfs_reverse(
    cfg: &CfgGraph,
    node: NodeIndex,
    back_edges: &EdgeSet,
    visited: &mut FxHashSet<NodeIndex>,
    postorder: &mut Vec<NodeIndex>,
) {
    if !visited.insert(node) {
        return;
    }
    for edge in cfg.edges_directed(node, Direction::Incoming) {
        if back_edges.contains(&(edge.source(), node)) {
            continue;
        }
        dfs_reverse(cfg, edge.source(), back_edges, visited, postorder);
    }
    postorder.push(node);
}

#[cfg(test)]
mod tests {
    use super::*;
    use codlua_hir::arena::ExprId;
    use codlua_hir::cfg::{HirBlock, HirEdge};

    #[test]
    fn diamond_joins_at_the_merge_block() {
        let mut cfg = CfgGraph::new();
        let head = cfg.add_node(HirBlock::new((0, 2)));
        let left = cfg.add_node(HirBlock::new((2, 3)));
        let right = cfg.add_node(HirBlock::new((3, 4)));
        let join = cfg.add_node(HirBlock::new((4, 5)));
        cfg[head].terminator = Terminator::Branch {
            condition: ExprId(0),
        };
        cfg[join].terminator = Terminator::Return(Vec::new());
        cfg.add_edge(head, left, HirEdge::then_edge());
        cfg.add_edge(head, right, HirEdge::else_edge());
        cfg.add_edge(left, join, HirEdge::unconditional());
        cfg.add_edge(right, join, HirEdge::unconditional());

        let tree = compute_postdom_tree(&cfg, &EdgeSet::default());
        assert_eq!(tree.ipdom(head), Some(join));
        assert_eq!(tree.ipdom(left), Some(join));
        assert_eq!(tree.ipdom(join), None);
    }

    #[test]
    fn back_edges_do_not_create_joins() {
        // head -> body -> head (back), head -> exit
        let mut cfg = CfgGraph::new();
        let head = cfg.add_node(HirBlock::new((0, 2)));
        let body = cfg.add_node(HirBlock::new((2, 3)));
        let exit = cfg.add_node(HirBlock::new((3, 4)));
        cfg[exit].terminator = Terminator::Return(Vec::new());
        cfg.add_edge(head, body, HirEdge::then_edge());
        cfg.add_edge(head, exit, HirEdge::else_edge());
        cfg.add_edge(body, head, HirEdge::unconditional());

        let mut back = EdgeSet::default();
        back.insert((body, head));
        let tree = compute_postdom_tree(&cfg, &back);
        assert_eq!(tree.ipdom(head), None);
        assert_eq!(tree.ipdom(body), None);
    }
}
