use petgraph::algo::dominators::{simple_fast, Dominators};
use petgraph::stable_graph::NodeIndex;
use petgraph::visit::{EdgeRef, IntoEdgeReferences};
use rustc_hash::{FxHashMap, FxHashSet};

use codlua_hir::arena::ExprArena;
use codlua_hir::cfg::{CfgGraph, EdgeKind, Terminator};
use codlua_hir::control::ControlNode;
use codlua_hir::func::HirFunc;

use crate::StructureError;

mod branch;
mod cfg_helpers;
pub(crate) mod flat;
mod loops;
mod postdom;

use cfg_helpers::single_successor;
use postdom::{compute_postdom_tree, EdgeSet, PostDomTree};

/// Structure a function's CFG into a control tree.
///
/// Every block of `func` appears exactly once in the result. When the
/// jump topology cannot be matched to structured constructs the function
/// is laid out as labels and gotos instead.
pub fn structure_function(func: &mut HirFunc) -> ControlNode {
    match try_structure(func) {
        Ok(tree) => tree,
        Err(err) => {
            log::warn!("{err}; falling back to labelled jumps");
            flat::flatten(func, &err)
        }
    }
}

/// Structure a function's CFG, failing on shapes with no structured form.
pub fn try_structure(func: &mut HirFunc) -> Result<ControlNode, StructureError> {
    let HirFunc {
        cfg,
        entry,
        exprs,
        block_at,
        ..
    } = func;
    let mut structurer = Structurer::new(cfg, *entry, exprs, block_at);
    let body = structurer.region(*entry, None, None, false)?;
    let tree = ControlNode::Sequence(body);
    check_partition(cfg, &tree)?;
    Ok(tree)
}

/// Every block exactly once.
fn check_partition(cfg: &CfgGraph, tree: &ControlNode) -> Result<(), StructureError> {
    let mut seen = FxHashSet::default();
    for node in tree.blocks() {
        if !seen.insert(node) {
            return Err(StructureError::AmbiguousControlShape {
                pc: cfg[node].pc_range.0,
            });
        }
    }
    let mut missing: Vec<usize> = cfg
        .node_indices()
        .filter(|n| !seen.contains(n))
        .map(|n| cfg[n].pc_range.0)
        .collect();
    missing.sort_unstable();
    match missing.first() {
        Some(&pc) => Err(StructureError::AmbiguousControlShape { pc }),
        None => Ok(()),
    }
}

/// Enclosing loop, for `break` and join bounds.
pub(crate) struct LoopCtx {
    pub(crate) exit: Option<NodeIndex>,
    /// Blocks belonging to the loop; joins outside it are not followed.
    pub(crate) body: FxHashSet<NodeIndex>,
    /// For post-test loops, the block holding the `until` test.
    pub(crate) latch: Option<NodeIndex>,
}

/// A natural loop found from its back edges.
#[derive(Debug, Clone)]
pub(crate) struct NaturalLoop {
    pub(crate) body: FxHashSet<NodeIndex>,
    pub(crate) latches: Vec<NodeIndex>,
}

pub(crate) struct Structurer<'a> {
    pub(crate) cfg: &'a CfgGraph,
    pub(crate) exprs: &'a mut ExprArena,
    pub(crate) block_at: &'a FxHashMap<usize, NodeIndex>,
    pub(crate) doms: Dominators<NodeIndex>,
    pub(crate) back_edges: EdgeSet,
    pub(crate) loops: FxHashMap<NodeIndex, NaturalLoop>,
    pub(crate) pdom: PostDomTree,
    pub(crate) visited: FxHashSet<NodeIndex>,
    /// Loop headers whose loop is being structured.
    pub(crate) active: FxHashSet<NodeIndex>,
}

impl<'a> Structurer<'a> {
    fn new(
        cfg: &'a CfgGraph,
        entry: NodeIndex,
        exprs: &'a mut ExprArena,
        block_at: &'a FxHashMap<usize, NodeIndex>,
    ) -> Self {
        let doms = simple_fast(cfg, entry);
        let mut back_edges = EdgeSet::default();
        let mut latches: FxHashMap<NodeIndex, Vec<NodeIndex>> = FxHashMap::default();
        for e in cfg.edge_references() {
            let (u, v) = (e.source(), e.target());
            // The step of a generic for is its control block; its LoopBack
            // edge is the back edge, not the body's fallthrough into it.
            if matches!(cfg[u].terminator, Terminator::ForGenBack { .. })
                && e.weight().kind == EdgeKind::LoopBack
            {
                back_edges.insert((u, v));
                continue;
            }
            if matches!(cfg[v].terminator, Terminator::ForGenBack { .. }) {
                continue;
            }
            if dominates(&doms, v, u) {
                back_edges.insert((u, v));
                if !matches!(cfg[u].terminator, Terminator::ForNumBack { .. }) {
                    latches.entry(v).or_default().push(u);
                }
            }
        }

        let mut loops = FxHashMap::default();
        for (header, mut tails) in latches {
            tails.sort_by_key(|n| cfg[*n].pc_range.0);
            let body = natural_loop_body(cfg, header, &tails);
            loops.insert(
                header,
                NaturalLoop {
                    body,
                    latches: tails,
                },
            );
        }

        let pdom = compute_postdom_tree(cfg, &back_edges);
        Self {
            cfg,
            exprs,
            block_at,
            doms,
            back_edges,
            loops,
            pdom,
            visited: FxHashSet::default(),
            active: FxHashSet::default(),
        }
    }

    pub(crate) fn ambiguous(&self, node: NodeIndex) -> StructureError {
        StructureError::AmbiguousControlShape {
            pc: self.cfg[node].pc_range.0,
        }
    }

    /// Structure from `start` until `stop`, the enclosing loop's exit, or
    /// a block without successors. With `entry_ok` the region may begin at
    /// `stop` itself, as the body of a loop headed by `start` does.
    pub(crate) fn region(
        &mut self,
        start: NodeIndex,
        stop: Option<NodeIndex>,
        ctx: Option<&LoopCtx>,
        entry_ok: bool,
    ) -> Result<Vec<ControlNode>, StructureError> {
        let mut out = Vec::new();
        let mut current = Some(start);
        let mut at_entry = entry_ok;
        while let Some(node) = current {
            if Some(node) == stop && !at_entry {
                break;
            }
            at_entry = false;
            if let Some(ctx) = ctx {
                if Some(node) == ctx.exit {
                    out.push(ControlNode::Break);
                    break;
                }
            }
            if self.loops.contains_key(&node) && !self.active.contains(&node) {
                let (looped, next) = self.structure_loop(node)?;
                out.push(looped);
                current = next;
                continue;
            }
            if !self.visited.insert(node) {
                return Err(self.ambiguous(node));
            }
            out.push(ControlNode::Block(node));
            if ctx.map_or(false, |c| c.latch == Some(node)) {
                break;
            }
            current = self.follow(node, stop, ctx, &mut out)?;
        }
        Ok(out)
    }

    /// Handle the terminator of a block just placed; returns where the
    /// region continues.
    fn follow(
        &mut self,
        node: NodeIndex,
        stop: Option<NodeIndex>,
        ctx: Option<&LoopCtx>,
        out: &mut Vec<ControlNode>,
    ) -> Result<Option<NodeIndex>, StructureError> {
        let cfg = self.cfg;
        match &cfg[node].terminator {
            Terminator::None => Ok(None),
            Terminator::Return(values) => {
                out.push(ControlNode::Return(values.clone()));
                Ok(None)
            }
            Terminator::Jump => Ok(single_successor(cfg, node)),
            Terminator::Branch { condition } => self.structure_branch(node, *condition, stop, ctx, out),
            Terminator::ForNumPrep {
                base,
                loop_pc,
                start,
                limit,
                step,
            } => {
                let (looped, next) =
                    self.structure_numeric_for(node, *base, *loop_pc, [*start, *limit, *step])?;
                out.push(looped);
                Ok(next)
            }
            Terminator::ForGenPrep { base, iterators } => {
                let (looped, next) = self.structure_generic_for(node, *base, iterators.clone())?;
                out.push(looped);
                Ok(next)
            }
            Terminator::ForNumBack { .. } | Terminator::ForGenBack { .. } => Err(self.ambiguous(node)),
        }
    }

    /// Blocks dominated by `head`.
    pub(crate) fn dominated_by(&self, head: NodeIndex) -> FxHashSet<NodeIndex> {
        self.cfg
            .node_indices()
            .filter(|n| dominates(&self.doms, head, *n))
            .collect()
    }
}

pub(crate) fn dominates(doms: &Dominators<NodeIndex>, a: NodeIndex, b: NodeIndex) -> bool {
    doms.dominators(b).map_or(false, |mut it| it.any(|d| d == a))
}

/// The header plus every block that reaches a latch without passing the
/// header.
fn natural_loop_body(cfg: &CfgGraph, header: NodeIndex, latches: &[NodeIndex]) -> FxHashSet<NodeIndex> {
    let mut body = FxHashSet::default();
    body.insert(header);
    let mut stack: Vec<NodeIndex> = latches.to_vec();
    while let Some(node) = stack.pop() {
        if body.insert(node) {
            stack.extend(cfg.neighbors_directed(node, petgraph::Direction::Incoming));
        }
    }
    body
}
