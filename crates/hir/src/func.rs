use petgraph::stable_graph::NodeIndex;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::arena::{ExprArena, ExprId};
use crate::cfg::{CfgGraph, HirBlock};

/// A function in the HIR: the CFG, its expression arena, and the metadata
/// later stages need without going back to the bytecode.
#[derive(Debug, Clone)]
pub struct HirFunc {
    /// Control flow graph. Nodes are basic blocks, edges are branches.
    pub cfg: CfgGraph,

    /// Entry block of the CFG.
    pub entry: NodeIndex,

    /// All expressions in this function, stored flat.
    pub exprs: ExprArena,

    pub num_params: u8,
    pub is_vararg: bool,
    pub num_upvalues: u8,

    /// Block starting at each leader pc.
    pub block_at: FxHashMap<usize, NodeIndex>,

    /// Register reads that stand for "all remaining values": the tail of an
    /// open-ended call, return or list store.
    pub open_reads: FxHashSet<ExprId>,
}

impl HirFunc {
    pub fn new(num_params: u8, is_vararg: bool, num_upvalues: u8) -> Self {
        let mut cfg = CfgGraph::new();
        let entry = cfg.add_node(HirBlock::new((0, 0)));
        let mut block_at = FxHashMap::default();
        block_at.insert(0, entry);
        Self {
            cfg,
            entry,
            exprs: ExprArena::new(),
            num_params,
            is_vararg,
            num_upvalues,
            block_at,
            open_reads: FxHashSet::default(),
        }
    }

    /// All blocks ordered by their first pc.
    pub fn blocks_in_pc_order(&self) -> Vec<NodeIndex> {
        let mut nodes: Vec<NodeIndex> = self.cfg.node_indices().collect();
        nodes.sort_by_key(|n| self.cfg[*n].pc_range.0);
        nodes
    }

    /// The block whose pc range contains `pc`.
    pub fn block_containing(&self, pc: usize) -> Option<NodeIndex> {
        self.cfg
            .node_indices()
            .find(|n| self.cfg[*n].contains_pc(pc))
    }

    /// Remove a block and forget its leader.
    pub fn remove_block(&mut self, node: NodeIndex) {
        if let Some(block) = self.cfg.remove_node(node) {
            if self.block_at.get(&block.pc_range.0) == Some(&node) {
                self.block_at.remove(&block.pc_range.0);
            }
        }
    }
}
