use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use crate::arena::ExprId;
use crate::stmt::HirStmt;

/// A basic block in the control flow graph.
#[derive(Debug, Clone)]
pub struct HirBlock {
    /// Statements in this block (executed sequentially).
    pub stmts: Vec<HirStmt>,
    /// Block terminator (how control leaves this block).
    pub terminator: Terminator,
    /// Bytecode PC range for this block [start, end).
    pub pc_range: (usize, usize),
}

impl HirBlock {
    pub fn new(pc_range: (usize, usize)) -> Self {
        Self {
            stmts: Vec::new(),
            terminator: Terminator::None,
            pc_range,
        }
    }

    pub fn contains_pc(&self, pc: usize) -> bool {
        self.pc_range.0 <= pc && pc < self.pc_range.1
    }
}

/// How control flow leaves a basic block.
#[derive(Debug, Clone, PartialEq)]
pub enum Terminator {
    /// Falls off the end of the function, or through to the next block.
    None,
    /// Unconditional jump or fallthrough into a block that starts a new
    /// leader.
    Jump,
    /// `Then` edge when `condition` is truthy, `Else` edge otherwise.
    Branch { condition: ExprId },
    Return(Vec<ExprId>),
    /// Numeric for-loop setup. Edges: `Unconditional` into the body,
    /// `LoopExit` past the loop.
    ForNumPrep {
        base: u8,
        /// pc of the matching loop-step instruction.
        loop_pc: usize,
        start: ExprId,
        limit: ExprId,
        step: ExprId,
    },
    /// Numeric for-loop step. Edges: `LoopBack` to the body, `LoopExit`.
    ForNumBack { base: u8 },
    /// Generic for-loop setup: jumps to the iterator-call block.
    ForGenPrep { base: u8, iterators: Vec<ExprId> },
    /// Generic for-loop call and test. Edges: `LoopBack` to the body,
    /// `LoopExit`.
    ForGenBack { base: u8, var_count: u8 },
}

impl Terminator {
    /// Expressions read when the terminator executes.
    pub fn expr_roots(&self) -> Vec<ExprId> {
        match self {
            Terminator::Branch { condition } => vec![*condition],
            Terminator::Return(values) => values.clone(),
            Terminator::ForNumPrep {
                start, limit, step, ..
            } => vec![*start, *limit, *step],
            Terminator::ForGenPrep { iterators, .. } => iterators.clone(),
            Terminator::None
            | Terminator::Jump
            | Terminator::ForNumBack { .. }
            | Terminator::ForGenBack { .. } => Vec::new(),
        }
    }

    /// Mutable access to the same slots as [`Terminator::expr_roots`].
    pub fn expr_roots_mut(&mut self) -> Vec<&mut ExprId> {
        match self {
            Terminator::Branch { condition } => vec![condition],
            Terminator::Return(values) => values.iter_mut().collect(),
            Terminator::ForNumPrep {
                start, limit, step, ..
            } => vec![start, limit, step],
            Terminator::ForGenPrep { iterators, .. } => iterators.iter_mut().collect(),
            Terminator::None
            | Terminator::Jump
            | Terminator::ForNumBack { .. }
            | Terminator::ForGenBack { .. } => Vec::new(),
        }
    }

    /// Registers the loop machinery reads or writes behind the scenes.
    pub fn loop_registers(&self) -> Option<std::ops::Range<u8>> {
        match *self {
            Terminator::ForNumBack { base } => Some(base..base.saturating_add(4)),
            Terminator::ForGenBack { base, var_count } => {
                Some(base..base.saturating_add(3).saturating_add(var_count))
            }
            _ => None,
        }
    }

    pub fn is_loop_control(&self) -> bool {
        matches!(
            self,
            Terminator::ForNumBack { .. } | Terminator::ForGenBack { .. }
        )
    }
}

/// Edge metadata in the CFG.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HirEdge {
    pub kind: EdgeKind,
}

/// What kind of control flow edge this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    /// Unconditional or fallthrough.
    Unconditional,
    /// Taken when condition is true.
    Then,
    /// Taken when condition is false.
    Else,
    /// For-loop step back into the body.
    LoopBack,
    /// For-loop exit edge.
    LoopExit,
}

impl HirEdge {
    pub fn unconditional() -> Self {
        Self {
            kind: EdgeKind::Unconditional,
        }
    }

    pub fn then_edge() -> Self {
        Self {
            kind: EdgeKind::Then,
        }
    }

    pub fn else_edge() -> Self {
        Self {
            kind: EdgeKind::Else,
        }
    }

    pub fn loop_back() -> Self {
        Self {
            kind: EdgeKind::LoopBack,
        }
    }

    pub fn loop_exit() -> Self {
        Self {
            kind: EdgeKind::LoopExit,
        }
    }
}

/// The control flow graph type used throughout the decompiler.
pub type CfgGraph = StableDiGraph<HirBlock, HirEdge>;

/// Find the successor reached through an edge of `kind`.
pub fn successor_of_kind(graph: &CfgGraph, node: NodeIndex, kind: EdgeKind) -> Option<NodeIndex> {
    graph
        .edges(node)
        .find(|e| e.weight().kind == kind)
        .map(|e| e.target())
}

/// Helper to find the "then" successor of a conditional branch.
pub fn then_successor(graph: &CfgGraph, node: NodeIndex) -> Option<NodeIndex> {
    successor_of_kind(graph, node, EdgeKind::Then)
}

/// Helper to find the "else" successor of a conditional branch.
pub fn else_successor(graph: &CfgGraph, node: NodeIndex) -> Option<NodeIndex> {
    successor_of_kind(graph, node, EdgeKind::Else)
}

/// Successors sorted by their first pc, so iteration order never depends on
/// edge insertion order.
pub fn sorted_successors(graph: &CfgGraph, node: NodeIndex) -> Vec<NodeIndex> {
    let mut out: Vec<NodeIndex> = graph.neighbors(node).collect();
    out.sort_by_key(|n| graph[*n].pc_range.0);
    out.dedup();
    out
}

/// Predecessors sorted by their first pc.
pub fn sorted_predecessors(graph: &CfgGraph, node: NodeIndex) -> Vec<NodeIndex> {
    let mut out: Vec<NodeIndex> = graph.neighbors_directed(node, Direction::Incoming).collect();
    out.sort_by_key(|n| graph[*n].pc_range.0);
    out.dedup();
    out
}
