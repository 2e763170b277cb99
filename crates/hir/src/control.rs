use petgraph::stable_graph::NodeIndex;

use crate::arena::ExprId;

/// Structured control tree built over a function's CFG.
///
/// Every CFG block appears as exactly one `Block` leaf. Loop and branch
/// nodes carry conditions as arena ids; terminators of the blocks themselves
/// are not re-emitted.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlNode {
    /// The statements of one basic block.
    Block(NodeIndex),
    Sequence(Vec<ControlNode>),
    If {
        condition: ExprId,
        then_body: Vec<ControlNode>,
        else_body: Vec<ControlNode>,
    },
    /// Pre-test loop. `header` runs before every evaluation of `condition`;
    /// when its block has statements the loop prints as
    /// `while true do header; if not cond then break end; body end`.
    While {
        header: Box<ControlNode>,
        condition: ExprId,
        body: Vec<ControlNode>,
    },
    /// Post-test loop: exits once `condition` is truthy.
    RepeatUntil {
        body: Vec<ControlNode>,
        condition: ExprId,
    },
    /// `for base+3 = start, limit, step do body end`. The body ends with the
    /// step block.
    NumericFor {
        base: u8,
        start: ExprId,
        limit: ExprId,
        step: ExprId,
        body: Vec<ControlNode>,
    },
    /// `for vars in iterators do body end`. `control` is the block holding
    /// the iterator call.
    GenericFor {
        base: u8,
        var_count: u8,
        iterators: Vec<ExprId>,
        control: NodeIndex,
        body: Vec<ControlNode>,
    },
    Break,
    Return(Vec<ExprId>),
    /// Jump label, named after the pc of the block it precedes.
    Label(usize),
    Goto(usize),
    /// A line of commentary, used by the unstructured fallback.
    Comment(String),
}

impl ControlNode {
    /// All `Block` leaves in order of appearance.
    pub fn blocks(&self) -> Vec<NodeIndex> {
        let mut out = Vec::new();
        self.collect_blocks(&mut out);
        out
    }

    fn collect_blocks(&self, out: &mut Vec<NodeIndex>) {
        match self {
            ControlNode::Block(n) => out.push(*n),
            ControlNode::Sequence(nodes) => {
                for n in nodes {
                    n.collect_blocks(out);
                }
            }
            ControlNode::If {
                then_body,
                else_body,
                ..
            } => {
                for n in then_body.iter().chain(else_body) {
                    n.collect_blocks(out);
                }
            }
            ControlNode::While { header, body, .. } => {
                header.collect_blocks(out);
                for n in body {
                    n.collect_blocks(out);
                }
            }
            ControlNode::RepeatUntil { body, .. } | ControlNode::NumericFor { body, .. } => {
                for n in body {
                    n.collect_blocks(out);
                }
            }
            ControlNode::GenericFor { control, body, .. } => {
                out.push(*control);
                for n in body {
                    n.collect_blocks(out);
                }
            }
            ControlNode::Break
            | ControlNode::Return(_)
            | ControlNode::Label(_)
            | ControlNode::Goto(_)
            | ControlNode::Comment(_) => {}
        }
    }

    /// True when this is the unstructured form.
    pub fn has_gotos(&self) -> bool {
        match self {
            ControlNode::Goto(_) | ControlNode::Label(_) => true,
            ControlNode::Sequence(nodes) => nodes.iter().any(ControlNode::has_gotos),
            ControlNode::If {
                then_body,
                else_body,
                ..
            } => then_body.iter().chain(else_body).any(ControlNode::has_gotos),
            _ => false,
        }
    }
}
