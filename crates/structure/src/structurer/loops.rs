use petgraph::stable_graph::NodeIndex;

use codlua_bytecode::constant::Constant;
use codlua_hir::arena::ExprId;
use codlua_hir::cfg::{EdgeKind, Terminator};
use codlua_hir::control::ControlNode;
use codlua_hir::expr::HirExpr;

use super::cfg_helpers::{single_successor, successor};
use super::{LoopCtx, Structurer};
use crate::StructureError;

/// The shape a natural loop was matched to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoopKind {
    /// The header tests and leaves the loop.
    PreTest {
        body_start: NodeIndex,
        exit: NodeIndex,
    },
    /// A latch tests and either returns to the header or leaves.
    PostTest { latch: NodeIndex, exit: NodeIndex },
    /// No test either way; left only through `break`.
    Endless { exit: Option<NodeIndex> },
}

impl<'a> Structurer<'a> {
    pub(crate) fn classify_loop(&self, header: NodeIndex) -> Option<LoopKind> {
        let cfg = self.cfg;
        let info = self.loops.get(&header)?;

        if let Terminator::Branch { .. } = cfg[header].terminator {
            let then_n = successor(cfg, header, EdgeKind::Then);
            let else_n = successor(cfg, header, EdgeKind::Else);
            if let (Some(t), Some(e)) = (then_n, else_n) {
                let t_in = info.body.contains(&t);
                let e_in = info.body.contains(&e);
                if t_in && !e_in && t != header {
                    return Some(LoopKind::PreTest {
                        body_start: t,
                        exit: e,
                    });
                }
                if e_in && !t_in && e != header {
                    return Some(LoopKind::PreTest {
                        body_start: e,
                        exit: t,
                    });
                }
            }
        }

        for &latch in info.latches.iter().rev() {
            if !matches!(cfg[latch].terminator, Terminator::Branch { .. }) {
                continue;
            }
            let then_n = successor(cfg, latch, EdgeKind::Then);
            let else_n = successor(cfg, latch, EdgeKind::Else);
            let exit = match (then_n, else_n) {
                (Some(t), Some(e)) if t == header && !info.body.contains(&e) => e,
                (Some(t), Some(e)) if e == header && !info.body.contains(&t) => t,
                _ => continue,
            };
            return Some(LoopKind::PostTest { latch, exit });
        }

        // Leave through the earliest block outside the loop; a block that
        // only jumps onward stands for its target.
        let mut body: Vec<NodeIndex> = info.body.iter().copied().collect();
        body.sort_by_key(|n| cfg[*n].pc_range.0);
        let exit = body
            .iter()
            .flat_map(|n| cfg.neighbors(*n))
            .filter(|s| !info.body.contains(s))
            .map(|s| match cfg[s].terminator {
                Terminator::Jump if cfg[s].stmts.is_empty() => single_successor(cfg, s).unwrap_or(s),
                _ => s,
            })
            .filter(|s| !info.body.contains(s))
            .min_by_key(|s| cfg[*s].pc_range.0);
        Some(LoopKind::Endless { exit })
    }

    /// Structure the loop headed by `header`; returns the loop and the block
    /// after it.
    pub(super) fn structure_loop(
        &mut self,
        header: NodeIndex,
    ) -> Result<(ControlNode, Option<NodeIndex>), StructureError> {
        let kind = self.classify_loop(header).ok_or_else(|| self.ambiguous(header))?;
        let body = self.loops[&header].body.clone();
        self.active.insert(header);
        log::trace!("loop at pc {} is {kind:?}", self.cfg[header].pc_range.0);

        match kind {
            LoopKind::PreTest { body_start, exit } => {
                let Terminator::Branch { condition } = self.cfg[header].terminator else {
                    return Err(self.ambiguous(header));
                };
                let condition = if successor(self.cfg, header, EdgeKind::Then) == Some(body_start) {
                    condition
                } else {
                    self.exprs.negate_condition(condition)
                };
                if !self.visited.insert(header) {
                    return Err(self.ambiguous(header));
                }
                let ctx = LoopCtx {
                    exit: Some(exit),
                    body,
                    latch: None,
                };
                let body = self.region(body_start, Some(header), Some(&ctx), false)?;
                Ok((
                    ControlNode::While {
                        header: Box::new(ControlNode::Block(header)),
                        condition,
                        body,
                    },
                    Some(exit),
                ))
            }
            LoopKind::PostTest { latch, exit } => {
                let ctx = LoopCtx {
                    exit: Some(exit),
                    body,
                    latch: Some(latch),
                };
                let body = self.region(header, Some(header), Some(&ctx), true)?;
                let Terminator::Branch { condition } = self.cfg[latch].terminator else {
                    return Err(self.ambiguous(latch));
                };
                // `until` leaves on a truthy condition.
                let condition = if successor(self.cfg, latch, EdgeKind::Then) == Some(exit) {
                    condition
                } else {
                    self.exprs.negate_condition(condition)
                };
                Ok((ControlNode::RepeatUntil { body, condition }, Some(exit)))
            }
            LoopKind::Endless { exit } => {
                let ctx = LoopCtx {
                    exit,
                    body,
                    latch: None,
                };
                let body = self.region(header, Some(header), Some(&ctx), true)?;
                let condition = self.exprs.alloc(HirExpr::Literal(Constant::Boolean(true)));
                Ok((
                    ControlNode::While {
                        header: Box::new(ControlNode::Sequence(Vec::new())),
                        condition,
                        body,
                    },
                    exit,
                ))
            }
        }
    }

    pub(super) fn structure_numeric_for(
        &mut self,
        prep: NodeIndex,
        base: u8,
        loop_pc: usize,
        [start, limit, step]: [ExprId; 3],
    ) -> Result<(ControlNode, Option<NodeIndex>), StructureError> {
        let cfg = self.cfg;
        let step_block = self
            .block_at
            .get(&loop_pc)
            .copied()
            .ok_or_else(|| self.ambiguous(prep))?;
        let body_start =
            successor(cfg, prep, EdgeKind::Unconditional).ok_or_else(|| self.ambiguous(prep))?;
        let exit = successor(cfg, prep, EdgeKind::LoopExit);

        let mut body = if body_start == step_block {
            Vec::new()
        } else {
            let ctx = LoopCtx {
                exit,
                body: self.dominated_by(body_start),
                latch: None,
            };
            self.region(body_start, Some(step_block), Some(&ctx), false)?
        };
        if !self.visited.insert(step_block) {
            return Err(self.ambiguous(step_block));
        }
        body.push(ControlNode::Block(step_block));
        Ok((
            ControlNode::NumericFor {
                base,
                start,
                limit,
                step,
                body,
            },
            exit,
        ))
    }

    pub(super) fn structure_generic_for(
        &mut self,
        prep: NodeIndex,
        base: u8,
        iterators: Vec<ExprId>,
    ) -> Result<(ControlNode, Option<NodeIndex>), StructureError> {
        let cfg = self.cfg;
        let control = single_successor(cfg, prep).ok_or_else(|| self.ambiguous(prep))?;
        let Terminator::ForGenBack { var_count, .. } = cfg[control].terminator else {
            return Err(self.ambiguous(prep));
        };
        let body_start =
            successor(cfg, control, EdgeKind::LoopBack).ok_or_else(|| self.ambiguous(control))?;
        let exit = successor(cfg, control, EdgeKind::LoopExit);
        if !self.visited.insert(control) {
            return Err(self.ambiguous(control));
        }

        let body = if body_start == control {
            Vec::new()
        } else {
            let mut members = self.dominated_by(body_start);
            members.insert(control);
            let ctx = LoopCtx {
                exit,
                body: members,
                latch: None,
            };
            self.region(body_start, Some(control), Some(&ctx), false)?
        };
        Ok((
            ControlNode::GenericFor {
                base,
                var_count,
                iterators,
                control,
                body,
            },
            exit,
        ))
    }
}
