use petgraph::stable_graph::NodeIndex;

use codlua_hir::arena::ExprId;
use codlua_hir::cfg::EdgeKind;
use codlua_hir::control::ControlNode;

use super::cfg_helpers::{branch_always_returns, find_join_point, successor};
use super::{LoopCtx, Structurer};
use crate::StructureError;

impl<'a> Structurer<'a> {
    /// Structure an if/else at `node`; returns where the region continues.
    pub(super) fn structure_branch(
        &mut self,
        node: NodeIndex,
        condition: ExprId,
        stop: Option<NodeIndex>,
        ctx: Option<&LoopCtx>,
        out: &mut Vec<ControlNode>,
    ) -> Result<Option<NodeIndex>, StructureError> {
        let cfg = self.cfg;
        let (Some(then_n), Some(else_n)) = (
            successor(cfg, node, EdgeKind::Then),
            successor(cfg, node, EdgeKind::Else),
        ) else {
            return Err(self.ambiguous(node));
        };

        if then_n == else_n {
            out.push(ControlNode::If {
                condition,
                then_body: Vec::new(),
                else_body: Vec::new(),
            });
            return Ok(Some(then_n));
        }

        if let Some(ctx) = ctx {
            // if cond then break end
            if Some(then_n) == ctx.exit && Some(then_n) != stop {
                out.push(ControlNode::If {
                    condition,
                    then_body: vec![ControlNode::Break],
                    else_body: Vec::new(),
                });
                return Ok(Some(else_n));
            }
            if Some(else_n) == ctx.exit && Some(else_n) != stop {
                let condition = self.exprs.negate_condition(condition);
                out.push(ControlNode::If {
                    condition,
                    then_body: vec![ControlNode::Break],
                    else_body: Vec::new(),
                });
                return Ok(Some(then_n));
            }
        }

        let join = self.join_point(node, then_n, else_n, stop, ctx);
        let arm_stop = join.or(stop);
        let then_body = self.region(then_n, arm_stop, ctx, false)?;
        let else_body = self.region(else_n, arm_stop, ctx, false)?;

        if then_body.is_empty() && !else_body.is_empty() {
            let condition = self.exprs.negate_condition(condition);
            out.push(ControlNode::If {
                condition,
                then_body: else_body,
                else_body: Vec::new(),
            });
        } else {
            out.push(ControlNode::If {
                condition,
                then_body,
                else_body,
            });
        }
        Ok(join)
    }

    fn join_point(
        &self,
        node: NodeIndex,
        then_n: NodeIndex,
        else_n: NodeIndex,
        stop: Option<NodeIndex>,
        ctx: Option<&LoopCtx>,
    ) -> Option<NodeIndex> {
        let cfg = self.cfg;
        let leave = ctx.and_then(|c| c.exit);
        let join = self
            .pdom
            .ipdom(node)
            .or_else(|| find_join_point(cfg, then_n, else_n, stop, &self.back_edges))
            .or_else(|| {
                // One arm leaves for good; the other is the continuation.
                let then_leaves = branch_always_returns(cfg, then_n, stop, leave, &self.back_edges);
                let else_leaves = branch_always_returns(cfg, else_n, stop, leave, &self.back_edges);
                match (then_leaves, else_leaves) {
                    (true, false) => Some(else_n),
                    (false, true) => Some(then_n),
                    _ => None,
                }
            })?;
        match ctx {
            Some(ctx) if !ctx.body.contains(&join) && Some(join) != ctx.exit => None,
            _ => Some(join),
        }
    }
}
