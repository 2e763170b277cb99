//! Unstructured layout: blocks in pc order joined by labels and gotos.

use petgraph::stable_graph::NodeIndex;
use rustc_hash::FxHashSet;

use codlua_hir::cfg::{successor_of_kind, sorted_successors, EdgeKind, Terminator};
use codlua_hir::control::ControlNode;
use codlua_hir::func::HirFunc;

use crate::StructureError;

/// Lay `func` out flat. Every block appears once, in pc order; control
/// transfers that are not fallthroughs become `goto`. The layout opens
/// with a comment naming why structuring gave up.
pub fn flatten(func: &mut HirFunc, cause: &StructureError) -> ControlNode {
    let order = func.blocks_in_pc_order();
    let pc_of = |func: &HirFunc, n: NodeIndex| func.cfg[n].pc_range.0;
    let mut body = vec![ControlNode::Comment(format!("unstructured control flow: {cause}"))];

    for (i, &node) in order.iter().enumerate() {
        let next = order.get(i + 1).copied();
        body.push(ControlNode::Block(node));
        let cfg = &func.cfg;
        let goto = |target: NodeIndex| ControlNode::Goto(cfg[target].pc_range.0);
        match cfg[node].terminator.clone() {
            Terminator::None => {}
            Terminator::Return(values) => body.push(ControlNode::Return(values)),
            Terminator::Jump => {
                if let Some(target) = sorted_successors(cfg, node).first().copied() {
                    if Some(target) != next {
                        body.push(goto(target));
                    }
                }
            }
            Terminator::Branch { condition } => {
                let then_n = successor_of_kind(cfg, node, EdgeKind::Then);
                let else_n = successor_of_kind(cfg, node, EdgeKind::Else);
                let (Some(then_n), Some(else_n)) = (then_n, else_n) else {
                    continue;
                };
                let (then_goto, else_goto) = (goto(then_n), goto(else_n));
                if Some(then_n) == next {
                    let condition = func.exprs.negate_condition(condition);
                    body.push(ControlNode::If {
                        condition,
                        then_body: vec![else_goto],
                        else_body: Vec::new(),
                    });
                } else {
                    body.push(ControlNode::If {
                        condition,
                        then_body: vec![then_goto],
                        else_body: Vec::new(),
                    });
                    if Some(else_n) != next {
                        body.push(else_goto);
                    }
                }
            }
            term => {
                let targets: Vec<String> = sorted_successors(cfg, node)
                    .into_iter()
                    .map(|s| format!("pc {}", pc_of(func, s)))
                    .collect();
                body.push(ControlNode::Comment(format!(
                    "{} -> {}",
                    loop_step_name(&term),
                    targets.join(", ")
                )));
            }
        }
    }

    // A label in front of each block some goto lands on.
    let mut targets = FxHashSet::default();
    for node in &body {
        collect_goto_targets(node, &mut targets);
    }
    let mut labelled = Vec::with_capacity(body.len() + targets.len());
    for node in body {
        if let ControlNode::Block(n) = node {
            let pc = pc_of(func, n);
            if targets.contains(&pc) {
                labelled.push(ControlNode::Label(pc));
            }
        }
        labelled.push(node);
    }
    ControlNode::Sequence(labelled)
}

fn loop_step_name(term: &Terminator) -> &'static str {
    match term {
        Terminator::ForNumPrep { .. } => "numeric for setup",
        Terminator::ForNumBack { .. } => "numeric for step",
        Terminator::ForGenPrep { .. } => "generic for setup",
        _ => "generic for step",
    }
}

fn collect_goto_targets(node: &ControlNode, out: &mut FxHashSet<usize>) {
    match node {
        ControlNode::Goto(pc) => {
            out.insert(*pc);
        }
        ControlNode::If {
            then_body,
            else_body,
            ..
        } => {
            for n in then_body.iter().chain(else_body) {
                collect_goto_targets(n, out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codlua_bytecode::function::Function;
    use codlua_bytecode::instruction::{Op, Operand, Reg};

    #[test]
    fn every_block_appears_once_with_labels_for_targets() {
        // if r0 then r1 = 1 end; return r1
        let proto = Function {
            instructions: vec![
                Op::Test {
                    value: Reg(0),
                    copy_to: None,
                    jump_when: false,
                },
                Op::Jump { target: 3 },
                Op::Load {
                    dst: Reg(1),
                    value: Operand::Lit(codlua_bytecode::instruction::Literal::Int(1)),
                },
                Op::Return {
                    first: Reg(1),
                    count: Some(1),
                },
            ],
            num_params: 1,
            max_registers: 2,
            ..Function::default()
        };
        let mut func = codlua_lift::build_cfg(&proto).unwrap();
        let tree = flatten(&mut func, &StructureError::AmbiguousControlShape { pc: 0 });
        let mut blocks = tree.blocks();
        let total = blocks.len();
        blocks.sort();
        blocks.dedup();
        assert_eq!(blocks.len(), total);
        assert_eq!(total, func.cfg.node_count());
        assert!(tree.has_gotos());

        let ControlNode::Sequence(items) = &tree else {
            panic!("expected a sequence");
        };
        let label = items.iter().position(|n| matches!(n, ControlNode::Label(3)));
        let target = items
            .iter()
            .position(|n| matches!(n, ControlNode::Block(b) if func.cfg[*b].pc_range.0 == 3));
        assert_eq!(label.map(|l| l + 1), target);
        assert!(matches!(
            &items[0],
            ControlNode::Comment(text) if text == "unstructured control flow: ambiguous control shape at pc 0"
        ));
    }
}
