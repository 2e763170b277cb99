use petgraph::stable_graph::NodeIndex;
use rustc_hash::FxHashSet;

use codlua_bytecode::function::Function;
use codlua_hir::access::AccessIndex;
use codlua_hir::arena::ExprId;
use codlua_hir::expr::HirExpr;
use codlua_hir::func::HirFunc;
use codlua_hir::stmt::{HirStmt, LValue};

use crate::events::{effect_of, stmt_events, stmt_is_local, terminator_events, Effect, Event};
use crate::liveness::Liveness;

/// What to do with one register definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Plan {
    Keep,
    /// Unused pure value: delete the statement.
    Drop,
    /// Unused call: keep it as a bare call statement.
    Effect,
    /// Move the value into its single reader.
    Inline { use_id: ExprId, wrap: bool },
}

/// Fold single-use register definitions into their reader.
///
/// A definition is a temporary when:
/// - it targets a register above the parameters
/// - the definition does not initialize a named local
/// - exactly one read follows in the same block before the next write
/// - the register is not live out of the block (unless rewritten first)
///
/// The move must also be unobservable: no source register of the value may be
/// rewritten in between, and nothing that the value's effects could race with
/// (calls, stores, state reads) may run between the old and new position.
///
/// Returns the number of statements removed or rewritten.
pub fn inline_pass(func: &mut HirFunc, proto: &Function, live: &Liveness) -> usize {
    let accesses = AccessIndex::build(func);
    let mut changed = 0;
    for node in func.blocks_in_pc_order() {
        let mut i = 0;
        while i < func.cfg[node].stmts.len() {
            match plan_for(func, proto, &accesses, live, node, i) {
                Plan::Keep => i += 1,
                Plan::Drop => {
                    func.cfg[node].stmts.remove(i);
                    changed += 1;
                }
                Plan::Effect => {
                    if let HirStmt::RegAssign { value, .. } = func.cfg[node].stmts[i] {
                        func.cfg[node].stmts[i] = HirStmt::ExprStmt(value);
                    }
                    changed += 1;
                    i += 1;
                }
                Plan::Inline { use_id, wrap } => {
                    let HirStmt::RegAssign { value, .. } = func.cfg[node].stmts[i] else {
                        i += 1;
                        continue;
                    };
                    func.cfg[node].stmts.remove(i);
                    if wrap {
                        let inner = func.exprs.alloc(func.exprs.get(value).clone());
                        func.exprs.replace(use_id, HirExpr::Paren(inner));
                    } else {
                        func.exprs.copy_into(use_id, value);
                    }
                    changed += 1;
                }
            }
        }
    }
    changed
}

fn plan_for(
    func: &HirFunc,
    proto: &Function,
    accesses: &AccessIndex,
    live: &Liveness,
    node: NodeIndex,
    i: usize,
) -> Plan {
    let block = &func.cfg[node];
    let arena = &func.exprs;
    let HirStmt::RegAssign { target, value } = block.stmts[i] else {
        return Plan::Keep;
    };
    let r = target.register;
    if r < func.num_params || accesses.write_name(proto, target).is_some() {
        return Plan::Keep;
    }

    let reads_r = |events: Vec<Event>, at: usize, uses: &mut Vec<(usize, ExprId, bool)>| {
        for ev in events {
            if let Event::Read { id, tail } = ev {
                if arena.get(id).as_register().map(|x| x.register) == Some(r) {
                    uses.push((at, id, tail));
                }
            }
        }
    };

    let mut uses = Vec::new();
    let mut redefined = false;
    for (j, stmt) in block.stmts.iter().enumerate().skip(i + 1) {
        if stmt.implicit_reads().map(|t| t.register) == Some(r) {
            return Plan::Keep;
        }
        reads_r(stmt_events(arena, stmt), j, &mut uses);
        if stmt.defined_registers().iter().any(|d| d.register == r) {
            redefined = true;
            break;
        }
    }
    if !redefined {
        if block
            .terminator
            .loop_registers()
            .map_or(false, |regs| regs.contains(&r))
        {
            return Plan::Keep;
        }
        reads_r(
            terminator_events(arena, &block.terminator),
            block.stmts.len(),
            &mut uses,
        );
        if live.live_out(node).contains(r) {
            return Plan::Keep;
        }
    }

    let effect = effect_of(arena, value);
    let (pos, use_id, tail) = match uses.as_slice() {
        [] => {
            return match (effect, arena.get(value)) {
                (Effect::Pure, _) => Plan::Drop,
                (_, HirExpr::Call { .. } | HirExpr::MethodCall { .. }) => Plan::Effect,
                _ => Plan::Keep,
            };
        }
        [single] => *single,
        _ => return Plan::Keep,
    };

    // A fresh table stays put when its single reader is a store into it.
    if matches!(arena.get(value), HirExpr::Table { .. }) {
        if let Some(HirStmt::Assign {
            target: LValue::Index { table, .. },
            ..
        }) = block.stmts.get(pos)
        {
            if *table == use_id {
                return Plan::Keep;
            }
        }
    }

    let mut sources = Vec::new();
    arena.register_reads(value, &mut sources);
    let sources: FxHashSet<u8> = sources
        .iter()
        .filter_map(|id| arena.get(*id).as_register())
        .map(|r| r.register)
        .collect();

    for stmt in &block.stmts[i + 1..pos.min(block.stmts.len())] {
        if stmt
            .defined_registers()
            .iter()
            .any(|d| sources.contains(&d.register))
        {
            return Plan::Keep;
        }
        let conflicts = match effect {
            Effect::Pure => false,
            Effect::ReadsState => stmt.has_side_effects(arena),
            Effect::Calls => !stmt_is_local(arena, stmt),
        };
        if conflicts {
            return Plan::Keep;
        }
    }

    let events = match block.stmts.get(pos) {
        Some(stmt) => stmt_events(arena, stmt),
        None => terminator_events(arena, &block.terminator),
    };
    for ev in events {
        match ev {
            Event::Read { id, .. } if id == use_id => break,
            Event::Call if effect != Effect::Pure => return Plan::Keep,
            Event::StateRead if effect == Effect::Calls => return Plan::Keep,
            _ => {}
        }
    }

    let wrap = tail && !func.open_reads.contains(&use_id) && arena.get(value).is_multi_value();
    Plan::Inline { use_id, wrap }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codlua_bytecode::constant::Constant;
    use codlua_bytecode::function::Function;
    use codlua_bytecode::instruction::{ConstIdx, Op, Operand, Reg};
    use codlua_hir::cfg::Terminator;

    fn lift(ops: Vec<Op>, constants: Vec<Constant>) -> (HirFunc, Function) {
        let proto = Function {
            instructions: ops,
            constants,
            max_registers: 8,
            ..Function::default()
        };
        let hir = codlua_lift::build_cfg(&proto).unwrap();
        (hir, proto)
    }

    fn run(func: &mut HirFunc, proto: &Function) {
        while inline_pass(func, proto, &Liveness::compute(func)) > 0 {}
    }

    fn call_print(arg: u8) -> Vec<Op> {
        vec![
            Op::GetGlobal {
                dst: Reg(arg),
                name: ConstIdx(0),
            },
            Op::Load {
                dst: Reg(arg + 1),
                value: Operand::Const(ConstIdx(1)),
            },
            Op::Call {
                func: Reg(arg),
                first_arg: Reg(arg + 1),
                args: Some(1),
                results: Some(0),
            },
        ]
    }

    #[test]
    fn call_arguments_inline() {
        let mut ops = call_print(0);
        ops.push(Op::Return {
            first: Reg(0),
            count: Some(0),
        });
        let (mut func, proto) = lift(
            ops,
            vec![Constant::String(b"print".to_vec()), Constant::Integer(1)],
        );
        run(&mut func, &proto);
        let stmts = &func.cfg[func.entry].stmts;
        assert_eq!(stmts.len(), 1);
        let HirStmt::ExprStmt(call) = stmts[0] else {
            panic!("expected call statement");
        };
        let HirExpr::Call { func: callee, args } = func.exprs.get(call) else {
            panic!("expected call");
        };
        assert_eq!(*func.exprs.get(*callee), HirExpr::Global("print".into()));
        assert_eq!(*func.exprs.get(args[0]), HirExpr::ConstantRef(ConstIdx(1)));
    }

    #[test]
    fn double_reads_stay_materialized() {
        // r0 = g; return r0, r0
        let (mut func, proto) = lift(
            vec![
                Op::GetGlobal {
                    dst: Reg(0),
                    name: ConstIdx(0),
                },
                Op::Move {
                    dst: Reg(1),
                    src: Reg(0),
                },
                Op::Return {
                    first: Reg(0),
                    count: Some(2),
                },
            ],
            vec![Constant::String(b"g".to_vec())],
        );
        run(&mut func, &proto);
        // r1 = r0 folds into the return; r0 = g is read twice.
        let block = &func.cfg[func.entry];
        assert_eq!(block.stmts.len(), 1);
        assert!(matches!(block.stmts[0], HirStmt::RegAssign { target, .. } if target.register == 0));
    }

    #[test]
    fn calls_do_not_move_past_stores() {
        // r0 = f(); t.x = 1 (global store); return r0
        let (mut func, proto) = lift(
            vec![
                Op::GetGlobal {
                    dst: Reg(0),
                    name: ConstIdx(0),
                },
                Op::Call {
                    func: Reg(0),
                    first_arg: Reg(1),
                    args: Some(0),
                    results: Some(1),
                },
                Op::Load {
                    dst: Reg(1),
                    value: Operand::Const(ConstIdx(2)),
                },
                Op::SetGlobal {
                    name: ConstIdx(1),
                    value: Reg(1),
                },
                Op::Return {
                    first: Reg(0),
                    count: Some(1),
                },
            ],
            vec![
                Constant::String(b"f".to_vec()),
                Constant::String(b"x".to_vec()),
                Constant::Integer(1),
            ],
        );
        run(&mut func, &proto);
        let block = &func.cfg[func.entry];
        // f -> call folded; the call result stays because the store intervenes.
        assert_eq!(block.stmts.len(), 2);
        assert!(matches!(block.stmts[0], HirStmt::RegAssign { target, .. } if target.register == 0));
        assert!(matches!(block.stmts[1], HirStmt::Assign { .. }));
    }

    #[test]
    fn fixed_result_in_tail_position_is_parenthesized() {
        // r0 = f() (one result); return r0
        let (mut func, proto) = lift(
            vec![
                Op::GetGlobal {
                    dst: Reg(0),
                    name: ConstIdx(0),
                },
                Op::Call {
                    func: Reg(0),
                    first_arg: Reg(1),
                    args: Some(0),
                    results: Some(1),
                },
                Op::Return {
                    first: Reg(0),
                    count: Some(1),
                },
            ],
            vec![Constant::String(b"f".to_vec())],
        );
        run(&mut func, &proto);
        let Terminator::Return(values) = &func.cfg[func.entry].terminator else {
            panic!("expected return");
        };
        assert!(matches!(func.exprs.get(values[0]), HirExpr::Paren(_)));
    }

    #[test]
    fn open_result_in_tail_position_expands() {
        // return f()
        let (mut func, proto) = lift(
            vec![
                Op::GetGlobal {
                    dst: Reg(0),
                    name: ConstIdx(0),
                },
                Op::Call {
                    func: Reg(0),
                    first_arg: Reg(1),
                    args: Some(0),
                    results: None,
                },
                Op::Return {
                    first: Reg(0),
                    count: None,
                },
            ],
            vec![Constant::String(b"f".to_vec())],
        );
        run(&mut func, &proto);
        let Terminator::Return(values) = &func.cfg[func.entry].terminator else {
            panic!("expected return");
        };
        assert!(matches!(func.exprs.get(values[0]), HirExpr::Call { .. }));
        assert!(func.cfg[func.entry].stmts.is_empty());
    }

    #[test]
    fn parameters_are_never_folded() {
        let proto = Function {
            instructions: vec![
                Op::Move {
                    dst: Reg(0),
                    src: Reg(1),
                },
                Op::Return {
                    first: Reg(0),
                    count: Some(1),
                },
            ],
            num_params: 1,
            max_registers: 2,
            ..Function::default()
        };
        let mut func = codlua_lift::build_cfg(&proto).unwrap();
        run(&mut func, &proto);
        assert_eq!(func.cfg[func.entry].stmts.len(), 1);
    }
}
