//! Expression reconstruction: turn register-level statements into nested
//! source expressions.
//!
//! Each pass rewrites blocks in place and reports how many statements it
//! changed; [`reconstruct_expressions`] runs them until nothing moves.

mod events;
mod inline;
mod liveness;
mod method_calls;
mod multi_return;
mod table_fold;

use codlua_bytecode::function::Function;
use codlua_hir::func::HirFunc;

pub use inline::inline_pass;
pub use liveness::{Liveness, RegSet};
pub use method_calls::fold_method_calls;
pub use multi_return::fold_multi_assigns;
pub use table_fold::fold_table_constructors;

/// Upper bound on full rounds; every pass strictly shrinks or rewrites, so
/// this is only reached on pathological inputs.
const MAX_ROUNDS: usize = 64;

/// Run all expression passes to a fixpoint. Returns the total number of
/// rewrites.
pub fn reconstruct_expressions(func: &mut HirFunc, proto: &Function) -> usize {
    let mut total = 0;
    for round in 0..MAX_ROUNDS {
        let live = Liveness::compute(func);
        let mut changed = inline_pass(func, proto, &live);
        changed += fold_table_constructors(func, proto);
        let live = Liveness::compute(func);
        changed += fold_multi_assigns(func, proto, &live);
        changed += fold_method_calls(func, proto);
        total += changed;
        if changed == 0 {
            log::trace!("expressions settled after {round} rounds, {total} rewrites");
            return total;
        }
    }
    log::debug!("expression passes did not settle after {MAX_ROUNDS} rounds");
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use codlua_bytecode::constant::Constant;
    use codlua_bytecode::instruction::{ConstIdx, Op, Operand, Reg};
    use codlua_hir::cfg::Terminator;
    use codlua_hir::expr::HirExpr;

    #[test]
    fn lua_jit_style_method_call_is_recovered() {
        // r1 = obj; r0 = r1.m; r1 is passed as self: return obj:m(1)
        let proto = Function {
            instructions: vec![
                Op::GetGlobal {
                    dst: Reg(0),
                    name: ConstIdx(0),
                },
                Op::GetIndex {
                    dst: Reg(1),
                    table: Reg(0),
                    key: Operand::Const(ConstIdx(1)),
                },
                Op::Move {
                    dst: Reg(2),
                    src: Reg(0),
                },
                Op::Load {
                    dst: Reg(3),
                    value: Operand::Const(ConstIdx(2)),
                },
                Op::Call {
                    func: Reg(1),
                    first_arg: Reg(2),
                    args: Some(2),
                    results: None,
                },
                Op::Return {
                    first: Reg(1),
                    count: None,
                },
            ],
            constants: vec![
                Constant::String(b"obj".to_vec()),
                Constant::String(b"m".to_vec()),
                Constant::Integer(1),
            ],
            max_registers: 4,
            ..Function::default()
        };
        let mut func = codlua_lift::build_cfg(&proto).unwrap();
        assert!(reconstruct_expressions(&mut func, &proto) > 0);

        let block = &func.cfg[func.entry];
        assert!(block.stmts.is_empty(), "left {:?}", block.stmts);
        let Terminator::Return(values) = &block.terminator else {
            panic!("expected return");
        };
        let HirExpr::MethodCall { callee, args } = func.exprs.get(values[0]) else {
            panic!("expected method call, got {:?}", func.exprs.get(values[0]));
        };
        assert_eq!(args.len(), 1);
        let HirExpr::Index { table, .. } = func.exprs.get(*callee) else {
            panic!("expected field callee");
        };
        assert_eq!(*func.exprs.get(*table), HirExpr::Global("obj".into()));
    }
}
