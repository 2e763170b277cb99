use codlua_bytecode::function::Function;
use codlua_hir::arena::ExprArena;
use codlua_hir::expr::HirExpr;
use codlua_hir::func::HirFunc;
use codlua_hir::var::is_identifier;

/// Rewrite `t.name(t, ...)` into `t:name(...)`.
///
/// Dialects without a dedicated self-lookup instruction lower method calls
/// into a field read plus an explicit first argument; this recovers the
/// colon form when the receiver and the first argument are the same tree.
pub fn fold_method_calls(func: &mut HirFunc, proto: &Function) -> usize {
    let candidates: Vec<_> = func
        .exprs
        .ids()
        .filter(|id| is_method_shape(&func.exprs, proto, *id))
        .collect();
    for &id in &candidates {
        if let HirExpr::Call { func: callee, args } = func.exprs.get(id).clone() {
            func.exprs.replace(
                id,
                HirExpr::MethodCall {
                    callee,
                    args: args[1..].to_vec(),
                },
            );
        }
    }
    candidates.len()
}

fn is_method_shape(arena: &ExprArena, proto: &Function, id: codlua_hir::arena::ExprId) -> bool {
    let HirExpr::Call { func, args } = arena.get(id) else {
        return false;
    };
    let HirExpr::Index { table, key } = arena.get(*func) else {
        return false;
    };
    let Some(first) = args.first() else {
        return false;
    };
    let name = match arena.get(*key) {
        HirExpr::ConstantRef(k) => proto.constant(*k).and_then(|c| c.to_string_lossy()),
        _ => None,
    };
    name.map_or(false, |n| is_identifier(&n)) && arena.same_tree(*table, *first)
}

#[cfg(test)]
mod tests {
    use super::*;
    use codlua_bytecode::constant::Constant;
    use codlua_bytecode::instruction::ConstIdx;
    use codlua_hir::var::RegRef;

    fn call(arena: &mut ExprArena, key: u32, receiver: u8, first: u8) -> codlua_hir::arena::ExprId {
        let t = arena.alloc(HirExpr::Register(RegRef::new(receiver, 0)));
        let k = arena.alloc(HirExpr::ConstantRef(ConstIdx(key)));
        let callee = arena.alloc(HirExpr::Index { table: t, key: k });
        let a = arena.alloc(HirExpr::Register(RegRef::new(first, 1)));
        let b = arena.alloc(HirExpr::Literal(Constant::Integer(1)));
        arena.alloc(HirExpr::Call {
            func: callee,
            args: vec![a, b],
        })
    }

    #[test]
    fn receiver_as_first_argument_becomes_a_method_call() {
        let proto = Function {
            constants: vec![Constant::String(b"push".to_vec()), Constant::String(b"not ok".to_vec())],
            ..Function::default()
        };
        let mut func = HirFunc::new(0, false, 0);
        let method = call(&mut func.exprs, 0, 0, 0);
        let other_receiver = call(&mut func.exprs, 0, 0, 1);
        let bad_name = call(&mut func.exprs, 1, 0, 0);

        assert_eq!(fold_method_calls(&mut func, &proto), 1);
        let HirExpr::MethodCall { args, .. } = func.exprs.get(method) else {
            panic!("expected method call");
        };
        assert_eq!(args.len(), 1);
        assert!(matches!(func.exprs.get(other_receiver), HirExpr::Call { .. }));
        assert!(matches!(func.exprs.get(bad_name), HirExpr::Call { .. }));
    }
}
