use petgraph::stable_graph::NodeIndex;

use codlua_bytecode::constant::Constant;
use codlua_bytecode::function::Function;
use codlua_hir::arena::{ExprArena, ExprId};
use codlua_hir::expr::HirExpr;
use codlua_hir::func::HirFunc;
use codlua_hir::stmt::{HirStmt, LValue};

/// Fold stores that directly follow a table constructor into it.
///
/// Recognizes:
///   r = {}
///   r[k1] = v1
///   r.name = v2
///   r[1], r[2] = a, b      (list store)
///
/// and rewrites `r` into a single constructor. Folding stops at the first
/// statement that is not a store into `r`, or whose key or value reads `r`.
pub fn fold_table_constructors(func: &mut HirFunc, proto: &Function) -> usize {
    let mut changed = 0;
    for node in func.blocks_in_pc_order() {
        for i in 0..func.cfg[node].stmts.len() {
            changed += absorb_stores(func, proto, node, i);
        }
    }
    changed
}

enum Entry {
    Positional(Vec<ExprId>),
    Keyed(ExprId, ExprId),
}

fn absorb_stores(func: &mut HirFunc, proto: &Function, node: NodeIndex, i: usize) -> usize {
    let Some(&HirStmt::RegAssign { target, value }) = func.cfg[node].stmts.get(i) else {
        return 0;
    };
    if !matches!(func.exprs.get(value), HirExpr::Table { .. }) {
        return 0;
    }

    let mut absorbed = 0;
    while let Some(next) = func.cfg[node].stmts.get(i + 1) {
        let Some(entry) = table_entry(func, proto, next, target.register, value) else {
            break;
        };
        func.cfg[node].stmts.remove(i + 1);
        if let HirExpr::Table { array, hash } = func.exprs.get_mut(value) {
            match entry {
                Entry::Positional(values) => array.extend(values),
                Entry::Keyed(k, v) => hash.push((k, v)),
            }
        }
        absorbed += 1;
    }
    if absorbed > 0 {
        log::trace!("folded {absorbed} stores into table r{}", target.register);
    }
    absorbed
}

fn table_entry(
    func: &HirFunc,
    proto: &Function,
    stmt: &HirStmt,
    r: u8,
    table: ExprId,
) -> Option<Entry> {
    let arena = &func.exprs;
    let HirExpr::Table { array, hash } = arena.get(table) else {
        return None;
    };
    // After an open tail the array length is unknown.
    if array.last().map_or(false, |last| func.open_reads.contains(last)) {
        return None;
    }

    match stmt {
        HirStmt::SetList {
            table: t,
            first_index,
            values,
        } if t.register == r => {
            if *first_index as usize != array.len() + 1
                || values.iter().any(|v| reads_register(arena, *v, r))
            {
                return None;
            }
            Some(Entry::Positional(values.clone()))
        }
        HirStmt::Assign {
            target: LValue::Index { table: t, key },
            value,
        } => {
            if arena.get(*t).as_register().map(|x| x.register) != Some(r)
                || !arena.is_pure(*key)
                || reads_register(arena, *key, r)
                || reads_register(arena, *value, r)
            {
                return None;
            }
            match integer_key(arena, proto, *key) {
                // Positional items are stored last, so they would win.
                Some(n) if n >= 1 && n as usize <= array.len() => None,
                Some(n)
                    if n as usize == array.len() + 1
                        && hash.is_empty()
                        && !arena.get(*value).is_multi_value() =>
                {
                    Some(Entry::Positional(vec![*value]))
                }
                _ => Some(Entry::Keyed(*key, *value)),
            }
        }
        _ => None,
    }
}

fn reads_register(arena: &ExprArena, root: ExprId, r: u8) -> bool {
    let mut reads = Vec::new();
    arena.register_reads(root, &mut reads);
    reads
        .iter()
        .any(|id| arena.get(*id).as_register().map(|x| x.register) == Some(r))
}

/// The key as an integer, when it is an integral numeric constant.
pub(crate) fn integer_key(arena: &ExprArena, proto: &Function, key: ExprId) -> Option<i64> {
    let constant = match arena.get(key) {
        HirExpr::Literal(c) => c,
        HirExpr::ConstantRef(k) => proto.constant(*k)?,
        _ => return None,
    };
    match *constant {
        Constant::Integer(n) => Some(n),
        Constant::Float(f) if f.fract() == 0.0 && f.abs() < 9.007_199_254_740_992e15 => {
            Some(f as i64)
        }
        _ => None,
    }
}
