//! Evaluation-order view of statements, used to decide whether moving an
//! expression into a later slot can be observed.

use codlua_hir::arena::{ExprArena, ExprId};
use codlua_hir::cfg::Terminator;
use codlua_hir::expr::HirExpr;
use codlua_hir::stmt::HirStmt;

/// How much of the program state an expression depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Effect {
    /// Registers, constants and closures only.
    Pure,
    /// Also reads globals, upvalues or table slots.
    ReadsState,
    /// Performs a call.
    Calls,
}

pub(crate) fn effect_of(arena: &ExprArena, id: ExprId) -> Effect {
    if arena.contains_call(id) {
        Effect::Calls
    } else if arena.is_pure(id) {
        Effect::Pure
    } else {
        Effect::ReadsState
    }
}

/// One step of evaluating a statement, in the order the VM performs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Event {
    /// A register read. `tail` marks the last slot of a value list, where a
    /// multi-value expression would expand.
    Read { id: ExprId, tail: bool },
    StateRead,
    Call,
}

pub(crate) fn stmt_events(arena: &ExprArena, stmt: &HirStmt) -> Vec<Event> {
    let mut out = Vec::new();
    match stmt {
        HirStmt::SetList { values, .. } => walk_list(arena, values, &mut out),
        _ => {
            for root in stmt.expr_roots() {
                walk(arena, root, false, &mut out);
            }
        }
    }
    out
}

pub(crate) fn terminator_events(arena: &ExprArena, terminator: &Terminator) -> Vec<Event> {
    let mut out = Vec::new();
    match terminator {
        Terminator::Return(values) => walk_list(arena, values, &mut out),
        Terminator::ForGenPrep { iterators, .. } => walk_list(arena, iterators, &mut out),
        other => {
            for root in other.expr_roots() {
                walk(arena, root, false, &mut out);
            }
        }
    }
    out
}

fn walk_list(arena: &ExprArena, items: &[ExprId], out: &mut Vec<Event>) {
    let last = items.len().saturating_sub(1);
    for (i, item) in items.iter().enumerate() {
        walk(arena, *item, i == last, out);
    }
}

fn walk(arena: &ExprArena, id: ExprId, tail: bool, out: &mut Vec<Event>) {
    match arena.get(id) {
        HirExpr::Register(_) => out.push(Event::Read { id, tail }),
        HirExpr::Global(_) | HirExpr::Upvalue(_) => out.push(Event::StateRead),
        HirExpr::Index { table, key } => {
            walk(arena, *table, false, out);
            walk(arena, *key, false, out);
            out.push(Event::StateRead);
        }
        HirExpr::Call { func: callee, args } | HirExpr::MethodCall { callee, args } => {
            walk(arena, *callee, false, out);
            walk_list(arena, args, out);
            out.push(Event::Call);
        }
        HirExpr::Table { array, hash } => {
            if hash.is_empty() {
                walk_list(arena, array, out);
            } else {
                for item in array {
                    walk(arena, *item, false, out);
                }
            }
            for (k, v) in hash {
                walk(arena, *k, false, out);
                walk(arena, *v, false, out);
            }
        }
        other => {
            for child in other.children() {
                walk(arena, child, false, out);
            }
        }
    }
}

/// True if a statement neither writes observable state nor reads it.
pub(crate) fn stmt_is_local(arena: &ExprArena, stmt: &HirStmt) -> bool {
    !stmt.has_side_effects(arena) && stmt.expr_roots().iter().all(|e| arena.is_pure(*e))
}
