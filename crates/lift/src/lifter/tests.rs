use codlua_bytecode::constant::{Constant, TableTemplate};
use codlua_bytecode::function::Function;
use codlua_bytecode::instruction::{CmpOp, ConstIdx, Literal, Op, Operand, Reg};

use codlua_hir::cfg::{successor_of_kind, EdgeKind, Terminator};
use codlua_hir::expr::HirExpr;
use codlua_hir::func::HirFunc;
use codlua_hir::stmt::HirStmt;
use codlua_hir::types::{BinOp, UnOp};

use super::build_cfg;
use crate::CfgError;

fn function(instructions: Vec<Op>, constants: Vec<Constant>) -> Function {
    Function {
        instructions,
        constants,
        max_registers: 8,
        ..Function::default()
    }
}

fn ret(first: u8, count: Option<u8>) -> Op {
    Op::Return {
        first: Reg(first),
        count,
    }
}

fn load_int(dst: u8, v: i64) -> Op {
    Op::Load {
        dst: Reg(dst),
        value: Operand::Lit(Literal::Int(v)),
    }
}

fn block_at(hir: &HirFunc, pc: usize) -> petgraph::stable_graph::NodeIndex {
    hir.block_at[&pc]
}

#[test]
fn return_constant() {
    let f = function(
        vec![
            Op::Load {
                dst: Reg(0),
                value: Operand::Const(ConstIdx(0)),
            },
            ret(0, Some(1)),
        ],
        vec![Constant::Integer(1)],
    );
    let hir = build_cfg(&f).unwrap();
    assert_eq!(hir.cfg.node_count(), 1);
    let entry = &hir.cfg[hir.entry];
    assert_eq!(entry.stmts.len(), 1);
    let HirStmt::RegAssign { target, value } = &entry.stmts[0] else {
        panic!("expected register assignment");
    };
    assert_eq!(target.register, 0);
    assert_eq!(*hir.exprs.get(*value), HirExpr::ConstantRef(ConstIdx(0)));
    let Terminator::Return(values) = &entry.terminator else {
        panic!("expected return");
    };
    assert_eq!(values.len(), 1);
}

#[test]
fn comparison_branch_falls_through_on_the_inverse() {
    // if r0 < r1 then <2> else <4>
    let f = function(
        vec![
            Op::Compare {
                op: CmpOp::Lt,
                lhs: Operand::Reg(Reg(0)),
                rhs: Operand::Reg(Reg(1)),
                jump_when: false,
            },
            Op::Jump { target: 4 },
            load_int(2, 1),
            Op::Jump { target: 5 },
            load_int(2, 2),
            ret(0, Some(0)),
        ],
        vec![],
    );
    let hir = build_cfg(&f).unwrap();
    let entry = hir.entry;
    let Terminator::Branch { condition } = hir.cfg[entry].terminator else {
        panic!("expected branch");
    };
    assert!(matches!(
        hir.exprs.get(condition),
        HirExpr::Binary { op: BinOp::Lt, .. }
    ));
    assert_eq!(
        successor_of_kind(&hir.cfg, entry, EdgeKind::Then),
        Some(block_at(&hir, 2))
    );
    assert_eq!(
        successor_of_kind(&hir.cfg, entry, EdgeKind::Else),
        Some(block_at(&hir, 4))
    );

    // jump_when = true flips the comparison.
    let mut g = f.clone();
    g.instructions[0] = Op::Compare {
        op: CmpOp::Le,
        lhs: Operand::Reg(Reg(0)),
        rhs: Operand::Reg(Reg(1)),
        jump_when: true,
    };
    let hir = build_cfg(&g).unwrap();
    let Terminator::Branch { condition } = hir.cfg[hir.entry].terminator else {
        panic!("expected branch");
    };
    assert!(matches!(
        hir.exprs.get(condition),
        HirExpr::Binary { op: BinOp::Gt, .. }
    ));
}

#[test]
fn unreachable_blocks_are_dropped() {
    let f = function(vec![ret(0, Some(0)), load_int(0, 1), ret(0, Some(1))], vec![]);
    let hir = build_cfg(&f).unwrap();
    assert_eq!(hir.cfg.node_count(), 1);
    assert!(!hir.block_at.contains_key(&1));
}

#[test]
fn self_lookup_becomes_method_call() {
    let f = function(
        vec![
            Op::SelfLookup {
                dst: Reg(1),
                object: Reg(0),
                method: Operand::Const(ConstIdx(0)),
            },
            load_int(3, 7),
            Op::Call {
                func: Reg(1),
                first_arg: Reg(2),
                args: Some(2),
                results: Some(0),
            },
            ret(0, Some(0)),
        ],
        vec![Constant::String(b"update".to_vec())],
    );
    let hir = build_cfg(&f).unwrap();
    let stmts = &hir.cfg[hir.entry].stmts;
    assert_eq!(stmts.len(), 3);
    let HirStmt::ExprStmt(call) = stmts[2] else {
        panic!("expected call statement");
    };
    let HirExpr::MethodCall { args, .. } = hir.exprs.get(call) else {
        panic!("expected method call");
    };
    assert_eq!(args.len(), 1);
    assert!(matches!(hir.exprs.get(args[0]), HirExpr::Register(r) if r.register == 3));
}

#[test]
fn open_results_feed_the_next_consumer() {
    let f = function(
        vec![
            Op::Call {
                func: Reg(0),
                first_arg: Reg(1),
                args: Some(0),
                results: None,
            },
            ret(0, None),
        ],
        vec![],
    );
    let hir = build_cfg(&f).unwrap();
    let Terminator::Return(values) = &hir.cfg[hir.entry].terminator else {
        panic!("expected return");
    };
    assert_eq!(values.len(), 1);
    assert!(matches!(hir.exprs.get(values[0]), HirExpr::Register(r) if r.register == 0));
}

#[test]
fn test_with_copy_assigns_before_branching() {
    let f = function(
        vec![
            Op::Test {
                value: Reg(0),
                copy_to: Some(Reg(1)),
                jump_when: true,
            },
            Op::Jump { target: 3 },
            Op::Move {
                dst: Reg(1),
                src: Reg(2),
            },
            ret(1, Some(1)),
        ],
        vec![],
    );
    let hir = build_cfg(&f).unwrap();
    let entry = &hir.cfg[hir.entry];
    assert!(matches!(
        entry.stmts[0],
        HirStmt::RegAssign { target, .. } if target.register == 1
    ));
    let Terminator::Branch { condition } = entry.terminator else {
        panic!("expected branch");
    };
    let HirExpr::Unary { op: UnOp::Not, operand } = hir.exprs.get(condition) else {
        panic!("expected negated test");
    };
    assert!(matches!(hir.exprs.get(*operand), HirExpr::Register(r) if r.register == 1));
}

#[test]
fn numeric_loop_edges() {
    let f = function(
        vec![
            load_int(0, 1),
            load_int(1, 3),
            load_int(2, 1),
            Op::ForNumPrep {
                base: Reg(0),
                loop_pc: 5,
            },
            Op::Move {
                dst: Reg(5),
                src: Reg(3),
            },
            Op::ForNumLoop {
                base: Reg(0),
                body: 4,
            },
            ret(0, Some(0)),
        ],
        vec![],
    );
    let hir = build_cfg(&f).unwrap();
    let prep = hir.entry;
    assert!(matches!(
        hir.cfg[prep].terminator,
        Terminator::ForNumPrep { base: 0, loop_pc: 5, .. }
    ));
    assert_eq!(
        successor_of_kind(&hir.cfg, prep, EdgeKind::Unconditional),
        Some(block_at(&hir, 4))
    );
    assert_eq!(
        successor_of_kind(&hir.cfg, prep, EdgeKind::LoopExit),
        Some(block_at(&hir, 6))
    );
    let step = block_at(&hir, 5);
    assert_eq!(hir.cfg[step].terminator, Terminator::ForNumBack { base: 0 });
    assert_eq!(
        successor_of_kind(&hir.cfg, step, EdgeKind::LoopBack),
        Some(block_at(&hir, 4))
    );
}

#[test]
fn generic_loop_setup_is_recognized() {
    let f = function(
        vec![
            Op::Jump { target: 2 },
            Op::Move {
                dst: Reg(6),
                src: Reg(3),
            },
            Op::ForGenCall {
                base: Reg(0),
                vars: 2,
            },
            Op::ForGenLoop {
                base: Reg(0),
                body: 1,
            },
            ret(0, Some(0)),
        ],
        vec![],
    );
    let hir = build_cfg(&f).unwrap();
    let Terminator::ForGenPrep { base, iterators } = &hir.cfg[hir.entry].terminator else {
        panic!("expected generic-for setup");
    };
    assert_eq!(*base, 0);
    assert_eq!(iterators.len(), 3);
    let control = block_at(&hir, 2);
    assert_eq!(
        hir.cfg[control].terminator,
        Terminator::ForGenBack {
            base: 0,
            var_count: 2
        }
    );
    assert_eq!(
        successor_of_kind(&hir.cfg, control, EdgeKind::LoopExit),
        Some(block_at(&hir, 4))
    );
    // The body falls through into the loop control block.
    assert_eq!(
        successor_of_kind(&hir.cfg, block_at(&hir, 1), EdgeKind::Unconditional),
        Some(control)
    );
}

#[test]
fn template_tables_expand() {
    let template = TableTemplate {
        array: vec![Constant::Nil, Constant::Integer(1), Constant::Integer(2)],
        hash: vec![(Constant::String(b"x".to_vec()), Constant::Boolean(true))],
    };
    let f = function(
        vec![
            Op::NewTable {
                dst: Reg(0),
                template: Some(ConstIdx(0)),
            },
            ret(0, Some(1)),
        ],
        vec![Constant::Table(template)],
    );
    let hir = build_cfg(&f).unwrap();
    let HirStmt::RegAssign { value, .. } = hir.cfg[hir.entry].stmts[0] else {
        panic!("expected table assignment");
    };
    let HirExpr::Table { array, hash } = hir.exprs.get(value) else {
        panic!("expected table");
    };
    assert_eq!(array.len(), 2);
    assert_eq!(hash.len(), 1);
}

#[test]
fn bad_constant_is_an_error() {
    let f = function(
        vec![
            Op::GetGlobal {
                dst: Reg(0),
                name: ConstIdx(3),
            },
            ret(0, Some(0)),
        ],
        vec![],
    );
    assert_eq!(
        build_cfg(&f).unwrap_err(),
        CfgError::BadConstant { pc: 0, index: 3 }
    );
}

#[test]
fn empty_function_has_one_block() {
    let hir = build_cfg(&Function::default()).unwrap();
    assert_eq!(hir.cfg.node_count(), 1);
    assert_eq!(hir.cfg[hir.entry].terminator, Terminator::None);
}
