use codlua_bytecode::constant::Constant;
use codlua_bytecode::function::{DebugInfo, Function};
use codlua_bytecode::instruction::{ConstIdx, Op, Operand, ProtoIdx, Reg};
use codlua_bytecode::scope_tree::{LocalScope, ScopeTree};
use codlua_hash::PackageIndex;

use crate::{emit_chunk, EmitOptions, Lowered, LoweredFunction};

fn lower<'a>(proto: &'a Function, counter: &mut usize) -> LoweredFunction<'a> {
    let index = *counter;
    *counter += 1;
    let body = codlua_lift::build_cfg(proto)
        .map(|mut hir| {
            codlua_structure::fold_short_circuits(&mut hir, proto);
            let tree = codlua_structure::structure_function(&mut hir);
            Lowered { hir, tree }
        })
        .map_err(|e| e.to_string());
    let children = proto.children.iter().map(|c| lower(c, counter)).collect();
    LoweredFunction {
        proto,
        index,
        body,
        children,
    }
}

fn render_with(proto: &Function, options: &EmitOptions, index: Option<&PackageIndex>) -> String {
    let mut counter = 0;
    let root = lower(proto, &mut counter);
    emit_chunk(
        &root,
        options,
        index.map(|i| i as &dyn codlua_hash::HashResolver),
    )
}

fn render(proto: &Function) -> String {
    render_with(proto, &EmitOptions::default(), None)
}

fn function(instructions: Vec<Op>, constants: Vec<Constant>) -> Function {
    Function {
        instructions,
        constants,
        max_registers: 16,
        ..Function::default()
    }
}

fn string(s: &str) -> Constant {
    Constant::String(s.as_bytes().to_vec())
}

fn k(i: u32) -> Operand {
    Operand::Const(ConstIdx(i))
}

fn ret(first: u8, count: u8) -> Op {
    Op::Return {
        first: Reg(first),
        count: Some(count),
    }
}

fn global(dst: u8, name: u32) -> Op {
    Op::GetGlobal {
        dst: Reg(dst),
        name: ConstIdx(name),
    }
}

fn call(func: u8, args: u8) -> Op {
    Op::Call {
        func: Reg(func),
        first_arg: Reg(func + 1),
        args: Some(args),
        results: Some(0),
    }
}

#[test]
fn returns_a_constant() {
    let main = function(
        vec![
            Op::Load {
                dst: Reg(0),
                value: k(0),
            },
            ret(0, 1),
            ret(0, 0),
        ],
        vec![Constant::Float(1.0)],
    );
    assert_eq!(render(&main), "return 1\n");
}

#[test]
fn if_else_with_calls() {
    let main = function(
        vec![
            global(0, 0),
            Op::Test {
                value: Reg(0),
                copy_to: None,
                jump_when: false,
            },
            Op::Jump { target: 7 },
            global(0, 1),
            Op::Load {
                dst: Reg(1),
                value: k(2),
            },
            call(0, 1),
            Op::Jump { target: 10 },
            global(0, 1),
            Op::Load {
                dst: Reg(1),
                value: k(3),
            },
            call(0, 1),
            ret(0, 0),
        ],
        vec![
            string("x"),
            string("print"),
            Constant::Float(1.0),
            Constant::Float(2.0),
        ],
    );
    assert_eq!(
        render(&main),
        "if x then\n    print(1)\nelse\n    print(2)\nend\n"
    );
}

#[test]
fn numeric_for_omits_a_unit_step() {
    let main = function(
        vec![
            Op::Load {
                dst: Reg(0),
                value: k(1),
            },
            Op::Load {
                dst: Reg(1),
                value: k(2),
            },
            Op::Load {
                dst: Reg(2),
                value: k(1),
            },
            Op::ForNumPrep {
                base: Reg(0),
                loop_pc: 7,
            },
            global(4, 0),
            Op::Move {
                dst: Reg(5),
                src: Reg(3),
            },
            call(4, 1),
            Op::ForNumLoop {
                base: Reg(0),
                body: 4,
            },
            ret(0, 0),
        ],
        vec![string("print"), Constant::Float(1.0), Constant::Float(10.0)],
    );
    assert_eq!(
        render(&main),
        "for var_3 = 1, 10 do\n    print(var_3)\nend\n"
    );
}

#[test]
fn register_written_in_a_branch_is_declared_before_it() {
    let main = function(
        vec![
            global(0, 0),
            Op::Test {
                value: Reg(0),
                copy_to: None,
                jump_when: false,
            },
            Op::Jump { target: 4 },
            global(1, 1),
            ret(1, 1),
        ],
        vec![string("x"), string("b")],
    );
    assert_eq!(
        render(&main),
        "local var_1\nif x then\n    var_1 = b\nend\nreturn var_1\n"
    );
}

#[test]
fn global_closure_prints_as_a_function_statement() {
    let child = function(
        vec![
            Op::Load {
                dst: Reg(0),
                value: k(0),
            },
            ret(0, 1),
            ret(0, 0),
        ],
        vec![Constant::Float(1.0)],
    );
    let mut main = function(
        vec![
            Op::Closure {
                dst: Reg(0),
                proto: ProtoIdx(0),
            },
            Op::SetGlobal {
                name: ConstIdx(0),
                value: Reg(0),
            },
            ret(0, 0),
        ],
        vec![string("f")],
    );
    main.children.push(child);
    assert_eq!(render(&main), "function f()\n    return 1\nend\n");
}

#[test]
fn self_parameter_makes_a_method_definition() {
    let mut child = function(vec![ret(0, 1), ret(0, 0)], Vec::new());
    child.num_params = 1;
    child.debug = Some(DebugInfo {
        lines: Vec::new(),
        scopes: ScopeTree::new(vec![LocalScope {
            register: 0,
            name: "self".to_string(),
            pc_range: 0..2,
        }]),
        upvalue_names: Vec::new(),
    });
    let mut main = function(
        vec![
            global(0, 0),
            Op::Closure {
                dst: Reg(1),
                proto: ProtoIdx(0),
            },
            Op::SetIndex {
                table: Reg(0),
                key: k(1),
                value: Operand::Reg(Reg(1)),
            },
            ret(0, 0),
        ],
        vec![string("Obj"), string("go")],
    );
    main.children.push(child);
    assert_eq!(render(&main), "function Obj:go()\n    return self\nend\n");
}

#[test]
fn failed_child_leaves_a_placeholder() {
    let child = function(vec![Op::Jump { target: 99 }, ret(0, 0)], Vec::new());
    let mut main = function(
        vec![
            Op::Closure {
                dst: Reg(0),
                proto: ProtoIdx(0),
            },
            Op::SetGlobal {
                name: ConstIdx(0),
                value: Reg(0),
            },
            ret(0, 0),
        ],
        vec![string("broken")],
    );
    main.children.push(child);
    let text = render(&main);
    assert!(text.starts_with("function broken(...) --[[ decompilation failed:"), "{text}");
    assert!(text.contains("99"), "{text}");
}

#[test]
fn failed_main_function_is_a_comment() {
    let main = function(vec![Op::Jump { target: -5 }], Vec::new());
    assert!(render(&main).starts_with("-- decompilation failed:"));
}

#[test]
fn hashes_show_their_resolved_names() {
    let main = function(
        vec![
            Op::Load {
                dst: Reg(0),
                value: k(0),
            },
            ret(0, 1),
            ret(0, 0),
        ],
        vec![Constant::UInt64(0xABC)],
    );
    let mut index = PackageIndex::new(u64::MAX);
    index.insert(0xABC, "weapon_name", "strings");

    assert_eq!(render(&main), "return 0xABCULL\n");
    assert_eq!(
        render_with(&main, &EmitOptions::default(), Some(&index)),
        "return 0xABCULL --[[ weapon_name ]]\n"
    );

    let typed = EmitOptions {
        show_hash_type: true,
        ..EmitOptions::default()
    };
    assert_eq!(
        render_with(&main, &typed, Some(&index)),
        "return --[[strings]]0xABCULL --[[ weapon_name ]]\n"
    );
    assert_eq!(render_with(&main, &typed, None), "return --[[hash]]0xABCULL\n");
}

#[test]
fn strings_are_escaped() {
    let main = function(
        vec![
            Op::Load {
                dst: Reg(0),
                value: k(0),
            },
            ret(0, 1),
            ret(0, 0),
        ],
        vec![Constant::String(b"a\"b\\\n\x01".to_vec())],
    );
    assert_eq!(render(&main), "return \"a\\\"b\\\\\\n\\001\"\n");
}

#[test]
fn function_stats_precede_each_body() {
    let child = function(vec![ret(0, 0)], Vec::new());
    let mut main = function(
        vec![
            Op::Closure {
                dst: Reg(0),
                proto: ProtoIdx(0),
            },
            Op::SetGlobal {
                name: ConstIdx(0),
                value: Reg(0),
            },
            ret(0, 0),
        ],
        vec![string("f")],
    );
    main.children.push(child);
    let options = EmitOptions {
        function_stats: true,
        ..EmitOptions::default()
    };
    let text = render_with(&main, &options, None);
    let lines: Vec<&str> = text.lines().collect();
    assert!(lines[0].starts_with("-- function #0 | params: 0"), "{text}");
    assert!(lines[0].ends_with("instructions: 3 | constants: 1"), "{text}");
    assert_eq!(lines[1], "function f()");
    assert!(lines[2].starts_with("    -- function #1 |"), "{text}");
    assert_eq!(lines[3], "end");
}
