//! LuaJIT 2.0/2.1 dumps and the BO6 variant.
//!
//! Prototypes are stored in post-order: every child precedes its parent and
//! the last prototype is the main function. Parents consume their children
//! from a stack through `KGC_CHILD` constant entries.

use crate::chunk::{Chunk, Dialect, LuaJitVersion};
use crate::constant::{Constant, TableTemplate};
use crate::cursor::Cursor;
use crate::function::{DebugInfo, Function};
use crate::instruction::{
    relative_target, ArithOp, CmpOp, ConstIdx, Literal, Op, Operand, ProtoIdx, Reg, UnaryOp,
    UpvalIdx,
};
use crate::opcode::LuaJitOp;
use crate::scope_tree::ScopeTree;
use crate::{ReadError, ReadOptions};

const FLAG_BE: u64 = 0x01;
const FLAG_STRIP: u64 = 0x02;
const FLAG_FR2: u64 = 0x08;
const KNOWN_FLAGS: u64 = 0x0F;

const PROTO_VARARG: u8 = 0x02;

const KGC_CHILD: u64 = 0;
const KGC_TAB: u64 = 1;
const KGC_I64: u64 = 2;
const KGC_U64: u64 = 3;
const KGC_COMPLEX: u64 = 4;
const KGC_STR: u64 = 5;

const KTAB_NIL: u64 = 0;
const KTAB_FALSE: u64 = 1;
const KTAB_TRUE: u64 = 2;
const KTAB_INT: u64 = 3;
const KTAB_NUM: u64 = 4;
const KTAB_STR: u64 = 5;

const VARNAME_END: u8 = 0;
const VARNAME_MAX: u8 = 7;
const INTERNAL_VARNAMES: [&str; 6] = [
    "(for index)",
    "(for limit)",
    "(for step)",
    "(for generator)",
    "(for state)",
    "(for control)",
];

const JUMP_BIAS: i64 = 0x8000;

/// Per-chunk settings every prototype shares.
#[derive(Debug, Clone, Copy)]
struct Layout {
    version: LuaJitVersion,
    stripped: bool,
    fr2: bool,
    name_hash: bool,
}

pub(crate) fn read(
    bytes: &[u8],
    dialect: Dialect,
    options: &ReadOptions,
) -> Result<Chunk, ReadError> {
    let mut cur = Cursor::new(bytes);
    let _magic = cur.bytes(4)?;
    let flags = cur.uleb()?;
    if flags & FLAG_BE != 0 {
        return Err(ReadError::UnsupportedDialect(
            "big-endian LuaJIT dump".into(),
        ));
    }
    if flags & !KNOWN_FLAGS != 0 {
        return Err(ReadError::MalformedHeader(format!(
            "unknown LuaJIT flags {flags:#x}"
        )));
    }
    let layout = match dialect {
        Dialect::LuaJit(version) => Layout {
            version,
            stripped: flags & FLAG_STRIP != 0,
            fr2: flags & FLAG_FR2 != 0,
            name_hash: false,
        },
        Dialect::LuaJitBo6 => Layout {
            version: LuaJitVersion::V2,
            stripped: flags & FLAG_STRIP != 0,
            fr2: flags & FLAG_FR2 != 0,
            name_hash: true,
        },
        Dialect::Lua51 => {
            return Err(ReadError::UnsupportedDialect(
                "Lua 5.1 chunk passed to the LuaJIT reader".into(),
            ))
        }
    };

    let source_name = if layout.stripped {
        None
    } else {
        let len = cur.uleb_usize()?;
        Some(String::from_utf8_lossy(cur.bytes(len)?).into_owned())
    };

    let mut stack: Vec<Function> = Vec::new();
    loop {
        let len = cur.uleb_usize()?;
        if len == 0 {
            break;
        }
        let mut body = cur.sub(len)?;
        let proto = read_proto(&mut body, &layout, options, &mut stack)?;
        stack.push(proto);
    }

    let main = stack.pop().ok_or_else(|| {
        ReadError::MalformedBody("dump contains no prototypes".into())
    })?;
    if !stack.is_empty() {
        return Err(ReadError::MalformedBody(format!(
            "{} prototypes are not owned by any parent",
            stack.len()
        )));
    }
    Ok(Chunk {
        dialect,
        source_name,
        main,
    })
}

/// Constant-pool indexing for one prototype. GC constants are addressed
/// from the end of the list; numbers follow them in [`Function::constants`].
struct Pool {
    num_kgc: u32,
    num_kn: u32,
    /// kgc file index to child ordinal.
    child_of: Vec<Option<u32>>,
}

impl Pool {
    fn gc(&self, d: u32, pc: usize) -> Result<ConstIdx, ReadError> {
        if d >= self.num_kgc {
            return Err(ReadError::MalformedBody(format!(
                "GC constant {d} out of range at pc {pc}"
            )));
        }
        Ok(ConstIdx(self.num_kgc - 1 - d))
    }

    fn num(&self, d: u32, pc: usize) -> Result<ConstIdx, ReadError> {
        if d >= self.num_kn {
            return Err(ReadError::MalformedBody(format!(
                "numeric constant {d} out of range at pc {pc}"
            )));
        }
        Ok(ConstIdx(self.num_kgc + d))
    }

    fn child(&self, d: u32, pc: usize) -> Result<ProtoIdx, ReadError> {
        let index = self.gc(d, pc)?;
        self.child_of
            .get(index.0 as usize)
            .copied()
            .flatten()
            .map(ProtoIdx)
            .ok_or_else(|| {
                ReadError::MalformedBody(format!("FNEW at pc {pc} does not name a prototype"))
            })
    }
}

fn read_proto(
    cur: &mut Cursor<'_>,
    layout: &Layout,
    options: &ReadOptions,
    stack: &mut Vec<Function>,
) -> Result<Function, ReadError> {
    let flags = cur.u8()?;
    let num_params = cur.u8()?;
    let frame_size = cur.u8()?;
    let num_upvalues = cur.u8()?;
    let name_hash = if layout.name_hash {
        Some(cur.uleb()?)
    } else {
        None
    };
    let num_kgc = cur.uleb_usize()?;
    let num_kn = cur.uleb_usize()?;
    let num_bc = cur.uleb_usize()?;
    let (debug_size, first_line, num_line) = if layout.stripped {
        (0, 0, 0)
    } else {
        let size = cur.uleb_usize()?;
        if size > 0 {
            (size, cur.uleb()? as u32, cur.uleb_usize()?)
        } else {
            (0, 0, 0)
        }
    };

    cur.ensure(num_bc, 4)?;
    let mut words = Vec::with_capacity(num_bc);
    for _ in 0..num_bc {
        words.push(cur.u32()?);
    }
    cur.ensure(num_upvalues as usize, 2)?;
    for _ in 0..num_upvalues {
        cur.u16()?;
    }

    cur.ensure(num_kgc, 1)?;
    let mut constants = Vec::with_capacity(num_kgc + num_kn);
    let mut child_of = Vec::with_capacity(num_kgc);
    let mut children = Vec::new();
    for _ in 0..num_kgc {
        let at = cur.offset();
        let tag = cur.uleb()?;
        let constant = match tag {
            KGC_CHILD => {
                let child = stack.pop().ok_or_else(|| {
                    ReadError::MalformedBody(format!(
                        "child constant at offset {at} with no pending prototype"
                    ))
                })?;
                child_of.push(Some(children.len() as u32));
                children.push(child);
                constants.push(Constant::Nil);
                continue;
            }
            KGC_TAB => Constant::Table(read_table(cur)?),
            KGC_I64 => Constant::Int64(read_u64_pair(cur)? as i64),
            KGC_U64 => Constant::UInt64(read_u64_pair(cur)?),
            KGC_COMPLEX => {
                let re = f64::from_bits(read_u64_pair(cur)?);
                let im = f64::from_bits(read_u64_pair(cur)?);
                Constant::Complex(re, im)
            }
            _ => {
                let len = (tag - KGC_STR) as usize;
                Constant::String(cur.bytes(len)?.to_vec())
            }
        };
        child_of.push(None);
        constants.push(constant);
    }

    cur.ensure(num_kn, 1)?;
    for _ in 0..num_kn {
        let (is_num, lo) = cur.uleb33()?;
        let constant = if is_num {
            let hi = cur.uleb()? as u32;
            Constant::Float(f64::from_bits((u64::from(hi) << 32) | u64::from(lo)))
        } else {
            Constant::Integer(i64::from(lo as i32))
        };
        constants.push(constant);
    }

    let pool = Pool {
        num_kgc: num_kgc as u32,
        num_kn: num_kn as u32,
        child_of,
    };
    let instructions = decode(&words, &pool, &constants, layout)?;

    let debug = if debug_size > 0 {
        let mut section = cur.sub(debug_size)?;
        if options.debug_info {
            match read_debug(&mut section, num_bc, num_upvalues, first_line, num_line) {
                Ok(info) => Some(info),
                Err(err) => {
                    log::warn!("ignoring LuaJIT debug info: {err}");
                    None
                }
            }
        } else {
            None
        }
    } else {
        None
    };

    Ok(Function {
        instructions,
        constants,
        num_params,
        max_registers: frame_size,
        num_upvalues,
        is_vararg: flags & PROTO_VARARG != 0,
        children,
        debug,
        line_defined: first_line,
        name_hash,
    })
}

/// Two uleb128 halves, low word first.
fn read_u64_pair(cur: &mut Cursor<'_>) -> Result<u64, ReadError> {
    let lo = cur.uleb()? as u32;
    let hi = cur.uleb()? as u32;
    Ok((u64::from(hi) << 32) | u64::from(lo))
}

fn read_table_value(cur: &mut Cursor<'_>) -> Result<Constant, ReadError> {
    let tag = cur.uleb()?;
    Ok(match tag {
        KTAB_NIL => Constant::Nil,
        KTAB_FALSE => Constant::Boolean(false),
        KTAB_TRUE => Constant::Boolean(true),
        KTAB_INT => Constant::Integer(i64::from(cur.uleb()? as u32 as i32)),
        KTAB_NUM => Constant::Float(f64::from_bits(read_u64_pair(cur)?)),
        _ => {
            let len = (tag - KTAB_STR) as usize;
            Constant::String(cur.bytes(len)?.to_vec())
        }
    })
}

fn read_table(cur: &mut Cursor<'_>) -> Result<TableTemplate, ReadError> {
    let array_len = cur.uleb_usize()?;
    let hash_len = cur.uleb_usize()?;
    cur.ensure(array_len, 1)?;
    let mut array = Vec::with_capacity(array_len);
    for _ in 0..array_len {
        array.push(read_table_value(cur)?);
    }
    cur.ensure(hash_len, 2)?;
    let mut hash = Vec::with_capacity(hash_len);
    for _ in 0..hash_len {
        let key = read_table_value(cur)?;
        let value = read_table_value(cur)?;
        hash.push((key, value));
    }
    Ok(TableTemplate { array, hash })
}

fn read_debug(
    cur: &mut Cursor<'_>,
    num_bc: usize,
    num_upvalues: u8,
    first_line: u32,
    num_line: usize,
) -> Result<DebugInfo, ReadError> {
    let mut lines = Vec::with_capacity(num_bc);
    for _ in 0..num_bc {
        let delta = if num_line < 1 << 8 {
            u32::from(cur.u8()?)
        } else if num_line < 1 << 16 {
            u32::from(cur.u16()?)
        } else {
            cur.u32()?
        };
        lines.push(first_line.saturating_add(delta));
    }

    let mut upvalue_names = Vec::with_capacity(num_upvalues as usize);
    for _ in 0..num_upvalues {
        upvalue_names.push(String::from_utf8_lossy(cur.cstr()?).into_owned());
    }

    // Debug pcs count the function header instruction, which is not dumped.
    let mut locals = Vec::new();
    let mut last_pc = 0usize;
    loop {
        if cur.is_empty() {
            break;
        }
        let name = match cur.peek_u8()? {
            VARNAME_END => {
                cur.u8()?;
                break;
            }
            kind if kind < VARNAME_MAX => {
                cur.u8()?;
                INTERNAL_VARNAMES[kind as usize - 1].to_string()
            }
            _ => String::from_utf8_lossy(cur.cstr()?).into_owned(),
        };
        last_pc += cur.uleb_usize()?;
        let start = last_pc;
        let end = start + cur.uleb_usize()?;
        if end > num_bc + 1 {
            return Err(ReadError::MalformedBody(format!(
                "local `{name}` ends at pc {end} past the code"
            )));
        }
        locals.push((name, start.saturating_sub(1)..end.saturating_sub(1)));
    }

    Ok(DebugInfo {
        lines,
        scopes: ScopeTree::from_declaration_order(locals),
        upvalue_names,
    })
}

fn primitive(d: u32) -> Literal {
    match d {
        0 => Literal::Nil,
        1 => Literal::Bool(false),
        _ => Literal::Bool(true),
    }
}

fn count(x: u32) -> Option<u8> {
    if x == 0 {
        None
    } else {
        Some((x - 1) as u8)
    }
}

fn decode(
    words: &[u32],
    pool: &Pool,
    constants: &[Constant],
    layout: &Layout,
) -> Result<Vec<Op>, ReadError> {
    let arg_offset = if layout.fr2 { 2 } else { 1 };
    let mut ops = Vec::with_capacity(words.len());
    for (pc, &w) in words.iter().enumerate() {
        let opcode = (w & 0xFF) as u8;
        let a = (w >> 8) & 0xFF;
        let c = (w >> 16) & 0xFF;
        let b = w >> 24;
        let d = w >> 16;
        let ra = Reg(a as u8);
        let target = relative_target(pc, i64::from(d) - JUMP_BIAS);
        let reg = |x: u32| Operand::Reg(Reg(x as u8));

        let op = LuaJitOp::from_byte(opcode, layout.version)
            .ok_or(ReadError::InvalidOpcode { opcode, pc })?;
        use LuaJitOp as J;
        let decoded = match op {
            J::IsLt | J::IsGe | J::IsLe | J::IsGt => Op::Compare {
                op: if matches!(op, J::IsLt | J::IsGe) {
                    CmpOp::Lt
                } else {
                    CmpOp::Le
                },
                lhs: Operand::Reg(ra),
                rhs: reg(d),
                jump_when: matches!(op, J::IsLt | J::IsLe),
            },
            J::IsEqV | J::IsNeV => Op::Compare {
                op: CmpOp::Eq,
                lhs: Operand::Reg(ra),
                rhs: reg(d),
                jump_when: op == J::IsEqV,
            },
            J::IsEqS | J::IsNeS => Op::Compare {
                op: CmpOp::Eq,
                lhs: Operand::Reg(ra),
                rhs: Operand::Const(pool.gc(d, pc)?),
                jump_when: op == J::IsEqS,
            },
            J::IsEqN | J::IsNeN => Op::Compare {
                op: CmpOp::Eq,
                lhs: Operand::Reg(ra),
                rhs: Operand::Const(pool.num(d, pc)?),
                jump_when: op == J::IsEqN,
            },
            J::IsEqP | J::IsNeP => Op::Compare {
                op: CmpOp::Eq,
                lhs: Operand::Reg(ra),
                rhs: Operand::Lit(primitive(d)),
                jump_when: op == J::IsEqP,
            },
            J::IsTc | J::IsFc => Op::Test {
                value: Reg(d as u8),
                copy_to: Some(ra),
                jump_when: op == J::IsTc,
            },
            J::IsT | J::IsF => Op::Test {
                value: Reg(d as u8),
                copy_to: None,
                jump_when: op == J::IsT,
            },
            J::IsType | J::IsNum | J::Loop | J::ILoop => Op::Nop,
            J::Mov => Op::Move {
                dst: ra,
                src: Reg(d as u8),
            },
            J::Not | J::Unm | J::Len => Op::Unary {
                op: match op {
                    J::Not => UnaryOp::Not,
                    J::Unm => UnaryOp::Neg,
                    _ => UnaryOp::Len,
                },
                dst: ra,
                src: Reg(d as u8),
            },
            J::AddVN | J::SubVN | J::MulVN | J::DivVN | J::ModVN => Op::Arith {
                op: arith(op),
                dst: ra,
                lhs: reg(b),
                rhs: Operand::Const(pool.num(c, pc)?),
            },
            J::AddNV | J::SubNV | J::MulNV | J::DivNV | J::ModNV => Op::Arith {
                op: arith(op),
                dst: ra,
                lhs: Operand::Const(pool.num(c, pc)?),
                rhs: reg(b),
            },
            J::AddVV | J::SubVV | J::MulVV | J::DivVV | J::ModVV | J::Pow => Op::Arith {
                op: arith(op),
                dst: ra,
                lhs: reg(b),
                rhs: reg(c),
            },
            J::Cat => Op::Concat {
                dst: ra,
                first: Reg(b as u8),
                last: Reg(c as u8),
            },
            J::KStr | J::KCData => Op::Load {
                dst: ra,
                value: Operand::Const(pool.gc(d, pc)?),
            },
            J::KShort => Op::Load {
                dst: ra,
                value: Operand::Lit(Literal::Int(i64::from(d as u16 as i16))),
            },
            J::KNum => Op::Load {
                dst: ra,
                value: Operand::Const(pool.num(d, pc)?),
            },
            J::KPri => Op::Load {
                dst: ra,
                value: Operand::Lit(primitive(d)),
            },
            J::KNil => Op::LoadNil {
                first: ra,
                last: Reg(d as u8),
            },
            J::UGet => Op::GetUpval {
                dst: ra,
                upval: UpvalIdx(d as u16),
            },
            J::USetV | J::USetS | J::USetN | J::USetP => Op::SetUpval {
                upval: UpvalIdx(a as u16),
                value: match op {
                    J::USetV => reg(d),
                    J::USetS => Operand::Const(pool.gc(d, pc)?),
                    J::USetN => Operand::Const(pool.num(d, pc)?),
                    _ => Operand::Lit(primitive(d)),
                },
            },
            J::UClo => {
                if target == pc as i64 + 1 {
                    Op::Close { from: ra }
                } else {
                    Op::Jump { target }
                }
            }
            J::FNew => Op::Closure {
                dst: ra,
                proto: pool.child(d, pc)?,
            },
            J::TNew => Op::NewTable {
                dst: ra,
                template: None,
            },
            J::TDup => Op::NewTable {
                dst: ra,
                template: Some(pool.gc(d, pc)?),
            },
            J::GGet => Op::GetGlobal {
                dst: ra,
                name: pool.gc(d, pc)?,
            },
            J::GSet => Op::SetGlobal {
                name: pool.gc(d, pc)?,
                value: ra,
            },
            J::TGetV | J::TGetR => Op::GetIndex {
                dst: ra,
                table: Reg(b as u8),
                key: reg(c),
            },
            J::TGetS => Op::GetIndex {
                dst: ra,
                table: Reg(b as u8),
                key: Operand::Const(pool.gc(c, pc)?),
            },
            J::TGetB => Op::GetIndex {
                dst: ra,
                table: Reg(b as u8),
                key: Operand::Lit(Literal::Int(i64::from(c))),
            },
            J::TSetV | J::TSetR => Op::SetIndex {
                table: Reg(b as u8),
                key: reg(c),
                value: Operand::Reg(ra),
            },
            J::TSetS => Op::SetIndex {
                table: Reg(b as u8),
                key: Operand::Const(pool.gc(c, pc)?),
                value: Operand::Reg(ra),
            },
            J::TSetB => Op::SetIndex {
                table: Reg(b as u8),
                key: Operand::Lit(Literal::Int(i64::from(c))),
                value: Operand::Reg(ra),
            },
            J::TSetM => {
                let index = pool.num(d, pc)?;
                // The constant is 2^52 + index; the low word is the index.
                let first_index = match constants.get(index.0 as usize) {
                    Some(Constant::Float(f)) => f.to_bits() as u32,
                    Some(Constant::Integer(i)) => *i as u32,
                    _ => {
                        return Err(ReadError::MalformedBody(format!(
                            "TSETM at pc {pc} has no start index"
                        )))
                    }
                };
                if a == 0 {
                    return Err(ReadError::MalformedBody(format!(
                        "TSETM at pc {pc} has no table register"
                    )));
                }
                Op::SetList {
                    table: Reg(a as u8 - 1),
                    first_value: ra,
                    count: None,
                    first_index,
                }
            }
            J::Call => Op::Call {
                func: ra,
                first_arg: ra.offset(arg_offset),
                args: count(c),
                results: count(b),
            },
            J::CallM => Op::Call {
                func: ra,
                first_arg: ra.offset(arg_offset),
                args: None,
                results: count(b),
            },
            J::CallT => Op::TailCall {
                func: ra,
                first_arg: ra.offset(arg_offset),
                args: count(d),
            },
            J::CallMT => Op::TailCall {
                func: ra,
                first_arg: ra.offset(arg_offset),
                args: None,
            },
            J::IterC | J::IterN => Op::ForGenCall {
                base: iterator_base(a, pc)?,
                vars: b.saturating_sub(1) as u8,
            },
            J::IterL | J::IIterL => Op::ForGenLoop {
                base: iterator_base(a, pc)?,
                body: target,
            },
            J::IsNext | J::Jmp => Op::Jump { target },
            J::VArg => Op::VarArg {
                dst: ra,
                count: count(b),
            },
            J::RetM => Op::Return {
                first: ra,
                count: None,
            },
            J::Ret => Op::Return {
                first: ra,
                count: count(d),
            },
            J::Ret0 => Op::Return {
                first: ra,
                count: Some(0),
            },
            J::Ret1 => Op::Return {
                first: ra,
                count: Some(1),
            },
            J::ForI | J::JForI => Op::ForNumPrep {
                base: ra,
                loop_pc: target - 1,
            },
            J::ForL | J::IForL => Op::ForNumLoop {
                base: ra,
                body: target,
            },
            J::JForL
            | J::JIterL
            | J::JLoop
            | J::FuncF
            | J::IFuncF
            | J::JFuncF
            | J::FuncV
            | J::IFuncV
            | J::JFuncV
            | J::FuncC
            | J::FuncCW => return Err(ReadError::InvalidOpcode { opcode, pc }),
        };
        ops.push(decoded);
    }
    Ok(ops)
}

fn arith(op: LuaJitOp) -> ArithOp {
    use LuaJitOp as J;
    match op {
        J::AddVN | J::AddNV | J::AddVV => ArithOp::Add,
        J::SubVN | J::SubNV | J::SubVV => ArithOp::Sub,
        J::MulVN | J::MulNV | J::MulVV => ArithOp::Mul,
        J::DivVN | J::DivNV | J::DivVV => ArithOp::Div,
        J::ModVN | J::ModNV | J::ModVV => ArithOp::Mod,
        _ => ArithOp::Pow,
    }
}

/// ITERC/ITERN/ITERL name the first loop variable; the iterator triple sits
/// three slots below.
fn iterator_base(a: u32, pc: usize) -> Result<Reg, ReadError> {
    a.checked_sub(3).map(|base| Reg(base as u8)).ok_or_else(|| {
        ReadError::MalformedBody(format!("iterator at pc {pc} has base below 3"))
    })
}
