//! Stock Lua 5.1 `luac` format.

use crate::chunk::{Chunk, Dialect};
use crate::constant::Constant;
use crate::cursor::Cursor;
use crate::function::{DebugInfo, Function};
use crate::instruction::{
    relative_target, ArithOp, CmpOp, ConstIdx, Literal, Op, Operand, ProtoIdx, Reg, UnaryOp,
    UpvalIdx,
};
use crate::opcode::Lua51Op;
use crate::scope_tree::ScopeTree;
use crate::{ReadError, ReadOptions};

pub(crate) const HEADER_SIZE: usize = 12;
const FIELDS_PER_FLUSH: u32 = 50;
pub(crate) const BITRK: u32 = 1 << 8;
pub(crate) const MAXARG_SBX: i64 = (1 << 17) - 1;
pub(crate) const VARARG_ISVARARG: u8 = 2;
const MAX_NESTING: usize = 200;
/// Header format byte of Havok Script chunks, which share the Lua 5.1 magic
/// and version.
const HAVOK_FORMAT: u8 = 0x0e;

pub(crate) const TAG_NIL: u8 = 0;
pub(crate) const TAG_BOOLEAN: u8 = 1;
pub(crate) const TAG_NUMBER: u8 = 3;
pub(crate) const TAG_STRING: u8 = 4;

struct Header {
    size_t: usize,
}

impl Header {
    fn parse(cur: &mut Cursor<'_>) -> Result<Self, ReadError> {
        let _magic = cur.bytes(4)?;
        let _version = cur.u8()?;
        let format = cur.u8()?;
        let endian = cur.u8()?;
        let int_size = cur.u8()?;
        let size_t = cur.u8()?;
        let instruction_size = cur.u8()?;
        let number_size = cur.u8()?;
        let integral = cur.u8()?;
        debug_assert_eq!(cur.offset(), HEADER_SIZE);

        if format == HAVOK_FORMAT {
            return Err(ReadError::UnsupportedDialect(
                "Havok Script chunk (Black Ops III)".into(),
            ));
        }
        if format != 0 {
            return Err(ReadError::UnsupportedDialect(format!(
                "Lua 5.1 format {format}"
            )));
        }
        if endian != 1 {
            return Err(ReadError::UnsupportedDialect(
                "big-endian Lua 5.1 chunk".into(),
            ));
        }
        if int_size != 4 || instruction_size != 4 || !matches!(size_t, 4 | 8) {
            return Err(ReadError::UnsupportedDialect(format!(
                "Lua 5.1 layout int={int_size} size_t={size_t} instruction={instruction_size}"
            )));
        }
        if number_size != 8 || integral != 0 {
            return Err(ReadError::UnsupportedDialect(format!(
                "Lua 5.1 number type (size {number_size}, integral {integral})"
            )));
        }
        Ok(Header {
            size_t: size_t as usize,
        })
    }
}

pub(crate) fn read(bytes: &[u8], options: &ReadOptions) -> Result<Chunk, ReadError> {
    let mut cur = Cursor::new(bytes);
    let header = Header::parse(&mut cur)?;
    let mut source_name = None;
    let main = read_function(&mut cur, &header, options, 0, &mut source_name)?;
    Ok(Chunk {
        dialect: Dialect::Lua51,
        source_name,
        main,
    })
}

fn read_string(cur: &mut Cursor<'_>, header: &Header) -> Result<Option<Vec<u8>>, ReadError> {
    let len = match header.size_t {
        8 => {
            let at = cur.offset();
            usize::try_from(cur.u64()?).map_err(|_| ReadError::TruncatedStream { offset: at })?
        }
        _ => cur.u32()? as usize,
    };
    if len == 0 {
        return Ok(None);
    }
    let bytes = cur.bytes(len)?;
    // Stored length includes the trailing NUL.
    Ok(Some(bytes[..len - 1].to_vec()))
}

fn read_count(cur: &mut Cursor<'_>, item_size: usize) -> Result<usize, ReadError> {
    let count = cur.u32()? as usize;
    cur.ensure(count, item_size)?;
    Ok(count)
}

struct RawDebug {
    lines: Vec<u32>,
    locals: Vec<(String, u32, u32)>,
    upvalues: Vec<String>,
}

fn read_function(
    cur: &mut Cursor<'_>,
    header: &Header,
    options: &ReadOptions,
    depth: usize,
    source_name: &mut Option<String>,
) -> Result<Function, ReadError> {
    if depth > MAX_NESTING {
        return Err(ReadError::MalformedBody("prototype nesting too deep".into()));
    }
    let source = read_string(cur, header)?;
    if depth == 0 {
        *source_name = source.map(|s| String::from_utf8_lossy(&s).into_owned());
    }
    let line_defined = cur.u32()?;
    let _last_line = cur.u32()?;
    let num_upvalues = cur.u8()?;
    let num_params = cur.u8()?;
    let vararg_flags = cur.u8()?;
    let max_registers = cur.u8()?;

    let code_len = read_count(cur, 4)?;
    let mut words = Vec::with_capacity(code_len);
    for _ in 0..code_len {
        words.push(cur.u32()?);
    }

    let constant_count = read_count(cur, 1)?;
    let mut constants = Vec::with_capacity(constant_count);
    for _ in 0..constant_count {
        let at = cur.offset();
        let constant = match cur.u8()? {
            TAG_NIL => Constant::Nil,
            TAG_BOOLEAN => Constant::Boolean(cur.u8()? != 0),
            TAG_NUMBER => Constant::Float(cur.f64()?),
            TAG_STRING => Constant::String(read_string(cur, header)?.unwrap_or_default()),
            tag => {
                return Err(ReadError::MalformedBody(format!(
                    "unknown constant tag {tag} at offset {at}"
                )))
            }
        };
        constants.push(constant);
    }

    let child_count = read_count(cur, 1)?;
    let mut children = Vec::with_capacity(child_count);
    for _ in 0..child_count {
        children.push(read_function(cur, header, options, depth + 1, source_name)?);
    }

    let line_count = read_count(cur, 4)?;
    let mut lines = Vec::with_capacity(line_count);
    for _ in 0..line_count {
        lines.push(cur.u32()?);
    }
    let local_count = read_count(cur, 1)?;
    let mut locals = Vec::with_capacity(local_count);
    for _ in 0..local_count {
        let name = read_string(cur, header)?.unwrap_or_default();
        let start = cur.u32()?;
        let end = cur.u32()?;
        locals.push((String::from_utf8_lossy(&name).into_owned(), start, end));
    }
    let upvalue_count = read_count(cur, 1)?;
    let mut upvalues = Vec::with_capacity(upvalue_count);
    for _ in 0..upvalue_count {
        let name = read_string(cur, header)?.unwrap_or_default();
        upvalues.push(String::from_utf8_lossy(&name).into_owned());
    }

    let instructions = decode(&words, &children)?;
    let debug = if options.debug_info {
        build_debug(
            RawDebug {
                lines,
                locals,
                upvalues,
            },
            instructions.len(),
            num_upvalues,
        )
    } else {
        None
    };

    Ok(Function {
        instructions,
        constants,
        num_params,
        max_registers,
        num_upvalues,
        is_vararg: vararg_flags & VARARG_ISVARARG != 0,
        children,
        debug,
        line_defined,
        name_hash: None,
    })
}

/// Validate the raw debug section; inconsistent data is dropped with a
/// warning instead of failing the file.
fn build_debug(raw: RawDebug, code_len: usize, num_upvalues: u8) -> Option<DebugInfo> {
    if raw.lines.is_empty() && raw.locals.is_empty() && raw.upvalues.is_empty() {
        return None;
    }
    if !raw.lines.is_empty() && raw.lines.len() != code_len {
        log::warn!(
            "ignoring debug info: {} line entries for {} instructions",
            raw.lines.len(),
            code_len
        );
        return None;
    }
    if !raw.upvalues.is_empty() && raw.upvalues.len() != num_upvalues as usize {
        log::warn!("ignoring debug info: upvalue name count mismatch");
        return None;
    }
    let mut locals = Vec::with_capacity(raw.locals.len());
    for (name, start, end) in raw.locals {
        let (start, end) = (start as usize, end as usize);
        if start > end || end > code_len + 1 {
            log::warn!("ignoring debug info: local `{name}` has range {start}..{end}");
            return None;
        }
        locals.push((name, start..end));
    }
    Some(DebugInfo {
        lines: raw.lines,
        scopes: ScopeTree::from_declaration_order(locals),
        upvalue_names: raw.upvalues,
    })
}

fn rk(x: u32) -> Operand {
    if x & BITRK != 0 {
        Operand::Const(ConstIdx(x & 0xFF))
    } else {
        Operand::Reg(Reg(x as u8))
    }
}

fn count(x: u32) -> Option<u8> {
    if x == 0 {
        None
    } else {
        Some((x - 1) as u8)
    }
}

/// Lower raw words into [`Op`]. Closure capture descriptors, SETLIST
/// extension words and the jump after TFORLOOP are folded into their owner.
fn decode(words: &[u32], children: &[Function]) -> Result<Vec<Op>, ReadError> {
    let mut ops = Vec::with_capacity(words.len());
    let mut pc = 0;
    while pc < words.len() {
        let w = words[pc];
        let opcode = (w & 0x3F) as u8;
        let a = (w >> 6) & 0xFF;
        let c = (w >> 14) & 0x1FF;
        let b = (w >> 23) & 0x1FF;
        let bx = w >> 14;
        let sbx = bx as i64 - MAXARG_SBX;
        let ra = Reg(a as u8);

        let op = Lua51Op::from_byte(opcode).ok_or(ReadError::InvalidOpcode { opcode, pc })?;
        let mut trailing: Vec<Op> = Vec::new();
        let decoded = match op {
            Lua51Op::Move => Op::Move {
                dst: ra,
                src: Reg(b as u8),
            },
            Lua51Op::LoadK => Op::Load {
                dst: ra,
                value: Operand::Const(ConstIdx(bx)),
            },
            Lua51Op::LoadBool => Op::LoadBool {
                dst: ra,
                value: b != 0,
                skip_next: c != 0,
            },
            Lua51Op::LoadNil => Op::LoadNil {
                first: ra,
                last: Reg(b as u8),
            },
            Lua51Op::GetUpval => Op::GetUpval {
                dst: ra,
                upval: UpvalIdx(b as u16),
            },
            Lua51Op::GetGlobal => Op::GetGlobal {
                dst: ra,
                name: ConstIdx(bx),
            },
            Lua51Op::GetTable => Op::GetIndex {
                dst: ra,
                table: Reg(b as u8),
                key: rk(c),
            },
            Lua51Op::SetGlobal => Op::SetGlobal {
                name: ConstIdx(bx),
                value: ra,
            },
            Lua51Op::SetUpval => Op::SetUpval {
                upval: UpvalIdx(b as u16),
                value: Operand::Reg(ra),
            },
            Lua51Op::SetTable => Op::SetIndex {
                table: ra,
                key: rk(b),
                value: rk(c),
            },
            Lua51Op::NewTable => Op::NewTable {
                dst: ra,
                template: None,
            },
            Lua51Op::SelfOp => Op::SelfLookup {
                dst: ra,
                object: Reg(b as u8),
                method: rk(c),
            },
            Lua51Op::Add | Lua51Op::Sub | Lua51Op::Mul | Lua51Op::Div | Lua51Op::Mod
            | Lua51Op::Pow => Op::Arith {
                op: match op {
                    Lua51Op::Add => ArithOp::Add,
                    Lua51Op::Sub => ArithOp::Sub,
                    Lua51Op::Mul => ArithOp::Mul,
                    Lua51Op::Div => ArithOp::Div,
                    Lua51Op::Mod => ArithOp::Mod,
                    _ => ArithOp::Pow,
                },
                dst: ra,
                lhs: rk(b),
                rhs: rk(c),
            },
            Lua51Op::Unm | Lua51Op::Not | Lua51Op::Len => Op::Unary {
                op: match op {
                    Lua51Op::Unm => UnaryOp::Neg,
                    Lua51Op::Not => UnaryOp::Not,
                    _ => UnaryOp::Len,
                },
                dst: ra,
                src: Reg(b as u8),
            },
            Lua51Op::Concat => Op::Concat {
                dst: ra,
                first: Reg(b as u8),
                last: Reg(c as u8),
            },
            Lua51Op::Jmp => Op::Jump {
                target: relative_target(pc, sbx),
            },
            Lua51Op::Eq | Lua51Op::Lt | Lua51Op::Le => Op::Compare {
                op: match op {
                    Lua51Op::Eq => CmpOp::Eq,
                    Lua51Op::Lt => CmpOp::Lt,
                    _ => CmpOp::Le,
                },
                lhs: rk(b),
                rhs: rk(c),
                jump_when: a != 0,
            },
            Lua51Op::Test => Op::Test {
                value: ra,
                copy_to: None,
                jump_when: c != 0,
            },
            Lua51Op::TestSet => Op::Test {
                value: Reg(b as u8),
                copy_to: Some(ra),
                jump_when: c != 0,
            },
            Lua51Op::Call => Op::Call {
                func: ra,
                first_arg: ra.offset(1),
                args: count(b),
                results: count(c),
            },
            Lua51Op::TailCall => Op::TailCall {
                func: ra,
                first_arg: ra.offset(1),
                args: count(b),
            },
            Lua51Op::Return => Op::Return {
                first: ra,
                count: count(b),
            },
            Lua51Op::ForLoop => Op::ForNumLoop {
                base: ra,
                body: relative_target(pc, sbx),
            },
            Lua51Op::ForPrep => Op::ForNumPrep {
                base: ra,
                loop_pc: relative_target(pc, sbx),
            },
            Lua51Op::TForLoop => {
                // The following JMP is the loop's back edge.
                let back = words.get(pc + 1).copied().ok_or_else(|| ReadError::MalformedBody(
                    format!("TFORLOOP at pc {pc} is not followed by a jump"),
                ))?;
                if Lua51Op::from_byte((back & 0x3F) as u8) != Some(Lua51Op::Jmp) {
                    return Err(ReadError::MalformedBody(format!(
                        "TFORLOOP at pc {pc} is not followed by a jump"
                    )));
                }
                let back_sbx = (back >> 14) as i64 - MAXARG_SBX;
                trailing.push(Op::ForGenLoop {
                    base: ra,
                    body: relative_target(pc + 1, back_sbx),
                });
                Op::ForGenCall {
                    base: ra,
                    vars: c as u8,
                }
            }
            Lua51Op::SetList => {
                let block = if c == 0 {
                    let extra = words.get(pc + 1).copied().ok_or_else(|| ReadError::MalformedBody(
                        format!("SETLIST at pc {pc} is missing its block word"),
                    ))?;
                    trailing.push(Op::Nop);
                    extra
                } else {
                    c
                };
                let first_index = block
                    .saturating_sub(1)
                    .checked_mul(FIELDS_PER_FLUSH)
                    .and_then(|i| i.checked_add(1))
                    .ok_or_else(|| ReadError::MalformedBody(format!(
                        "SETLIST at pc {pc} stores past the last array slot (block {block})"
                    )))?;
                Op::SetList {
                    table: ra,
                    first_value: ra.offset(1),
                    count: if b == 0 { None } else { Some(b as u16) },
                    first_index,
                }
            }
            Lua51Op::Close => Op::Close { from: ra },
            Lua51Op::Closure => {
                let child = children.get(bx as usize).ok_or_else(|| ReadError::MalformedBody(
                    format!("CLOSURE at pc {pc} names missing prototype {bx}"),
                ))?;
                trailing.extend((0..child.num_upvalues).map(|_| Op::Nop));
                Op::Closure {
                    dst: ra,
                    proto: ProtoIdx(bx),
                }
            }
            Lua51Op::VarArg => Op::VarArg {
                dst: ra,
                count: count(b),
            },
        };
        ops.push(decoded);
        pc += 1;
        for extra in trailing {
            if pc >= words.len() {
                break;
            }
            ops.push(extra);
            pc += 1;
        }
    }
    Ok(ops)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::read_chunk;
    use crate::test_support::{abc, abx, asbx, ChunkWriter};

    fn debug_options() -> ReadOptions {
        ReadOptions { debug_info: true }
    }

    #[test]
    fn reads_return_one() {
        let mut w = ChunkWriter::new();
        w.function(
            0,
            &[
                abx(Lua51Op::LoadK, 0, 0),
                abc(Lua51Op::Return, 0, 2, 0),
                abc(Lua51Op::Return, 0, 1, 0),
            ],
            &[Constant::Float(1.0)],
            &[],
        );
        let chunk = read_chunk(&w.0, &ReadOptions::default()).unwrap();
        assert_eq!(chunk.dialect, Dialect::Lua51);
        assert_eq!(chunk.source_name.as_deref(), Some("@test.lua"));
        assert_eq!(
            chunk.main.instructions,
            vec![
                Op::Load {
                    dst: Reg(0),
                    value: Operand::Const(ConstIdx(0))
                },
                Op::Return {
                    first: Reg(0),
                    count: Some(1)
                },
                Op::Return {
                    first: Reg(0),
                    count: Some(0)
                },
            ]
        );
        assert_eq!(chunk.main.constants, vec![Constant::Float(1.0)]);
        assert!(chunk.main.is_vararg);
    }

    #[test]
    fn decodes_rk_and_conditional_jumps() {
        let ops = decode(
            &[
                abc(Lua51Op::Eq, 1, 0, BITRK | 2),
                asbx(Lua51Op::Jmp, 0, 1),
                abc(Lua51Op::TestSet, 3, 4, 0),
                asbx(Lua51Op::Jmp, 0, -3),
            ],
            &[],
        )
        .unwrap();
        assert_eq!(
            ops[0],
            Op::Compare {
                op: CmpOp::Eq,
                lhs: Operand::Reg(Reg(0)),
                rhs: Operand::Const(ConstIdx(2)),
                jump_when: true,
            }
        );
        assert_eq!(ops[1], Op::Jump { target: 3 });
        assert_eq!(
            ops[2],
            Op::Test {
                value: Reg(4),
                copy_to: Some(Reg(3)),
                jump_when: false
            }
        );
        assert_eq!(ops[3], Op::Jump { target: 1 });
    }

    #[test]
    fn folds_tforloop_jump_and_setlist_word() {
        let ops = decode(
            &[
                asbx(Lua51Op::Jmp, 0, 1),
                abc(Lua51Op::Move, 5, 3, 0),
                abc(Lua51Op::TForLoop, 0, 0, 2),
                asbx(Lua51Op::Jmp, 0, -3),
                abc(Lua51Op::SetList, 0, 3, 0),
                7,
            ],
            &[],
        )
        .unwrap();
        assert_eq!(
            ops[2],
            Op::ForGenCall {
                base: Reg(0),
                vars: 2
            }
        );
        assert_eq!(
            ops[3],
            Op::ForGenLoop {
                base: Reg(0),
                body: 1
            }
        );
        assert_eq!(
            ops[4],
            Op::SetList {
                table: Reg(0),
                first_value: Reg(1),
                count: Some(3),
                first_index: 301,
            }
        );
        assert_eq!(ops[5], Op::Nop);
    }

    #[test]
    fn debug_names_are_optional() {
        let mut w = ChunkWriter::new();
        w.function(
            1,
            &[abc(Lua51Op::Return, 0, 1, 0)],
            &[],
            &[("self", 0, 1)],
        );
        let plain = read_chunk(&w.0, &ReadOptions::default()).unwrap();
        assert!(plain.main.debug.is_none());

        let with_debug = read_chunk(&w.0, &debug_options()).unwrap();
        assert_eq!(with_debug.main.local_name(0, 0), Some("self"));
    }

    #[test]
    fn inconsistent_debug_info_degrades() {
        let mut w = ChunkWriter::new();
        // Local range ends far past the code.
        w.function(0, &[abc(Lua51Op::Return, 0, 1, 0)], &[], &[("x", 0, 99)]);
        let chunk = read_chunk(&w.0, &debug_options()).unwrap();
        assert!(chunk.main.debug.is_none());
    }

    #[test]
    fn truncated_code_is_reported() {
        let mut w = ChunkWriter::new();
        w.function(
            0,
            &[abx(Lua51Op::LoadK, 0, 0), abc(Lua51Op::Return, 0, 2, 0)],
            &[Constant::Float(1.0)],
            &[],
        );
        // Cut inside the instruction array.
        let cut = HEADER_SIZE + 14 + 8 + 4 + 4 + 2;
        let err = read_chunk(&w.0[..cut], &ReadOptions::default()).unwrap_err();
        assert!(matches!(err, ReadError::TruncatedStream { .. }), "{err:?}");
    }

    #[test]
    fn oversized_setlist_block_is_malformed() {
        let err = decode(&[abc(Lua51Op::SetList, 0, 1, 0), u32::MAX], &[]).unwrap_err();
        assert!(
            matches!(&err, ReadError::MalformedBody(msg) if msg.starts_with("SETLIST at pc 0")),
            "{err:?}"
        );
    }

    #[test]
    fn invalid_opcode_is_rejected() {
        let err = decode(&[63], &[]).unwrap_err();
        assert_eq!(err, ReadError::InvalidOpcode { opcode: 63, pc: 0 });
    }

    #[test]
    fn havok_script_is_named_when_rejected() {
        let mut bytes = ChunkWriter::new().0;
        bytes[5] = HAVOK_FORMAT;
        let err = read_chunk(&bytes, &ReadOptions::default()).unwrap_err();
        assert_eq!(
            err,
            ReadError::UnsupportedDialect("Havok Script chunk (Black Ops III)".into())
        );
    }

    #[test]
    fn big_endian_is_unsupported() {
        let mut bytes = ChunkWriter::new().0;
        bytes[6] = 0;
        assert!(matches!(
            read_chunk(&bytes, &ReadOptions::default()),
            Err(ReadError::UnsupportedDialect(_))
        ));
    }
}
