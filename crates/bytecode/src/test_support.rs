//! Hand-built Lua 5.1 chunks for tests in this and downstream crates.

use crate::constant::Constant;
use crate::lua51::{MAXARG_SBX, TAG_BOOLEAN, TAG_NIL, TAG_NUMBER, TAG_STRING, VARARG_ISVARARG};
use crate::opcode::Lua51Op;

pub fn abc(op: Lua51Op, a: u32, b: u32, c: u32) -> u32 {
    (op as u32) | (a << 6) | (c << 14) | (b << 23)
}

pub fn abx(op: Lua51Op, a: u32, bx: u32) -> u32 {
    (op as u32) | (a << 6) | (bx << 14)
}

pub fn asbx(op: Lua51Op, a: u32, sbx: i64) -> u32 {
    abx(op, a, (sbx + MAXARG_SBX) as u32)
}

/// Minimal Lua 5.1 chunk writer (little endian, size_t = 4).
pub struct ChunkWriter(pub Vec<u8>);

impl Default for ChunkWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkWriter {
    pub fn new() -> Self {
        ChunkWriter(vec![0x1b, b'L', b'u', b'a', 0x51, 0, 1, 4, 4, 4, 8, 0])
    }

    pub fn int(&mut self, v: u32) -> &mut Self {
        self.0.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn string(&mut self, s: Option<&str>) -> &mut Self {
        match s {
            None => self.int(0),
            Some(s) => {
                self.int(s.len() as u32 + 1);
                self.0.extend_from_slice(s.as_bytes());
                self.0.push(0);
                self
            }
        }
    }

    /// A vararg function with no children. `constants` may only hold the
    /// four Lua 5.1 constant kinds; `locals` are `(name, start_pc, end_pc)`
    /// and switch on the debug section.
    pub fn function(
        &mut self,
        params: u8,
        code: &[u32],
        constants: &[Constant],
        locals: &[(&str, u32, u32)],
    ) -> &mut Self {
        self.string(Some("@test.lua")).int(0).int(0);
        self.0.extend_from_slice(&[0, params, VARARG_ISVARARG, 8]);
        self.int(code.len() as u32);
        for w in code {
            self.int(*w);
        }
        self.int(constants.len() as u32);
        for k in constants {
            match k {
                Constant::Nil => self.0.push(TAG_NIL),
                Constant::Boolean(b) => self.0.extend_from_slice(&[TAG_BOOLEAN, *b as u8]),
                Constant::Float(f) => {
                    self.0.push(TAG_NUMBER);
                    self.0.extend_from_slice(&f.to_le_bytes());
                }
                Constant::String(s) => {
                    self.0.push(TAG_STRING);
                    let s = String::from_utf8_lossy(s).into_owned();
                    self.string(Some(&s));
                }
                other => panic!("not a Lua 5.1 constant: {other:?}"),
            }
        }
        self.int(0); // children
        if locals.is_empty() {
            self.int(0);
        } else {
            self.int(code.len() as u32);
            for _ in code {
                self.int(1);
            }
        }
        self.int(locals.len() as u32);
        for (name, start, end) in locals {
            self.string(Some(name)).int(*start).int(*end);
        }
        self.int(0) // upvalue names
    }
}
