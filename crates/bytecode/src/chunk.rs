use std::fmt;

use crate::function::Function;
use crate::ReadError;

const LUA_MAGIC: &[u8; 4] = b"\x1bLua";
const LUAJIT_MAGIC: &[u8; 3] = b"\x1bLJ";

/// LuaJIT format revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LuaJitVersion {
    /// LuaJIT 2.0 dumps (version byte 1).
    V1,
    /// LuaJIT 2.1 dumps (version byte 2).
    V2,
}

/// The closed set of supported bytecode dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Lua51,
    LuaJit(LuaJitVersion),
    /// Console LuaJIT 2.1 variant whose prototypes carry a name hash.
    LuaJitBo6,
}

impl Dialect {
    /// Select the dialect from the file header. The discriminator is the
    /// magic plus the version byte; nothing past the header is inspected.
    pub fn detect(bytes: &[u8]) -> Result<Dialect, ReadError> {
        if bytes.starts_with(LUA_MAGIC) {
            return match bytes.get(4) {
                Some(0x51) => Ok(Dialect::Lua51),
                Some(v) => Err(ReadError::UnsupportedDialect(format!(
                    "Lua version byte {v:#04x}"
                ))),
                None => Err(ReadError::TruncatedStream { offset: 4 }),
            };
        }
        if bytes.starts_with(LUAJIT_MAGIC) {
            return match bytes.get(3) {
                Some(1) => Ok(Dialect::LuaJit(LuaJitVersion::V1)),
                Some(2) => Ok(Dialect::LuaJit(LuaJitVersion::V2)),
                Some(0x82) => Ok(Dialect::LuaJitBo6),
                Some(v) => Err(ReadError::UnsupportedDialect(format!(
                    "LuaJIT version byte {v:#04x}"
                ))),
                None => Err(ReadError::TruncatedStream { offset: 3 }),
            };
        }
        if bytes.len() < 4 {
            return Err(ReadError::TruncatedStream {
                offset: bytes.len(),
            });
        }
        Err(ReadError::MalformedHeader(format!(
            "unrecognised magic {:02x?}",
            &bytes[..4]
        )))
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Lua51 => f.write_str("Lua 5.1"),
            Dialect::LuaJit(LuaJitVersion::V1) => f.write_str("LuaJIT 2.0"),
            Dialect::LuaJit(LuaJitVersion::V2) => f.write_str("LuaJIT 2.1"),
            Dialect::LuaJitBo6 => f.write_str("LuaJIT (BO6)"),
        }
    }
}

/// A parsed bytecode file.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub dialect: Dialect,
    /// Chunk name recorded by the compiler, when not stripped.
    pub source_name: Option<String>,
    /// The main function; all other prototypes hang below it.
    pub main: Function,
}
