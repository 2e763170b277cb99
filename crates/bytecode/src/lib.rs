//! Bytecode readers for Lua 5.1, LuaJIT and the BO6 console variant.
//!
//! Each dialect decodes into the shared [`instruction::Op`] model so that the
//! rest of the pipeline never sees a native encoding.

pub mod chunk;
pub mod constant;
mod cursor;
pub mod function;
pub mod instruction;
mod lua51;
mod luajit;
pub mod opcode;
pub mod scope_tree;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use chunk::{Chunk, Dialect, LuaJitVersion};

/// Reader failures. Every variant is fatal for the file being read.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReadError {
    #[error("malformed header: {0}")]
    MalformedHeader(String),
    #[error("truncated stream: needed more bytes at offset {offset}")]
    TruncatedStream { offset: usize },
    #[error("unsupported dialect: {0}")]
    UnsupportedDialect(String),
    #[error("invalid opcode {opcode:#04x} at pc {pc}")]
    InvalidOpcode { opcode: u8, pc: usize },
    #[error("malformed function body: {0}")]
    MalformedBody(String),
}

/// Reader configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOptions {
    /// Decode line numbers and local/upvalue names when the chunk has them.
    pub debug_info: bool,
}

/// Parse a bytecode buffer, selecting the dialect from its header.
pub fn read_chunk(bytes: &[u8], options: &ReadOptions) -> Result<Chunk, ReadError> {
    let dialect = Dialect::detect(bytes)?;
    log::debug!("reading {} chunk ({} bytes)", dialect, bytes.len());
    match dialect {
        Dialect::Lua51 => lua51::read(bytes, options),
        Dialect::LuaJit(_) | Dialect::LuaJitBo6 => luajit::read(bytes, dialect, options),
    }
}
