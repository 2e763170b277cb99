//! Lua source emission from structured HIR.

mod lua_emitter;

use codlua_bytecode::function::Function;
use codlua_hir::control::ControlNode;
use codlua_hir::func::HirFunc;

pub use lua_emitter::emit_chunk;

/// A function that made it through structuring.
#[derive(Debug, Clone)]
pub struct Lowered {
    pub hir: HirFunc,
    pub tree: ControlNode,
}

/// One prototype of a chunk, ready to print, with its nested functions in
/// the same order as `proto.children`.
#[derive(Debug, Clone)]
pub struct LoweredFunction<'a> {
    pub proto: &'a Function,
    /// Depth-first position in the chunk; the main function is 0.
    pub index: usize,
    /// The structured function, or why it could not be built.
    pub body: Result<Lowered, String>,
    pub children: Vec<LoweredFunction<'a>>,
}

/// Output switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmitOptions {
    /// Prefix every function body with a statistics comment.
    pub function_stats: bool,
    /// Prefix hash constants with the index they resolved from.
    pub show_hash_type: bool,
    /// Applied to hash constants before lookup.
    pub hash_mask: u64,
}

impl Default for EmitOptions {
    fn default() -> Self {
        Self {
            function_stats: false,
            show_hash_type: false,
            hash_mask: u64::MAX,
        }
    }
}
