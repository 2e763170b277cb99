//! Lifting decoded instructions into the HIR control flow graph.

pub mod block_discovery;
pub mod lifter;

pub use lifter::build_cfg;

/// Errors raised while building a function's CFG. The function is reported
/// as failed; its siblings are unaffected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CfgError {
    #[error("jump at pc {pc} targets {target}, outside the function")]
    DanglingJumpTarget { pc: usize, target: i64 },
    #[error("conditional test at pc {pc} is not followed by a jump")]
    MissingBranchJump { pc: usize },
    #[error("malformed loop control at pc {pc}")]
    MalformedLoop { pc: usize },
    #[error("instruction at pc {pc} references missing constant {index}")]
    BadConstant { pc: usize, index: u32 },
    #[error("instruction at pc {pc} references missing prototype {index}")]
    BadPrototype { pc: usize, index: u32 },
}
