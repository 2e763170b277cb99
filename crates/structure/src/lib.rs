//! Control-flow structuring: recover `if`, loops and boolean operators from
//! a function's CFG.

pub mod short_circuit;
pub mod structurer;

pub use short_circuit::fold_short_circuits;
pub use structurer::{structure_function, try_structure};

/// The CFG has a shape no structured construct covers. The function is
/// still emitted, as labels and gotos.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StructureError {
    #[error("ambiguous control shape at pc {pc}")]
    AmbiguousControlShape { pc: usize },
}
