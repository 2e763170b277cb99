//! High-level intermediate representation shared by every pipeline stage.
//!
//! A function is a CFG of basic blocks holding flat statements over an
//! expression arena. Structuring later lays a [`control::ControlNode`] tree
//! over the same blocks.

pub mod access;
pub mod arena;
pub mod cfg;
pub mod control;
pub mod expr;
pub mod func;
pub mod stmt;
pub mod types;
pub mod var;
