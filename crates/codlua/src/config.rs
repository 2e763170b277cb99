use std::path::PathBuf;

use codlua_bytecode::ReadOptions;
use codlua_emit::EmitOptions;
use codlua_hash::mask_for_bits;

/// Run configuration, built once by the caller and shared by reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Write results here instead of next to each input.
    pub output_dir: Option<PathBuf>,
    /// Decode debug sections for local and upvalue names.
    pub debug_info: bool,
    /// Prefix each function with a statistics comment.
    pub function_stats: bool,
    /// Tag resolved hashes with the index they came from.
    pub show_hash_type: bool,
    /// Width of the hash mask, 0 to 64.
    pub hash_bits: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_dir: None,
            debug_info: false,
            function_stats: false,
            show_hash_type: false,
            hash_bits: 64,
        }
    }
}

impl Config {
    pub fn hash_mask(&self) -> u64 {
        mask_for_bits(self.hash_bits)
    }

    pub fn read_options(&self) -> ReadOptions {
        ReadOptions {
            debug_info: self.debug_info,
        }
    }

    pub fn emit_options(&self) -> EmitOptions {
        EmitOptions {
            function_stats: self.function_stats,
            show_hash_type: self.show_hash_type,
            hash_mask: self.hash_mask(),
        }
    }
}
