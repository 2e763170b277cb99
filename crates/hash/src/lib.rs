//! Hash resolution for engine-hashed identifiers.
//!
//! Console builds replace many string keys with 64-bit hashes. A
//! [`PackageIndex`] maps those back to names, loaded from `.wni` index
//! files; the emitter consults it through [`HashResolver`].

mod index;
mod shared;

use std::path::PathBuf;

pub use index::PackageIndex;
pub use shared::{default_index_dir, shared_index};

/// A resolved hash: the original string and the index it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved<'a> {
    pub name: &'a str,
    /// Stem of the index file that supplied the name, e.g. `"scripts"`.
    pub kind: &'a str,
}

/// Lookup of hash constants during emission.
///
/// Implementations mask the query before lookup, so
/// `resolve(h, m) == resolve(h & m, m)` for every `h`.
pub trait HashResolver: Sync {
    fn resolve(&self, hash: u64, mask: u64) -> Option<Resolved<'_>>;
}

/// The mask that keeps the low `bits` bits of a hash.
pub fn mask_for_bits(bits: u8) -> u64 {
    match bits {
        0 => 0,
        b if b >= 64 => u64::MAX,
        b => (1u64 << b) - 1,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("bad magic {0:#010x}")]
    BadMagic(u32),
    #[error("index data is truncated")]
    Truncated,
    #[error("negative size field in header")]
    NegativeSize,
    #[error("lz4 block: {0}")]
    Decompress(String),
}
