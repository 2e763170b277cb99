use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::PackageIndex;

static SHARED: OnceLock<PackageIndex> = OnceLock::new();

/// `PackageIndex/` next to the running executable.
pub fn default_index_dir() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    Some(exe.parent()?.join("PackageIndex"))
}

/// The process-wide index, loaded from `dir` by the first caller.
///
/// Later calls return the same table whatever their arguments; call this
/// once before starting workers. A missing directory yields an empty index.
pub fn shared_index(dir: Option<&Path>, mask: u64) -> &'static PackageIndex {
    SHARED.get_or_init(|| {
        let mut index = PackageIndex::new(mask);
        match dir {
            Some(dir) if dir.is_dir() => {
                let count = index.load_dir(dir);
                log::info!("loaded {count} hash entries from {}", dir.display());
            }
            Some(dir) => log::debug!("no package index at {}", dir.display()),
            None => {}
        }
        index
    })
}
