use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use rustc_hash::FxHashSet;
use walkdir::WalkDir;

/// Expand the command-line paths into the list of files to decompile.
///
/// Directories are walked recursively. With `debug_info` only `.luac`
/// files are taken from them, otherwise any extension starting with `lua`.
/// Files named directly only need the `lua` prefix. Missing paths are
/// logged and skipped. Earlier decompiler output is never picked up again.
pub fn discover(paths: &[PathBuf], debug_info: bool) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            for entry in WalkDir::new(path).sort_by_file_name() {
                match entry {
                    Ok(entry) if entry.file_type().is_file() => {
                        if walked_file_matches(entry.path(), debug_info) {
                            files.push(entry.into_path());
                        }
                    }
                    Ok(_) => {}
                    Err(err) => log::warn!("{}: {err}", path.display()),
                }
            }
        } else if path.is_file() {
            if has_lua_extension(path) {
                files.push(path.clone());
            } else {
                log::warn!("{}: not a Lua file, skipped", path.display());
            }
        } else {
            log::warn!("{}: no such file or directory", path.display());
        }
    }

    let mut seen = FxHashSet::default();
    files.retain(|f| seen.insert(f.clone()) && !is_decompiled_output(f));
    log::info!("{} files to process", files.len());
    files
}

/// True for files this tool wrote itself.
pub fn is_decompiled_output(path: &Path) -> bool {
    path.file_name()
        .and_then(OsStr::to_str)
        .is_some_and(|name| name.ends_with(".dec.lua") || name.ends_with(".luadec"))
}

fn walked_file_matches(path: &Path, debug_info: bool) -> bool {
    if debug_info {
        path.extension().is_some_and(|e| e == "luac")
    } else {
        has_lua_extension(path)
    }
}

fn has_lua_extension(path: &Path) -> bool {
    path.extension()
        .and_then(OsStr::to_str)
        .is_some_and(|e| e.starts_with("lua"))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, b"").unwrap();
    }

    #[test]
    fn directories_are_walked_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        for name in [
            "a.lua",
            "b.luac",
            "notes.txt",
            "a.dec.lua",
            "old.luadec",
            "nested/deep/c.lua",
        ] {
            touch(&root.join(name));
        }

        let found = discover(&[root.to_path_buf()], false);
        assert_eq!(
            found,
            vec![root.join("a.lua"), root.join("b.luac"), root.join("nested/deep/c.lua")]
        );

        let debug = discover(&[root.to_path_buf()], true);
        assert_eq!(debug, vec![root.join("b.luac")]);
    }

    #[test]
    fn explicit_files_are_deduplicated_and_checked() {
        let dir = tempfile::tempdir().unwrap();
        let lua = dir.path().join("x.lua");
        let txt = dir.path().join("x.txt");
        touch(&lua);
        touch(&txt);

        let found = discover(
            &[lua.clone(), txt, dir.path().join("missing.lua"), lua.clone()],
            true,
        );
        assert_eq!(found, vec![lua]);
    }

    #[test]
    fn own_output_is_recognised() {
        assert!(is_decompiled_output(Path::new("ui/menu.dec.lua")));
        assert!(is_decompiled_output(Path::new("menu.luadec")));
        assert!(!is_decompiled_output(Path::new("menu.lua")));
    }
}
