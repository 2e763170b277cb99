//! codlua: a decompiler for Lua 5.1 and LuaJIT bytecode.
//!
//! This crate ties the pipeline together. Each file is read, every function
//! prototype is lifted and structured on its own, and the chunk is printed
//! as one Lua source file.

mod batch;
mod config;
mod discover;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use codlua_bytecode::function::Function;
use codlua_bytecode::ReadError;
use codlua_emit::{emit_chunk, Lowered, LoweredFunction};
use codlua_hash::HashResolver;

pub use batch::{decompile_batch, BatchSummary};
pub use config::Config;
pub use discover::{discover, is_decompiled_output};

/// Why a file produced no output.
#[derive(Debug, thiserror::Error)]
pub enum DecompileError {
    #[error(transparent)]
    Read(#[from] ReadError),
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// The result of processing one input file: where the source was written.
#[derive(Debug)]
pub struct FileOutcome {
    pub path: PathBuf,
    pub result: Result<PathBuf, DecompileError>,
}

/// Decompile a bytecode buffer into Lua source.
///
/// Only reader failures are fatal. A function that cannot be lifted is
/// printed as a placeholder and the rest of the chunk is kept.
pub fn decompile(
    bytecode: &[u8],
    config: &Config,
    resolver: Option<&dyn HashResolver>,
) -> Result<String, DecompileError> {
    let chunk = codlua_bytecode::read_chunk(bytecode, &config.read_options())?;
    log::debug!(
        "{} chunk with {} prototypes",
        chunk.dialect,
        chunk.main.prototype_count()
    );

    let mut counter = 0;
    let root = lower(&chunk.main, &mut counter);
    Ok(emit_chunk(&root, &config.emit_options(), resolver))
}

/// Lift and structure a prototype and all of its children, numbering them
/// depth first.
fn lower<'a>(proto: &'a Function, counter: &mut usize) -> LoweredFunction<'a> {
    let index = *counter;
    *counter += 1;

    let body = match codlua_lift::build_cfg(proto) {
        Ok(mut hir) => {
            let folded = codlua_structure::fold_short_circuits(&mut hir, proto);
            let tree = codlua_structure::structure_function(&mut hir);
            log::debug!(
                "function #{index}: {} blocks, {} short-circuit folds",
                hir.cfg.node_count(),
                folded
            );
            Ok(Lowered { hir, tree })
        }
        Err(err) => {
            log::warn!("function #{index}: {err}");
            Err(err.to_string())
        }
    };

    let children = proto.children.iter().map(|c| lower(c, counter)).collect();
    LoweredFunction {
        proto,
        index,
        body,
        children,
    }
}

/// Where the source for `input` goes: next to it with a `.dec.lua`
/// extension, or under the same file name in `output_dir`.
pub fn output_path(input: &Path, output_dir: Option<&Path>) -> PathBuf {
    match output_dir {
        Some(dir) => dir.join(input.file_name().unwrap_or(input.as_os_str())),
        None => input.with_extension("dec.lua"),
    }
}

/// Read, decompile and write one file.
pub fn decompile_file(
    path: &Path,
    config: &Config,
    resolver: Option<&dyn HashResolver>,
) -> FileOutcome {
    let result = fs::read(path)
        .map_err(|source| DecompileError::Io {
            path: path.to_path_buf(),
            source,
        })
        .and_then(|bytes| decompile(&bytes, config, resolver))
        .and_then(|source_text| {
            let out = output_path(path, config.output_dir.as_deref());
            fs::write(&out, source_text).map_err(|source| DecompileError::Io {
                path: out.clone(),
                source,
            })?;
            Ok(out)
        });
    FileOutcome {
        path: path.to_path_buf(),
        result,
    }
}

#[cfg(test)]
mod tests {
    use codlua_bytecode::constant::Constant;
    use codlua_bytecode::opcode::Lua51Op;
    use codlua_bytecode::test_support::{abc, abx, asbx, ChunkWriter};

    use super::*;

    fn chunk(code: &[u32], constants: &[Constant]) -> Vec<u8> {
        chunk_with_locals(code, constants, &[])
    }

    fn chunk_with_locals(code: &[u32], constants: &[Constant], locals: &[(&str, u32, u32)]) -> Vec<u8> {
        let mut w = ChunkWriter::new();
        w.function(0, code, constants, locals);
        w.0
    }

    fn string(s: &str) -> Constant {
        Constant::String(s.as_bytes().to_vec())
    }

    pub(crate) fn return_one() -> Vec<u8> {
        chunk(
            &[
                abx(Lua51Op::LoadK, 0, 0),
                abc(Lua51Op::Return, 0, 2, 0),
                abc(Lua51Op::Return, 0, 1, 0),
            ],
            &[Constant::Float(1.0)],
        )
    }

    fn decompiled(bytes: &[u8]) -> String {
        decompile(bytes, &Config::default(), None).unwrap()
    }

    fn decompiled_with_names(bytes: &[u8]) -> String {
        let config = Config {
            debug_info: true,
            ..Config::default()
        };
        decompile(bytes, &config, None).unwrap()
    }

    #[test]
    fn return_one_round_trips_to_source() {
        assert_eq!(decompiled(&return_one()), "return 1\n");
    }

    #[test]
    fn if_else_with_two_calls() {
        let bytes = chunk(
            &[
                abx(Lua51Op::GetGlobal, 0, 0),
                abc(Lua51Op::Test, 0, 0, 0),
                asbx(Lua51Op::Jmp, 0, 4),
                abx(Lua51Op::GetGlobal, 0, 1),
                abx(Lua51Op::LoadK, 1, 2),
                abc(Lua51Op::Call, 0, 2, 1),
                asbx(Lua51Op::Jmp, 0, 3),
                abx(Lua51Op::GetGlobal, 0, 1),
                abx(Lua51Op::LoadK, 1, 3),
                abc(Lua51Op::Call, 0, 2, 1),
                abc(Lua51Op::Return, 0, 1, 0),
            ],
            &[
                string("x"),
                string("print"),
                Constant::Float(1.0),
                Constant::Float(2.0),
            ],
        );
        assert_eq!(
            decompiled(&bytes),
            "if x then\n    print(1)\nelse\n    print(2)\nend\n"
        );
    }

    #[test]
    fn empty_numeric_for() {
        let bytes = chunk(
            &[
                abx(Lua51Op::LoadK, 0, 0),
                abx(Lua51Op::LoadK, 1, 1),
                abx(Lua51Op::LoadK, 2, 0),
                asbx(Lua51Op::ForPrep, 0, 0),
                asbx(Lua51Op::ForLoop, 0, -1),
                abc(Lua51Op::Return, 0, 1, 0),
            ],
            &[Constant::Float(1.0), Constant::Float(10.0)],
        );
        assert_eq!(decompiled(&bytes), "for var_3 = 1, 10 do\nend\n");
    }

    #[test]
    fn multi_local_declaration_keeps_every_name() {
        // local a, b = f(), g()
        // print(b, a)
        let bytes = chunk_with_locals(
            &[
                abx(Lua51Op::GetGlobal, 0, 0),
                abc(Lua51Op::Call, 0, 1, 2),
                abx(Lua51Op::GetGlobal, 1, 1),
                abc(Lua51Op::Call, 1, 1, 2),
                abx(Lua51Op::GetGlobal, 2, 2),
                abc(Lua51Op::Move, 3, 1, 0),
                abc(Lua51Op::Move, 4, 0, 0),
                abc(Lua51Op::Call, 2, 3, 1),
                abc(Lua51Op::Return, 0, 1, 0),
            ],
            &[string("f"), string("g"), string("print")],
            &[("a", 4, 9), ("b", 4, 9)],
        );
        assert_eq!(
            decompiled_with_names(&bytes),
            "local a = f()\nlocal b = g()\nprint(b, a)\n"
        );
    }

    #[test]
    fn multi_local_constants_are_not_inlined() {
        // local a, b = 1, 2
        // print(a + b)
        let bytes = chunk_with_locals(
            &[
                abx(Lua51Op::LoadK, 0, 0),
                abx(Lua51Op::LoadK, 1, 1),
                abx(Lua51Op::GetGlobal, 2, 2),
                abc(Lua51Op::Add, 3, 0, 1),
                abc(Lua51Op::Call, 2, 2, 1),
                abc(Lua51Op::Return, 0, 1, 0),
            ],
            &[Constant::Float(1.0), Constant::Float(2.0), string("print")],
            &[("a", 2, 6), ("b", 2, 6)],
        );
        assert_eq!(
            decompiled_with_names(&bytes),
            "local a = 1\nlocal b = 2\nprint(a + b)\n"
        );
    }

    #[test]
    fn and_or_value_choice_is_one_expression() {
        // local x = c and 1 or 2
        // print(x)
        let bytes = chunk_with_locals(
            &[
                abx(Lua51Op::GetGlobal, 0, 0),
                abc(Lua51Op::Test, 0, 0, 0),
                asbx(Lua51Op::Jmp, 0, 3),
                abx(Lua51Op::LoadK, 0, 1),
                abc(Lua51Op::Test, 0, 0, 1),
                asbx(Lua51Op::Jmp, 0, 1),
                abx(Lua51Op::LoadK, 0, 2),
                abx(Lua51Op::GetGlobal, 1, 3),
                abc(Lua51Op::Move, 2, 0, 0),
                abc(Lua51Op::Call, 1, 2, 1),
                abc(Lua51Op::Return, 0, 1, 0),
            ],
            &[
                string("c"),
                Constant::Float(1.0),
                Constant::Float(2.0),
                string("print"),
            ],
            &[("x", 7, 11)],
        );
        assert_eq!(
            decompiled_with_names(&bytes),
            "local x = c and 1 or 2\nprint(x)\n"
        );
    }

    #[test]
    fn unstructured_function_is_marked_and_uses_gotos() {
        // Two entries into one loop: the first test jumps past the body
        // straight to the loop's own test.
        let bytes = chunk(
            &[
                abx(Lua51Op::GetGlobal, 0, 0),
                abc(Lua51Op::Test, 0, 0, 0),
                asbx(Lua51Op::Jmp, 0, 2),
                abx(Lua51Op::GetGlobal, 1, 1),
                abx(Lua51Op::SetGlobal, 1, 2),
                abx(Lua51Op::GetGlobal, 0, 0),
                abc(Lua51Op::Test, 0, 0, 1),
                asbx(Lua51Op::Jmp, 0, -5),
                abc(Lua51Op::Return, 0, 1, 0),
            ],
            &[string("a"), string("b"), string("x")],
        );
        let text = decompiled(&bytes);
        assert!(
            text.starts_with("-- unstructured control flow: ambiguous control shape at pc "),
            "{text}"
        );
        assert!(text.contains("::pc_3::"), "{text}");
        assert!(text.contains("goto pc_5"), "{text}");
        assert!(text.contains("x = b"), "{text}");
    }

    #[test]
    fn truncated_stream_is_a_read_error() {
        let bytes = return_one();
        // Cut inside the function header.
        let err = decompile(&bytes[..32], &Config::default(), None).unwrap_err();
        assert!(
            matches!(err, DecompileError::Read(ReadError::TruncatedStream { .. })),
            "{err:?}"
        );
    }

    #[test]
    fn output_goes_next_to_the_input_or_into_the_directory() {
        assert_eq!(
            output_path(Path::new("scripts/ui/menu.luac"), None),
            PathBuf::from("scripts/ui/menu.dec.lua")
        );
        assert_eq!(
            output_path(Path::new("scripts/ui/menu.lua"), Some(Path::new("out"))),
            PathBuf::from("out/menu.lua")
        );
        assert_eq!(
            output_path(Path::new("bare"), None),
            PathBuf::from("bare.dec.lua")
        );
    }

    #[test]
    fn decompile_file_writes_the_result() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("main.lua");
        fs::write(&input, return_one()).unwrap();

        let outcome = decompile_file(&input, &Config::default(), None);
        let written = outcome.result.unwrap();
        assert_eq!(written, dir.path().join("main.dec.lua"));
        assert_eq!(fs::read_to_string(written).unwrap(), "return 1\n");
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = decompile_file(&dir.path().join("gone.lua"), &Config::default(), None);
        assert!(matches!(outcome.result, Err(DecompileError::Io { .. })));
    }
}
