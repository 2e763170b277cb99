use std::path::PathBuf;

use parking_lot::Mutex;
use rayon::prelude::*;

use codlua_hash::HashResolver;

use crate::{decompile_file, Config, FileOutcome};

/// Collects per-file outcomes from the worker pool.
#[derive(Default)]
struct ResultSink {
    outcomes: Mutex<Vec<(usize, FileOutcome)>>,
}

impl ResultSink {
    fn push(&self, index: usize, outcome: FileOutcome) {
        self.outcomes.lock().push((index, outcome));
    }

    /// Outcomes in input order.
    fn into_outcomes(self) -> Vec<FileOutcome> {
        let mut outcomes = self.outcomes.into_inner();
        outcomes.sort_by_key(|(index, _)| *index);
        outcomes.into_iter().map(|(_, outcome)| outcome).collect()
    }
}

/// Counts for the end-of-run report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub failed: usize,
}

impl BatchSummary {
    pub fn of(outcomes: &[FileOutcome]) -> Self {
        let succeeded = outcomes.iter().filter(|o| o.result.is_ok()).count();
        Self {
            succeeded,
            failed: outcomes.len() - succeeded,
        }
    }
}

/// Decompile every file on the current rayon pool, one task per file.
/// A failing file is logged and reported; it never stops the others.
pub fn decompile_batch(
    files: &[PathBuf],
    config: &Config,
    resolver: Option<&dyn HashResolver>,
) -> Vec<FileOutcome> {
    let sink = ResultSink::default();
    files.par_iter().enumerate().for_each(|(index, path)| {
        let outcome = decompile_file(path, config, resolver);
        match &outcome.result {
            Ok(out) => log::info!("decompiled {} -> {}", path.display(), out.display()),
            Err(err) => log::error!("failed to decompile {}: {err}", path.display()),
        }
        sink.push(index, outcome);
    });
    sink.into_outcomes()
}

#[cfg(test)]
mod tests {
    use std::fs;

    use codlua_bytecode::ReadError;

    use super::*;
    use crate::tests::return_one;
    use crate::DecompileError;

    #[test]
    fn one_bad_file_does_not_stop_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.lua");
        let bad = dir.path().join("bad.lua");
        let bytes = return_one();
        fs::write(&good, &bytes).unwrap();
        fs::write(&bad, &bytes[..bytes.len() / 2]).unwrap();

        let outcomes = decompile_batch(&[bad.clone(), good.clone()], &Config::default(), None);
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].path, bad);
        assert!(matches!(
            outcomes[0].result,
            Err(DecompileError::Read(ReadError::TruncatedStream { .. }))
        ));
        assert_eq!(outcomes[1].path, good);
        assert_eq!(
            fs::read_to_string(dir.path().join("good.dec.lua")).unwrap(),
            "return 1\n"
        );
        assert_eq!(
            BatchSummary::of(&outcomes),
            BatchSummary {
                succeeded: 1,
                failed: 1
            }
        );
    }

    #[test]
    fn output_directory_receives_the_files() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let file = input.path().join("menu.luac");
        fs::write(&file, return_one()).unwrap();
        let config = Config {
            output_dir: Some(output.path().to_path_buf()),
            ..Config::default()
        };

        let outcomes = decompile_batch(&[file], &config, None);
        assert_eq!(
            outcomes[0].result.as_ref().unwrap(),
            &output.path().join("menu.luac")
        );
        assert!(!input.path().join("menu.dec.lua").exists());
    }
}
