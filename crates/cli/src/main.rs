use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use codlua::{BatchSummary, Config};
use codlua_hash::HashResolver;

/// Lua decompiler for Call of Duty games.
#[derive(Debug, Parser)]
#[command(name = "codluadec", version)]
struct Args {
    /// Compiled Lua files, or directories to search for them.
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Write decompiled files here instead of next to each input.
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Read debug info (local names); only `.luac` files are taken from directories.
    #[arg(long)]
    debug: bool,

    /// Prefix every function with a statistics comment.
    #[arg(short = 'f', long = "functionstats", visible_alias = "fs")]
    function_stats: bool,

    /// Tag resolved hashes with the index they came from.
    #[arg(long)]
    show_hash_type: bool,

    /// Number of low hash bits that take part in lookups.
    #[arg(long, default_value_t = 64, value_parser = clap::value_parser!(u8).range(0..=64))]
    hash_bits: u8,

    /// Directory of `.wni` package index files [default: PackageIndex next to the executable].
    #[arg(long)]
    package_index: Option<PathBuf>,

    /// Worker threads; 0 picks one per core.
    #[arg(short, long, default_value_t = 0)]
    threads: usize,

    /// Log each pipeline stage.
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn config(&self) -> Config {
        Config {
            output_dir: self.output_dir.clone(),
            debug_info: self.debug,
            function_stats: self.function_stats,
            show_hash_type: self.show_hash_type,
            hash_bits: self.hash_bits,
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
        .format_timestamp(None)
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);
    let config = args.config();

    if let Some(dir) = &config.output_dir {
        fs::create_dir_all(dir)
            .with_context(|| format!("creating output directory {}", dir.display()))?;
    }

    let files = codlua::discover(&args.paths, config.debug_info);

    // Loaded once here; the workers only read it.
    let index_dir = args
        .package_index
        .clone()
        .or_else(codlua_hash::default_index_dir);
    let index = codlua_hash::shared_index(index_dir.as_deref(), config.hash_mask());
    let resolver: Option<&dyn HashResolver> =
        (!index.is_empty()).then_some(index as &dyn HashResolver);

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(args.threads)
        .build()
        .context("building the worker pool")?;
    let outcomes = pool.install(|| codlua::decompile_batch(&files, &config, resolver));

    let summary = BatchSummary::of(&outcomes);
    eprintln!("{} succeeded, {} failed", summary.succeeded, summary.failed);
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::error::ErrorKind;
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn command_is_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn flags_map_onto_the_config() {
        let args = Args::try_parse_from([
            "codluadec",
            "--fs",
            "--debug",
            "-o",
            "out",
            "--hash-bits",
            "60",
            "scripts",
        ])
        .unwrap();
        let config = args.config();
        assert!(config.function_stats && config.debug_info);
        assert_eq!(config.output_dir, Some(PathBuf::from("out")));
        assert_eq!(config.hash_bits, 60);
        assert_eq!(args.paths, vec![PathBuf::from("scripts")]);

        let short = Args::try_parse_from(["codluadec", "-f", "a.lua"]).unwrap();
        assert!(short.function_stats);
        assert_eq!(short.hash_bits, 64);
    }

    #[test]
    fn hash_bits_above_64_are_rejected() {
        let err = Args::try_parse_from(["codluadec", "--hash-bits", "65", "a.lua"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueValidation);
    }

    #[test]
    fn paths_are_required() {
        let err = Args::try_parse_from(["codluadec"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
    }
}
