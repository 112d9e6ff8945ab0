use clap::{ArgAction, Parser};
use pargrep::{EngineKind, GrepConfig, GrepError};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

/// Parallel regular-expression matcher for large files and deep trees.
///
/// Files are scanned through memory-mapped windows and the tree walk is
/// spread across CPU-pinned workers, which pays off on flash storage.
#[derive(Parser, Debug)]
#[command(name = "pargrep", version, about)]
struct Cli {
    /// Recurse into directory arguments
    #[arg(short = 'r', short_alias = 'R')]
    recursive: bool,

    /// Print the byte offset of each match
    #[arg(short = 'O')]
    offsets: bool,

    /// Do not print the matching line; with -O prints all offsets,
    /// otherwise prints "matches" once per file
    #[arg(short = 'l')]
    no_line: bool,

    /// Stop scanning a file after its first match, like grep on a binary
    #[arg(short = 's')]
    single_match: bool,

    /// Highlight matches with ANSI invert when stdout is a terminal
    #[arg(short = 'I')]
    highlight: bool,

    /// Low-memory mode: halve the 1 GiB mapping window, floor 32 MiB;
    /// may be given multiple times
    #[arg(short = 'L', action = ArgAction::Count)]
    low_mem: u8,

    /// Use N cores in parallel (requires -r; N <= 1 runs single-threaded)
    #[arg(short = 'n', value_name = "CORES", default_value_t = 1)]
    cores: usize,

    /// Use the streaming DFA engine instead of the default regex engine
    #[arg(short = 'H')]
    dfa: bool,

    /// Treat the pattern as a literal string instead of a regex
    /// (DFA engine only)
    #[arg(short = 'S')]
    literal: bool,

    /// Load settings from a specific configuration file
    #[arg(long = "config", value_name = "FILE")]
    config_file: Option<PathBuf>,

    /// The pattern to search for
    pattern: String,

    /// Files to match, or directories with -r
    #[arg(required = true, num_args = 1..)]
    paths: Vec<PathBuf>,
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // usage problems exit 1, whatever clap would prefer
            let _ = e.print();
            process::exit(1);
        }
    };

    let file_config = match GrepConfig::load_from(cli.config_file.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            if cli.config_file.is_some() {
                eprintln!("configuration error: {e}");
                process::exit(1);
            }
            GrepConfig::default()
        }
    };

    let cli_config = GrepConfig {
        pattern: cli.pattern,
        paths: cli.paths,
        recursive: cli.recursive,
        print_offset: cli.offsets,
        no_line: cli.no_line,
        single_match: cli.single_match,
        colored: cli.highlight && std::io::stdout().is_terminal(),
        low_mem: cli.low_mem,
        cores: cli.cores,
        engine: if cli.dfa {
            EngineKind::Dfa
        } else {
            EngineKind::General
        },
        literal: cli.literal,
        ..Default::default()
    };
    let config = file_config.merge_with_cli(cli_config);

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(&config.log_level))
                .unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    match pargrep::run(&config) {
        Ok(()) => {}
        Err(e @ GrepError::Config(_)) => {
            eprintln!("{e}");
            process::exit(1);
        }
        Err(e) => {
            // pattern compilation and other startup failures
            eprintln!("{e}");
            process::exit(-1);
        }
    }
}
