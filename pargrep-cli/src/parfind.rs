use clap::Parser;
use pargrep::{FindConfig, GrepError, MetaFilter};
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

/// Parallel metadata search, driven by the same cooperative tree walker as
/// pargrep. Prints the path of every regular file accepted by the filter.
#[derive(Parser, Debug)]
#[command(name = "parfind", version, about)]
struct Cli {
    /// Use N cores in parallel
    #[arg(short = 'n', value_name = "CORES", default_value_t = 1)]
    cores: usize,

    /// Directory to search
    root: PathBuf,

    /// Shell-glob match against the base name
    #[arg(long = "name", value_name = "GLOB")]
    name: Option<String>,

    /// Only print files of at least BYTES bytes
    #[arg(long = "size", value_name = "BYTES")]
    size: Option<u64>,

    /// Only print files owned by UID
    #[arg(long = "uid")]
    uid: Option<u32>,

    /// Only print files with group owner GID
    #[arg(long = "gid")]
    gid: Option<u32>,

    /// Octal permission bits; prefix with - (all bits) or / (any bit)
    /// just like with find
    #[arg(long = "perm", value_name = "OCTAL")]
    perm: Option<String>,

    /// File type letter as known from find
    #[arg(long = "type", value_name = "TYPE")]
    file_type: Option<char>,

    /// Do not recurse deeper than N directories
    #[arg(long = "maxdepth", value_name = "N")]
    max_depth: Option<usize>,
}

fn build_filter(cli: &Cli) -> Result<MetaFilter, GrepError> {
    let mut filter = MetaFilter::new();
    if let Some(name) = &cli.name {
        filter.add_name(name)?;
    }
    if let Some(size) = cli.size {
        filter.add_size(size);
    }
    if let Some(uid) = cli.uid {
        filter.add_uid(uid);
    }
    if let Some(gid) = cli.gid {
        filter.add_gid(gid);
    }
    if let Some(perm) = &cli.perm {
        filter.add_perm(perm)?;
    }
    if let Some(letter) = cli.file_type {
        filter.add_type(letter)?;
    }
    Ok(filter)
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let filter = match build_filter(&cli) {
        Ok(filter) => filter,
        Err(e) => {
            eprintln!("{e}");
            process::exit(1);
        }
    };

    let config = FindConfig {
        root: cli.root,
        cores: cli.cores,
        max_depth: cli.max_depth.unwrap_or(usize::MAX),
        filter,
    };

    if let Err(e) = pargrep::run_find(&config) {
        eprintln!("{e}");
        process::exit(-1);
    }
}
