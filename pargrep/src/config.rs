use config::{Config as ConfigBuilder, ConfigError, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::errors::{GrepError, GrepResult};

/// Default mapping window: 1 GiB.
pub const DEFAULT_CHUNK_SIZE: usize = 1 << 30;
/// Low-memory floor for the mapping window: 32 MiB.
pub const MIN_CHUNK_SIZE: usize = 1 << 25;

/// Which matching backend a worker compiles its pattern with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// General-purpose regex engine (default).
    #[default]
    General,
    /// Dense-DFA engine with leftmost start-of-match reporting and an
    /// optional literal-string mode.
    Dfa,
}

/// Configuration for one search run.
///
/// Values can be loaded from `.pargrep.yaml` in the current directory or
/// from `$CONFIG_DIR/pargrep/config.yaml`, with command-line arguments
/// taking precedence through [`GrepConfig::merge_with_cli`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GrepConfig {
    /// The search pattern (a regex, or a literal string with `literal`)
    pub pattern: String,

    /// Files to match, or directories when `recursive` is set
    pub paths: Vec<PathBuf>,

    /// Recurse into directory arguments
    pub recursive: bool,

    /// Print the byte offset of each match
    pub print_offset: bool,

    /// Suppress line reconstruction; with `print_offset`, prints only
    /// offsets, otherwise prints `matches` once per file
    pub no_line: bool,

    /// Stop scanning a file after its first match
    pub single_match: bool,

    /// Bracket matches with ANSI invert sequences
    pub colored: bool,

    /// Prefix every record with its file path even for a single argument
    pub print_path: bool,

    /// Low-memory level; each level halves the mapping window (floor 32 MiB)
    pub low_mem: u8,

    /// Number of workers; values above 1 require `recursive`
    pub cores: usize,

    /// Matching backend
    pub engine: EngineKind,

    /// Treat the pattern as a literal string (DFA engine only)
    pub literal: bool,

    /// Log level for diagnostics on standard error
    pub log_level: String,
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for GrepConfig {
    fn default() -> Self {
        Self {
            pattern: String::new(),
            paths: Vec::new(),
            recursive: false,
            print_offset: false,
            no_line: false,
            single_match: false,
            colored: false,
            print_path: false,
            low_mem: 0,
            cores: 1,
            engine: EngineKind::General,
            literal: false,
            log_level: default_log_level(),
        }
    }
}

impl GrepConfig {
    /// Loads configuration from the default locations.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Loads configuration, optionally adding a custom file on top of the
    /// global and local defaults.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        let config_files = [
            dirs::config_dir().map(|p| p.join("pargrep/config.yaml")),
            Some(PathBuf::from(".pargrep.yaml")),
            config_path.map(PathBuf::from),
        ];

        for path in config_files.iter().flatten() {
            if path.exists() {
                builder = builder.add_source(File::from(path.as_path()));
            }
        }

        builder.build()?.try_deserialize()
    }

    /// Merges command-line values into file-derived values. CLI wins
    /// wherever it differs from the defaults.
    pub fn merge_with_cli(mut self, cli: GrepConfig) -> Self {
        if !cli.pattern.is_empty() {
            self.pattern = cli.pattern;
        }
        if !cli.paths.is_empty() {
            self.paths = cli.paths;
        }
        self.recursive |= cli.recursive;
        self.print_offset |= cli.print_offset;
        self.no_line |= cli.no_line;
        self.single_match |= cli.single_match;
        self.colored |= cli.colored;
        self.print_path |= cli.print_path;
        if cli.low_mem > 0 {
            self.low_mem = cli.low_mem;
        }
        if cli.cores != 1 {
            self.cores = cli.cores;
        }
        if cli.engine != EngineKind::default() {
            self.engine = cli.engine;
        }
        self.literal |= cli.literal;
        if cli.log_level != default_log_level() {
            self.log_level = cli.log_level;
        }
        self
    }

    /// Rejects flag combinations the run drivers cannot honor.
    pub fn validate(&self) -> GrepResult<()> {
        if self.paths.is_empty() {
            return Err(GrepError::config("no search path given"));
        }
        if self.cores > 1 && !self.recursive {
            return Err(GrepError::config(
                "multicore support only for recursive searches",
            ));
        }
        Ok(())
    }

    /// The mapping window for this run: 1 GiB by default, halved per
    /// low-memory level down to 32 MiB, and quartered again when more than
    /// one worker shares physical memory.
    pub fn effective_chunk_size(&self) -> usize {
        let mut chunk = DEFAULT_CHUNK_SIZE >> self.low_mem.min(30);
        if chunk < MIN_CHUNK_SIZE {
            chunk = MIN_CHUNK_SIZE;
        }
        if self.cores > 1 {
            chunk >>= 2;
        }
        chunk
    }

    /// Worker count bounded to something the host can schedule.
    pub fn effective_cores(&self) -> usize {
        self.cores.clamp(1, num_cpus::get().max(1) * 4)
    }
}
