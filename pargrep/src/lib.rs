pub mod config;
pub mod engine;
pub mod errors;
pub mod filter;
pub mod matcher;
pub mod run;
pub mod sink;
pub mod walk;

// Re-export commonly used types
pub use config::{EngineKind, GrepConfig};
pub use errors::{GrepError, GrepResult};
pub use filter::MetaFilter;
pub use matcher::{FileMatcher, MatchOptions};
pub use run::{run, run_find, run_find_with_sink, run_with_sink, FindConfig};
pub use sink::OutputSink;
pub use walk::{FileJob, FileMeta, WalkStatus, Walker};
