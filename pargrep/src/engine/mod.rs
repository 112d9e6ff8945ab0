//! Matching backends behind a small capability interface.
//!
//! An engine is prepared once, compiled once, and then answers "find the
//! leftmost match" over raw byte windows. One instance lives on each worker;
//! instances never share state. The contract is byte strings throughout; no
//! caller consumes capture groups.

pub mod dfa;
pub mod meta;

use crate::config::{EngineKind, GrepConfig};
use crate::errors::GrepResult;

pub use dfa::DfaEngine;
pub use meta::MetaEngine;

/// Options handed to an engine before compilation.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineOptions {
    /// Treat the pattern as a fixed byte string instead of a regex.
    pub literal: bool,
}

/// A compiled pattern plus the two operations the scanner needs.
pub trait RegexEngine: Send {
    /// Validates requested features. Rejecting an option is a recoverable
    /// configuration error.
    fn prepare(&mut self, opts: &EngineOptions) -> GrepResult<()>;

    /// Compiles the pattern and returns the smallest possible match width
    /// in bytes, or 0 when the backend cannot compute it.
    fn compile(&mut self, pattern: &str) -> GrepResult<u32>;

    /// Finds the leftmost match in `window[at..]`. The full window is
    /// passed so backends can anchor start-of-line assertions against the
    /// bytes before `at`. Offsets in the result are relative to `at`.
    fn find(&self, window: &[u8], at: usize) -> GrepResult<Option<(usize, usize)>>;

    /// The minimum match width reported by [`RegexEngine::compile`].
    fn min_len(&self) -> u32;
}

/// Instantiates the backend selected by the configuration.
pub fn build_engine(kind: EngineKind) -> Box<dyn RegexEngine> {
    match kind {
        EngineKind::General => Box::new(MetaEngine::new()),
        EngineKind::Dfa => Box::new(DfaEngine::new()),
    }
}

/// Builds, prepares and compiles an engine for a run configuration.
pub fn compile_for(config: &GrepConfig) -> GrepResult<(Box<dyn RegexEngine>, u32)> {
    let mut engine = build_engine(config.engine);
    engine.prepare(&EngineOptions {
        literal: config.literal,
    })?;
    let min_len = engine.compile(&config.pattern)?;
    Ok((engine, min_len))
}

/// Minimum match width of a pattern via syntax introspection; 0 when the
/// pattern does not parse or the width is unbounded below. Parsed in byte
/// mode to agree with the engines.
pub(crate) fn pattern_min_len(pattern: &str) -> u32 {
    let parsed = regex_syntax::ParserBuilder::new()
        .unicode(false)
        .utf8(false)
        .build()
        .parse(pattern);
    match parsed {
        Ok(hir) => hir
            .properties()
            .minimum_len()
            .map(|n| n as u32)
            .unwrap_or(0),
        Err(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_min_len() {
        assert_eq!(pattern_min_len("needle"), 6);
        assert_eq!(pattern_min_len("a+"), 1);
        assert_eq!(pattern_min_len("x*"), 0);
        assert_eq!(pattern_min_len("ab|cdef"), 2);
        assert_eq!(pattern_min_len("."), 1);
    }

    #[test]
    fn test_compile_for_selects_backend() {
        let config = GrepConfig {
            pattern: "foo".to_string(),
            ..Default::default()
        };
        let (engine, min_len) = compile_for(&config).unwrap();
        assert_eq!(min_len, 3);
        assert_eq!(engine.min_len(), 3);
    }
}
