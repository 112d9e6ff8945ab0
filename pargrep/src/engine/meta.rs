use regex::bytes::{Regex, RegexBuilder};
use tracing::debug;

use super::{pattern_min_len, EngineOptions, RegexEngine};
use crate::errors::{GrepError, GrepResult};

/// General-purpose backend over `regex::bytes`.
///
/// Handles the full pattern syntax; the minimum match width comes from
/// syntax introspection since the matcher itself does not expose one.
#[derive(Debug, Default)]
pub struct MetaEngine {
    re: Option<Regex>,
    min_len: u32,
}

impl MetaEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RegexEngine for MetaEngine {
    fn prepare(&mut self, opts: &EngineOptions) -> GrepResult<()> {
        if opts.literal {
            return Err(GrepError::config(
                "no literal support in the general engine, use the DFA engine",
            ));
        }
        Ok(())
    }

    fn compile(&mut self, pattern: &str) -> GrepResult<u32> {
        // byte semantics: `.` is any non-newline byte, classes are ASCII
        let re = RegexBuilder::new(pattern)
            .unicode(false)
            .build()
            .map_err(|e| GrepError::pattern(e.to_string()))?;
        self.min_len = pattern_min_len(pattern);
        debug!(pattern, min_len = self.min_len, "compiled general engine");
        self.re = Some(re);
        Ok(self.min_len)
    }

    fn find(&self, window: &[u8], at: usize) -> GrepResult<Option<(usize, usize)>> {
        let re = self
            .re
            .as_ref()
            .ok_or_else(|| GrepError::engine("engine used before compile"))?;
        Ok(re
            .find_at(window, at)
            .map(|m| (m.start() - at, m.end() - at)))
    }

    fn min_len(&self) -> u32 {
        self.min_len
    }
}
