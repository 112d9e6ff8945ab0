use memchr::memmem::Finder;
use regex_automata::dfa::regex::Regex;
use regex_automata::util::syntax;
use regex_automata::Input;
use tracing::debug;

use super::{pattern_min_len, EngineOptions, RegexEngine};
use crate::errors::{GrepError, GrepResult};

enum Scanner {
    /// Dense forward DFA plus a reverse DFA for leftmost start-of-match.
    Automaton(Regex),
    /// Fixed-string search, selected by the `literal` option.
    Literal(Finder<'static>),
}

/// Streaming-DFA backend with an optional literal-string mode that bypasses
/// regex compilation entirely.
#[derive(Default)]
pub struct DfaEngine {
    scanner: Option<Scanner>,
    literal: bool,
    min_len: u32,
}

impl DfaEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RegexEngine for DfaEngine {
    fn prepare(&mut self, opts: &EngineOptions) -> GrepResult<()> {
        self.literal = opts.literal;
        Ok(())
    }

    fn compile(&mut self, pattern: &str) -> GrepResult<u32> {
        if self.literal {
            self.min_len = pattern.len() as u32;
            self.scanner = Some(Scanner::Literal(
                Finder::new(pattern.as_bytes()).into_owned(),
            ));
            debug!(pattern, "compiled literal scanner");
            return Ok(self.min_len);
        }

        let re = Regex::builder()
            .syntax(syntax::Config::new().unicode(false).utf8(false))
            .build(pattern)
            .map_err(|e| GrepError::pattern(e.to_string()))?;
        self.min_len = pattern_min_len(pattern);
        debug!(pattern, min_len = self.min_len, "compiled DFA engine");
        self.scanner = Some(Scanner::Automaton(re));
        Ok(self.min_len)
    }

    fn find(&self, window: &[u8], at: usize) -> GrepResult<Option<(usize, usize)>> {
        let scanner = self
            .scanner
            .as_ref()
            .ok_or_else(|| GrepError::engine("engine used before compile"))?;
        match scanner {
            Scanner::Literal(finder) => Ok(finder
                .find(&window[at..])
                .map(|pos| (pos, pos + finder.needle().len()))),
            Scanner::Automaton(re) => {
                let input = Input::new(window).range(at..);
                re.try_search(&input)
                    .map(|m| m.map(|m| (m.start() - at, m.end() - at)))
                    .map_err(|e| GrepError::engine(e.to_string()))
            }
        }
    }

    fn min_len(&self) -> u32 {
        self.min_len
    }
}
