//! Regex fallback parser.
//!
//! Matches `def`/`class` statements at line start (column zero — top level
//! only) and assigns each block the region up to the next match. The
//! fallback cannot detect syntax errors, so `parse_error` is always
//! `false`; the AST-backed external parser is the only source of syntax
//! verdicts.

use regex::Regex;

use super::{PythonParse, PythonParser, RawSpan};
use crate::model::symbol::PyKind;

/// Pure regex scan over `^(def|class)\s+<name>` at line start.
#[derive(Debug)]
pub struct RegexParser {
    pattern: Regex,
}

impl RegexParser {
    /// Build the parser. The pattern is static and always compiles.
    #[must_use]
    pub fn new() -> Self {
        #[allow(clippy::unwrap_used)]
        let pattern = Regex::new(r"(?m)^(def|class)\s+([A-Za-z_][A-Za-z0-9_]*)").unwrap();
        Self { pattern }
    }

    fn spans(&self, text: &str) -> Vec<RawSpan> {
        let mut spans = Vec::new();
        for captures in self.pattern.captures_iter(text) {
            let (Some(whole), Some(kind), Some(name)) =
                (captures.get(0), captures.get(1), captures.get(2))
            else {
                continue;
            };
            let kind = match kind.as_str() {
                "def" => PyKind::Def,
                _ => PyKind::Class,
            };
            spans.push(RawSpan {
                kind,
                name: name.as_str().to_owned(),
                start: whole.start(),
                // Raw end is provisional; from_spans extends every span to
                // the next symbol's start anyway.
                end: whole.end(),
            });
        }
        spans
    }
}

impl Default for RegexParser {
    fn default() -> Self {
        Self::new()
    }
}

impl PythonParser for RegexParser {
    fn parse_top_level(&self, text: &str) -> PythonParse {
        PythonParse::from_spans(text, self.spans(text))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
