//! Python top-level parser capability.
//!
//! The python adapter needs one thing: the list of top-level `def`/`class`
//! blocks of a source file, with the source region assigned to each.
//! Parsing is exposed as a trait with two implementations:
//!
//! - [`external::ExternalParser`] — an AST-backed parser process spoken to
//!   over a small JSON stdin/stdout protocol, with a wall-clock timeout and
//!   a bounded output size;
//! - [`fallback::RegexParser`] — a pure regex scan used when the external
//!   parser is unavailable (unless strict mode disables the fallback).
//!
//! # Span extension
//!
//! Consecutive top-level symbol spans are extended so that each symbol's
//! end equals the next symbol's start (EOF for the last): inter-symbol
//! whitespace belongs to the preceding symbol. This makes replacing or
//! deleting a span splice cleanly.

pub mod external;
pub mod fallback;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::model::symbol::PyKind;

// ---------------------------------------------------------------------------
// ParserMode
// ---------------------------------------------------------------------------

/// Which backend the external parser process should prefer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParserMode {
    /// Let the parser process pick (libcst when importable, else ast).
    #[default]
    Auto,
    /// Require libcst.
    Libcst,
    /// Require the stdlib ast module.
    Ast,
}

impl ParserMode {
    /// The wire value sent to the parser process.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Libcst => "libcst",
            Self::Ast => "ast",
        }
    }

    /// Parse a mode name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "auto" => Some(Self::Auto),
            "libcst" => Some(Self::Libcst),
            "ast" => Some(Self::Ast),
            _ => None,
        }
    }
}

impl fmt::Display for ParserMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Parse results
// ---------------------------------------------------------------------------

/// A raw `(kind, name, start, end)` span as reported by a backend, before
/// span extension.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawSpan {
    pub kind: PyKind,
    pub name: String,
    /// Byte offset of the block start.
    pub start: usize,
    /// Byte offset one past the block end.
    pub end: usize,
}

/// One top-level symbol with its extended source region.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedSymbol {
    pub kind: PyKind,
    pub name: String,
    /// Byte offset of the region start.
    pub start: usize,
    /// Byte offset one past the region end (the next symbol's start, or EOF).
    pub end: usize,
    /// `text[start..end)`.
    pub body: String,
}

/// The result of parsing a Python file's top level.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PythonParse {
    /// Symbols keyed `kind:name`; for duplicated keys, the first occurrence.
    pub symbols: BTreeMap<String, ParsedSymbol>,
    /// Keys in first-appearance order (each key once).
    pub order: Vec<String>,
    /// Keys that appeared more than once.
    pub duplicates: Vec<String>,
    /// `true` when the file could not be parsed at all.
    pub parse_error: bool,
}

impl PythonParse {
    /// The failure value: no symbols, `parse_error = true`.
    #[must_use]
    pub fn failed() -> Self {
        Self {
            parse_error: true,
            ..Self::default()
        }
    }

    /// The `kind:name` key used by parsers, effects, and anchors.
    #[must_use]
    pub fn key(kind: PyKind, name: &str) -> String {
        format!("{kind}:{name}")
    }

    /// Assemble a parse result from raw spans: sort by start, extend each
    /// span to the next symbol's start (EOF for the last), collect order
    /// and duplicates.
    #[must_use]
    pub fn from_spans(text: &str, mut spans: Vec<RawSpan>) -> Self {
        spans.sort_by_key(|s| s.start);
        let mut parse = Self::default();
        for (i, span) in spans.iter().enumerate() {
            let end = spans.get(i + 1).map_or(text.len(), |next| next.start);
            let start = span.start.min(text.len());
            let end = end.clamp(start, text.len());
            let key = Self::key(span.kind, &span.name);
            if parse.symbols.contains_key(&key) {
                if !parse.duplicates.contains(&key) {
                    parse.duplicates.push(key);
                }
                continue;
            }
            parse.order.push(key.clone());
            parse.symbols.insert(
                key,
                ParsedSymbol {
                    kind: span.kind,
                    name: span.name.clone(),
                    start,
                    end,
                    body: text[start..end].to_owned(),
                },
            );
        }
        parse
    }
}

// ---------------------------------------------------------------------------
// PythonParser trait
// ---------------------------------------------------------------------------

/// The parsing capability the python adapter is built on.
pub trait PythonParser: Send + Sync {
    /// Parse the top level of a Python source file.
    ///
    /// Never panics and never blocks beyond the implementation's own
    /// timeout; total failure is expressed as `parse_error = true`.
    fn parse_top_level(&self, text: &str) -> PythonParse;
}

/// Build the configured parser: external process when a binary is
/// configured, regex fallback otherwise.
#[must_use]
pub fn build_parser(
    bin: Option<std::path::PathBuf>,
    mode: ParserMode,
    strict: bool,
) -> Arc<dyn PythonParser> {
    match bin {
        Some(bin) => Arc::new(external::ExternalParser::new(bin, mode, strict)),
        None if strict => Arc::new(external::UnavailableParser),
        None => Arc::new(fallback::RegexParser::new()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
