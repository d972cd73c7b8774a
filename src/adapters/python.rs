//! Python adapter — top-level `def`/`class` blocks are the symbols.
//!
//! All span questions are delegated to the configured [`PythonParser`];
//! this module only splices text. Every apply operation is total: when the
//! file cannot be parsed the input text is returned unchanged (the
//! verification classifier keeps such ops out of the log anyway).

use std::collections::BTreeMap;

use crate::model::hash::content_hash_text;
use crate::model::symbol::{PyKind, SymbolId};
use crate::parser::{PythonParse, PythonParser};

// ---------------------------------------------------------------------------
// PythonEdit
// ---------------------------------------------------------------------------

/// A minimal edit between two versions of a Python file.
///
/// `diff` orders edits so they replay cleanly: first the after-order
/// inserts/replaces, then before-only deletes in name-sorted order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PythonEdit {
    /// A symbol present only in the after version.
    Insert {
        kind: PyKind,
        name: String,
        after_content: String,
        /// Parser key (`kind:name`) of the preceding after-order symbol.
        insert_after_key: Option<String>,
        /// Parser key of the following symbol, used when nothing precedes.
        insert_before_key: Option<String>,
    },
    /// A symbol present on both sides with different body text.
    Replace {
        kind: PyKind,
        name: String,
        before_content: String,
        after_content: String,
    },
    /// A symbol present only in the before version.
    Delete {
        kind: PyKind,
        name: String,
        before_content: String,
    },
}

// ---------------------------------------------------------------------------
// symbol_hashes / diff
// ---------------------------------------------------------------------------

/// Map each top-level `def`/`class` to the hash of its assigned source
/// region. Empty when the file does not parse.
#[must_use]
pub fn symbol_hashes(
    parser: &dyn PythonParser,
    path: &str,
    text: &str,
) -> BTreeMap<SymbolId, String> {
    let parse = parser.parse_top_level(text);
    if parse.parse_error {
        return BTreeMap::new();
    }
    parse
        .symbols
        .values()
        .map(|sym| {
            (
                SymbolId::python(path, sym.kind, &sym.name),
                content_hash_text(&sym.body),
            )
        })
        .collect()
}

/// Minimal edit list between two versions of a file.
///
/// `None` when either side fails to parse or contains duplicate top-level
/// keys — there is no meaningful symbol-level diff for such files.
#[must_use]
pub fn diff(parser: &dyn PythonParser, before: &str, after: &str) -> Option<Vec<PythonEdit>> {
    let before_parse = parser.parse_top_level(before);
    let after_parse = parser.parse_top_level(after);
    for parse in [&before_parse, &after_parse] {
        if parse.parse_error || !parse.duplicates.is_empty() {
            return None;
        }
    }

    let mut edits = Vec::new();

    for (i, key) in after_parse.order.iter().enumerate() {
        let after_sym = &after_parse.symbols[key];
        match before_parse.symbols.get(key) {
            Some(before_sym) => {
                if before_sym.body != after_sym.body {
                    edits.push(PythonEdit::Replace {
                        kind: after_sym.kind,
                        name: after_sym.name.clone(),
                        before_content: before_sym.body.clone(),
                        after_content: after_sym.body.clone(),
                    });
                }
            }
            None => {
                let insert_after_key = (i > 0).then(|| after_parse.order[i - 1].clone());
                let insert_before_key = if insert_after_key.is_none() {
                    after_parse.order.get(i + 1).cloned()
                } else {
                    None
                };
                edits.push(PythonEdit::Insert {
                    kind: after_sym.kind,
                    name: after_sym.name.clone(),
                    after_content: after_sym.body.clone(),
                    insert_after_key,
                    insert_before_key,
                });
            }
        }
    }

    let mut deleted: Vec<&String> = before_parse
        .order
        .iter()
        .filter(|key| !after_parse.symbols.contains_key(*key))
        .collect();
    deleted.sort();
    for key in deleted {
        let sym = &before_parse.symbols[key];
        edits.push(PythonEdit::Delete {
            kind: sym.kind,
            name: sym.name.clone(),
            before_content: sym.body.clone(),
        });
    }

    Some(edits)
}

// ---------------------------------------------------------------------------
// apply
// ---------------------------------------------------------------------------

/// Normalize a block to end with exactly one newline.
fn block(content: &str) -> String {
    format!("{}\n", content.trim_end_matches('\n'))
}

/// Replace the span of `(kind, name)` with `after_content`.
///
/// A missing symbol upserts: the block is appended at end of file. An
/// unparseable file is returned unchanged.
#[must_use]
pub fn replace(
    parser: &dyn PythonParser,
    current: &str,
    kind: PyKind,
    name: &str,
    after_content: &str,
) -> String {
    let parse = parser.parse_top_level(current);
    if parse.parse_error {
        return current.to_owned();
    }
    let key = PythonParse::key(kind, name);
    match parse.symbols.get(&key) {
        Some(sym) => {
            format!("{}{}{}", &current[..sym.start], block(after_content), &current[sym.end..])
        }
        None => append(current, after_content),
    }
}

/// Insert a new block, anchored after `insert_after_key`, else before
/// `insert_before_key`, else at end of file.
#[must_use]
pub fn insert(
    parser: &dyn PythonParser,
    current: &str,
    after_content: &str,
    insert_after_key: Option<&str>,
    insert_before_key: Option<&str>,
) -> String {
    let parse = parser.parse_top_level(current);
    if parse.parse_error {
        return current.to_owned();
    }
    let position = insert_after_key
        .and_then(|key| parse.symbols.get(key).map(|sym| sym.end))
        .or_else(|| insert_before_key.and_then(|key| parse.symbols.get(key).map(|sym| sym.start)));

    match position {
        Some(pos) => {
            let mut out = String::with_capacity(current.len() + after_content.len() + 2);
            out.push_str(&current[..pos]);
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&block(after_content));
            out.push_str(&current[pos..]);
            out
        }
        None => append(current, after_content),
    }
}

/// Delete the span of `(kind, name)`. Missing symbol or unparseable file is
/// a no-op.
#[must_use]
pub fn delete(parser: &dyn PythonParser, current: &str, kind: PyKind, name: &str) -> String {
    let parse = parser.parse_top_level(current);
    if parse.parse_error {
        return current.to_owned();
    }
    let key = PythonParse::key(kind, name);
    match parse.symbols.get(&key) {
        Some(sym) => format!("{}{}", &current[..sym.start], &current[sym.end..]),
        None => current.to_owned(),
    }
}

fn append(current: &str, content: &str) -> String {
    let mut out = current.to_owned();
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(&block(content));
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
