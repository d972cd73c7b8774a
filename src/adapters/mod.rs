//! Language adapters — per-extension `symbol_hashes` / `diff` / `apply`.
//!
//! An adapter turns file text into a map of addressable symbols, computes
//! minimal edit lists between versions, and applies one semantic effect to
//! file text. Dispatch is by file extension (see
//! [`AdapterKind::for_path`]); the [`Adapters`] facade owns the configured
//! python parser and routes every call.

pub mod document;
pub mod json;
pub mod python;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::model::hash::{content_hash_text, content_hash_value};
use crate::model::op::{Effect, EffectKind};
use crate::model::symbol::{AdapterKind, Fragment, SymbolId};
use crate::parser::{PythonParse, PythonParser};

pub use json::JsonEdit;
pub use python::PythonEdit;

// ---------------------------------------------------------------------------
// Edit
// ---------------------------------------------------------------------------

/// One symbol-level edit produced by [`Adapters::diff`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Edit {
    Json(JsonEdit),
    Python(PythonEdit),
}

impl Edit {
    /// The symbol this edit writes.
    #[must_use]
    pub fn symbol(&self, path: &str) -> SymbolId {
        match self {
            Self::Json(edit) => SymbolId::json_key(path, &edit.key),
            Self::Python(
                PythonEdit::Insert { kind, name, .. }
                | PythonEdit::Replace { kind, name, .. }
                | PythonEdit::Delete { kind, name, .. },
            ) => SymbolId::python(path, *kind, name),
        }
    }

    /// Lower this edit to the effect that replays it.
    #[must_use]
    pub fn to_effect(&self, path: &str) -> EffectKind {
        match self {
            Self::Json(edit) => match &edit.after_value {
                Some(value) if edit.after_exists => EffectKind::JsonSetKey {
                    path: path.to_owned(),
                    key: edit.key.clone(),
                    value: value.clone(),
                },
                _ => EffectKind::JsonDeleteKey {
                    path: path.to_owned(),
                    key: edit.key.clone(),
                },
            },
            Self::Python(PythonEdit::Insert {
                kind,
                name,
                after_content,
                insert_after_key,
                insert_before_key,
            }) => EffectKind::PythonInsertSymbol {
                path: path.to_owned(),
                symbol_kind: *kind,
                symbol_name: name.clone(),
                after_content: after_content.clone(),
                insert_after_key: insert_after_key.clone(),
                insert_before_key: insert_before_key.clone(),
            },
            Self::Python(PythonEdit::Replace {
                kind,
                name,
                before_content,
                after_content,
            }) => EffectKind::PythonReplaceSymbol {
                path: path.to_owned(),
                symbol_kind: *kind,
                symbol_name: name.clone(),
                before_content: before_content.clone(),
                after_content: after_content.clone(),
            },
            Self::Python(PythonEdit::Delete {
                kind,
                name,
                before_content,
            }) => EffectKind::PythonDeleteSymbol {
                path: path.to_owned(),
                symbol_kind: *kind,
                symbol_name: name.clone(),
                before_content: before_content.clone(),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Adapters
// ---------------------------------------------------------------------------

/// The adapter facade: extension dispatch plus the configured python parser.
#[derive(Clone)]
pub struct Adapters {
    parser: Arc<dyn PythonParser>,
}

impl Adapters {
    /// Build the facade around a python parser.
    #[must_use]
    pub fn new(parser: Arc<dyn PythonParser>) -> Self {
        Self { parser }
    }

    /// The configured python parser.
    #[must_use]
    pub fn parser(&self) -> &dyn PythonParser {
        self.parser.as_ref()
    }

    /// Derive the symbol → content-hash map for a file.
    #[must_use]
    pub fn symbol_hashes(&self, path: &str, text: &str) -> BTreeMap<SymbolId, String> {
        match AdapterKind::for_path(path) {
            AdapterKind::Json => json::symbol_hashes(path, text),
            AdapterKind::Python => python::symbol_hashes(self.parser(), path, text),
            _ => document::symbol_hashes(path, text),
        }
    }

    /// Compute a minimal edit list between two versions of a file.
    ///
    /// `None` for document adapters (callers use file-level effects), for
    /// JSON that is not an object on both sides, and for Python that fails
    /// to parse or contains duplicate top-level keys.
    #[must_use]
    pub fn diff(&self, path: &str, before: &str, after: &str) -> Option<Vec<Edit>> {
        match AdapterKind::for_path(path) {
            AdapterKind::Json => {
                Some(json::diff(before, after)?.into_iter().map(Edit::Json).collect())
            }
            AdapterKind::Python => Some(
                python::diff(self.parser(), before, after)?
                    .into_iter()
                    .map(Edit::Python)
                    .collect(),
            ),
            _ => None,
        }
    }

    /// Apply one effect to a file tree. Pure and total: unknown or
    /// inapplicable effects leave the tree unchanged.
    ///
    /// `path_hint` addresses legacy `replace_body` effects.
    pub fn apply_effect(
        &self,
        tree: &mut BTreeMap<String, String>,
        effect: &Effect,
        path_hint: Option<&str>,
    ) {
        match &effect.kind {
            EffectKind::UpsertFile { path, content } => {
                tree.insert(path.clone(), content.clone());
            }
            EffectKind::DeleteFile { path } => {
                tree.remove(path);
            }
            EffectKind::ReplaceBody { after_content } => {
                if let Some(path) = path_hint {
                    tree.insert(path.to_owned(), after_content.clone());
                }
            }
            EffectKind::JsonSetKey { path, key, value } => {
                let current = tree.get(path).map_or("", String::as_str);
                let next = json::set_key(current, key, value);
                tree.insert(path.clone(), next);
            }
            EffectKind::JsonDeleteKey { path, key } => {
                // Deleting from a file that does not exist is a no-op.
                if let Some(current) = tree.get(path).cloned() {
                    let next = json::delete_key(&current, key);
                    tree.insert(path.clone(), next);
                }
            }
            EffectKind::PythonReplaceSymbol {
                path,
                symbol_kind,
                symbol_name,
                after_content,
                ..
            } => {
                let current = tree.get(path).map_or("", String::as_str);
                let next =
                    python::replace(self.parser(), current, *symbol_kind, symbol_name, after_content);
                tree.insert(path.clone(), next);
            }
            EffectKind::PythonInsertSymbol {
                path,
                after_content,
                insert_after_key,
                insert_before_key,
                ..
            } => {
                let current = tree.get(path).map_or("", String::as_str);
                let next = python::insert(
                    self.parser(),
                    current,
                    after_content,
                    insert_after_key.as_deref(),
                    insert_before_key.as_deref(),
                );
                tree.insert(path.clone(), next);
            }
            EffectKind::PythonDeleteSymbol {
                path,
                symbol_kind,
                symbol_name,
                ..
            } => {
                if let Some(current) = tree.get(path).cloned() {
                    let next = python::delete(self.parser(), &current, *symbol_kind, symbol_name);
                    tree.insert(path.clone(), next);
                }
            }
        }
    }

    /// Derive a symbol's current content hash from the materialized tree.
    ///
    /// `None` when the hash is not computable: missing file, absent key or
    /// symbol, or an unparseable python file.
    #[must_use]
    pub fn derived_symbol_hash(
        &self,
        tree: &BTreeMap<String, String>,
        symbol: &SymbolId,
    ) -> Option<String> {
        let text = tree.get(symbol.path())?;
        match symbol.fragment() {
            Fragment::Document => Some(content_hash_text(text)),
            Fragment::Key(key) => {
                let value: Value = serde_json::from_str(text).ok()?;
                let object = value.as_object()?;
                object.get(key).map(content_hash_value)
            }
            Fragment::Python { kind, name } => {
                let parse = self.parser().parse_top_level(text);
                if parse.parse_error {
                    return None;
                }
                parse
                    .symbols
                    .get(&PythonParse::key(*kind, name))
                    .map(|sym| content_hash_text(&sym.body))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::symbol::PyKind;
    use crate::parser::fallback::RegexParser;
    use serde_json::json;

    fn adapters() -> Adapters {
        Adapters::new(Arc::new(RegexParser::new()))
    }

    fn tree(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(p, t)| ((*p).to_owned(), (*t).to_owned()))
            .collect()
    }

    // -- dispatch --

    #[test]
    fn symbol_hashes_dispatches_by_extension() {
        let a = adapters();
        assert!(
            a.symbol_hashes("a.txt", "hi\n")
                .contains_key(&SymbolId::document("a.txt"))
        );
        assert!(
            a.symbol_hashes("c.json", r#"{"k": 1}"#)
                .contains_key(&SymbolId::json_key("c.json", "k"))
        );
        assert!(
            a.symbol_hashes("d.py", "def f():\n    pass\n")
                .contains_key(&SymbolId::python("d.py", PyKind::Def, "f"))
        );
    }

    #[test]
    fn diff_is_none_for_documents() {
        assert!(adapters().diff("a.txt", "one\n", "two\n").is_none());
        assert!(adapters().diff("README.md", "# a\n", "# b\n").is_none());
    }

    #[test]
    fn diff_routes_json_and_python() {
        let a = adapters();
        let edits = a.diff("c.json", "{}", r#"{"k": 1}"#).unwrap();
        assert!(matches!(&edits[0], Edit::Json(_)));
        let edits = a
            .diff("d.py", "", "def f():\n    pass\n")
            .unwrap();
        assert!(matches!(&edits[0], Edit::Python(_)));
    }

    // -- Edit lowering --

    #[test]
    fn json_edit_lowers_to_set_or_delete() {
        let a = adapters();
        let edits = a.diff("c.json", r#"{"drop": 1}"#, r#"{"add": 2}"#).unwrap();
        let effects: Vec<EffectKind> = edits.iter().map(|e| e.to_effect("c.json")).collect();
        assert!(effects.iter().any(|e| matches!(
            e,
            EffectKind::JsonSetKey { key, value, .. } if key == "add" && value == &json!(2)
        )));
        assert!(effects.iter().any(|e| matches!(
            e,
            EffectKind::JsonDeleteKey { key, .. } if key == "drop"
        )));
    }

    #[test]
    fn edit_symbol_matches_path() {
        let a = adapters();
        let edits = a.diff("c.json", "{}", r#"{"k": 1}"#).unwrap();
        assert_eq!(
            edits[0].symbol("c.json"),
            SymbolId::json_key("c.json", "k")
        );
    }

    // -- apply_effect --

    #[test]
    fn apply_upsert_and_delete_file() {
        let a = adapters();
        let mut t = tree(&[]);
        a.apply_effect(
            &mut t,
            &Effect::new(EffectKind::UpsertFile {
                path: "a.txt".to_owned(),
                content: "hi\n".to_owned(),
            }),
            None,
        );
        assert_eq!(t["a.txt"], "hi\n");
        a.apply_effect(
            &mut t,
            &Effect::new(EffectKind::DeleteFile {
                path: "a.txt".to_owned(),
            }),
            None,
        );
        assert!(t.is_empty());
    }

    #[test]
    fn apply_replace_body_uses_path_hint() {
        let a = adapters();
        let mut t = tree(&[("a.txt", "old\n")]);
        let effect = Effect::new(EffectKind::ReplaceBody {
            after_content: "new\n".to_owned(),
        });
        a.apply_effect(&mut t, &effect, None);
        assert_eq!(t["a.txt"], "old\n", "no hint, no change");
        a.apply_effect(&mut t, &effect, Some("a.txt"));
        assert_eq!(t["a.txt"], "new\n");
    }

    #[test]
    fn apply_json_set_key_creates_file() {
        let a = adapters();
        let mut t = tree(&[]);
        a.apply_effect(
            &mut t,
            &Effect::new(EffectKind::JsonSetKey {
                path: "c.json".to_owned(),
                key: "retries".to_owned(),
                value: json!(3),
            }),
            None,
        );
        assert_eq!(t["c.json"], "{\n  \"retries\": 3\n}\n");
    }

    #[test]
    fn apply_python_round() {
        let a = adapters();
        let mut t = tree(&[]);
        a.apply_effect(
            &mut t,
            &Effect::new(EffectKind::PythonInsertSymbol {
                path: "d.py".to_owned(),
                symbol_kind: PyKind::Def,
                symbol_name: "calc".to_owned(),
                after_content: "def calc():\n    return 1".to_owned(),
                insert_after_key: None,
                insert_before_key: None,
            }),
            None,
        );
        assert_eq!(t["d.py"], "def calc():\n    return 1\n");

        a.apply_effect(
            &mut t,
            &Effect::new(EffectKind::PythonReplaceSymbol {
                path: "d.py".to_owned(),
                symbol_kind: PyKind::Def,
                symbol_name: "calc".to_owned(),
                before_content: "def calc():\n    return 1\n".to_owned(),
                after_content: "def calc():\n    return 2".to_owned(),
            }),
            None,
        );
        assert_eq!(t["d.py"], "def calc():\n    return 2\n");

        a.apply_effect(
            &mut t,
            &Effect::new(EffectKind::PythonDeleteSymbol {
                path: "d.py".to_owned(),
                symbol_kind: PyKind::Def,
                symbol_name: "calc".to_owned(),
                before_content: "def calc():\n    return 2\n".to_owned(),
            }),
            None,
        );
        assert_eq!(t["d.py"], "");
    }

    // -- derived_symbol_hash --

    #[test]
    fn derived_hash_document() {
        let a = adapters();
        let t = tree(&[("a.txt", "hi\n")]);
        assert_eq!(
            a.derived_symbol_hash(&t, &SymbolId::document("a.txt")),
            Some(content_hash_text("hi\n"))
        );
        assert!(a.derived_symbol_hash(&t, &SymbolId::document("b.txt")).is_none());
    }

    #[test]
    fn derived_hash_json_key() {
        let a = adapters();
        let t = tree(&[("c.json", r#"{"k": [1, 2]}"#)]);
        assert_eq!(
            a.derived_symbol_hash(&t, &SymbolId::json_key("c.json", "k")),
            Some(content_hash_value(&json!([1, 2])))
        );
        assert!(
            a.derived_symbol_hash(&t, &SymbolId::json_key("c.json", "missing"))
                .is_none()
        );
    }

    #[test]
    fn derived_hash_python_symbol() {
        let a = adapters();
        let t = tree(&[("d.py", "def f():\n    pass\n")]);
        assert_eq!(
            a.derived_symbol_hash(&t, &SymbolId::python("d.py", PyKind::Def, "f")),
            Some(content_hash_text("def f():\n    pass\n"))
        );
        assert!(
            a.derived_symbol_hash(&t, &SymbolId::python("d.py", PyKind::Class, "f"))
                .is_none()
        );
    }
}
