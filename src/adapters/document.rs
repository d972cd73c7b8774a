//! Document adapter — the whole file is one symbol.
//!
//! Markdown, text, and unrecognized files all use this adapter. There is no
//! diff at this granularity; callers submit file-level `upsert_file` /
//! `delete_file` effects directly.

use std::collections::BTreeMap;

use crate::model::hash::content_hash_text;
use crate::model::symbol::SymbolId;

/// A single entry: the file's `#document` symbol mapped to the hash of its
/// full text.
#[must_use]
pub fn symbol_hashes(path: &str, text: &str) -> BTreeMap<SymbolId, String> {
    let mut map = BTreeMap::new();
    map.insert(SymbolId::document(path), content_hash_text(text));
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_document_symbol() {
        let hashes = symbol_hashes("a.txt", "hi\n");
        assert_eq!(hashes.len(), 1);
        let (sym, hash) = hashes.iter().next().unwrap();
        assert_eq!(sym.to_string(), "sym://text/a.txt#document");
        assert_eq!(hash, &content_hash_text("hi\n"));
    }

    #[test]
    fn adapter_follows_extension() {
        let hashes = symbol_hashes("notes.md", "# hi\n");
        let sym = hashes.keys().next().unwrap();
        assert_eq!(sym.to_string(), "sym://markdown/notes.md#document");

        let hashes = symbol_hashes("Makefile", "all:\n");
        let sym = hashes.keys().next().unwrap();
        assert_eq!(sym.to_string(), "sym://file/Makefile#document");
    }

    #[test]
    fn hash_tracks_content() {
        let a = symbol_hashes("a.txt", "one\n");
        let b = symbol_hashes("a.txt", "two\n");
        assert_ne!(a.values().next(), b.values().next());
    }
}
