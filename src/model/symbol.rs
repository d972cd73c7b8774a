//! Symbol identifiers — the addressable units of change.
//!
//! A symbol identifies either a whole document, a top-level JSON key, or a
//! top-level Python `def`/`class` block:
//!
//! ```text
//! sym://<adapter>/<path>#<fragment>
//!
//! sym://text/a.txt#document
//! sym://json/config.json#key:retry%20limit
//! sym://python/demo.py#def:calc
//! ```
//!
//! `fragment` is `document`, `key:<url-encoded-key>`, or
//! `<kind>:<url-encoded-name>` with `kind ∈ {def, class}`. Paths use `/`
//! separators regardless of host.

use std::fmt;
use std::str::FromStr;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use serde::{Deserialize, Serialize};

use super::types::{ErrorKind, ValidationError};

/// Characters escaped inside fragment components (keys and symbol names).
/// Everything but unreserved `-`, `_`, `.`, `~`.
const FRAGMENT_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

// ---------------------------------------------------------------------------
// AdapterKind
// ---------------------------------------------------------------------------

/// The language adapter a symbol (or file) belongs to.
///
/// Selected by file extension: `.py`→python, `.json`→json,
/// `.md`/`.markdown`→markdown, `.txt`→text, anything else→file.
/// Markdown, text, and file are *document* adapters: they expose the whole
/// file as a single `document` symbol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterKind {
    Python,
    Json,
    Markdown,
    Text,
    File,
}

impl AdapterKind {
    /// Select the adapter for a file path by extension.
    #[must_use]
    pub fn for_path(path: &str) -> Self {
        let ext = path.rsplit_once('.').map(|(_, e)| e).unwrap_or_default();
        match ext {
            "py" => Self::Python,
            "json" => Self::Json,
            "md" | "markdown" => Self::Markdown,
            "txt" => Self::Text,
            _ => Self::File,
        }
    }

    /// `true` for adapters that treat the file as one opaque document.
    #[must_use]
    pub const fn is_document(self) -> bool {
        matches!(self, Self::Markdown | Self::Text | Self::File)
    }

    /// The adapter name as it appears in `sym://` identifiers.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::Json => "json",
            Self::Markdown => "markdown",
            Self::Text => "text",
            Self::File => "file",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "python" => Some(Self::Python),
            "json" => Some(Self::Json),
            "markdown" => Some(Self::Markdown),
            "text" => Some(Self::Text),
            "file" => Some(Self::File),
            _ => None,
        }
    }
}

impl fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// PyKind
// ---------------------------------------------------------------------------

/// The kind of a top-level Python symbol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PyKind {
    Def,
    Class,
}

impl PyKind {
    /// The kind name as it appears in fragments and parser keys.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Def => "def",
            Self::Class => "class",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "def" => Some(Self::Def),
            "class" => Some(Self::Class),
            _ => None,
        }
    }
}

impl fmt::Display for PyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Fragment
// ---------------------------------------------------------------------------

/// The addressed region inside a file.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Fragment {
    /// The whole file.
    Document,
    /// A top-level JSON key (decoded form).
    Key(String),
    /// A top-level Python `def`/`class` (decoded name).
    Python { kind: PyKind, name: String },
}

impl fmt::Display for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Document => f.write_str("document"),
            Self::Key(key) => {
                write!(f, "key:{}", utf8_percent_encode(key, FRAGMENT_COMPONENT))
            }
            Self::Python { kind, name } => {
                write!(
                    f,
                    "{kind}:{}",
                    utf8_percent_encode(name, FRAGMENT_COMPONENT)
                )
            }
        }
    }
}

// ---------------------------------------------------------------------------
// SymbolId
// ---------------------------------------------------------------------------

/// A fully-qualified symbol identifier: `sym://<adapter>/<path>#<fragment>`.
///
/// Equality, ordering, and hashing follow the canonical string form.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SymbolId {
    adapter: AdapterKind,
    path: String,
    fragment: Fragment,
}

impl SymbolId {
    /// The document symbol for a file, with the adapter chosen by extension.
    #[must_use]
    pub fn document(path: &str) -> Self {
        Self {
            adapter: AdapterKind::for_path(path),
            path: path.to_owned(),
            fragment: Fragment::Document,
        }
    }

    /// The symbol for a top-level JSON key of a file.
    #[must_use]
    pub fn json_key(path: &str, key: &str) -> Self {
        Self {
            adapter: AdapterKind::Json,
            path: path.to_owned(),
            fragment: Fragment::Key(key.to_owned()),
        }
    }

    /// The symbol for a top-level Python `def`/`class` of a file.
    #[must_use]
    pub fn python(path: &str, kind: PyKind, name: &str) -> Self {
        Self {
            adapter: AdapterKind::Python,
            path: path.to_owned(),
            fragment: Fragment::Python {
                kind,
                name: name.to_owned(),
            },
        }
    }

    /// Parse a `sym://` identifier.
    ///
    /// # Errors
    /// Returns an error on a missing scheme, unknown adapter, empty path,
    /// malformed fragment, or a fragment kind the adapter cannot address
    /// (`key:` outside json, `def:`/`class:` outside python).
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        let err = |reason: String| ValidationError {
            kind: ErrorKind::SymbolId,
            value: s.to_owned(),
            reason,
        };
        let rest = s
            .strip_prefix("sym://")
            .ok_or_else(|| err("must start with 'sym://'".to_owned()))?;
        let (adapter_str, rest) = rest
            .split_once('/')
            .ok_or_else(|| err("missing '/' after adapter".to_owned()))?;
        let adapter = AdapterKind::parse(adapter_str)
            .ok_or_else(|| err(format!("unknown adapter '{adapter_str}'")))?;
        let (path, fragment_str) = rest
            .split_once('#')
            .ok_or_else(|| err("missing '#<fragment>'".to_owned()))?;
        if path.is_empty() {
            return Err(err("path must not be empty".to_owned()));
        }
        if path.contains('\\') {
            return Err(err("path must use '/' separators".to_owned()));
        }

        let fragment = if fragment_str == "document" {
            Fragment::Document
        } else if let Some((kind_str, encoded)) = fragment_str.split_once(':') {
            if encoded.is_empty() {
                return Err(err("fragment component must not be empty".to_owned()));
            }
            let decoded = percent_decode_str(encoded)
                .decode_utf8()
                .map_err(|e| err(format!("fragment is not valid percent-encoded UTF-8: {e}")))?
                .into_owned();
            if kind_str == "key" {
                Fragment::Key(decoded)
            } else if let Some(kind) = PyKind::parse(kind_str) {
                Fragment::Python {
                    kind,
                    name: decoded,
                }
            } else {
                return Err(err(format!("unknown fragment kind '{kind_str}'")));
            }
        } else {
            return Err(err(format!("unknown fragment '{fragment_str}'")));
        };

        match (&fragment, adapter) {
            (Fragment::Key(_), a) if a != AdapterKind::Json => {
                return Err(err("'key:' fragments require the json adapter".to_owned()));
            }
            (Fragment::Python { .. }, a) if a != AdapterKind::Python => {
                return Err(err(
                    "'def:'/'class:' fragments require the python adapter".to_owned(),
                ));
            }
            _ => {}
        }

        Ok(Self {
            adapter,
            path: path.to_owned(),
            fragment,
        })
    }

    /// The adapter this symbol belongs to.
    #[must_use]
    pub const fn adapter(&self) -> AdapterKind {
        self.adapter
    }

    /// The file path component.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The fragment component.
    #[must_use]
    pub const fn fragment(&self) -> &Fragment {
        &self.fragment
    }

    /// `true` if this symbol addresses the whole file.
    #[must_use]
    pub const fn is_document(&self) -> bool {
        matches!(self.fragment, Fragment::Document)
    }
}

impl fmt::Display for SymbolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sym://{}/{}#{}", self.adapter, self.path, self.fragment)
    }
}

impl FromStr for SymbolId {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SymbolId {
    type Error = ValidationError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<SymbolId> for String {
    fn from(id: SymbolId) -> Self {
        id.to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
