//! Core identifier types for Forge.
//!
//! Foundation types used throughout the engine: state names, operation ids,
//! change-set ids, and conflict ids. Every identifier is a validated newtype
//! over `String` so that malformed ids are rejected at the serialization
//! boundary instead of deep inside the engine.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ValidationError
// ---------------------------------------------------------------------------

/// Which identifier kind failed validation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    StateName,
    OpId,
    ChangeSetId,
    ConflictId,
    SymbolId,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StateName => write!(f, "state name"),
            Self::OpId => write!(f, "operation id"),
            Self::ChangeSetId => write!(f, "change-set id"),
            Self::ConflictId => write!(f, "conflict id"),
            Self::SymbolId => write!(f, "symbol id"),
        }
    }
}

/// An identifier failed validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationError {
    /// The identifier kind that was being validated.
    pub kind: ErrorKind,
    /// The rejected input.
    pub value: String,
    /// Why the input is invalid.
    pub reason: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {} '{}': {}", self.kind, self.value, self.reason)
    }
}

impl std::error::Error for ValidationError {}

// ---------------------------------------------------------------------------
// StateName
// ---------------------------------------------------------------------------

/// A validated state name.
///
/// States are named DAG heads, e.g. `main`, `prod`, `ws/alice`. Names are
/// lowercase alphanumeric with `-`, `_`, `.`, split into non-empty segments
/// by `/`, 1–128 characters total.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StateName(String);

impl StateName {
    /// The maximum length of a state name.
    pub const MAX_LEN: usize = 128;

    /// Create a new `StateName`, validating format.
    ///
    /// # Errors
    /// Returns an error if the name is empty, too long, or contains invalid
    /// characters or empty `/` segments.
    pub fn new(s: &str) -> Result<Self, ValidationError> {
        Self::validate(s)?;
        Ok(Self(s.to_owned()))
    }

    /// Return the state name as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(s: &str) -> Result<(), ValidationError> {
        let err = |reason: String| ValidationError {
            kind: ErrorKind::StateName,
            value: s.to_owned(),
            reason,
        };
        if s.is_empty() {
            return Err(err("state name must not be empty".to_owned()));
        }
        if s.len() > Self::MAX_LEN {
            return Err(err(format!(
                "state name must be at most {} characters, got {}",
                Self::MAX_LEN,
                s.len()
            )));
        }
        for segment in s.split('/') {
            if segment.is_empty() {
                return Err(err(
                    "state name must not contain empty '/' segments".to_owned()
                ));
            }
            if !segment
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "-_.".contains(c))
            {
                return Err(err(
                    "state name segments must contain only lowercase letters (a-z), \
                     digits (0-9), and '-', '_', '.'"
                        .to_owned(),
                ));
            }
        }
        Ok(())
    }
}

impl fmt::Display for StateName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for StateName {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for StateName {
    type Error = ValidationError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::validate(&s)?;
        Ok(Self(s))
    }
}

impl From<StateName> for String {
    fn from(name: StateName) -> Self {
        name.0
    }
}

// ---------------------------------------------------------------------------
// Prefixed id validation (shared by OpId / ChangeSetId / ConflictId)
// ---------------------------------------------------------------------------

fn validate_prefixed(
    kind: ErrorKind,
    prefix: &str,
    s: &str,
    digits_only: bool,
) -> Result<(), ValidationError> {
    let err = |reason: String| ValidationError {
        kind,
        value: s.to_owned(),
        reason,
    };
    let Some(rest) = s.strip_prefix(prefix) else {
        return Err(err(format!("must start with '{prefix}'")));
    };
    if rest.is_empty() {
        return Err(err(format!("'{prefix}' must be followed by an identifier")));
    }
    let ok = if digits_only {
        rest.chars().all(|c| c.is_ascii_digit())
    } else {
        rest.chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    };
    if !ok {
        let allowed = if digits_only {
            "digits (0-9)"
        } else {
            "lowercase letters, digits, and underscores"
        };
        return Err(err(format!("suffix must contain only {allowed}")));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// OpId
// ---------------------------------------------------------------------------

/// A content-addressed operation id: `op_<hash>`.
///
/// Ids are a pure function of the operation's contents (minus the id and the
/// acceptance fields); two operations with identical contents are the same
/// operation. Promotion clones carry `op_promote_<hash>` ids.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OpId(String);

impl OpId {
    /// Create a new `OpId`, validating format.
    ///
    /// # Errors
    /// Returns an error unless the string is `op_` followed by lowercase
    /// alphanumerics/underscores.
    pub fn new(s: &str) -> Result<Self, ValidationError> {
        validate_prefixed(ErrorKind::OpId, "op_", s, false)?;
        Ok(Self(s.to_owned()))
    }

    /// Return the id as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for OpId {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for OpId {
    type Error = ValidationError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        validate_prefixed(ErrorKind::OpId, "op_", &s, false)?;
        Ok(Self(s))
    }
}

impl From<OpId> for String {
    fn from(id: OpId) -> Self {
        id.0
    }
}

// ---------------------------------------------------------------------------
// ChangeSetId
// ---------------------------------------------------------------------------

/// A content-addressed change-set id: `cs_<hash>`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChangeSetId(String);

impl ChangeSetId {
    /// Create a new `ChangeSetId`, validating format.
    ///
    /// # Errors
    /// Returns an error unless the string is `cs_` followed by lowercase
    /// alphanumerics/underscores.
    pub fn new(s: &str) -> Result<Self, ValidationError> {
        validate_prefixed(ErrorKind::ChangeSetId, "cs_", s, false)?;
        Ok(Self(s.to_owned()))
    }

    /// Return the id as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChangeSetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ChangeSetId {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ChangeSetId {
    type Error = ValidationError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        validate_prefixed(ErrorKind::ChangeSetId, "cs_", &s, false)?;
        Ok(Self(s))
    }
}

impl From<ChangeSetId> for String {
    fn from(id: ChangeSetId) -> Self {
        id.0
    }
}

// ---------------------------------------------------------------------------
// ConflictId
// ---------------------------------------------------------------------------

/// A conflict id: `conf_<n>` where `n` comes from a monotonic counter.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ConflictId(String);

impl ConflictId {
    /// Create a new `ConflictId`, validating format.
    ///
    /// # Errors
    /// Returns an error unless the string is `conf_` followed by digits.
    pub fn new(s: &str) -> Result<Self, ValidationError> {
        validate_prefixed(ErrorKind::ConflictId, "conf_", s, true)?;
        Ok(Self(s.to_owned()))
    }

    /// Build a conflict id from its counter value.
    #[must_use]
    pub fn from_counter(n: u64) -> Self {
        Self(format!("conf_{n}"))
    }

    /// Return the id as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConflictId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ConflictId {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ConflictId {
    type Error = ValidationError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        validate_prefixed(ErrorKind::ConflictId, "conf_", &s, true)?;
        Ok(Self(s))
    }
}

impl From<ConflictId> for String {
    fn from(id: ConflictId) -> Self {
        id.0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
