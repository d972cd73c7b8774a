//! Durable, typed conflict records.
//!
//! Conflicts are data, not exceptions. When the classifier rejects an op it
//! produces one or more conflict records; each persists, queryable, until
//! an accepted operation lists its id in `resolves`. A conflict is never
//! mutated except for that single open → resolved transition.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::types::{ConflictId, OpId, StateName};

// ---------------------------------------------------------------------------
// ConflictType
// ---------------------------------------------------------------------------

/// Why an operation could not be accepted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    /// A concurrent writer already holds the symbol head and the new op
    /// does not descend from it.
    SemanticWriteConflict,
    /// A declared precondition did not hold against the staged state.
    PreconditionFailure,
    /// The state's policy forbids accepting writes while conflicts are open.
    PolicyConflict,
    /// Applying the effect produced a file the language adapter rejects.
    VerificationConflict,
}

impl ConflictType {
    /// The serialized tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SemanticWriteConflict => "semantic_write_conflict",
            Self::PreconditionFailure => "precondition_failure",
            Self::PolicyConflict => "policy_conflict",
            Self::VerificationConflict => "verification_conflict",
        }
    }
}

impl fmt::Display for ConflictType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ConflictStatus
// ---------------------------------------------------------------------------

/// Lifecycle of a conflict record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStatus {
    Open,
    Resolved,
}

// ---------------------------------------------------------------------------
// Conflict
// ---------------------------------------------------------------------------

/// A durable record of a rejected operation with structured cause.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    /// `conf_<n>` from the engine's monotonic counter.
    pub id: ConflictId,

    /// The state the rejected op targeted.
    pub state: StateName,

    /// The ops involved: the new op and, when applicable, the existing
    /// head op it collided with (head first).
    pub ops: Vec<OpId>,

    /// The conflict classification.
    #[serde(rename = "type")]
    pub conflict_type: ConflictType,

    /// The symbol (or path) at the center of the conflict, when one exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    /// Human-readable cause.
    pub reason: String,

    /// Open until an accepted op resolves it.
    pub status: ConflictStatus,

    /// RFC 3339 creation time.
    pub created_at: String,

    /// RFC 3339 resolution time, set with `status = resolved`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<String>,

    /// The accepted op that resolved this conflict.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<OpId>,
}

impl Conflict {
    /// `true` while the conflict still needs a resolving operation.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.status == ConflictStatus::Open
    }
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] in '{}'",
            self.id, self.conflict_type, self.state
        )?;
        if let Some(target) = &self.target {
            write!(f, " on {target}")?;
        }
        write!(f, ": {}", self.reason)?;
        if self.status == ConflictStatus::Resolved {
            write!(f, " (resolved")?;
            if let Some(by) = &self.resolved_by {
                write!(f, " by {by}")?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
