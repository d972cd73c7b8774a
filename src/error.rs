//! Engine error types for Forge.
//!
//! [`EngineError`] covers *input* errors only: malformed shapes, unknown
//! ids, missing states, storage failures. Semantic outcomes — accepted,
//! conflicted, or rejected change sets — are data, not errors; they are
//! returned as structured bodies and never surface here.
//!
//! Messages are designed to be agent-friendly: each variant names what went
//! wrong and, where useful, how to proceed.

use std::fmt;

use crate::model::op::ShapeError;
use crate::model::types::ValidationError;

// ---------------------------------------------------------------------------
// EngineError
// ---------------------------------------------------------------------------

/// Unified error type for engine operations.
#[derive(Debug)]
pub enum EngineError {
    /// A change set or op failed shape validation. Nothing was mutated.
    Shape(ShapeError),

    /// An identifier failed validation.
    Validation(ValidationError),

    /// The named state does not exist.
    StateNotFound {
        /// The missing state name.
        name: String,
    },

    /// A state with this name already exists.
    StateExists {
        /// The duplicate name.
        name: String,
    },

    /// The requested operation id is not in the log.
    OpNotFound {
        /// The missing op id.
        id: String,
    },

    /// The requested change set was never recorded.
    ChangeSetNotFound {
        /// The missing change-set id.
        id: String,
    },

    /// The requested conflict does not exist.
    ConflictNotFound {
        /// The missing conflict id.
        id: String,
    },

    /// Promotion endpoints must name two distinct, existing states.
    BadPromotion {
        /// Why the promotion request is invalid.
        reason: String,
    },

    /// The snapshot store failed to read or write.
    Store {
        /// Human-readable description of the failure.
        detail: String,
    },
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shape(err) => write!(f, "{err}"),
            Self::Validation(err) => write!(f, "{err}"),
            Self::StateNotFound { name } => {
                write!(
                    f,
                    "state '{name}' not found.\n  To fix: list states with GET /v1/states, or create it first."
                )
            }
            Self::StateExists { name } => {
                write!(
                    f,
                    "state '{name}' already exists.\n  To fix: pick a different name or submit to the existing state."
                )
            }
            Self::OpNotFound { id } => write!(f, "operation '{id}' not found"),
            Self::ChangeSetNotFound { id } => write!(f, "change set '{id}' not found"),
            Self::ConflictNotFound { id } => write!(f, "conflict '{id}' not found"),
            Self::BadPromotion { reason } => write!(f, "invalid promotion: {reason}"),
            Self::Store { detail } => write!(f, "snapshot store failure: {detail}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Shape(err) => Some(err),
            Self::Validation(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ShapeError> for EngineError {
    fn from(err: ShapeError) -> Self {
        Self::Shape(err)
    }
}

impl From<ValidationError> for EngineError {
    fn from(err: ValidationError) -> Self {
        Self::Validation(err)
    }
}

impl EngineError {
    /// `true` for errors that map to HTTP 404 rather than 400.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::StateNotFound { .. }
                | Self::OpNotFound { .. }
                | Self::ChangeSetNotFound { .. }
                | Self::ConflictNotFound { .. }
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
