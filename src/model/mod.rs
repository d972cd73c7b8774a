//! Data model: identifiers, symbols, hashing, operations, change sets,
//! conflicts, and states.

pub mod change_set;
pub mod conflict;
pub mod hash;
pub mod op;
pub mod state;
pub mod symbol;
pub mod types;

pub use change_set::{ChangeSet, ChangeSetRecord, ChangeSetStatus, OpResult, OpStatus, SubmitOutcome};
pub use conflict::{Conflict, ConflictStatus, ConflictType};
pub use op::{Effect, EffectKind, Metadata, Operation, Precondition, ShapeError, Target};
pub use state::{State, StatePolicy};
pub use symbol::{AdapterKind, Fragment, PyKind, SymbolId};
pub use types::{ChangeSetId, ConflictId, OpId, StateName, ValidationError};
