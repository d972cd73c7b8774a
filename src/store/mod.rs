//! Snapshot persistence.
//!
//! The whole engine serializes to one JSON document; any key-value store
//! with atomic read-modify-write of a single key is sufficient. On startup
//! the engine loads the document and rebuilds every derived index from it.
//!
//! Two backends: an in-memory store (tests, ephemeral servers) and a
//! file-backed store that writes via a temp file and atomic rename.

pub mod debounce;

use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::model::change_set::ChangeSetRecord;
use crate::model::conflict::Conflict;
use crate::model::op::Operation;
use crate::model::state::State;

// ---------------------------------------------------------------------------
// EngineSnapshot
// ---------------------------------------------------------------------------

/// The single persisted document.
///
/// Field names are part of the on-disk format; `conflictSequence` keeps its
/// historical camel-case spelling.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    /// Last assigned `canonical_order`.
    pub sequence: u64,

    /// Last assigned conflict counter.
    #[serde(rename = "conflictSequence")]
    pub conflict_sequence: u64,

    /// Last assigned change-set record sequence.
    pub change_set_sequence: u64,

    /// Accepted ops, sorted by `canonical_order`.
    pub ops: Vec<Operation>,

    /// Change-set records in record order.
    pub change_sets: Vec<ChangeSetRecord>,

    /// All conflict records.
    pub conflicts: Vec<Conflict>,

    /// All state metadata.
    pub states: Vec<State>,
}

// ---------------------------------------------------------------------------
// StoreError
// ---------------------------------------------------------------------------

/// A snapshot store failed to read or write.
#[derive(Debug)]
pub struct StoreError {
    /// What went wrong.
    pub detail: String,
}

impl StoreError {
    fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "snapshot store failure: {}", self.detail)
    }
}

impl std::error::Error for StoreError {}

impl From<StoreError> for crate::error::EngineError {
    fn from(err: StoreError) -> Self {
        Self::Store { detail: err.detail }
    }
}

// ---------------------------------------------------------------------------
// SnapshotStore
// ---------------------------------------------------------------------------

/// Atomic load/save of the one snapshot document.
pub trait SnapshotStore: Send + Sync {
    /// Load the current document, or `None` when nothing was saved yet.
    ///
    /// # Errors
    /// I/O and decoding failures.
    fn load(&self) -> Result<Option<EngineSnapshot>, StoreError>;

    /// Replace the document atomically.
    ///
    /// # Errors
    /// I/O and encoding failures.
    fn save(&self, snapshot: &EngineSnapshot) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// Keeps the serialized document in memory. Used by tests and ephemeral
/// deployments.
#[derive(Debug, Default)]
pub struct MemoryStore {
    document: Mutex<Option<String>>,
}

impl MemoryStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for MemoryStore {
    fn load(&self) -> Result<Option<EngineSnapshot>, StoreError> {
        let guard = self
            .document
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match guard.as_deref() {
            Some(doc) => serde_json::from_str(doc)
                .map(Some)
                .map_err(|e| StoreError::new(format!("decode snapshot: {e}"))),
            None => Ok(None),
        }
    }

    fn save(&self, snapshot: &EngineSnapshot) -> Result<(), StoreError> {
        let doc = serde_json::to_string(snapshot)
            .map_err(|e| StoreError::new(format!("encode snapshot: {e}")))?;
        *self
            .document
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(doc);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FileStore
// ---------------------------------------------------------------------------

/// Persists the document to one file, written via temp file + rename so a
/// crash never leaves a torn snapshot.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// A store backed by the given path. The parent directory must exist.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// The backing path.
    #[must_use]
    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl SnapshotStore for FileStore {
    fn load(&self) -> Result<Option<EngineSnapshot>, StoreError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StoreError::new(format!(
                    "read {}: {e}",
                    self.path.display()
                )));
            }
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StoreError::new(format!("decode {}: {e}", self.path.display())))
    }

    fn save(&self, snapshot: &EngineSnapshot) -> Result<(), StoreError> {
        let doc = serde_json::to_vec(snapshot)
            .map_err(|e| StoreError::new(format!("encode snapshot: {e}")))?;
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), PathBuf::from);
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)
            .map_err(|e| StoreError::new(format!("create temp file in {}: {e}", dir.display())))?;
        std::io::Write::write_all(&mut tmp, &doc)
            .map_err(|e| StoreError::new(format!("write temp snapshot: {e}")))?;
        tmp.persist(&self.path)
            .map_err(|e| StoreError::new(format!("persist {}: {e}", self.path.display())))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
