//! Forge — a semantic version-control engine for highly concurrent human
//! and agent editors.
//!
//! Changes are recorded as immutable, content-addressed operations over
//! per-file semantic symbols (whole documents, top-level JSON keys, Python
//! top-level `def`/`class` blocks); named states are causal DAG heads;
//! irreconcilable concurrent writes and failed preconditions become
//! durable, typed conflict records resolved by a later operation that
//! references them.
//!
//! The crate is the engine core: the change-set submission pipeline, the
//! conflict classifier, the per-state symbol-head index, promotion, and
//! deterministic materialization. The HTTP/SSE surface lives in
//! `forge-server`; the client CLI in `forge-cli`.

pub mod adapters;
pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod parser;
pub mod store;
pub mod telemetry;

pub use adapters::Adapters;
pub use config::Config;
pub use engine::{Engine, PromoteOutcome, ResolveOutcome, StateSnapshot, StateSummary};
pub use error::EngineError;
pub use model::{ChangeSet, Conflict, Operation, SubmitOutcome};
pub use store::{EngineSnapshot, FileStore, MemoryStore, SnapshotStore};
