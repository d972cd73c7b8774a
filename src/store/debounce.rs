//! Debounced write-behind snapshot persistence.
//!
//! After any engine event the scheduler waits a short quiet period, then
//! serializes the engine and saves it. Snapshot writes never block writers:
//! the engine lock is held only for the in-memory serialization, and events
//! arriving during a save coalesce into the next save.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error};

use super::SnapshotStore;
use crate::engine::Engine;

/// Default quiet period between the triggering event and the save.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(100);

/// Handle to the background persister task.
pub struct SnapshotScheduler {
    handle: tokio::task::JoinHandle<()>,
}

impl SnapshotScheduler {
    /// Spawn the persister on the current tokio runtime. It subscribes to
    /// the engine's events and saves a debounced snapshot after each burst
    /// of activity, until the engine (and with it the event channel) is
    /// dropped.
    #[must_use]
    pub fn spawn(
        engine: Arc<Engine>,
        store: Arc<dyn SnapshotStore>,
        debounce: Duration,
    ) -> Self {
        let mut events = engine.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => break,
                }
                tokio::time::sleep(debounce).await;
                // Drain the burst; everything observed so far lands in this
                // snapshot.
                loop {
                    use tokio::sync::broadcast::error::TryRecvError;
                    match events.try_recv() {
                        Ok(_) | Err(TryRecvError::Lagged(_)) => {}
                        Err(TryRecvError::Empty | TryRecvError::Closed) => break,
                    }
                }
                let snapshot = engine.to_snapshot();
                match store.save(&snapshot) {
                    Ok(()) => debug!(sequence = snapshot.sequence, "snapshot saved"),
                    Err(e) => error!(error = %e, "snapshot save failed"),
                }
            }
        });
        Self { handle }
    }

    /// Stop the persister.
    pub fn abort(&self) {
        self.handle.abort();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::Adapters;
    use crate::parser::fallback::RegexParser;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn engine() -> Arc<Engine> {
        Arc::new(Engine::new(Adapters::new(Arc::new(RegexParser::new()))))
    }

    #[tokio::test(start_paused = true)]
    async fn saves_after_quiet_period() {
        let engine = engine();
        let store = Arc::new(MemoryStore::new());
        let scheduler = SnapshotScheduler::spawn(
            Arc::clone(&engine),
            Arc::clone(&store) as Arc<dyn SnapshotStore>,
            DEFAULT_DEBOUNCE,
        );

        engine
            .submit(json!({
                "state": "main",
                "ops": [{
                    "target": {"symbol_id": "sym://text/a.txt#document"},
                    "writes": ["sym://text/a.txt#document"],
                    "effect": {"kind": "upsert_file", "path": "a.txt", "content": "hi\n"},
                }],
            }))
            .unwrap();

        // Let the scheduler observe the events and pass the quiet period.
        tokio::time::sleep(Duration::from_millis(250)).await;
        tokio::task::yield_now().await;

        let saved = store.load().unwrap().expect("snapshot saved");
        assert_eq!(saved.ops.len(), 1);
        scheduler.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn burst_coalesces_into_one_snapshot_state() {
        let engine = engine();
        let store = Arc::new(MemoryStore::new());
        let scheduler = SnapshotScheduler::spawn(
            Arc::clone(&engine),
            Arc::clone(&store) as Arc<dyn SnapshotStore>,
            DEFAULT_DEBOUNCE,
        );

        for i in 0..3 {
            let path = format!("f{i}.txt");
            engine
                .submit(json!({
                    "state": "main",
                    "ops": [{
                        "target": {"symbol_id": format!("sym://text/{path}#document")},
                        "writes": [format!("sym://text/{path}#document")],
                        "effect": {"kind": "upsert_file", "path": path, "content": format!("v{i}\n")},
                    }],
                }))
                .unwrap();
        }

        tokio::time::sleep(Duration::from_millis(500)).await;
        tokio::task::yield_now().await;

        let saved = store.load().unwrap().expect("snapshot saved");
        assert_eq!(saved.ops.len(), 3, "latest burst fully captured");
        scheduler.abort();
    }
}
