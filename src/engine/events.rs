//! Engine event fan-out.
//!
//! Events are published on one bounded broadcast channel. Slow subscribers
//! lag and drop intermediate events but never observe reordering; every
//! `state_update` payload is a complete snapshot, so a dropped event is
//! recovered by the next one.
//!
//! Per-state ordering after a commit: `op_accepted` (once per accepted op,
//! in acceptance order), then `change_set`, then `state_update`. Conflict
//! resolution additionally emits `conflict` events after the resolving
//! op's acceptance.

use serde::Serialize;
use tokio::sync::broadcast;

use super::StateSnapshot;
use crate::model::change_set::ChangeSetStatus;
use crate::model::conflict::Conflict;
use crate::model::types::{ChangeSetId, OpId, StateName};

/// Capacity of the broadcast channel; laggards drop, writers never block.
pub const EVENT_CAPACITY: usize = 256;

/// An engine event, tagged for the SSE surface.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    /// An op was accepted into a state's log.
    OpAccepted {
        state: StateName,
        op_id: OpId,
        canonical_order: u64,
    },

    /// A change set was recorded (any terminal status).
    ChangeSet {
        state: StateName,
        change_set_id: ChangeSetId,
        status: ChangeSetStatus,
    },

    /// A state changed; carries the full post-commit snapshot.
    StateUpdate {
        state: StateName,
        snapshot: Box<StateSnapshot>,
    },

    /// A conflict was opened or resolved.
    Conflict {
        state: StateName,
        conflict: Conflict,
    },
}

impl EngineEvent {
    /// The state this event belongs to.
    #[must_use]
    pub const fn state(&self) -> &StateName {
        match self {
            Self::OpAccepted { state, .. }
            | Self::ChangeSet { state, .. }
            | Self::StateUpdate { state, .. }
            | Self::Conflict { state, .. } => state,
        }
    }
}

/// The publishing half of the event channel.
#[derive(Clone, Debug)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    /// Create a bus with the default bounded capacity.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    /// Subscribe to all engine events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. With no subscribers the event is dropped.
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn op_accepted(n: u64) -> EngineEvent {
        EngineEvent::OpAccepted {
            state: StateName::new("main").unwrap(),
            op_id: OpId::new("op_aaaaaaaaaaaaaaaaaaaa").unwrap(),
            canonical_order: n,
        }
    }

    #[test]
    fn emit_without_subscribers_is_fine() {
        let bus = EventBus::new();
        bus.emit(op_accepted(1));
    }

    #[test]
    fn subscribers_see_events_in_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.emit(op_accepted(1));
        bus.emit(op_accepted(2));

        match rx.try_recv().unwrap() {
            EngineEvent::OpAccepted {
                canonical_order, ..
            } => assert_eq!(canonical_order, 1),
            other => panic!("unexpected event {other:?}"),
        }
        match rx.try_recv().unwrap() {
            EngineEvent::OpAccepted {
                canonical_order, ..
            } => assert_eq!(canonical_order, 2),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn event_serializes_with_tag() {
        let v = serde_json::to_value(op_accepted(7)).unwrap();
        assert_eq!(v["event"], "op_accepted");
        assert_eq!(v["canonical_order"], 7);
        assert_eq!(v["state"], "main");
    }

    #[test]
    fn event_state_accessor() {
        assert_eq!(op_accepted(1).state().as_str(), "main");
    }
}
