//! Named states — causal DAG heads with acceptance policy.
//!
//! A state is a named line of history: an ordered list of accepted ops plus
//! the metadata recorded here. `heads` is the minimal antichain of op ids
//! with no accepted descendants in the state. The bootstrap state `main`
//! carries a permissive policy; a state named `prod` defaults to strict.

use serde::{Deserialize, Serialize};

use super::types::{OpId, StateName};

// ---------------------------------------------------------------------------
// StatePolicy
// ---------------------------------------------------------------------------

/// Acceptance policy for a state.
///
/// `required_checks` and `required_human_approvals` are recorded and
/// surfaced but not enforced by the classifier.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatePolicy {
    /// When `false`, new writes are refused while the state has open
    /// conflicts.
    pub allow_open_conflicts: bool,

    /// Named checks a promotion gate could require.
    #[serde(default)]
    pub required_checks: Vec<String>,

    /// Human approvals a promotion gate could require.
    #[serde(default)]
    pub required_human_approvals: u32,
}

impl StatePolicy {
    /// The permissive default (`main` and ordinary workspaces).
    #[must_use]
    pub const fn permissive() -> Self {
        Self {
            allow_open_conflicts: true,
            required_checks: Vec::new(),
            required_human_approvals: 0,
        }
    }

    /// The strict default applied to a state named `prod`.
    #[must_use]
    pub fn strict() -> Self {
        Self {
            allow_open_conflicts: false,
            required_checks: vec!["ci".to_owned()],
            required_human_approvals: 1,
        }
    }

    /// Default policy for a newly created state, by name.
    #[must_use]
    pub fn default_for(name: &StateName) -> Self {
        if name.as_str() == "prod" {
            Self::strict()
        } else {
            Self::permissive()
        }
    }
}

impl Default for StatePolicy {
    fn default() -> Self {
        Self::permissive()
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Metadata for one named state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    /// The state's name.
    pub name: StateName,

    /// Parent state this one was forked from, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_state: Option<StateName>,

    /// The parent's heads captured at creation time. A historical record;
    /// it is not re-synced as the base evolves.
    #[serde(default)]
    pub base_heads: Vec<OpId>,

    /// Current minimal antichain of op ids without accepted descendants.
    #[serde(default)]
    pub heads: Vec<OpId>,

    /// Acceptance policy.
    #[serde(default)]
    pub policy: StatePolicy,

    /// RFC 3339 creation time.
    pub created_at: String,

    /// RFC 3339 time of the last accepted mutation.
    pub updated_at: String,
}

impl State {
    /// Create a fresh state with no base.
    #[must_use]
    pub fn bootstrap(name: StateName, now: &str) -> Self {
        let policy = StatePolicy::default_for(&name);
        Self {
            name,
            base_state: None,
            base_heads: Vec::new(),
            heads: Vec::new(),
            policy,
            created_at: now.to_owned(),
            updated_at: now.to_owned(),
        }
    }

    /// Create a state forked from `base`, inheriting its heads.
    #[must_use]
    pub fn forked_from(name: StateName, base: &Self, now: &str) -> Self {
        let policy = StatePolicy::default_for(&name);
        Self {
            name,
            base_state: Some(base.name.clone()),
            base_heads: base.heads.clone(),
            heads: base.heads.clone(),
            policy,
            created_at: now.to_owned(),
            updated_at: now.to_owned(),
        }
    }

    /// Advance `heads` after accepting `op_id` with the given parents:
    /// parents that were heads are superseded, the new op becomes a head.
    pub fn advance_heads(&mut self, op_id: &OpId, parents: &[OpId], now: &str) {
        self.heads.retain(|h| !parents.contains(h));
        if !self.heads.contains(op_id) {
            self.heads.push(op_id.clone());
        }
        now.clone_into(&mut self.updated_at);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
