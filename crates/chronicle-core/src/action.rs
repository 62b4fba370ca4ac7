//! Action records.
//!
//! An action is one immutable fact: a verb plus the components filling
//! its roles. Exactly one actor and one subject, any number of objects
//! and indirect components. Role components are stored by key; the rows
//! themselves live in the component table and are shared across actions.

use crate::component::ComponentKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Unique id of an action row.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ActionId(Uuid);

impl ActionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Smallest possible id. Used as the lower bound of per-owner entry
    /// range scans.
    pub fn nil() -> Self {
        Self(Uuid::nil())
    }

    /// Largest possible id. Used as the upper bound of per-owner entry
    /// range scans.
    pub fn max() -> Self {
        Self(Uuid::max())
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }
}

impl Default for ActionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ---------------------------------------------------------------------------
// Deployment state
// ---------------------------------------------------------------------------

/// Where an action stands in the delivery pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DeploymentState {
    /// Committed but not yet deployed. Actions stay pending when
    /// deployment fails; `ActionManager::redeploy` picks them up.
    #[default]
    Pending,
    /// Fan-out wrote timeline entries for `owners` subscribers.
    Pushed { owners: u64, at: DateTime<Utc> },
    /// No fan-out rows; timeline membership is computed at read time.
    Deferred { at: DateTime<Utc> },
}

impl DeploymentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentState::Pending => "pending",
            DeploymentState::Pushed { .. } => "pushed",
            DeploymentState::Deferred { .. } => "deferred",
        }
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, DeploymentState::Deferred { .. })
    }
}

impl fmt::Display for DeploymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

/// A stored action row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: ActionId,
    /// What happened, e.g. `"like"` or `"comment"`.
    pub verb: String,
    /// Who performed the action.
    pub actor: ComponentKey,
    /// What the action was performed on.
    pub subject: ComponentKey,
    /// Further components the action involves directly.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub objects: Vec<ComponentKey>,
    /// Components affected indirectly.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indirect: Vec<ComponentKey>,
    /// Free-form payload attached at creation time.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
    #[serde(default)]
    pub deployment: DeploymentState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Action {
    pub fn new(verb: impl Into<String>, actor: ComponentKey, subject: ComponentKey) -> Self {
        let now = Utc::now();
        Self {
            id: ActionId::new(),
            verb: verb.into(),
            actor,
            subject,
            objects: Vec::new(),
            indirect: Vec::new(),
            data: Value::Null,
            deployment: DeploymentState::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    /// All role components in resolution order: actor, subject, objects,
    /// indirect.
    pub fn components(&self) -> impl Iterator<Item = &ComponentKey> {
        std::iter::once(&self.actor)
            .chain(std::iter::once(&self.subject))
            .chain(self.objects.iter())
            .chain(self.indirect.iter())
    }

    /// Whether `key` fills the actor or subject role. Pull-mode timeline
    /// reads use this to match deferred actions against subscriptions.
    pub fn involves(&self, key: &ComponentKey) -> bool {
        self.actor == *key || self.subject == *key
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
