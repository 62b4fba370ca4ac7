//! Delivery strategies.
//!
//! Deployment happens after an action has committed and decides how the
//! action reaches timelines: push writes one entry row per subscriber in
//! a single transaction, pull defers membership to read time, hybrid
//! pushes small audiences and defers large ones.
//!
//! Strategies never touch action rows. The action manager records the
//! resulting [`DeploymentState`], so every write to an action row has
//! exactly one owner.
//!
//! Fan-out is all-or-nothing: if any entry fails, the transaction rolls
//! back and the whole deployment is retried later via
//! `ActionManager::redeploy`. Entry uniqueness makes the retry safe.

use crate::action::{Action, ActionId};
use crate::component::ComponentKey;
use crate::entry::TimelineEntry;
use crate::store::{StoreError, TimelineStore};
use crate::subscriptions::{SubscriptionError, SubscriptionProvider};
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// What a strategy decided for one action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Entry rows were written for `owners` subscribers.
    Pushed { owners: usize },
    /// No rows; membership is computed at read time.
    Deferred,
}

/// Deployment failure. The action itself is already durable; callers
/// keep the id to retry.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("subscriber lookup for {target} failed while deploying action {action}: {source}")]
    Subscribers {
        action: ActionId,
        target: String,
        #[source]
        source: SubscriptionError,
    },

    #[error("fan-out of action {action} to {owners} timelines failed: {source}")]
    FanOut {
        action: ActionId,
        owners: usize,
        #[source]
        source: StoreError,
    },

    #[error("recording deployment state of action {action} failed: {source}")]
    Mark {
        action: ActionId,
        #[source]
        source: StoreError,
    },
}

impl DeliveryError {
    /// Id of the action whose deployment failed.
    pub fn action(&self) -> ActionId {
        match self {
            DeliveryError::Subscribers { action, .. }
            | DeliveryError::FanOut { action, .. }
            | DeliveryError::Mark { action, .. } => *action,
        }
    }
}

/// How committed actions reach timelines.
pub trait DeliveryStrategy: Send + Sync {
    /// Strategy name for logs and config echoes.
    fn name(&self) -> &'static str;

    /// Deploy one committed action. Must be idempotent: redeploying an
    /// already-deployed action may not duplicate timeline entries.
    fn deploy(
        &self,
        action: &Action,
        store: &dyn TimelineStore,
    ) -> Result<DeliveryOutcome, DeliveryError>;
}

// ---------------------------------------------------------------------------
// Push
// ---------------------------------------------------------------------------

/// Write-time fan-out to every subscriber of the actor or subject.
pub struct PushDelivery {
    subscriptions: Arc<dyn SubscriptionProvider>,
}

impl PushDelivery {
    pub fn new(subscriptions: Arc<dyn SubscriptionProvider>) -> Self {
        Self { subscriptions }
    }

    /// Union of actor and subject subscribers. Ordered, so two
    /// deployments of the same action write entries in the same order.
    fn owners_for(&self, action: &Action) -> Result<BTreeSet<ComponentKey>, DeliveryError> {
        let mut owners = self.lookup(action, &action.actor)?;
        owners.extend(self.lookup(action, &action.subject)?);
        Ok(owners)
    }

    fn lookup(
        &self,
        action: &Action,
        target: &ComponentKey,
    ) -> Result<BTreeSet<ComponentKey>, DeliveryError> {
        self.subscriptions
            .subscribers_of(target)
            .map_err(|source| DeliveryError::Subscribers {
                action: action.id,
                target: target.to_string(),
                source,
            })
    }

    fn fan_out(
        &self,
        action: &Action,
        store: &dyn TimelineStore,
        owners: &BTreeSet<ComponentKey>,
    ) -> Result<usize, DeliveryError> {
        let fan_out_err = |source| DeliveryError::FanOut {
            action: action.id,
            owners: owners.len(),
            source,
        };
        let mut txn = store.begin().map_err(fan_out_err)?;
        let mut written = 0;
        for owner in owners {
            let entry = TimelineEntry::new(owner.clone(), action.id);
            if txn.persist_entry(&entry).map_err(fan_out_err)? {
                written += 1;
            }
        }
        txn.commit().map_err(fan_out_err)?;
        Ok(written)
    }
}

impl DeliveryStrategy for PushDelivery {
    fn name(&self) -> &'static str {
        "push"
    }

    fn deploy(
        &self,
        action: &Action,
        store: &dyn TimelineStore,
    ) -> Result<DeliveryOutcome, DeliveryError> {
        let owners = self.owners_for(action)?;
        let written = self.fan_out(action, store, &owners)?;
        debug!(
            action = %action.id,
            owners = owners.len(),
            written,
            "pushed action to subscriber timelines"
        );
        Ok(DeliveryOutcome::Pushed {
            owners: owners.len(),
        })
    }
}

// ---------------------------------------------------------------------------
// Pull
// ---------------------------------------------------------------------------

/// No write-time fan-out; timelines assemble membership when read.
pub struct PullDelivery;

impl DeliveryStrategy for PullDelivery {
    fn name(&self) -> &'static str {
        "pull"
    }

    fn deploy(
        &self,
        action: &Action,
        _store: &dyn TimelineStore,
    ) -> Result<DeliveryOutcome, DeliveryError> {
        debug!(action = %action.id, "deferred action to read-time delivery");
        Ok(DeliveryOutcome::Deferred)
    }
}

// ---------------------------------------------------------------------------
// Hybrid
// ---------------------------------------------------------------------------

/// Push for audiences up to `fanout_limit` owners, defer beyond it.
pub struct HybridDelivery {
    push: PushDelivery,
    fanout_limit: usize,
}

impl HybridDelivery {
    pub fn new(subscriptions: Arc<dyn SubscriptionProvider>, fanout_limit: usize) -> Self {
        Self {
            push: PushDelivery::new(subscriptions),
            fanout_limit,
        }
    }
}

impl DeliveryStrategy for HybridDelivery {
    fn name(&self) -> &'static str {
        "hybrid"
    }

    fn deploy(
        &self,
        action: &Action,
        store: &dyn TimelineStore,
    ) -> Result<DeliveryOutcome, DeliveryError> {
        let owners = self.push.owners_for(action)?;
        if owners.len() > self.fanout_limit {
            debug!(
                action = %action.id,
                owners = owners.len(),
                limit = self.fanout_limit,
                "audience over fan-out limit, deferring"
            );
            return Ok(DeliveryOutcome::Deferred);
        }
        self.push.fan_out(action, store, &owners)?;
        Ok(DeliveryOutcome::Pushed {
            owners: owners.len(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::subscriptions::MemorySubscriptions;

    fn key(model: &str, id: &str) -> ComponentKey {
        ComponentKey::new(model, id)
    }

    fn followed_actor() -> (Arc<MemorySubscriptions>, Action) {
        let subs = Arc::new(MemorySubscriptions::new());
        subs.follow(&key("user", "7"), &key("user", "5")).unwrap();
        subs.follow(&key("user", "8"), &key("user", "5")).unwrap();
        let action = Action::new("like", key("user", "5"), key("photo", "9"));
        (subs, action)
    }

    #[test]
    fn push_writes_one_entry_per_subscriber() {
        let (subs, action) = followed_actor();
        let store = MemoryStore::new();
        let push = PushDelivery::new(subs);

        let outcome = push.deploy(&action, &store).unwrap();
        assert_eq!(outcome, DeliveryOutcome::Pushed { owners: 2 });
        assert_eq!(store.entries_for(&key("user", "7")).unwrap().len(), 1);
        assert_eq!(store.entries_for(&key("user", "8")).unwrap().len(), 1);
    }

    #[test]
    fn push_unions_actor_and_subject_subscribers() {
        let (subs, action) = followed_actor();
        // user#8 also follows the photo; the union must not double-count.
        subs.follow(&key("user", "8"), &key("photo", "9")).unwrap();
        subs.follow(&key("user", "9"), &key("photo", "9")).unwrap();
        let store = MemoryStore::new();
        let push = PushDelivery::new(subs);

        let outcome = push.deploy(&action, &store).unwrap();
        assert_eq!(outcome, DeliveryOutcome::Pushed { owners: 3 });
        assert_eq!(store.entries_for(&key("user", "8")).unwrap().len(), 1);
        assert_eq!(store.entries_for(&key("user", "9")).unwrap().len(), 1);
    }

    #[test]
    fn push_with_no_subscribers_writes_nothing() {
        let subs = Arc::new(MemorySubscriptions::new());
        let action = Action::new("like", key("user", "5"), key("photo", "9"));
        let store = MemoryStore::new();
        let push = PushDelivery::new(subs);

        let outcome = push.deploy(&action, &store).unwrap();
        assert_eq!(outcome, DeliveryOutcome::Pushed { owners: 0 });
    }

    #[test]
    fn redeploy_does_not_duplicate_entries() {
        let (subs, action) = followed_actor();
        let store = MemoryStore::new();
        let push = PushDelivery::new(subs);

        push.deploy(&action, &store).unwrap();
        push.deploy(&action, &store).unwrap();
        assert_eq!(store.entries_for(&key("user", "7")).unwrap().len(), 1);
    }

    #[test]
    fn pull_always_defers() {
        let action = Action::new("like", key("user", "5"), key("photo", "9"));
        let store = MemoryStore::new();
        let outcome = PullDelivery.deploy(&action, &store).unwrap();
        assert_eq!(outcome, DeliveryOutcome::Deferred);
        assert!(store.entries_for(&key("user", "7")).unwrap().is_empty());
    }

    #[test]
    fn hybrid_pushes_at_or_under_limit() {
        let (subs, action) = followed_actor();
        let store = MemoryStore::new();
        let hybrid = HybridDelivery::new(subs, 2);

        let outcome = hybrid.deploy(&action, &store).unwrap();
        assert_eq!(outcome, DeliveryOutcome::Pushed { owners: 2 });
        assert_eq!(store.entries_for(&key("user", "7")).unwrap().len(), 1);
    }

    #[test]
    fn hybrid_defers_over_limit() {
        let (subs, action) = followed_actor();
        let store = MemoryStore::new();
        let hybrid = HybridDelivery::new(subs, 1);

        let outcome = hybrid.deploy(&action, &store).unwrap();
        assert_eq!(outcome, DeliveryOutcome::Deferred);
        assert!(store.entries_for(&key("user", "7")).unwrap().is_empty());
        assert!(store.entries_for(&key("user", "8")).unwrap().is_empty());
    }
}
