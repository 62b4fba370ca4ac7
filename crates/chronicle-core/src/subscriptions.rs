//! Subscription lookups.
//!
//! Delivery strategies ask who follows a component; pull-mode reads ask
//! the reverse. Both directions are host concerns behind one trait, so
//! the engine never owns a social graph.

use crate::component::ComponentKey;
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("subscription lookup failed: {0}")]
pub struct SubscriptionError(pub String);

/// Who-follows-whom, both directions.
pub trait SubscriptionProvider: Send + Sync {
    /// Components whose timelines should carry actions involving
    /// `target`. Ordered, so fan-out is deterministic.
    fn subscribers_of(&self, target: &ComponentKey)
        -> Result<BTreeSet<ComponentKey>, SubscriptionError>;

    /// Components `owner` follows. Pull-mode reads match deferred
    /// actions against this set.
    fn subscriptions_of(
        &self,
        owner: &ComponentKey,
    ) -> Result<BTreeSet<ComponentKey>, SubscriptionError>;
}

// ---------------------------------------------------------------------------
// In-memory provider
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Graph {
    followers: HashMap<ComponentKey, BTreeSet<ComponentKey>>,
    following: HashMap<ComponentKey, BTreeSet<ComponentKey>>,
}

/// [`SubscriptionProvider`] over an in-process follow graph.
#[derive(Default)]
pub struct MemorySubscriptions {
    inner: Mutex<Graph>,
}

impl MemorySubscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn follow(
        &self,
        follower: &ComponentKey,
        target: &ComponentKey,
    ) -> Result<(), SubscriptionError> {
        let mut graph = self.lock()?;
        graph
            .followers
            .entry(target.clone())
            .or_default()
            .insert(follower.clone());
        graph
            .following
            .entry(follower.clone())
            .or_default()
            .insert(target.clone());
        Ok(())
    }

    pub fn unfollow(
        &self,
        follower: &ComponentKey,
        target: &ComponentKey,
    ) -> Result<(), SubscriptionError> {
        let mut graph = self.lock()?;
        if let Some(set) = graph.followers.get_mut(target) {
            set.remove(follower);
        }
        if let Some(set) = graph.following.get_mut(follower) {
            set.remove(target);
        }
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Graph>, SubscriptionError> {
        self.inner
            .lock()
            .map_err(|_| SubscriptionError("subscription mutex poisoned".to_string()))
    }
}

impl SubscriptionProvider for MemorySubscriptions {
    fn subscribers_of(
        &self,
        target: &ComponentKey,
    ) -> Result<BTreeSet<ComponentKey>, SubscriptionError> {
        Ok(self.lock()?.followers.get(target).cloned().unwrap_or_default())
    }

    fn subscriptions_of(
        &self,
        owner: &ComponentKey,
    ) -> Result<BTreeSet<ComponentKey>, SubscriptionError> {
        Ok(self.lock()?.following.get(owner).cloned().unwrap_or_default())
    }
}
