//! Persistence substrate seam.
//!
//! Engine logic never touches a concrete database; it goes through
//! [`TimelineStore`] for reads and [`StoreTxn`] for atomic write scopes.
//! A transaction buffers writes until `commit` and discards them on
//! drop, so callers get all-or-nothing semantics by construction.
//!
//! Substrates enforce two uniqueness constraints:
//!
//! - one component row per `(model_type, identifier)`
//! - one entry row per `(owner, action)`
//!
//! Component uniqueness violations surface as
//! [`StoreError::UniqueConflict`] so the engine can recover from creation
//! races. Entry collisions are absorbed silently (`persist_entry` returns
//! `false`), which keeps fan-out idempotent.

use crate::action::{Action, ActionId};
use crate::component::{Component, ComponentKey};
use crate::entry::{EntryFlags, TimelineEntry};
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness constraint was violated, usually by a concurrent
    /// writer creating the same component between lookup and commit.
    #[error("unique constraint violated: {key}")]
    UniqueConflict { key: String },

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// One atomic write scope. Dropping a transaction without calling
/// `commit` discards every buffered write.
pub trait StoreTxn {
    /// Component lookup that sees this transaction's own uncommitted
    /// writes.
    fn find_component(&self, key: &ComponentKey) -> Result<Option<Component>, StoreError>;

    /// Insert a component row. Fails with [`StoreError::UniqueConflict`]
    /// if the key already exists, staged or committed.
    fn persist_component(&mut self, component: &Component) -> Result<(), StoreError>;

    /// Overwrite an existing component row, e.g. on snapshot refresh.
    fn update_component(&mut self, component: &Component) -> Result<(), StoreError>;

    /// Insert an action row. Ids are uuids, so a conflict here means a
    /// caller bug rather than a race.
    fn persist_action(&mut self, action: &Action) -> Result<(), StoreError>;

    /// Overwrite an existing action row. Fails with
    /// [`StoreError::NotFound`] if the row is missing.
    fn update_action(&mut self, action: &Action) -> Result<(), StoreError>;

    /// Insert an entry row unless the `(owner, action)` pair already
    /// exists. Returns whether a new row was written.
    fn persist_entry(&mut self, entry: &TimelineEntry) -> Result<bool, StoreError>;

    /// Make every buffered write durable, or none of them. Uniqueness is
    /// re-checked against committed state here; a conflict rolls the
    /// whole transaction back.
    fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

/// A timeline persistence substrate.
pub trait TimelineStore: Send + Sync {
    fn begin<'a>(&'a self) -> Result<Box<dyn StoreTxn + 'a>, StoreError>;

    fn find_component(&self, key: &ComponentKey) -> Result<Option<Component>, StoreError>;

    fn find_action(&self, id: ActionId) -> Result<Option<Action>, StoreError>;

    /// All entry rows for one timeline owner. Order is unspecified;
    /// result assembly sorts by action recency.
    fn entries_for(&self, owner: &ComponentKey) -> Result<Vec<TimelineEntry>, StoreError>;

    /// Deferred actions whose actor or subject is in `keys`. Pull-mode
    /// timeline reads pass the owner's subscription set here.
    fn deferred_actions_involving(
        &self,
        keys: &BTreeSet<ComponentKey>,
    ) -> Result<Vec<Action>, StoreError>;

    /// Update the flags of one entry row outside any engine transaction.
    fn set_entry_flags(
        &self,
        owner: &ComponentKey,
        action: ActionId,
        flags: EntryFlags,
    ) -> Result<(), StoreError>;
}
