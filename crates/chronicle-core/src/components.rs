//! Component persistence.
//!
//! `get_or_create` is the only way component rows come into existence:
//! look the key up, insert on miss, and when a concurrent writer wins the
//! insert race, fall back to reading the row it created. Callers never
//! see the race.
//!
//! [`ComponentBatch`] amortizes that flow over many components in one
//! transaction. The batch owns its transaction: `commit` finishes it,
//! dropping the batch rolls it back.

use crate::component::{Component, ComponentKey, EntityKey, ResolvedComponentData};
use crate::error::Result;
use crate::resolver::{ComponentResolver, TimelineModel};
use crate::store::{StoreError, StoreTxn, TimelineStore};
use std::sync::Arc;
use tracing::debug;

/// Read and create component rows.
pub struct ComponentStore {
    store: Arc<dyn TimelineStore>,
}

impl ComponentStore {
    pub fn new(store: Arc<dyn TimelineStore>) -> Self {
        Self { store }
    }

    pub fn find(&self, key: &ComponentKey) -> Result<Option<Component>> {
        Ok(self.store.find_component(key)?)
    }

    /// Return the row for `resolved`, creating it if absent. Losing a
    /// creation race to a concurrent writer is recovered internally by
    /// returning the winner's row.
    pub fn get_or_create(&self, resolved: ResolvedComponentData) -> Result<Component> {
        let key = resolved.key();
        if let Some(existing) = self.store.find_component(&key)? {
            return Ok(existing);
        }

        let component = Component::from_resolved(resolved);
        let mut txn = self.store.begin()?;
        let outcome = match txn.persist_component(&component) {
            Ok(()) => txn.commit(),
            Err(e) => Err(e),
        };
        match outcome {
            Ok(()) => Ok(component),
            Err(StoreError::UniqueConflict { .. }) => {
                debug!(component = %key, "lost component creation race, reading winner");
                let winner = self.store.find_component(&key)?.ok_or_else(|| {
                    StoreError::Backend(format!("component {key} vanished after unique conflict"))
                })?;
                Ok(winner)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Overwrite the stored snapshot with freshly resolved data. Creates
    /// the row when it does not exist yet.
    pub fn refresh(&self, resolved: ResolvedComponentData) -> Result<Component> {
        let key = resolved.key();
        match self.store.find_component(&key)? {
            None => self.get_or_create(resolved),
            Some(mut existing) => {
                existing.data = resolved.data;
                let mut txn = self.store.begin()?;
                txn.update_component(&existing)?;
                txn.commit()?;
                Ok(existing)
            }
        }
    }

    /// Get-or-create inside an open transaction. Sees rows staged
    /// earlier in the same transaction, so duplicate roles within one
    /// batch resolve to one row.
    pub(crate) fn get_or_create_in(
        txn: &mut dyn StoreTxn,
        resolved: ResolvedComponentData,
    ) -> std::result::Result<Component, StoreError> {
        let key = resolved.key();
        if let Some(existing) = txn.find_component(&key)? {
            return Ok(existing);
        }
        let component = Component::from_resolved(resolved);
        txn.persist_component(&component)?;
        Ok(component)
    }
}

// ---------------------------------------------------------------------------
// Batch creation
// ---------------------------------------------------------------------------

/// Scope that stages many component creations and commits once.
pub struct ComponentBatch<'a> {
    store: &'a dyn TimelineStore,
    resolver: &'a ComponentResolver,
    txn: Box<dyn StoreTxn + 'a>,
    staged: Vec<Component>,
}

impl<'a> ComponentBatch<'a> {
    pub(crate) fn begin(
        store: &'a dyn TimelineStore,
        resolver: &'a ComponentResolver,
    ) -> Result<Self> {
        Ok(Self {
            txn: store.begin()?,
            store,
            resolver,
            staged: Vec::new(),
        })
    }

    /// Resolve `entity` and stage its component row if no committed or
    /// staged row exists.
    pub fn get_or_create(
        &mut self,
        entity: &dyn TimelineModel,
        explicit: Option<EntityKey>,
    ) -> Result<Component> {
        let resolved = self.resolver.resolve(entity, explicit)?;
        let key = resolved.key();
        if let Some(existing) = self.txn.find_component(&key)? {
            return Ok(existing);
        }
        let component = Component::from_resolved(resolved);
        self.txn.persist_component(&component)?;
        self.staged.push(component.clone());
        Ok(component)
    }

    /// Commit every staged row. When a concurrent writer committed one
    /// of the same keys first, the batch retries once against current
    /// state, keeping only the rows still missing. Returns how many rows
    /// this batch inserted.
    pub fn commit(self) -> Result<usize> {
        let ComponentBatch {
            store,
            txn,
            staged,
            ..
        } = self;
        match txn.commit() {
            Ok(()) => Ok(staged.len()),
            Err(StoreError::UniqueConflict { .. }) => {
                debug!("component batch lost a creation race, retrying remainder");
                let mut retry = store.begin()?;
                let mut inserted = 0;
                for component in &staged {
                    if retry.find_component(&component.key())?.is_none() {
                        retry.persist_component(component)?;
                        inserted += 1;
                    }
                }
                retry.commit()?;
                Ok(inserted)
            }
            Err(e) => Err(e.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
