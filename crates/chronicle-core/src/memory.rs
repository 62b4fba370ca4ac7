//! In-memory reference substrate.
//!
//! Backs tests and single-process embedding. Transactions buffer their
//! writes and apply them under one lock at commit, validating uniqueness
//! first so a conflicting batch changes nothing.

use crate::action::{Action, ActionId};
use crate::component::{Component, ComponentKey};
use crate::entry::{EntryFlags, TimelineEntry};
use crate::store::{StoreError, StoreTxn, TimelineStore};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct Inner {
    components: HashMap<ComponentKey, Component>,
    actions: HashMap<ActionId, Action>,
    entries: BTreeMap<(ComponentKey, ActionId), TimelineEntry>,
}

/// [`TimelineStore`] over process memory.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Backend("store mutex poisoned".to_string()))
    }
}

impl TimelineStore for MemoryStore {
    fn begin<'a>(&'a self) -> Result<Box<dyn StoreTxn + 'a>, StoreError> {
        Ok(Box::new(MemTxn {
            store: self,
            ops: Vec::new(),
        }))
    }

    fn find_component(&self, key: &ComponentKey) -> Result<Option<Component>, StoreError> {
        Ok(self.lock()?.components.get(key).cloned())
    }

    fn find_action(&self, id: ActionId) -> Result<Option<Action>, StoreError> {
        Ok(self.lock()?.actions.get(&id).cloned())
    }

    fn entries_for(&self, owner: &ComponentKey) -> Result<Vec<TimelineEntry>, StoreError> {
        let inner = self.lock()?;
        let lo = (owner.clone(), ActionId::nil());
        let hi = (owner.clone(), ActionId::max());
        Ok(inner.entries.range(lo..=hi).map(|(_, e)| e.clone()).collect())
    }

    fn deferred_actions_involving(
        &self,
        keys: &BTreeSet<ComponentKey>,
    ) -> Result<Vec<Action>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .actions
            .values()
            .filter(|a| {
                a.deployment.is_deferred()
                    && (keys.contains(&a.actor) || keys.contains(&a.subject))
            })
            .cloned()
            .collect())
    }

    fn set_entry_flags(
        &self,
        owner: &ComponentKey,
        action: ActionId,
        flags: EntryFlags,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let entry = inner
            .entries
            .get_mut(&(owner.clone(), action))
            .ok_or_else(|| StoreError::NotFound(format!("entry {owner}/{action}")))?;
        entry.flags = flags;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

enum Op {
    PutComponent(Component),
    UpdateComponent(Component),
    PutAction(Action),
    UpdateAction(Action),
    PutEntry(TimelineEntry),
}

struct MemTxn<'a> {
    store: &'a MemoryStore,
    ops: Vec<Op>,
}

impl MemTxn<'_> {
    fn staged_component(&self, key: &ComponentKey) -> Option<&Component> {
        self.ops.iter().rev().find_map(|op| match op {
            Op::PutComponent(c) | Op::UpdateComponent(c) if c.key() == *key => Some(c),
            _ => None,
        })
    }

    fn staged_action_ids(&self) -> HashSet<ActionId> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                Op::PutAction(a) => Some(a.id),
                _ => None,
            })
            .collect()
    }
}

impl StoreTxn for MemTxn<'_> {
    fn find_component(&self, key: &ComponentKey) -> Result<Option<Component>, StoreError> {
        if let Some(staged) = self.staged_component(key) {
            return Ok(Some(staged.clone()));
        }
        self.store.find_component(key)
    }

    fn persist_component(&mut self, component: &Component) -> Result<(), StoreError> {
        let key = component.key();
        if self.find_component(&key)?.is_some() {
            return Err(StoreError::UniqueConflict {
                key: key.to_string(),
            });
        }
        self.ops.push(Op::PutComponent(component.clone()));
        Ok(())
    }

    fn update_component(&mut self, component: &Component) -> Result<(), StoreError> {
        let key = component.key();
        if self.find_component(&key)?.is_none() {
            return Err(StoreError::NotFound(key.to_string()));
        }
        self.ops.push(Op::UpdateComponent(component.clone()));
        Ok(())
    }

    fn persist_action(&mut self, action: &Action) -> Result<(), StoreError> {
        if self.staged_action_ids().contains(&action.id)
            || self.store.find_action(action.id)?.is_some()
        {
            return Err(StoreError::UniqueConflict {
                key: action.id.to_string(),
            });
        }
        self.ops.push(Op::PutAction(action.clone()));
        Ok(())
    }

    fn update_action(&mut self, action: &Action) -> Result<(), StoreError> {
        if !self.staged_action_ids().contains(&action.id)
            && self.store.find_action(action.id)?.is_none()
        {
            return Err(StoreError::NotFound(action.id.to_string()));
        }
        self.ops.push(Op::UpdateAction(action.clone()));
        Ok(())
    }

    fn persist_entry(&mut self, entry: &TimelineEntry) -> Result<bool, StoreError> {
        let staged = self.ops.iter().any(|op| {
            matches!(op, Op::PutEntry(e) if e.owner == entry.owner && e.action == entry.action)
        });
        if staged {
            return Ok(false);
        }
        let committed = {
            let inner = self.store.lock()?;
            inner
                .entries
                .contains_key(&(entry.owner.clone(), entry.action))
        };
        if committed {
            return Ok(false);
        }
        self.ops.push(Op::PutEntry(entry.clone()));
        Ok(true)
    }

    fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let mut inner = self.store.lock()?;

        // Validate against committed state before touching it; staged
        // sets let later ops in this batch see earlier ones.
        let mut staged_components: HashSet<ComponentKey> = HashSet::new();
        let mut staged_actions: HashSet<ActionId> = HashSet::new();
        for op in &self.ops {
            match op {
                Op::PutComponent(c) => {
                    let key = c.key();
                    if inner.components.contains_key(&key) || !staged_components.insert(key.clone())
                    {
                        return Err(StoreError::UniqueConflict {
                            key: key.to_string(),
                        });
                    }
                }
                Op::UpdateComponent(c) => {
                    let key = c.key();
                    if !inner.components.contains_key(&key) && !staged_components.contains(&key) {
                        return Err(StoreError::NotFound(key.to_string()));
                    }
                }
                Op::PutAction(a) => {
                    if inner.actions.contains_key(&a.id) || !staged_actions.insert(a.id) {
                        return Err(StoreError::UniqueConflict {
                            key: a.id.to_string(),
                        });
                    }
                }
                Op::UpdateAction(a) => {
                    if !inner.actions.contains_key(&a.id) && !staged_actions.contains(&a.id) {
                        return Err(StoreError::NotFound(a.id.to_string()));
                    }
                }
                Op::PutEntry(_) => {}
            }
        }

        for op in self.ops {
            match op {
                Op::PutComponent(c) | Op::UpdateComponent(c) => {
                    inner.components.insert(c.key(), c);
                }
                Op::PutAction(a) | Op::UpdateAction(a) => {
                    inner.actions.insert(a.id, a);
                }
                Op::PutEntry(e) => {
                    // A concurrent writer may have fanned out the same
                    // pair; first row wins.
                    inner.entries.entry((e.owner.clone(), e.action)).or_insert(e);
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
