//! redb-backed persistence substrate for the timeline engine.
//!
//! # Table design
//!
//! Three tables, all with JSON-encoded values:
//!
//! - `components`: one row per entity reference.
//!   ```text
//!   key: [ model_type bytes | 0x00 | identifier bytes ]
//!   ```
//!   The model type never contains NUL, so the layout is unambiguous and
//!   the table clusters components by type.
//!
//! - `actions`: one row per action, keyed by the 16 uuid bytes.
//!
//! - `entries`: one row per timeline membership.
//!   ```text
//!   key: [ owner_key_len: u32 big-endian | owner component key | action uuid: 16 bytes ]
//!   ```
//!   The length prefix keeps owners with overlapping key bytes apart, so
//!   one owner's timeline is a single range scan from the all-zero uuid
//!   to the all-`0xff` uuid under the owner prefix.
//!
//! redb allows one write transaction at a time, so engine-level creation
//! races surface as unique conflicts at persist time rather than at
//! commit. Dropping an uncommitted transaction aborts it.

use chronicle_core::{
    Action, ActionId, Component, ComponentKey, EntryFlags, StoreError, StoreTxn, TimelineEntry,
    TimelineStore,
};
use redb::{Database, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;

// ---------------------------------------------------------------------------
// Table definitions
// ---------------------------------------------------------------------------

/// Key: component storage key. Value: JSON-encoded Component.
const COMPONENTS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("components");

/// Key: 16 uuid bytes. Value: JSON-encoded Action.
const ACTIONS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("actions");

/// Key: owner-prefixed composite (see module docs). Value: JSON-encoded
/// TimelineEntry.
const ENTRIES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("entries");

// ---------------------------------------------------------------------------
// Key helpers
// ---------------------------------------------------------------------------

fn entry_key(owner: &ComponentKey, action: ActionId) -> Vec<u8> {
    let owner_key = owner.storage_key();
    let mut key = Vec::with_capacity(4 + owner_key.len() + 16);
    key.extend_from_slice(&(owner_key.len() as u32).to_be_bytes());
    key.extend_from_slice(&owner_key);
    key.extend_from_slice(action.as_bytes());
    key
}

/// Bounds of one owner's entry range: the same prefix with the smallest
/// and largest possible uuid suffixes.
fn owner_bounds(owner: &ComponentKey) -> (Vec<u8>, Vec<u8>) {
    (
        entry_key(owner, ActionId::nil()),
        entry_key(owner, ActionId::max()),
    )
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec(value).map_err(|e| StoreError::Backend(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    serde_json::from_slice(bytes).map_err(|e| StoreError::Backend(e.to_string()))
}

// ---------------------------------------------------------------------------
// RedbStore
// ---------------------------------------------------------------------------

/// [`TimelineStore`] over a single redb file.
pub struct RedbStore {
    db: Database,
}

impl RedbStore {
    /// Open or create the database at `path`, creating all tables so
    /// reads never hit a missing table.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let db = Database::create(path).map_err(|e| StoreError::Backend(e.to_string()))?;
        let wt = db
            .begin_write()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        wt.open_table(COMPONENTS)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        wt.open_table(ACTIONS)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        wt.open_table(ENTRIES)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        wt.commit()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(Self { db })
    }
}

impl TimelineStore for RedbStore {
    fn begin<'a>(&'a self) -> Result<Box<dyn StoreTxn + 'a>, StoreError> {
        let txn = self
            .db
            .begin_write()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(Box::new(RedbTxn { txn }))
    }

    fn find_component(&self, key: &ComponentKey) -> Result<Option<Component>, StoreError> {
        let rt = self
            .db
            .begin_read()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let table = rt
            .open_table(COMPONENTS)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let storage_key = key.storage_key();
        match table
            .get(storage_key.as_slice())
            .map_err(|e| StoreError::Backend(e.to_string()))?
        {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    fn find_action(&self, id: ActionId) -> Result<Option<Action>, StoreError> {
        let rt = self
            .db
            .begin_read()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let table = rt
            .open_table(ACTIONS)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        match table
            .get(id.as_bytes().as_slice())
            .map_err(|e| StoreError::Backend(e.to_string()))?
        {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    fn entries_for(&self, owner: &ComponentKey) -> Result<Vec<TimelineEntry>, StoreError> {
        let (lower, upper) = owner_bounds(owner);
        let rt = self
            .db
            .begin_read()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let table = rt
            .open_table(ENTRIES)
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let mut result = Vec::new();
        for entry in table
            .range(lower.as_slice()..=upper.as_slice())
            .map_err(|e| StoreError::Backend(e.to_string()))?
        {
            let (_, v) = entry.map_err(|e| StoreError::Backend(e.to_string()))?;
            result.push(decode(v.value())?);
        }
        Ok(result)
    }

    fn deferred_actions_involving(
        &self,
        keys: &BTreeSet<ComponentKey>,
    ) -> Result<Vec<Action>, StoreError> {
        let rt = self
            .db
            .begin_read()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let table = rt
            .open_table(ACTIONS)
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let mut result = Vec::new();
        for entry in table
            .iter()
            .map_err(|e| StoreError::Backend(e.to_string()))?
        {
            let (_, v) = entry.map_err(|e| StoreError::Backend(e.to_string()))?;
            let action: Action = decode(v.value())?;
            if action.deployment.is_deferred()
                && (keys.contains(&action.actor) || keys.contains(&action.subject))
            {
                result.push(action);
            }
        }
        Ok(result)
    }

    fn set_entry_flags(
        &self,
        owner: &ComponentKey,
        action: ActionId,
        flags: EntryFlags,
    ) -> Result<(), StoreError> {
        let key = entry_key(owner, action);
        let wt = self
            .db
            .begin_write()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        {
            let mut table = wt
                .open_table(ENTRIES)
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            let mut entry: TimelineEntry = match table
                .get(key.as_slice())
                .map_err(|e| StoreError::Backend(e.to_string()))?
            {
                Some(guard) => decode(guard.value())?,
                None => return Err(StoreError::NotFound(format!("entry {owner}/{action}"))),
            };
            entry.flags = flags;
            table
                .insert(key.as_slice(), encode(&entry)?.as_slice())
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        }
        wt.commit()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

struct RedbTxn {
    txn: redb::WriteTransaction,
}

impl RedbTxn {
    fn get_component(&self, key: &ComponentKey) -> Result<Option<Component>, StoreError> {
        let table = self
            .txn
            .open_table(COMPONENTS)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let storage_key = key.storage_key();
        let result = match table
            .get(storage_key.as_slice())
            .map_err(|e| StoreError::Backend(e.to_string()))?
        {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        };
        result
    }

    fn get_action(&self, id: ActionId) -> Result<Option<Action>, StoreError> {
        let table = self
            .txn
            .open_table(ACTIONS)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let result = match table
            .get(id.as_bytes().as_slice())
            .map_err(|e| StoreError::Backend(e.to_string()))?
        {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        };
        result
    }

    fn put_component(&self, component: &Component) -> Result<(), StoreError> {
        let key = component.key().storage_key();
        let value = encode(component)?;
        let mut table = self
            .txn
            .open_table(COMPONENTS)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        table
            .insert(key.as_slice(), value.as_slice())
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    fn put_action(&self, action: &Action) -> Result<(), StoreError> {
        let value = encode(action)?;
        let mut table = self
            .txn
            .open_table(ACTIONS)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        table
            .insert(action.id.as_bytes().as_slice(), value.as_slice())
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }
}

impl StoreTxn for RedbTxn {
    fn find_component(&self, key: &ComponentKey) -> Result<Option<Component>, StoreError> {
        // A write transaction reads its own writes.
        self.get_component(key)
    }

    fn persist_component(&mut self, component: &Component) -> Result<(), StoreError> {
        let key = component.key();
        if self.get_component(&key)?.is_some() {
            return Err(StoreError::UniqueConflict {
                key: key.to_string(),
            });
        }
        self.put_component(component)
    }

    fn update_component(&mut self, component: &Component) -> Result<(), StoreError> {
        let key = component.key();
        if self.get_component(&key)?.is_none() {
            return Err(StoreError::NotFound(key.to_string()));
        }
        self.put_component(component)
    }

    fn persist_action(&mut self, action: &Action) -> Result<(), StoreError> {
        if self.get_action(action.id)?.is_some() {
            return Err(StoreError::UniqueConflict {
                key: action.id.to_string(),
            });
        }
        self.put_action(action)
    }

    fn update_action(&mut self, action: &Action) -> Result<(), StoreError> {
        if self.get_action(action.id)?.is_none() {
            return Err(StoreError::NotFound(action.id.to_string()));
        }
        self.put_action(action)
    }

    fn persist_entry(&mut self, entry: &TimelineEntry) -> Result<bool, StoreError> {
        let key = entry_key(&entry.owner, entry.action);
        let value = encode(entry)?;
        let mut table = self
            .txn
            .open_table(ENTRIES)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let exists = table
            .get(key.as_slice())
            .map_err(|e| StoreError::Backend(e.to_string()))?
            .is_some();
        if exists {
            return Ok(false);
        }
        table
            .insert(key.as_slice(), value.as_slice())
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(true)
    }

    fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let RedbTxn { txn } = *self;
        txn.commit().map_err(|e| StoreError::Backend(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
