//! Timeline entries.
//!
//! An entry is one fan-out row: action X appears on owner Y's timeline.
//! Entries exist only for pushed actions; deferred actions surface on
//! timelines at read time without a row. The `(owner, action)` pair is
//! unique, which makes fan-out idempotent.

use crate::action::ActionId;
use crate::component::ComponentKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-owner state markers on an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EntryFlags {
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub hidden: bool,
}

/// One timeline membership row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub owner: ComponentKey,
    pub action: ActionId,
    #[serde(default)]
    pub flags: EntryFlags,
    pub created_at: DateTime<Utc>,
}

impl TimelineEntry {
    pub fn new(owner: ComponentKey, action: ActionId) -> Self {
        Self {
            owner,
            action,
            flags: EntryFlags::default(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_entries_are_unread_and_visible() {
        let entry = TimelineEntry::new(ComponentKey::new("user", "7"), ActionId::new());
        assert!(!entry.flags.read);
        assert!(!entry.flags.hidden);
    }

    #[test]
    fn entries_without_flags_decode_with_defaults() {
        let entry = TimelineEntry::new(ComponentKey::new("user", "7"), ActionId::new());
        let mut raw = serde_json::to_value(&entry).unwrap();
        raw.as_object_mut().unwrap().remove("flags");
        let back: TimelineEntry = serde_json::from_value(raw).unwrap();
        assert_eq!(back.flags, EntryFlags::default());
    }
}
