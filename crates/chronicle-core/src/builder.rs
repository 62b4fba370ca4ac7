//! Result assembly.
//!
//! Turns stored actions into display-ready views. Every role component
//! is hydrated through the resolver's loaders; when the live entity is
//! gone the view falls back to the component's stored snapshot, so
//! timelines keep rendering deleted entities.
//!
//! `timeline` merges the two delivery worlds: stored entry rows (push)
//! plus deferred actions matched against the owner's subscriptions at
//! read time (pull), newest first.

use crate::action::Action;
use crate::component::{Component, ComponentKey};
use crate::entry::EntryFlags;
use crate::error::{ChronicleError, Result};
use crate::resolver::{ComponentResolver, TimelineModel};
use crate::store::TimelineStore;
use crate::subscriptions::SubscriptionProvider;
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// One role component, hydrated.
pub struct ComponentView {
    pub component: Component,
    /// The live entity, when a loader could still produce it.
    pub entity: Option<Box<dyn TimelineModel>>,
}

impl ComponentView {
    pub fn is_live(&self) -> bool {
        self.entity.is_some()
    }

    /// Stored snapshot, the rendering fallback when `entity` is gone.
    pub fn snapshot(&self) -> Option<&Value> {
        self.component.data.as_ref()
    }
}

impl fmt::Debug for ComponentView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentView")
            .field("component", &self.component)
            .field("live", &self.entity.is_some())
            .finish()
    }
}

/// One action with every role hydrated.
#[derive(Debug)]
pub struct ActionView {
    pub action: Action,
    pub actor: ComponentView,
    pub subject: ComponentView,
    pub objects: Vec<ComponentView>,
    pub indirect: Vec<ComponentView>,
}

/// One position on an owner's timeline.
#[derive(Debug)]
pub struct TimelineItem {
    pub owner: ComponentKey,
    pub flags: EntryFlags,
    pub action: ActionView,
}

/// Read-path front door.
pub struct ResultBuilder {
    store: Arc<dyn TimelineStore>,
    resolver: ComponentResolver,
    subscriptions: Arc<dyn SubscriptionProvider>,
}

impl ResultBuilder {
    pub fn new(
        store: Arc<dyn TimelineStore>,
        resolver: ComponentResolver,
        subscriptions: Arc<dyn SubscriptionProvider>,
    ) -> Self {
        Self {
            store,
            resolver,
            subscriptions,
        }
    }

    /// Hydrate one action. Fails if a role's component row is missing,
    /// which indicates a store integrity problem rather than a deleted
    /// entity.
    pub fn hydrate(&self, action: &Action) -> Result<ActionView> {
        Ok(ActionView {
            action: action.clone(),
            actor: self.component_view(&action.actor)?,
            subject: self.component_view(&action.subject)?,
            objects: action
                .objects
                .iter()
                .map(|key| self.component_view(key))
                .collect::<Result<_>>()?,
            indirect: action
                .indirect
                .iter()
                .map(|key| self.component_view(key))
                .collect::<Result<_>>()?,
        })
    }

    /// Hydrate a heterogeneous set of actions in order.
    pub fn build(&self, actions: &[Action]) -> Result<Vec<ActionView>> {
        actions.iter().map(|action| self.hydrate(action)).collect()
    }

    /// Assemble `owner`'s timeline, newest action first.
    ///
    /// Pushed actions come from stored entry rows; deferred actions are
    /// matched against the owner's subscriptions at read time and carry
    /// default flags. Hidden entries are skipped.
    pub fn timeline(&self, owner: &ComponentKey) -> Result<Vec<TimelineItem>> {
        let mut items = Vec::new();
        let mut entry_actions = HashSet::new();

        for entry in self.store.entries_for(owner)? {
            // Hidden entries stay off the timeline but still claim their
            // action id, so pull synthesis cannot resurface them.
            entry_actions.insert(entry.action);
            if entry.flags.hidden {
                continue;
            }
            let action = self
                .store
                .find_action(entry.action)?
                .ok_or(ChronicleError::ActionNotFound(entry.action))?;
            items.push(TimelineItem {
                owner: owner.clone(),
                flags: entry.flags,
                action: self.hydrate(&action)?,
            });
        }

        let follows = self.subscriptions.subscriptions_of(owner)?;
        if !follows.is_empty() {
            for action in self.store.deferred_actions_involving(&follows)? {
                // An entry row for the same action wins over read-time
                // membership, e.g. after a hybrid limit change.
                if entry_actions.contains(&action.id) {
                    continue;
                }
                items.push(TimelineItem {
                    owner: owner.clone(),
                    flags: EntryFlags::default(),
                    action: self.hydrate(&action)?,
                });
            }
        }

        items.sort_by(|a, b| {
            b.action
                .action
                .created_at
                .cmp(&a.action.action.created_at)
                .then_with(|| b.action.action.id.cmp(&a.action.action.id))
        });
        Ok(items)
    }

    fn component_view(&self, key: &ComponentKey) -> Result<ComponentView> {
        let component = self
            .store
            .find_component(key)?
            .ok_or_else(|| ChronicleError::ComponentNotFound(key.to_string()))?;
        let entity = self
            .resolver
            .load_entity(&component.model_type, &component.identifier);
        Ok(ComponentView { component, entity })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
