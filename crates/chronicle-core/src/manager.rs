//! Action creation pipeline.
//!
//! [`ActionManager`] owns the write path end to end:
//!
//! 1. resolve every role to component data, storage untouched
//! 2. commit role components and the action row in one transaction,
//!    absorbing component creation races with a single retry
//! 3. deploy through the configured [`DeliveryStrategy`], exactly once
//!    per successful creation
//! 4. record the resulting [`DeploymentState`] on the action row
//!
//! A resolution failure therefore writes nothing, and a deployment
//! failure leaves a durable pending action that [`ActionManager::redeploy`]
//! finishes later. The manager is the only writer of action rows;
//! strategies only ever write entries.

use crate::action::{Action, ActionId, DeploymentState};
use crate::component::{Component, EntityKey, ResolvedComponentData};
use crate::components::{ComponentBatch, ComponentStore};
use crate::delivery::{DeliveryError, DeliveryOutcome, DeliveryStrategy};
use crate::error::{ChronicleError, Result};
use crate::resolver::{ComponentResolver, IdentitySource, TimelineModel};
use crate::store::{StoreError, TimelineStore};
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

// ---------------------------------------------------------------------------
// Drafts
// ---------------------------------------------------------------------------

struct RoleArg<'a> {
    entity: &'a dyn TimelineModel,
    key: Option<EntityKey>,
}

/// Everything needed to create one action. Role entities are borrowed;
/// nothing is resolved or written until the draft reaches
/// [`ActionManager::create_action`].
pub struct ActionDraft<'a> {
    verb: String,
    actor: RoleArg<'a>,
    subject: RoleArg<'a>,
    objects: Vec<RoleArg<'a>>,
    indirect: Vec<RoleArg<'a>>,
    data: Value,
}

impl<'a> ActionDraft<'a> {
    pub fn new(
        verb: impl Into<String>,
        actor: &'a dyn TimelineModel,
        subject: &'a dyn TimelineModel,
    ) -> Self {
        Self {
            verb: verb.into(),
            actor: RoleArg {
                entity: actor,
                key: None,
            },
            subject: RoleArg {
                entity: subject,
                key: None,
            },
            objects: Vec::new(),
            indirect: Vec::new(),
            data: Value::Null,
        }
    }

    /// Identify the actor by this key instead of querying sources.
    pub fn actor_key(mut self, key: EntityKey) -> Self {
        self.actor.key = Some(key);
        self
    }

    /// Identify the subject by this key instead of querying sources.
    pub fn subject_key(mut self, key: EntityKey) -> Self {
        self.subject.key = Some(key);
        self
    }

    pub fn object(mut self, entity: &'a dyn TimelineModel) -> Self {
        self.objects.push(RoleArg { entity, key: None });
        self
    }

    pub fn object_with_key(mut self, entity: &'a dyn TimelineModel, key: EntityKey) -> Self {
        self.objects.push(RoleArg {
            entity,
            key: Some(key),
        });
        self
    }

    pub fn indirect(mut self, entity: &'a dyn TimelineModel) -> Self {
        self.indirect.push(RoleArg { entity, key: None });
        self
    }

    pub fn indirect_with_key(mut self, entity: &'a dyn TimelineModel, key: EntityKey) -> Self {
        self.indirect.push(RoleArg {
            entity,
            key: Some(key),
        });
        self
    }

    /// Attach a free-form payload stored verbatim on the action row.
    pub fn data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Front door of the engine write path.
pub struct ActionManager {
    store: Arc<dyn TimelineStore>,
    resolver: ComponentResolver,
    components: ComponentStore,
    delivery: Arc<dyn DeliveryStrategy>,
}

impl ActionManager {
    pub fn new(
        store: Arc<dyn TimelineStore>,
        sources: Vec<Arc<dyn IdentitySource>>,
        delivery: Arc<dyn DeliveryStrategy>,
    ) -> Self {
        Self {
            components: ComponentStore::new(store.clone()),
            resolver: ComponentResolver::new(sources),
            store,
            delivery,
        }
    }

    pub fn resolver(&self) -> &ComponentResolver {
        &self.resolver
    }

    pub fn components(&self) -> &ComponentStore {
        &self.components
    }

    /// Resolve one entity and get-or-create its component row.
    pub fn create_component(
        &self,
        entity: &dyn TimelineModel,
        explicit: Option<EntityKey>,
    ) -> Result<Component> {
        let resolved = self.resolver.resolve(entity, explicit)?;
        self.components.get_or_create(resolved)
    }

    /// Open a batch scope that stages component creations and commits
    /// them in one transaction.
    pub fn component_batch(&self) -> Result<ComponentBatch<'_>> {
        ComponentBatch::begin(self.store.as_ref(), &self.resolver)
    }

    /// Create, persist and deploy one action.
    ///
    /// All roles are resolved before anything is written, so a
    /// resolution failure leaves the store untouched. Components and the
    /// action row commit atomically; deployment runs exactly once after
    /// that commit.
    pub fn create_action(&self, draft: ActionDraft<'_>) -> Result<Action> {
        let ActionDraft {
            verb,
            actor,
            subject,
            objects,
            indirect,
            data,
        } = draft;

        let actor = self.resolver.resolve(actor.entity, actor.key)?;
        let subject = self.resolver.resolve(subject.entity, subject.key)?;
        let objects = objects
            .into_iter()
            .map(|role| self.resolver.resolve(role.entity, role.key))
            .collect::<Result<Vec<_>>>()?;
        let indirect = indirect
            .into_iter()
            .map(|role| self.resolver.resolve(role.entity, role.key))
            .collect::<Result<Vec<_>>>()?;

        let mut action = Action::new(verb, actor.key(), subject.key());
        action.objects = objects.iter().map(ResolvedComponentData::key).collect();
        action.indirect = indirect.iter().map(ResolvedComponentData::key).collect();
        action.data = data;

        let roles: Vec<&ResolvedComponentData> = std::iter::once(&actor)
            .chain(std::iter::once(&subject))
            .chain(objects.iter())
            .chain(indirect.iter())
            .collect();

        match self.write_action(&action, &roles) {
            Ok(()) => {}
            Err(StoreError::UniqueConflict { key }) => {
                debug!(action = %action.id, %key, "component race during action creation, retrying");
                self.write_action(&action, &roles)?;
            }
            Err(e) => return Err(e.into()),
        }

        self.deploy(&mut action)?;
        Ok(action)
    }

    /// Persist in-place changes to an action, then run deployment again.
    pub fn update_action(&self, action: &mut Action) -> Result<()> {
        action.updated_at = Utc::now();
        let mut txn = self.store.begin()?;
        txn.update_action(action)?;
        txn.commit()?;
        self.deploy(action)
    }

    /// Re-run deployment for an action whose earlier deployment failed.
    /// Entry uniqueness makes repeating this safe.
    pub fn redeploy(&self, action: &mut Action) -> Result<()> {
        self.deploy(action)
    }

    pub fn action(&self, id: ActionId) -> Result<Action> {
        self.store
            .find_action(id)?
            .ok_or(ChronicleError::ActionNotFound(id))
    }

    /// Stage every role component and the action row, then commit.
    fn write_action(
        &self,
        action: &Action,
        roles: &[&ResolvedComponentData],
    ) -> std::result::Result<(), StoreError> {
        let mut txn = self.store.begin()?;
        for role in roles {
            ComponentStore::get_or_create_in(&mut *txn, (*role).clone())?;
        }
        txn.persist_action(action)?;
        txn.commit()
    }

    fn deploy(&self, action: &mut Action) -> Result<()> {
        let outcome = self.delivery.deploy(action, self.store.as_ref())?;
        self.record_outcome(action, outcome)?;
        debug!(
            action = %action.id,
            strategy = self.delivery.name(),
            state = %action.deployment,
            "action deployed"
        );
        Ok(())
    }

    /// Write the deployment decision back onto the action row. Failures
    /// here are deployment failures: the action stays durable and
    /// redeploy repeats both fan-out and mark.
    fn record_outcome(&self, action: &mut Action, outcome: DeliveryOutcome) -> Result<()> {
        let now = Utc::now();
        action.deployment = match outcome {
            DeliveryOutcome::Pushed { owners } => DeploymentState::Pushed {
                owners: owners as u64,
                at: now,
            },
            DeliveryOutcome::Deferred => DeploymentState::Deferred { at: now },
        };
        action.updated_at = now;

        let id = action.id;
        let mark = |source| DeliveryError::Mark { action: id, source };
        let mut txn = self.store.begin().map_err(mark)?;
        txn.update_action(action).map_err(mark)?;
        txn.commit().map_err(mark)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ComponentKey;
    use crate::delivery::PushDelivery;
    use crate::memory::MemoryStore;
    use crate::resolver::EntityRegistry;
    use crate::subscriptions::MemorySubscriptions;
    use serde_json::json;
    use std::any::Any;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct User {
        id: i64,
        name: String,
    }

    impl TimelineModel for User {
        fn model_type(&self) -> &str {
            "user"
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn snapshot(&self) -> Option<Value> {
            Some(json!({ "name": self.name }))
        }
    }

    struct Photo {
        id: i64,
    }

    impl TimelineModel for Photo {
        fn model_type(&self) -> &str {
            "photo"
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn user(id: i64) -> User {
        User {
            id,
            name: format!("user-{id}"),
        }
    }

    fn key(model: &str, id: &str) -> ComponentKey {
        ComponentKey::new(model, id)
    }

    fn full_registry() -> Vec<Arc<dyn IdentitySource>> {
        let mut registry = EntityRegistry::new();
        registry.register::<User, _>("user", |u| u.id.into());
        registry.register::<Photo, _>("photo", |p| p.id.into());
        vec![Arc::new(registry)]
    }

    fn users_only_registry() -> Vec<Arc<dyn IdentitySource>> {
        let mut registry = EntityRegistry::new();
        registry.register::<User, _>("user", |u| u.id.into());
        vec![Arc::new(registry)]
    }

    struct CountingDelivery {
        calls: AtomicUsize,
    }

    impl CountingDelivery {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl DeliveryStrategy for CountingDelivery {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn deploy(
            &self,
            _action: &Action,
            _store: &dyn TimelineStore,
        ) -> std::result::Result<DeliveryOutcome, DeliveryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(DeliveryOutcome::Deferred)
        }
    }

    struct FlakyDelivery {
        push: PushDelivery,
        fail_next: AtomicBool,
    }

    impl FlakyDelivery {
        fn new(subscriptions: Arc<dyn crate::subscriptions::SubscriptionProvider>) -> Self {
            Self {
                push: PushDelivery::new(subscriptions),
                fail_next: AtomicBool::new(true),
            }
        }
    }

    impl DeliveryStrategy for FlakyDelivery {
        fn name(&self) -> &'static str {
            "flaky"
        }

        fn deploy(
            &self,
            action: &Action,
            store: &dyn TimelineStore,
        ) -> std::result::Result<DeliveryOutcome, DeliveryError> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(DeliveryError::FanOut {
                    action: action.id,
                    owners: 0,
                    source: StoreError::Backend("injected fan-out failure".to_string()),
                });
            }
            self.push.deploy(action, store)
        }
    }

    #[test]
    fn create_action_deploys_exactly_once() {
        let store = Arc::new(MemoryStore::new());
        let counting = Arc::new(CountingDelivery::new());
        let manager = ActionManager::new(store, full_registry(), counting.clone());

        let actor = user(5);
        let photo = Photo { id: 9 };
        manager
            .create_action(ActionDraft::new("like", &actor, &photo))
            .unwrap();

        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn resolution_failure_writes_nothing() {
        let store = Arc::new(MemoryStore::new());
        let counting = Arc::new(CountingDelivery::new());
        // Photos are not registered, so the subject cannot resolve.
        let manager = ActionManager::new(store.clone(), users_only_registry(), counting.clone());

        let actor = user(5);
        let photo = Photo { id: 9 };
        let err = manager
            .create_action(ActionDraft::new("like", &actor, &photo))
            .unwrap_err();

        assert!(matches!(err, ChronicleError::Unresolvable { .. }));
        // The resolvable actor was not written either.
        assert!(store.find_component(&key("user", "5")).unwrap().is_none());
        assert_eq!(counting.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn deployment_failure_leaves_durable_pending_action() {
        let store = Arc::new(MemoryStore::new());
        let subs = Arc::new(MemorySubscriptions::new());
        subs.follow(&key("user", "7"), &key("user", "5")).unwrap();
        let flaky = Arc::new(FlakyDelivery::new(subs));
        let manager = ActionManager::new(store.clone(), full_registry(), flaky);

        let actor = user(5);
        let photo = Photo { id: 9 };
        let err = manager
            .create_action(ActionDraft::new("like", &actor, &photo))
            .unwrap_err();

        let failed_id = match err {
            ChronicleError::Delivery(e) => e.action(),
            other => panic!("expected delivery error, got {other}"),
        };

        // Durable and pending despite the failed fan-out.
        let mut action = manager.action(failed_id).unwrap();
        assert_eq!(action.deployment, DeploymentState::Pending);
        assert!(store.entries_for(&key("user", "7")).unwrap().is_empty());

        // Second attempt completes the deployment.
        manager.redeploy(&mut action).unwrap();
        assert!(matches!(
            action.deployment,
            DeploymentState::Pushed { owners: 1, .. }
        ));
        assert_eq!(store.entries_for(&key("user", "7")).unwrap().len(), 1);
        assert_eq!(
            manager.action(failed_id).unwrap().deployment,
            action.deployment
        );
    }

    #[test]
    fn explicit_keys_override_source_resolution() {
        let store = Arc::new(MemoryStore::new());
        let counting = Arc::new(CountingDelivery::new());
        let manager = ActionManager::new(store.clone(), full_registry(), counting);

        let actor = user(5);
        let photo = Photo { id: 9 };
        let action = manager
            .create_action(
                ActionDraft::new("like", &actor, &photo).actor_key(EntityKey::of("imported-5")),
            )
            .unwrap();

        assert_eq!(action.actor, key("user", "imported-5"));
        assert!(store
            .find_component(&key("user", "imported-5"))
            .unwrap()
            .is_some());
        assert!(store.find_component(&key("user", "5")).unwrap().is_none());
    }

    #[test]
    fn duplicate_roles_share_one_component_row() {
        let store = Arc::new(MemoryStore::new());
        let counting = Arc::new(CountingDelivery::new());
        let manager = ActionManager::new(store.clone(), full_registry(), counting);

        // Self-referential action: actor and subject are the same user.
        let actor = user(5);
        let same = user(5);
        let action = manager
            .create_action(ActionDraft::new("update_profile", &actor, &same))
            .unwrap();

        assert_eq!(action.actor, action.subject);
        assert!(store.find_component(&key("user", "5")).unwrap().is_some());
    }

    #[test]
    fn update_action_persists_changes_and_redeploys() {
        let store = Arc::new(MemoryStore::new());
        let subs = Arc::new(MemorySubscriptions::new());
        subs.follow(&key("user", "7"), &key("user", "5")).unwrap();
        let push = Arc::new(PushDelivery::new(subs));
        let manager = ActionManager::new(store.clone(), full_registry(), push);

        let actor = user(5);
        let photo = Photo { id: 9 };
        let mut action = manager
            .create_action(ActionDraft::new("like", &actor, &photo))
            .unwrap();
        let first_update = action.updated_at;

        action.data = json!({ "edited": true });
        manager.update_action(&mut action).unwrap();

        let stored = manager.action(action.id).unwrap();
        assert_eq!(stored.data, json!({ "edited": true }));
        assert!(stored.updated_at > first_update);
        // Redeployment did not duplicate the subscriber's entry.
        assert_eq!(store.entries_for(&key("user", "7")).unwrap().len(), 1);
    }

    #[test]
    fn action_lookup_reports_missing_ids() {
        let store = Arc::new(MemoryStore::new());
        let counting = Arc::new(CountingDelivery::new());
        let manager = ActionManager::new(store, full_registry(), counting);

        let err = manager.action(ActionId::new()).unwrap_err();
        assert!(matches!(err, ChronicleError::ActionNotFound(_)));
    }
}
