//! Entity identity resolution.
//!
//! The resolver turns host entities into [`ResolvedComponentData`] without
//! touching storage. It consults injected [`IdentitySource`]s in
//! registration order and takes the first successful answer, so hosts can
//! layer sources for different persistence domains. An explicitly
//! provided key bypasses the sources entirely but still passes component
//! validation.
//!
//! [`EntityRegistry`] is the built-in source: hosts bind a key-extraction
//! closure (and optionally a loader for read-path hydration) per model
//! type.

use crate::component::{EntityKey, Identifier, ResolvedComponentData};
use crate::error::{ChronicleError, Result};
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// A host entity that can appear on timelines.
pub trait TimelineModel: Any + Send + Sync {
    /// Stable storage name for this entity type, e.g. `"user"`.
    fn model_type(&self) -> &str;

    /// Dynamic view for identity sources to downcast.
    fn as_any(&self) -> &dyn Any;

    /// Denormalized snapshot captured into the component row at creation
    /// time. Read paths fall back to it when the live entity is gone.
    fn snapshot(&self) -> Option<Value> {
        None
    }
}

/// One identity provider. Sources answer for the model types they
/// support and are consulted in registration order.
pub trait IdentitySource: Send + Sync {
    fn supports(&self, model_type: &str) -> bool;

    /// Extract the entity's key, or `None` if this source cannot
    /// identify it (the resolver then tries the next source).
    fn identify(&self, entity: &dyn TimelineModel) -> Option<EntityKey>;

    /// Load the live entity behind a stored component, or `None` if it
    /// no longer exists.
    fn load(&self, model_type: &str, identifier: &Identifier) -> Option<Box<dyn TimelineModel>>;
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Pure resolution front-end over a fixed set of identity sources.
#[derive(Clone)]
pub struct ComponentResolver {
    sources: Vec<Arc<dyn IdentitySource>>,
}

impl ComponentResolver {
    pub fn new(sources: Vec<Arc<dyn IdentitySource>>) -> Self {
        Self { sources }
    }

    /// Resolve `entity` to persistable component data. No storage access;
    /// a failure here means nothing was written.
    pub fn resolve(
        &self,
        entity: &dyn TimelineModel,
        explicit: Option<EntityKey>,
    ) -> Result<ResolvedComponentData> {
        let model_type = entity.model_type();
        if let Some(key) = explicit {
            return ResolvedComponentData::new(
                model_type,
                Identifier::encode(&key),
                entity.snapshot(),
            );
        }
        for source in &self.sources {
            if !source.supports(model_type) {
                continue;
            }
            if let Some(key) = source.identify(entity) {
                return ResolvedComponentData::new(
                    model_type,
                    Identifier::encode(&key),
                    entity.snapshot(),
                );
            }
        }
        Err(ChronicleError::Unresolvable {
            model_type: model_type.to_string(),
        })
    }

    /// Load the live entity behind a component, trying each supporting
    /// source until one succeeds.
    pub fn load_entity(
        &self,
        model_type: &str,
        identifier: &Identifier,
    ) -> Option<Box<dyn TimelineModel>> {
        self.sources
            .iter()
            .filter(|s| s.supports(model_type))
            .find_map(|s| s.load(model_type, identifier))
    }
}

// ---------------------------------------------------------------------------
// Closure-backed registry source
// ---------------------------------------------------------------------------

type Extract = Box<dyn Fn(&dyn Any) -> Option<EntityKey> + Send + Sync>;
type Load = Box<dyn Fn(&Identifier) -> Option<Box<dyn TimelineModel>> + Send + Sync>;

struct Binding {
    extract: Extract,
    load: Option<Load>,
}

/// [`IdentitySource`] backed by per-model-type closures.
#[derive(Default)]
pub struct EntityRegistry {
    bindings: HashMap<String, Binding>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a key extractor for `model_type`. Entities of other types
    /// registered under the same name are not identified.
    pub fn register<T, F>(&mut self, model_type: impl Into<String>, extract: F)
    where
        T: TimelineModel,
        F: Fn(&T) -> EntityKey + Send + Sync + 'static,
    {
        self.bindings.insert(
            model_type.into(),
            Binding {
                extract: Box::new(move |any| any.downcast_ref::<T>().map(&extract)),
                load: None,
            },
        );
    }

    /// Bind a key extractor plus a loader used by read paths to fetch
    /// the live entity.
    pub fn register_with_loader<T, F, L>(&mut self, model_type: impl Into<String>, extract: F, load: L)
    where
        T: TimelineModel,
        F: Fn(&T) -> EntityKey + Send + Sync + 'static,
        L: Fn(&Identifier) -> Option<T> + Send + Sync + 'static,
    {
        self.bindings.insert(
            model_type.into(),
            Binding {
                extract: Box::new(move |any| any.downcast_ref::<T>().map(&extract)),
                load: Some(Box::new(move |id| {
                    load(id).map(|entity| Box::new(entity) as Box<dyn TimelineModel>)
                })),
            },
        );
    }
}

impl IdentitySource for EntityRegistry {
    fn supports(&self, model_type: &str) -> bool {
        self.bindings.contains_key(model_type)
    }

    fn identify(&self, entity: &dyn TimelineModel) -> Option<EntityKey> {
        self.bindings
            .get(entity.model_type())
            .and_then(|binding| (binding.extract)(entity.as_any()))
    }

    fn load(&self, model_type: &str, identifier: &Identifier) -> Option<Box<dyn TimelineModel>> {
        self.bindings
            .get(model_type)
            .and_then(|binding| binding.load.as_ref())
            .and_then(|load| load(identifier))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
