//! Activity-timeline engine.
//!
//! Records who did what as immutable actions over deduplicated entity
//! references, and delivers those actions to per-entity timelines:
//!
//! ```text
//!   host entities
//!        |
//!        v
//!   ComponentResolver (identity sources, pure)
//!        |
//!        v
//!   ActionManager ---- one transaction ----> TimelineStore
//!        |                                      ^
//!        v                                      |
//!   DeliveryStrategy (push / pull / hybrid) ----+
//!        |
//!        v
//!   ResultBuilder (hydration, snapshot fallback)
//! ```
//!
//! Storage and the subscription graph stay behind traits; the engine
//! ships an in-memory substrate and a follow-graph provider for tests
//! and single-process use. Everything is synchronous: callers get
//! durable-or-error semantics per call and add their own queueing when
//! they need it.

pub mod action;
pub mod builder;
pub mod component;
pub mod components;
pub mod config;
pub mod delivery;
pub mod entry;
pub mod error;
pub mod manager;
pub mod memory;
pub mod resolver;
pub mod store;
pub mod subscriptions;

pub use action::{Action, ActionId, DeploymentState};
pub use builder::{ActionView, ComponentView, ResultBuilder, TimelineItem};
pub use component::{
    Component, ComponentKey, EntityKey, Identifier, KeyPart, ResolvedComponentData,
};
pub use components::{ComponentBatch, ComponentStore};
pub use config::{Config, ConfigWarning, DeliveryMode, WarnLevel};
pub use delivery::{
    DeliveryError, DeliveryOutcome, DeliveryStrategy, HybridDelivery, PullDelivery, PushDelivery,
};
pub use entry::{EntryFlags, TimelineEntry};
pub use error::{ChronicleError, Result};
pub use manager::{ActionDraft, ActionManager};
pub use memory::MemoryStore;
pub use resolver::{ComponentResolver, EntityRegistry, IdentitySource, TimelineModel};
pub use store::{StoreError, StoreTxn, TimelineStore};
pub use subscriptions::{MemorySubscriptions, SubscriptionError, SubscriptionProvider};
