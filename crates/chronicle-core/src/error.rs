use crate::action::ActionId;
use crate::delivery::DeliveryError;
use crate::store::StoreError;
use crate::subscriptions::SubscriptionError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChronicleError {
    #[error("no identity source supports '{model_type}' and no explicit identifier was given")]
    Unresolvable { model_type: String },

    #[error("invalid model type '{0}': must be non-empty and free of NUL bytes")]
    InvalidModelType(String),

    #[error("empty identifier for model type '{model_type}'")]
    EmptyIdentifier { model_type: String },

    #[error("component not found: {0}")]
    ComponentNotFound(String),

    #[error("action not found: {0}")]
    ActionNotFound(ActionId),

    /// Persistence failure before or during the component/action commit.
    /// Commit order (components and action in one transaction, deployment
    /// after) guarantees no partial action is left behind.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Fan-out failed after the action itself committed. Non-fatal: the
    /// action is durable and `ActionManager::redeploy` retries deployment
    /// without recreating it.
    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error(transparent)]
    Subscriptions(#[from] SubscriptionError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, ChronicleError>;
