//! Engine configuration.
//!
//! Hosts wire delivery through YAML rather than code so strategy changes
//! do not require a rebuild. Every field has a default; an empty file is
//! a valid config.

use crate::delivery::{DeliveryStrategy, HybridDelivery, PullDelivery, PushDelivery};
use crate::error::Result;
use crate::subscriptions::SubscriptionProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Which delivery strategy the engine runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    Push,
    Pull,
    Hybrid,
}

impl DeliveryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryMode::Push => "push",
            DeliveryMode::Pull => "pull",
            DeliveryMode::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "default_delivery")]
    pub delivery: DeliveryMode,
    /// Hybrid only: audiences larger than this are deferred to read
    /// time instead of fanned out.
    #[serde(default = "default_hybrid_fanout_limit")]
    pub hybrid_fanout_limit: usize,
}

fn default_version() -> u32 {
    1
}

fn default_delivery() -> DeliveryMode {
    DeliveryMode::Push
}

fn default_hybrid_fanout_limit() -> usize {
    256
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            delivery: default_delivery(),
            hybrid_fanout_limit: default_hybrid_fanout_limit(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarnLevel {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Sanity-check the configuration. `Error`-level findings mean the
    /// engine should not start.
    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut findings = Vec::new();
        if self.version != 1 {
            findings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!("unsupported config version {}", self.version),
            });
        }
        if self.delivery == DeliveryMode::Hybrid && self.hybrid_fanout_limit == 0 {
            findings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "hybrid delivery with hybrid_fanout_limit 0 never pushes; use pull"
                    .to_string(),
            });
        }
        if self.delivery != DeliveryMode::Hybrid
            && self.hybrid_fanout_limit != default_hybrid_fanout_limit()
        {
            findings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "hybrid_fanout_limit has no effect under {} delivery",
                    self.delivery
                ),
            });
        }
        findings
    }

    /// Build the configured delivery strategy.
    pub fn strategy(&self, subscriptions: Arc<dyn SubscriptionProvider>) -> Arc<dyn DeliveryStrategy> {
        match self.delivery {
            DeliveryMode::Push => Arc::new(PushDelivery::new(subscriptions)),
            DeliveryMode::Pull => Arc::new(PullDelivery),
            DeliveryMode::Hybrid => Arc::new(HybridDelivery::new(
                subscriptions,
                self.hybrid_fanout_limit,
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscriptions::MemorySubscriptions;

    #[test]
    fn empty_yaml_yields_defaults() {
        let config = Config::from_yaml("{}").unwrap();
        assert_eq!(config.version, 1);
        assert_eq!(config.delivery, DeliveryMode::Push);
        assert_eq!(config.hybrid_fanout_limit, 256);
        assert!(config.validate().is_empty());
    }

    #[test]
    fn parses_full_config() {
        let config = Config::from_yaml(
            "version: 1\ndelivery: hybrid\nhybrid_fanout_limit: 1000\n",
        )
        .unwrap();
        assert_eq!(config.delivery, DeliveryMode::Hybrid);
        assert_eq!(config.hybrid_fanout_limit, 1000);
        assert!(config.validate().is_empty());
    }

    #[test]
    fn unknown_delivery_mode_is_a_parse_error() {
        assert!(Config::from_yaml("delivery: carrier_pigeon\n").is_err());
    }

    #[test]
    fn validate_flags_unsupported_versions() {
        let config = Config::from_yaml("version: 9\n").unwrap();
        let findings = config.validate();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].level, WarnLevel::Error);
    }

    #[test]
    fn validate_warns_on_zero_hybrid_limit() {
        let config = Config::from_yaml("delivery: hybrid\nhybrid_fanout_limit: 0\n").unwrap();
        let findings = config.validate();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].level, WarnLevel::Warning);
    }

    #[test]
    fn validate_warns_on_dead_hybrid_limit() {
        let config = Config::from_yaml("delivery: pull\nhybrid_fanout_limit: 10\n").unwrap();
        let findings = config.validate();
        assert_eq!(findings.len(), 1);
        assert!(findings[0].message.contains("no effect"));
    }

    #[test]
    fn strategy_follows_delivery_mode() {
        let subs = Arc::new(MemorySubscriptions::new());
        for (yaml, name) in [
            ("delivery: push\n", "push"),
            ("delivery: pull\n", "pull"),
            ("delivery: hybrid\n", "hybrid"),
        ] {
            let config = Config::from_yaml(yaml).unwrap();
            assert_eq!(config.strategy(subs.clone()).name(), name);
        }
    }

    #[test]
    fn load_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chronicle.yaml");
        std::fs::write(&path, "delivery: pull\n").unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.delivery, DeliveryMode::Pull);
        assert!(Config::load(&dir.path().join("missing.yaml")).is_err());
    }
}
