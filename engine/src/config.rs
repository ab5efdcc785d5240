//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::env;

/// Which garbage collector the local store installs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GarbageCollection {
    /// Drop unreferenced documents whenever garbage is collected
    #[default]
    Eager,
    /// Keep every document
    Disabled,
}

/// Engine configuration, loadable from environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Run the queue consistency check after every removal
    pub consistency_checks: bool,
    pub garbage_collection: GarbageCollection,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            consistency_checks: cfg!(debug_assertions),
            garbage_collection: GarbageCollection::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    ///
    /// `OUTBOX_CONSISTENCY_CHECKS` takes true/false/1/0 and `OUTBOX_GC` takes
    /// eager/none. Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(value) = lookup("OUTBOX_CONSISTENCY_CHECKS") {
            config.consistency_checks = match value.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => true,
                "false" | "0" => false,
                _ => return Err(ConfigError::InvalidConsistencyChecks(value)),
            };
        }

        if let Some(value) = lookup("OUTBOX_GC") {
            config.garbage_collection = match value.trim().to_ascii_lowercase().as_str() {
                "eager" => GarbageCollection::Eager,
                "none" => GarbageCollection::Disabled,
                _ => return Err(ConfigError::InvalidGarbageCollection(value)),
            };
        }

        Ok(config)
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid OUTBOX_CONSISTENCY_CHECKS value {0:?}: expected true, false, 1 or 0")]
    InvalidConsistencyChecks(String),

    #[error("invalid OUTBOX_GC value {0:?}: expected eager or none")]
    InvalidGarbageCollection(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = EngineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.garbage_collection, GarbageCollection::Eager);
    }

    #[test]
    fn parses_values() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("OUTBOX_CONSISTENCY_CHECKS", "0"),
            ("OUTBOX_GC", "None"),
        ]))
        .unwrap();
        assert!(!config.consistency_checks);
        assert_eq!(config.garbage_collection, GarbageCollection::Disabled);
    }

    #[test]
    fn rejects_malformed_values() {
        let err = EngineConfig::from_lookup(lookup(&[("OUTBOX_GC", "lazy")])).unwrap_err();
        assert_eq!(err, ConfigError::InvalidGarbageCollection("lazy".into()));

        let err = EngineConfig::from_lookup(lookup(&[("OUTBOX_CONSISTENCY_CHECKS", "yes")]))
            .unwrap_err();
        assert!(err.to_string().contains("OUTBOX_CONSISTENCY_CHECKS"));
    }

    #[test]
    fn deserializes_with_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"garbageCollection":"disabled"}"#).unwrap();
        assert_eq!(config.garbage_collection, GarbageCollection::Disabled);
        assert_eq!(config.consistency_checks, cfg!(debug_assertions));
    }
}
