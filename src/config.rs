//! Combined configuration for storage, quota monitoring and tracking.

use crate::error::{Result, StoreError};
use crate::storage::{QuotaConfig, StorageConfig};
use crate::tracker::TrackerConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// All configuration in one document.
///
/// ```
/// use delta_store::EngineConfig;
///
/// let config = EngineConfig::from_json_str(r#"{"storage": {"prefix": "app:"}}"#).unwrap();
/// assert_eq!(config.storage.prefix, "app:");
/// assert_eq!(config.tracker.namespace, "changes");
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub storage: StorageConfig,
    pub quota: QuotaConfig,
    pub tracker: TrackerConfig,
}

impl EngineConfig {
    /// Parse and validate a JSON document. Missing fields take defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)
            .map_err(|e| StoreError::Deserialization(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, threshold) in [
            ("storage.warning_threshold", self.storage.warning_threshold),
            ("quota.warning_threshold", self.quota.warning_threshold),
        ] {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(StoreError::InvalidOperation(format!(
                    "{} must be within 0..=1, got {}",
                    name, threshold
                )));
            }
        }

        if self.tracker.namespace.is_empty() {
            return Err(StoreError::InvalidOperation(
                "tracker.namespace must not be empty".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::DiffFormat;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::from_json_str("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.storage.max_retries, 3);
        assert_eq!(config.quota.check_interval_ms, 5000);
        assert_eq!(config.tracker.max_changes, 1000);
    }

    #[test]
    fn test_nested_overrides() {
        let config = EngineConfig::from_json_str(
            r#"{
                "quota": {"check_interval_ms": 250, "prompt_on_warning": false},
                "tracker": {"namespace": "pending", "diff": {"object_identifier": "id", "format": "detailed"}}
            }"#,
        )
        .unwrap();

        assert_eq!(config.quota.check_interval_ms, 250);
        assert!(!config.quota.prompt_on_warning);
        assert_eq!(config.quota.warning_threshold, 0.8);
        assert_eq!(config.tracker.namespace, "pending");
        assert_eq!(config.tracker.diff.object_identifier.as_deref(), Some("id"));
        assert_eq!(config.tracker.diff.format, DiffFormat::Detailed);
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        let result = EngineConfig::from_json_str(r#"{"storage": {"warning_threshold": 1.5}}"#);
        assert!(matches!(result, Err(StoreError::InvalidOperation(_))));
    }

    #[test]
    fn test_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(&path, r#"{"storage": {"retry_delay_ms": 10}}"#).unwrap();

        let config = EngineConfig::from_file(&path).unwrap();
        assert_eq!(config.storage.retry_delay_ms, 10);

        assert!(matches!(
            EngineConfig::from_file(dir.path().join("missing.json")),
            Err(StoreError::Io(_))
        ));
    }
}
