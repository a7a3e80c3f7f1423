//! Controller configuration.

use crate::backoff::BackoffConfig;
use crate::error::ReplError;
use crate::kinds::{API_EXPORT, API_RESOURCE_SCHEMA};
use crate::object::ShardName;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration for the replication controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Shard whose source store is replicated; recorded as provenance on every replica.
    pub shard: String,
    /// Number of parallel reconcile workers.
    pub workers: usize,
    /// Period of the drift corrector's full resync, in milliseconds.
    pub resync_period_ms: u64,
    /// Delay after the first failure of an identity, in milliseconds.
    pub backoff_base_ms: u64,
    /// Upper bound on any retry delay, in milliseconds.
    pub backoff_max_ms: u64,
    /// Whether retry delays are jittered.
    pub backoff_jitter: bool,
    /// Re-read-and-retry attempts within one reconcile before handing back to the queue.
    pub max_conflict_retries: u32,
    /// Resource kinds to replicate.
    pub kinds: Vec<String>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            shard: "root".to_string(),
            workers: 4,
            resync_period_ms: 30_000,
            backoff_base_ms: 5,
            backoff_max_ms: 30_000,
            backoff_jitter: true,
            max_conflict_retries: 5,
            kinds: vec![API_EXPORT.to_string(), API_RESOURCE_SCHEMA.to_string()],
        }
    }
}

impl ControllerConfig {
    /// Load a config from a `.toml` or `.json` file. Missing fields take defaults.
    pub fn from_file(path: &Path) -> Result<Self, ReplError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_lowercase();
        if ext != "toml" && ext != "json" {
            return Err(ReplError::Config {
                msg: format!("unsupported config file extension: {:?}", ext),
            });
        }

        let contents = std::fs::read_to_string(path)?;
        let config: ControllerConfig = if ext == "toml" {
            toml::from_str(&contents).map_err(|e| ReplError::Config {
                msg: format!("{}: {}", path.display(), e),
            })?
        } else {
            serde_json::from_str(&contents)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the controller cannot run with.
    pub fn validate(&self) -> Result<(), ReplError> {
        let invalid = |msg: &str| {
            Err(ReplError::Config {
                msg: msg.to_string(),
            })
        };
        if self.shard.is_empty() {
            return invalid("shard must not be empty");
        }
        if self.workers == 0 {
            return invalid("workers must be at least 1");
        }
        if self.resync_period_ms == 0 {
            return invalid("resync_period_ms must be positive");
        }
        if self.backoff_base_ms == 0 {
            return invalid("backoff_base_ms must be positive");
        }
        if self.backoff_base_ms > self.backoff_max_ms {
            return invalid("backoff_base_ms must not exceed backoff_max_ms");
        }
        if self.kinds.is_empty() {
            return invalid("at least one kind must be replicated");
        }
        Ok(())
    }

    /// Source shard name.
    pub fn shard_name(&self) -> ShardName {
        ShardName::new(self.shard.clone())
    }

    /// Drift corrector period.
    pub fn resync_period(&self) -> Duration {
        Duration::from_millis(self.resync_period_ms)
    }

    /// Per-identity retry backoff.
    pub fn backoff(&self) -> BackoffConfig {
        BackoffConfig {
            base: Duration::from_millis(self.backoff_base_ms),
            max: Duration::from_millis(self.backoff_max_ms),
            jitter: self.backoff_jitter,
            ..BackoffConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_values() {
        let config = ControllerConfig::default();
        assert_eq!(config.shard, "root");
        assert_eq!(config.workers, 4);
        assert_eq!(config.resync_period(), Duration::from_secs(30));
        assert_eq!(config.max_conflict_retries, 5);
        assert_eq!(config.kinds, vec!["APIExport", "APIResourceSchema"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_backoff_conversion() {
        let config = ControllerConfig {
            backoff_base_ms: 20,
            backoff_max_ms: 400,
            backoff_jitter: false,
            ..Default::default()
        };
        let backoff = config.backoff();
        assert_eq!(backoff.base, Duration::from_millis(20));
        assert_eq!(backoff.max, Duration::from_millis(400));
        assert!(!backoff.jitter);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let zero_workers = ControllerConfig {
            workers: 0,
            ..Default::default()
        };
        assert!(zero_workers.validate().is_err());

        let zero_resync = ControllerConfig {
            resync_period_ms: 0,
            ..Default::default()
        };
        assert!(zero_resync.validate().is_err());

        let zero_backoff = ControllerConfig {
            backoff_base_ms: 0,
            ..Default::default()
        };
        assert_eq!(zero_backoff.validate().unwrap_err().kind_label(), "config");

        let inverted = ControllerConfig {
            backoff_base_ms: 10,
            backoff_max_ms: 5,
            ..Default::default()
        };
        let err = inverted.validate().unwrap_err();
        assert_eq!(err.kind_label(), "config");

        let no_kinds = ControllerConfig {
            kinds: vec![],
            ..Default::default()
        };
        assert!(no_kinds.validate().is_err());
    }

    #[test]
    fn test_from_file_toml_partial() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            r#"
shard = "beta"
workers = 8
kinds = ["APIExport"]
"#
        )
        .unwrap();

        let config = ControllerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.shard, "beta");
        assert_eq!(config.workers, 8);
        assert_eq!(config.kinds, vec!["APIExport"]);
        assert_eq!(config.resync_period_ms, 30_000);
    }

    #[test]
    fn test_from_file_json() {
        let mut file = NamedTempFile::with_suffix(".json").unwrap();
        writeln!(file, r#"{{"resync_period_ms": 500, "max_conflict_retries": 2}}"#).unwrap();

        let config = ControllerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.resync_period(), Duration::from_millis(500));
        assert_eq!(config.max_conflict_retries, 2);
        assert_eq!(config.shard, "root");
    }

    #[test]
    fn test_from_file_rejects_invalid() {
        let mut file = NamedTempFile::with_suffix(".json").unwrap();
        writeln!(file, r#"{{"workers": 0}}"#).unwrap();
        assert!(ControllerConfig::from_file(file.path()).is_err());
    }

    #[test]
    fn test_from_file_unknown_extension() {
        let file = NamedTempFile::with_suffix(".yaml").unwrap();
        let err = ControllerConfig::from_file(file.path()).unwrap_err();
        assert_eq!(err.kind_label(), "config");
    }

    #[test]
    fn test_from_file_error_kinds() {
        let missing = ControllerConfig::from_file(Path::new("/nonexistent/shardcache.toml")).unwrap_err();
        assert_eq!(missing.kind_label(), "io");

        let mut json = NamedTempFile::with_suffix(".json").unwrap();
        writeln!(json, "{{not json").unwrap();
        let err = ControllerConfig::from_file(json.path()).unwrap_err();
        assert_eq!(err.kind_label(), "json");
        assert!(err.is_permanent());

        let mut toml_file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(toml_file, "workers = \"many\"").unwrap();
        let err = ControllerConfig::from_file(toml_file.path()).unwrap_err();
        assert_eq!(err.kind_label(), "config");
    }

    #[test]
    fn test_smallest_backoff_base_yields_nonzero_delays() {
        let config = ControllerConfig {
            backoff_base_ms: 1,
            backoff_max_ms: 10,
            backoff_jitter: false,
            ..Default::default()
        };
        config.validate().unwrap();
        let backoff = config.backoff();
        for failures in 0..10 {
            assert!(backoff.delay_for(failures) >= Duration::from_millis(1));
        }
    }
}
