//! Sync configuration (`doorman.toml`).
//!
//! Every field has a default, so an empty file (or no file) is valid:
//!
//! ```toml
//! database_path = "/var/lib/doorman/sync.db"
//! workers = 2
//! initial_backoff_secs = 30
//! fetch_interval_secs = 3600
//! history_limit = 50
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::BackoffPolicy;
use crate::engine::DEFAULT_HISTORY_LIMIT;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    /// SQLite file holding the instance table.
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Number of engine workers.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// First retry delay; doubles per failed attempt.
    #[serde(default = "default_initial_backoff_secs")]
    pub initial_backoff_secs: u64,

    /// Period of the recurring combined fetch.
    #[serde(default = "default_fetch_interval_secs")]
    pub fetch_interval_secs: u64,

    /// Terminal instances kept per task name.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("doorman-sync.db")
}

fn default_workers() -> usize {
    2
}

fn default_initial_backoff_secs() -> u64 {
    30
}

fn default_fetch_interval_secs() -> u64 {
    3600
}

fn default_history_limit() -> usize {
    DEFAULT_HISTORY_LIMIT
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            workers: default_workers(),
            initial_backoff_secs: default_initial_backoff_secs(),
            fetch_interval_secs: default_fetch_interval_secs(),
            history_limit: default_history_limit(),
        }
    }
}

impl SyncConfig {
    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        if self.initial_backoff_secs == 0 {
            return Err(ConfigError::Invalid(
                "initial_backoff_secs must be at least 1".into(),
            ));
        }
        if self.fetch_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "fetch_interval_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::exponential(Duration::from_secs(self.initial_backoff_secs))
    }

    pub fn fetch_interval(&self) -> Duration {
        Duration::from_secs(self.fetch_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn empty_file_uses_defaults() {
        let config = SyncConfig::parse("").unwrap();

        assert_eq!(config, SyncConfig::default());
        assert_eq!(config.workers, 2);
        assert_eq!(config.backoff(), BackoffPolicy::default());
        assert_eq!(config.fetch_interval(), Duration::from_secs(3600));
    }

    #[test]
    fn fields_override_defaults() {
        let config = SyncConfig::parse(
            r#"
            database_path = "/var/lib/doorman/sync.db"
            workers = 4
            fetch_interval_secs = 900
            "#,
        )
        .unwrap();

        assert_eq!(config.database_path, PathBuf::from("/var/lib/doorman/sync.db"));
        assert_eq!(config.workers, 4);
        assert_eq!(config.fetch_interval(), Duration::from_secs(900));
        assert_eq!(config.initial_backoff_secs, 30);
    }

    #[rstest]
    #[case("workers = 0")]
    #[case("initial_backoff_secs = 0")]
    #[case("fetch_interval_secs = 0")]
    fn zero_values_are_rejected(#[case] content: &str) {
        assert!(matches!(
            SyncConfig::parse(content),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(matches!(
            SyncConfig::parse("wokers = 3"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();

        let config = SyncConfig::load(&dir.path().join("doorman.toml")).unwrap();

        assert_eq!(config, SyncConfig::default());
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doorman.toml");
        std::fs::write(&path, "history_limit = 5\n").unwrap();

        assert_eq!(SyncConfig::load(&path).unwrap().history_limit, 5);
    }
}
