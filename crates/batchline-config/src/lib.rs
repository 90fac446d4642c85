//! Configuration management for Batchline
//!
//! Provides hierarchical configuration loading from multiple sources:
//! 1. CLI arguments (highest precedence, applied by the binary)
//! 2. Environment variables (`BATCHLINE_*` prefix, `__` between section and key)
//! 3. batchline.local.toml (gitignored, local overrides)
//! 4. batchline.toml (git-tracked, project config)
//! 5. ~/.config/batchline/config.toml (user defaults)
//! 6. Built-in defaults (lowest precedence)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

mod error;
mod loader;
mod paths;

pub use error::ConfigError;
pub use loader::{ConfigLoader, FileLayer};
pub use paths::Paths;

/// AMQP caps `prefetch_count` at 16 bits.
pub const MAX_PREFETCH: u32 = u16::MAX as u32;

/// Upper bound for `batch.retry_backoff_ms` (five minutes).
pub const MAX_RETRY_BACKOFF_MS: u64 = 300_000;

/// Main Batchline configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchlineConfig {
    pub queue: QueueConfig,
    pub batch: BatchConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Broker location as an AMQP URI.
    pub host: String,
    /// Queue the consumer binds to and the producer publishes to.
    pub name: String,
    /// Maximum number of unacknowledged deliveries outstanding at once.
    pub prefetch: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            host: "amqp://localhost:5672/%2f".to_string(),
            name: "event_queue".to_string(),
            prefetch: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Number of records that seals a batch.
    pub size: u32,
    /// Pause after a failed persist before the consumer receives again.
    pub retry_backoff_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            size: 5,
            retry_backoff_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path of the SQLite database file.
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("users.db"),
        }
    }
}

impl BatchlineConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        ConfigLoader::new().load()
    }

    /// Load configuration from specific project directory
    pub fn load_from_dir(project_dir: impl AsRef<Path>) -> Result<Self> {
        ConfigLoader::new().with_project_dir(project_dir).load()
    }

    /// Reads a single TOML file, without layering or environment overrides.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::ParseError {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Configuration for a per-message consumer (batch size 1).
    pub fn single_message() -> Self {
        Self {
            queue: QueueConfig {
                prefetch: 1,
                ..Default::default()
            },
            batch: BatchConfig {
                size: 1,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Checks the invariants the consumer relies on.
    ///
    /// A prefetch bound below the batch size would stall forever: the broker
    /// stops delivering before a batch can seal, and nothing is acknowledged
    /// until one does.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue.name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "queue.name must not be empty".to_string(),
            ));
        }
        if self.batch.size == 0 {
            return Err(ConfigError::ValidationError(
                "batch.size must be at least 1".to_string(),
            ));
        }
        if self.queue.prefetch < self.batch.size {
            return Err(ConfigError::ValidationError(format!(
                "queue.prefetch ({}) must be >= batch.size ({})",
                self.queue.prefetch, self.batch.size
            )));
        }
        if self.queue.prefetch > MAX_PREFETCH {
            return Err(ConfigError::ValidationError(format!(
                "queue.prefetch ({}) exceeds the maximum of {MAX_PREFETCH}",
                self.queue.prefetch
            )));
        }
        if !(1..=MAX_RETRY_BACKOFF_MS).contains(&self.batch.retry_backoff_ms) {
            return Err(ConfigError::ValidationError(format!(
                "batch.retry_backoff_ms ({}) must be between 1 and {MAX_RETRY_BACKOFF_MS}",
                self.batch.retry_backoff_ms
            )));
        }
        Ok(())
    }

    /// Resolve relative paths to absolute
    pub fn resolve_paths(&mut self, base_dir: impl AsRef<Path>) {
        let base = base_dir.as_ref();

        if self.store.path.is_relative() {
            self.store.path = base.join(&self.store.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BatchlineConfig::default();
        assert_eq!(config.queue.name, "event_queue");
        assert_eq!(config.queue.host, "amqp://localhost:5672/%2f");
        assert_eq!(config.batch.size, 5);
        assert_eq!(config.queue.prefetch, 5);
        assert_eq!(config.batch.retry_backoff_ms, 1000);
        assert_eq!(config.store.path, PathBuf::from("users.db"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_single_message_config() {
        let config = BatchlineConfig::single_message();
        assert_eq!(config.batch.size, 1);
        assert_eq!(config.queue.prefetch, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let mut config = BatchlineConfig::default();
        config.batch.size = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_prefetch_below_batch_size_rejected() {
        let mut config = BatchlineConfig::default();
        config.batch.size = 10;
        config.queue.prefetch = 4;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("queue.prefetch (4)"));
    }

    #[test]
    fn test_prefetch_above_amqp_limit_rejected() {
        let mut config = BatchlineConfig::default();
        config.queue.prefetch = MAX_PREFETCH + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_retry_backoff_bounds() {
        let mut config = BatchlineConfig::default();
        config.batch.retry_backoff_ms = 0;
        assert!(config.validate().is_err());

        config.batch.retry_backoff_ms = MAX_RETRY_BACKOFF_MS + 1;
        assert!(config.validate().is_err());

        config.batch.retry_backoff_ms = MAX_RETRY_BACKOFF_MS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_blank_queue_name_rejected() {
        let mut config = BatchlineConfig::default();
        config.queue.name = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_path_resolution() {
        let mut config = BatchlineConfig::default();
        config.resolve_paths("/srv/ingest");
        assert_eq!(config.store.path, PathBuf::from("/srv/ingest/users.db"));

        config.store.path = PathBuf::from("/var/lib/batchline/events.db");
        config.resolve_paths("/srv/ingest");
        assert_eq!(
            config.store.path,
            PathBuf::from("/var/lib/batchline/events.db")
        );
    }

    #[test]
    fn test_from_file_reports_parse_errors() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("broken.toml");
        fs::write(&path, "[batch\nsize = 3").unwrap();

        assert!(matches!(
            BatchlineConfig::from_file(&path),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn test_from_file_missing_file() {
        assert!(matches!(
            BatchlineConfig::from_file("/definitely/not/here.toml"),
            Err(ConfigError::ReadError { .. })
        ));
    }

    #[test]
    fn test_from_file_validates() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("batchline.toml");
        fs::write(&path, "[batch]\nsize = 8\n\n[queue]\nprefetch = 2\n").unwrap();

        assert!(matches!(
            BatchlineConfig::from_file(&path),
            Err(ConfigError::ValidationError(_))
        ));
    }
}
