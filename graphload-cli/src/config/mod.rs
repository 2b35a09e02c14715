//! Bulk engine configuration with builder pattern
//!
//! Provides chunking and concurrency settings for the bulk executor plus
//! storage connection settings, with sane defaults and TOML loading.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Default number of records per chunk transaction
pub const DEFAULT_CHUNK_SIZE: usize = 1000;
/// Default number of chunks in flight at once
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;
/// Default storage connection pool size
pub const DEFAULT_MAX_CONNECTIONS: u32 = 8;
/// Default time a writer waits on a locked database
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

/// Chunking and concurrency settings for the bulk executor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkConfig {
    /// Maximum records per chunk (one transaction per chunk)
    pub chunk_size: usize,
    /// Maximum chunks executing concurrently; keep below the pool size
    pub max_concurrency: usize,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }
}

impl BulkConfig {
    /// Create a new builder for BulkConfig
    pub fn builder() -> BulkConfigBuilder {
        BulkConfigBuilder::new()
    }

    /// Config for one-at-a-time execution (single chunk worker)
    pub fn sequential() -> Self {
        Self {
            max_concurrency: 1,
            ..Self::default()
        }
    }

    /// Check that both limits are positive
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.chunk_size == 0 {
            return Err("chunk_size must be greater than zero".to_string());
        }
        if self.max_concurrency == 0 {
            return Err("max_concurrency must be greater than zero".to_string());
        }
        Ok(())
    }

    /// Keep at least one pool connection free for reads
    pub fn clamp_to_pool(mut self, max_connections: u32) -> Self {
        let ceiling = (max_connections as usize).saturating_sub(1).max(1);
        if self.max_concurrency > ceiling {
            log::debug!(
                "Clamping max_concurrency from {} to {} (pool has {} connections)",
                self.max_concurrency,
                ceiling,
                max_connections
            );
            self.max_concurrency = ceiling;
        }
        self
    }
}

/// Storage connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path of the SQLite database file
    pub path: PathBuf,
    /// Connection pool size
    pub max_connections: u32,
    /// Milliseconds to wait on a locked database before failing
    pub busy_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("graphload.db"),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

/// Top-level configuration file layout
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub bulk: BulkConfig,
    pub storage: StorageConfig,
}

impl AppConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(content).context("Failed to parse configuration")?;
        config
            .bulk
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid [bulk] configuration: {}", e))?;
        Ok(config)
    }

    /// Load configuration from a file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Load the first config found: explicit path, `./graphload.toml`, then
    /// the user config directory. Falls back to defaults.
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        let local = PathBuf::from("graphload.toml");
        if local.exists() {
            log::debug!("Using config file {}", local.display());
            return Self::load(&local);
        }

        if let Some(dir) = dirs::config_dir() {
            let user = dir.join("graphload").join("graphload.toml");
            if user.exists() {
                log::debug!("Using config file {}", user.display());
                return Self::load(&user);
            }
        }

        Ok(Self::default())
    }
}

/// Builder for BulkConfig
#[derive(Debug)]
pub struct BulkConfigBuilder {
    config: BulkConfig,
}

impl BulkConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: BulkConfig::default(),
        }
    }

    /// Set records per chunk
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    /// Set maximum chunks in flight
    pub fn max_concurrency(mut self, max: usize) -> Self {
        self.config.max_concurrency = max;
        self
    }

    /// Build the final configuration
    pub fn build(self) -> BulkConfig {
        self.config
    }
}

impl Default for BulkConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BulkConfig::default();

        assert_eq!(config.chunk_size, 1000);
        assert_eq!(config.max_concurrency, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = BulkConfig::builder().chunk_size(250).max_concurrency(2).build();

        assert_eq!(config.chunk_size, 250);
        assert_eq!(config.max_concurrency, 2);
    }

    #[test]
    fn test_zero_limits_rejected() {
        assert!(BulkConfig::builder().chunk_size(0).build().validate().is_err());
        assert!(BulkConfig::builder().max_concurrency(0).build().validate().is_err());
    }

    #[test]
    fn test_clamp_to_pool() {
        let config = BulkConfig::builder().max_concurrency(16).build().clamp_to_pool(8);
        assert_eq!(config.max_concurrency, 7);

        let config = BulkConfig::builder().max_concurrency(3).build().clamp_to_pool(1);
        assert_eq!(config.max_concurrency, 1);

        let config = BulkConfig::builder().max_concurrency(2).build().clamp_to_pool(8);
        assert_eq!(config.max_concurrency, 2);
    }

    #[test]
    fn test_parse_partial_toml() {
        let config = AppConfig::from_toml_str(
            r#"
            [bulk]
            chunk_size = 200

            [storage]
            path = "/tmp/library.db"
            "#,
        )
        .unwrap();

        assert_eq!(config.bulk.chunk_size, 200);
        assert_eq!(config.bulk.max_concurrency, DEFAULT_MAX_CONCURRENCY);
        assert_eq!(config.storage.path, PathBuf::from("/tmp/library.db"));
        assert_eq!(config.storage.max_connections, DEFAULT_MAX_CONNECTIONS);
    }

    #[test]
    fn test_invalid_toml_values_rejected() {
        let result = AppConfig::from_toml_str(
            r#"
            [bulk]
            chunk_size = 0
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = AppConfig::from_toml_str("").unwrap();
        assert_eq!(config, AppConfig::default());
    }
}
