//! # Run Engine Configuration
//!
//! Typed configuration for the run engine. Values are layered by
//! [`ConfigManager`]: compiled defaults, then `config/run-engine.yaml`, then
//! `config/run-engine.{environment}.yaml`, then `RUN_ENGINE__*` environment
//! variables.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use run_engine::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let lock_timeout = manager.config().run_lock.timeout();
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use crate::constants::{DEFAULT_QUEUED_DESCRIPTION, DEFAULT_RUN_LOCK_TIMEOUT_MS};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure mirroring `run-engine.yaml`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub run_lock: RunLockConfig,
    pub enqueue: EnqueueConfig,
    pub database: DatabaseConfig,
    pub queue: QueueConfig,
    pub logging: LoggingConfig,
}

/// Per-run lock acquisition settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunLockConfig {
    /// Upper bound on waiting for a run lock
    pub timeout_ms: u64,
    /// Poll interval for backends without a blocking acquire (advisory locks)
    pub retry_interval_ms: u64,
    /// Size of the advisory lock pool, kept apart from the store pool.
    /// Each held lock pins one connection.
    pub max_connections: u32,
}

impl Default for RunLockConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_RUN_LOCK_TIMEOUT_MS,
            retry_interval_ms: 25,
            max_connections: 10,
        }
    }
}

impl RunLockConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    /// Connection settings for the advisory lock pool.
    pub fn pool_config(&self, database: &DatabaseConfig) -> DatabaseConfig {
        DatabaseConfig {
            max_connections: self.max_connections,
            ..database.clone()
        }
    }
}

/// Bounds on the two I/O phases of an enqueue that run under the lock
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnqueueConfig {
    pub snapshot_write_timeout_ms: u64,
    pub publish_timeout_ms: u64,
    /// Description recorded when the caller does not supply one
    pub default_description: String,
}

impl Default for EnqueueConfig {
    fn default() -> Self {
        Self {
            snapshot_write_timeout_ms: 10_000,
            publish_timeout_ms: 10_000,
            default_description: DEFAULT_QUEUED_DESCRIPTION.to_string(),
        }
    }
}

impl EnqueueConfig {
    pub fn snapshot_write_timeout(&self) -> Duration {
        Duration::from_millis(self.snapshot_write_timeout_ms)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/run_engine_development".to_string(),
            max_connections: 10,
            acquire_timeout_seconds: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    #[default]
    Memory,
    Pgmq,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub backend: QueueBackend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive; derived from the environment name when absent
    pub level: Option<String>,
    pub format: LogFormat,
}

impl EngineConfig {
    /// Reject values that would make the engine misbehave rather than fail loudly.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.run_lock.timeout_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "run_lock.timeout_ms",
                "0",
                "lock timeout must be positive",
            ));
        }
        if self.run_lock.retry_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "run_lock.retry_interval_ms",
                "0",
                "retry interval must be positive",
            ));
        }
        if self.run_lock.max_connections == 0 {
            return Err(ConfigurationError::invalid_value(
                "run_lock.max_connections",
                "0",
                "lock pool needs at least one connection",
            ));
        }
        if self.enqueue.snapshot_write_timeout_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "enqueue.snapshot_write_timeout_ms",
                "0",
                "snapshot write timeout must be positive",
            ));
        }
        if self.enqueue.publish_timeout_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "enqueue.publish_timeout_ms",
                "0",
                "publish timeout must be positive",
            ));
        }
        if self.enqueue.default_description.trim().is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "default_description",
                "enqueue",
            ));
        }
        if self.queue.backend == QueueBackend::Pgmq && self.database.url.trim().is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "url",
                "database (required by the pgmq queue backend)",
            ));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigurationError::invalid_value(
                "database.max_connections",
                "0",
                "pool needs at least one connection",
            ));
        }
        Ok(())
    }
}
