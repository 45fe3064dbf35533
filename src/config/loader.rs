//! Configuration Loader
//!
//! Environment-aware loading built on the `config` crate. Later sources
//! override earlier ones:
//!
//! 1. `EngineConfig::default()`
//! 2. `{config_dir}/run-engine.yaml` (optional)
//! 3. `{config_dir}/run-engine.{environment}.yaml` (optional)
//! 4. `RUN_ENGINE__SECTION__FIELD` environment variables

use super::error::{ConfigResult, ConfigurationError};
use super::EngineConfig;
use config::{Config, Environment, File};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const ENV_PREFIX: &str = "RUN_ENGINE";
const BASE_FILE_STEM: &str = "run-engine";

pub struct ConfigManager {
    config: EngineConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment, None)
    }

    /// Load configuration from a specific directory with an explicit environment.
    ///
    /// `env_overrides` replaces the process environment as the source of
    /// `RUN_ENGINE__*` variables, which keeps tests away from global state.
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
        env_overrides: Option<config::Map<String, String>>,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(Self::default_config_directory);

        debug!(
            environment = %environment,
            config_directory = %config_directory.display(),
            "Loading run engine configuration"
        );

        let config = Self::build(&config_directory, environment, env_overrides)?;
        config.validate()?;

        info!(
            environment = %environment,
            lock_timeout_ms = config.run_lock.timeout_ms,
            queue_backend = ?config.queue.backend,
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    fn build(
        config_directory: &Path,
        environment: &str,
        env_overrides: Option<config::Map<String, String>>,
    ) -> ConfigResult<EngineConfig> {
        let defaults = Config::try_from(&EngineConfig::default())
            .map_err(|e| ConfigurationError::load_failed(environment, e))?;

        let base_file = config_directory.join(format!("{BASE_FILE_STEM}.yaml"));
        let env_file = config_directory.join(format!("{BASE_FILE_STEM}.{environment}.yaml"));

        Config::builder()
            .add_source(defaults)
            .add_source(File::from(base_file).required(false))
            .add_source(File::from(env_file).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .source(env_overrides),
            )
            .build()
            .and_then(|built| built.try_deserialize::<EngineConfig>())
            .map_err(|e| ConfigurationError::load_failed(environment, e))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// Current environment name from `RUN_ENGINE_ENV`, then `APP_ENV`.
    pub fn detect_environment() -> String {
        env::var("RUN_ENGINE_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
    }

    fn default_config_directory() -> PathBuf {
        env::var("RUN_ENGINE_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config"))
    }
}
