//! Configuration loading.
//!
//! A [`CheckflowConfig`] comes from a JSON file, the environment, or both
//! (environment wins). Every field has a default, so an empty file is valid.

use crate::errors::CheckflowError;
use crate::pipeline::RetryConfig;
use crate::store::{ContextStore, FileContextStore, InMemoryContextStore};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// The context key the triggering input is recorded under by default.
pub const DEFAULT_INPUT_KEY: &str = "input";

const ENV_STORE_DIR: &str = "CHECKFLOW_STORE_DIR";
const ENV_LOG: &str = "CHECKFLOW_LOG";
const ENV_LOG_JSON: &str = "CHECKFLOW_LOG_JSON";
const ENV_STAGE_TIMEOUT_MS: &str = "CHECKFLOW_STAGE_TIMEOUT_MS";

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("Failed to read config file {}: {source}", path.display())]
    Read {
        /// The file path.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid JSON for this schema.
    #[error("Failed to parse config file {}: {source}", path.display())]
    Parse {
        /// The file path.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// A setting has an unusable value.
    #[error("Invalid value '{value}' for {key}: {reason}")]
    Invalid {
        /// The setting name.
        key: String,
        /// The rejected value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckflowConfig {
    /// Where run contexts are kept.
    pub store: StoreConfig,
    /// Executor defaults.
    pub executor: ExecutorConfig,
    /// Log output.
    pub logging: LoggingConfig,
}

/// Context store backend selection.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreConfig {
    /// Process-local store; state is lost on exit.
    #[default]
    Memory,
    /// One JSON document per run under `dir`.
    File {
        /// The directory to write into.
        dir: PathBuf,
    },
}

/// Defaults applied to every stage of an executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Context key for the triggering input.
    #[serde(default = "default_input_key")]
    pub input_key: String,
    /// Per-attempt stage time limit in milliseconds.
    #[serde(default)]
    pub stage_timeout_ms: Option<u64>,
    /// Retry policy for stages that do not set their own.
    #[serde(default = "RetryConfig::none")]
    pub retry: RetryConfig,
}

fn default_input_key() -> String {
    DEFAULT_INPUT_KEY.to_string()
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            input_key: default_input_key(),
            stage_timeout_ms: None,
            retry: RetryConfig::none(),
        }
    }
}

impl ExecutorConfig {
    /// Creates the default executor config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default stage timeout.
    #[must_use]
    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Sets the default retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// The default stage timeout.
    #[must_use]
    pub fn stage_timeout(&self) -> Option<Duration> {
        self.stage_timeout_ms.map(Duration::from_millis)
    }
}

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// An `EnvFilter` directive string.
    #[serde(default = "default_filter")]
    pub filter: String,
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

fn default_filter() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            json: false,
        }
    }
}

impl CheckflowConfig {
    /// Loads configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Builds configuration from defaults plus environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if an environment variable has an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_overrides(&collect_env())
    }

    /// Applies environment overrides on top of this configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a value cannot be parsed.
    pub fn with_env_overrides(
        mut self,
        envs: &HashMap<String, String>,
    ) -> Result<Self, ConfigError> {
        if let Some(dir) = env_value(envs, ENV_STORE_DIR) {
            self.store = StoreConfig::File {
                dir: PathBuf::from(dir),
            };
        }
        if let Some(filter) = env_value(envs, ENV_LOG) {
            self.logging.filter = filter.to_string();
        }
        if let Some(raw) = env_value(envs, ENV_LOG_JSON) {
            self.logging.json = parse_bool(ENV_LOG_JSON, raw)?;
        }
        if let Some(raw) = env_value(envs, ENV_STAGE_TIMEOUT_MS) {
            let ms = raw.parse::<u64>().map_err(|e| ConfigError::Invalid {
                key: ENV_STAGE_TIMEOUT_MS.to_string(),
                value: raw.to_string(),
                reason: e.to_string(),
            })?;
            self.executor.stage_timeout_ms = Some(ms);
        }
        Ok(self)
    }

    /// Creates the configured context store.
    ///
    /// # Errors
    ///
    /// Returns a store error if the file store directory cannot be created.
    pub fn build_store(&self) -> Result<Arc<dyn ContextStore>, CheckflowError> {
        Ok(match &self.store {
            StoreConfig::Memory => Arc::new(InMemoryContextStore::new()),
            StoreConfig::File { dir } => Arc::new(FileContextStore::open(dir)?),
        })
    }
}

fn collect_env() -> HashMap<String, String> {
    let mut envs = HashMap::new();
    for key in [ENV_STORE_DIR, ENV_LOG, ENV_LOG_JSON, ENV_STAGE_TIMEOUT_MS] {
        if let Ok(value) = std::env::var(key) {
            envs.insert(key.to_string(), value);
        }
    }
    envs
}

fn env_value<'a>(envs: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    envs.get(key).map(|v| v.trim()).filter(|v| !v.is_empty())
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key: key.to_string(),
            value: raw.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}
