//! Worker configuration.
//!
//! Loaded from TOML. Every field has a default, so an empty file (or no file
//! at all) yields a working configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::domain::{RetryPolicy, TASK_ROUTING_KEY};

/// Names the config file to load.
pub const CONFIG_ENV: &str = "IK_CONFIG";
/// Overrides `approval_flow` (`true` / `false`).
pub const APPROVAL_FLOW_ENV: &str = "IK_APPROVAL_FLOW";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {name}: {value}")]
    InvalidEnv { name: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkerConfig {
    pub routing_key: String,
    /// Route new and destroyed entities through APPROVAL_PENDING.
    pub approval_flow: bool,
    pub retry: RetryConfig,
    pub scheduler: SchedulerConfig,
    pub logging: LoggingConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            routing_key: TASK_ROUTING_KEY.to_string(),
            approval_flow: false,
            retry: RetryConfig::default(),
            scheduler: SchedulerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    pub max_retries: u32,
    #[serde(with = "humantime_serde")]
    pub delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_retries: policy.max_retries,
            delay: policy.delay,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            delay: self.delay,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    /// How often stored jobs are reloaded.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10 * 60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl WorkerConfig {
    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&raw)
    }

    /// Reads `IK_CONFIG` / `IK_APPROVAL_FLOW` from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = match lookup(CONFIG_ENV) {
            Some(path) if !path.is_empty() => Self::load(path)?,
            _ => Self::default(),
        };

        if let Some(value) = lookup(APPROVAL_FLOW_ENV) {
            config.approval_flow = match value.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => true,
                "false" | "0" | "no" => false,
                _ => {
                    return Err(ConfigError::InvalidEnv {
                        name: APPROVAL_FLOW_ENV,
                        value,
                    });
                }
            };
        }

        Ok(config)
    }
}
