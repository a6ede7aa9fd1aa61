//! Process configuration: TOML file, then environment overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use stratus_cluster::{ManagerConfig, RetryPolicy};
use stratus_reconciler::ControllerConfig;
use thiserror::Error;

pub const ENV_WORKERS: &str = "STRATUS_WORKERS";
pub const ENV_POLL_INTERVAL_SECS: &str = "STRATUS_POLL_INTERVAL_SECS";
pub const ENV_LOG: &str = "STRATUS_LOG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid value '{value}' for {var}")]
    InvalidEnv { var: &'static str, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to render configuration: {0}")]
    Render(#[from] toml::ser::Error),
}

/// Effective configuration of a Stratus process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StratusConfig {
    /// Concurrent workers per controller
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Requeue delay while waiting on dependencies or the remote system
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Refresh period of imported resources
    #[serde(default = "default_resync_period_secs")]
    pub resync_period_secs: u64,
    /// Deadline of every remote call
    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,
    #[serde(default)]
    pub backoff: RetryPolicy,
    /// Fallback filter when `RUST_LOG` is unset
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_workers() -> usize {
    2
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_resync_period_secs() -> u64 {
    600
}

fn default_operation_timeout_secs() -> u64 {
    30
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for StratusConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            poll_interval_secs: default_poll_interval_secs(),
            resync_period_secs: default_resync_period_secs(),
            operation_timeout_secs: default_operation_timeout_secs(),
            backoff: RetryPolicy::default(),
            log_filter: default_log_filter(),
        }
    }
}

impl StratusConfig {
    /// Defaults, overlaid by `path` if given, overlaid by the process
    /// environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config
            .with_env_overrides(|var| std::env::var(var).ok())?
            .validated()
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `STRATUS_*` overrides read through `lookup`.
    pub fn with_env_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(value) = lookup(ENV_WORKERS) {
            self.workers = parse_env(ENV_WORKERS, value)?;
        }
        if let Some(value) = lookup(ENV_POLL_INTERVAL_SECS) {
            self.poll_interval_secs = parse_env(ENV_POLL_INTERVAL_SECS, value)?;
        }
        if let Some(value) = lookup(ENV_LOG) {
            self.log_filter = value;
        }
        Ok(self)
    }

    pub fn validated(self) -> Result<Self, ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".to_string()));
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.backoff.base_ms > self.backoff.max_ms {
            return Err(ConfigError::Invalid(format!(
                "backoff.base_ms ({}) exceeds backoff.max_ms ({})",
                self.backoff.base_ms, self.backoff.max_ms
            )));
        }
        Ok(self)
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            resync_period: Duration::from_secs(self.resync_period_secs),
            operation_timeout: Duration::from_secs(self.operation_timeout_secs),
        }
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            workers: self.workers,
            retry: self.backoff.clone(),
        }
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

fn parse_env<T: std::str::FromStr>(var: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnv { var, value })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |var| vars.get(var).cloned()
    }

    #[test]
    fn test_empty_document_gives_defaults() {
        let parsed: Result<StratusConfig, _> = toml::from_str("");
        assert!(parsed.is_ok_and(|c| c == StratusConfig::default()));
    }

    #[test]
    fn test_partial_document_keeps_other_defaults() {
        let parsed: Result<StratusConfig, _> = toml::from_str(
            "workers = 4\n\n[backoff]\nmax_ms = 5000\n",
        );
        assert!(parsed.is_ok());
        let config = parsed.unwrap_or_default();
        assert_eq!(config.workers, 4);
        assert_eq!(config.backoff.max_ms, 5000);
        assert_eq!(config.backoff.base_ms, RetryPolicy::default().base_ms);
        assert_eq!(config.poll_interval_secs, 10);
    }

    #[test]
    fn test_env_overrides_file_values() {
        let config = StratusConfig::default().with_env_overrides(env(&[
            (ENV_WORKERS, "8"),
            (ENV_POLL_INTERVAL_SECS, " 3 "),
            (ENV_LOG, "stratus=debug"),
        ]));
        assert!(config.as_ref().is_ok_and(|c| c.workers == 8
            && c.poll_interval_secs == 3
            && c.log_filter == "stratus=debug"));
    }

    #[test]
    fn test_unparsable_env_value_is_rejected() {
        let config = StratusConfig::default().with_env_overrides(env(&[(ENV_WORKERS, "many")]));
        assert!(matches!(
            config,
            Err(ConfigError::InvalidEnv { var: ENV_WORKERS, .. })
        ));
    }

    #[test]
    fn test_validation_rejects_zero_workers_and_inverted_backoff() {
        let zero = StratusConfig {
            workers: 0,
            ..StratusConfig::default()
        };
        assert!(matches!(zero.validated(), Err(ConfigError::Invalid(_))));

        let inverted = StratusConfig {
            backoff: RetryPolicy::new(10_000, 100),
            ..StratusConfig::default()
        };
        assert!(matches!(inverted.validated(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_conversions_carry_timings() {
        let config = StratusConfig {
            workers: 3,
            poll_interval_secs: 2,
            ..StratusConfig::default()
        };
        assert_eq!(config.controller_config().poll_interval, Duration::from_secs(2));
        assert_eq!(config.manager_config().workers, 3);
        assert_eq!(config.manager_config().retry, config.backoff);
    }

    #[test]
    fn test_rendered_toml_parses_back() {
        let config = StratusConfig::default();
        let rendered = config.to_toml();
        assert!(rendered.is_ok());
        let parsed: Result<StratusConfig, _> = toml::from_str(&rendered.unwrap_or_default());
        assert!(parsed.is_ok_and(|c| c == config));
    }
}
