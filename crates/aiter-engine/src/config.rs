//! Scheduler configuration
//!
//! Loaded from TOML by the CLI, or from `AITER_*` environment variables.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Environment variable overriding [`SchedulerConfig::name`]
pub const ENV_NAME: &str = "AITER_NAME";
/// Environment variable overriding [`SchedulerConfig::max_tasks`]
pub const ENV_MAX_TASKS: &str = "AITER_MAX_TASKS";
/// Environment variable overriding [`SchedulerConfig::slow_poll_ms`]
pub const ENV_SLOW_POLL_MS: &str = "AITER_SLOW_POLL_MS";

/// Default slow-poll warning threshold in milliseconds
pub const DEFAULT_SLOW_POLL_MS: u64 = 100;

/// Scheduler settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Loop name used in log lines
    pub name: String,

    /// Maximum number of live (non-terminal) tasks; None = unlimited
    pub max_tasks: Option<usize>,

    /// Warn when a single poll holds the loop longer than this; None = never
    pub slow_poll_ms: Option<u64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            name: "aiter".to_string(),
            max_tasks: None,
            slow_poll_ms: Some(DEFAULT_SLOW_POLL_MS),
        }
    }
}

impl SchedulerConfig {
    /// Defaults overridden by any `AITER_*` variables set in the environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reading through `lookup`
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(name) = lookup(ENV_NAME) {
            if name.trim().is_empty() {
                return Err(Error::Config(format!("{} must not be empty", ENV_NAME)));
            }
            config.name = name;
        }

        if let Some(raw) = lookup(ENV_MAX_TASKS) {
            let limit = raw.trim().parse::<usize>().map_err(|_| {
                Error::Config(format!("{} must be a positive integer, got {:?}", ENV_MAX_TASKS, raw))
            })?;
            if limit == 0 {
                return Err(Error::Config(format!("{} must be at least 1", ENV_MAX_TASKS)));
            }
            config.max_tasks = Some(limit);
        }

        if let Some(raw) = lookup(ENV_SLOW_POLL_MS) {
            config.slow_poll_ms = match raw.trim() {
                "0" | "off" => None,
                value => Some(value.parse::<u64>().map_err(|_| {
                    Error::Config(format!(
                        "{} must be milliseconds or \"off\", got {:?}",
                        ENV_SLOW_POLL_MS, raw
                    ))
                })?),
            };
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the loop cannot honour
    pub fn validate(&self) -> Result<()> {
        if self.max_tasks == Some(0) {
            return Err(Error::Config("max_tasks must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Slow-poll threshold as a duration
    pub fn slow_poll_threshold(&self) -> Option<Duration> {
        self.slow_poll_ms.filter(|ms| *ms > 0).map(Duration::from_millis)
    }
}
