//! Coordinator configuration

use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::retry::RetryConfig;

/// Default capacity of the lifecycle event channel
const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// What to do when a strategy asks for an existing feed with another delivery mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModeConflictPolicy {
    /// Keep the mode chosen at creation, warn, and let the request through
    #[default]
    FirstWriterWins,
    /// Refuse the request
    Reject,
}

impl fmt::Display for ModeConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModeConflictPolicy::FirstWriterWins => f.write_str("first_writer_wins"),
            ModeConflictPolicy::Reject => f.write_str("reject"),
        }
    }
}

impl FromStr for ModeConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "first_writer_wins" | "first" | "warn" => Ok(ModeConflictPolicy::FirstWriterWins),
            "reject" | "error" => Ok(ModeConflictPolicy::Reject),
            _ => Err(format!("Unknown mode conflict policy: {}", s)),
        }
    }
}

/// Configuration for the SubscriptionCoordinator
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub mode_conflict_policy: ModeConflictPolicy,
    /// Retry schedule for failed unbind calls
    pub retry: RetryConfig,
    /// Buffer size of the lifecycle event broadcast channel
    pub event_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            mode_conflict_policy: ModeConflictPolicy::default(),
            retry: RetryConfig::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl CoordinatorConfig {
    /// Load configuration from environment variables
    ///
    /// Reads (all optional):
    /// - FEEDHUB_MODE_CONFLICT_POLICY: `first_writer_wins` or `reject`
    /// - FEEDHUB_UNBIND_MAX_RETRIES: automatic unbind retries, 0 disables
    /// - FEEDHUB_UNBIND_RETRY_BASE_MS: first retry delay
    /// - FEEDHUB_UNBIND_RETRY_MAX_MS: cap on a single retry delay
    /// - FEEDHUB_EVENT_CAPACITY: lifecycle event buffer size
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Same as [`CoordinatorConfig::from_env`] with a custom variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(policy) =
            parse_var::<ModeConflictPolicy, _>(&lookup, "FEEDHUB_MODE_CONFLICT_POLICY")?
        {
            config.mode_conflict_policy = policy;
        }
        if let Some(retries) = parse_var::<u32, _>(&lookup, "FEEDHUB_UNBIND_MAX_RETRIES")? {
            config.retry.max_retries = retries;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "FEEDHUB_UNBIND_RETRY_BASE_MS")? {
            config.retry.base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "FEEDHUB_UNBIND_RETRY_MAX_MS")? {
            config.retry.max_delay = Duration::from_millis(ms);
        }
        if let Some(capacity) = parse_var::<usize, _>(&lookup, "FEEDHUB_EVENT_CAPACITY")? {
            if capacity == 0 {
                return Err(ConfigError::InvalidValue {
                    var: "FEEDHUB_EVENT_CAPACITY".to_string(),
                    value: capacity.to_string(),
                    reason: "must be greater than zero".to_string(),
                });
            }
            config.event_capacity = capacity;
        }

        Ok(config)
    }
}

fn parse_var<T, F>(lookup: &F, var: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(var) else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse()
        .map(Some)
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            var: var.to_string(),
            value: raw.clone(),
            reason: e.to_string(),
        })
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value '{value}' for {var}: {reason}")]
    InvalidValue {
        var: String,
        value: String,
        reason: String,
    },
}
