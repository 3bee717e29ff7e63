//! Aggregator configuration.
//!
//! Loaded from a JSON file when one is given; every field has a default so a
//! partial file (or none at all) is fine. `TALLY_*` environment variables win
//! over file values.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::app::retry::ResubscribePolicy;

/// What the dispatch loop does with a session that ends without quorum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationFailurePolicy {
    /// Stop the loop and return the failure to the supervisor.
    #[default]
    Halt,
    /// Log the failure, leave the task unresolved, keep running.
    Skip,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Blocks after creation during which a task can still be responded to.
    /// Mirrors the constant hard-coded in the task manager contract.
    pub challenge_window_blocks: u32,

    /// Nominal block time used to turn the window into a wall-clock expiry.
    pub block_time_secs: u64,

    pub failure_policy: AggregationFailurePolicy,

    pub resubscribe: ResubscribePolicy,

    /// Capacity of each event channel feeding the dispatch loop.
    pub event_buffer: usize,

    /// Keep tasks and responses in the registry after a successful submission.
    pub retain_finalized: bool,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            challenge_window_blocks: 100,
            block_time_secs: 12,
            failure_policy: AggregationFailurePolicy::default(),
            resubscribe: ResubscribePolicy::default(),
            event_buffer: 1024,
            retain_finalized: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid value {value:?} for {key}")]
    InvalidEnv { key: &'static str, value: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

impl AggregatorConfig {
    /// Wall-clock approximation of the challenge window.
    ///
    /// Block height is not tracked; drift under variable block times is
    /// accepted.
    pub fn time_to_expiry(&self) -> Duration {
        self.checked_time_to_expiry().unwrap_or(Duration::MAX)
    }

    fn checked_time_to_expiry(&self) -> Option<Duration> {
        Duration::from_secs(self.block_time_secs).checked_mul(self.challenge_window_blocks)
    }

    /// Read a JSON file, apply environment overrides, validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_json(&std::fs::read_to_string(path)?)?,
            None => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(contents)?)
    }

    /// Apply `TALLY_*` overrides using `lookup` to read variables.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("TALLY_CHALLENGE_WINDOW_BLOCKS") {
            self.challenge_window_blocks = parse_env("TALLY_CHALLENGE_WINDOW_BLOCKS", v)?;
        }
        if let Some(v) = lookup("TALLY_BLOCK_TIME_SECS") {
            self.block_time_secs = parse_env("TALLY_BLOCK_TIME_SECS", v)?;
        }
        if let Some(v) = lookup("TALLY_EVENT_BUFFER") {
            self.event_buffer = parse_env("TALLY_EVENT_BUFFER", v)?;
        }
        if let Some(v) = lookup("TALLY_RETAIN_FINALIZED") {
            self.retain_finalized = parse_env("TALLY_RETAIN_FINALIZED", v)?;
        }
        if let Some(v) = lookup("TALLY_FAILURE_POLICY") {
            self.failure_policy = match v.as_str() {
                "halt" => AggregationFailurePolicy::Halt,
                "skip" => AggregationFailurePolicy::Skip,
                _ => {
                    return Err(ConfigError::InvalidEnv {
                        key: "TALLY_FAILURE_POLICY",
                        value: v,
                    });
                }
            };
        }
        if let Some(v) = lookup("TALLY_RESUBSCRIBE_MAX_ATTEMPTS") {
            self.resubscribe.max_attempts = parse_env("TALLY_RESUBSCRIBE_MAX_ATTEMPTS", v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.challenge_window_blocks == 0 {
            return Err(ConfigError::Invalid(
                "challenge_window_blocks must be positive".into(),
            ));
        }
        if self.block_time_secs == 0 {
            return Err(ConfigError::Invalid("block_time_secs must be positive".into()));
        }
        if self.checked_time_to_expiry().is_none() {
            return Err(ConfigError::Invalid(
                "challenge_window_blocks * block_time_secs overflows".into(),
            ));
        }
        if self.event_buffer == 0 {
            return Err(ConfigError::Invalid("event_buffer must be positive".into()));
        }
        if self.resubscribe.multiplier < 1.0 {
            return Err(ConfigError::Invalid(
                "resubscribe.multiplier must be at least 1.0".into(),
            ));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::InvalidEnv { key, value })
}
