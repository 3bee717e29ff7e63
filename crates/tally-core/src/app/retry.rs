//! Re-subscription policy: decides backoff delays and when to give up.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Backoff for re-subscribing after an event stream drops.
///
/// The first attempt is immediate; attempt n >= 2 waits
/// base_delay * multiplier^(n - 2), capped at `max_delay`.
/// After `max_attempts` consecutive failures the dispatch loop gives up and
/// reports the stream as unrecoverable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResubscribePolicy {
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
}

impl Default for ResubscribePolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 500,
            multiplier: 2.0,
            max_delay_ms: 30_000,
            max_attempts: 5,
        }
    }
}

impl ResubscribePolicy {
    /// Policy that retries immediately; handy in tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            base_delay_ms: 0,
            multiplier: 1.0,
            max_delay_ms: 0,
            max_attempts,
        }
    }

    /// Delay before re-subscription attempt number `attempt` (1-indexed).
    ///
    /// The first attempt goes out immediately: a single dropped websocket
    /// should not stall event flow.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let base_ms = self.base_delay_ms as f64;
        let delay_ms = base_ms * self.multiplier.powi(attempt.saturating_sub(2) as i32);
        Duration::from_millis(delay_ms.min(self.max_delay_ms as f64) as u64)
    }
}
