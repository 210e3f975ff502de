//! Retry policy for durable store writes.
//!
//! Transient persistence failures are retried a bounded number of times with
//! a fixed delay before being surfaced to the caller.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::repeat::serde_duration;

/// Retry policy applied to store writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteRetry {
    /// Maximum number of retry attempts, not including the initial attempt
    /// (0 = no retries).
    pub max_attempts: u32,

    /// Fixed delay between retry attempts.
    #[serde(with = "serde_duration")]
    pub delay: Duration,
}

impl WriteRetry {
    /// Create a policy with no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 0,
            delay: Duration::ZERO,
        }
    }

    /// Create a policy with fixed delay retries.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Check if we should retry given the number of retries already made.
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

impl Default for WriteRetry {
    /// Default policy: two retries, 200ms apart.
    fn default() -> Self {
        Self::fixed(2, Duration::from_millis(200))
    }
}
