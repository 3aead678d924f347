//! Doubling backoff shared by the offline queue and media reconnects.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Exponential backoff: `min(base * 2^attempt, max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct RetryPolicy {
    base_delay_ms: u64,
    max_delay_ms: u64,
}

impl RetryPolicy {
    pub const fn new(base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms,
        }
    }

    pub const fn base_delay_ms(&self) -> u64 {
        self.base_delay_ms
    }

    pub const fn max_delay_ms(&self) -> u64 {
        self.max_delay_ms
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.delay_ms_for_attempt(attempt))
    }

    pub fn delay_ms_for_attempt(&self, attempt: u32) -> u64 {
        let shift = attempt.min(20);
        let multiplier = 1_u64 << shift;
        self.base_delay_ms
            .saturating_mul(multiplier)
            .min(self.max_delay_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(1_000, 30_000)
    }
}
