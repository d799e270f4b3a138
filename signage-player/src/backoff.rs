//! Retry delay calculation with full jitter
//!
//! The exponential cap is `min(max, base * 2^attempt)` and the returned delay
//! is drawn uniformly from `[0, cap]`. Drawing from the whole range keeps a
//! fleet of players that lost the server at the same moment from retrying
//! in lockstep when it comes back.

use rand::Rng;
use std::time::Duration;

/// Exponential cap for `attempt`, saturating instead of overflowing.
pub fn backoff_cap(attempt: u32, base_delay_ms: u64, max_delay_ms: u64) -> u64 {
    let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    base_delay_ms.saturating_mul(factor).min(max_delay_ms)
}

/// Full-jitter delay in milliseconds, uniform in `[0, backoff_cap(..)]`.
pub fn calculate_backoff<R: Rng>(
    attempt: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    rng: &mut R,
) -> u64 {
    let cap = backoff_cap(attempt, base_delay_ms, max_delay_ms);
    rng.random_range(0..=cap)
}

/// Backoff parameters as configured for a loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl BackoffPolicy {
    pub fn new(base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms: max_delay_ms.max(base_delay_ms),
        }
    }

    /// Delay before retry number `attempt` (0-based) using the thread RNG.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with(attempt, &mut rand::rng())
    }

    pub fn delay_with<R: Rng>(&self, attempt: u32, rng: &mut R) -> Duration {
        Duration::from_millis(calculate_backoff(
            attempt,
            self.base_delay_ms,
            self.max_delay_ms,
            rng,
        ))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(1_000, 30_000)
    }
}
