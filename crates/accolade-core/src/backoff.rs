//! Exponential reconnect backoff.
//!
//! - [`delay_for_attempt`]: pure `min(floor * 2^attempt, ceiling)` math
//! - [`Backoff`]: stateful counter of consecutive failures

use std::time::Duration;

/// Default first reconnect delay in milliseconds.
pub const DEFAULT_FLOOR_MS: u64 = 1000;
/// Default maximum reconnect delay in milliseconds.
pub const DEFAULT_CEILING_MS: u64 = 30_000;

/// Delay before reconnect attempt number `attempt` (zero-based).
///
/// Saturates instead of overflowing for large attempt counts.
#[must_use]
pub fn delay_for_attempt(attempt: u32, floor: Duration, ceiling: Duration) -> Duration {
    let floor_ms = u64::try_from(floor.as_millis()).unwrap_or(u64::MAX);
    let ceiling_ms = u64::try_from(ceiling.as_millis()).unwrap_or(u64::MAX);
    let exponential = floor_ms.saturating_mul(1u64 << attempt.min(63));
    Duration::from_millis(exponential.min(ceiling_ms))
}

/// Doubling backoff between a floor and a ceiling.
#[derive(Clone, Debug)]
pub struct Backoff {
    floor: Duration,
    ceiling: Duration,
    failures: u32,
}

impl Backoff {
    /// Create a backoff. A floor above the ceiling is clamped down to it.
    pub fn new(floor: Duration, ceiling: Duration) -> Self {
        Self {
            floor: floor.min(ceiling),
            ceiling,
            failures: 0,
        }
    }

    /// Delay to wait before the next attempt; counts one more failure.
    pub fn next_delay(&mut self) -> Duration {
        let delay = delay_for_attempt(self.failures, self.floor, self.ceiling);
        self.failures = self.failures.saturating_add(1);
        delay
    }

    /// Delay the next call to [`next_delay`](Self::next_delay) would return.
    pub fn peek(&self) -> Duration {
        delay_for_attempt(self.failures, self.floor, self.ceiling)
    }

    /// Forget previous failures after a successful connection.
    pub fn reset(&mut self) {
        self.failures = 0;
    }

    /// Consecutive failures since the last reset.
    pub fn failures(&self) -> u32 {
        self.failures
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(DEFAULT_FLOOR_MS),
            Duration::from_millis(DEFAULT_CEILING_MS),
        )
    }
}
