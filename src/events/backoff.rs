//! Exponential reconnect backoff.

use std::time::Duration;

/// Doubling delay, capped at `max`, reset on success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    /// Backoff starting at `initial` and never exceeding `max`.
    #[must_use]
    pub fn new(initial: Duration, max: Duration) -> Self {
        let max = max.max(initial);
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay to wait before the next attempt; doubles the following one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    /// Back to the initial delay after a successful attempt.
    pub fn reset(&mut self) {
        self.current = self.initial;
    }

    /// Delay the next call to [`next_delay`](Self::next_delay) returns.
    #[must_use]
    pub fn peek(&self) -> Duration {
        self.current
    }
}
