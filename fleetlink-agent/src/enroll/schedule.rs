//! Retry backoff schedule.
//!
//! The wait doubles on every failed cycle, clamped to a maximum, and the
//! pause before the next attempt is shortened by however long the failed
//! cycle itself took. The whole loop is bounded by a deadline computed
//! once at start; nothing here ever extends it.

use std::time::Duration;

use tokio::time::Instant;

/// Backoff state for the enrollment retry loop.
#[derive(Debug, Clone)]
pub struct RetrySchedule {
    wait: Duration,
    wait_max: Duration,
    deadline: Instant,
}

impl RetrySchedule {
    /// Schedule starting at `wait_min`, clamped to `wait_max`, expiring
    /// `budget` after `started_at`.
    pub fn new(wait_min: Duration, wait_max: Duration, budget: Duration, started_at: Instant) -> Self {
        Self {
            wait: wait_min,
            wait_max,
            deadline: started_at + budget,
        }
    }

    /// Current listen timeout (also the base of the next pause).
    pub fn wait(&self) -> Duration {
        self.wait
    }

    /// True once the deadline has passed.
    pub fn expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }

    /// Time left until the deadline.
    pub fn remaining(&self, now: Instant) -> Duration {
        self.deadline.saturating_duration_since(now)
    }

    /// Pause before the next attempt, after a failed cycle that itself
    /// consumed `elapsed`. Clamped to zero and to the remaining budget.
    pub fn pause_after(&self, elapsed: Duration, now: Instant) -> Duration {
        self.wait
            .saturating_sub(elapsed)
            .min(self.remaining(now))
    }

    /// Double the wait for the next cycle, clamped to the maximum.
    pub fn advance(&mut self) {
        self.wait = (self.wait * 2).min(self.wait_max);
    }
}
