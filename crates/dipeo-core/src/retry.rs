//! Retry/backoff policy for transient I/O (spec §4.11).
//!
//! `ExternalServiceError` and `TimeoutError` are retried with exponential
//! backoff; other error kinds are not retried (see
//! [`crate::error::EngineError::is_retryable`]).

use rand::Rng;
use std::time::Duration;

/// Exponential backoff policy. Defaults match spec §4.11: 3 attempts, base
/// 1s, factor 2, jitter enabled.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub factor: f64,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::from_secs(1),
            factor: 2.0,
            max_delay: Duration::from_secs(60),
            jitter: true,
        }
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_factor(mut self, factor: f64) -> Self {
        self.factor = factor;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before the given 0-indexed attempt is retried.
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let base_secs = self.base_delay.as_secs_f64() * self.factor.powi(attempt as i32);
        let capped = base_secs.min(self.max_delay.as_secs_f64());
        let final_secs = if self.jitter {
            let jitter_factor = rand::thread_rng().gen_range(0.5..=1.5);
            capped * jitter_factor
        } else {
            capped
        };
        Duration::from_secs_f64(final_secs.max(0.0))
    }

    /// Whether attempt number `attempt` (1-indexed, the attempt just made)
    /// should be followed by another try.
    pub fn should_retry(&self, attempt: usize) -> bool {
        attempt < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Tracks retry progress for a single node activation; surfaced in
/// user-visible failures as `attempt count` (spec §7).
#[derive(Debug, Clone, Default)]
pub struct RetryState {
    pub attempts: usize,
    pub last_error: Option<String>,
}

impl RetryState {
    pub fn record_attempt(&mut self, error: Option<String>) {
        self.attempts += 1;
        self.last_error = error;
    }
}
