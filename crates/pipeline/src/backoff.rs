//! Exponential backoff for the poll loop.
//!
//! After a failed poll the orchestrator waits [`next_delay`] of the
//! previous delay before retrying; a successful poll resets the delay to
//! the base interval.

use std::time::Duration;

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay used while polls succeed.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
}

impl BackoffConfig {
    pub fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay: max_delay.max(initial_delay),
            multiplier: 2.0,
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(60))
    }
}

/// Calculate the next backoff delay from the current delay and config.
///
/// The result is clamped to [`BackoffConfig::max_delay`].
pub fn next_delay(current: Duration, config: &BackoffConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}
