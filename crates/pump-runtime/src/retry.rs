//! Bounded retry policy for transient lock-renewal failures.
//!
//! Renewal retries use a fixed number of attempts with an incrementing delay
//! rather than unbounded exponential backoff: a renewal that cannot succeed
//! within a couple of short attempts has usually lost the lock anyway, and
//! the renewer must report and stop rather than keep a dead timer alive.

use rand::Rng;
use std::time::Duration;

/// Retry policy with bounded attempts and incrementing delay
///
/// # Examples
///
/// ```rust
/// use pump_runtime::retry::RetryPolicy;
/// use std::time::Duration;
///
/// // Default policy: 3 attempts, 500ms initial, +500ms per attempt
/// let policy = RetryPolicy::default();
///
/// // Custom policy
/// let policy = RetryPolicy::new(2, Duration::from_millis(100), Duration::from_millis(200));
/// ```
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts after the initial call
    pub max_attempts: u32,

    /// Delay before the first retry
    pub initial_delay: Duration,

    /// Added to the delay on each subsequent retry
    pub delay_increment: Duration,

    /// Whether to add jitter to delays (recommended)
    pub use_jitter: bool,

    /// Jitter range as fraction of the delay (default 25% = ±25%)
    pub jitter_percent: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            delay_increment: Duration::from_millis(500),
            use_jitter: true,
            jitter_percent: 0.25,
        }
    }
}

impl RetryPolicy {
    /// Create a new retry policy
    ///
    /// # Arguments
    ///
    /// * `max_attempts` - Maximum retry attempts (0 disables retries)
    /// * `initial_delay` - Delay before the first retry
    /// * `delay_increment` - Added to the delay for each further retry
    pub fn new(max_attempts: u32, initial_delay: Duration, delay_increment: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            delay_increment,
            use_jitter: true,
            jitter_percent: 0.25,
        }
    }

    /// Policy that never retries
    pub fn disabled() -> Self {
        Self::new(0, Duration::ZERO, Duration::ZERO)
    }

    /// Disable jitter (useful for deterministic tests)
    pub fn without_jitter(mut self) -> Self {
        self.use_jitter = false;
        self
    }

    /// Check whether another retry is allowed for this attempt number
    ///
    /// # Arguments
    ///
    /// * `attempt` - Retry attempt number (0-based, where 0 is the first retry)
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Calculate the delay before a specific retry attempt
    ///
    /// Delay grows linearly: `initial_delay + delay_increment * attempt`,
    /// with jitter applied if enabled.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.initial_delay + self.delay_increment * attempt;

        if self.use_jitter {
            Self::add_jitter(base, self.jitter_percent)
        } else {
            base
        }
    }

    /// Apply random variation in range [delay * (1-jitter), delay * (1+jitter)]
    fn add_jitter(delay: Duration, jitter_percent: f64) -> Duration {
        let delay_secs = delay.as_secs_f64();
        if delay_secs == 0.0 {
            return Duration::ZERO;
        }

        let mut rng = rand::thread_rng();
        let jitter_range = delay_secs * jitter_percent;
        let jitter = rng.gen_range(-jitter_range..=jitter_range);

        Duration::from_secs_f64((delay_secs + jitter).max(0.0))
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
