//! Reconnection Backoff Policy
//!
//! Exponential backoff with jitter for provider stream reconnection. The
//! retry count lives in the adapter's [`ConnectionTracker`]; the policy here
//! is a pure delay computation, so backoff state can never drift from the
//! connection state machine.
//!
//! [`ConnectionTracker`]: crate::domain::connection::ConnectionTracker

use std::time::Duration;

use rand::Rng;

/// Configuration for reconnection delays.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first reconnection attempt.
    pub base_delay: Duration,
    /// Ceiling for the computed delay.
    pub max_delay: Duration,
    /// Jitter as a fraction of the computed delay (0.1 = ±10%).
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.1,
        }
    }
}

/// Pure backoff delay computation.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    config: BackoffConfig,
}

impl BackoffPolicy {
    /// Create a policy.
    #[must_use]
    pub const fn new(config: BackoffConfig) -> Self {
        Self { config }
    }

    /// Delay before the next attempt, given how many consecutive failures
    /// preceded it: `min(base * 2^failures, max)` with jitter applied.
    ///
    /// `failures == 0` yields the base delay, so the counter resetting on a
    /// successful connection also resets the delay.
    #[must_use]
    pub fn delay_for(&self, failures: u32) -> Duration {
        self.apply_jitter(self.raw_delay(failures))
    }

    /// Delay without jitter, for tests and logging.
    #[must_use]
    pub fn raw_delay(&self, failures: u32) -> Duration {
        let base_millis = self.config.base_delay.as_millis();
        let max_millis = self.config.max_delay.as_millis();

        let scaled = base_millis.saturating_mul(1_u128.checked_shl(failures).unwrap_or(u128::MAX));
        let capped = scaled.min(max_millis);
        Duration::from_millis(u64::try_from(capped).unwrap_or(u64::MAX))
    }

    fn apply_jitter(&self, delay: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return delay;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = delay.as_millis() as f64;
        let jitter_range = base_millis * self.config.jitter_factor;
        let mut rng = rand::rng();
        let jitter: f64 = rng.random_range(-jitter_range..=jitter_range);
        let adjusted = (base_millis + jitter).max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Duration::from_millis(adjusted as u64)
    }
}
