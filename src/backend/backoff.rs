//! Exponential reconnect backoff.

use std::time::Duration;

/// Backoff timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Largest exponent applied to `base_delay`
    pub exponent_cap: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            exponent_cap: 5,
        }
    }
}

impl BackoffConfig {
    /// Delay to wait after a failure preceded by `prior_failures` consecutive ones.
    pub fn delay_for(&self, prior_failures: u32) -> Duration {
        // 2^31 already saturates any sane base delay.
        let exponent = prior_failures.min(self.exponent_cap).min(31);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

/// Consecutive-failure counter.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    failures: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            failures: 0,
        }
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Delay the next failure would wait, without counting anything.
    pub fn current_delay(&self) -> Duration {
        self.config.delay_for(self.failures)
    }

    /// Count a failed attempt and return how long to wait before the next one.
    pub fn record_failure(&mut self) -> Duration {
        let delay = self.current_delay();
        self.failures = self.failures.saturating_add(1);
        delay
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }
}
