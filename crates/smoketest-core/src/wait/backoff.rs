//! Exponential backoff with optional jitter
//!
//! The nominal delay for attempt `n` is `min * factor^n`, capped at `max`.
//! With jitter enabled the actual delay is drawn uniformly from
//! `[min, nominal]`, so concurrent waiters spread out instead of polling in
//! lockstep. A schedule only moves forward; create a new one to start over.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use tracing::debug;

use crate::error::WaitError;

/// Backoff schedule configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffConfig {
    /// Shortest delay between polls
    pub min: Duration,
    /// Longest delay between polls
    pub max: Duration,
    /// Growth factor per attempt
    pub factor: f64,
    /// Randomize each delay within `[min, nominal]`
    pub jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            min: Duration::from_secs(1),
            max: Duration::from_secs(5),
            factor: 2.0,
            jitter: true,
        }
    }
}

impl BackoffConfig {
    /// Fixed bounds, default factor and jitter
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max,
            ..Default::default()
        }
    }

    /// Disable jitter
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Reject configurations that cannot produce a sane schedule
    pub fn validate(&self) -> Result<(), WaitError> {
        if self.min.is_zero() {
            return Err(WaitError::invalid_option("poll minimum must be greater than zero"));
        }
        if self.max < self.min {
            return Err(WaitError::invalid_option(format!(
                "poll maximum {:?} is below poll minimum {:?}",
                self.max, self.min
            )));
        }
        if !self.factor.is_finite() || self.factor < 1.0 {
            return Err(WaitError::invalid_option(format!(
                "backoff factor must be a finite number >= 1, got {}",
                self.factor
            )));
        }
        Ok(())
    }
}

/// Stateful backoff schedule
#[derive(Debug)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
    rng: StdRng,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            attempt: 0,
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic schedule, for tests
    pub fn with_seed(config: BackoffConfig, seed: u64) -> Self {
        Self {
            config,
            attempt: 0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Delay before the next poll; advances the schedule
    pub fn next_delay(&mut self) -> Duration {
        let nominal = self.nominal(self.attempt);
        self.attempt = self.attempt.saturating_add(1);

        let delay = if self.config.jitter && nominal > self.config.min {
            let min = self.config.min.as_secs_f64();
            let upper = nominal.as_secs_f64();
            Duration::from_secs_f64(self.rng.gen_range(min..=upper))
        } else {
            nominal
        };

        debug!(attempt = self.attempt, delay_ms = delay.as_millis() as u64, "backoff delay");
        delay
    }

    fn nominal(&self, attempt: u32) -> Duration {
        let min = self.config.min.as_secs_f64();
        let max = self.config.max.as_secs_f64();
        // Cap the exponent so powi never overflows to infinity
        let exp = attempt.min(64) as i32;
        let secs = (min * self.config.factor.powi(exp)).min(max);
        Duration::from_secs_f64(secs)
    }
}
