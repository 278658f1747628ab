use std::{
    ops::RangeInclusive,
    sync::atomic::{AtomicU32, Ordering},
    time::Duration,
};

use rand::Rng;

use crate::config::RateLimitConfig;

/// Multiplicative jitter applied to every delay so that callers which failed
/// together do not retry together.
pub const JITTER_RANGE: RangeInclusive<f64> = 0.85..=1.15;

/// Exponential backoff keyed on the current failure streak.
///
/// `delay = min(max, base * 2^failures) * class_multiplier * jitter`
#[derive(Debug)]
pub struct BackoffCalculator {
    base: Duration,
    max: Duration,
    consecutive_failures: AtomicU32,
}

impl BackoffCalculator {
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            consecutive_failures: AtomicU32::new(0),
        }
    }

    #[must_use]
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(
            Duration::from_millis(config.base_backoff_ms),
            Duration::from_millis(config.max_backoff_ms),
        )
    }

    /// Delay for a given streak and error-class multiplier, with random jitter.
    #[must_use]
    pub fn next_delay(&self, consecutive_failures: u32, multiplier: f64) -> Duration {
        let jitter = rand::rng().random_range(JITTER_RANGE);
        self.delay_with_jitter(consecutive_failures, multiplier, jitter)
    }

    /// Deterministic form of [`next_delay`](Self::next_delay).
    #[must_use]
    pub fn delay_with_jitter(
        &self,
        consecutive_failures: u32,
        multiplier: f64,
        jitter: f64,
    ) -> Duration {
        let base_ms = self.base.as_secs_f64() * 1_000.0;
        let max_ms = self.max.as_secs_f64() * 1_000.0;
        // 2^63 already dwarfs any sane max; clamp so powi stays finite.
        let exponent = consecutive_failures.min(63) as i32;
        let capped_ms = (base_ms * 2f64.powi(exponent)).min(max_ms);
        let delay_ms = capped_ms * multiplier.max(0.0) * jitter.max(0.0);
        Duration::try_from_secs_f64(delay_ms / 1_000.0).unwrap_or(self.max)
    }

    /// Delay for the current streak.
    #[must_use]
    pub fn current_delay(&self, multiplier: f64) -> Duration {
        self.next_delay(self.consecutive_failures(), multiplier)
    }

    /// Extend the failure streak, returning its new length.
    pub fn record_failure(&self) -> u32 {
        self.consecutive_failures
            .fetch_add(1, Ordering::SeqCst)
            .saturating_add(1)
    }

    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
    }

    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }
}
