use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Upper bound of the additive jitter, as a fraction of the base delay.
pub const JITTER_FRACTION: f64 = 0.3;

/// Exponential backoff with additive jitter.
///
/// `base = initial_delay * factor^(attempt - 1)`, plus up to 30% of `base`
/// drawn uniformly, clamped to `max_delay`. Jitter only ever lengthens a delay.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub factor: f64,
    /// Total number of tries, including the first one.
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_delay_ms: 10_000,
            factor: 2.0,
            max_attempts: 3,
        }
    }
}

impl BackoffPolicy {
    /// Un-jittered delay in milliseconds. Attempt `0` is treated as `1`.
    pub fn base_delay_ms(&self, attempt: u32) -> f64 {
        let exponent = attempt.max(1) - 1;
        let exponent = i32::try_from(exponent).unwrap_or(i32::MAX);
        self.initial_delay_ms as f64 * self.factor.powi(exponent)
    }

    /// Delay before retry number `attempt`, with fresh random jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let jitter = rand::thread_rng().gen_range(0.0..=JITTER_FRACTION);
        self.delay_with_jitter(attempt, jitter)
    }

    /// Deterministic core of [`delay`](Self::delay). `jitter` is clamped to
    /// `0.0..=JITTER_FRACTION`.
    pub fn delay_with_jitter(&self, attempt: u32, jitter: f64) -> Duration {
        let base = self.base_delay_ms(attempt);
        let jitter = if jitter.is_nan() {
            0.0
        } else {
            jitter.clamp(0.0, JITTER_FRACTION)
        };
        let max = self.max_delay_ms as f64;
        let millis = (base * (1.0 + jitter)).ceil();
        let millis = if millis.is_finite() { millis.min(max) } else { max };
        Duration::from_millis(millis.max(0.0) as u64)
    }
}
