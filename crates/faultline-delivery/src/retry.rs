//! Exponential backoff with jitter for failed batch deliveries.
//!
//! Each failed item gets a retry decision from its attempt count and the
//! error that caused the failure. No item is retried past `max_attempts`.

use std::time::{Duration, Instant};

use rand::Rng;

use crate::error::DeliveryError;

/// Retry policy for transient delivery failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of delivery attempts, including the first.
    pub max_attempts: u32,

    /// Delay after the first failed attempt.
    pub base_delay: Duration,

    /// Upper bound on any single delay.
    pub max_delay: Duration,

    /// Jitter fraction (0.0 to 1.0) applied in both directions.
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: crate::DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter_factor: 0.2, // ±20%
        }
    }
}

/// Failure context for a single delivery item.
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Attempts made so far (1-based).
    pub attempt_number: u32,
    /// Error that caused the failure.
    pub error: DeliveryError,
    /// When the failed attempt completed.
    pub failed_at: Instant,
    /// Policy to apply.
    pub policy: RetryPolicy,
}

/// Outcome of a retry decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Requeue the item for another attempt.
    Retry {
        /// When the item becomes eligible again
        next_attempt_at: Instant,
        /// Delay applied after `failed_at`
        delay: Duration,
    },
    /// Drop the item.
    GiveUp {
        /// Why the item will not be retried
        reason: String,
    },
}

impl RetryContext {
    /// Creates a retry context for a failed attempt.
    pub fn new(
        attempt_number: u32,
        error: DeliveryError,
        failed_at: Instant,
        policy: RetryPolicy,
    ) -> Self {
        Self { attempt_number, error, failed_at, policy }
    }

    /// Decides whether and when to retry.
    ///
    /// Gives up once `max_attempts` is reached or when the error is
    /// permanent. Honours the collector's `Retry-After` for rate limits.
    pub fn decide_retry(&self) -> RetryDecision {
        if self.attempt_number >= self.policy.max_attempts {
            return RetryDecision::GiveUp {
                reason: format!("maximum attempts ({}) exceeded", self.policy.max_attempts),
            };
        }

        if !self.error.is_retryable() {
            return RetryDecision::GiveUp {
                reason: format!("non-retryable error: {}", self.error),
            };
        }

        let delay = self.calculate_delay();
        RetryDecision::Retry { next_attempt_at: self.failed_at + delay, delay }
    }

    /// Calculates the delay before the next attempt.
    ///
    /// `base_delay * 2^(attempt - 1)`, capped at `max_delay`, then jittered
    /// and capped again.
    fn calculate_delay(&self) -> Duration {
        if let Some(retry_after_seconds) = self.error.retry_after_seconds() {
            return std::cmp::min(Duration::from_secs(retry_after_seconds), self.policy.max_delay);
        }

        let exponent = self.attempt_number.saturating_sub(1).min(20);
        let multiplier = 2_u32.saturating_pow(exponent);
        let base_delay = self.policy.base_delay.saturating_mul(multiplier);

        let capped_delay = std::cmp::min(base_delay, self.policy.max_delay);
        let jittered_delay = apply_jitter(capped_delay, self.policy.jitter_factor);

        std::cmp::min(jittered_delay, self.policy.max_delay)
    }
}

/// Randomizes a delay by ±`jitter_factor` to spread retries out.
fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 {
        return duration;
    }

    let clamped_jitter = jitter_factor.clamp(0.0, 1.0);

    let mut rng = rand::rng();
    let jitter_range = duration.as_secs_f64() * clamped_jitter;
    let jitter_offset = rng.random_range(-jitter_range..=jitter_range);
    let jittered_secs = duration.as_secs_f64() + jitter_offset;

    Duration::from_secs_f64(jittered_secs.max(0.0))
}
