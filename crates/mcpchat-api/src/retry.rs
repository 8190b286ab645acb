//! Retry policy for upstream model requests.

use mcpchat_types::ApiError;
use rand::Rng;
use std::time::Duration;

/// Exponential backoff with jitter for transient upstream failures.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 = no retries).
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay_ms: 1000,
            max_delay_ms: 60_000,
            backoff_factor: 2.0,
        }
    }
}

impl RetryConfig {
    /// A policy that never retries.
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-based).
    ///
    /// A server-provided `Retry-After` wins (capped at `max_delay_ms`);
    /// otherwise `initial_delay_ms * backoff_factor^attempt` with ±25% jitter.
    pub fn delay_for(&self, attempt: u32, retry_after_ms: Option<u64>) -> Duration {
        if let Some(server_delay) = retry_after_ms {
            return Duration::from_millis(server_delay.min(self.max_delay_ms));
        }

        let base = self.initial_delay_ms as f64 * self.backoff_factor.powi(attempt as i32);
        let clamped = base.min(self.max_delay_ms as f64);
        let jittered = clamped * rand::rng().random_range(0.75..=1.25);

        Duration::from_millis((jittered as u64).min(self.max_delay_ms))
    }
}

/// Whether a failed request may succeed if sent again.
pub fn is_retryable(error: &ApiError) -> bool {
    matches!(
        error,
        ApiError::RateLimited { .. }
            | ApiError::Overloaded
            | ApiError::Server { .. }
            | ApiError::Network(_)
            | ApiError::Timeout
    )
}
