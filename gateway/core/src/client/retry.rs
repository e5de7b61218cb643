//! Retry policy with exponential backoff
//!
//! `delay(n) = min(base * 2^n, max)`, optionally with up to 25% jitter.

use std::time::Duration;

use rand::Rng;

use crate::config::ModelConfig;

/// How a Client repeats transient failures
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Initial backoff delay
    pub initial_backoff_ms: u64,
    /// Maximum backoff delay
    pub max_backoff_ms: u64,
    /// Add jitter to backoff
    pub use_jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
            use_jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Policy described by a model's settings
    pub fn from_model_config(config: &ModelConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff_ms: config.backoff_base_ms,
            max_backoff_ms: config.max_backoff_ms,
            use_jitter: config.jitter,
            ..Self::default()
        }
    }

    /// Total attempts, including the first
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retry number `attempt` (0-based)
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base = self.initial_backoff_ms as f64 * 2f64.powi(exponent);
        let capped = base.min(self.max_backoff_ms as f64);

        let with_jitter = if self.use_jitter && capped > 0.0 {
            let jitter = rand::thread_rng().gen_range(0.0..=capped * 0.25);
            (capped + jitter).min(self.max_backoff_ms as f64)
        } else {
            capped
        };

        Duration::from_millis(with_jitter as u64)
    }
}
