//! Retry utilities with exponential backoff and jitter.
//!
//! Ported from the LLM client's retry logic: a small generic backoff loop that the
//! advance engine wraps every completion-provider call in (§4.4). Persistence operations
//! never go through this — `save_bundle` is the store's only write, and blindly retrying
//! it risks duplicating a turn's side effects before the transaction commits.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::{error, warn};

use crate::error::{Error, Result};

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each failed attempt.
    pub backoff_multiplier: f64,
    /// Random jitter fraction (0.0 to 1.0) applied around the computed delay.
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_delay_ms = self.initial_delay.as_millis() as f64;
        let exponential_delay = base_delay_ms * self.backoff_multiplier.powi(attempt as i32);
        let capped_delay = exponential_delay.min(self.max_delay.as_millis() as f64);

        let jitter_range = capped_delay * self.jitter_factor;
        let jitter = rand::thread_rng().gen::<f64>() * jitter_range;
        let final_delay = capped_delay + jitter - (jitter_range / 2.0);

        Duration::from_millis(final_delay.max(0.0) as u64)
    }
}

/// Retry an async operation with exponential backoff, stopping early on the first
/// non-retryable error ([`Error::is_retryable`]). This is the only retry path the advance
/// engine uses — persistence writes never go through it (see module docs).
pub async fn retry_with_backoff_conditional<F, Fut, T>(config: &RetryConfig, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error = None;

    for attempt in 0..config.max_attempts {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(err) => {
                if !err.is_retryable() {
                    return Err(err);
                }

                if attempt + 1 < config.max_attempts {
                    let delay = config.calculate_delay(attempt);
                    warn!(attempt, ?delay, error = %err, "retrying after transient error");
                    last_error = Some(err);
                    sleep(delay).await;
                } else {
                    error!(attempt, error = %err, "retry budget exhausted");
                    last_error = Some(err);
                }
            }
        }
    }

    Err(last_error.unwrap_or_else(|| Error::llm_permanent("retry loop ran zero attempts")))
}
