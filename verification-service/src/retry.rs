//! Retry policies and the generic retry driver
//!
//! Each pipeline carries its own policy: eligibility uses polynomial
//! backoff capped at three total attempts, extraction uses short fixed
//! delays for throttling-class and unclassified errors. The driver only
//! re-runs retryable errors; everything else surfaces immediately.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

use crate::error::{VerificationError, VerificationResult};

/// Backoff strategy for retries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay
    Fixed,
    /// Linear increase
    Linear,
    /// Polynomial (quadratic) increase
    Polynomial,
}

/// Retry policy configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum total attempts, including the first
    pub max_attempts: u32,
    /// Base delay between retries (milliseconds)
    pub base_delay_ms: u64,
    /// Maximum delay between retries (milliseconds)
    pub max_delay_ms: u64,
    /// Backoff strategy
    pub backoff_strategy: BackoffStrategy,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, base_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
            max_delay_ms: base_delay_ms,
            backoff_strategy: BackoffStrategy::Fixed,
        }
    }

    pub fn polynomial(max_attempts: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
            max_delay_ms,
            backoff_strategy: BackoffStrategy::Polynomial,
        }
    }

    /// Delay after the given failed attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = u64::from(attempt.max(1));
        let raw = match self.backoff_strategy {
            BackoffStrategy::Fixed => self.base_delay_ms,
            BackoffStrategy::Linear => self.base_delay_ms.saturating_mul(attempt),
            BackoffStrategy::Polynomial => self
                .base_delay_ms
                .saturating_mul(attempt.saturating_mul(attempt)),
        };
        Duration::from_millis(raw.min(self.max_delay_ms))
    }
}

/// Final failure from the retry driver.
#[derive(Debug)]
pub struct RetryFailure {
    pub error: VerificationError,
    pub attempts: u32,
    /// True when the retry budget ran out on a retryable error, as
    /// opposed to stopping early on a non-retryable one.
    pub exhausted: bool,
}

/// Run an operation under a retry policy.
///
/// The closure receives the 1-based attempt number and owns any
/// per-attempt record keeping (retry history, progress events). Only
/// errors whose category is retryable consume further attempts.
pub async fn run_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, RetryFailure>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = VerificationResult<T>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) => {
                let retryable = error.is_retryable();
                if !retryable {
                    return Err(RetryFailure {
                        error,
                        attempts: attempt,
                        exhausted: false,
                    });
                }
                if attempt >= policy.max_attempts {
                    return Err(RetryFailure {
                        error,
                        attempts: attempt,
                        exhausted: true,
                    });
                }
                tokio::time::sleep(policy.delay_for(attempt)).await;
            }
        }
    }
}
