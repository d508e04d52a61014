//! Pipeline configuration
//!
//! All tunables live here with environment overrides under the `VERIFY_`
//! prefix. Defaults match production behavior: 85.0 confidence gate, 24h
//! eligibility cache, 60s extraction and 35s eligibility ceilings, three
//! polynomial-backoff eligibility attempts.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::retry::{BackoffStrategy, RetryPolicy};

/// Confidence score at or above which a field is trusted.
pub const CONFIDENCE_THRESHOLD: f64 = 85.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationConfig {
    /// Minimum confidence for auto-population and the clean-extraction branch
    pub confidence_threshold: f64,
    /// Eligibility cache TTL in seconds
    pub eligibility_cache_ttl_secs: u64,
    /// Hard ceiling for one extraction provider call, in seconds
    pub extraction_timeout_secs: u64,
    /// End-to-end ceiling for one eligibility attempt, in seconds
    pub eligibility_timeout_secs: u64,
    /// Total eligibility attempts, including the first
    pub eligibility_max_attempts: u32,
    /// Base delay for eligibility retries, in milliseconds
    pub eligibility_retry_base_delay_ms: u64,
    /// Delay cap for eligibility retries, in milliseconds
    pub eligibility_retry_max_delay_ms: u64,
    /// Attempts for throttling-class extraction errors
    pub extraction_throttle_attempts: u32,
    /// Fixed delay between throttled extraction attempts, in milliseconds
    pub extraction_throttle_delay_ms: u64,
    /// Attempts for unclassified extraction errors
    pub extraction_unclassified_attempts: u32,
    /// Fixed delay between unclassified extraction attempts, in milliseconds
    pub extraction_unclassified_delay_ms: u64,
    /// Concurrent pipeline runs across the worker pool
    pub worker_concurrency: usize,
    /// Bounded job queue capacity
    pub job_queue_capacity: usize,
    /// Redis URL for the eligibility cache; in-memory cache when unset
    pub redis_url: Option<String>,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: CONFIDENCE_THRESHOLD,
            eligibility_cache_ttl_secs: 24 * 3600,
            extraction_timeout_secs: 60,
            eligibility_timeout_secs: 35,
            eligibility_max_attempts: 3,
            eligibility_retry_base_delay_ms: 1_000,
            eligibility_retry_max_delay_ms: 30_000,
            extraction_throttle_attempts: 3,
            extraction_throttle_delay_ms: 2_000,
            extraction_unclassified_attempts: 2,
            extraction_unclassified_delay_ms: 1_000,
            worker_concurrency: 4,
            job_queue_capacity: 64,
            redis_url: None,
        }
    }
}

impl VerificationConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            confidence_threshold: env_parse("VERIFY_CONFIDENCE_THRESHOLD")
                .unwrap_or(defaults.confidence_threshold),
            eligibility_cache_ttl_secs: env_parse("VERIFY_ELIGIBILITY_CACHE_TTL_SECS")
                .unwrap_or(defaults.eligibility_cache_ttl_secs),
            extraction_timeout_secs: env_parse("VERIFY_EXTRACTION_TIMEOUT_SECS")
                .unwrap_or(defaults.extraction_timeout_secs),
            eligibility_timeout_secs: env_parse("VERIFY_ELIGIBILITY_TIMEOUT_SECS")
                .unwrap_or(defaults.eligibility_timeout_secs),
            eligibility_max_attempts: env_parse("VERIFY_ELIGIBILITY_MAX_ATTEMPTS")
                .unwrap_or(defaults.eligibility_max_attempts),
            eligibility_retry_base_delay_ms: env_parse("VERIFY_ELIGIBILITY_RETRY_BASE_DELAY_MS")
                .unwrap_or(defaults.eligibility_retry_base_delay_ms),
            eligibility_retry_max_delay_ms: env_parse("VERIFY_ELIGIBILITY_RETRY_MAX_DELAY_MS")
                .unwrap_or(defaults.eligibility_retry_max_delay_ms),
            extraction_throttle_attempts: env_parse("VERIFY_EXTRACTION_THROTTLE_ATTEMPTS")
                .unwrap_or(defaults.extraction_throttle_attempts),
            extraction_throttle_delay_ms: env_parse("VERIFY_EXTRACTION_THROTTLE_DELAY_MS")
                .unwrap_or(defaults.extraction_throttle_delay_ms),
            extraction_unclassified_attempts: env_parse("VERIFY_EXTRACTION_UNCLASSIFIED_ATTEMPTS")
                .unwrap_or(defaults.extraction_unclassified_attempts),
            extraction_unclassified_delay_ms: env_parse("VERIFY_EXTRACTION_UNCLASSIFIED_DELAY_MS")
                .unwrap_or(defaults.extraction_unclassified_delay_ms),
            worker_concurrency: env_parse("VERIFY_WORKER_CONCURRENCY")
                .unwrap_or(defaults.worker_concurrency),
            job_queue_capacity: env_parse("VERIFY_JOB_QUEUE_CAPACITY")
                .unwrap_or(defaults.job_queue_capacity),
            redis_url: std::env::var("VERIFY_REDIS_URL").ok(),
        }
    }

    pub fn eligibility_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.eligibility_cache_ttl_secs)
    }

    pub fn extraction_timeout(&self) -> Duration {
        Duration::from_secs(self.extraction_timeout_secs)
    }

    pub fn eligibility_timeout(&self) -> Duration {
        Duration::from_secs(self.eligibility_timeout_secs)
    }

    pub fn eligibility_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.eligibility_max_attempts,
            base_delay_ms: self.eligibility_retry_base_delay_ms,
            max_delay_ms: self.eligibility_retry_max_delay_ms,
            backoff_strategy: BackoffStrategy::Polynomial,
        }
    }

    pub fn extraction_throttle_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(
            self.extraction_throttle_attempts,
            self.extraction_throttle_delay_ms,
        )
    }

    pub fn extraction_unclassified_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(
            self.extraction_unclassified_attempts,
            self.extraction_unclassified_delay_ms,
        )
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}
