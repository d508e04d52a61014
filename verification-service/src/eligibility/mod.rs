//! Eligibility verification pipeline.
//!
//! Runs against a record already claimed as in progress. A determination
//! cached within the reuse window is replayed without touching the payer.
//! Otherwise the payer integration is called under the polynomial-backoff
//! retry budget, with every attempt counted on the record; exhausting the
//! budget escalates the record to manual review.

pub mod provider;
pub mod registry;

pub use provider::{
    EligibilityProvider, EligibilityRequest, HttpEligibilityProvider, ProviderIssue,
    ProviderVerification,
};
pub use registry::EligibilityProviderRegistry;

use std::sync::Arc;

use chrono::Utc;
use error_common::{codes, ErrorCategory};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cache::{self, CacheStore};
use crate::config::VerificationConfig;
use crate::emit::{self, ProgressStage};
use crate::error::{VerificationError, VerificationResult};
use crate::models::{
    validate_monetary, CoverageSummary, EligibilityError, EligibilityOutcome, VerificationRecord,
};
use crate::redact;
use crate::retry::{run_with_retry, RetryFailure};
use crate::state::VerificationStatus;
use crate::store::{OutcomeSection, RecordStore};
use audit_engine::AuditSink;
use events_bus::NotificationChannel;

/// Cache entry pairing the stored determination with the status it mapped
/// to, so a hit replays both without re-deriving.
#[derive(Debug, Serialize, Deserialize)]
struct CachedEligibility {
    outcome: EligibilityOutcome,
    status: VerificationStatus,
}

pub struct EligibilityPipeline {
    store: Arc<dyn RecordStore>,
    cache: Arc<dyn CacheStore>,
    audit: Arc<dyn AuditSink>,
    notifier: Arc<dyn NotificationChannel>,
    registry: Arc<EligibilityProviderRegistry>,
    config: Arc<VerificationConfig>,
}

impl EligibilityPipeline {
    pub fn new(
        store: Arc<dyn RecordStore>,
        cache: Arc<dyn CacheStore>,
        audit: Arc<dyn AuditSink>,
        notifier: Arc<dyn NotificationChannel>,
        registry: Arc<EligibilityProviderRegistry>,
        config: Arc<VerificationConfig>,
    ) -> Self {
        Self {
            store,
            cache,
            audit,
            notifier,
            registry,
            config,
        }
    }

    /// Runs eligibility verification for a record already claimed as in
    /// progress.
    pub async fn run(&self, record_id: Uuid) -> VerificationResult<VerificationRecord> {
        let record = self.store.get(record_id).await?;

        let key = cache::eligibility_cache_key(record_id);
        match self.cache.get(&key).await {
            Ok(Some(cached)) => match serde_json::from_str::<CachedEligibility>(&cached) {
                Ok(hit) => return self.settle_from_cache(record_id, hit).await,
                Err(err) => {
                    tracing::warn!(
                        record_id = %record_id,
                        error = %err,
                        "dropping undecodable eligibility cache entry"
                    );
                    let _ = self.cache.invalidate(&key).await;
                }
            },
            Ok(None) => {}
            // A cache outage degrades to a provider call, never a failure.
            Err(err) => {
                tracing::warn!(
                    record_id = %record_id,
                    error = %err,
                    "eligibility cache read failed, calling provider"
                );
            }
        }

        let request = EligibilityRequest {
            payer_name: record.payer_name.clone().unwrap_or_default(),
            member_id: record.member_id.clone().unwrap_or_default(),
            group_number: record.group_number.clone(),
        };

        let policy = self.config.eligibility_retry_policy();
        match run_with_retry(&policy, |attempt| {
            self.verify_attempt(record_id, attempt, &request)
        })
        .await
        {
            Ok(verification) => self.settle_mapped(record_id, &key, verification).await,
            Err(failure) => self.settle_exhausted(record_id, failure).await,
        }
    }

    /// One provider attempt. The failure is recorded on the record before
    /// the uniform retryable job failure goes back to the retry driver.
    async fn verify_attempt(
        &self,
        record_id: Uuid,
        attempt: u32,
        request: &EligibilityRequest,
    ) -> VerificationResult<ProviderVerification> {
        match self.call_provider(record_id, request).await {
            Ok(verification) => Ok(verification),
            Err(err) => {
                tracing::warn!(
                    record_id = %record_id,
                    attempt,
                    error = %err,
                    "eligibility verification attempt failed"
                );
                self.record_failed_attempt(record_id, &err).await?;
                Err(VerificationError::provider(
                    codes::eligibility::JOB_FAILED,
                    "eligibility verification attempt failed",
                    true,
                ))
            }
        }
    }

    async fn call_provider(
        &self,
        record_id: Uuid,
        request: &EligibilityRequest,
    ) -> VerificationResult<ProviderVerification> {
        emit::progress(&self.notifier, record_id, ProgressStage::Started).await;

        let provider = self.registry.resolve(&request.payer_name).ok_or_else(|| {
            VerificationError::provider(
                "NO_PROVIDER",
                format!(
                    "no eligibility integration for payer {:?}",
                    request.payer_name
                ),
                false,
            )
        })?;

        tracing::debug!(
            record_id = %record_id,
            provider = provider.name(),
            "calling eligibility provider"
        );
        emit::progress(&self.notifier, record_id, ProgressStage::ApiCalled).await;

        let verification =
            tokio::time::timeout(self.config.eligibility_timeout(), provider.verify(request))
                .await
                .map_err(|_| {
                    VerificationError::provider(
                        "PROVIDER_TIMEOUT",
                        "eligibility provider timed out",
                        true,
                    )
                })??;

        emit::progress(&self.notifier, record_id, ProgressStage::Parsing).await;
        Ok(verification)
    }

    /// Writes the interim failure onto the record and counts the attempt.
    async fn record_failed_attempt(
        &self,
        record_id: Uuid,
        err: &VerificationError,
    ) -> VerificationResult<()> {
        let outcome = EligibilityOutcome {
            eligible: None,
            coverage: None,
            error: Some(EligibilityError {
                code: codes::eligibility::JOB_FAILED.to_string(),
                category: err.category(),
                message: redact::scrub(&err.to_string()),
                retryable: true,
                retry_count: None,
            }),
            verified_at: Utc::now(),
            provider_reference_id: None,
        };

        self.store
            .merge_section(record_id, OutcomeSection::Eligibility(outcome))
            .await?;
        self.store
            .append_retry_attempt(record_id, codes::eligibility::JOB_FAILED)
            .await?;
        Ok(())
    }

    /// Replays a cached determination: no provider call, no retry counting.
    async fn settle_from_cache(
        &self,
        record_id: Uuid,
        hit: CachedEligibility,
    ) -> VerificationResult<VerificationRecord> {
        self.store
            .merge_section(record_id, OutcomeSection::Eligibility(hit.outcome.clone()))
            .await?;
        let record = self.store.transition(record_id, hit.status).await?;

        emit::progress(&self.notifier, record_id, ProgressStage::Complete).await;
        let error_code = hit.outcome.error.as_ref().map(|e| e.code.clone());
        emit::status_change(&self.notifier, &record, error_code.as_deref()).await;
        emit::audit(
            &self.audit,
            "verification.eligibility.cache_hit",
            record_id,
            None,
            serde_json::json!({
                "status": record.status,
                "eligible": hit.outcome.eligible,
                "cacheHit": true,
            }),
        )
        .await;

        Ok(record)
    }

    /// Settles a determination the provider actually produced: stores it,
    /// moves the record, and caches it for the reuse window.
    async fn settle_mapped(
        &self,
        record_id: Uuid,
        cache_key: &str,
        verification: ProviderVerification,
    ) -> VerificationResult<VerificationRecord> {
        let (next_status, outcome, cacheable) =
            match check_coverage(verification.coverage.as_ref()) {
                Ok(()) => {
                    let (status, outcome) = map_verification(verification);
                    (status, outcome, true)
                }
                Err(err) => {
                    tracing::warn!(
                        record_id = %record_id,
                        error = %err,
                        "provider coverage failed range checks"
                    );
                    let (status, outcome) = out_of_range_outcome(&err);
                    (status, outcome, false)
                }
            };

        self.store
            .merge_section(record_id, OutcomeSection::Eligibility(outcome.clone()))
            .await?;
        let record = self.store.transition(record_id, next_status).await?;

        if cacheable {
            let entry = CachedEligibility {
                outcome: outcome.clone(),
                status: next_status,
            };
            match serde_json::to_string(&entry) {
                Ok(serialized) => {
                    if let Err(err) = self
                        .cache
                        .set(cache_key, &serialized, self.config.eligibility_cache_ttl())
                        .await
                    {
                        tracing::warn!(
                            record_id = %record_id,
                            error = %err,
                            "failed to cache eligibility determination"
                        );
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        record_id = %record_id,
                        error = %err,
                        "failed to serialize eligibility cache entry"
                    );
                }
            }
        }

        emit::progress(&self.notifier, record_id, ProgressStage::Complete).await;
        let error_code = outcome.error.as_ref().map(|e| e.code.clone());
        emit::status_change(&self.notifier, &record, error_code.as_deref()).await;
        emit::audit(
            &self.audit,
            "verification.eligibility.completed",
            record_id,
            None,
            serde_json::json!({
                "status": record.status,
                "eligible": outcome.eligible,
                "cacheHit": false,
                "errorCategory": outcome.error.as_ref().map(|e| e.category),
            }),
        )
        .await;

        Ok(record)
    }

    /// Escalates to manual review once the retry budget is spent.
    async fn settle_exhausted(
        &self,
        record_id: Uuid,
        failure: RetryFailure,
    ) -> VerificationResult<VerificationRecord> {
        let attempts_allowed = self.config.eligibility_max_attempts;
        let outcome = EligibilityOutcome {
            eligible: None,
            coverage: None,
            error: Some(EligibilityError {
                code: codes::eligibility::MAX_RETRIES_EXCEEDED.to_string(),
                category: ErrorCategory::TransientProvider,
                message: format!("gave up after {} eligibility attempts", failure.attempts),
                retryable: false,
                retry_count: Some(attempts_allowed),
            }),
            verified_at: Utc::now(),
            provider_reference_id: None,
        };

        self.store
            .merge_section(record_id, OutcomeSection::Eligibility(outcome))
            .await?;
        self.store
            .transition(record_id, VerificationStatus::Failed)
            .await?;
        let record = self
            .store
            .transition(record_id, VerificationStatus::ManualReview)
            .await?;

        emit::status_change(
            &self.notifier,
            &record,
            Some(codes::eligibility::MAX_RETRIES_EXCEEDED),
        )
        .await;
        emit::audit(
            &self.audit,
            "verification.eligibility.escalated",
            record_id,
            None,
            serde_json::json!({
                "errorCode": codes::eligibility::MAX_RETRIES_EXCEEDED,
                "attempts": failure.attempts,
                "escalatedTo": VerificationStatus::ManualReview,
            }),
        )
        .await;

        Ok(record)
    }
}

/// Maps the provider status vocabulary onto the record lifecycle. Unknown
/// statuses settle as failed with their own error code rather than leaving
/// the record dangling in progress.
fn map_verification(
    verification: ProviderVerification,
) -> (VerificationStatus, EligibilityOutcome) {
    let normalized = verification
        .status
        .trim()
        .to_uppercase()
        .replace([' ', '-'], "_");

    let (status, eligible) = match normalized.as_str() {
        "VERIFIED" => (
            VerificationStatus::Verified,
            verification.eligible.or(Some(true)),
        ),
        "FAILED" => (
            VerificationStatus::Failed,
            verification.eligible.or(Some(false)),
        ),
        "MANUAL_REVIEW" => (VerificationStatus::ManualReview, verification.eligible),
        other => {
            let outcome = EligibilityOutcome {
                eligible: None,
                coverage: verification.coverage,
                error: Some(EligibilityError {
                    code: codes::eligibility::UNMAPPED_PROVIDER_STATUS.to_string(),
                    category: ErrorCategory::PermanentProvider,
                    message: format!("provider status {:?} has no lifecycle mapping", other),
                    retryable: false,
                    retry_count: None,
                }),
                verified_at: Utc::now(),
                provider_reference_id: verification.reference_id,
            };
            return (VerificationStatus::Failed, outcome);
        }
    };

    let error = verification.error.map(|issue| EligibilityError {
        code: issue.code,
        category: ErrorCategory::PermanentProvider,
        message: redact::scrub(&issue.message),
        retryable: false,
        retry_count: None,
    });

    let outcome = EligibilityOutcome {
        eligible,
        coverage: verification.coverage,
        error,
        verified_at: Utc::now(),
        provider_reference_id: verification.reference_id,
    };
    (status, outcome)
}

/// Range and consistency checks on provider-reported amounts before they
/// land on the record. Progress toward a threshold can never exceed the
/// threshold itself.
fn check_coverage(coverage: Option<&CoverageSummary>) -> VerificationResult<()> {
    let coverage = match coverage {
        Some(coverage) => coverage,
        None => return Ok(()),
    };

    if let Some(copay) = coverage.copay {
        validate_monetary("copay", copay)?;
    }
    if let Some(coinsurance) = coverage.coinsurance {
        validate_monetary("coinsurance", coinsurance)?;
    }
    if let Some(deductible) = &coverage.deductible {
        if let Some(amount) = deductible.amount {
            validate_monetary("deductibleAmount", amount)?;
        }
        if let Some(met) = deductible.met {
            validate_monetary("deductibleMet", met)?;
        }
        if let (Some(met), Some(amount)) = (deductible.met, deductible.amount) {
            if met > amount {
                return Err(VerificationError::validation(
                    "deductibleMet",
                    "deductible met cannot exceed the deductible amount",
                ));
            }
        }
    }
    if let Some(oop) = &coverage.out_of_pocket_max {
        if let Some(amount) = oop.amount {
            validate_monetary("oopMaxAmount", amount)?;
        }
        if let Some(met) = oop.met {
            validate_monetary("oopMet", met)?;
        }
        if let (Some(met), Some(max)) = (oop.met, oop.amount) {
            if met > max {
                return Err(VerificationError::validation(
                    "oopMet",
                    "out-of-pocket met cannot exceed the out-of-pocket maximum",
                ));
            }
        }
    }
    Ok(())
}

fn out_of_range_outcome(err: &VerificationError) -> (VerificationStatus, EligibilityOutcome) {
    let outcome = EligibilityOutcome {
        eligible: None,
        coverage: None,
        error: Some(EligibilityError {
            code: codes::validation::OUT_OF_RANGE.to_string(),
            category: ErrorCategory::PermanentProvider,
            message: redact::scrub(&err.to_string()),
            retryable: false,
            retry_count: None,
        }),
        verified_at: Utc::now(),
        provider_reference_id: None,
    };
    (VerificationStatus::Failed, outcome)
}
