//! Document extraction pipeline.
//!
//! Runs against a record already claimed as in progress: calls the card
//! extraction provider (falling back once when a network-backed primary is
//! unreachable), retries per failure class, maps the raw output onto card
//! fields, auto-populates empty identifying fields from high-confidence
//! values, and settles the record into `ocr_complete`, `ocr_needs_review`
//! or `failed`.

pub mod fields;
pub mod provider;

pub use provider::{
    CardFieldExtractor, ExtractionProviderError, LabeledValue, RawExtraction, TextLine,
    VisionExtractionClient,
};

use std::sync::Arc;

use uuid::Uuid;

use crate::config::VerificationConfig;
use crate::emit;
use crate::error::{VerificationError, VerificationResult};
use crate::models::{CardField, CardImageRef, ExtractionOutcome, VerificationRecord};
use crate::redact;
use crate::state::VerificationStatus;
use crate::store::{OutcomeSection, RecordStore};
use audit_engine::AuditSink;
use events_bus::NotificationChannel;

/// Attempts at writing back auto-populated fields before giving up on a
/// version conflict. Auto-population is best effort; a concurrent manual
/// edit wins.
const FIELD_WRITE_ATTEMPTS: u32 = 3;

pub struct ExtractionPipeline {
    store: Arc<dyn RecordStore>,
    audit: Arc<dyn AuditSink>,
    notifier: Arc<dyn NotificationChannel>,
    primary: Arc<dyn CardFieldExtractor>,
    secondary: Option<Arc<dyn CardFieldExtractor>>,
    config: Arc<VerificationConfig>,
}

impl ExtractionPipeline {
    pub fn new(
        store: Arc<dyn RecordStore>,
        audit: Arc<dyn AuditSink>,
        notifier: Arc<dyn NotificationChannel>,
        primary: Arc<dyn CardFieldExtractor>,
        secondary: Option<Arc<dyn CardFieldExtractor>>,
        config: Arc<VerificationConfig>,
    ) -> Self {
        Self {
            store,
            audit,
            notifier,
            primary,
            secondary,
            config,
        }
    }

    /// Runs extraction for a record already claimed as in progress.
    pub async fn run(&self, record_id: Uuid) -> VerificationResult<VerificationRecord> {
        let record = self.store.get(record_id).await?;

        let front = match record.front_card_image.clone() {
            Some(front) => front,
            None => {
                return self
                    .record_failure(
                        record_id,
                        error_common::codes::extraction::NO_FRONT_IMAGE,
                        "no front card image attached",
                    )
                    .await;
            }
        };
        let back = record.back_card_image.clone();

        match self.extract_with_policy(&front, back.as_ref()).await {
            Ok((raw, provider_name)) => self.record_success(record_id, &raw, &provider_name).await,
            Err(err) => {
                let code = err.failure_code();
                self.record_failure(record_id, &code, &err.to_string()).await
            }
        }
    }

    /// One provider call, bounded by the extraction timeout.
    async fn extract_once(
        &self,
        extractor: &dyn CardFieldExtractor,
        front: &CardImageRef,
        back: Option<&CardImageRef>,
    ) -> Result<RawExtraction, ExtractionProviderError> {
        match tokio::time::timeout(self.config.extraction_timeout(), extractor.extract(front, back))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(ExtractionProviderError::Timeout),
        }
    }

    /// Calls the primary provider, falling back once to the secondary when a
    /// network-backed primary is unreachable. Returns the raw output and the
    /// name of the provider that produced it.
    async fn extract_once_with_fallback(
        &self,
        front: &CardImageRef,
        back: Option<&CardImageRef>,
    ) -> Result<(RawExtraction, String), ExtractionProviderError> {
        match self.extract_once(self.primary.as_ref(), front, back).await {
            Ok(raw) => Ok((raw, self.primary.name().to_string())),
            Err(err) if err.is_connectivity() && self.primary.is_network_backed() => {
                match &self.secondary {
                    Some(secondary) => {
                        tracing::warn!(
                            provider = self.primary.name(),
                            fallback = secondary.name(),
                            "primary extraction provider unreachable, trying fallback"
                        );
                        let raw = self.extract_once(secondary.as_ref(), front, back).await?;
                        Ok((raw, secondary.name().to_string()))
                    }
                    None => Err(err),
                }
            }
            Err(err) => Err(err),
        }
    }

    /// Drives the call under the retry budget the first failure selects:
    /// throttling gets the larger fixed-delay budget, connectivity and
    /// unclassified failures the smaller one, timeouts and unrecoverable
    /// inputs none.
    async fn extract_with_policy(
        &self,
        front: &CardImageRef,
        back: Option<&CardImageRef>,
    ) -> Result<(RawExtraction, String), ExtractionProviderError> {
        let mut last = match self.extract_once_with_fallback(front, back).await {
            Ok(success) => return Ok(success),
            Err(err) => err,
        };

        let policy = match &last {
            ExtractionProviderError::Throttled(_) => self.config.extraction_throttle_policy(),
            ExtractionProviderError::Connectivity(_) | ExtractionProviderError::Other(_) => {
                self.config.extraction_unclassified_policy()
            }
            ExtractionProviderError::Timeout | ExtractionProviderError::Unrecoverable { .. } => {
                return Err(last);
            }
        };

        let mut attempt = 1u32;
        while attempt < policy.max_attempts {
            tokio::time::sleep(policy.delay_for(attempt)).await;
            attempt += 1;

            tracing::debug!(attempt, "retrying card extraction");
            match self.extract_once_with_fallback(front, back).await {
                Ok(success) => return Ok(success),
                Err(
                    err @ (ExtractionProviderError::Timeout
                    | ExtractionProviderError::Unrecoverable { .. }),
                ) => return Err(err),
                Err(err) => last = err,
            }
        }

        Err(last)
    }

    async fn record_success(
        &self,
        record_id: Uuid,
        raw: &RawExtraction,
        provider_name: &str,
    ) -> VerificationResult<VerificationRecord> {
        let outcome = fields::build_outcome(raw, self.config.confidence_threshold);
        let auto_populated = self.apply_extracted_fields(record_id, &outcome).await?;

        self.store
            .merge_section(record_id, OutcomeSection::Extraction(outcome.clone()))
            .await?;

        let next = if outcome.needs_review {
            VerificationStatus::OcrNeedsReview
        } else {
            VerificationStatus::OcrComplete
        };
        let record = self.store.transition(record_id, next).await?;

        emit::status_change(&self.notifier, &record, None).await;
        emit::audit(
            &self.audit,
            "verification.extraction.completed",
            record_id,
            None,
            serde_json::json!({
                "provider": provider_name,
                "fieldsFound": outcome.fields.len(),
                "lowConfidenceFields": outcome.low_confidence_fields,
                "confidence": confidence_summary(&outcome),
                "needsReview": outcome.needs_review,
                "autoPopulated": auto_populated,
            }),
        )
        .await;

        Ok(record)
    }

    /// Fills identifying fields that are still empty from high-confidence
    /// extracted values. The payer only auto-populates when it matches the
    /// canonical list; an unrecognized insurer stays in the extraction
    /// section for manual confirmation.
    async fn apply_extracted_fields(
        &self,
        record_id: Uuid,
        outcome: &ExtractionOutcome,
    ) -> VerificationResult<Vec<CardField>> {
        let threshold = self.config.confidence_threshold;

        for _ in 0..FIELD_WRITE_ATTEMPTS {
            let mut record = self.store.get(record_id).await?;
            let expected_version = record.version;
            let mut applied = Vec::new();

            for (field, extracted) in &outcome.fields {
                if extracted.confidence_score < threshold {
                    continue;
                }
                let slot = match field {
                    CardField::MemberId => &mut record.member_id,
                    CardField::GroupNumber => &mut record.group_number,
                    CardField::SubscriberName => &mut record.subscriber_name,
                    CardField::PayerName => {
                        if !fields::is_canonical_payer(&extracted.value) {
                            // An insurer name is not member data; log it raw.
                            tracing::info!(
                                payer = %extracted.value,
                                "extracted payer not in canonical list, leaving for manual confirmation"
                            );
                            continue;
                        }
                        &mut record.payer_name
                    }
                };
                if slot.as_deref().map_or(true, |v| v.trim().is_empty()) {
                    *slot = Some(extracted.value.clone());
                    applied.push(*field);
                }
            }

            if applied.is_empty() {
                return Ok(applied);
            }
            match self.store.update(record, expected_version).await {
                Ok(_) => return Ok(applied),
                Err(VerificationError::VersionConflict { .. }) => continue,
                Err(err) => return Err(err),
            }
        }

        tracing::warn!(
            record_id = %record_id,
            "gave up auto-populating fields after repeated concurrent edits"
        );
        Ok(Vec::new())
    }

    /// Settles the record as failed. Idempotent: replayed jobs find the
    /// record already failed and change nothing.
    async fn record_failure(
        &self,
        record_id: Uuid,
        code: &str,
        message: &str,
    ) -> VerificationResult<VerificationRecord> {
        let record = self.store.get(record_id).await?;
        if record.status == VerificationStatus::Failed {
            return Ok(record);
        }

        self.store.append_retry_attempt(record_id, code).await?;
        let record = self
            .store
            .transition(record_id, VerificationStatus::Failed)
            .await?;

        emit::status_change(&self.notifier, &record, Some(code)).await;
        emit::audit(
            &self.audit,
            "verification.extraction.failed",
            record_id,
            None,
            serde_json::json!({
                "errorCode": code,
                "message": redact::scrub(message),
            }),
        )
        .await;

        Ok(record)
    }
}

fn confidence_summary(outcome: &ExtractionOutcome) -> serde_json::Value {
    let scores: Vec<f64> = outcome
        .fields
        .values()
        .map(|f| f.confidence_score)
        .collect();
    if scores.is_empty() {
        return serde_json::Value::Null;
    }

    let min = scores.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let avg = scores.iter().sum::<f64>() / scores.len() as f64;
    serde_json::json!({ "min": min, "max": max, "avg": avg })
}
