//! Verification service facade.
//!
//! All caller-facing operations go through here: record creation, manual
//! field entry, card image attachment, pipeline triggers, payment-path
//! switches, and overrides. Every operation authorizes the caller against
//! the record's case before touching anything, and pipeline triggers claim
//! the record atomically before a job is queued, so a duplicate trigger is
//! rejected synchronously.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use error_common::codes;
use serde_json::json;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::cache::{self, CacheStore};
use crate::config::VerificationConfig;
use crate::eligibility::{EligibilityPipeline, EligibilityProviderRegistry};
use crate::emit;
use crate::error::{VerificationError, VerificationResult};
use crate::extraction::{CardFieldExtractor, ExtractionPipeline};
use crate::models::{
    CardImageRef, FinancialProgress, ManualFieldUpdate, OverrideFields, VerificationRecord,
};
use crate::overrides::OverrideManager;
use crate::redact;
use crate::state::VerificationStatus;
use crate::store::RecordStore;
use crate::worker::{self, VerificationJob};
use audit_engine::AuditSink;
use events_bus::NotificationChannel;

/// Caller identity attached to every service operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub user_id: Uuid,
    pub operator: bool,
}

impl Principal {
    pub fn user(user_id: Uuid) -> Self {
        Self {
            user_id,
            operator: false,
        }
    }

    pub fn operator(user_id: Uuid) -> Self {
        Self {
            user_id,
            operator: true,
        }
    }
}

/// Decides whether a caller may act on a case's verification records.
#[async_trait]
pub trait CaseAccessPolicy: Send + Sync {
    async fn can_access(&self, principal: &Principal, case_id: Uuid) -> VerificationResult<bool>;
}

/// Policy that admits every caller. Deployments front the service with
/// their own case-level authorization.
pub struct OpenAccessPolicy;

#[async_trait]
impl CaseAccessPolicy for OpenAccessPolicy {
    async fn can_access(
        &self,
        _principal: &Principal,
        _case_id: Uuid,
    ) -> VerificationResult<bool> {
        Ok(true)
    }
}

pub struct VerificationService {
    store: Arc<dyn RecordStore>,
    cache: Arc<dyn CacheStore>,
    audit: Arc<dyn AuditSink>,
    notifier: Arc<dyn NotificationChannel>,
    access: Arc<dyn CaseAccessPolicy>,
    extraction: Arc<ExtractionPipeline>,
    eligibility: Arc<EligibilityPipeline>,
    overrides: OverrideManager,
    jobs: OnceLock<mpsc::Sender<VerificationJob>>,
    config: Arc<VerificationConfig>,
}

impl VerificationService {
    pub fn new(
        store: Arc<dyn RecordStore>,
        cache: Arc<dyn CacheStore>,
        audit: Arc<dyn AuditSink>,
        notifier: Arc<dyn NotificationChannel>,
        access: Arc<dyn CaseAccessPolicy>,
        registry: Arc<EligibilityProviderRegistry>,
        primary_extractor: Arc<dyn CardFieldExtractor>,
        secondary_extractor: Option<Arc<dyn CardFieldExtractor>>,
        config: VerificationConfig,
    ) -> Self {
        let config = Arc::new(config);
        let extraction = Arc::new(ExtractionPipeline::new(
            store.clone(),
            audit.clone(),
            notifier.clone(),
            primary_extractor,
            secondary_extractor,
            config.clone(),
        ));
        let eligibility = Arc::new(EligibilityPipeline::new(
            store.clone(),
            cache.clone(),
            audit.clone(),
            notifier.clone(),
            registry,
            config.clone(),
        ));
        let overrides = OverrideManager::new(store.clone(), audit.clone());

        Self {
            store,
            cache,
            audit,
            notifier,
            access,
            extraction,
            eligibility,
            overrides,
            jobs: OnceLock::new(),
            config,
        }
    }

    /// Starts the background job workers. Later calls are no-ops.
    pub fn start_workers(&self) {
        self.jobs.get_or_init(|| {
            worker::start_workers(
                self.extraction.clone(),
                self.eligibility.clone(),
                self.config.worker_concurrency,
                self.config.job_queue_capacity,
            )
        });
    }

    pub async fn create_record(
        &self,
        principal: &Principal,
        case_id: Uuid,
    ) -> VerificationResult<VerificationRecord> {
        self.authorize(principal, case_id).await?;

        let record = self.store.insert(VerificationRecord::new(case_id)).await?;
        emit::audit(
            &self.audit,
            "verification.record.created",
            record.id,
            Some(principal.user_id),
            json!({ "caseId": case_id }),
        )
        .await;

        Ok(record)
    }

    pub async fn get_record(
        &self,
        principal: &Principal,
        record_id: Uuid,
    ) -> VerificationResult<VerificationRecord> {
        let record = self.store.get(record_id).await?;
        self.authorize(principal, record.case_id).await?;
        Ok(record)
    }

    /// Effective deductible and out-of-pocket progress, manual overrides
    /// winning over payer-reported values.
    pub async fn financial_progress(
        &self,
        principal: &Principal,
        record_id: Uuid,
    ) -> VerificationResult<Option<FinancialProgress>> {
        let record = self.get_record(principal, record_id).await?;
        Ok(record.result.current_financial_progress())
    }

    pub async fn attach_card_images(
        &self,
        principal: &Principal,
        record_id: Uuid,
        front: Option<CardImageRef>,
        back: Option<CardImageRef>,
    ) -> VerificationResult<VerificationRecord> {
        let mut record = self.store.get(record_id).await?;
        self.authorize(principal, record.case_id).await?;

        if front.is_none() && back.is_none() {
            return Err(VerificationError::validation(
                "images",
                "at least one card image is required",
            ));
        }
        if !record.status.allows_field_edits() {
            return Err(VerificationError::FieldsLocked(record.status));
        }

        let expected_version = record.version;
        let attached_front = front.is_some();
        let attached_back = back.is_some();
        if let Some(front) = front {
            record.front_card_image = Some(front);
        }
        if let Some(back) = back {
            record.back_card_image = Some(back);
        }
        let record = self.store.update(record, expected_version).await?;

        emit::audit(
            &self.audit,
            "verification.images.attached",
            record_id,
            Some(principal.user_id),
            json!({ "front": attached_front, "back": attached_back }),
        )
        .await;

        Ok(record)
    }

    /// Applies manually entered card fields.
    ///
    /// A blank submission clears its field. Edits to identifying fields
    /// invalidate any cached eligibility determination. Entering data moves
    /// a pending record into manual entry, and once the required
    /// identifiers are present the record advances to manual entry
    /// complete, ready for eligibility verification.
    pub async fn submit_manual_fields(
        &self,
        principal: &Principal,
        record_id: Uuid,
        update: &ManualFieldUpdate,
    ) -> VerificationResult<VerificationRecord> {
        let mut record = self.store.get(record_id).await?;
        self.authorize(principal, record.case_id).await?;

        if update.is_empty() {
            return Err(VerificationError::validation(
                "fields",
                "at least one field is required",
            ));
        }
        if !record.status.allows_field_edits() {
            return Err(VerificationError::FieldsLocked(record.status));
        }

        let expected_version = record.version;
        apply_update(&mut record, update);
        let mut record = self.store.update(record, expected_version).await?;

        if update.touches_identity() {
            let key = cache::eligibility_cache_key(record_id);
            if let Err(err) = self.cache.invalidate(&key).await {
                tracing::warn!(
                    record_id = %record_id,
                    error = %err,
                    "failed to invalidate eligibility cache after identity edit"
                );
            }
        }

        let status_before = record.status;
        if record.status == VerificationStatus::Pending {
            record = self
                .store
                .transition(record_id, VerificationStatus::ManualEntry)
                .await?;
        }
        if matches!(
            record.status,
            VerificationStatus::OcrComplete
                | VerificationStatus::OcrNeedsReview
                | VerificationStatus::ManualEntry
        ) && record.has_required_identifiers()
        {
            record = self
                .store
                .transition(record_id, VerificationStatus::ManualEntryComplete)
                .await?;
        }
        if record.status != status_before {
            emit::status_change(&self.notifier, &record, None).await;
        }

        emit::audit(
            &self.audit,
            "verification.fields.updated",
            record_id,
            Some(principal.user_id),
            masked_update(update),
        )
        .await;

        Ok(record)
    }

    /// Claims the record and queues a document extraction run.
    pub async fn begin_extraction(
        &self,
        principal: &Principal,
        record_id: Uuid,
    ) -> VerificationResult<VerificationRecord> {
        let record = self.store.get(record_id).await?;
        self.authorize(principal, record.case_id).await?;

        let restore_to = record.status;
        let claimed = self.store.begin_in_progress(record_id).await?;
        self.enqueue_claimed(
            VerificationJob::Extraction { record_id },
            record_id,
            restore_to,
        )
        .await?;

        emit::status_change(&self.notifier, &claimed, None).await;
        Ok(claimed)
    }

    /// Claims the record and queues an eligibility verification run.
    ///
    /// Rejected synchronously when the record has expired, when the
    /// identifiers the payer needs are missing, or when a run already
    /// holds the record.
    pub async fn begin_eligibility_verification(
        &self,
        principal: &Principal,
        record_id: Uuid,
    ) -> VerificationResult<VerificationRecord> {
        let record = self.store.get(record_id).await?;
        self.authorize(principal, record.case_id).await?;

        if record.is_expired() {
            return Err(VerificationError::validation(
                "expiresAt",
                "the coverage snapshot on this record has expired",
            ));
        }
        if !record.has_required_identifiers() {
            return Err(VerificationError::validation(
                "memberId",
                "payer name and member id are required before eligibility verification",
            ));
        }

        let restore_to = record.status;
        let claimed = self.store.begin_in_progress(record_id).await?;
        self.enqueue_claimed(
            VerificationJob::Eligibility { record_id },
            record_id,
            restore_to,
        )
        .await?;

        emit::status_change(&self.notifier, &claimed, None).await;
        Ok(claimed)
    }

    /// Applies a manual deductible/out-of-pocket override. Operator-only.
    pub async fn apply_override(
        &self,
        principal: &Principal,
        record_id: Uuid,
        fields: &OverrideFields,
        reason: &str,
    ) -> VerificationResult<VerificationRecord> {
        let record = self.store.get(record_id).await?;
        self.authorize(principal, record.case_id).await?;
        if !principal.operator {
            return Err(VerificationError::AccessDenied(principal.user_id));
        }

        self.overrides
            .apply(record_id, fields, reason, principal.user_id)
            .await
    }

    /// Marks the case self-pay, settling the record.
    pub async fn select_self_pay(
        &self,
        principal: &Principal,
        record_id: Uuid,
    ) -> VerificationResult<VerificationRecord> {
        let record = self.store.get(record_id).await?;
        self.authorize(principal, record.case_id).await?;

        let previous = record.status;
        let record = self
            .store
            .transition(record_id, VerificationStatus::SelfPay)
            .await?;

        emit::status_change(&self.notifier, &record, None).await;
        emit::audit(
            &self.audit,
            "verification.self_pay.selected",
            record_id,
            Some(principal.user_id),
            json!({ "previousStatus": previous }),
        )
        .await;

        Ok(record)
    }

    /// Moves a self-pay record back onto the insurance path.
    ///
    /// Without the required identifiers the pipeline cannot resume; the
    /// record settles as failed until the fields are re-entered.
    pub async fn switch_to_insurance(
        &self,
        principal: &Principal,
        record_id: Uuid,
    ) -> VerificationResult<VerificationRecord> {
        let record = self.store.get(record_id).await?;
        self.authorize(principal, record.case_id).await?;

        let (next, error_code) = if record.has_required_identifiers() {
            (VerificationStatus::Pending, None)
        } else {
            (
                VerificationStatus::Failed,
                Some(codes::validation::MISSING_REQUIRED_FIELD),
            )
        };
        let record = self.store.transition(record_id, next).await?;

        emit::status_change(&self.notifier, &record, error_code).await;
        emit::audit(
            &self.audit,
            "verification.insurance.selected",
            record_id,
            Some(principal.user_id),
            json!({ "resumedTo": record.status }),
        )
        .await;

        Ok(record)
    }

    async fn authorize(&self, principal: &Principal, case_id: Uuid) -> VerificationResult<()> {
        if self.access.can_access(principal, case_id).await? {
            Ok(())
        } else {
            Err(VerificationError::AccessDenied(principal.user_id))
        }
    }

    /// Queues a job for a record that was just claimed. A full or closed
    /// queue releases the claim before the error goes back to the caller.
    async fn enqueue_claimed(
        &self,
        job: VerificationJob,
        record_id: Uuid,
        restore_to: VerificationStatus,
    ) -> VerificationResult<()> {
        let sender = match self.jobs.get() {
            Some(sender) => sender,
            None => {
                self.store.abort_in_progress(record_id, restore_to).await?;
                return Err(VerificationError::Internal(anyhow::anyhow!(
                    "verification workers are not started"
                )));
            }
        };

        match sender.try_send(job) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.store.abort_in_progress(record_id, restore_to).await?;
                Err(VerificationError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.store.abort_in_progress(record_id, restore_to).await?;
                Err(VerificationError::Internal(anyhow::anyhow!(
                    "verification worker queue is closed"
                )))
            }
        }
    }
}

fn apply_update(record: &mut VerificationRecord, update: &ManualFieldUpdate) {
    if let Some(value) = &update.payer_name {
        record.payer_name = normalized(value);
    }
    if let Some(value) = &update.member_id {
        record.member_id = normalized(value);
    }
    if let Some(value) = &update.group_number {
        record.group_number = normalized(value);
    }
    if let Some(value) = &update.subscriber_name {
        record.subscriber_name = normalized(value);
    }
    if let Some(value) = &update.subscriber_dob {
        record.subscriber_dob = normalized(value);
    }
}

/// Trimmed value; an explicitly blank submission clears the field.
fn normalized(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Audit payload for a manual field edit. Identifiers, names, and dates of
/// birth are masked; the insurer name is organizational data and stays
/// readable.
fn masked_update(update: &ManualFieldUpdate) -> serde_json::Value {
    let mut fields = serde_json::Map::new();
    if let Some(value) = &update.payer_name {
        fields.insert("payerName".to_string(), json!(value.trim()));
    }
    if let Some(value) = &update.member_id {
        fields.insert(
            "memberId".to_string(),
            json!(redact::mask_identifier(value.trim())),
        );
    }
    if let Some(value) = &update.group_number {
        fields.insert(
            "groupNumber".to_string(),
            json!(redact::mask_identifier(value.trim())),
        );
    }
    if let Some(value) = &update.subscriber_name {
        fields.insert(
            "subscriberName".to_string(),
            json!(redact::mask_name(value.trim())),
        );
    }
    if let Some(value) = &update.subscriber_dob {
        fields.insert(
            "subscriberDob".to_string(),
            json!(redact::mask_dob(value.trim())),
        );
    }
    json!({ "fields": fields })
}
