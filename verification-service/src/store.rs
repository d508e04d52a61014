//! Record persistence
//!
//! The store owns every mutation of a [`VerificationRecord`]. Status moves
//! only through [`RecordStore::transition`], result payload writes are
//! scoped to one named section, and full-record updates are optimistic on
//! the record version. Per-record claims are atomic: the in-memory
//! implementation serializes them on the map entry lock.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{VerificationError, VerificationResult};
use crate::models::{
    DeductibleOverride, EligibilityOutcome, ExtractionOutcome, RetryAttempt, VerificationRecord,
};
use crate::state::{ensure_transition, VerificationStatus};

/// One named section of the result payload.
///
/// Pipelines hand the store exactly the section they own, so concurrent
/// runs can never clobber a sibling section.
#[derive(Debug, Clone)]
pub enum OutcomeSection {
    Extraction(ExtractionOutcome),
    Eligibility(EligibilityOutcome),
    Override(DeductibleOverride),
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert a new record. The id must be unused.
    async fn insert(&self, record: VerificationRecord) -> VerificationResult<VerificationRecord>;

    /// Fetch a record by id.
    async fn get(&self, id: Uuid) -> VerificationResult<VerificationRecord>;

    /// Optimistic full-record update for field edits.
    ///
    /// Fails with a version conflict when the stored version moved past
    /// `expected_version`, and rejects any status change smuggled through
    /// the update (status only moves via `transition`).
    async fn update(
        &self,
        record: VerificationRecord,
        expected_version: u64,
    ) -> VerificationResult<VerificationRecord>;

    /// Apply one declared status transition.
    ///
    /// Entering `in_progress` while a run already holds the record is the
    /// distinct "already in progress" conflict rather than an illegal
    /// transition.
    async fn transition(
        &self,
        id: Uuid,
        to: VerificationStatus,
    ) -> VerificationResult<VerificationRecord>;

    /// Atomically claim the record for a pipeline run.
    async fn begin_in_progress(&self, id: Uuid) -> VerificationResult<VerificationRecord> {
        self.transition(id, VerificationStatus::InProgress).await
    }

    /// Release a just-claimed record back to its pre-claim status.
    ///
    /// Compensation used when the job could not be enqueued after a
    /// successful claim. No-op when the record is no longer in progress.
    async fn abort_in_progress(
        &self,
        id: Uuid,
        restore_to: VerificationStatus,
    ) -> VerificationResult<VerificationRecord>;

    /// Replace exactly one named section of the result payload.
    async fn merge_section(
        &self,
        id: Uuid,
        section: OutcomeSection,
    ) -> VerificationResult<VerificationRecord>;

    /// Record one failed pipeline attempt: bumps the attempt counter and
    /// appends to the retry history.
    async fn append_retry_attempt(
        &self,
        id: Uuid,
        error_code: &str,
    ) -> VerificationResult<VerificationRecord>;
}

/// In-memory record store for testing and single-node deployments.
pub struct InMemoryRecordStore {
    records: Arc<DashMap<Uuid, VerificationRecord>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self {
            records: Arc::new(DashMap::new()),
        }
    }
}

impl Default for InMemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn insert(&self, record: VerificationRecord) -> VerificationResult<VerificationRecord> {
        match self.records.entry(record.id) {
            Entry::Occupied(_) => Err(VerificationError::Internal(anyhow::anyhow!(
                "record id already exists: {}",
                record.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(record)
            }
        }
    }

    async fn get(&self, id: Uuid) -> VerificationResult<VerificationRecord> {
        self.records
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(VerificationError::RecordNotFound(id))
    }

    async fn update(
        &self,
        record: VerificationRecord,
        expected_version: u64,
    ) -> VerificationResult<VerificationRecord> {
        let mut entry = self
            .records
            .get_mut(&record.id)
            .ok_or(VerificationError::RecordNotFound(record.id))?;
        let current = entry.value_mut();

        if current.version != expected_version {
            return Err(VerificationError::VersionConflict {
                record_id: record.id,
                expected: expected_version,
            });
        }
        if record.status != current.status {
            return Err(VerificationError::IllegalTransition {
                from: current.status,
                to: record.status,
            });
        }

        let mut updated = record;
        updated.version = current.version + 1;
        updated.updated_at = Utc::now();
        *current = updated.clone();
        Ok(updated)
    }

    async fn transition(
        &self,
        id: Uuid,
        to: VerificationStatus,
    ) -> VerificationResult<VerificationRecord> {
        let mut entry = self
            .records
            .get_mut(&id)
            .ok_or(VerificationError::RecordNotFound(id))?;
        let record = entry.value_mut();

        if to == VerificationStatus::InProgress && record.status == VerificationStatus::InProgress {
            return Err(VerificationError::AlreadyInProgress(id));
        }
        ensure_transition(record.status, to)?;

        record.status = to;
        // A determination was reached; settled or retried later.
        if matches!(
            to,
            VerificationStatus::Verified | VerificationStatus::Failed | VerificationStatus::SelfPay
        ) {
            record.verified_at = Some(Utc::now());
        }
        record.version += 1;
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn abort_in_progress(
        &self,
        id: Uuid,
        restore_to: VerificationStatus,
    ) -> VerificationResult<VerificationRecord> {
        let mut entry = self
            .records
            .get_mut(&id)
            .ok_or(VerificationError::RecordNotFound(id))?;
        let record = entry.value_mut();

        if record.status != VerificationStatus::InProgress {
            return Ok(record.clone());
        }
        record.status = restore_to;
        record.version += 1;
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn merge_section(
        &self,
        id: Uuid,
        section: OutcomeSection,
    ) -> VerificationResult<VerificationRecord> {
        let mut entry = self
            .records
            .get_mut(&id)
            .ok_or(VerificationError::RecordNotFound(id))?;
        let record = entry.value_mut();

        match section {
            OutcomeSection::Extraction(extraction) => {
                record.result.extraction = Some(extraction);
            }
            OutcomeSection::Eligibility(eligibility) => {
                record.result.eligibility = Some(eligibility);
            }
            OutcomeSection::Override(override_) => {
                record.result.override_ = Some(override_);
            }
        }
        record.version += 1;
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn append_retry_attempt(
        &self,
        id: Uuid,
        error_code: &str,
    ) -> VerificationResult<VerificationRecord> {
        let mut entry = self
            .records
            .get_mut(&id)
            .ok_or(VerificationError::RecordNotFound(id))?;
        let record = entry.value_mut();

        record.retry_attempts += 1;
        record.result.retry_history.push(RetryAttempt {
            attempt_number: record.retry_attempts,
            error_code: error_code.to_string(),
            occurred_at: Utc::now(),
        });
        record.version += 1;
        record.updated_at = Utc::now();
        Ok(record.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExtractionOutcome;
    use std::collections::BTreeMap;

    async fn seeded_store() -> (InMemoryRecordStore, VerificationRecord) {
        let store = InMemoryRecordStore::new();
        let record = store
            .insert(VerificationRecord::new(Uuid::new_v4()))
            .await
            .unwrap();
        (store, record)
    }

    #[tokio::test]
    async fn insert_then_get_roundtrips() {
        let (store, record) = seeded_store().await;
        let fetched = store.get(record.id).await.unwrap();
        assert_eq!(fetched.id, record.id);
        assert_eq!(fetched.status, VerificationStatus::Pending);
    }

    #[tokio::test]
    async fn duplicate_insert_is_rejected() {
        let (store, record) = seeded_store().await;
        assert!(store.insert(record).await.is_err());
    }

    #[tokio::test]
    async fn get_unknown_record_is_not_found() {
        let store = InMemoryRecordStore::new();
        let missing = Uuid::new_v4();
        assert!(matches!(
            store.get(missing).await,
            Err(VerificationError::RecordNotFound(id)) if id == missing
        ));
    }

    #[tokio::test]
    async fn update_bumps_version_and_checks_expectation() {
        let (store, mut record) = seeded_store().await;
        record.payer_name = Some("Aetna".to_string());

        let updated = store.update(record.clone(), 0).await.unwrap();
        assert_eq!(updated.version, 1);
        assert_eq!(updated.payer_name.as_deref(), Some("Aetna"));

        // Stale expectation loses.
        let err = store.update(updated.clone(), 0).await.unwrap_err();
        assert!(matches!(err, VerificationError::VersionConflict { .. }));
    }

    #[tokio::test]
    async fn update_cannot_change_status() {
        let (store, mut record) = seeded_store().await;
        record.status = VerificationStatus::Verified;
        let err = store.update(record, 0).await.unwrap_err();
        assert!(matches!(err, VerificationError::IllegalTransition { .. }));
    }

    #[tokio::test]
    async fn transition_follows_declared_table() {
        let (store, record) = seeded_store().await;
        let updated = store
            .transition(record.id, VerificationStatus::InProgress)
            .await
            .unwrap();
        assert_eq!(updated.status, VerificationStatus::InProgress);

        let err = store
            .transition(record.id, VerificationStatus::SelfPay)
            .await
            .unwrap_err();
        assert!(matches!(err, VerificationError::IllegalTransition { .. }));
    }

    #[tokio::test]
    async fn settling_transitions_stamp_verified_at() {
        let (store, record) = seeded_store().await;
        store
            .begin_in_progress(record.id)
            .await
            .unwrap();
        let failed = store
            .transition(record.id, VerificationStatus::Failed)
            .await
            .unwrap();
        assert!(failed.verified_at.is_some());
    }

    #[tokio::test]
    async fn concurrent_claims_admit_exactly_one_winner() {
        let (store, record) = seeded_store().await;
        let store = Arc::new(store);

        let a = {
            let store = store.clone();
            tokio::spawn(async move { store.begin_in_progress(record.id).await })
        };
        let b = {
            let store = store.clone();
            tokio::spawn(async move { store.begin_in_progress(record.id).await })
        };

        let (a, b) = (a.await.unwrap(), b.await.unwrap());
        let winners = [&a, &b].iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1);

        let loser = if a.is_err() { a } else { b };
        assert!(matches!(
            loser,
            Err(VerificationError::AlreadyInProgress(id)) if id == record.id
        ));
    }

    #[tokio::test]
    async fn abort_restores_the_pre_claim_status() {
        let (store, record) = seeded_store().await;
        store.begin_in_progress(record.id).await.unwrap();

        let restored = store
            .abort_in_progress(record.id, VerificationStatus::Pending)
            .await
            .unwrap();
        assert_eq!(restored.status, VerificationStatus::Pending);

        // Claim again to prove the release was real.
        assert!(store.begin_in_progress(record.id).await.is_ok());
    }

    #[tokio::test]
    async fn merge_section_leaves_siblings_alone() {
        let (store, record) = seeded_store().await;

        store
            .append_retry_attempt(record.id, "JOB_FAILED")
            .await
            .unwrap();
        let merged = store
            .merge_section(
                record.id,
                OutcomeSection::Extraction(ExtractionOutcome {
                    fields: BTreeMap::new(),
                    low_confidence_fields: Vec::new(),
                    needs_review: false,
                    extracted_at: Utc::now(),
                }),
            )
            .await
            .unwrap();

        assert!(merged.result.extraction.is_some());
        assert_eq!(merged.result.retry_history.len(), 1);
        assert!(merged.result.eligibility.is_none());
    }

    #[tokio::test]
    async fn retry_attempts_number_monotonically() {
        let (store, record) = seeded_store().await;

        store
            .append_retry_attempt(record.id, "JOB_FAILED")
            .await
            .unwrap();
        let second = store
            .append_retry_attempt(record.id, "JOB_FAILED")
            .await
            .unwrap();

        assert_eq!(second.retry_attempts, 2);
        assert_eq!(second.result.retry_history[0].attempt_number, 1);
        assert_eq!(second.result.retry_history[1].attempt_number, 2);
    }
}
