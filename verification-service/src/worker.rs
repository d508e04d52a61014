//! Background job dispatch.
//!
//! Pipeline runs are queued on a bounded channel and fanned out to spawned
//! tasks under a concurrency limit. The queue bound is what lets the
//! service layer refuse new triggers synchronously instead of letting work
//! pile up unbounded.

use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use uuid::Uuid;

use crate::eligibility::EligibilityPipeline;
use crate::extraction::ExtractionPipeline;

/// A queued pipeline run. Jobs carry only the record id; authorization and
/// preconditions were checked before the record was claimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationJob {
    Extraction { record_id: Uuid },
    Eligibility { record_id: Uuid },
}

impl VerificationJob {
    pub fn record_id(&self) -> Uuid {
        match self {
            Self::Extraction { record_id } | Self::Eligibility { record_id } => *record_id,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Extraction { .. } => "extraction",
            Self::Eligibility { .. } => "eligibility",
        }
    }
}

/// Starts the dispatcher and returns the job sender.
pub fn start_workers(
    extraction: Arc<ExtractionPipeline>,
    eligibility: Arc<EligibilityPipeline>,
    concurrency: usize,
    queue_capacity: usize,
) -> mpsc::Sender<VerificationJob> {
    let (sender, mut receiver) = mpsc::channel::<VerificationJob>(queue_capacity.max(1));
    let limiter = Arc::new(Semaphore::new(concurrency.max(1)));

    tokio::spawn(async move {
        while let Some(job) = receiver.recv().await {
            let permit = match limiter.clone().acquire_owned().await {
                Ok(permit) => permit,
                // The semaphore is never closed while the dispatcher runs.
                Err(_) => break,
            };

            let extraction = extraction.clone();
            let eligibility = eligibility.clone();
            tokio::spawn(async move {
                let record_id = job.record_id();
                let kind = job.kind();
                tracing::debug!(record_id = %record_id, kind, "verification job started");

                let result = match job {
                    VerificationJob::Extraction { record_id } => extraction.run(record_id).await,
                    VerificationJob::Eligibility { record_id } => eligibility.run(record_id).await,
                };
                if let Err(err) = result {
                    tracing::error!(
                        record_id = %record_id,
                        kind,
                        error = %err,
                        "verification job failed"
                    );
                }
                drop(permit);
            });
        }
        tracing::debug!("verification job dispatcher stopped");
    });

    sender
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCacheStore;
    use crate::config::VerificationConfig;
    use crate::eligibility::EligibilityProviderRegistry;
    use crate::extraction::{
        CardFieldExtractor, ExtractionProviderError, LabeledValue, RawExtraction,
    };
    use crate::models::{CardImageRef, VerificationRecord};
    use crate::state::VerificationStatus;
    use crate::store::{InMemoryRecordStore, RecordStore};
    use audit_engine::MemoryAuditSink;
    use events_bus::InMemoryEventsBus;
    use std::time::Duration;

    struct FixedExtractor;

    #[async_trait::async_trait]
    impl CardFieldExtractor for FixedExtractor {
        fn name(&self) -> &str {
            "fixed"
        }

        fn is_network_backed(&self) -> bool {
            false
        }

        async fn extract(
            &self,
            _front: &CardImageRef,
            _back: Option<&CardImageRef>,
        ) -> Result<RawExtraction, ExtractionProviderError> {
            Ok(RawExtraction {
                labeled_values: vec![LabeledValue {
                    label: "Member ID".into(),
                    value: "W123456789".into(),
                    confidence: 96.0,
                }],
                lines: vec![],
            })
        }
    }

    async fn wait_until_settled(
        store: &InMemoryRecordStore,
        record_id: Uuid,
    ) -> VerificationRecord {
        for _ in 0..200 {
            let record = store.get(record_id).await.unwrap();
            if record.status != VerificationStatus::InProgress {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("record {record_id} never left in_progress");
    }

    #[tokio::test]
    async fn test_jobs_drain_under_concurrency_limit() {
        let store = Arc::new(InMemoryRecordStore::new());
        let audit: Arc<dyn audit_engine::AuditSink> = Arc::new(MemoryAuditSink::default());
        let notifier: Arc<dyn events_bus::NotificationChannel> =
            Arc::new(InMemoryEventsBus::new());
        let config = Arc::new(VerificationConfig::default());

        let extraction = Arc::new(ExtractionPipeline::new(
            store.clone(),
            audit.clone(),
            notifier.clone(),
            Arc::new(FixedExtractor),
            None,
            config.clone(),
        ));
        let eligibility = Arc::new(EligibilityPipeline::new(
            store.clone(),
            Arc::new(InMemoryCacheStore::new()),
            audit,
            notifier,
            Arc::new(EligibilityProviderRegistry::new()),
            config,
        ));

        let sender = start_workers(extraction, eligibility, 1, 8);

        let mut ids = Vec::new();
        for _ in 0..3 {
            let mut record = VerificationRecord::new(Uuid::new_v4());
            record.front_card_image = Some(CardImageRef::new("cards/front.png"));
            let record = store.insert(record).await.unwrap();
            store.begin_in_progress(record.id).await.unwrap();
            sender
                .send(VerificationJob::Extraction {
                    record_id: record.id,
                })
                .await
                .unwrap();
            ids.push(record.id);
        }

        for id in ids {
            let settled = wait_until_settled(&store, id).await;
            assert_eq!(settled.status, VerificationStatus::OcrComplete);
            assert_eq!(settled.member_id.as_deref(), Some("W123456789"));
        }
    }
}
