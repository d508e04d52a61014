//! Manual deductible and out-of-pocket overrides.
//!
//! Operators correct stale payer-reported accumulators without touching the
//! verification status. Overrides merge field-by-field over any previous
//! override, and every applied change is audited with its previous and new
//! value.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::emit;
use crate::error::{VerificationError, VerificationResult};
use crate::models::{validate_monetary, DeductibleOverride, OverrideFields, VerificationRecord};
use crate::store::{OutcomeSection, RecordStore};
use audit_engine::AuditSink;

/// Origin tag stamped on every operator-entered override.
const MANUAL_SOURCE: &str = "manual";

pub struct OverrideManager {
    store: Arc<dyn RecordStore>,
    audit: Arc<dyn AuditSink>,
}

impl OverrideManager {
    pub fn new(store: Arc<dyn RecordStore>, audit: Arc<dyn AuditSink>) -> Self {
        Self { store, audit }
    }

    /// Applies an override on top of any existing one.
    ///
    /// Fields left out of `fields` keep their previously overridden value.
    /// Validation runs in a fixed order so callers see stable error
    /// reporting: blank reason, then per-field range checks, then
    /// consistency between the merged amounts. The record status is never
    /// touched; an override is a data correction, not a lifecycle event.
    pub async fn apply(
        &self,
        record_id: Uuid,
        fields: &OverrideFields,
        reason: &str,
        actor: Uuid,
    ) -> VerificationResult<VerificationRecord> {
        if reason.trim().is_empty() {
            return Err(VerificationError::validation(
                "reason",
                "an override reason is required",
            ));
        }
        if fields.is_empty() {
            return Err(VerificationError::validation(
                "override",
                "at least one override field is required",
            ));
        }
        validate_ranges(fields)?;

        let record = self.store.get(record_id).await?;
        let previous = record.result.override_.clone();
        let merged = merge_fields(previous.as_ref(), fields);
        check_consistency(&merged)?;

        let override_ = DeductibleOverride {
            deductible_met: merged.deductible_met,
            oop_met: merged.oop_met,
            deductible_amount: merged.deductible_amount,
            oop_max_amount: merged.oop_max_amount,
            reason: reason.trim().to_string(),
            overridden_by: actor,
            overridden_at: Utc::now(),
            source: MANUAL_SOURCE.to_string(),
        };

        let record = self
            .store
            .merge_section(record_id, OutcomeSection::Override(override_.clone()))
            .await?;

        emit::audit(
            &self.audit,
            "verification.override.applied",
            record_id,
            Some(actor),
            json!({
                "reason": override_.reason,
                "changes": changed_fields(previous.as_ref(), &override_),
            }),
        )
        .await;

        Ok(record)
    }
}

/// Per-field range validation in a fixed field order: first every field is
/// checked non-negative and finite, then every field against the cap.
fn validate_ranges(fields: &OverrideFields) -> VerificationResult<()> {
    for (name, value) in named_fields(fields) {
        if let Some(value) = value {
            if !value.is_finite() || value < 0.0 {
                return Err(VerificationError::validation(
                    name,
                    "must be a non-negative amount",
                ));
            }
        }
    }
    for (name, value) in named_fields(fields) {
        if let Some(value) = value {
            validate_monetary(name, value)?;
        }
    }
    Ok(())
}

fn named_fields(fields: &OverrideFields) -> [(&'static str, Option<f64>); 4] {
    [
        ("deductibleMet", fields.deductible_met),
        ("oopMet", fields.oop_met),
        ("deductibleAmount", fields.deductible_amount),
        ("oopMaxAmount", fields.oop_max_amount),
    ]
}

fn merge_fields(previous: Option<&DeductibleOverride>, fields: &OverrideFields) -> OverrideFields {
    OverrideFields {
        deductible_met: fields
            .deductible_met
            .or(previous.and_then(|p| p.deductible_met)),
        oop_met: fields.oop_met.or(previous.and_then(|p| p.oop_met)),
        deductible_amount: fields
            .deductible_amount
            .or(previous.and_then(|p| p.deductible_amount)),
        oop_max_amount: fields
            .oop_max_amount
            .or(previous.and_then(|p| p.oop_max_amount)),
    }
}

/// Consistency holds on the merged values: progress toward a threshold can
/// never exceed the threshold itself.
fn check_consistency(merged: &OverrideFields) -> VerificationResult<()> {
    if let (Some(met), Some(amount)) = (merged.deductible_met, merged.deductible_amount) {
        if met > amount {
            return Err(VerificationError::business_rule(
                "deductibleMet",
                "deductible met cannot exceed the deductible amount",
            ));
        }
    }
    if let (Some(met), Some(max)) = (merged.oop_met, merged.oop_max_amount) {
        if met > max {
            return Err(VerificationError::business_rule(
                "oopMet",
                "out-of-pocket met cannot exceed the out-of-pocket maximum",
            ));
        }
    }
    Ok(())
}

/// Previous/new pairs for every field whose value actually changed.
fn changed_fields(
    previous: Option<&DeductibleOverride>,
    applied: &DeductibleOverride,
) -> serde_json::Value {
    let pairs = [
        (
            "deductibleMet",
            previous.and_then(|p| p.deductible_met),
            applied.deductible_met,
        ),
        (
            "oopMet",
            previous.and_then(|p| p.oop_met),
            applied.oop_met,
        ),
        (
            "deductibleAmount",
            previous.and_then(|p| p.deductible_amount),
            applied.deductible_amount,
        ),
        (
            "oopMaxAmount",
            previous.and_then(|p| p.oop_max_amount),
            applied.oop_max_amount,
        ),
    ];

    let mut changes = serde_json::Map::new();
    for (name, old, new) in pairs {
        if old != new {
            changes.insert(name.to_string(), json!({ "previous": old, "new": new }));
        }
    }
    serde_json::Value::Object(changes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MONETARY_CAP;
    use crate::store::InMemoryRecordStore;
    use audit_engine::MemoryAuditSink;

    struct Harness {
        store: Arc<InMemoryRecordStore>,
        audit: MemoryAuditSink,
        manager: OverrideManager,
    }

    impl Harness {
        fn new() -> Self {
            let store = Arc::new(InMemoryRecordStore::new());
            let audit = MemoryAuditSink::default();
            let manager = OverrideManager::new(store.clone(), Arc::new(audit.clone()));
            Self {
                store,
                audit,
                manager,
            }
        }

        async fn record(&self) -> VerificationRecord {
            self.store
                .insert(VerificationRecord::new(Uuid::new_v4()))
                .await
                .unwrap()
        }
    }

    fn met_only(value: f64) -> OverrideFields {
        OverrideFields {
            deductible_met: Some(value),
            oop_met: None,
            deductible_amount: None,
            oop_max_amount: None,
        }
    }

    #[tokio::test]
    async fn test_apply_records_override_without_status_change() {
        let harness = Harness::new();
        let record = harness.record().await;
        let actor = Uuid::new_v4();

        let fields = OverrideFields {
            deductible_met: Some(350.0),
            oop_met: Some(350.0),
            deductible_amount: Some(1500.0),
            oop_max_amount: Some(6000.0),
        };
        let updated = harness
            .manager
            .apply(record.id, &fields, "payer portal shows newer accumulators", actor)
            .await
            .unwrap();

        assert_eq!(updated.status, record.status);
        let applied = updated.result.override_.as_ref().unwrap();
        assert_eq!(applied.deductible_met, Some(350.0));
        assert_eq!(applied.overridden_by, actor);
        assert_eq!(applied.source, "manual");

        let audits = harness
            .audit
            .events_for_action("verification.override.applied");
        assert_eq!(audits.len(), 1);
        assert_eq!(audits[0].actor_id, Some(actor));
        assert_eq!(
            audits[0].details["changes"]["deductibleMet"]["new"],
            350.0
        );
        assert!(audits[0].details["changes"]["deductibleMet"]["previous"].is_null());
    }

    #[tokio::test]
    async fn test_merge_preserves_untouched_fields() {
        let harness = Harness::new();
        let record = harness.record().await;
        let actor = Uuid::new_v4();

        let first = OverrideFields {
            deductible_met: Some(350.0),
            oop_met: None,
            deductible_amount: Some(1500.0),
            oop_max_amount: None,
        };
        harness
            .manager
            .apply(record.id, &first, "initial correction", actor)
            .await
            .unwrap();

        let updated = harness
            .manager
            .apply(record.id, &met_only(500.0), "new EOB arrived", actor)
            .await
            .unwrap();

        let applied = updated.result.override_.as_ref().unwrap();
        assert_eq!(applied.deductible_met, Some(500.0));
        assert_eq!(applied.deductible_amount, Some(1500.0));

        // Only the changed field shows up in the second audit entry.
        let audits = harness
            .audit
            .events_for_action("verification.override.applied");
        assert_eq!(audits.len(), 2);
        let changes = audits[1].details["changes"].as_object().unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes["deductibleMet"]["previous"], 350.0);
        assert_eq!(changes["deductibleMet"]["new"], 500.0);
    }

    #[tokio::test]
    async fn test_blank_reason_rejected_first() {
        let harness = Harness::new();
        let record = harness.record().await;

        let err = harness
            .manager
            .apply(record.id, &met_only(-10.0), "   ", Uuid::new_v4())
            .await
            .unwrap_err();

        match err {
            VerificationError::Validation { field, .. } => assert_eq!(field, "reason"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_fields_rejected() {
        let harness = Harness::new();
        let record = harness.record().await;

        let empty = OverrideFields {
            deductible_met: None,
            oop_met: None,
            deductible_amount: None,
            oop_max_amount: None,
        };
        let err = harness
            .manager
            .apply(record.id, &empty, "no-op", Uuid::new_v4())
            .await
            .unwrap_err();

        assert!(matches!(err, VerificationError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_negative_amount_rejected_before_cap() {
        let harness = Harness::new();
        let record = harness.record().await;

        let fields = OverrideFields {
            deductible_met: Some(-1.0),
            oop_met: Some(MONETARY_CAP * 2.0),
            deductible_amount: None,
            oop_max_amount: None,
        };
        let err = harness
            .manager
            .apply(record.id, &fields, "bad input", Uuid::new_v4())
            .await
            .unwrap_err();

        match err {
            VerificationError::Validation { field, message } => {
                assert_eq!(field, "deductibleMet");
                assert!(message.contains("non-negative"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cap_enforced() {
        let harness = Harness::new();
        let record = harness.record().await;

        let err = harness
            .manager
            .apply(
                record.id,
                &met_only(MONETARY_CAP + 1.0),
                "typo",
                Uuid::new_v4(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, VerificationError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_consistency_checked_on_merged_values() {
        let harness = Harness::new();
        let record = harness.record().await;
        let actor = Uuid::new_v4();

        let first = OverrideFields {
            deductible_met: None,
            oop_met: None,
            deductible_amount: Some(1000.0),
            oop_max_amount: None,
        };
        harness
            .manager
            .apply(record.id, &first, "set plan deductible", actor)
            .await
            .unwrap();

        // 1200 met against the previously overridden 1000 amount.
        let err = harness
            .manager
            .apply(record.id, &met_only(1200.0), "new EOB", actor)
            .await
            .unwrap_err();

        match err {
            VerificationError::BusinessRule { field, .. } => {
                assert_eq!(field, "deductibleMet")
            }
            other => panic!("unexpected error: {other:?}"),
        }

        // The failed apply left the first override untouched.
        let stored = harness.store.get(record.id).await.unwrap();
        let applied = stored.result.override_.as_ref().unwrap();
        assert_eq!(applied.deductible_amount, Some(1000.0));
        assert_eq!(applied.deductible_met, None);
    }

    #[tokio::test]
    async fn test_oop_consistency_within_single_apply() {
        let harness = Harness::new();
        let record = harness.record().await;

        let fields = OverrideFields {
            deductible_met: None,
            oop_met: Some(7000.0),
            deductible_amount: None,
            oop_max_amount: Some(6000.0),
        };
        let err = harness
            .manager
            .apply(record.id, &fields, "mistyped", Uuid::new_v4())
            .await
            .unwrap_err();

        assert!(matches!(err, VerificationError::BusinessRule { .. }));
    }
}
