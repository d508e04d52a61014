use chrono::{DateTime, Utc};
use error_common::ErrorCategory;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::error::{VerificationError, VerificationResult};
use crate::state::VerificationStatus;

/// Upper bound for every monetary field, in dollars.
pub const MONETARY_CAP: f64 = 1_000_000.0;

/// One verification case, owned 1:1 by an onboarding case.
///
/// Identifying fields stay editable while the status allows field edits;
/// `status` itself only moves through declared transitions. `version` is a
/// monotonic sequence bumped on every store write and checked on
/// conditional updates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationRecord {
    pub id: Uuid,
    pub case_id: Uuid,
    pub payer_name: Option<String>,
    pub member_id: Option<String>,
    pub group_number: Option<String>,
    pub subscriber_name: Option<String>,
    pub subscriber_dob: Option<String>,
    pub status: VerificationStatus,
    pub result: VerificationOutcome,
    pub retry_attempts: u32,
    pub verified_at: Option<DateTime<Utc>>,
    pub front_card_image: Option<CardImageRef>,
    pub back_card_image: Option<CardImageRef>,
    pub version: u64,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VerificationRecord {
    pub fn new(case_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            case_id,
            payer_name: None,
            member_id: None,
            group_number: None,
            subscriber_name: None,
            subscriber_dob: None,
            status: VerificationStatus::Pending,
            result: VerificationOutcome::default(),
            retry_attempts: 0,
            verified_at: None,
            front_card_image: None,
            back_card_image: None,
            version: 0,
            expires_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Both fields required before an eligibility call can be placed.
    pub fn has_required_identifiers(&self) -> bool {
        non_blank(&self.payer_name) && non_blank(&self.member_id)
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.map_or(false, |at| at < Utc::now())
    }
}

fn non_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(false, |v| !v.trim().is_empty())
}

/// Opaque handle to a card image in binary storage.
///
/// The pipeline never reads image bytes itself; providers receive the
/// storage key. Purging after settlement is the storage owner's job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardImageRef {
    pub storage_key: String,
    pub uploaded_at: DateTime<Utc>,
}

impl CardImageRef {
    pub fn new(storage_key: impl Into<String>) -> Self {
        Self {
            storage_key: storage_key.into(),
            uploaded_at: Utc::now(),
        }
    }
}

/// Structured result payload with independently mergeable sections.
///
/// Each pipeline writes only its own section; concurrent runs can never
/// clobber a sibling section. Wire keys follow the payload contract
/// (camelCase).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationOutcome {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extraction: Option<ExtractionOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eligibility: Option<EligibilityOutcome>,
    #[serde(rename = "override", skip_serializing_if = "Option::is_none")]
    pub override_: Option<DeductibleOverride>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retry_history: Vec<RetryAttempt>,
}

impl VerificationOutcome {
    /// Current financial progress for downstream estimate readers.
    ///
    /// Manual override values win per field; anything the override leaves
    /// unset falls back to the eligibility coverage breakdown.
    pub fn current_financial_progress(&self) -> Option<FinancialProgress> {
        let coverage = self.eligibility.as_ref().and_then(|e| e.coverage.as_ref());
        let override_ = self.override_.as_ref();
        if override_.is_none() && coverage.is_none() {
            return None;
        }

        let deductible = coverage.and_then(|c| c.deductible.as_ref());
        let oop = coverage.and_then(|c| c.out_of_pocket_max.as_ref());

        Some(FinancialProgress {
            deductible_met: override_
                .and_then(|o| o.deductible_met)
                .or_else(|| deductible.and_then(|d| d.met)),
            oop_met: override_
                .and_then(|o| o.oop_met)
                .or_else(|| oop.and_then(|o| o.met)),
            deductible_amount: override_
                .and_then(|o| o.deductible_amount)
                .or_else(|| deductible.and_then(|d| d.amount)),
            oop_max_amount: override_
                .and_then(|o| o.oop_max_amount)
                .or_else(|| oop.and_then(|o| o.amount)),
            source: if override_.is_some() {
                ProgressSource::Manual
            } else {
                ProgressSource::Eligibility
            },
        })
    }
}

/// Card fields the extraction pipeline targets.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum CardField {
    MemberId,
    GroupNumber,
    PayerName,
    SubscriberName,
}

impl CardField {
    pub const ALL: [CardField; 4] = [
        CardField::MemberId,
        CardField::GroupNumber,
        CardField::PayerName,
        CardField::SubscriberName,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MemberId => "memberId",
            Self::GroupNumber => "groupNumber",
            Self::PayerName => "payerName",
            Self::SubscriberName => "subscriberName",
        }
    }
}

impl fmt::Display for CardField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where an extracted value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldSource {
    Ocr,
    OcrHeuristic,
}

/// One extracted field value with its provider confidence (0-100).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedField {
    pub value: String,
    pub confidence_score: f64,
    pub source: FieldSource,
}

/// Extraction section of the result payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionOutcome {
    pub fields: BTreeMap<CardField, ExtractedField>,
    pub low_confidence_fields: Vec<CardField>,
    pub needs_review: bool,
    pub extracted_at: DateTime<Utc>,
}

/// Eligibility section of the result payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EligibilityOutcome {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eligible: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coverage: Option<CoverageSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<EligibilityError>,
    pub verified_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_reference_id: Option<String>,
}

/// Coverage breakdown reported by the eligibility provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub copay: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deductible: Option<ThresholdProgress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coinsurance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub out_of_pocket_max: Option<ThresholdProgress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effective_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub termination_date: Option<String>,
}

/// An annual spending threshold and the amount met against it.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdProgress {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub met: Option<f64>,
}

/// Structured eligibility failure stored on the record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EligibilityError {
    pub code: String,
    pub category: ErrorCategory,
    pub message: String,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
}

/// Manual correction of financial progress, latest write wins.
///
/// History of earlier overrides lives in the audit trail only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeductibleOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deductible_met: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oop_met: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deductible_amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oop_max_amount: Option<f64>,
    pub reason: String,
    pub overridden_by: Uuid,
    pub overridden_at: DateTime<Utc>,
    pub source: String,
}

/// One failed eligibility attempt in the retry history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryAttempt {
    pub attempt_number: u32,
    pub error_code: String,
    pub occurred_at: DateTime<Utc>,
}

/// Resolved financial progress, combining override and coverage data.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinancialProgress {
    pub deductible_met: Option<f64>,
    pub oop_met: Option<f64>,
    pub deductible_amount: Option<f64>,
    pub oop_max_amount: Option<f64>,
    pub source: ProgressSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressSource {
    Manual,
    Eligibility,
}

/// Partial update of manually entered card fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManualFieldUpdate {
    pub payer_name: Option<String>,
    pub member_id: Option<String>,
    pub group_number: Option<String>,
    pub subscriber_name: Option<String>,
    pub subscriber_dob: Option<String>,
}

impl ManualFieldUpdate {
    pub fn is_empty(&self) -> bool {
        self.payer_name.is_none()
            && self.member_id.is_none()
            && self.group_number.is_none()
            && self.subscriber_name.is_none()
            && self.subscriber_dob.is_none()
    }

    /// Whether this update changes fields sent to the eligibility provider.
    /// Such edits invalidate any cached eligibility result.
    pub fn touches_identity(&self) -> bool {
        self.payer_name.is_some() || self.member_id.is_some() || self.group_number.is_some()
    }
}

/// Requested override values, any non-empty subset.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverrideFields {
    pub deductible_met: Option<f64>,
    pub oop_met: Option<f64>,
    pub deductible_amount: Option<f64>,
    pub oop_max_amount: Option<f64>,
}

impl OverrideFields {
    pub fn is_empty(&self) -> bool {
        self.deductible_met.is_none()
            && self.oop_met.is_none()
            && self.deductible_amount.is_none()
            && self.oop_max_amount.is_none()
    }
}

/// Check a single monetary value against the global bounds.
pub fn validate_monetary(field: &str, value: f64) -> VerificationResult<()> {
    if !value.is_finite() {
        return Err(VerificationError::validation(field, "must be a finite number"));
    }
    if value < 0.0 {
        return Err(VerificationError::validation(field, "must be non-negative"));
    }
    if value > MONETARY_CAP {
        return Err(VerificationError::validation(
            field,
            "exceeds the maximum allowed amount",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_record_starts_pending_and_empty() {
        let record = VerificationRecord::new(Uuid::new_v4());
        assert_eq!(record.status, VerificationStatus::Pending);
        assert!(record.result.extraction.is_none());
        assert!(record.result.eligibility.is_none());
        assert!(record.result.override_.is_none());
        assert!(record.result.retry_history.is_empty());
        assert_eq!(record.version, 0);
        assert!(!record.has_required_identifiers());
    }

    #[test]
    fn required_identifiers_need_both_fields_non_blank() {
        let mut record = VerificationRecord::new(Uuid::new_v4());
        record.payer_name = Some("Aetna".to_string());
        assert!(!record.has_required_identifiers());

        record.member_id = Some("   ".to_string());
        assert!(!record.has_required_identifiers());

        record.member_id = Some("MEM123456".to_string());
        assert!(record.has_required_identifiers());
    }

    #[test]
    fn monetary_validation_rejects_out_of_range() {
        assert!(validate_monetary("copay", 0.0).is_ok());
        assert!(validate_monetary("copay", MONETARY_CAP).is_ok());
        assert!(validate_monetary("copay", -0.01).is_err());
        assert!(validate_monetary("copay", MONETARY_CAP + 1.0).is_err());
        assert!(validate_monetary("copay", f64::NAN).is_err());
    }

    #[test]
    fn financial_progress_prefers_override_per_field() {
        let mut outcome = VerificationOutcome::default();
        outcome.eligibility = Some(EligibilityOutcome {
            eligible: Some(true),
            coverage: Some(CoverageSummary {
                deductible: Some(ThresholdProgress {
                    amount: Some(2_000.0),
                    met: Some(250.0),
                }),
                out_of_pocket_max: Some(ThresholdProgress {
                    amount: Some(8_000.0),
                    met: Some(250.0),
                }),
                ..CoverageSummary::default()
            }),
            error: None,
            verified_at: Utc::now(),
            provider_reference_id: None,
        });
        outcome.override_ = Some(DeductibleOverride {
            deductible_met: Some(1_500.0),
            oop_met: None,
            deductible_amount: None,
            oop_max_amount: None,
            reason: "EOB received".to_string(),
            overridden_by: Uuid::new_v4(),
            overridden_at: Utc::now(),
            source: "manual".to_string(),
        });

        let progress = outcome.current_financial_progress().unwrap();
        assert_eq!(progress.deductible_met, Some(1_500.0));
        assert_eq!(progress.oop_met, Some(250.0));
        assert_eq!(progress.deductible_amount, Some(2_000.0));
        assert_eq!(progress.source, ProgressSource::Manual);
    }

    #[test]
    fn financial_progress_absent_without_data() {
        assert!(VerificationOutcome::default()
            .current_financial_progress()
            .is_none());
    }

    #[test]
    fn override_section_serializes_under_wire_name() {
        let mut outcome = VerificationOutcome::default();
        outcome.override_ = Some(DeductibleOverride {
            deductible_met: Some(10.0),
            oop_met: None,
            deductible_amount: None,
            oop_max_amount: None,
            reason: "correction".to_string(),
            overridden_by: Uuid::new_v4(),
            overridden_at: Utc::now(),
            source: "manual".to_string(),
        });

        let json = serde_json::to_value(&outcome).unwrap();
        assert!(json.get("override").is_some());
        assert_eq!(json["override"]["deductibleMet"], 10.0);
        assert_eq!(json["override"]["source"], "manual");
    }

    #[test]
    fn card_field_wire_names_are_camel_case() {
        assert_eq!(CardField::MemberId.as_str(), "memberId");
        let json = serde_json::to_string(&CardField::GroupNumber).unwrap();
        assert_eq!(json, "\"groupNumber\"");
    }
}
