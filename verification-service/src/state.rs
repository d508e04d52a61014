//! Verification lifecycle state machine
//!
//! Ten states with direction-sensitive transitions. A record's status only
//! ever changes through a declared transition; anything else is a
//! state-conflict error. The table lives in [`VerificationStatus::can_transition_to`].

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{VerificationError, VerificationResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Pending,
    InProgress,
    OcrComplete,
    OcrNeedsReview,
    ManualEntry,
    ManualEntryComplete,
    Verified,
    Failed,
    ManualReview,
    SelfPay,
}

impl VerificationStatus {
    pub const ALL: [VerificationStatus; 10] = [
        VerificationStatus::Pending,
        VerificationStatus::InProgress,
        VerificationStatus::OcrComplete,
        VerificationStatus::OcrNeedsReview,
        VerificationStatus::ManualEntry,
        VerificationStatus::ManualEntryComplete,
        VerificationStatus::Verified,
        VerificationStatus::Failed,
        VerificationStatus::ManualReview,
        VerificationStatus::SelfPay,
    ];

    /// Declared transition table.
    ///
    /// Sources: pipeline start, pipeline completion branches, manual entry
    /// completion, retry re-triggers, the automatic failed-to-review
    /// escalation, self-pay opt-out from any non-running state, and the
    /// two self-pay opt-in returns.
    pub fn can_transition_to(self, to: VerificationStatus) -> bool {
        use VerificationStatus::*;
        match (self, to) {
            (Pending, InProgress | ManualEntry) => true,
            (InProgress, OcrComplete | OcrNeedsReview | Verified | Failed | ManualReview) => true,
            (OcrComplete | OcrNeedsReview | ManualEntry, ManualEntryComplete) => true,
            (ManualEntryComplete | Failed | ManualReview, InProgress) => true,
            (Failed, ManualReview) => true,
            (
                Pending | OcrComplete | OcrNeedsReview | ManualEntry | ManualEntryComplete
                | Verified | Failed | ManualReview,
                SelfPay,
            ) => true,
            (SelfPay, Pending | Failed) => true,
            _ => false,
        }
    }

    /// No further automatic pipeline action happens from these states.
    /// `manual_review` stays human-editable and re-triggerable.
    pub fn is_settled(self) -> bool {
        matches!(
            self,
            VerificationStatus::Verified | VerificationStatus::SelfPay | VerificationStatus::ManualReview
        )
    }

    /// Identifying fields accept edits everywhere except mid-run and in
    /// the two fully terminal states.
    pub fn allows_field_edits(self) -> bool {
        !matches!(
            self,
            VerificationStatus::InProgress | VerificationStatus::Verified | VerificationStatus::SelfPay
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::OcrComplete => "ocr_complete",
            Self::OcrNeedsReview => "ocr_needs_review",
            Self::ManualEntry => "manual_entry",
            Self::ManualEntryComplete => "manual_entry_complete",
            Self::Verified => "verified",
            Self::Failed => "failed",
            Self::ManualReview => "manual_review",
            Self::SelfPay => "self_pay",
        }
    }
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Validate one transition, returning a state-conflict error for any pair
/// outside the declared table.
pub fn ensure_transition(
    from: VerificationStatus,
    to: VerificationStatus,
) -> VerificationResult<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(VerificationError::IllegalTransition { from, to })
    }
}
