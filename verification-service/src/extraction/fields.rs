//! Field mapping from raw provider output.
//!
//! Insurance cards label the same field a dozen different ways, so labeled
//! values are matched against per-field synonym lists. When no label
//! identifies the payer, the topmost printed lines are scanned as a
//! heuristic, at a confidence discount.

use std::collections::BTreeMap;

use chrono::Utc;

use super::provider::{LabeledValue, RawExtraction, TextLine};
use crate::models::{CardField, ExtractedField, ExtractionOutcome, FieldSource};

/// How many of the topmost text lines the payer heuristic scans.
const TOP_LINE_SCAN: usize = 5;

/// Confidence multiplier for a payer guessed from card layout rather than a
/// labeled value.
const HEURISTIC_CONFIDENCE_DISCOUNT: f64 = 0.8;

/// Payer names eligible for auto-population. An extracted payer that does not
/// match this list is surfaced for manual confirmation instead.
pub const CANONICAL_PAYERS: &[&str] = &[
    "Aetna",
    "Ambetter",
    "Anthem",
    "Blue Cross Blue Shield",
    "Cigna",
    "EmblemHealth",
    "Humana",
    "Kaiser Permanente",
    "Medicaid",
    "Medicare",
    "Molina Healthcare",
    "Oscar Health",
    "Tricare",
    "UMR",
    "UnitedHealthcare",
    "WellCare",
];

pub fn is_canonical_payer(name: &str) -> bool {
    let name = name.trim();
    CANONICAL_PAYERS.iter().any(|p| p.eq_ignore_ascii_case(name))
}

/// First canonical payer whose name appears anywhere in `text`.
fn canonical_payer_in(text: &str) -> Option<&'static str> {
    let lowered = text.to_lowercase();
    CANONICAL_PAYERS
        .iter()
        .find(|p| lowered.contains(&p.to_lowercase()))
        .copied()
}

/// Label synonyms, already in normalized form.
fn label_synonyms(field: CardField) -> &'static [&'static str] {
    match field {
        CardField::MemberId => &[
            "member id",
            "member no",
            "member number",
            "subscriber id",
            "id number",
            "identification number",
            "enrollee id",
        ],
        CardField::GroupNumber => &[
            "group number",
            "group no",
            "group id",
            "plan group",
            "grp no",
            "grp",
            "group",
        ],
        CardField::PayerName => &[
            "payer",
            "payer name",
            "insurance company",
            "insurance plan",
            "plan name",
            "carrier",
            "insurer",
        ],
        CardField::SubscriberName => &[
            "subscriber name",
            "member name",
            "insured name",
            "name of insured",
            "patient name",
            "subscriber",
        ],
    }
}

/// Lowercases and strips punctuation so "Member ID:" and "MEMBER-ID" compare
/// equal.
fn normalize_label(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    for ch in label.chars() {
        if ch.is_alphanumeric() {
            out.extend(ch.to_lowercase());
        } else if !out.ends_with(' ') {
            out.push(' ');
        }
    }
    out.trim().to_string()
}

fn extracted(value: &LabeledValue) -> ExtractedField {
    ExtractedField {
        value: value.value.trim().to_string(),
        confidence_score: value.confidence,
        source: FieldSource::Ocr,
    }
}

/// Maps labeled values onto card fields.
///
/// Exact synonym matches claim their label first so a loose containment
/// match cannot steal it for another field ("Subscriber ID" must land on the
/// member id, not on the subscriber name). Each label feeds at most one
/// field; blank values are ignored. A missing payer falls back to the
/// top-line heuristic.
pub fn collect_fields(raw: &RawExtraction) -> BTreeMap<CardField, ExtractedField> {
    let mut fields = BTreeMap::new();
    let mut claimed = vec![false; raw.labeled_values.len()];
    let normalized: Vec<String> = raw
        .labeled_values
        .iter()
        .map(|lv| normalize_label(&lv.label))
        .collect();

    for field in CardField::ALL {
        for (idx, label) in normalized.iter().enumerate() {
            if claimed[idx] || raw.labeled_values[idx].value.trim().is_empty() {
                continue;
            }
            if label_synonyms(field).iter().any(|s| label.as_str() == *s) {
                claimed[idx] = true;
                fields.insert(field, extracted(&raw.labeled_values[idx]));
                break;
            }
        }
    }

    for field in CardField::ALL {
        if fields.contains_key(&field) {
            continue;
        }
        for (idx, label) in normalized.iter().enumerate() {
            if claimed[idx] || raw.labeled_values[idx].value.trim().is_empty() {
                continue;
            }
            if label_synonyms(field).iter().any(|s| label.contains(s)) {
                claimed[idx] = true;
                fields.insert(field, extracted(&raw.labeled_values[idx]));
                break;
            }
        }
    }

    if !fields.contains_key(&CardField::PayerName) {
        if let Some(guess) = payer_from_lines(&raw.lines) {
            fields.insert(CardField::PayerName, guess);
        }
    }

    fields
}

/// Guesses the payer from the topmost printed lines.
///
/// A known insurer name anywhere in a top line wins at full line confidence.
/// Otherwise the first plausible line is taken at a 20% confidence discount,
/// since card layout puts the insurer at the top but nothing guarantees it.
fn payer_from_lines(lines: &[TextLine]) -> Option<ExtractedField> {
    for line in lines.iter().take(TOP_LINE_SCAN) {
        if let Some(canonical) = canonical_payer_in(&line.text) {
            return Some(ExtractedField {
                value: canonical.to_string(),
                confidence_score: line.confidence,
                source: FieldSource::OcrHeuristic,
            });
        }
    }

    lines
        .iter()
        .take(TOP_LINE_SCAN)
        .find(|line| is_plausible_name(&line.text))
        .map(|line| ExtractedField {
            value: line.text.trim().to_string(),
            confidence_score: line.confidence * HEURISTIC_CONFIDENCE_DISCOUNT,
            source: FieldSource::OcrHeuristic,
        })
}

fn is_plausible_name(text: &str) -> bool {
    let trimmed = text.trim();
    trimmed.len() >= 4 && trimmed.chars().any(|c| c.is_alphabetic())
}

/// Builds the extraction section from raw provider output.
///
/// `needs_review` is set when any extracted field falls below the confidence
/// threshold; the low-confidence fields are listed in card-field order.
pub fn build_outcome(raw: &RawExtraction, confidence_threshold: f64) -> ExtractionOutcome {
    let fields = collect_fields(raw);
    let low_confidence_fields: Vec<CardField> = fields
        .iter()
        .filter(|(_, f)| f.confidence_score < confidence_threshold)
        .map(|(field, _)| *field)
        .collect();
    let needs_review = !low_confidence_fields.is_empty();

    ExtractionOutcome {
        fields,
        low_confidence_fields,
        needs_review,
        extracted_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labeled(label: &str, value: &str, confidence: f64) -> LabeledValue {
        LabeledValue {
            label: label.to_string(),
            value: value.to_string(),
            confidence,
        }
    }

    fn line(text: &str, confidence: f64) -> TextLine {
        TextLine {
            text: text.to_string(),
            confidence,
        }
    }

    #[test]
    fn test_normalize_label() {
        assert_eq!(normalize_label("Member ID:"), "member id");
        assert_eq!(normalize_label("GROUP-NO."), "group no");
        assert_eq!(normalize_label("  Grp#  "), "grp");
    }

    #[test]
    fn test_exact_match_claims_before_containment() {
        let raw = RawExtraction {
            labeled_values: vec![
                labeled("Subscriber ID", "W123456789", 96.0),
                labeled("Member Name", "JANE DOE", 91.0),
            ],
            lines: vec![],
        };

        let fields = collect_fields(&raw);
        assert_eq!(fields[&CardField::MemberId].value, "W123456789");
        assert_eq!(fields[&CardField::SubscriberName].value, "JANE DOE");
    }

    #[test]
    fn test_containment_fallback() {
        let raw = RawExtraction {
            labeled_values: vec![labeled("Rx Group", "GRP-4417", 88.0)],
            lines: vec![],
        };

        let fields = collect_fields(&raw);
        assert_eq!(fields[&CardField::GroupNumber].value, "GRP-4417");
    }

    #[test]
    fn test_blank_values_ignored() {
        let raw = RawExtraction {
            labeled_values: vec![labeled("Member ID", "   ", 99.0)],
            lines: vec![],
        };

        assert!(collect_fields(&raw).is_empty());
    }

    #[test]
    fn test_labeled_payer_wins_over_heuristic() {
        let raw = RawExtraction {
            labeled_values: vec![labeled("Insurance Company", "Cigna", 94.0)],
            lines: vec![line("UnitedHealthcare", 99.0)],
        };

        let fields = collect_fields(&raw);
        let payer = &fields[&CardField::PayerName];
        assert_eq!(payer.value, "Cigna");
        assert_eq!(payer.source, FieldSource::Ocr);
    }

    #[test]
    fn test_payer_heuristic_matches_known_insurer() {
        let raw = RawExtraction {
            labeled_values: vec![],
            lines: vec![
                line("BlueCross", 40.0),
                line("UNITEDHEALTHCARE Choice Plus", 97.5),
            ],
        };

        let fields = collect_fields(&raw);
        let payer = &fields[&CardField::PayerName];
        assert_eq!(payer.value, "UnitedHealthcare");
        assert_eq!(payer.confidence_score, 97.5);
        assert_eq!(payer.source, FieldSource::OcrHeuristic);
    }

    #[test]
    fn test_payer_heuristic_discounts_unrecognized_top_line() {
        let raw = RawExtraction {
            labeled_values: vec![],
            lines: vec![line("ab", 99.0), line("Acme Mutual Health", 90.0)],
        };

        let fields = collect_fields(&raw);
        let payer = &fields[&CardField::PayerName];
        assert_eq!(payer.value, "Acme Mutual Health");
        assert!((payer.confidence_score - 72.0).abs() < 1e-9);
        assert_eq!(payer.source, FieldSource::OcrHeuristic);
    }

    #[test]
    fn test_heuristic_only_scans_top_lines() {
        let mut lines: Vec<TextLine> = (0..TOP_LINE_SCAN).map(|_| line("##", 10.0)).collect();
        lines.push(line("Aetna", 99.0));

        let raw = RawExtraction {
            labeled_values: vec![],
            lines,
        };

        assert!(collect_fields(&raw).is_empty());
    }

    #[test]
    fn test_canonical_payer_check_is_case_insensitive() {
        assert!(is_canonical_payer("aetna"));
        assert!(is_canonical_payer("  Kaiser Permanente "));
        assert!(!is_canonical_payer("Acme Mutual Health"));
    }

    #[test]
    fn test_outcome_flags_low_confidence_fields() {
        let raw = RawExtraction {
            labeled_values: vec![
                labeled("Member ID", "W123456789", 95.0),
                labeled("Group Number", "GRP-4417", 70.0),
            ],
            lines: vec![],
        };

        let outcome = build_outcome(&raw, 85.0);
        assert!(outcome.needs_review);
        assert_eq!(outcome.low_confidence_fields, vec![CardField::GroupNumber]);
        assert_eq!(outcome.fields.len(), 2);
    }

    #[test]
    fn test_outcome_with_no_fields_does_not_need_review() {
        let outcome = build_outcome(&RawExtraction::default(), 85.0);
        assert!(!outcome.needs_review);
        assert!(outcome.fields.is_empty());
        assert!(outcome.low_confidence_fields.is_empty());
    }
}
