//! PHI masking for logs and audit payloads
//!
//! Member IDs, subscriber names, and dates of birth never appear raw in
//! log lines or audit detail blobs. Masked forms keep just enough shape
//! for support work; the correlation hash links events for one identifier
//! without exposing it.

use base64::{engine::general_purpose, Engine as _};
use lazy_static::lazy_static;
use regex::Regex;
use sha2::{Digest, Sha256};

lazy_static! {
    static ref DOB_REGEX: Regex =
        Regex::new(r"\b\d{1,2}[/-]\d{1,2}[/-]\d{2,4}\b|\b\d{4}-\d{2}-\d{2}\b").unwrap();
    static ref ID_TOKEN_REGEX: Regex = Regex::new(r"\b[A-Za-z]{0,3}\d[A-Za-z0-9]{5,}\b").unwrap();
}

/// Short stable hash for correlating events about one identifier.
pub fn correlation_hash(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    let result = hasher.finalize();
    general_purpose::STANDARD.encode(&result[..8])
}

/// Mask an identifier, keeping only the last four characters.
pub fn mask_identifier(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 4 {
        return "****".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{tail}")
}

/// Mask a person name down to its initial.
pub fn mask_name(value: &str) -> String {
    match value.trim().chars().next() {
        Some(initial) => format!("{initial}***"),
        None => "***".to_string(),
    }
}

/// Mask a date of birth in any of the accepted formats.
pub fn mask_dob(value: &str) -> String {
    if DOB_REGEX.is_match(value) {
        DOB_REGEX.replace_all(value, "**/**/****").to_string()
    } else {
        "****".to_string()
    }
}

/// Scrub free text (e.g. raw provider lines) before logging: identifier
/// tokens become correlation tags, dates of birth are masked.
pub fn scrub(text: &str) -> String {
    let without_dobs = DOB_REGEX.replace_all(text, "**/**/****");
    ID_TOKEN_REGEX
        .replace_all(&without_dobs, |caps: &regex::Captures| {
            format!("ID[{}]", correlation_hash(&caps[0]))
        })
        .to_string()
}
