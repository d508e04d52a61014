//! Card extraction providers.
//!
//! A provider turns card images into raw labeled values and text lines.
//! Field mapping and confidence gating happen downstream in `fields`.

use std::time::Duration;

use async_trait::async_trait;
use error_common::codes::extraction as codes;
use serde::{Deserialize, Serialize};

use crate::models::CardImageRef;

/// A single label/value pair read off a card image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabeledValue {
    pub label: String,
    pub value: String,
    pub confidence: f64,
}

/// A raw text line, topmost lines first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextLine {
    pub text: String,
    pub confidence: f64,
}

/// Provider output before field mapping.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawExtraction {
    #[serde(default)]
    pub labeled_values: Vec<LabeledValue>,
    #[serde(default)]
    pub lines: Vec<TextLine>,
}

/// Failure classes reported by extraction providers.
///
/// The class decides the retry policy: throttling gets a bounded fixed-delay
/// retry, unclassified failures a smaller one, and timeouts and unrecoverable
/// inputs none at all.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExtractionProviderError {
    #[error("provider unreachable: {0}")]
    Connectivity(String),

    #[error("provider throttled the request: {0}")]
    Throttled(String),

    #[error("extraction timed out")]
    Timeout,

    #[error("{code}: {message}")]
    Unrecoverable { code: String, message: String },

    #[error("extraction failed: {0}")]
    Other(String),
}

impl ExtractionProviderError {
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connectivity(_))
    }

    /// Error code recorded on the verification record when this failure
    /// becomes terminal.
    pub fn failure_code(&self) -> String {
        match self {
            Self::Throttled(_) => codes::PROVIDER_THROTTLED.to_string(),
            Self::Timeout => codes::EXTRACTION_TIMEOUT.to_string(),
            Self::Unrecoverable { code, .. } => code.clone(),
            Self::Connectivity(_) | Self::Other(_) => codes::EXTRACTION_FAILED.to_string(),
        }
    }
}

/// Reads structured fields off insurance card images.
#[async_trait]
pub trait CardFieldExtractor: Send + Sync {
    fn name(&self) -> &str;

    /// Whether calls leave the process boundary. Connectivity failures on a
    /// network-backed primary are eligible for one fallback attempt.
    fn is_network_backed(&self) -> bool;

    async fn extract(
        &self,
        front: &CardImageRef,
        back: Option<&CardImageRef>,
    ) -> Result<RawExtraction, ExtractionProviderError>;
}

/// HTTP client for a hosted vision extraction API.
pub struct VisionExtractionClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl VisionExtractionClient {
    pub fn new(base_url: String, api_key: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }
}

#[async_trait]
impl CardFieldExtractor for VisionExtractionClient {
    fn name(&self) -> &str {
        "vision-ocr"
    }

    fn is_network_backed(&self) -> bool {
        true
    }

    async fn extract(
        &self,
        front: &CardImageRef,
        back: Option<&CardImageRef>,
    ) -> Result<RawExtraction, ExtractionProviderError> {
        let url = format!("{}/v1/card-extract", self.base_url);

        let mut payload = serde_json::json!({
            "frontImage": front.storage_key,
        });
        if let Some(back) = back {
            payload["backImage"] = serde_json::Value::String(back.storage_key.clone());
        }

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&payload)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        response
            .json::<RawExtraction>()
            .await
            .map_err(|e| ExtractionProviderError::Other(format!("response parse error: {}", e)))
    }
}

fn classify_transport_error(err: reqwest::Error) -> ExtractionProviderError {
    if err.is_timeout() {
        ExtractionProviderError::Timeout
    } else if err.is_connect() {
        ExtractionProviderError::Connectivity(err.to_string())
    } else {
        ExtractionProviderError::Other(err.to_string())
    }
}

fn classify_status(status: reqwest::StatusCode, body: String) -> ExtractionProviderError {
    match status {
        reqwest::StatusCode::TOO_MANY_REQUESTS => ExtractionProviderError::Throttled(body),
        reqwest::StatusCode::BAD_REQUEST => ExtractionProviderError::Unrecoverable {
            code: codes::MALFORMED_INPUT.to_string(),
            message: body,
        },
        reqwest::StatusCode::UNSUPPORTED_MEDIA_TYPE => ExtractionProviderError::Unrecoverable {
            code: codes::UNSUPPORTED_DOCUMENT.to_string(),
            message: body,
        },
        reqwest::StatusCode::NOT_FOUND => ExtractionProviderError::Unrecoverable {
            code: codes::INVALID_IMAGE_REF.to_string(),
            message: body,
        },
        _ => ExtractionProviderError::Other(format!("provider error {}: {}", status, body)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let err = classify_status(reqwest::StatusCode::TOO_MANY_REQUESTS, "slow down".into());
        assert!(matches!(err, ExtractionProviderError::Throttled(_)));

        let err = classify_status(reqwest::StatusCode::BAD_REQUEST, "bad".into());
        match err {
            ExtractionProviderError::Unrecoverable { code, .. } => {
                assert_eq!(code, "MALFORMED_INPUT")
            }
            other => panic!("unexpected classification: {:?}", other),
        }

        let err = classify_status(reqwest::StatusCode::INTERNAL_SERVER_ERROR, "boom".into());
        assert!(matches!(err, ExtractionProviderError::Other(_)));
    }

    #[test]
    fn test_failure_codes() {
        assert_eq!(
            ExtractionProviderError::Timeout.failure_code(),
            "EXTRACTION_TIMEOUT"
        );
        assert_eq!(
            ExtractionProviderError::Throttled("x".into()).failure_code(),
            "PROVIDER_THROTTLED"
        );
        assert_eq!(
            ExtractionProviderError::Connectivity("x".into()).failure_code(),
            "EXTRACTION_FAILED"
        );
        assert_eq!(
            ExtractionProviderError::Unrecoverable {
                code: "INVALID_IMAGE_REF".into(),
                message: "gone".into()
            }
            .failure_code(),
            "INVALID_IMAGE_REF"
        );
    }

    #[test]
    fn test_raw_extraction_wire_format() {
        let json = r#"{
            "labeledValues": [
                {"label": "Member ID", "value": "W123456789", "confidence": 96.5}
            ],
            "lines": [
                {"text": "Aetna", "confidence": 99.0}
            ]
        }"#;

        let raw: RawExtraction = serde_json::from_str(json).unwrap();
        assert_eq!(raw.labeled_values.len(), 1);
        assert_eq!(raw.labeled_values[0].value, "W123456789");
        assert_eq!(raw.lines[0].text, "Aetna");

        let empty: RawExtraction = serde_json::from_str("{}").unwrap();
        assert!(empty.labeled_values.is_empty());
        assert!(empty.lines.is_empty());
    }
}
