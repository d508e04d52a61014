//! Payer eligibility providers.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{VerificationError, VerificationResult};
use crate::models::CoverageSummary;

/// Identifier set sent to a payer eligibility API.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EligibilityRequest {
    pub payer_name: String,
    pub member_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_number: Option<String>,
}

/// Raw determination returned by a payer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderVerification {
    pub status: String,
    #[serde(default)]
    pub eligible: Option<bool>,
    #[serde(default)]
    pub coverage: Option<CoverageSummary>,
    #[serde(default)]
    pub error: Option<ProviderIssue>,
    #[serde(default)]
    pub reference_id: Option<String>,
}

/// Provider-reported problem attached to a determination.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderIssue {
    pub code: String,
    pub message: String,
}

/// Verifies coverage with one payer integration.
#[async_trait]
pub trait EligibilityProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn verify(
        &self,
        request: &EligibilityRequest,
    ) -> VerificationResult<ProviderVerification>;
}

/// HTTP client for a hosted eligibility clearinghouse.
pub struct HttpEligibilityProvider {
    name: String,
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpEligibilityProvider {
    pub fn new(name: String, base_url: String, api_key: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        Self {
            name,
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }
}

#[async_trait]
impl EligibilityProvider for HttpEligibilityProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn verify(
        &self,
        request: &EligibilityRequest,
    ) -> VerificationResult<ProviderVerification> {
        let url = format!("{}/v1/eligibility/verify", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let retryable =
                status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS;
            return Err(VerificationError::provider(
                "PROVIDER_ERROR",
                format!("{} returned {}: {}", self.name, status, body),
                retryable,
            ));
        }

        Ok(response.json::<ProviderVerification>().await?)
    }
}
