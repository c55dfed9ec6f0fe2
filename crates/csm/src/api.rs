//! REST API client for the CSM.ai HTTP endpoints.
//!
//! Wraps model submission and model lookup using [`reqwest`]. The service
//! authenticates with the raw API key in the `Authorization` header (no
//! `Bearer` scheme).

use base64::{engine::general_purpose, Engine};
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;

/// Default base URL of the hosted service.
pub const DEFAULT_API_URL: &str = "https://api.3d.csm.ai";

/// HTTP client for the CSM.ai API.
#[derive(Clone)]
pub struct CsmApi {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
}

impl std::fmt::Debug for CsmApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsmApi")
            .field("api_url", &self.api_url)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// Response returned by `POST /v1/models` after accepting an image.
#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    /// Service-assigned model identifier.
    pub id: String,
}

/// Response returned by `GET /v1/models/{id}`.
#[derive(Debug, Deserialize)]
pub struct ModelStatus {
    pub status: String,
    #[serde(default)]
    pub viewer_url: Option<String>,
}

/// Errors from the CSM.ai REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum CsmApiError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The service returned a non-2xx status code.
    #[error("CSM API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body.
        body: String,
    },
}

impl CsmApiError {
    /// The `message` field of an upstream JSON error body, if there is one.
    pub fn upstream_message(&self) -> Option<String> {
        match self {
            Self::ApiError { body, .. } => serde_json::from_str::<serde_json::Value>(body)
                .ok()?
                .get("message")?
                .as_str()
                .filter(|m| !m.is_empty())
                .map(str::to_string),
            Self::Request(_) => None,
        }
    }

    /// Upstream HTTP status, when the service answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::ApiError { status, .. } => Some(*status),
            Self::Request(e) => e.status().map(|s| s.as_u16()),
        }
    }
}

impl CsmApi {
    /// Create a new API client.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `https://api.3d.csm.ai`.
    pub fn new(api_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url, api_key)
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(
        client: reqwest::Client,
        api_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Submit an image for 3D model generation.
    ///
    /// Sends a `POST /v1/models` request with the base64-encoded image and
    /// the URL the service should call on completion.
    pub async fn submit_image(
        &self,
        image: &[u8],
        webhook_url: &str,
    ) -> Result<SubmitResponse, CsmApiError> {
        let body = serde_json::json!({
            "image": general_purpose::STANDARD.encode(image),
            "webhook_url": webhook_url,
        });

        tracing::debug!(
            image_bytes = image.len(),
            webhook_url,
            "Submitting image to CSM API",
        );

        let response = self
            .client
            .post(format!("{}/v1/models", self.api_url))
            .header(AUTHORIZATION, &self.api_key)
            .json(&body)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Fetch the current state of a model.
    ///
    /// Sends a `GET /v1/models/{id}` request.
    pub async fn get_model(&self, model_id: &str) -> Result<ModelStatus, CsmApiError> {
        let response = self
            .client
            .get(format!("{}/v1/models/{}", self.api_url, model_id))
            .header(AUTHORIZATION, &self.api_key)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    // ---- private helpers ----

    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, CsmApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(CsmApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, CsmApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
