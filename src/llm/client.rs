//! Client for OpenAI-compatible chat completion and embedding APIs.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{EmbeddingProvider, GenerationRequest, GenerationResponse, LlmProvider};
use crate::error::BackendError;

/// Request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 120;

/// A single-attempt HTTP client. Retries are layered on top by
/// [`RetryPolicy`](super::RetryPolicy).
pub struct ApiClient {
    http_client: Client,
    /// Base URL without a trailing slash, e.g. `http://localhost:8000`.
    api_url: String,
    api_key: Option<String>,
    /// Model name sent with every request.
    model: String,
}

impl ApiClient {
    /// Create a client for `api_url`. An empty `api_key` disables auth.
    ///
    /// # Arguments
    ///
    /// * `api_url` - Server root; `/v1/...` paths are appended to it
    /// * `api_key` - Bearer token, if the server requires one
    /// * `model` - Model name sent with every request
    pub fn new(api_url: impl Into<String>, api_key: Option<String>, model: impl Into<String>) -> Self {
        Self {
            http_client: Client::builder()
                .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()
                .expect("Failed to build HTTP client - system TLS configuration error"),
            api_url: api_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Check if an API key is configured.
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Full URL for an API path such as `chat/completions`.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/v1/{}", self.api_url, path.trim_start_matches('/'))
    }

    async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R, BackendError>
    where
        B: Serialize + ?Sized,
        R: for<'de> Deserialize<'de>,
    {
        let mut http_request = self
            .http_client
            .post(self.endpoint(path))
            .header("Content-Type", "application/json");

        if let Some(ref api_key) = self.api_key {
            http_request = http_request.header("Authorization", format!("Bearer {}", api_key));
        }

        let http_response = http_request
            .json(body)
            .send()
            .await
            .map_err(|e| BackendError::RequestFailed(e.to_string()))?;

        let status = http_response.status();
        if !status.is_success() {
            let error_text = http_response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            let message = serde_json::from_str::<ApiErrorResponse>(&error_text)
                .map(|e| e.error.message)
                .unwrap_or(error_text);
            return Err(BackendError::ApiError {
                code: status.as_u16(),
                message,
            });
        }

        http_response
            .json()
            .await
            .map_err(|e| BackendError::ParseError(format!("Failed to parse API response: {}", e)))
    }
}

#[async_trait]
impl LlmProvider for ApiClient {
    async fn generate(
        &self,
        mut request: GenerationRequest,
    ) -> Result<GenerationResponse, BackendError> {
        if request.model.is_empty() {
            request.model = self.model.clone();
        }
        let response: GenerationResponse = self.post_json("chat/completions", &request).await?;
        if response.choices.is_empty() {
            return Err(BackendError::ParseError(
                "response contained no choices".to_string(),
            ));
        }
        Ok(response)
    }
}

#[async_trait]
impl EmbeddingProvider for ApiClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, BackendError> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: text,
        };
        let response: EmbeddingResponse = self.post_json("embeddings", &request).await?;
        response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| BackendError::ParseError("response contained no embedding".to_string()))
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Error response from the API.
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}
