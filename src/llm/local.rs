//! Batched local inference engine.
//!
//! A [`LocalEngine`] receives a whole batch per call. The load-bearing
//! contract is positional: output `i` belongs to input `i`, and exactly one
//! output is returned per input. [`HttpLocalEngine`] talks to a locally
//! served OpenAI-compatible inference server (vLLM and similar), which
//! accepts array inputs and tags every output with its input `index`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::BackendError;

/// Batch inference can take much longer than a single chat call.
const REQUEST_TIMEOUT_SECS: u64 = 1800;

/// Sampling parameters shared by every prompt of a batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SamplingParams {
    pub max_tokens: u32,
    pub temperature: f64,
    pub repetition_penalty: f64,
    pub stop: Vec<String>,
    /// Keep the matched stop sequence at the end of the text.
    pub include_stop_str_in_output: bool,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            max_tokens: 2048,
            temperature: 0.8,
            repetition_penalty: 1.0,
            stop: vec!["}".to_string()],
            include_stop_str_in_output: true,
        }
    }
}

/// A batched inference engine holding one loaded model.
#[async_trait]
pub trait LocalEngine: Send + Sync {
    /// Complete every fully rendered prompt.
    async fn generate(
        &self,
        prompts: &[String],
        params: &SamplingParams,
    ) -> Result<Vec<String>, BackendError>;

    /// Embed every text.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError>;

    /// Score every rendered conversation with a reward head.
    async fn score(&self, prompts: &[String]) -> Result<Vec<f64>, BackendError>;
}

/// Fail unless a batch call produced one output per input.
pub fn ensure_aligned<T>(expected: usize, outputs: &[T]) -> Result<(), BackendError> {
    if outputs.len() != expected {
        return Err(BackendError::BatchMisaligned {
            expected,
            actual: outputs.len(),
        });
    }
    Ok(())
}

/// Adapter for a locally served inference server.
pub struct HttpLocalEngine {
    http_client: Client,
    base_url: String,
    model: String,
    /// Requested embedding size, for models that support truncation.
    dimensions: Option<usize>,
}

impl HttpLocalEngine {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http_client: Client::builder()
                .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()
                .expect("Failed to build HTTP client - system TLS configuration error"),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            dimensions: None,
        }
    }

    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = Some(dimensions);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> Result<R, BackendError>
    where
        B: Serialize + ?Sized,
        R: for<'de> Deserialize<'de>,
    {
        let url = format!("{}{}", self.base_url, path);
        let http_response = self
            .http_client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| BackendError::RequestFailed(e.to_string()))?;

        let status = http_response.status();
        if !status.is_success() {
            let message = http_response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            return Err(BackendError::ApiError {
                code: status.as_u16(),
                message,
            });
        }

        http_response
            .json()
            .await
            .map_err(|e| BackendError::ParseError(format!("Failed to parse {path} response: {e}")))
    }
}

/// Restore input order from server-reported indices.
fn in_input_order<T>(mut items: Vec<(usize, T)>, expected: usize) -> Result<Vec<T>, BackendError> {
    items.sort_by_key(|(index, _)| *index);
    let ordered: Vec<T> = items.into_iter().map(|(_, item)| item).collect();
    ensure_aligned(expected, &ordered)?;
    Ok(ordered)
}

#[async_trait]
impl LocalEngine for HttpLocalEngine {
    async fn generate(
        &self,
        prompts: &[String],
        params: &SamplingParams,
    ) -> Result<Vec<String>, BackendError> {
        if prompts.is_empty() {
            return Ok(Vec::new());
        }
        let request = CompletionRequest {
            model: &self.model,
            prompt: prompts,
            params,
        };
        let response: CompletionResponse = self.post("/v1/completions", &request).await?;
        in_input_order(
            response.choices.into_iter().map(|c| (c.index, c.text)).collect(),
            prompts.len(),
        )
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
            dimensions: self.dimensions,
        };
        let response: EmbeddingResponse = self.post("/v1/embeddings", &request).await?;
        in_input_order(
            response.data.into_iter().map(|d| (d.index, d.embedding)).collect(),
            texts.len(),
        )
    }

    async fn score(&self, prompts: &[String]) -> Result<Vec<f64>, BackendError> {
        if prompts.is_empty() {
            return Ok(Vec::new());
        }
        let request = ClassifyRequest {
            model: &self.model,
            input: prompts,
        };
        let response: ClassifyResponse = self.post("/classify", &request).await?;
        let scored = response
            .data
            .into_iter()
            .map(|d| {
                d.probs
                    .first()
                    .copied()
                    .map(|score| (d.index, score))
                    .ok_or_else(|| BackendError::ParseError("classification without scores".into()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        in_input_order(scored, prompts.len())
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    prompt: &'a [String],
    #[serde(flatten)]
    params: &'a SamplingParams,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    index: usize,
    text: String,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Debug, Serialize)]
struct ClassifyRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct ClassifyResponse {
    data: Vec<ClassifyData>,
}

#[derive(Debug, Deserialize)]
struct ClassifyData {
    index: usize,
    probs: Vec<f64>,
}
