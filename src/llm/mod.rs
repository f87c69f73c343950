//! Inference backends.
//!
//! Two capabilities are consumed by the taggers:
//! - [`LlmProvider`]: chat completion for a single conversation
//! - [`EmbeddingProvider`]: one embedding vector for one text
//!
//! [`ApiClient`] implements both against an OpenAI-compatible HTTP API and is
//! wrapped in a [`RetryPolicy`] by the remote tagger. [`LocalEngine`] is the
//! batched counterpart for a locally served model: every call takes the whole
//! batch and returns one output per input, in input order.

pub mod client;
pub mod local;
pub mod retry;
pub mod template;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::BackendError;

pub use client::ApiClient;
pub use local::{HttpLocalEngine, LocalEngine, SamplingParams};
pub use retry::RetryPolicy;
pub use template::{ChatTemplate, DEFAULT_CHAT_TEMPLATE};

/// A message in a conversation with an LLM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender ("system", "user" or "assistant").
    pub role: String,
    /// Content of the message.
    pub content: String,
}

impl Message {
    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Template switches forwarded to the serving engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTemplateKwargs {
    /// Let reasoning models emit a thinking block before the answer.
    pub enable_thinking: bool,
}

/// Request for text generation from an LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Model identifier to use for generation.
    pub model: String,
    /// Conversation messages.
    pub messages: Vec<Message>,
    /// Maximum number of tokens to generate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Sampling temperature (0.0 - 2.0).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repetition_penalty: Option<f64>,
    /// Sequences that end generation. Not included in the returned text.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_template_kwargs: Option<ChatTemplateKwargs>,
}

impl GenerationRequest {
    /// Create a new generation request with default parameters.
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            max_tokens: None,
            temperature: None,
            repetition_penalty: None,
            stop: Vec::new(),
            chat_template_kwargs: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_repetition_penalty(mut self, penalty: f64) -> Self {
        self.repetition_penalty = Some(penalty);
        self
    }

    pub fn with_stop(mut self, stop: impl Into<String>) -> Self {
        self.stop.push(stop.into());
        self
    }

    pub fn with_thinking(mut self, enable_thinking: bool) -> Self {
        self.chat_template_kwargs = Some(ChatTemplateKwargs { enable_thinking });
        self
    }
}

/// Response from an LLM generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResponse {
    /// Unique identifier for this response.
    #[serde(default)]
    pub id: String,
    /// Model that generated this response.
    #[serde(default)]
    pub model: String,
    /// Generated choices/completions.
    pub choices: Vec<Choice>,
    /// Token usage statistics, when the server reports them.
    #[serde(default)]
    pub usage: Option<Usage>,
}

impl GenerationResponse {
    /// Get the content of the first choice, if available.
    pub fn first_content(&self) -> Option<&str> {
        self.choices.first().map(|c| c.message.content.as_str())
    }
}

/// A single generated choice from the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub index: u32,
    pub message: Message,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Token usage statistics for a generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Trait for providers that can generate text.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate a response for the given request.
    async fn generate(&self, request: GenerationRequest)
        -> Result<GenerationResponse, BackendError>;
}

/// Trait for providers that can embed text.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text into a vector.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization_skips_unset_fields() {
        let request = GenerationRequest::new("m", vec![Message::user("hi")]);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "m");
        assert!(json.get("stop").is_none());
        assert!(json.get("temperature").is_none());
        assert!(json.get("chat_template_kwargs").is_none());
    }

    #[test]
    fn test_request_builder() {
        let request = GenerationRequest::new(
            "m",
            vec![Message::user("rate this"), Message::assistant("{")],
        )
        .with_max_tokens(2048)
        .with_temperature(0.8)
        .with_repetition_penalty(1.0)
        .with_stop("}")
        .with_thinking(false);

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["messages"][1]["role"], "assistant");
        assert_eq!(json["messages"][1]["content"], "{");
        assert_eq!(json["stop"], serde_json::json!(["}"]));
        assert_eq!(json["chat_template_kwargs"]["enable_thinking"], false);
        assert_eq!(json["max_tokens"], 2048);
    }

    #[test]
    fn test_response_without_usage() {
        let body = r#"{"choices": [{"message": {"role": "assistant", "content": "\"a\": 1"}}]}"#;
        let response: GenerationResponse = serde_json::from_str(body).unwrap();
        assert_eq!(response.first_content(), Some("\"a\": 1"));
        assert!(response.usage.is_none());
    }
}
