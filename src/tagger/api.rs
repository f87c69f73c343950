use std::ops::Range;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

use super::{count_outcome, prompt_text, SimilarityStage};
use crate::config::TaggerConfig;
use crate::dataset::{field_text, record_meta, Record};
use crate::engine::BatchProcessor;
use crate::error::{BackendError, ConfigError, TaggerError};
use crate::llm::{EmbeddingProvider, GenerationRequest, LlmProvider, Message, RetryPolicy};
use crate::mission::{AnnotationStrategy, InputStyle, Mission};
use crate::progress::ProgressCounters;

/// Annotates records through a remote chat-completion API.
///
/// Every record of a batch gets its own request; requests run concurrently
/// up to the batch size (or an explicit cap) and each result is applied to
/// the record it came from. A request that exhausts its retries leaves that
/// record's fields as they were.
pub struct ApiProcessor {
    strategy: Box<dyn AnnotationStrategy>,
    provider: Arc<dyn LlmProvider>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    similarity: Option<SimilarityStage>,
    retry: RetryPolicy,
    max_concurrency: Option<usize>,
    request: GenerationRequest,
    prompt_field: String,
    output_field: String,
    counters: ProgressCounters,
}

impl ApiProcessor {
    pub fn new(
        mission: Mission,
        provider: Arc<dyn LlmProvider>,
        config: &TaggerConfig,
        counters: ProgressCounters,
    ) -> Self {
        // The model is filled in by the client.
        let request = GenerationRequest::new("", Vec::new())
            .with_max_tokens(config.max_tokens)
            .with_temperature(config.temperature)
            .with_repetition_penalty(config.repetition_penalty)
            .with_stop("}")
            .with_thinking(config.enable_thinking);

        Self {
            strategy: mission.strategy(),
            provider,
            embedder: None,
            similarity: None,
            retry: RetryPolicy::default(),
            max_concurrency: None,
            request,
            prompt_field: config.prompt_field.clone(),
            output_field: config.output_field.clone(),
            counters,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit.max(1));
        self
    }

    /// Enable the EMBEDDING mission.
    pub fn with_embeddings(
        mut self,
        embedder: Arc<dyn EmbeddingProvider>,
        similarity: SimilarityStage,
    ) -> Self {
        self.embedder = Some(embedder);
        self.similarity = Some(similarity);
        self
    }

    fn permits(&self, batch_len: usize) -> usize {
        let limit = self.max_concurrency.unwrap_or(batch_len);
        limit.min(batch_len).max(1)
    }

    /// Complete one prompt, prefilled with `{` and stopped at `}`.
    async fn complete(&self, prompt: String) -> Result<String, BackendError> {
        let mut request = self.request.clone();
        request.messages = vec![Message::user(prompt), Message::assistant("{")];

        self.retry
            .run("chat", || {
                let request = request.clone();
                async move {
                    let response = self.provider.generate(request).await?;
                    response
                        .first_content()
                        .map(str::to_string)
                        .ok_or_else(|| BackendError::ParseError("empty completion".to_string()))
                }
            })
            .await
    }

    async fn annotate(&self, range: &Range<usize>, records: &mut [Record]) {
        let prompts: Vec<Option<String>> = records
            .iter()
            .map(|record| {
                let prompt = field_text(record, &self.prompt_field)?;
                let response = field_text(record, &self.output_field);
                self.strategy.build_prompt(&prompt, response.as_deref())
            })
            .collect();

        let semaphore = Semaphore::new(self.permits(records.len()));
        let tasks = prompts.into_iter().enumerate().map(|(offset, prompt)| {
            let semaphore = &semaphore;
            async move {
                let prompt = prompt?;
                let _permit = semaphore.acquire().await.ok()?;
                Some((offset, self.complete(prompt).await))
            }
        });
        let results = join_all(tasks).await;

        for (offset, result) in results.into_iter().enumerate() {
            let index = range.start + offset;
            match result {
                None => {
                    debug!(index = index, field = %self.prompt_field, "Record has no prompt, skipping");
                }
                Some((_, Ok(raw))) => {
                    let outcome = self.strategy.parse_response(&raw, &mut records[offset]);
                    count_outcome(&self.counters, outcome);
                }
                Some((_, Err(err))) => {
                    self.counters.failed_requests.fetch_add(1, Ordering::Relaxed);
                    error!(index = index, error = %err, "Request failed, leaving record unchanged");
                }
            }
        }
    }

    async fn embed(&self, range: &Range<usize>, records: &[Record]) -> Result<(), TaggerError> {
        let (Some(embedder), Some(similarity)) = (&self.embedder, &self.similarity) else {
            return Err(ConfigError::ValidationFailed(
                "embedding mission requires an embedding provider and a similarity index"
                    .to_string(),
            )
            .into());
        };

        let semaphore = Semaphore::new(self.permits(records.len()));
        let tasks = records.iter().map(|record| {
            let semaphore = &semaphore;
            let text = prompt_text(record, &self.prompt_field);
            async move {
                let _permit = semaphore.acquire().await.ok();
                self.retry
                    .run("embedding", || embedder.embed(&text))
                    .await
            }
        });
        let results = join_all(tasks).await;

        let mut vectors = Vec::with_capacity(records.len());
        let mut metas = Vec::with_capacity(records.len());
        for (offset, result) in results.into_iter().enumerate() {
            match result {
                Ok(vector) => {
                    vectors.push(vector);
                    metas.push(record_meta(&records[offset], &self.prompt_field));
                    self.counters.annotated.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) => {
                    self.counters.failed_requests.fetch_add(1, Ordering::Relaxed);
                    error!(index = range.start + offset, error = %err, "Embedding request failed");
                }
            }
        }

        info!(count = vectors.len(), "Inserting prompt embeddings");
        similarity.index.insert(&vectors, &metas).await?;
        Ok(())
    }
}

#[async_trait]
impl BatchProcessor for ApiProcessor {
    async fn process_batch(
        &self,
        range: Range<usize>,
        records: &mut [Record],
    ) -> Result<(), TaggerError> {
        debug!(
            start = range.start,
            end = range.end,
            mission = %self.strategy.mission(),
            "Processing batch with API"
        );
        match self.strategy.input_style() {
            InputStyle::Templated => {
                self.annotate(&range, records).await;
                Ok(())
            }
            InputStyle::Direct if self.strategy.mission() == Mission::Embedding => {
                self.embed(&range, records).await
            }
            _ => Err(BackendError::Unsupported(format!(
                "{} mission on the remote API",
                self.strategy.mission()
            ))
            .into()),
        }
    }

    async fn postprocess(&self, dataset: &mut [Record]) -> Result<(), TaggerError> {
        if let Some(similarity) = &self.similarity {
            similarity.postprocessor.apply(dataset).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{Choice, GenerationResponse};
    use serde_json::{json, Value};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Replies with a fixed content and records every prompt it saw.
    struct MockProvider {
        reply: Mutex<String>,
        prompts: Mutex<Vec<String>>,
        fail: bool,
        calls: AtomicUsize,
    }

    impl MockProvider {
        fn replying(reply: &str) -> Self {
            Self {
                reply: Mutex::new(reply.to_string()),
                prompts: Mutex::new(Vec::new()),
                fail: false,
                calls: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::replying("")
            }
        }
    }

    #[async_trait]
    impl LlmProvider for MockProvider {
        async fn generate(
            &self,
            request: GenerationRequest,
        ) -> Result<GenerationResponse, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(BackendError::ApiError {
                    code: 503,
                    message: "unavailable".to_string(),
                });
            }
            assert_eq!(request.messages[1], Message::assistant("{"));
            assert_eq!(request.stop, vec!["}".to_string()]);
            self.prompts
                .lock()
                .unwrap()
                .push(request.messages[0].content.clone());
            Ok(GenerationResponse {
                id: "mock".to_string(),
                model: request.model,
                choices: vec![Choice {
                    index: 0,
                    message: Message::assistant(self.reply.lock().unwrap().clone()),
                    finish_reason: Some("stop".to_string()),
                }],
                usage: None,
            })
        }
    }

    fn records(values: Vec<Value>) -> Vec<Record> {
        values
            .into_iter()
            .map(|v| v.as_object().cloned().unwrap())
            .collect()
    }

    fn config() -> TaggerConfig {
        TaggerConfig::new(Mission::Difficulty, "in.jsonl").with_fields("instruction", "output")
    }

    #[tokio::test]
    async fn test_batch_results_applied_per_record() {
        let provider = Arc::new(MockProvider::replying(
            r#""intent": "greet", "knowledge": "none", "difficulty": "very easy""#,
        ));
        let processor = ApiProcessor::new(
            Mission::Difficulty,
            provider.clone(),
            &config(),
            ProgressCounters::new(),
        );

        let mut data = records(vec![
            json!({"instruction": "Hi"}),
            json!({"instruction": "Hello"}),
            json!({"other": "no prompt"}),
        ]);
        processor.process_batch(0..3, &mut data).await.unwrap();

        assert_eq!(data[0]["difficulty"], "very easy");
        assert_eq!(data[1]["intent"], "greet");
        assert!(data[2].get("difficulty").is_none());
        assert_eq!(provider.prompts.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_exhausted_retries_leave_record_unchanged() {
        let provider = Arc::new(MockProvider::failing());
        let counters = ProgressCounters::new();
        let processor = ApiProcessor::new(
            Mission::Difficulty,
            provider.clone(),
            &config(),
            counters.clone(),
        )
        .with_retry(RetryPolicy::new(2, Duration::from_millis(1)));

        let mut data = records(vec![json!({"instruction": "Hi", "difficulty": "hard"})]);
        processor.process_batch(0..1, &mut data).await.unwrap();

        assert_eq!(data[0]["difficulty"], "hard");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        assert_eq!(counters.failed_requests.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_unparseable_reply_degrades() {
        let provider = Arc::new(MockProvider::replying("I refuse to answer"));
        let counters = ProgressCounters::new();
        let processor =
            ApiProcessor::new(Mission::Difficulty, provider, &config(), counters.clone());

        let mut data = records(vec![json!({"instruction": "Hi"})]);
        processor.process_batch(0..1, &mut data).await.unwrap();

        assert_eq!(data[0]["difficulty"], Value::Null);
        assert_eq!(counters.degraded.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_quality_prompt_includes_response() {
        let provider = Arc::new(MockProvider::replying(r#""input_quality": "good""#));
        let processor = ApiProcessor::new(
            Mission::Quality,
            provider.clone(),
            &config(),
            ProgressCounters::new(),
        );

        let mut data = records(vec![json!({"instruction": "What is 2+2?", "output": "four"})]);
        processor.process_batch(0..1, &mut data).await.unwrap();

        let prompts = provider.prompts.lock().unwrap();
        assert!(prompts[0].contains("What is 2+2?"));
        assert!(prompts[0].contains("four"));
    }

    #[tokio::test]
    async fn test_concurrency_capped_by_limit() {
        let processor = ApiProcessor::new(
            Mission::Difficulty,
            Arc::new(MockProvider::replying("")),
            &config(),
            ProgressCounters::new(),
        )
        .with_max_concurrency(4);
        assert_eq!(processor.permits(100), 4);
        assert_eq!(processor.permits(2), 2);
        assert_eq!(processor.permits(0), 1);
    }
}
