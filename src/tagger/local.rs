use std::ops::Range;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info};

use super::{count_outcome, prompt_text, SimilarityStage};
use crate::config::TaggerConfig;
use crate::dataset::{field_text, record_meta, Record};
use crate::engine::BatchProcessor;
use crate::error::{BackendError, ConfigError, TaggerError};
use crate::llm::local::ensure_aligned;
use crate::llm::{ChatTemplate, LocalEngine, Message, SamplingParams};
use crate::mission::{AnnotationStrategy, InputStyle, Mission};
use crate::progress::ProgressCounters;

/// Annotates a whole batch with one call to a local inference engine.
///
/// Outputs are matched to records by position; an engine that returns a
/// different number of outputs than it was given fails the batch.
pub struct LocalProcessor {
    strategy: Box<dyn AnnotationStrategy>,
    engine: Arc<dyn LocalEngine>,
    template: ChatTemplate,
    params: SamplingParams,
    enable_thinking: bool,
    prompt_field: String,
    output_field: String,
    similarity: Option<SimilarityStage>,
    counters: ProgressCounters,
}

impl LocalProcessor {
    pub fn new(
        mission: Mission,
        engine: Arc<dyn LocalEngine>,
        template: ChatTemplate,
        config: &TaggerConfig,
        counters: ProgressCounters,
    ) -> Self {
        Self {
            strategy: mission.strategy(),
            engine,
            template,
            params: config.sampling_params(),
            enable_thinking: config.enable_thinking,
            prompt_field: config.prompt_field.clone(),
            output_field: config.output_field.clone(),
            similarity: None,
            counters,
        }
    }

    pub fn with_similarity(mut self, similarity: SimilarityStage) -> Self {
        self.similarity = Some(similarity);
        self
    }

    /// Mission prompt as a user turn, with the assistant turn opened and
    /// prefilled with `{`.
    fn render_templated(&self, record: &Record) -> Result<String, BackendError> {
        let prompt = prompt_text(record, &self.prompt_field);
        let response = field_text(record, &self.output_field);
        let text = self
            .strategy
            .build_prompt(&prompt, response.as_deref())
            .unwrap_or(prompt);
        let rendered =
            self.template
                .render(&[Message::user(text)], true, self.enable_thinking)?;
        Ok(format!("{rendered}{{"))
    }

    /// The record's own exchange, rendered as a finished conversation.
    fn render_pair(&self, record: &Record) -> Result<String, BackendError> {
        let messages = [
            Message::user(prompt_text(record, &self.prompt_field)),
            Message::assistant(field_text(record, &self.output_field).unwrap_or_default()),
        ];
        self.template.render(&messages, false, self.enable_thinking)
    }

    fn apply_texts(&self, outputs: &[String], records: &mut [Record]) {
        for (raw, record) in outputs.iter().zip(records.iter_mut()) {
            let outcome = self.strategy.parse_response(raw, record);
            count_outcome(&self.counters, outcome);
        }
    }

    async fn generate(
        &self,
        records: &mut [Record],
        render: fn(&Self, &Record) -> Result<String, BackendError>,
    ) -> Result<(), TaggerError> {
        let prompts = records
            .iter()
            .map(|record| render(self, record))
            .collect::<Result<Vec<_>, _>>()?;

        let outputs = self.engine.generate(&prompts, &self.params).await?;
        ensure_aligned(prompts.len(), &outputs)?;
        self.apply_texts(&outputs, records);
        Ok(())
    }

    async fn reward(&self, range: &Range<usize>, records: &mut [Record]) -> Result<(), TaggerError> {
        let prompts = records
            .iter()
            .map(|record| self.render_pair(record))
            .collect::<Result<Vec<_>, _>>()?;

        let scores = match self.engine.score(&prompts).await {
            Ok(scores) => scores,
            Err(err @ BackendError::BatchMisaligned { .. }) => return Err(err.into()),
            Err(err) => {
                error!(
                    start = range.start,
                    end = range.end,
                    error = %err,
                    "Reward scoring failed for batch"
                );
                self.counters
                    .failed_requests
                    .fetch_add(records.len(), Ordering::Relaxed);
                for record in records.iter_mut() {
                    self.strategy.reset_fields(record);
                }
                return Ok(());
            }
        };
        ensure_aligned(prompts.len(), &scores)?;

        let outputs: Vec<String> = scores.iter().map(f64::to_string).collect();
        self.apply_texts(&outputs, records);
        Ok(())
    }

    async fn embed(&self, records: &[Record]) -> Result<(), TaggerError> {
        let Some(similarity) = &self.similarity else {
            return Err(ConfigError::ValidationFailed(
                "embedding mission requires a similarity index".to_string(),
            )
            .into());
        };

        let texts: Vec<String> = records
            .iter()
            .map(|record| prompt_text(record, &self.prompt_field))
            .collect();
        let vectors = self.engine.embed(&texts).await?;
        ensure_aligned(texts.len(), &vectors)?;

        let metas: Vec<String> = records
            .iter()
            .map(|record| record_meta(record, &self.prompt_field))
            .collect();
        similarity.index.insert(&vectors, &metas).await?;
        self.counters
            .annotated
            .fetch_add(vectors.len(), Ordering::Relaxed);
        debug!(count = vectors.len(), "Inserted batch embeddings");
        Ok(())
    }
}

#[async_trait]
impl BatchProcessor for LocalProcessor {
    async fn process_batch(
        &self,
        range: Range<usize>,
        records: &mut [Record],
    ) -> Result<(), TaggerError> {
        if records.is_empty() {
            return Ok(());
        }
        debug!(
            start = range.start,
            end = range.end,
            mission = %self.strategy.mission(),
            "Processing batch with local engine"
        );

        match (self.strategy.mission(), self.strategy.input_style()) {
            (Mission::Embedding, _) => self.embed(records).await,
            (Mission::Reward, _) => self.reward(&range, records).await,
            (_, InputStyle::Paired) => self.generate(records, Self::render_pair).await,
            (_, InputStyle::Templated) => self.generate(records, Self::render_templated).await,
            (mission, InputStyle::Direct) => Err(BackendError::Unsupported(format!(
                "{mission} mission on the local engine"
            ))
            .into()),
        }
    }

    async fn postprocess(&self, dataset: &mut [Record]) -> Result<(), TaggerError> {
        if let Some(similarity) = &self.similarity {
            let updated = similarity.postprocessor.apply(dataset).await?;
            info!(updated = updated, "Similarity fields written");
        }
        Ok(())
    }
}
