//! Batch processors and the run driver.
//!
//! Each processor implements [`BatchProcessor`] for one backend family:
//!
//! - [`ApiProcessor`]: one remote request per record, fanned out within the
//!   batch and retried with backoff
//! - [`LocalProcessor`]: one batched engine call per batch
//! - [`LanguageProcessor`]: in-process language detection, for either backend
//!
//! [`Tagger`] wires a processor to the dataset, the checkpoint store and the
//! progress monitor and drives a [`BatchEngine`] run.

mod api;
mod language;
mod local;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::{info, warn};

use crate::checkpoint::FileCheckpointStore;
use crate::config::{
    ApiConfig, BackendKind, LocalEngineConfig, TaggerConfig, DEBUG_RECORD_LIMIT,
};
use crate::dataset::{field_text, load_dataset, Record};
use crate::engine::{BatchEngine, BatchProcessor, RunSummary};
use crate::error::{ConfigError, TaggerError};
use crate::language::LinguaLanguageDetector;
use crate::llm::{ApiClient, ChatTemplate, HttpLocalEngine, RetryPolicy};
use crate::mission::{Mission, ParseOutcome};
use crate::progress::{ProgressCounters, ProgressMonitor};
use crate::similarity::{open_index, SimilarityIndex, SimilarityPostProcessor};

pub use api::ApiProcessor;
pub use language::LanguageProcessor;
pub use local::LocalProcessor;

/// Index plus the post-processor reading it back, for the EMBEDDING mission.
pub struct SimilarityStage {
    pub index: Arc<dyn SimilarityIndex>,
    pub postprocessor: SimilarityPostProcessor,
}

impl SimilarityStage {
    /// Open the configured index for `config`'s dimension.
    pub async fn open(config: &TaggerConfig) -> Result<Self, TaggerError> {
        let index = open_index(&config.index, config.dimension).await?;
        Ok(Self::with_index(index, config))
    }

    pub fn with_index(index: Arc<dyn SimilarityIndex>, config: &TaggerConfig) -> Self {
        let postprocessor = SimilarityPostProcessor::new(index.clone(), &config.prompt_field)
            .with_threshold(config.index.distance_threshold)
            .with_top_k(config.index.top_k);
        Self {
            index,
            postprocessor,
        }
    }
}

/// Prompt text of a record; empty when the field is absent.
pub(crate) fn prompt_text(record: &Record, field: &str) -> String {
    field_text(record, field).unwrap_or_default()
}

pub(crate) fn count_outcome(counters: &ProgressCounters, outcome: ParseOutcome) {
    match outcome {
        ParseOutcome::Annotated => counters.annotated.fetch_add(1, Ordering::Relaxed),
        ParseOutcome::Degraded => counters.degraded.fetch_add(1, Ordering::Relaxed),
    };
}

/// Build the processor for a remote-API run.
pub async fn build_api_processor(
    config: &TaggerConfig,
    api: &ApiConfig,
    counters: ProgressCounters,
) -> Result<Box<dyn BatchProcessor>, TaggerError> {
    BackendKind::Api.check_mission(config.mission)?;
    api.validate()?;

    if config.mission == Mission::Language {
        return Ok(Box::new(LanguageProcessor::new(
            Arc::new(LinguaLanguageDetector::new()),
            &config.prompt_field,
            counters,
        )));
    }

    let client = Arc::new(ApiClient::new(
        api.api_url.clone(),
        api.api_key.clone(),
        api.model.clone(),
    ));
    let mut processor = ApiProcessor::new(config.mission, client.clone(), config, counters)
        .with_retry(RetryPolicy::new(api.max_retries, api.retry_base_delay));
    if let Some(limit) = api.max_concurrency {
        processor = processor.with_max_concurrency(limit);
    }
    if config.mission == Mission::Embedding {
        processor = processor.with_embeddings(client, SimilarityStage::open(config).await?);
    }
    Ok(Box::new(processor))
}

/// Build the processor for a local-engine run.
pub async fn build_local_processor(
    config: &TaggerConfig,
    local: &LocalEngineConfig,
    counters: ProgressCounters,
) -> Result<Box<dyn BatchProcessor>, TaggerError> {
    BackendKind::Local.check_mission(config.mission)?;
    local.validate()?;

    if config.mission == Mission::Language {
        return Ok(Box::new(LanguageProcessor::new(
            Arc::new(LinguaLanguageDetector::new()),
            &config.prompt_field,
            counters,
        )));
    }

    let template = match &local.chat_template {
        Some(path) => ChatTemplate::from_file(path)?,
        None => ChatTemplate::default(),
    };
    let engine = Arc::new(
        HttpLocalEngine::new(local.engine_url.clone(), local.model.clone())
            .with_dimensions(config.dimension),
    );
    info!(
        engine = %local.engine_url,
        model = %local.model,
        mission = %config.mission,
        "Using local inference engine"
    );

    let mut processor = LocalProcessor::new(config.mission, engine, template, config, counters);
    if config.mission == Mission::Embedding {
        processor = processor.with_similarity(SimilarityStage::open(config).await?);
    }
    Ok(Box::new(processor))
}

/// Drives one tagging run over an input file.
pub struct Tagger {
    config: TaggerConfig,
    counters: ProgressCounters,
}

impl Tagger {
    /// Validate `config` and prepare a run.
    pub fn new(config: TaggerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            counters: ProgressCounters::new(),
        })
    }

    pub fn config(&self) -> &TaggerConfig {
        &self.config
    }

    /// Counters to hand to the processor so the monitor sees its progress.
    pub fn counters(&self) -> ProgressCounters {
        self.counters.clone()
    }

    /// Load the input, run `processor` over it with checkpointing, and write
    /// the annotated dataset.
    pub async fn run<P>(&self, processor: &P) -> Result<RunSummary, TaggerError>
    where
        P: BatchProcessor + ?Sized,
    {
        let paths = self.config.output_paths()?;
        let mut dataset = load_dataset(&self.config.input_file)?;
        info!(
            input = %self.config.input_file.display(),
            records = dataset.len(),
            mission = %self.config.mission,
            "Dataset loaded"
        );
        if self.config.debug && dataset.len() > DEBUG_RECORD_LIMIT {
            warn!(
                limit = DEBUG_RECORD_LIMIT,
                "Debug mode enabled, only processing the first records"
            );
            dataset.truncate(DEBUG_RECORD_LIMIT);
        }

        let store = FileCheckpointStore::new(paths.checkpoint_data, paths.checkpoint_state)?;
        let engine = BatchEngine::new(self.config.batch_size, self.config.checkpoint_every)
            .with_counters(self.counters.clone());

        let total_batches = engine.pending_batches(dataset.len(), &store)?;
        let monitor = ProgressMonitor::start(
            self.counters.clone(),
            total_batches,
            self.config.progress_interval,
        );
        let result = engine
            .run(&mut dataset, &paths.output, &store, processor)
            .await;
        monitor.stop().await;

        let summary = result?;
        let snap = self.counters.snapshot(std::time::Instant::now());
        info!(
            output = %summary.output.display(),
            records = summary.total_records,
            resumed_from = summary.resumed_from,
            batches = summary.batches_processed,
            annotated = snap.annotated,
            degraded = snap.degraded,
            failed_requests = snap.failed_requests,
            "Tagging run finished"
        );
        Ok(summary)
    }
}
