//! Run configuration.
//!
//! [`TaggerConfig`] holds the settings shared by every backend; [`ApiConfig`]
//! and [`LocalEngineConfig`] carry the connection details of each backend.
//! Everything is validated before a run touches the dataset, so
//! configuration mistakes fail fast without leaving a partial checkpoint.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::dataset::DatasetFormat;
use crate::error::ConfigError;
use crate::llm::SamplingParams;
use crate::mission::Mission;
use crate::similarity::{IndexBackend, DEFAULT_DISTANCE_THRESHOLD, DEFAULT_TOP_K};

/// Records kept when debug mode is on.
pub const DEBUG_RECORD_LIMIT: usize = 100;

/// Inference backend family, used in configuration errors and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Api,
    Local,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Api => f.write_str("remote API"),
            BackendKind::Local => f.write_str("local engine"),
        }
    }
}

impl BackendKind {
    /// Reject mission/backend combinations the backend cannot serve.
    ///
    /// The remote API exposes chat completion and embeddings only, so the
    /// guard-model and reward-model missions need the local engine.
    pub fn check_mission(&self, mission: Mission) -> Result<(), ConfigError> {
        match (self, mission) {
            (BackendKind::Api, Mission::Safety | Mission::Reward) => {
                Err(ConfigError::UnsupportedMission {
                    mission: mission.to_string(),
                    backend: self.to_string(),
                })
            }
            _ => Ok(()),
        }
    }
}

/// Similarity index settings for the EMBEDDING mission.
#[derive(Debug, Clone)]
pub struct IndexConfig {
    pub backend: IndexBackend,
    /// Flat index vector file.
    pub index_file: PathBuf,
    /// Flat index metadata file.
    pub meta_file: PathBuf,
    pub milvus_url: String,
    pub milvus_token: Option<String>,
    pub milvus_collection: String,
    /// Distance below which a neighbor counts as a repeat.
    pub distance_threshold: f64,
    /// Neighbors inspected per record.
    pub top_k: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: IndexBackend::Flat,
            index_file: PathBuf::from("data/flat.index"),
            meta_file: PathBuf::from("data/flat_meta.json"),
            milvus_url: "http://localhost:19530".to_string(),
            milvus_token: None,
            milvus_collection: "embeddings".to_string(),
            distance_threshold: DEFAULT_DISTANCE_THRESHOLD,
            top_k: DEFAULT_TOP_K,
        }
    }
}

/// Settings shared by every backend.
#[derive(Debug, Clone)]
pub struct TaggerConfig {
    pub mission: Mission,
    pub input_file: PathBuf,
    /// Explicit output path; derived from the input when absent.
    pub output_file: Option<PathBuf>,
    /// Record field holding the prompt text.
    pub prompt_field: String,
    /// Record field holding the response text.
    pub output_field: String,
    pub batch_size: usize,
    /// Completed batches between checkpoints.
    pub checkpoint_every: usize,
    /// Only process the first [`DEBUG_RECORD_LIMIT`] records.
    pub debug: bool,
    pub max_tokens: u32,
    pub temperature: f64,
    pub repetition_penalty: f64,
    /// Embedding dimension.
    pub dimension: usize,
    pub enable_thinking: bool,
    pub index: IndexConfig,
    /// How often the progress monitor logs.
    pub progress_interval: Duration,
}

impl TaggerConfig {
    /// Configuration with default settings for `mission` over `input_file`.
    pub fn new(mission: Mission, input_file: impl Into<PathBuf>) -> Self {
        Self {
            mission,
            input_file: input_file.into(),
            output_file: None,
            prompt_field: "instruction".to_string(),
            output_field: "response".to_string(),
            batch_size: 100,
            checkpoint_every: 1000,
            debug: false,
            max_tokens: 2048,
            temperature: 0.8,
            repetition_penalty: 1.0,
            dimension: 2560,
            enable_thinking: false,
            index: IndexConfig::default(),
            progress_interval: Duration::from_secs(30),
        }
    }

    pub fn with_output_file(mut self, output_file: impl Into<PathBuf>) -> Self {
        self.output_file = Some(output_file.into());
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_checkpoint_every(mut self, checkpoint_every: usize) -> Self {
        self.checkpoint_every = checkpoint_every;
        self
    }

    pub fn with_fields(mut self, prompt_field: impl Into<String>, output_field: impl Into<String>) -> Self {
        self.prompt_field = prompt_field.into();
        self.output_field = output_field.into();
        self
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::ValidationFailed(
                "batch_size must be greater than 0".to_string(),
            ));
        }

        if self.checkpoint_every == 0 {
            return Err(ConfigError::ValidationFailed(
                "checkpoint_every must be greater than 0".to_string(),
            ));
        }

        if self.dimension == 0 {
            return Err(ConfigError::ValidationFailed(
                "dimension must be greater than 0".to_string(),
            ));
        }

        if self.max_tokens == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_tokens must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::ValidationFailed(
                "temperature must be between 0.0 and 2.0".to_string(),
            ));
        }

        if self.repetition_penalty <= 0.0 {
            return Err(ConfigError::ValidationFailed(
                "repetition_penalty must be greater than 0".to_string(),
            ));
        }

        if self.prompt_field.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "prompt_field cannot be empty".to_string(),
            ));
        }

        if self.index.top_k == 0 {
            return Err(ConfigError::ValidationFailed(
                "top_k must be greater than 0".to_string(),
            ));
        }

        if self.progress_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "progress_interval must be greater than 0".to_string(),
            ));
        }

        self.output_paths().map(|_| ())
    }

    /// Sampling parameters for generation missions.
    ///
    /// Replies stop at the first `}`, which closes the prefilled object.
    pub fn sampling_params(&self) -> SamplingParams {
        SamplingParams {
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            repetition_penalty: self.repetition_penalty,
            stop: vec!["}".to_string()],
            include_stop_str_in_output: true,
        }
    }

    /// Output and checkpoint file locations for this run.
    pub fn output_paths(&self) -> Result<OutputPaths, ConfigError> {
        OutputPaths::derive(&self.input_file, self.output_file.as_deref(), self.mission)
    }
}

/// Remote API connection settings.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Server root, e.g. `http://localhost:8000`.
    pub api_url: String,
    pub api_key: Option<String>,
    pub model: String,
    /// Cap on concurrent requests within a batch; defaults to the batch size.
    pub max_concurrency: Option<usize>,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            api_key: None,
            model: "Meta-Llama-3-8B-Instruct".to_string(),
            max_concurrency: None,
            max_retries: crate::llm::retry::DEFAULT_MAX_ATTEMPTS,
            retry_base_delay: crate::llm::retry::DEFAULT_BASE_DELAY,
        }
    }
}

impl ApiConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_url.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "api_url cannot be empty".to_string(),
            ));
        }
        if self.model.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "model cannot be empty".to_string(),
            ));
        }
        if self.max_concurrency == Some(0) {
            return Err(ConfigError::ValidationFailed(
                "max_concurrency must be greater than 0".to_string(),
            ));
        }
        if self.max_retries == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_retries must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Local inference server settings.
#[derive(Debug, Clone)]
pub struct LocalEngineConfig {
    pub engine_url: String,
    /// Model served by the engine.
    pub model: String,
    /// Chat template file; ChatML when absent.
    pub chat_template: Option<PathBuf>,
}

impl Default for LocalEngineConfig {
    fn default() -> Self {
        Self {
            engine_url: "http://localhost:8000".to_string(),
            model: "meta-llama/Meta-Llama-3-8B-Instruct".to_string(),
            chat_template: None,
        }
    }
}

impl LocalEngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine_url.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "engine_url cannot be empty".to_string(),
            ));
        }
        if self.model.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "model cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Where a run writes its result and checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub output: PathBuf,
    /// Processed prefix, same format as the output.
    pub checkpoint_data: PathBuf,
    /// Cursor state, always JSON.
    pub checkpoint_state: PathBuf,
}

impl OutputPaths {
    /// Derive the output paths.
    ///
    /// Without an explicit output the result goes to
    /// `{input_stem}_{mission}.jsonl` next to the input. Checkpoint files sit
    /// next to the output as `{output_stem}_checkpoint.{ext}` and
    /// `{output_stem}_checkpoint_state.json`.
    pub fn derive(
        input: &Path,
        output: Option<&Path>,
        mission: Mission,
    ) -> Result<Self, ConfigError> {
        let output = match output {
            Some(path) => path.to_path_buf(),
            None => with_stem_suffix(input, &format!("_{}.jsonl", mission.name())),
        };
        let format = DatasetFormat::from_path(&output).map_err(|_| ConfigError::InvalidValue {
            key: "output_file".to_string(),
            message: format!("'{}' must end in .json or .jsonl", output.display()),
        })?;

        Ok(Self {
            checkpoint_data: with_stem_suffix(
                &output,
                &format!("_checkpoint.{}", format.extension()),
            ),
            checkpoint_state: with_stem_suffix(&output, "_checkpoint_state.json"),
            output,
        })
    }
}

/// Replace the extension of `path` with `suffix` appended to its stem.
fn with_stem_suffix(path: &Path, suffix: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{stem}{suffix}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = TaggerConfig::new(Mission::Quality, "data/in.json");
        assert_eq!(config.prompt_field, "instruction");
        assert_eq!(config.output_field, "response");
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.checkpoint_every, 1000);
        assert_eq!(config.dimension, 2560);
        assert_eq!(config.index.index_file, PathBuf::from("data/flat.index"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_failures() {
        let base = TaggerConfig::new(Mission::Quality, "in.jsonl");
        assert!(base.clone().with_batch_size(0).validate().is_err());
        assert!(base.clone().with_checkpoint_every(0).validate().is_err());

        let mut hot = base.clone();
        hot.temperature = 2.5;
        assert!(hot.validate().is_err());

        let bad_output = base.with_output_file("out.csv");
        assert!(matches!(
            bad_output.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_derived_output_paths() {
        let paths =
            OutputPaths::derive(Path::new("data/train.v1.json"), None, Mission::Classification)
                .unwrap();
        assert_eq!(paths.output, PathBuf::from("data/train.v1_classification.jsonl"));
        assert_eq!(
            paths.checkpoint_data,
            PathBuf::from("data/train.v1_classification_checkpoint.jsonl")
        );
        assert_eq!(
            paths.checkpoint_state,
            PathBuf::from("data/train.v1_classification_checkpoint_state.json")
        );
    }

    #[test]
    fn test_explicit_output_keeps_its_format() {
        let paths = OutputPaths::derive(
            Path::new("in.jsonl"),
            Some(Path::new("out/tagged.json")),
            Mission::Quality,
        )
        .unwrap();
        assert_eq!(paths.output, PathBuf::from("out/tagged.json"));
        assert_eq!(paths.checkpoint_data, PathBuf::from("out/tagged_checkpoint.json"));
        assert_eq!(
            paths.checkpoint_state,
            PathBuf::from("out/tagged_checkpoint_state.json")
        );
    }

    #[test]
    fn test_api_rejects_guard_and_reward_missions() {
        assert!(matches!(
            BackendKind::Api.check_mission(Mission::Reward),
            Err(ConfigError::UnsupportedMission { .. })
        ));
        assert!(BackendKind::Api.check_mission(Mission::Safety).is_err());
        assert!(BackendKind::Api.check_mission(Mission::Embedding).is_ok());
        assert!(BackendKind::Local.check_mission(Mission::Reward).is_ok());
    }

    #[test]
    fn test_api_config_requires_url() {
        assert!(ApiConfig::default().validate().is_err());
        let config = ApiConfig {
            api_url: "http://localhost:8000".to_string(),
            ..ApiConfig::default()
        };
        assert!(config.validate().is_ok());
    }
}
