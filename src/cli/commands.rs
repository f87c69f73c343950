//! CLI command definitions for datatagger.
//!
//! `api` and `local` share one set of tagging arguments and differ only in
//! how the backend is reached; `format` normalizes a dataset without any
//! backend.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser};
use tracing::info;

use crate::config::{ApiConfig, IndexConfig, LocalEngineConfig, TaggerConfig};
use crate::engine::RunSummary;
use crate::formatter::{FormatterConfig, RecordFormatter};
use crate::mission::Mission;
use crate::similarity::{IndexBackend, DEFAULT_DISTANCE_THRESHOLD, DEFAULT_TOP_K};
use crate::tagger::{build_api_processor, build_local_processor, Tagger};

/// Default model name sent to the remote API.
const DEFAULT_API_MODEL: &str = "Meta-Llama-3-8B-Instruct";

/// Default model served by the local engine.
const DEFAULT_LOCAL_MODEL: &str = "meta-llama/Meta-Llama-3-8B-Instruct";

/// Checkpointed batch tagging for conversational datasets.
#[derive(Parser)]
#[command(name = "datatagger")]
#[command(about = "Annotate instruction datasets with quality, difficulty, category, safety, language, reward and similarity tags")]
#[command(version)]
#[command(
    long_about = "datatagger runs one annotation mission over a JSON or JSONL dataset, in batches, with periodic checkpoints so an interrupted run resumes where it stopped.\n\nExample usage:\n  datatagger api --mission difficulty -i data/train.jsonl --api-url http://localhost:8000\n  datatagger local --mission safety -i data/train.jsonl --model meta-llama/Llama-Guard-3-8B\n  datatagger format -i data/train_difficulty.jsonl -o data/train_unified.json"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Tag a dataset through a remote OpenAI-compatible API.
    Api(ApiArgs),

    /// Tag a dataset with a locally served model, one engine call per batch.
    Local(LocalArgs),

    /// Normalize a dataset into the unified conversation layout.
    #[command(alias = "fmt")]
    Format(FormatArgs),
}

/// Arguments shared by the tagging commands.
#[derive(Args, Debug)]
pub struct TaggingArgs {
    /// Annotation mission to run.
    #[arg(long, value_enum)]
    pub mission: Mission,

    /// Input dataset (.json or .jsonl).
    #[arg(short = 'i', long)]
    pub input_file: PathBuf,

    /// Output dataset. Defaults to `{input}_{mission}.jsonl`.
    #[arg(short = 'o', long)]
    pub output_file: Option<PathBuf>,

    /// Record field holding the prompt.
    #[arg(long, default_value = "instruction")]
    pub prompt_field: String,

    /// Record field holding the response.
    #[arg(long, default_value = "response")]
    pub output_field: String,

    #[arg(short = 'b', long, default_value = "100")]
    pub batch_size: usize,

    /// Completed batches between checkpoints.
    #[arg(long, default_value = "1000")]
    pub checkpoint_every: usize,

    /// Only process the first 100 records.
    #[arg(long)]
    pub debug: bool,

    #[arg(long, default_value = "2048")]
    pub max_tokens: u32,

    #[arg(long, default_value = "0.8")]
    pub temperature: f64,

    #[arg(long, default_value = "1.0")]
    pub repetition_penalty: f64,

    /// Embedding dimension for the embedding mission.
    #[arg(long, default_value = "2560")]
    pub dimension: usize,

    /// Let reasoning models think before answering.
    #[arg(long)]
    pub enable_thinking: bool,

    /// Similarity index backend: flat or milvus.
    #[arg(long, default_value = "flat")]
    pub index_backend: String,

    #[arg(long, default_value = "data/flat.index")]
    pub index_file: PathBuf,

    #[arg(long, default_value = "data/flat_meta.json")]
    pub meta_file: PathBuf,

    #[arg(long, default_value = "http://localhost:19530")]
    pub milvus_url: String,

    /// Milvus access token (can also be set via MILVUS_TOKEN env var).
    #[arg(long, env = "MILVUS_TOKEN")]
    pub milvus_token: Option<String>,

    #[arg(long, default_value = "embeddings")]
    pub milvus_collection: String,

    /// Distance below which a neighbor counts as a repeat.
    #[arg(long, default_value_t = DEFAULT_DISTANCE_THRESHOLD)]
    pub distance_threshold: f64,

    /// Neighbors inspected per record.
    #[arg(long, default_value_t = DEFAULT_TOP_K)]
    pub top_k: usize,
}

impl TaggingArgs {
    fn to_config(&self) -> anyhow::Result<TaggerConfig> {
        let backend: IndexBackend = self.index_backend.parse()?;
        let mut config = TaggerConfig::new(self.mission, &self.input_file)
            .with_fields(&self.prompt_field, &self.output_field)
            .with_batch_size(self.batch_size)
            .with_checkpoint_every(self.checkpoint_every);
        if let Some(output) = &self.output_file {
            config = config.with_output_file(output);
        }
        config.debug = self.debug;
        config.max_tokens = self.max_tokens;
        config.temperature = self.temperature;
        config.repetition_penalty = self.repetition_penalty;
        config.dimension = self.dimension;
        config.enable_thinking = self.enable_thinking;
        config.index = IndexConfig {
            backend,
            index_file: self.index_file.clone(),
            meta_file: self.meta_file.clone(),
            milvus_url: self.milvus_url.clone(),
            milvus_token: self.milvus_token.clone(),
            milvus_collection: self.milvus_collection.clone(),
            distance_threshold: self.distance_threshold,
            top_k: self.top_k,
        };
        Ok(config)
    }
}

/// Arguments for `datatagger api`.
#[derive(Args, Debug)]
pub struct ApiArgs {
    #[command(flatten)]
    pub tagging: TaggingArgs,

    /// Server root of the OpenAI-compatible API.
    #[arg(long, env = "DATATAGGER_API_URL")]
    pub api_url: String,

    /// API key (can also be set via DATATAGGER_API_KEY env var).
    #[arg(long, env = "DATATAGGER_API_KEY")]
    pub api_key: Option<String>,

    #[arg(short = 'm', long, default_value = DEFAULT_API_MODEL)]
    pub model: String,

    /// Concurrent requests per batch. Defaults to the batch size.
    #[arg(long)]
    pub max_concurrency: Option<usize>,

    /// Attempts per request before the record is left unannotated.
    #[arg(long, default_value = "5")]
    pub max_retries: u32,

    /// Delay before the first retry, in milliseconds.
    #[arg(long, default_value = "1000")]
    pub retry_delay_ms: u64,
}

impl ApiArgs {
    fn api_config(&self) -> ApiConfig {
        ApiConfig {
            api_url: self.api_url.clone(),
            api_key: self.api_key.clone(),
            model: self.model.clone(),
            max_concurrency: self.max_concurrency,
            max_retries: self.max_retries,
            retry_base_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }
}

/// Arguments for `datatagger local`.
#[derive(Args, Debug)]
pub struct LocalArgs {
    #[command(flatten)]
    pub tagging: TaggingArgs,

    /// Base URL of the local inference server.
    #[arg(long, default_value = "http://localhost:8000")]
    pub engine_url: String,

    #[arg(short = 'm', long, default_value = DEFAULT_LOCAL_MODEL)]
    pub model: String,

    /// Chat template file (tera syntax). ChatML when omitted.
    #[arg(long)]
    pub chat_template: Option<PathBuf>,
}

impl LocalArgs {
    fn local_config(&self) -> LocalEngineConfig {
        LocalEngineConfig {
            engine_url: self.engine_url.clone(),
            model: self.model.clone(),
            chat_template: self.chat_template.clone(),
        }
    }
}

/// Arguments for `datatagger format`.
#[derive(Args, Debug)]
pub struct FormatArgs {
    #[arg(short = 'i', long)]
    pub input_file: PathBuf,

    /// Output file; `.json` is written as an indented array, `.jsonl` is streamed.
    #[arg(short = 'o', long)]
    pub output_file: PathBuf,

    #[arg(long, default_value = "instruction")]
    pub prompt_field: String,

    #[arg(long, default_value = "output")]
    pub output_field: String,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Parse CLI arguments and execute the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Api(args) => run_api_command(args).await,
        Commands::Local(args) => run_local_command(args).await,
        Commands::Format(args) => run_format_command(args),
    }
}

async fn run_api_command(args: ApiArgs) -> anyhow::Result<()> {
    let tagger = Tagger::new(args.tagging.to_config()?)?;
    let processor =
        build_api_processor(tagger.config(), &args.api_config(), tagger.counters()).await?;
    let summary = tagger.run(processor.as_ref()).await?;
    report(&summary);
    Ok(())
}

async fn run_local_command(args: LocalArgs) -> anyhow::Result<()> {
    let tagger = Tagger::new(args.tagging.to_config()?)?;
    let processor =
        build_local_processor(tagger.config(), &args.local_config(), tagger.counters()).await?;
    let summary = tagger.run(processor.as_ref()).await?;
    report(&summary);
    Ok(())
}

fn run_format_command(args: FormatArgs) -> anyhow::Result<()> {
    let config = FormatterConfig::new(args.input_file, args.output_file)
        .with_fields(args.prompt_field, args.output_field);
    let summary = RecordFormatter::new(config).run()?;
    info!(
        written = summary.written,
        skipped = summary.skipped,
        output = %summary.output.display(),
        "Dataset formatted"
    );
    Ok(())
}

fn report(summary: &RunSummary) {
    info!(
        records = summary.total_records,
        resumed_from = summary.resumed_from,
        output = %summary.output.display(),
        "Tagging complete"
    );
}
