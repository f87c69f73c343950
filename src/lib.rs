//! datatagger: checkpointed batch tagging of instruction datasets.
//!
//! A run applies one annotation [`mission::Mission`] to every record of a
//! JSON or JSONL dataset, either through a remote chat-completion API or a
//! locally served model, and checkpoints progress so an interrupted run
//! resumes where it stopped.

// Core modules
pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod dataset;
pub mod engine;
pub mod error;
pub mod formatter;
pub mod language;
pub mod llm;
pub mod mission;
pub mod progress;
pub mod prompts;
pub mod similarity;
pub mod tagger;
pub mod utils;

// Re-export commonly used types
pub use config::{ApiConfig, IndexConfig, LocalEngineConfig, TaggerConfig};
pub use dataset::Record;
pub use engine::{BatchEngine, BatchProcessor, RunSummary};
pub use error::{
    BackendError, CheckpointError, ConfigError, DatasetError, IndexError, TaggerError,
};
pub use mission::Mission;
pub use tagger::Tagger;
