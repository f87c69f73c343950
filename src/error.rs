//! Error types for datatagger operations.
//!
//! Defines error types for all major subsystems:
//! - Inference backends (remote API, local engine)
//! - Dataset loading and saving
//! - Checkpoint persistence
//! - Similarity index storage and search
//! - Configuration validation

use thiserror::Error;

/// Errors raised by inference backends.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },

    #[error("Failed to parse backend response: {0}")]
    ParseError(String),

    #[error("Request failed after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("Backend returned {actual} outputs for a batch of {expected} inputs")]
    BatchMisaligned { expected: usize, actual: usize },

    #[error("Operation not supported by this backend: {0}")]
    Unsupported(String),

    #[error("Chat template error: {0}")]
    Template(#[from] tera::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while reading or writing dataset files.
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("Unsupported dataset format for '{0}': expected a .json or .jsonl file")]
    UnsupportedFormat(String),

    #[error("Record {index} is not a JSON object")]
    NotAnObject { index: usize },

    #[error("Expected a JSON array of records in '{0}'")]
    NotAnArray(String),

    #[error("Invalid JSON on line {line}: {source}")]
    InvalidLine {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that can occur while saving or restoring checkpoints.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Checkpoint cursor {cursor} exceeds dataset length {len}")]
    CursorOutOfRange { cursor: usize, len: usize },

    #[error("Checkpoint dataset error: {0}")]
    Dataset(#[from] DatasetError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised by similarity index implementations.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Vector dimension mismatch: index expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Got {vectors} vectors but {metas} metadata entries")]
    LengthMismatch { vectors: usize, metas: usize },

    #[error("Corrupt index file '{path}': {reason}")]
    Corrupt { path: String, reason: String },

    #[error("Vector database error: {0}")]
    Remote(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors found while validating a run configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("Mission '{mission}' is not supported by the {backend} backend")]
    UnsupportedMission { mission: String, backend: String },

    #[error("Unsupported similarity index backend: {0}")]
    UnknownIndexBackend(String),

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Top-level error for a tagging run.
#[derive(Debug, Error)]
pub enum TaggerError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
