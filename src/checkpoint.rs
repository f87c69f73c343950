//! Durable progress tracking for resumable runs.
//!
//! A checkpoint is a pair of files next to the run's output:
//! - a data file holding the processed prefix `dataset[0..cursor]`, in the
//!   output's format
//! - a state file `{current_index, total_items, timestamp}` where
//!   `current_index` is the cursor
//!
//! Both files are written to temporary paths and renamed into place, data
//! first and state second. The two renames are not jointly atomic. A crash
//! between them leaves a new data file paired with the previous state file;
//! since records below a cursor are never recomputed, the first
//! `current_index` entries of the newer data file are exactly the older
//! checkpoint, and [`FileCheckpointStore::load`] truncates to that length.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::dataset::{encode_dataset, load_dataset, DatasetFormat, Record};
use crate::error::{CheckpointError, DatasetError};
use crate::utils::write_atomic;

/// Restored progress: the processed records and the cursor they end at.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointState {
    /// Records `dataset[0..cursor]` as they were at the last save.
    pub processed_prefix: Vec<Record>,
    /// Index below which every record is fully processed.
    pub cursor: usize,
}

/// Contents of the checkpoint state file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMeta {
    /// Authoritative resume cursor.
    pub current_index: usize,
    /// Dataset length at save time (informational).
    #[serde(default)]
    pub total_items: usize,
    /// Local save time (informational).
    #[serde(default)]
    pub timestamp: String,
}

/// Persists and restores run progress.
pub trait CheckpointStore: Send + Sync {
    /// Durably record `dataset[0..cursor]` and `cursor`, replacing any
    /// previous checkpoint.
    fn save(&self, dataset: &[Record], cursor: usize) -> Result<(), CheckpointError>;

    /// Load the last saved checkpoint, if a complete one exists.
    fn load(&self) -> Result<Option<CheckpointState>, CheckpointError>;

    /// Remove all checkpoint artifacts. Absent files are not an error.
    fn cleanup(&self) -> Result<(), CheckpointError>;
}

/// Two-file checkpoint store on the local filesystem.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    data_path: PathBuf,
    state_path: PathBuf,
    format: DatasetFormat,
}

impl FileCheckpointStore {
    /// Create a store with explicit paths. The data file format follows its
    /// extension.
    pub fn new(data_path: PathBuf, state_path: PathBuf) -> Result<Self, DatasetError> {
        let format = DatasetFormat::from_path(&data_path)?;
        Ok(Self {
            data_path,
            state_path,
            format,
        })
    }

    /// Path of the checkpoint data file.
    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    /// Path of the checkpoint state file.
    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    fn read_meta(&self) -> Result<CheckpointMeta, CheckpointError> {
        let content = fs::read_to_string(&self.state_path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn save(&self, dataset: &[Record], cursor: usize) -> Result<(), CheckpointError> {
        if cursor > dataset.len() {
            return Err(CheckpointError::CursorOutOfRange {
                cursor,
                len: dataset.len(),
            });
        }

        let data = encode_dataset(&dataset[..cursor], self.format)?;
        let meta = CheckpointMeta {
            current_index: cursor,
            total_items: dataset.len(),
            timestamp: Local::now().format("%Y-%m-%d %H:%M:%S%.6f").to_string(),
        };
        let state = serde_json::to_vec(&meta)?;

        write_atomic(&self.data_path, &data)?;
        write_atomic(&self.state_path, &state)?;

        debug!(
            cursor = cursor,
            data_file = %self.data_path.display(),
            "Checkpoint written"
        );
        Ok(())
    }

    fn load(&self) -> Result<Option<CheckpointState>, CheckpointError> {
        let has_data = self.data_path.exists();
        let has_state = self.state_path.exists();

        if !has_data || !has_state {
            if has_data || has_state {
                warn!(
                    data_file = %self.data_path.display(),
                    state_file = %self.state_path.display(),
                    "Incomplete checkpoint found, ignoring it"
                );
            }
            return Ok(None);
        }

        let meta = self.read_meta()?;
        let mut processed_prefix = load_dataset(&self.data_path)?;

        if processed_prefix.len() < meta.current_index {
            warn!(
                cursor = meta.current_index,
                records = processed_prefix.len(),
                data_file = %self.data_path.display(),
                "Checkpoint data is shorter than its cursor, ignoring it"
            );
            return Ok(None);
        }
        if processed_prefix.len() > meta.current_index {
            info!(
                cursor = meta.current_index,
                records = processed_prefix.len(),
                "Checkpoint data is ahead of its state file, truncating to cursor"
            );
            processed_prefix.truncate(meta.current_index);
        }

        Ok(Some(CheckpointState {
            processed_prefix,
            cursor: meta.current_index,
        }))
    }

    fn cleanup(&self) -> Result<(), CheckpointError> {
        for path in [&self.state_path, &self.data_path] {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}
