//! Resumable batch-processing engine.
//!
//! The engine partitions a dataset into contiguous batches, hands each batch
//! to a [`BatchProcessor`], and periodically checkpoints the processed prefix
//! so a crashed run resumes where its last checkpoint left off.
//!
//! Batches run strictly one after another. A processor only ever sees the
//! mutable slice for its own batch, so records outside the batch cannot be
//! touched and a checkpoint never contains a partially applied batch.

use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::checkpoint::CheckpointStore;
use crate::dataset::{save_dataset, Record};
use crate::error::TaggerError;
use crate::progress::ProgressCounters;

/// Per-batch annotation work driven by [`BatchEngine`].
#[async_trait]
pub trait BatchProcessor: Send + Sync {
    /// Annotate the records at dataset indices `range`.
    ///
    /// `records` is exactly `dataset[range]`. Per-record failures should be
    /// absorbed here; an `Err` aborts the run after a best-effort checkpoint.
    async fn process_batch(
        &self,
        range: Range<usize>,
        records: &mut [Record],
    ) -> Result<(), TaggerError>;

    /// Finalize the whole dataset after every batch has completed.
    async fn postprocess(&self, _dataset: &mut [Record]) -> Result<(), TaggerError> {
        Ok(())
    }
}

/// Outcome of a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Number of records written to the output.
    pub total_records: usize,
    /// Cursor restored from a checkpoint (0 for a fresh run).
    pub resumed_from: usize,
    /// Batches processed in this invocation.
    pub batches_processed: usize,
    /// Where the annotated dataset was written.
    pub output: PathBuf,
}

/// Contiguous batch ranges tiling `[cursor, len)`, each at most `batch_size`
/// long.
pub fn batch_ranges(cursor: usize, len: usize, batch_size: usize) -> Vec<Range<usize>> {
    let size = batch_size.max(1);
    (cursor..len)
        .step_by(size)
        .map(|start| start..(start + size).min(len))
        .collect()
}

/// Sequential, checkpointing batch loop.
#[derive(Debug, Clone)]
pub struct BatchEngine {
    batch_size: usize,
    checkpoint_every: usize,
    counters: ProgressCounters,
}

impl BatchEngine {
    /// Create an engine that checkpoints after every `checkpoint_every`
    /// completed batches.
    pub fn new(batch_size: usize, checkpoint_every: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            checkpoint_every: checkpoint_every.max(1),
            counters: ProgressCounters::new(),
        }
    }

    /// Share progress counters with a monitor or processors.
    pub fn with_counters(mut self, counters: ProgressCounters) -> Self {
        self.counters = counters;
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Restore any checkpoint into `dataset` and return the resume cursor.
    ///
    /// The restored prefix replaces `dataset[0..cursor]` wholesale; anything
    /// at or beyond the cursor is left as loaded and will be recomputed. A
    /// checkpoint that covers more records than `dataset` holds belongs to a
    /// different input and is ignored.
    pub fn restore(
        &self,
        dataset: &mut Vec<Record>,
        store: &dyn CheckpointStore,
    ) -> Result<usize, TaggerError> {
        let Some(state) = store.load()? else {
            return Ok(0);
        };
        if state.cursor > dataset.len() {
            warn!(
                cursor = state.cursor,
                dataset_len = dataset.len(),
                "Checkpoint covers more records than the input dataset, ignoring it"
            );
            return Ok(0);
        }
        dataset.splice(0..state.cursor, state.processed_prefix);
        info!(cursor = state.cursor, "Checkpoint found, resuming");
        Ok(state.cursor)
    }

    /// Number of batches a run over `dataset_len` records would still process
    /// given the checkpoint currently in `store`.
    pub fn pending_batches(
        &self,
        dataset_len: usize,
        store: &dyn CheckpointStore,
    ) -> Result<usize, TaggerError> {
        let cursor = match store.load()? {
            Some(state) if state.cursor <= dataset_len => state.cursor,
            _ => 0,
        };
        Ok(batch_ranges(cursor, dataset_len, self.batch_size).len())
    }

    /// Run `processor` over `dataset`, checkpointing through `store`, then
    /// write the result to `output` and remove the checkpoint.
    ///
    /// On failure the latest fully completed batch boundary is saved
    /// (best effort) before the error is returned.
    pub async fn run<P>(
        &self,
        dataset: &mut Vec<Record>,
        output: &Path,
        store: &dyn CheckpointStore,
        processor: &P,
    ) -> Result<RunSummary, TaggerError>
    where
        P: BatchProcessor + ?Sized,
    {
        let cursor = self.restore(dataset, store)?;
        let mut completed_end = cursor;

        let outcome = self
            .drive(dataset, output, store, processor, cursor, &mut completed_end)
            .await;

        match outcome {
            Ok(batches_processed) => Ok(RunSummary {
                total_records: dataset.len(),
                resumed_from: cursor,
                batches_processed,
                output: output.to_path_buf(),
            }),
            Err(err) => {
                error!(error = %err, completed_end = completed_end, "Error during processing");
                match store.save(dataset, completed_end) {
                    Ok(()) => info!(cursor = completed_end, "Checkpoint saved after failure"),
                    Err(save_err) => {
                        warn!(error = %save_err, "Failed to save checkpoint after failure")
                    }
                }
                Err(err)
            }
        }
    }

    async fn drive<P>(
        &self,
        dataset: &mut Vec<Record>,
        output: &Path,
        store: &dyn CheckpointStore,
        processor: &P,
        cursor: usize,
        completed_end: &mut usize,
    ) -> Result<usize, TaggerError>
    where
        P: BatchProcessor + ?Sized,
    {
        let ranges = batch_ranges(cursor, dataset.len(), self.batch_size);
        let num_batches = ranges.len();
        info!(
            total = dataset.len(),
            cursor = cursor,
            batches = num_batches,
            batch_size = self.batch_size,
            "Starting batch processing"
        );

        for (i, range) in ranges.into_iter().enumerate() {
            debug!(start = range.start, end = range.end, "Processing batch");
            processor
                .process_batch(range.clone(), &mut dataset[range.clone()])
                .await?;
            *completed_end = range.end;
            self.counters.batches.fetch_add(1, Ordering::Relaxed);

            if (i + 1) % self.checkpoint_every == 0 {
                store.save(dataset, range.end)?;
                self.counters.checkpoints.fetch_add(1, Ordering::Relaxed);
                info!(cursor = range.end, "Checkpoint saved");
            }
        }

        processor.postprocess(dataset).await?;
        save_dataset(dataset, output)?;
        store.cleanup()?;
        info!(
            output = %output.display(),
            records = dataset.len(),
            "Processing completed, checkpoint cleaned up"
        );
        Ok(num_batches)
    }
}
