//! Crash-and-resume behavior of the batch engine with the file checkpoint
//! store.

use std::ops::Range;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use datatagger::checkpoint::{CheckpointStore, FileCheckpointStore};
use datatagger::dataset::{load_dataset, save_dataset};
use datatagger::{BackendError, BatchEngine, BatchProcessor, Record, TaggerError};

/// Tags each record with the run that processed it, optionally failing when
/// it reaches a given batch.
struct RunTagger {
    run: &'static str,
    fail_at: Option<usize>,
    seen: Mutex<Vec<Range<usize>>>,
}

impl RunTagger {
    fn new(run: &'static str, fail_at: Option<usize>) -> Self {
        Self {
            run,
            fail_at,
            seen: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl BatchProcessor for RunTagger {
    async fn process_batch(
        &self,
        range: Range<usize>,
        records: &mut [Record],
    ) -> Result<(), TaggerError> {
        self.seen.lock().unwrap().push(range.clone());
        if self.fail_at == Some(range.start) {
            return Err(BackendError::RequestFailed("engine crashed".to_string()).into());
        }
        for record in records.iter_mut() {
            record.insert("run".to_string(), Value::String(self.run.to_string()));
        }
        Ok(())
    }
}

fn dataset(n: usize) -> Vec<Record> {
    (0..n)
        .map(|i| json!({"instruction": format!("q{i}")}).as_object().cloned().unwrap())
        .collect()
}

fn store_in(dir: &Path) -> FileCheckpointStore {
    FileCheckpointStore::new(
        dir.join("out_checkpoint.jsonl"),
        dir.join("out_checkpoint_state.json"),
    )
    .unwrap()
}

#[tokio::test]
async fn test_resume_after_failure_processes_each_record_once() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.jsonl");
    let output = dir.path().join("out.jsonl");
    save_dataset(&dataset(10), &input).unwrap();
    let store = store_in(dir.path());
    let engine = BatchEngine::new(2, 1);

    let first = RunTagger::new("first", Some(6));
    let mut data = load_dataset(&input).unwrap();
    let err = engine.run(&mut data, &output, &store, &first).await;
    assert!(err.is_err());
    assert!(!output.exists());

    let state = store.load().unwrap().unwrap();
    assert_eq!(state.cursor, 6);

    let second = RunTagger::new("second", None);
    let mut data = load_dataset(&input).unwrap();
    let summary = engine.run(&mut data, &output, &store, &second).await.unwrap();

    assert_eq!(summary.resumed_from, 6);
    assert_eq!(summary.batches_processed, 2);
    assert_eq!(*second.seen.lock().unwrap(), vec![6..8, 8..10]);

    let records = load_dataset(&output).unwrap();
    assert_eq!(records.len(), 10);
    for (i, record) in records.iter().enumerate() {
        let expected = if i < 6 { "first" } else { "second" };
        assert_eq!(record["run"], expected, "record {i}");
        assert_eq!(record["instruction"], format!("q{i}"));
    }
    assert!(store.load().unwrap().is_none());
}

#[tokio::test]
async fn test_failure_before_first_checkpoint_interval_keeps_completed_batches() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("out.jsonl");
    let store = store_in(dir.path());
    // Checkpoints every 10 batches, so only the failure path saves.
    let engine = BatchEngine::new(3, 10);

    let first = RunTagger::new("first", Some(6));
    let mut data = dataset(9);
    assert!(engine.run(&mut data, &output, &store, &first).await.is_err());

    let state = store.load().unwrap().unwrap();
    assert_eq!(state.cursor, 6);
    assert_eq!(state.processed_prefix.len(), 6);
    assert_eq!(state.processed_prefix[5]["run"], "first");
}

#[tokio::test]
async fn test_interrupted_state_write_resumes_from_older_cursor() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("out.jsonl");
    let store = store_in(dir.path());
    let data = dataset(8);

    // A newer data file paired with an older state file.
    let mut tagged = data.clone();
    for record in tagged.iter_mut() {
        record.insert("run".to_string(), json!("first"));
    }
    store.save(&tagged, 4).unwrap();
    let old_state = std::fs::read(store.state_path()).unwrap();
    store.save(&tagged, 8).unwrap();
    std::fs::write(store.state_path(), old_state).unwrap();

    let engine = BatchEngine::new(4, 1);
    let second = RunTagger::new("second", None);
    let mut data = data;
    let summary = engine.run(&mut data, &output, &store, &second).await.unwrap();

    assert_eq!(summary.resumed_from, 4);
    let records = load_dataset(&output).unwrap();
    assert_eq!(records[3]["run"], "first");
    assert_eq!(records[4]["run"], "second");
}
