use std::sync::Arc;

use serde_json::{json, Value};

use super::{neighbor_info, SimilarityIndex, DEFAULT_DISTANCE_THRESHOLD, DEFAULT_TOP_K};
use crate::dataset::{record_meta, Record};
use crate::error::IndexError;

/// Writes `min_neighbor_distance`, `repeat_count` and
/// `min_similar_instruction` to every record whose embedding is in the index.
///
/// Records are visited one at a time; each costs one lookup and one search.
pub struct SimilarityPostProcessor {
    index: Arc<dyn SimilarityIndex>,
    field: String,
    threshold: f64,
    top_k: usize,
}

impl SimilarityPostProcessor {
    /// `field` is the record field whose text was used as index metadata.
    pub fn new(index: Arc<dyn SimilarityIndex>, field: impl Into<String>) -> Self {
        Self {
            index,
            field: field.into(),
            threshold: DEFAULT_DISTANCE_THRESHOLD,
            top_k: DEFAULT_TOP_K,
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Annotate `dataset` in place and return how many records were updated.
    pub async fn apply(&self, dataset: &mut [Record]) -> Result<usize, IndexError> {
        let mut updated = 0;
        for record in dataset.iter_mut() {
            let full_meta = record_meta(record, &self.field);
            let meta = self.index.stored_meta(&full_meta);
            let Some(vector) = self.index.vector_for_meta(meta).await? else {
                continue;
            };

            let info = neighbor_info(
                self.index.as_ref(),
                &vector,
                Some(meta),
                self.threshold,
                self.top_k,
            )
            .await?;

            record.insert(
                "min_neighbor_distance".to_string(),
                info.min_distance.map_or(Value::Null, |d| json!(d)),
            );
            record.insert("repeat_count".to_string(), json!(info.repeat_count));
            record.insert(
                "min_similar_instruction".to_string(),
                info.nearest_meta.map_or(Value::Null, Value::String),
            );
            updated += 1;
        }

        tracing::info!(
            updated = updated,
            total = dataset.len(),
            "Similarity fields updated"
        );
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::similarity::FlatIndex;
    use serde_json::json;

    fn record(v: Value) -> Record {
        v.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_apply_writes_similarity_fields() {
        let dir = tempfile::tempdir().unwrap();
        let index = Arc::new(
            FlatIndex::open(
                &dir.path().join("f.index"),
                &dir.path().join("f_meta.json"),
                2,
            )
            .unwrap(),
        );
        index
            .insert(
                &[vec![0.0, 0.0], vec![0.0, 0.1], vec![5.0, 5.0]],
                &["hello".into(), "hello!".into(), "far away".into()],
            )
            .await
            .unwrap();

        let mut dataset = vec![
            record(json!({"instruction": "hello"})),
            record(json!({"instruction": "far away"})),
            record(json!({"instruction": "never embedded"})),
        ];

        let updated = SimilarityPostProcessor::new(index, "instruction")
            .apply(&mut dataset)
            .await
            .unwrap();

        assert_eq!(updated, 2);
        assert_eq!(dataset[0]["min_similar_instruction"], "hello!");
        assert_eq!(dataset[0]["min_neighbor_distance"], json!(0.01));
        assert_eq!(dataset[0]["repeat_count"], 1);
        assert_eq!(dataset[1]["repeat_count"], 0);
        assert!(dataset[2].get("repeat_count").is_none());
    }
}
