use std::ops::Range;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use super::count_outcome;
use crate::dataset::{field_text, Record};
use crate::engine::BatchProcessor;
use crate::error::TaggerError;
use crate::language::LanguageDetector;
use crate::mission::ParseOutcome;
use crate::progress::ProgressCounters;

/// Writes the detected language of each record's prompt to `language`.
///
/// Used by both backends. Records with an empty or missing prompt, and
/// prompts whose language cannot be determined, get `null`.
pub struct LanguageProcessor {
    detector: Arc<dyn LanguageDetector>,
    prompt_field: String,
    counters: ProgressCounters,
}

impl LanguageProcessor {
    pub fn new(
        detector: Arc<dyn LanguageDetector>,
        prompt_field: &str,
        counters: ProgressCounters,
    ) -> Self {
        Self {
            detector,
            prompt_field: prompt_field.to_string(),
            counters,
        }
    }

    fn tag(&self, index: usize, record: &mut Record) -> ParseOutcome {
        let text = field_text(record, &self.prompt_field).unwrap_or_default();
        if text.trim().is_empty() {
            record.insert("language".to_string(), Value::Null);
            return ParseOutcome::Degraded;
        }

        match self.detector.detect(&text) {
            Some(code) => {
                record.insert("language".to_string(), Value::String(code));
                ParseOutcome::Annotated
            }
            None => {
                warn!(index = index, "Could not determine language");
                record.insert("language".to_string(), Value::Null);
                ParseOutcome::Degraded
            }
        }
    }
}

#[async_trait]
impl BatchProcessor for LanguageProcessor {
    async fn process_batch(
        &self,
        range: Range<usize>,
        records: &mut [Record],
    ) -> Result<(), TaggerError> {
        debug!(start = range.start, end = range.end, "Detecting languages");
        for (offset, record) in records.iter_mut().enumerate() {
            let outcome = self.tag(range.start + offset, record);
            count_outcome(&self.counters, outcome);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::Ordering;

    /// Calls everything containing "bonjour" French.
    struct KeywordDetector;

    impl LanguageDetector for KeywordDetector {
        fn detect(&self, text: &str) -> Option<String> {
            text.contains("bonjour").then(|| "FR".to_string())
        }
    }

    #[tokio::test]
    async fn test_language_tagging() {
        let counters = ProgressCounters::new();
        let processor =
            LanguageProcessor::new(Arc::new(KeywordDetector), "instruction", counters.clone());

        let mut data: Vec<Record> = vec![
            json!({"instruction": "bonjour tout le monde"}),
            json!({"instruction": "???"}),
            json!({"instruction": "   "}),
            json!({"other": "bonjour"}),
        ]
        .into_iter()
        .map(|v| v.as_object().cloned().unwrap())
        .collect();

        processor.process_batch(4..8, &mut data).await.unwrap();

        assert_eq!(data[0]["language"], "FR");
        assert_eq!(data[1]["language"], Value::Null);
        assert_eq!(data[2]["language"], Value::Null);
        assert_eq!(data[3]["language"], Value::Null);
        assert_eq!(counters.annotated.load(Ordering::Relaxed), 1);
        assert_eq!(counters.degraded.load(Ordering::Relaxed), 3);
    }
}
