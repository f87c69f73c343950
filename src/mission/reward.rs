use serde_json::{Number, Value};

use super::{decode_reply, AnnotationStrategy, InputStyle, Mission, ParseOutcome};
use crate::dataset::Record;

const FIELDS: [&str; 1] = ["instruct_reward"];

/// Scores a prompt/response pair with a reward model.
#[derive(Debug, Clone, Copy, Default)]
pub struct RewardStrategy;

impl RewardStrategy {
    fn score(raw: &str) -> Option<Value> {
        let trimmed = raw.trim();
        if let Ok(score) = trimmed.parse::<f64>() {
            return Number::from_f64(score).map(Value::Number);
        }
        decode_reply(trimmed)
            .ok()?
            .get("score")
            .filter(|v| !v.is_null())
            .cloned()
    }
}

impl AnnotationStrategy for RewardStrategy {
    fn mission(&self) -> Mission {
        Mission::Reward
    }

    fn input_style(&self) -> InputStyle {
        InputStyle::Paired
    }

    fn build_prompt(&self, _prompt: &str, _response: Option<&str>) -> Option<String> {
        None
    }

    /// Accepts either a bare scalar score or a `{"score": ...}` object.
    fn parse_response(&self, raw: &str, record: &mut Record) -> ParseOutcome {
        match Self::score(raw) {
            Some(score) => {
                record.insert("instruct_reward".to_string(), score);
                ParseOutcome::Annotated
            }
            None => {
                tracing::error!(reply = raw.trim(), "Failed to read reward score");
                self.reset_fields(record);
                ParseOutcome::Degraded
            }
        }
    }

    fn output_fields(&self) -> &'static [&'static str] {
        &FIELDS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalar_and_object_scores() {
        let mut record = Record::new();
        RewardStrategy.parse_response("1.25", &mut record);
        assert_eq!(record["instruct_reward"], json!(1.25));

        RewardStrategy.parse_response(r#"{"score": -3.5}"#, &mut record);
        assert_eq!(record["instruct_reward"], json!(-3.5));
    }

    #[test]
    fn test_non_finite_or_missing_score_degrades() {
        let mut record = Record::new();
        assert_eq!(
            RewardStrategy.parse_response("NaN", &mut record),
            ParseOutcome::Degraded
        );
        assert_eq!(record["instruct_reward"], Value::Null);
        assert_eq!(
            RewardStrategy.parse_response(r#"{"other": 1}"#, &mut record),
            ParseOutcome::Degraded
        );
    }
}
