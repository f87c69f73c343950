use serde_json::Value;

use super::{decode_reply, AnnotationStrategy, Mission, ParseOutcome};
use crate::dataset::Record;
use crate::prompts::{build_classification_prompt, is_task_category, FALLBACK_CATEGORY};

const FIELDS: [&str; 2] = ["task_category", "other_task_category"];

/// Assigns a primary task category from the closed set plus secondary tags.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClassificationStrategy;

impl AnnotationStrategy for ClassificationStrategy {
    fn mission(&self) -> Mission {
        Mission::Classification
    }

    fn build_prompt(&self, prompt: &str, _response: Option<&str>) -> Option<String> {
        Some(build_classification_prompt(prompt))
    }

    fn parse_response(&self, raw: &str, record: &mut Record) -> ParseOutcome {
        let reply = match decode_reply(raw) {
            Ok(reply) => reply,
            Err(err) => {
                tracing::error!(mission = %self.mission(), error = %err, "Failed to parse model reply");
                self.reset_fields(record);
                return ParseOutcome::Degraded;
            }
        };

        let category = match reply.get("primary_tag") {
            None | Some(Value::Null) => Value::Null,
            Some(Value::String(tag)) if is_task_category(tag) => Value::String(tag.clone()),
            Some(_) => Value::String(FALLBACK_CATEGORY.to_string()),
        };
        let others = reply.get("other_tags").cloned().unwrap_or(Value::Null);

        record.insert("task_category".to_string(), category);
        record.insert("other_task_category".to_string(), others);
        ParseOutcome::Annotated
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
    fn test_known_category_kept() {
        let mut record = Record::new();
        ClassificationStrategy.parse_response(
            r#"{"primary_tag": "Coding & Debugging", "other_tags": ["Information seeking"]}"#,
            &mut record,
        );
        assert_eq!(record["task_category"], "Coding & Debugging");
        assert_eq!(record["other_task_category"], json!(["Information seeking"]));
    }

    #[test]
    fn test_unknown_category_maps_to_others() {
        let mut record = Record::new();
        ClassificationStrategy
            .parse_response(r#"{"primary_tag": "Cooking", "other_tags": []}"#, &mut record);
        assert_eq!(record["task_category"], "Others");

        ClassificationStrategy.parse_response(r#"{"primary_tag": 7}"#, &mut record);
        assert_eq!(record["task_category"], "Others");
        assert_eq!(record["other_task_category"], Value::Null);
    }

    #[test]
    fn test_missing_primary_tag_is_null() {
        let mut record = Record::new();
        ClassificationStrategy.parse_response(r#"{"other_tags": ["Math"]}"#, &mut record);
        assert_eq!(record["task_category"], Value::Null);
    }

    #[test]
    fn test_unparseable_reply_degrades() {
        let mut record = Record::new();
        assert_eq!(
            ClassificationStrategy.parse_response("no idea", &mut record),
            ParseOutcome::Degraded
        );
        assert_eq!(record["task_category"], Value::Null);
        assert_eq!(record["other_task_category"], Value::Null);
    }
}
