use super::{parse_json_reply, AnnotationStrategy, Mission, ParseOutcome};
use crate::dataset::Record;
use crate::prompts::{build_combined_quality_prompt, build_input_quality_prompt};

const FIELDS: [&str; 4] = [
    "input_quality",
    "response_quality",
    "input_quality_explanation",
    "response_quality_explanation",
];

/// Rates the query, and the response when one is present.
#[derive(Debug, Clone, Copy, Default)]
pub struct QualityStrategy;

impl AnnotationStrategy for QualityStrategy {
    fn mission(&self) -> Mission {
        Mission::Quality
    }

    fn build_prompt(&self, prompt: &str, response: Option<&str>) -> Option<String> {
        match response.filter(|r| !r.is_empty()) {
            Some(response) => Some(build_combined_quality_prompt(prompt, response)),
            None => Some(build_input_quality_prompt(prompt)),
        }
    }

    fn parse_response(&self, raw: &str, record: &mut Record) -> ParseOutcome {
        let pairs = FIELDS.map(|f| (f, f));
        parse_json_reply(self, raw, record, &pairs)
    }

    fn output_fields(&self) -> &'static [&'static str] {
        &FIELDS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_prompt_variant_depends_on_response() {
        let with = QualityStrategy.build_prompt("Q", Some("A")).unwrap();
        let without = QualityStrategy.build_prompt("Q", None).unwrap();
        let empty = QualityStrategy.build_prompt("Q", Some("")).unwrap();

        assert!(with.contains("## 2. AI Response\nA"));
        assert!(without.contains("Query Quality Analyst"));
        assert_eq!(empty, without);
    }

    #[test]
    fn test_parse_combined_reply() {
        let mut record = Record::new();
        let raw = r#"{"input_quality": "4.0", "response_quality": 3.5, "input_quality_explanation": "clear", "response_quality_explanation": "ok"}"#;

        assert_eq!(
            QualityStrategy.parse_response(raw, &mut record),
            ParseOutcome::Annotated
        );
        assert_eq!(record["input_quality"], "4.0");
        assert_eq!(record["response_quality"], 3.5);
    }

    #[test]
    fn test_query_only_reply_leaves_response_fields_null() {
        let mut record = Record::new();
        let raw = r#"{"input_quality_explanation": "vague", "scores": {"clarity": "2""#;

        QualityStrategy.parse_response(raw, &mut record);
        assert_eq!(record["input_quality_explanation"], "vague");
        assert_eq!(record["response_quality"], Value::Null);
        assert_eq!(record["input_quality"], Value::Null);
    }

    #[test]
    fn test_garbage_resets_fields() {
        let mut record = Record::new();
        record.insert("input_quality".into(), "5".into());

        assert_eq!(
            QualityStrategy.parse_response("I cannot rate this.", &mut record),
            ParseOutcome::Degraded
        );
        for field in FIELDS {
            assert_eq!(record[field], Value::Null);
        }
    }
}
