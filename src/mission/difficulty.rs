use super::{parse_json_reply, AnnotationStrategy, Mission, ParseOutcome};
use crate::dataset::Record;
use crate::prompts::build_difficulty_prompt;

const FIELDS: [&str; 3] = ["intent", "knowledge", "difficulty"];

/// Extracts intent, required knowledge and a difficulty rating.
#[derive(Debug, Clone, Copy, Default)]
pub struct DifficultyStrategy;

impl AnnotationStrategy for DifficultyStrategy {
    fn mission(&self) -> Mission {
        Mission::Difficulty
    }

    fn build_prompt(&self, prompt: &str, _response: Option<&str>) -> Option<String> {
        Some(build_difficulty_prompt(prompt))
    }

    fn parse_response(&self, raw: &str, record: &mut Record) -> ParseOutcome {
        let pairs = FIELDS.map(|f| (f, f));
        parse_json_reply(self, raw, record, &pairs)
    }

    fn output_fields(&self) -> &'static [&'static str] {
        &FIELDS
    }
}
