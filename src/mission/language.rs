use super::{parse_json_reply, AnnotationStrategy, InputStyle, Mission, ParseOutcome};
use crate::dataset::Record;

const FIELDS: [&str; 1] = ["language"];

/// Language identification. Records are annotated by a local detector
/// rather than an inference backend; see [`crate::language`].
#[derive(Debug, Clone, Copy, Default)]
pub struct LanguageStrategy;

impl AnnotationStrategy for LanguageStrategy {
    fn mission(&self) -> Mission {
        Mission::Language
    }

    fn input_style(&self) -> InputStyle {
        InputStyle::Direct
    }

    fn build_prompt(&self, _prompt: &str, _response: Option<&str>) -> Option<String> {
        None
    }

    fn parse_response(&self, raw: &str, record: &mut Record) -> ParseOutcome {
        parse_json_reply(self, raw, record, &[("language", "language")])
    }

    fn output_fields(&self) -> &'static [&'static str] {
        &FIELDS
    }
}
