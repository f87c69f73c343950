use super::{AnnotationStrategy, InputStyle, Mission, ParseOutcome};
use crate::dataset::Record;

/// Fields written by the similarity post-processor once all embeddings are
/// indexed.
pub const SIMILARITY_FIELDS: [&str; 3] = [
    "min_neighbor_distance",
    "repeat_count",
    "min_similar_instruction",
];

/// Embeds prompts into the similarity index. Writes no fields per batch.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddingStrategy;

impl AnnotationStrategy for EmbeddingStrategy {
    fn mission(&self) -> Mission {
        Mission::Embedding
    }

    fn input_style(&self) -> InputStyle {
        InputStyle::Direct
    }

    fn build_prompt(&self, _prompt: &str, _response: Option<&str>) -> Option<String> {
        None
    }

    fn parse_response(&self, _raw: &str, _record: &mut Record) -> ParseOutcome {
        ParseOutcome::Annotated
    }

    fn output_fields(&self) -> &'static [&'static str] {
        &[]
    }
}
