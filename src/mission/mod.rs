//! Annotation missions.
//!
//! A [`Mission`] selects one [`AnnotationStrategy`] for the lifetime of a
//! run. The strategy decides how a record is presented to the backend and
//! how the backend's raw reply is folded back into the record:
//!
//! | Mission | Input | Output fields |
//! |---|---|---|
//! | quality | prompt template, optionally with the response | `input_quality`, `response_quality`, explanations |
//! | difficulty | prompt template | `intent`, `knowledge`, `difficulty` |
//! | classification | prompt template | `task_category`, `other_task_category` |
//! | safety | raw prompt/response pair | `safety` |
//! | language | none (local detector) | `language` |
//! | reward | raw prompt/response pair | `instruct_reward` |
//! | embedding | none (embedding call) | similarity fields, written after the run |
//!
//! A reply that cannot be parsed resets the mission's fields to `null` for
//! that record only.

mod classification;
mod difficulty;
mod embedding;
mod language;
mod quality;
mod reward;
mod safety;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::dataset::Record;
use crate::error::ConfigError;
use crate::utils::json_repair::{repair_json_object, JsonRepairError};

pub use classification::ClassificationStrategy;
pub use difficulty::DifficultyStrategy;
pub use embedding::{EmbeddingStrategy, SIMILARITY_FIELDS};
pub use language::LanguageStrategy;
pub use quality::QualityStrategy;
pub use reward::RewardStrategy;
pub use safety::{safety_label, SafetyStrategy, SAFETY_LABELS};

/// The annotation task performed by a run.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Mission {
    Quality,
    Difficulty,
    Classification,
    Safety,
    Language,
    Reward,
    Embedding,
}

impl Mission {
    pub const ALL: [Mission; 7] = [
        Mission::Quality,
        Mission::Difficulty,
        Mission::Classification,
        Mission::Safety,
        Mission::Language,
        Mission::Reward,
        Mission::Embedding,
    ];

    /// Lowercase name, used in derived output file names.
    pub fn name(&self) -> &'static str {
        match self {
            Mission::Quality => "quality",
            Mission::Difficulty => "difficulty",
            Mission::Classification => "classification",
            Mission::Safety => "safety",
            Mission::Language => "language",
            Mission::Reward => "reward",
            Mission::Embedding => "embedding",
        }
    }

    /// The strategy implementing this mission.
    pub fn strategy(&self) -> Box<dyn AnnotationStrategy> {
        match self {
            Mission::Quality => Box::new(QualityStrategy),
            Mission::Difficulty => Box::new(DifficultyStrategy),
            Mission::Classification => Box::new(ClassificationStrategy),
            Mission::Safety => Box::new(SafetyStrategy),
            Mission::Language => Box::new(LanguageStrategy),
            Mission::Reward => Box::new(RewardStrategy),
            Mission::Embedding => Box::new(EmbeddingStrategy),
        }
    }
}

impl fmt::Display for Mission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Mission {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Mission::ALL
            .into_iter()
            .find(|m| m.name() == wanted)
            .ok_or_else(|| ConfigError::InvalidValue {
                key: "mission".to_string(),
                message: format!("unknown mission '{s}'"),
            })
    }
}

/// How a record is turned into backend input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputStyle {
    /// A mission prompt template, answered as JSON after a `{` prefill.
    Templated,
    /// The record's own prompt/response pair, evaluated as a conversation.
    Paired,
    /// No text generation; handled by a dedicated capability.
    Direct,
}

/// Result of folding one reply into a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseOutcome {
    /// Fields were written from the reply.
    Annotated,
    /// The reply was unusable and the fields were reset to `null`.
    Degraded,
}

/// Per-mission prompt construction and reply parsing.
pub trait AnnotationStrategy: Send + Sync + fmt::Debug {
    fn mission(&self) -> Mission;

    fn input_style(&self) -> InputStyle {
        InputStyle::Templated
    }

    /// Build the backend prompt for a record's prompt text and, where the
    /// mission uses it, its response text. `None` for missions that do not
    /// go through a prompt template.
    fn build_prompt(&self, prompt: &str, response: Option<&str>) -> Option<String>;

    /// Fold a raw backend reply into `record`. Never fails: an unusable reply
    /// resets the mission's fields to `null`.
    fn parse_response(&self, raw: &str, record: &mut Record) -> ParseOutcome;

    /// Fields this mission writes.
    fn output_fields(&self) -> &'static [&'static str];

    /// Set every output field to `null`.
    fn reset_fields(&self, record: &mut Record) {
        for field in self.output_fields() {
            record.insert((*field).to_string(), Value::Null);
        }
    }
}

/// Decode a JSON reply that may be missing its opening `{` prefill.
pub fn decode_reply(raw: &str) -> Result<Map<String, Value>, JsonRepairError> {
    let trimmed = raw.trim();
    if trimmed.starts_with('{') {
        return repair_json_object(trimmed);
    }
    repair_json_object(&format!("{{{trimmed}")).or_else(|_| repair_json_object(trimmed))
}

/// Copy `(reply key, record field)` pairs, writing `null` for missing keys.
fn copy_fields(reply: &Map<String, Value>, record: &mut Record, pairs: &[(&str, &str)]) {
    for (key, field) in pairs {
        let value = reply.get(*key).cloned().unwrap_or(Value::Null);
        record.insert((*field).to_string(), value);
    }
}

/// Shared body of the JSON-reply missions.
fn parse_json_reply(
    strategy: &dyn AnnotationStrategy,
    raw: &str,
    record: &mut Record,
    pairs: &[(&str, &str)],
) -> ParseOutcome {
    match decode_reply(raw) {
        Ok(reply) => {
            copy_fields(&reply, record, pairs);
            ParseOutcome::Annotated
        }
        Err(err) => {
            tracing::error!(
                mission = %strategy.mission(),
                error = %err,
                "Failed to parse model reply"
            );
            strategy.reset_fields(record);
            ParseOutcome::Degraded
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mission_names_round_trip() {
        for mission in Mission::ALL {
            assert_eq!(mission.name().parse::<Mission>().unwrap(), mission);
            assert_eq!(mission.strategy().mission(), mission);
        }
        assert_eq!("QUALITY".parse::<Mission>().unwrap(), Mission::Quality);
        assert!("sentiment".parse::<Mission>().is_err());
    }

    #[test]
    fn test_decode_reply_without_prefill() {
        let reply = decode_reply(r#""intent": "x", "difficulty": "1.0""#).unwrap();
        assert_eq!(reply["difficulty"], "1.0");

        let reply = decode_reply("  {\"intent\": \"y\"}  ").unwrap();
        assert_eq!(reply["intent"], "y");
    }

    #[test]
    fn test_decode_reply_with_prose_before_object() {
        let reply = decode_reply(r#"Here it is: {"primary_tag": "Math"}"#).unwrap();
        assert_eq!(reply["primary_tag"], "Math");
    }

    #[test]
    fn test_input_styles() {
        assert_eq!(Mission::Quality.strategy().input_style(), InputStyle::Templated);
        assert_eq!(Mission::Safety.strategy().input_style(), InputStyle::Paired);
        assert_eq!(Mission::Reward.strategy().input_style(), InputStyle::Paired);
        assert_eq!(Mission::Language.strategy().input_style(), InputStyle::Direct);
        assert_eq!(Mission::Embedding.strategy().input_style(), InputStyle::Direct);
    }
}
