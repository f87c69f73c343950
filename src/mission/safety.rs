use serde_json::Value;

use super::{AnnotationStrategy, InputStyle, Mission, ParseOutcome};
use crate::dataset::Record;

const FIELDS: [&str; 1] = ["safety"];

/// Guard-model codes and the labels written to records.
pub const SAFETY_LABELS: [(&str, &str); 15] = [
    ("S1", "Violent Crimes"),
    ("S2", "Non-Violent Crimes"),
    ("S3", "Sex-Related Crimes"),
    ("S4", "Child Sexual Exploitation"),
    ("S5", "Defamation"),
    ("S6", "Specialized Advice"),
    ("S7", "Privacy"),
    ("S8", "Intellectual Property"),
    ("S9", "Indiscriminate Weapons"),
    ("S10", "Hate"),
    ("S11", "Suicide & Self-Harm"),
    ("S12", "Sexual Content"),
    ("S13", "Elections"),
    ("S14", "Code Interpreter Abuse"),
    ("safe", "Safe"),
];

/// Map a guard-model reply to its label.
///
/// The code is read from the last non-empty line (`"unsafe\nS1"` yields
/// `S1`); when several comma-separated codes are given the first one wins.
pub fn safety_label(raw: &str) -> Option<&'static str> {
    let line = raw.lines().map(str::trim).filter(|l| !l.is_empty()).last()?;
    let code = line.split(',').next()?.trim();
    SAFETY_LABELS
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, label)| *label)
}

/// Labels a prompt/response pair with a guard model.
#[derive(Debug, Clone, Copy, Default)]
pub struct SafetyStrategy;

impl AnnotationStrategy for SafetyStrategy {
    fn mission(&self) -> Mission {
        Mission::Safety
    }

    fn input_style(&self) -> InputStyle {
        InputStyle::Paired
    }

    /// The guard model sees the raw conversation, not a template.
    fn build_prompt(&self, prompt: &str, _response: Option<&str>) -> Option<String> {
        Some(prompt.to_string())
    }

    fn parse_response(&self, raw: &str, record: &mut Record) -> ParseOutcome {
        match safety_label(raw) {
            Some(label) => {
                record.insert("safety".to_string(), Value::String(label.to_string()));
                ParseOutcome::Annotated
            }
            None => {
                tracing::warn!(reply = raw.trim(), "Unrecognized safety code");
                self.reset_fields(record);
                ParseOutcome::Degraded
            }
        }
    }

    fn output_fields(&self) -> &'static [&'static str] {
        &FIELDS
    }
}
