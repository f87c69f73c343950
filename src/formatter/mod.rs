//! Record normalizer behind the `format` subcommand.
//!
//! Converts heterogeneous conversational datasets into one record layout:
//!
//! - ShareGPT entries carrying a `conversations` list are kept as-is
//! - Alpaca entries (`instruction`, optional `input`, `output` or `chosen`)
//!   and `history` pairs are rebuilt into `{from, value}` turns
//!
//! Annotation fields written by earlier tagging runs are carried over and
//! validated on the way: scores outside `[0, 5]` are dropped, unknown task
//! categories become `Others` and unknown safety labels become `Safe`. Empty
//! values (`""`, `[]`, `"N/A"`, `"null"`, whitespace) are treated as missing
//! and missing fields are omitted from the output.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::{json, Map, Number, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::dataset::{load_dataset, DatasetFormat, Record};
use crate::error::DatasetError;
use crate::mission::SAFETY_LABELS;
use crate::utils::write_atomic;

/// Task categories a record may carry.
pub const ALLOWED_TASK_CATEGORIES: [&str; 13] = [
    "Information seeking",
    "Reasoning",
    "Planning",
    "Editing",
    "Coding & Debugging",
    "Math",
    "Role playing",
    "Data analysis",
    "Creative writing",
    "Advice seeking",
    "Translation",
    "Brainstorming",
    "Others",
];

const SCORE_RANGE: (f64, f64) = (0.0, 5.0);

/// Records between two progress log lines.
const LOG_EVERY: usize = 1000;

/// Fields copied verbatim when present.
const PASSTHROUGH_AFTER_SCORES: [&str; 2] =
    ["input_quality_explanation", "response_quality_explanation"];
const PASSTHROUGH_TAIL: [&str; 5] = [
    "instruct_reward",
    "task_category_generator",
    "min_neighbor_distance",
    "repeat_count",
    "min_similar_instruction",
];

#[derive(Debug, Clone)]
pub struct FormatterConfig {
    pub input_file: PathBuf,
    pub output_file: PathBuf,
    pub prompt_field: String,
    pub output_field: String,
}

impl FormatterConfig {
    pub fn new(input_file: impl Into<PathBuf>, output_file: impl Into<PathBuf>) -> Self {
        Self {
            input_file: input_file.into(),
            output_file: output_file.into(),
            prompt_field: "instruction".to_string(),
            output_field: "output".to_string(),
        }
    }

    pub fn with_fields(
        mut self,
        prompt_field: impl Into<String>,
        output_field: impl Into<String>,
    ) -> Self {
        self.prompt_field = prompt_field.into();
        self.output_field = output_field.into();
        self
    }
}

/// Counts from a finished formatting run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatSummary {
    pub written: usize,
    pub skipped: usize,
    pub output: PathBuf,
}

pub struct RecordFormatter {
    config: FormatterConfig,
}

impl RecordFormatter {
    pub fn new(config: FormatterConfig) -> Self {
        Self { config }
    }

    /// Format every entry of the input file and write the result.
    ///
    /// JSON Lines input is read one line at a time and JSON Lines output is
    /// streamed to a temporary file renamed into place at the end. JSON
    /// output is buffered and written as a 4-space indented array.
    pub fn run(&self) -> Result<FormatSummary, DatasetError> {
        let input_format = DatasetFormat::from_path(&self.config.input_file)?;
        let output_format = DatasetFormat::from_path(&self.config.output_file)?;
        info!(
            input = %self.config.input_file.display(),
            output = %self.config.output_file.display(),
            "Starting data formatting"
        );

        let mut sink = Sink::open(&self.config.output_file, output_format)?;
        let mut skipped = 0usize;
        let mut seen = 0usize;

        let mut handle = |entry: Record| -> Result<(), DatasetError> {
            seen += 1;
            match self.format_entry(&entry) {
                Some(record) => sink.push(record)?,
                None => {
                    skipped += 1;
                    warn!(entry = seen, "Skipping entry with missing conversation fields");
                }
            }
            if seen % LOG_EVERY == 0 {
                debug!(entries = seen, "Formatting progress");
            }
            Ok(())
        };

        match input_format {
            DatasetFormat::Json => {
                for entry in load_dataset(&self.config.input_file)? {
                    handle(entry)?;
                }
            }
            DatasetFormat::JsonLines => {
                let reader = BufReader::new(File::open(&self.config.input_file)?);
                for (line_no, line) in reader.lines().enumerate() {
                    let line = line?;
                    if line.trim().is_empty() {
                        continue;
                    }
                    let value: Value = serde_json::from_str(&line).map_err(|source| {
                        DatasetError::InvalidLine {
                            line: line_no + 1,
                            source,
                        }
                    })?;
                    match value {
                        Value::Object(entry) => handle(entry)?,
                        _ => return Err(DatasetError::NotAnObject { index: line_no }),
                    }
                }
            }
        }

        let written = sink.finish()?;
        info!(
            written = written,
            skipped = skipped,
            output = %self.config.output_file.display(),
            "Formatting finished"
        );
        Ok(FormatSummary {
            written,
            skipped,
            output: self.config.output_file.clone(),
        })
    }

    /// Normalize one entry, or `None` when it holds no usable conversation.
    pub fn format_entry(&self, entry: &Record) -> Option<Record> {
        let prompt_field = self.config.prompt_field.as_str();
        let output_field = self.config.output_field.as_str();

        let entry: Record = entry
            .iter()
            .map(|(k, v)| (k.clone(), clean_value(v)))
            .collect();
        if !self.can_build_conversation(&entry) {
            return None;
        }

        let mut out = Map::new();
        let id: String = Uuid::new_v4().to_string().chars().take(8).collect();
        out.insert("id".to_string(), Value::String(id));
        out.insert("system".to_string(), get(&entry, "system"));

        let conversations = self.build_conversations(&entry);
        let turns = conversations.as_array().map(Vec::as_slice).unwrap_or(&[]);

        let prompt = endpoint_value(&entry, prompt_field, turns.first(), "human");
        let output = endpoint_value(&entry, output_field, turns.last(), "gpt");
        let prompt_length = length_of(&prompt);
        let output_length = length_of(&output);
        out.insert("conversations".to_string(), conversations);
        out.insert(prompt_field.to_string(), prompt);
        out.insert(output_field.to_string(), output);
        out.insert(format!("{prompt_field}_length"), prompt_length);
        out.insert(format!("{output_field}_length"), output_length);

        out.insert("intent".to_string(), get(&entry, "intent"));
        out.insert("knowledge".to_string(), get(&entry, "knowledge"));
        for field in ["difficulty", "input_quality", "response_quality"] {
            out.insert(field.to_string(), parse_score(entry.get(field)));
        }
        for field in PASSTHROUGH_AFTER_SCORES {
            out.insert(field.to_string(), get(&entry, field));
        }

        let category = get(&entry, "task_category");
        let category = match category.as_str() {
            Some(c) if ALLOWED_TASK_CATEGORIES.contains(&c) => category,
            _ => Value::String("Others".to_string()),
        };
        out.insert("task_category".to_string(), category);
        out.insert(
            "other_task_category".to_string(),
            entry
                .get("other_task_category")
                .cloned()
                .unwrap_or_else(|| json!([])),
        );
        out.insert("language".to_string(), get(&entry, "language"));

        let safety = get(&entry, "safety");
        let safety = match safety.as_str() {
            Some(s) if SAFETY_LABELS.iter().any(|(_, label)| *label == s) => safety,
            _ => Value::String("Safe".to_string()),
        };
        out.insert("safety".to_string(), safety);
        for field in PASSTHROUGH_TAIL {
            out.insert(field.to_string(), get(&entry, field));
        }

        out.retain(|_, v| !v.is_null());
        Some(out)
    }

    fn can_build_conversation(&self, entry: &Record) -> bool {
        let has = |field: &str| truthy(entry.get(field));
        has("conversations")
            || has("history")
            || (has(&self.config.prompt_field) && (has(&self.config.output_field) || has("chosen")))
    }

    fn build_conversations(&self, entry: &Record) -> Value {
        if truthy(entry.get("conversations")) {
            return entry["conversations"].clone();
        }

        let mut turns = Vec::new();
        let mut push = |from: &str, value: Option<&Value>| {
            if let Some(text) = value.and_then(stripped_text) {
                turns.push(json!({"from": from, "value": text}));
            }
        };

        if let Some(Value::Array(history)) = entry.get("history") {
            for pair in history {
                if let Some([question, answer]) = pair.as_array().map(Vec::as_slice) {
                    push("human", Some(question));
                    push("gpt", Some(answer));
                }
            }
        }

        let instruction = entry.get(&self.config.prompt_field).and_then(stripped_text);
        if let Some(instruction) = instruction {
            let human = match entry.get("input").and_then(stripped_text) {
                Some(input) => format!("{instruction}\n{input}"),
                None => instruction,
            };
            push("human", Some(&Value::String(human)));
        }

        let output = entry
            .get("chosen")
            .filter(|v| truthy(Some(*v)))
            .or_else(|| entry.get(&self.config.output_field));
        push("gpt", output);

        Value::Array(turns)
    }
}

/// The record's own field when present, else the text of the conversation's
/// edge turn. `null` when that edge turn is not from `speaker`.
fn endpoint_value(entry: &Record, field: &str, turn: Option<&Value>, speaker: &str) -> Value {
    let value = match entry.get(field) {
        Some(value) => value.clone(),
        None => turn.map(|t| get_value(t, "value")).unwrap_or(Value::Null),
    };
    match turn {
        Some(t) if t.get("from").and_then(Value::as_str) != Some(speaker) => {
            warn!(field = field, expected = speaker, "Conversation edge turn has the wrong speaker, dropping field");
            Value::Null
        }
        _ => value,
    }
}

fn get(entry: &Record, field: &str) -> Value {
    entry.get(field).cloned().unwrap_or(Value::Null)
}

fn get_value(value: &Value, field: &str) -> Value {
    value.get(field).cloned().unwrap_or(Value::Null)
}

/// Character count of a text field, item count of a list.
fn length_of(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::from(s.chars().count()),
        Value::Array(items) => Value::from(items.len()),
        _ => Value::Null,
    }
}

/// Normalize the usual spellings of "nothing" to `null`.
fn clean_value(value: &Value) -> Value {
    match value {
        Value::String(s) if s.trim().is_empty() || s == "N/A" || s == "null" => Value::Null,
        Value::Array(items) if items.is_empty() => Value::Null,
        other => other.clone(),
    }
}

fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(map)) => !map.is_empty(),
    }
}

/// Trimmed text of a scalar, `None` when blank.
fn stripped_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::Null => return None,
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    };
    (!text.is_empty()).then_some(text)
}

/// A score as a float within range; anything else is `null`.
fn parse_score(value: Option<&Value>) -> Value {
    let score = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    score
        .filter(|v| (SCORE_RANGE.0..=SCORE_RANGE.1).contains(v))
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// Output destination: streamed lines or a buffered array.
enum Sink {
    Lines {
        writer: BufWriter<tempfile::NamedTempFile>,
        path: PathBuf,
        count: usize,
    },
    Array {
        records: Vec<Record>,
        path: PathBuf,
    },
}

impl Sink {
    fn open(path: &Path, format: DatasetFormat) -> Result<Self, DatasetError> {
        match format {
            DatasetFormat::JsonLines => {
                let dir = match path.parent() {
                    Some(parent) if !parent.as_os_str().is_empty() => parent,
                    _ => Path::new("."),
                };
                std::fs::create_dir_all(dir)?;
                Ok(Sink::Lines {
                    writer: BufWriter::new(tempfile::NamedTempFile::new_in(dir)?),
                    path: path.to_path_buf(),
                    count: 0,
                })
            }
            DatasetFormat::Json => Ok(Sink::Array {
                records: Vec::new(),
                path: path.to_path_buf(),
            }),
        }
    }

    fn push(&mut self, record: Record) -> Result<(), DatasetError> {
        match self {
            Sink::Lines { writer, count, .. } => {
                serde_json::to_writer(&mut *writer, &record)?;
                writer.write_all(b"\n")?;
                *count += 1;
            }
            Sink::Array { records, .. } => records.push(record),
        }
        Ok(())
    }

    fn finish(self) -> Result<usize, DatasetError> {
        match self {
            Sink::Lines {
                writer,
                path,
                count,
            } => {
                let tmp = writer.into_inner().map_err(|e| e.into_error())?;
                tmp.as_file().sync_all()?;
                tmp.persist(&path).map_err(|e| e.error)?;
                Ok(count)
            }
            Sink::Array { records, path } => {
                let mut buf = Vec::new();
                let mut ser = serde_json::Serializer::with_formatter(
                    &mut buf,
                    PrettyFormatter::with_indent(b"    "),
                );
                records.serialize(&mut ser)?;
                write_atomic(&path, &buf)?;
                Ok(records.len())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn formatter() -> RecordFormatter {
        RecordFormatter::new(FormatterConfig::new("in.jsonl", "out.jsonl"))
    }

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_alpaca_entry() {
        let out = formatter()
            .format_entry(&record(json!({
                "instruction": "Translate",
                "input": "bonjour",
                "output": "hello",
                "difficulty": "3",
                "input_quality": 7,
                "task_category": "Translation",
                "safety": "N/A",
            })))
            .unwrap();

        assert_eq!(out["id"].as_str().unwrap().len(), 8);
        assert_eq!(
            out["conversations"],
            json!([
                {"from": "human", "value": "Translate\nbonjour"},
                {"from": "gpt", "value": "hello"}
            ])
        );
        assert_eq!(out["instruction"], "Translate");
        assert_eq!(out["instruction_length"], 9);
        assert_eq!(out["output_length"], 5);
        assert_eq!(out["difficulty"], 3.0);
        assert!(out.get("input_quality").is_none());
        assert_eq!(out["task_category"], "Translation");
        assert_eq!(out["other_task_category"], json!([]));
        assert_eq!(out["safety"], "Safe");
        assert!(out.get("system").is_none());

        let keys: Vec<&str> = out.keys().map(String::as_str).collect();
        assert_eq!(
            &keys[..6],
            &[
                "id",
                "conversations",
                "instruction",
                "output",
                "instruction_length",
                "output_length"
            ]
        );
    }

    #[test]
    fn test_sharegpt_entry_fills_fields_from_turns() {
        let out = formatter()
            .format_entry(&record(json!({
                "conversations": [
                    {"from": "human", "value": "Hi"},
                    {"from": "gpt", "value": "Hello there"}
                ],
                "task_category": "Gossip",
                "safety": "Privacy",
            })))
            .unwrap();

        assert_eq!(out["instruction"], "Hi");
        assert_eq!(out["output"], "Hello there");
        assert_eq!(out["output_length"], 11);
        assert_eq!(out["task_category"], "Others");
        assert_eq!(out["safety"], "Privacy");
    }

    #[test]
    fn test_wrong_edge_speaker_drops_field() {
        let out = formatter()
            .format_entry(&record(json!({
                "conversations": [
                    {"from": "gpt", "value": "I start"},
                    {"from": "human", "value": "and end"}
                ]
            })))
            .unwrap();
        assert!(out.get("instruction").is_none());
        assert!(out.get("output").is_none());
    }

    #[test]
    fn test_history_pairs() {
        let out = formatter()
            .format_entry(&record(json!({
                "history": [["q1", "a1"], ["  ", "a2"]],
                "instruction": "q3",
                "chosen": "a3",
            })))
            .unwrap();
        let turns = out["conversations"].as_array().unwrap();
        assert_eq!(turns.len(), 5);
        assert_eq!(turns[2], json!({"from": "gpt", "value": "a2"}));
        assert_eq!(turns[4], json!({"from": "gpt", "value": "a3"}));
    }

    #[test]
    fn test_entry_without_conversation_is_skipped() {
        assert!(formatter()
            .format_entry(&record(json!({"instruction": "only a question", "output": ""})))
            .is_none());
        assert!(formatter()
            .format_entry(&record(json!({"conversations": []})))
            .is_none());
    }

    #[test]
    fn test_clean_and_score_helpers() {
        assert_eq!(clean_value(&json!("null")), Value::Null);
        assert_eq!(clean_value(&json!("  \n")), Value::Null);
        assert_eq!(clean_value(&json!(0)), json!(0));
        assert_eq!(parse_score(Some(&json!("4.5"))), json!(4.5));
        assert_eq!(parse_score(Some(&json!(-1))), Value::Null);
        assert_eq!(parse_score(Some(&json!("hard"))), Value::Null);
    }

    #[test]
    fn test_run_jsonl_to_json() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.jsonl");
        let output = dir.path().join("out.json");
        std::fs::write(
            &input,
            "{\"instruction\": \"Hi\", \"output\": \"Hello\"}\n\n{\"instruction\": \"lonely\"}\n",
        )
        .unwrap();

        let summary = RecordFormatter::new(FormatterConfig::new(&input, &output))
            .run()
            .unwrap();
        assert_eq!(summary.written, 1);
        assert_eq!(summary.skipped, 1);

        let text = std::fs::read_to_string(&output).unwrap();
        assert!(text.contains("\n    {"));
        let loaded = load_dataset(&output).unwrap();
        assert_eq!(loaded[0]["output"], "Hello");
    }

    #[test]
    fn test_run_streams_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.json");
        let output = dir.path().join("nested").join("out.jsonl");
        std::fs::write(
            &input,
            r#"[{"instruction": "a", "output": "b"}, {"instruction": "c", "output": "d"}]"#,
        )
        .unwrap();

        let summary = RecordFormatter::new(FormatterConfig::new(&input, &output))
            .run()
            .unwrap();
        assert_eq!(summary.written, 2);
        assert_eq!(load_dataset(&output).unwrap().len(), 2);
    }
}
