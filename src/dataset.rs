//! Dataset records and file formats.
//!
//! A dataset is an ordered sequence of JSON objects stored either as a single
//! JSON array (`.json`) or as newline-delimited objects (`.jsonl`). The format
//! is chosen by file extension on both read and write.

use std::fs;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde_json::{Map, Value};

use crate::error::DatasetError;
use crate::utils::write_atomic;

/// One training example: a mapping from field name to value.
pub type Record = Map<String, Value>;

/// On-disk dataset layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetFormat {
    /// A single JSON array of objects.
    Json,
    /// One JSON object per line.
    JsonLines,
}

impl DatasetFormat {
    /// Detect the format from a file extension (case-insensitive).
    pub fn from_path(path: &Path) -> Result<Self, DatasetError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("json") => Ok(Self::Json),
            Some("jsonl") => Ok(Self::JsonLines),
            _ => Err(DatasetError::UnsupportedFormat(path.display().to_string())),
        }
    }

    /// The canonical extension for this format, without the leading dot.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::JsonLines => "jsonl",
        }
    }
}

/// Load every record of a dataset file into memory.
pub fn load_dataset(path: &Path) -> Result<Vec<Record>, DatasetError> {
    match DatasetFormat::from_path(path)? {
        DatasetFormat::Json => {
            let content = fs::read_to_string(path)?;
            match serde_json::from_str::<Value>(&content)? {
                Value::Array(items) => items
                    .into_iter()
                    .enumerate()
                    .map(|(index, item)| match item {
                        Value::Object(record) => Ok(record),
                        _ => Err(DatasetError::NotAnObject { index }),
                    })
                    .collect(),
                _ => Err(DatasetError::NotAnArray(path.display().to_string())),
            }
        }
        DatasetFormat::JsonLines => {
            let reader = BufReader::new(fs::File::open(path)?);
            let mut records = Vec::new();
            for (line_no, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let value: Value =
                    serde_json::from_str(&line).map_err(|source| DatasetError::InvalidLine {
                        line: line_no + 1,
                        source,
                    })?;
                match value {
                    Value::Object(record) => records.push(record),
                    _ => {
                        return Err(DatasetError::NotAnObject {
                            index: records.len(),
                        })
                    }
                }
            }
            Ok(records)
        }
    }
}

/// Serialize records in the given format.
///
/// JSON arrays are pretty-printed; JSON Lines output ends with a newline
/// after every record.
pub fn encode_dataset(records: &[Record], format: DatasetFormat) -> Result<Vec<u8>, DatasetError> {
    match format {
        DatasetFormat::Json => Ok(serde_json::to_vec_pretty(records)?),
        DatasetFormat::JsonLines => {
            let mut buf = Vec::new();
            for record in records {
                serde_json::to_writer(&mut buf, record)?;
                buf.push(b'\n');
            }
            Ok(buf)
        }
    }
}

/// Atomically write records to `path`, choosing the format from its extension.
pub fn save_dataset(records: &[Record], path: &Path) -> Result<(), DatasetError> {
    let format = DatasetFormat::from_path(path)?;
    let bytes = encode_dataset(records, format)?;
    write_atomic(path, &bytes)?;
    Ok(())
}

/// Text of a record field, if present and non-null.
///
/// Strings are returned as-is; other values are rendered as compact JSON.
pub fn field_text(record: &Record, field: &str) -> Option<String> {
    match record.get(field)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Similarity-index metadata for a record: the text of `field`, or the empty
/// string when the field is absent or null.
pub fn record_meta(record: &Record, field: &str) -> String {
    field_text(record, field).unwrap_or_default()
}
