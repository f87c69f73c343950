//! Lenient JSON recovery for model replies.
//!
//! Annotation models are prompted with a `{` prefill and stopped at the first
//! `}`, so replies frequently arrive wrapped in prose, fenced in code blocks,
//! cut off mid-string, or missing their closing braces. This module recovers
//! a JSON object from such replies.
//!
//! # Recovery Strategies
//!
//! [`repair_json_object`] tries the following in order:
//! 1. Direct parse of the trimmed reply
//! 2. Object inside a fenced code block
//! 3. Balanced object anywhere in the reply using brace matching
//! 4. Truncation repair: close an open string, drop a dangling `,` or `:`,
//!    close open arrays and objects in stack order
//!
//! # Example
//!
//! ```
//! use datatagger::utils::json_repair::repair_json_object;
//!
//! let reply = r#"{"primary_tag": "Math", "other_tags": ["Reasoning""#;
//! let object = repair_json_object(reply).unwrap();
//! assert_eq!(object["primary_tag"], "Math");
//! ```

use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;

/// Error type for JSON recovery failures.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum JsonRepairError {
    #[error("No JSON object found in reply. Reply starts with: '{preview}'")]
    NotFound { preview: String },
    #[error("JSON object could not be repaired. Candidate starts with: '{preview}'")]
    Unrecoverable { preview: String },
}

/// Recover a JSON object from a model reply.
pub fn repair_json_object(raw: &str) -> Result<Map<String, Value>, JsonRepairError> {
    let trimmed = raw.trim();

    if let Some(object) = parse_object(trimmed) {
        return Ok(object);
    }

    if let Some(block) = extract_from_code_block(trimmed) {
        if let Some(object) = parse_object(&block).or_else(|| parse_object(&balance_json(&block)))
        {
            return Ok(object);
        }
    }

    let Some(start) = trimmed.find('{') else {
        return Err(JsonRepairError::NotFound {
            preview: preview(trimmed),
        });
    };
    let candidate = &trimmed[start..];

    if let Some(end) = find_matching_brace(candidate) {
        if let Some(object) = parse_object(&candidate[..=end]) {
            return Ok(object);
        }
    }

    parse_object(&balance_json(candidate)).ok_or_else(|| JsonRepairError::Unrecoverable {
        preview: preview(candidate),
    })
}

/// Extract the first object from a ``` fenced block (with or without a
/// language tag).
pub fn extract_from_code_block(content: &str) -> Option<String> {
    let re = Regex::new(r"```(?:[A-Za-z]+)?\s*\n?([\s\S]*?)(?:\n?```|$)").ok()?;
    let caps = re.captures(content)?;
    let block = caps.get(1)?.as_str().trim();
    let start = block.find('{')?;
    let block = &block[start..];
    match find_matching_brace(block) {
        Some(end) => Some(block[..=end].to_string()),
        None => Some(block.to_string()),
    }
}

/// Find the index of the `}` closing the object that opens at the start of
/// `s`.
///
/// Nested objects and arrays, string literals and escape sequences inside
/// strings are handled.
pub fn find_matching_brace(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, c) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }

        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }

    None
}

/// Rebuild a possibly truncated JSON text so that every opened string, array
/// and object is closed.
///
/// Trailing commas before a closer are dropped, a dangling `:` gets a `null`
/// value, and closers that match nothing are ignored. Scanning stops once the
/// outermost value is closed.
pub fn balance_json(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 8);
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escape_next = false;

    for c in s.chars() {
        if in_string {
            out.push(c);
            if escape_next {
                escape_next = false;
            } else if c == '\\' {
                escape_next = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '{' => {
                stack.push('}');
                out.push(c);
            }
            '[' => {
                stack.push(']');
                out.push(c);
            }
            '}' | ']' => {
                if stack.last() != Some(&c) {
                    continue;
                }
                stack.pop();
                trim_dangling(&mut out);
                out.push(c);
                if stack.is_empty() {
                    return out;
                }
            }
            _ => out.push(c),
        }
    }

    if in_string {
        if escape_next {
            out.pop();
        }
        out.push('"');
    }

    while let Some(closer) = stack.pop() {
        trim_dangling(&mut out);
        out.push(closer);
    }
    out
}

/// Drop a trailing `,` and give a trailing `:` a `null` value.
fn trim_dangling(out: &mut String) {
    let trimmed_len = out.trim_end().len();
    out.truncate(trimmed_len);
    if out.ends_with(',') {
        out.pop();
    } else if out.ends_with(':') {
        out.push_str(" null");
    }
}

fn parse_object(candidate: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Object(object)) => Some(object),
        _ => None,
    }
}

fn preview(s: &str) -> String {
    s.chars().take(80).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_object() {
        let object = repair_json_object(r#"{"difficulty": "3.0"}"#).unwrap();
        assert_eq!(object["difficulty"], "3.0");
    }

    #[test]
    fn test_object_in_code_block() {
        let reply = "Here you go:\n```json\n{\"primary_tag\": \"Planning\"}\n```\nDone.";
        let object = repair_json_object(reply).unwrap();
        assert_eq!(object["primary_tag"], "Planning");
    }

    #[test]
    fn test_object_with_surrounding_prose() {
        let reply = r#"Sure! {"intent": "The user wants {braces}", "difficulty": 2} hope it helps"#;
        let object = repair_json_object(reply).unwrap();
        assert_eq!(object["intent"], "The user wants {braces}");
        assert_eq!(object["difficulty"], 2);
    }

    #[test]
    fn test_missing_closing_brace() {
        let object = repair_json_object(r#"{"primary_tag": "Others", "other_tags": []"#).unwrap();
        assert_eq!(object["primary_tag"], "Others");
        assert_eq!(object["other_tags"], serde_json::json!([]));
    }

    #[test]
    fn test_truncated_string_and_nested_object() {
        let reply = r#"{"input_quality_explanation": "Clear query", "scores": {"clarity": "4", "specificity": "3"#;
        let object = repair_json_object(reply).unwrap();
        assert_eq!(object["scores"]["specificity"], "3");
    }

    #[test]
    fn test_trailing_comma_and_colon() {
        assert_eq!(balance_json(r#"{"a": 1,"#), r#"{"a": 1}"#);
        assert_eq!(balance_json(r#"{"a":"#), r#"{"a": null}"#);
        assert_eq!(balance_json(r#"{"a": [1, 2,]}"#), r#"{"a": [1, 2]}"#);
    }

    #[test]
    fn test_truncated_escape_sequence() {
        let object = repair_json_object(r#"{"intent": "path C:\"#).unwrap();
        assert_eq!(object["intent"], "path C:");
    }

    #[test]
    fn test_not_found() {
        let err = repair_json_object("no structure at all").unwrap_err();
        assert!(matches!(err, JsonRepairError::NotFound { .. }));
    }

    #[test]
    fn test_array_is_not_an_object() {
        assert!(repair_json_object("[1, 2, 3]").is_err());
    }

    #[test]
    fn test_find_matching_brace_ignores_strings() {
        let s = r#"{"a": "}", "b": {"c": 1}} tail"#;
        let end = find_matching_brace(s).unwrap();
        assert_eq!(&s[..=end], r#"{"a": "}", "b": {"c": 1}}"#);
    }
}
