//! Fixed prompt templates for the prompt-driven missions.
//!
//! Each template carries `{name}` placeholders that [`render`] fills in a
//! single pass, so text substituted into one placeholder is never expanded
//! again. Literal JSON braces in the templates are left untouched.
//!
//! - [`quality`] - query-only and combined query/response quality ratings
//! - [`difficulty`] - intent, knowledge and difficulty analysis
//! - [`classification`] - task category assignment over a closed set

pub mod classification;
pub mod difficulty;
pub mod quality;

pub use classification::{
    build_classification_prompt, is_task_category, FALLBACK_CATEGORY, TASK_CATEGORIES,
};
pub use difficulty::build_difficulty_prompt;
pub use quality::{build_combined_quality_prompt, build_input_quality_prompt};

/// Substitute `{key}` placeholders in `template` with their values.
///
/// Braces that do not form a known placeholder are copied verbatim.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let extra: usize = vars.iter().map(|(_, v)| v.len()).sum();
    let mut out = String::with_capacity(template.len() + extra);
    let mut rest = template;

    while let Some(pos) = rest.find('{') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos + 1..];
        let hit = vars.iter().find(|(key, _)| {
            tail.strip_prefix(key)
                .is_some_and(|after| after.starts_with('}'))
        });
        match hit {
            Some((key, value)) => {
                out.push_str(value);
                rest = &tail[key.len() + 1..];
            }
            None => {
                out.push('{');
                rest = tail;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_known_and_unknown_placeholders() {
        let out = render(r#"{ "q": "{input}", "x": {other} }"#, &[("input", "hi")]);
        assert_eq!(out, r#"{ "q": "hi", "x": {other} }"#);
    }

    #[test]
    fn test_render_is_single_pass() {
        let out = render("{a}|{b}", &[("a", "{b}"), ("b", "B")]);
        assert_eq!(out, "{b}|B");
    }

    #[test]
    fn test_render_trailing_brace() {
        assert_eq!(render("end {", &[("a", "1")]), "end {");
    }
}
