//! Language identification for the LANGUAGE mission.
//!
//! Detection runs in-process; no inference backend is involved.

use lingua::{LanguageDetector as LinguaDetector, LanguageDetectorBuilder};

/// Identifies the language of a text.
pub trait LanguageDetector: Send + Sync {
    /// Uppercase ISO 639-1 code of the most likely language (`"EN"`, `"ZH"`),
    /// or `None` when the language cannot be determined.
    fn detect(&self, text: &str) -> Option<String>;
}

/// Detector over every language lingua knows.
pub struct LinguaLanguageDetector {
    detector: LinguaDetector,
}

impl LinguaLanguageDetector {
    pub fn new() -> Self {
        tracing::info!("Building language detector from all languages");
        let detector = LanguageDetectorBuilder::from_all_languages().build();
        tracing::info!("Language detector built successfully");
        Self { detector }
    }
}

impl Default for LinguaLanguageDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguageDetector for LinguaLanguageDetector {
    fn detect(&self, text: &str) -> Option<String> {
        self.detector
            .detect_language_of(text)
            .map(|language| language.iso_code_639_1().to_string().to_uppercase())
    }
}
