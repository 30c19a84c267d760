//! Language detection for query text.
//!
//! The production detector is a script-range heuristic: it classifies each
//! alphabetic character by Unicode block and reports the dominant script
//! with the fraction it covers as confidence. Good enough to separate the
//! supported languages, and it never leaves the process.

use async_trait::async_trait;
use mitra_common::{Language, MitraError};
use std::sync::{Arc, Mutex};

/// A detected language with the detector's confidence in [0, 1].
#[derive(Debug, Clone, Copy)]
pub struct Detection {
    pub language: Language,
    pub confidence: f32,
}

#[async_trait]
pub trait LanguageDetector: Send + Sync {
    async fn detect(&self, text: &str) -> Result<Detection, MitraError>;
}

// ============================================================================
// Script-range detector (production)
// ============================================================================

#[derive(Debug, Default)]
pub struct ScriptLanguageDetector;

impl ScriptLanguageDetector {
    pub fn new() -> Self {
        Self
    }

    fn classify_char(c: char) -> Option<Language> {
        match c as u32 {
            0x0900..=0x097F => Some(Language::Hi), // Devanagari
            0x0B80..=0x0BFF => Some(Language::Ta), // Tamil
            0x0C00..=0x0C7F => Some(Language::Te), // Telugu
            _ if c.is_ascii_alphabetic() => Some(Language::En),
            _ => None,
        }
    }
}

#[async_trait]
impl LanguageDetector for ScriptLanguageDetector {
    async fn detect(&self, text: &str) -> Result<Detection, MitraError> {
        let mut counts = [0usize; 4];
        let mut total = 0usize;

        for c in text.chars() {
            if let Some(language) = Self::classify_char(c) {
                counts[language as usize] += 1;
                total += 1;
            }
        }

        if total == 0 {
            // No letters at all. Report zero confidence and let the caller
            // fall back to its default.
            return Ok(Detection {
                language: Language::En,
                confidence: 0.0,
            });
        }

        let (best_index, best_count) = counts
            .iter()
            .copied()
            .enumerate()
            .max_by_key(|&(_, count)| count)
            .unwrap_or((0, 0));

        Ok(Detection {
            language: Language::all()[best_index],
            confidence: best_count as f32 / total as f32,
        })
    }
}

// ============================================================================
// Fake detector (testing)
// ============================================================================

pub struct FakeDetector {
    result: Result<Detection, String>,
    calls: Arc<Mutex<usize>>,
}

impl FakeDetector {
    pub fn returning(language: Language, confidence: f32) -> Self {
        Self {
            result: Ok(Detection {
                language,
                confidence,
            }),
            calls: Arc::new(Mutex::new(0)),
        }
    }

    pub fn all_failing(message: &str) -> Self {
        Self {
            result: Err(message.to_string()),
            calls: Arc::new(Mutex::new(0)),
        }
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl LanguageDetector for FakeDetector {
    async fn detect(&self, _text: &str) -> Result<Detection, MitraError> {
        *self.calls.lock().unwrap() += 1;
        self.result
            .clone()
            .map_err(MitraError::Internal)
    }
}
