//! Supported languages and their stop-word sets.
//!
//! The assistant answers in four languages. Stop-word sets back the lexical
//! matcher: function words carry no signal for keyword overlap, so they are
//! stripped from queries and candidate questions before scoring.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    En,
    Hi,
    Te,
    Ta,
}

static STOP_WORDS_EN: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "a", "an", "the", "is", "are", "was", "were", "am", "be", "been", "do", "does",
        "did", "can", "could", "will", "would", "of", "to", "in", "on", "for", "and",
        "or", "as", "at", "by", "it", "its", "this", "that", "what", "which", "who",
        "whom", "how", "when", "where", "why", "i", "me", "my", "we", "our", "you",
        "your", "they", "their", "with", "from", "about", "please",
    ]
    .into_iter()
    .collect()
});

static STOP_WORDS_HI: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "का", "की", "के", "है", "हैं", "था", "थी", "थे", "और", "या", "को", "से", "में",
        "पर", "यह", "वह", "ये", "वे", "क्या", "कौन", "कैसे", "कब", "कहाँ", "क्यों", "भी",
        "ही", "तो", "एक", "मैं", "मेरा", "मेरी", "मेरे", "आप", "आपका", "हम", "हमारा",
        "नहीं", "जो", "कि", "लिए", "हो", "हूँ", "कर", "करें", "कृपया",
    ]
    .into_iter()
    .collect()
});

static STOP_WORDS_TE: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "మరియు", "లేదా", "కి", "కు", "లో", "పై", "ఈ", "ఆ", "ఏమి", "ఎలా", "ఎప్పుడు",
        "ఎక్కడ", "ఎందుకు", "ఉంది", "ఉన్నాయి", "నా", "నేను", "మీ", "మీరు", "మేము",
        "వారు", "కాదు", "అని", "కోసం", "దయచేసి",
    ]
    .into_iter()
    .collect()
});

static STOP_WORDS_TA: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "மற்றும்", "அல்லது", "இல்", "மேல்", "இந்த", "அந்த", "என்ன", "எப்படி",
        "எப்போது", "எங்கே", "ஏன்", "உள்ளது", "உள்ளன", "என்", "நான்", "உங்கள்",
        "நீங்கள்", "நாங்கள்", "அவர்கள்", "இல்லை", "என்று", "க்காக", "தயவுசெய்து",
    ]
    .into_iter()
    .collect()
});

impl Language {
    /// ISO 639-1 code, also the wire representation.
    pub fn code(&self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Hi => "hi",
            Language::Te => "te",
            Language::Ta => "ta",
        }
    }

    /// English name, used when prompting the model to answer in this language.
    pub fn name(&self) -> &'static str {
        match self {
            Language::En => "English",
            Language::Hi => "Hindi",
            Language::Te => "Telugu",
            Language::Ta => "Tamil",
        }
    }

    pub fn from_code(code: &str) -> Option<Language> {
        match code.trim().to_lowercase().as_str() {
            "en" => Some(Language::En),
            "hi" => Some(Language::Hi),
            "te" => Some(Language::Te),
            "ta" => Some(Language::Ta),
            _ => None,
        }
    }

    pub fn all() -> [Language; 4] {
        [Language::En, Language::Hi, Language::Te, Language::Ta]
    }

    pub fn stop_words(&self) -> &'static HashSet<&'static str> {
        match self {
            Language::En => &STOP_WORDS_EN,
            Language::Hi => &STOP_WORDS_HI,
            Language::Te => &STOP_WORDS_TE,
            Language::Ta => &STOP_WORDS_TA,
        }
    }

    pub fn is_stop_word(&self, token: &str) -> bool {
        self.stop_words().contains(token)
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_round_trip() {
        for lang in Language::all() {
            assert_eq!(Language::from_code(lang.code()), Some(lang));
        }
        assert_eq!(Language::from_code("HI"), Some(Language::Hi));
        assert_eq!(Language::from_code(" en "), Some(Language::En));
        assert_eq!(Language::from_code("fr"), None);
    }

    #[test]
    fn test_serde_uses_lowercase_codes() {
        let json = serde_json::to_string(&Language::Hi).unwrap();
        assert_eq!(json, "\"hi\"");
        let parsed: Language = serde_json::from_str("\"ta\"").unwrap();
        assert_eq!(parsed, Language::Ta);
    }

    #[test]
    fn test_every_language_has_stop_words() {
        for lang in Language::all() {
            assert!(!lang.stop_words().is_empty(), "{} has no stop words", lang);
        }
    }

    #[test]
    fn test_english_stop_words_cover_question_scaffolding() {
        assert!(Language::En.is_stop_word("what"));
        assert!(Language::En.is_stop_word("is"));
        assert!(!Language::En.is_stop_word("eligibility"));
    }

    #[test]
    fn test_hindi_stop_words() {
        assert!(Language::Hi.is_stop_word("क्या"));
        assert!(!Language::Hi.is_stop_word("किसान"));
    }
}
