//! Knowledge corpus types.
//!
//! Entries are owned by an external store and read-only inside the core.
//! Embeddings are precomputed offline when the corpus is built; an entry
//! without one still serves the lexical path.

use crate::language::Language;
use serde::{Deserialize, Serialize};

/// One immutable FAQ entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub id: String,
    pub question: String,
    pub answer: String,
    pub category: String,
    pub language: Language,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub embedding: Vec<f32>,
}

impl KnowledgeEntry {
    pub fn has_embedding(&self) -> bool {
        !self.embedding.is_empty()
    }
}

/// On-disk corpus file: a flat entry list, grouped by language at load time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeCorpus {
    pub entries: Vec<KnowledgeEntry>,
}

impl KnowledgeCorpus {
    pub fn entries_for(&self, language: Language) -> Vec<KnowledgeEntry> {
        self.entries
            .iter()
            .filter(|e| e.language == language)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, language: Language) -> KnowledgeEntry {
        KnowledgeEntry {
            id: id.to_string(),
            question: "What is PM-KISAN?".to_string(),
            answer: "An income support scheme for farmer families.".to_string(),
            category: "schemes".to_string(),
            language,
            keywords: vec!["pm-kisan".to_string()],
            embedding: vec![0.1, 0.2, 0.3],
        }
    }

    #[test]
    fn test_entries_for_filters_by_language() {
        let corpus = KnowledgeCorpus {
            entries: vec![
                entry("faq-001", Language::En),
                entry("faq-002", Language::Hi),
                entry("faq-003", Language::En),
            ],
        };

        let en = corpus.entries_for(Language::En);
        assert_eq!(en.len(), 2);
        assert!(en.iter().all(|e| e.language == Language::En));
        assert!(corpus.entries_for(Language::Ta).is_empty());
    }

    #[test]
    fn test_corpus_parses_without_optional_fields() {
        let json = r#"{
            "entries": [{
                "id": "faq-010",
                "question": "How do I check my payment status?",
                "answer": "Use the beneficiary status page with your Aadhaar number.",
                "category": "payments",
                "language": "en"
            }]
        }"#;

        let corpus: KnowledgeCorpus = serde_json::from_str(json).unwrap();
        assert_eq!(corpus.len(), 1);
        assert!(corpus.entries[0].keywords.is_empty());
        assert!(!corpus.entries[0].has_embedding());
    }
}
