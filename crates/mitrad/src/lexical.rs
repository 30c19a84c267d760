//! Lexical fallback matcher: keyword overlap against the FAQ corpus.
//!
//! Works entirely offline, which is the point: when the model path is down
//! this is what keeps answers flowing. Scoring is asymmetric, the fraction
//! of *query* keywords covered by a candidate, so an entry that covers the
//! whole query wins even when its own question text is longer.

use crate::store::KnowledgeStore;
use mitra_common::{KnowledgeEntry, Language, MitraError};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Best keyword-overlap candidate for a query.
#[derive(Debug, Clone)]
pub struct LexicalMatch {
    pub entry: KnowledgeEntry,
    /// Fraction of query keywords found in the candidate, in [0, 1]
    pub score: f32,
}

/// Lowercase, whitespace-tokenize and strip the language's stop words.
pub fn keyword_set(text: &str, language: Language) -> BTreeSet<String> {
    text.to_lowercase()
        .split_whitespace()
        .filter(|token| !language.is_stop_word(token))
        .map(|token| token.to_string())
        .collect()
}

/// Keywords a candidate entry is matched against: its tokenized question
/// text plus its curated keyword list.
fn candidate_keywords(entry: &KnowledgeEntry, language: Language) -> BTreeSet<String> {
    let mut keywords = keyword_set(&entry.question, language);
    for keyword in &entry.keywords {
        keywords.insert(keyword.to_lowercase());
    }
    keywords
}

/// Overlap score. An empty query keyword set scores 0 against everything;
/// the division is guarded so degenerate input cannot produce NaN.
fn overlap_score(query_keywords: &BTreeSet<String>, candidate: &BTreeSet<String>) -> f32 {
    if query_keywords.is_empty() {
        return 0.0;
    }
    let shared = query_keywords.intersection(candidate).count();
    shared as f32 / query_keywords.len() as f32
}

/// Rank `entries` against `query` and return the single best candidate.
/// Ties keep the first-seen entry. `None` only when there are no candidates.
pub fn best_match(
    query: &str,
    entries: &[KnowledgeEntry],
    language: Language,
) -> Option<LexicalMatch> {
    let query_keywords = keyword_set(query, language);

    let mut best: Option<LexicalMatch> = None;
    for entry in entries {
        let score = overlap_score(&query_keywords, &candidate_keywords(entry, language));
        let better = match &best {
            Some(current) => score > current.score,
            None => true,
        };
        if better {
            best = Some(LexicalMatch {
                entry: entry.clone(),
                score,
            });
        }
    }
    best
}

/// Matcher bound to the knowledge store. The fallback chain applies the
/// acceptance floor; this component just ranks.
pub struct LexicalMatcher {
    store: Arc<dyn KnowledgeStore>,
}

impl LexicalMatcher {
    pub fn new(store: Arc<dyn KnowledgeStore>) -> Self {
        Self { store }
    }

    pub async fn search(
        &self,
        query: &str,
        language: Language,
    ) -> Result<Option<LexicalMatch>, MitraError> {
        let entries = self.store.entries_by_language(language).await?;
        Ok(best_match(query, &entries, language))
    }
}
