//! Semantic retrieval over the knowledge corpus.
//!
//! The query is embedded (through the cache), scored against every corpus
//! entry for the request language by cosine similarity, filtered by the
//! configured floor and capped at `k` results. Entries without a stored
//! embedding, or with one of the wrong dimension, are skipped rather than
//! treated as errors.

use crate::embedding::EmbeddingProvider;
use crate::store::KnowledgeStore;
use mitra_common::{KnowledgeEntry, Language, MitraError};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::debug;

/// A corpus entry with its similarity to the query.
#[derive(Debug, Clone)]
pub struct ScoredEntry {
    pub entry: KnowledgeEntry,
    pub similarity: f32,
}

/// Cosine similarity of two vectors. Zero-magnitude input scores 0.0
/// instead of dividing by zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

pub struct RetrievalEngine {
    store: Arc<dyn KnowledgeStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    k: usize,
    min_similarity: f32,
}

impl RetrievalEngine {
    pub fn new(
        store: Arc<dyn KnowledgeStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        k: usize,
        min_similarity: f32,
    ) -> Self {
        Self {
            store,
            embedder,
            k,
            min_similarity,
        }
    }

    /// Embed a query, going through the embedding cache.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, MitraError> {
        self.embedder.embed(text).await
    }

    /// Score the corpus for one language against an already-embedded query.
    pub async fn search(
        &self,
        query_vector: &[f32],
        language: Language,
    ) -> Result<Vec<ScoredEntry>, MitraError> {
        let entries = self.store.entries_by_language(language).await?;
        Ok(self.rank(query_vector, entries))
    }

    /// Top-`k` entries for the query, best first. An embedding or store
    /// failure propagates; an empty result is not an error.
    pub async fn retrieve(
        &self,
        query: &str,
        language: Language,
    ) -> Result<Vec<ScoredEntry>, MitraError> {
        let query_vector = self.embed(query).await?;
        self.search(&query_vector, language).await
    }

    fn rank(&self, query_vector: &[f32], entries: Vec<KnowledgeEntry>) -> Vec<ScoredEntry> {
        let mut scored: Vec<ScoredEntry> = entries
            .into_iter()
            .filter_map(|entry| {
                if !entry.has_embedding() {
                    debug!(id = %entry.id, "skipping entry without embedding");
                    return None;
                }
                if entry.embedding.len() != query_vector.len() {
                    debug!(
                        id = %entry.id,
                        entry_dim = entry.embedding.len(),
                        query_dim = query_vector.len(),
                        "skipping entry with mismatched embedding dimension"
                    );
                    return None;
                }
                let similarity = cosine_similarity(query_vector, &entry.embedding);
                if similarity < self.min_similarity {
                    return None;
                }
                Some(ScoredEntry { entry, similarity })
            })
            .collect();

        // Best first; equal scores resolve by entry id so ordering is stable
        // across runs.
        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.entry.id.cmp(&b.entry.id))
        });
        scored.truncate(self.k);
        scored
    }
}
