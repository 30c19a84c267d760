//! Embedding provider and the TTL cache in front of it.
//!
//! Embeddings come from an Ollama-compatible service. Generated vectors are
//! cached under a hash of the input text so repeated queries inside the TTL
//! never touch the network; a miss regenerates synchronously. A cache miss
//! is always tolerable, so nothing here persists.

use async_trait::async_trait;
use lru::LruCache;
use mitra_common::MitraError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

// ============================================================================
// Provider trait
// ============================================================================

/// Turns text into a dense vector.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, MitraError>;
}

// ============================================================================
// Ollama-backed provider (production)
// ============================================================================

#[derive(Debug, Serialize)]
struct OllamaEmbeddingRequest {
    model: String,
    prompt: String,
}

#[derive(Debug, Deserialize)]
struct OllamaEmbeddingResponse {
    embedding: Vec<f32>,
}

pub struct OllamaEmbedder {
    http_client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaEmbedder {
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> Self {
        Self {
            http_client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, MitraError> {
        let url = format!("{}/api/embeddings", self.base_url);
        let request = OllamaEmbeddingRequest {
            model: self.model.clone(),
            prompt: text.to_string(),
        };

        let response = self
            .http_client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| MitraError::Embedding(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(MitraError::Embedding(format!(
                "service returned {}: {}",
                status, body
            )));
        }

        let parsed: OllamaEmbeddingResponse = response
            .json()
            .await
            .map_err(|e| MitraError::Embedding(format!("bad response body: {}", e)))?;

        if parsed.embedding.is_empty() {
            return Err(MitraError::Embedding("service returned empty vector".to_string()));
        }
        Ok(parsed.embedding)
    }
}

// ============================================================================
// TTL cache
// ============================================================================

#[derive(Debug, Clone)]
struct CacheSlot {
    vector: Vec<f32>,
    inserted_at: Instant,
}

/// LRU-bounded embedding cache with per-entry TTL, evicted lazily on read.
pub struct EmbeddingCache {
    slots: Arc<Mutex<LruCache<String, CacheSlot>>>,
    ttl: Duration,
}

impl EmbeddingCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let cache = LruCache::new(NonZeroUsize::new(capacity.max(1)).unwrap());
        Self {
            slots: Arc::new(Mutex::new(cache)),
            ttl,
        }
    }

    fn cache_key(text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Look up a cached vector. Entries past the TTL are dropped here and
    /// reported as a miss.
    pub async fn get(&self, text: &str) -> Option<Vec<f32>> {
        let key = Self::cache_key(text);
        let mut slots = self.slots.lock().await;

        if let Some(slot) = slots.get(&key) {
            if slot.inserted_at.elapsed() < self.ttl {
                return Some(slot.vector.clone());
            }
            slots.pop(&key);
            debug!("embedding cache entry expired");
        }
        None
    }

    pub async fn put(&self, text: &str, vector: Vec<f32>) {
        let key = Self::cache_key(text);
        let mut slots = self.slots.lock().await;
        slots.put(
            key,
            CacheSlot {
                vector,
                inserted_at: Instant::now(),
            },
        );
    }

    pub async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }
}

// ============================================================================
// Caching wrapper
// ============================================================================

/// Provider wrapper that consults the cache before going to the network.
pub struct CachedEmbedder {
    provider: Arc<dyn EmbeddingProvider>,
    cache: EmbeddingCache,
}

impl CachedEmbedder {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, cache: EmbeddingCache) -> Self {
        Self { provider, cache }
    }
}

#[async_trait]
impl EmbeddingProvider for CachedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, MitraError> {
        if let Some(vector) = self.cache.get(text).await {
            return Ok(vector);
        }
        let vector = self.provider.embed(text).await?;
        self.cache.put(text, vector.clone()).await;
        Ok(vector)
    }
}

// ============================================================================
// Fake provider (testing)
// ============================================================================

/// Scripted embedding provider with call counting.
pub struct FakeEmbedder {
    vectors: HashMap<String, Vec<f32>>,
    default_vector: Option<Vec<f32>>,
    fail_with: Option<String>,
    call_counts: Arc<std::sync::Mutex<HashMap<String, usize>>>,
}

impl FakeEmbedder {
    /// Every text embeds to the same vector.
    pub fn with_default(vector: Vec<f32>) -> Self {
        Self {
            vectors: HashMap::new(),
            default_vector: Some(vector),
            fail_with: None,
            call_counts: Arc::new(std::sync::Mutex::new(HashMap::new())),
        }
    }

    /// Specific texts embed to specific vectors; everything else errors.
    pub fn returning(pairs: Vec<(&str, Vec<f32>)>) -> Self {
        Self {
            vectors: pairs
                .into_iter()
                .map(|(text, vector)| (text.to_string(), vector))
                .collect(),
            default_vector: None,
            fail_with: None,
            call_counts: Arc::new(std::sync::Mutex::new(HashMap::new())),
        }
    }

    pub fn all_failing(message: &str) -> Self {
        Self {
            vectors: HashMap::new(),
            default_vector: None,
            fail_with: Some(message.to_string()),
            call_counts: Arc::new(std::sync::Mutex::new(HashMap::new())),
        }
    }

    /// Add a scripted vector to an existing fake.
    pub fn vector_for(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.vectors.insert(text.to_string(), vector);
        self
    }

    pub fn call_count(&self, text: &str) -> usize {
        self.call_counts
            .lock()
            .unwrap()
            .get(text)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.call_counts.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl EmbeddingProvider for FakeEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, MitraError> {
        {
            let mut counts = self.call_counts.lock().unwrap();
            *counts.entry(text.to_string()).or_insert(0) += 1;
        }

        if let Some(message) = &self.fail_with {
            return Err(MitraError::Embedding(message.clone()));
        }
        if let Some(vector) = self.vectors.get(text) {
            return Ok(vector.clone());
        }
        self.default_vector
            .clone()
            .ok_or_else(|| MitraError::Embedding(format!("no scripted vector for '{}'", text)))
    }
}
