//! Read-only bindings to the knowledge corpus and user preference files.
//!
//! Both stores load once at startup and serve from memory; durable storage
//! belongs to the surrounding system, not this core.

use async_trait::async_trait;
use mitra_common::{KnowledgeCorpus, KnowledgeEntry, Language, MitraError};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

// ============================================================================
// Traits
// ============================================================================

/// Read-only access to the FAQ corpus. Entry order is the corpus file order
/// and stable for the process lifetime.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    async fn entries_by_language(
        &self,
        language: Language,
    ) -> Result<Vec<KnowledgeEntry>, MitraError>;
}

/// Stored user language preferences, consulted when detection confidence is
/// too low.
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn preferred_language(&self, user_id: &str) -> Result<Option<Language>, MitraError>;
}

// ============================================================================
// File-backed implementations
// ============================================================================

/// Corpus loaded from a JSON file and grouped by language.
#[derive(Debug)]
pub struct FileKnowledgeStore {
    by_language: HashMap<Language, Vec<KnowledgeEntry>>,
}

impl FileKnowledgeStore {
    pub fn load(path: &Path) -> Result<Self, MitraError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| MitraError::Knowledge(format!("read {}: {}", path.display(), e)))?;
        let corpus: KnowledgeCorpus = serde_json::from_str(&raw)
            .map_err(|e| MitraError::Knowledge(format!("parse {}: {}", path.display(), e)))?;
        info!("Loaded {} knowledge entries from {}", corpus.len(), path.display());
        Ok(Self::from_corpus(corpus))
    }

    pub fn from_corpus(corpus: KnowledgeCorpus) -> Self {
        let mut by_language: HashMap<Language, Vec<KnowledgeEntry>> = HashMap::new();
        for entry in corpus.entries {
            by_language.entry(entry.language).or_default().push(entry);
        }
        Self { by_language }
    }

    pub fn count_for(&self, language: Language) -> usize {
        self.by_language.get(&language).map_or(0, |v| v.len())
    }

    pub fn total(&self) -> usize {
        self.by_language.values().map(|v| v.len()).sum()
    }
}

#[async_trait]
impl KnowledgeStore for FileKnowledgeStore {
    async fn entries_by_language(
        &self,
        language: Language,
    ) -> Result<Vec<KnowledgeEntry>, MitraError> {
        Ok(self.by_language.get(&language).cloned().unwrap_or_default())
    }
}

/// User preferences loaded from a JSON map of user id to language code.
/// Unknown codes are skipped with a warning rather than failing the load.
pub struct FilePreferenceStore {
    preferences: HashMap<String, Language>,
}

impl FilePreferenceStore {
    pub fn load(path: &Path) -> Result<Self, MitraError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| MitraError::Preference(format!("read {}: {}", path.display(), e)))?;
        let codes: HashMap<String, String> = serde_json::from_str(&raw)
            .map_err(|e| MitraError::Preference(format!("parse {}: {}", path.display(), e)))?;

        let mut preferences = HashMap::new();
        for (user_id, code) in codes {
            match Language::from_code(&code) {
                Some(language) => {
                    preferences.insert(user_id, language);
                }
                None => {
                    warn!("Unknown language code '{}' for user {}, skipping", code, user_id);
                }
            }
        }
        Ok(Self { preferences })
    }

    pub fn from_map(preferences: HashMap<String, Language>) -> Self {
        Self { preferences }
    }

    pub fn len(&self) -> usize {
        self.preferences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.preferences.is_empty()
    }
}

#[async_trait]
impl PreferenceStore for FilePreferenceStore {
    async fn preferred_language(&self, user_id: &str) -> Result<Option<Language>, MitraError> {
        Ok(self.preferences.get(user_id).copied())
    }
}

// ============================================================================
// Fakes (testing)
// ============================================================================

/// In-memory knowledge store with optional scripted failure and call counts.
pub struct FakeKnowledgeStore {
    entries: Vec<KnowledgeEntry>,
    fail_with: Option<String>,
    calls: Arc<Mutex<usize>>,
}

impl FakeKnowledgeStore {
    pub fn with_entries(entries: Vec<KnowledgeEntry>) -> Self {
        Self {
            entries,
            fail_with: None,
            calls: Arc::new(Mutex::new(0)),
        }
    }

    pub fn empty() -> Self {
        Self::with_entries(Vec::new())
    }

    pub fn all_failing(message: &str) -> Self {
        Self {
            entries: Vec::new(),
            fail_with: Some(message.to_string()),
            calls: Arc::new(Mutex::new(0)),
        }
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl KnowledgeStore for FakeKnowledgeStore {
    async fn entries_by_language(
        &self,
        language: Language,
    ) -> Result<Vec<KnowledgeEntry>, MitraError> {
        *self.calls.lock().unwrap() += 1;
        if let Some(message) = &self.fail_with {
            return Err(MitraError::Knowledge(message.clone()));
        }
        Ok(self
            .entries
            .iter()
            .filter(|e| e.language == language)
            .cloned()
            .collect())
    }
}

/// In-memory preference store.
pub struct FakePreferenceStore {
    preferences: HashMap<String, Language>,
    fail_with: Option<String>,
}

impl FakePreferenceStore {
    pub fn empty() -> Self {
        Self {
            preferences: HashMap::new(),
            fail_with: None,
        }
    }

    pub fn with_preference(user_id: &str, language: Language) -> Self {
        let mut preferences = HashMap::new();
        preferences.insert(user_id.to_string(), language);
        Self {
            preferences,
            fail_with: None,
        }
    }

    pub fn all_failing(message: &str) -> Self {
        Self {
            preferences: HashMap::new(),
            fail_with: Some(message.to_string()),
        }
    }
}

#[async_trait]
impl PreferenceStore for FakePreferenceStore {
    async fn preferred_language(&self, user_id: &str) -> Result<Option<Language>, MitraError> {
        if let Some(message) = &self.fail_with {
            return Err(MitraError::Preference(message.clone()));
        }
        Ok(self.preferences.get(user_id).copied())
    }
}
