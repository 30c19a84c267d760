//! Configuration management for mitrad.
//!
//! Loads settings from /etc/mitra/config.toml, then ./mitra.toml, then
//! defaults. Every field has a serde default so partial files parse.

use anyhow::Result;
use mitra_common::Language;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Config file path
pub const CONFIG_PATH: &str = "/etc/mitra/config.toml";

/// Working-directory fallback for development setups
pub const LOCAL_CONFIG_PATH: &str = "mitra.toml";

/// External service endpoints and per-call limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Ollama-compatible base URL serving chat and embeddings
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,

    /// Model answering user questions
    #[serde(default = "default_inference_model")]
    pub inference_model: String,

    /// Model producing query embeddings
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// Completion token cap per answer
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Per-call inference timeout in milliseconds
    #[serde(default = "default_inference_timeout")]
    pub inference_timeout_ms: u64,

    /// Per-call embedding timeout in milliseconds
    #[serde(default = "default_embed_timeout")]
    pub embed_timeout_ms: u64,

    /// Transcription service endpoint
    #[serde(default = "default_transcribe_url")]
    pub transcribe_url: String,

    /// Speech synthesis service endpoint
    #[serde(default = "default_synthesize_url")]
    pub synthesize_url: String,

    /// Outbound delivery endpoint
    #[serde(default = "default_delivery_url")]
    pub delivery_url: String,
}

fn default_ollama_url() -> String {
    "http://127.0.0.1:11434".to_string()
}

fn default_inference_model() -> String {
    "llama3.1:8b".to_string()
}

fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}

fn default_max_tokens() -> u32 {
    512
}

fn default_inference_timeout() -> u64 {
    8_000
}

fn default_embed_timeout() -> u64 {
    4_000
}

fn default_transcribe_url() -> String {
    "http://127.0.0.1:8085/transcribe".to_string()
}

fn default_synthesize_url() -> String {
    "http://127.0.0.1:8085/synthesize".to_string()
}

fn default_delivery_url() -> String {
    "http://127.0.0.1:8090/send".to_string()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            ollama_url: default_ollama_url(),
            inference_model: default_inference_model(),
            embedding_model: default_embedding_model(),
            max_tokens: default_max_tokens(),
            inference_timeout_ms: default_inference_timeout(),
            embed_timeout_ms: default_embed_timeout(),
            transcribe_url: default_transcribe_url(),
            synthesize_url: default_synthesize_url(),
            delivery_url: default_delivery_url(),
        }
    }
}

impl ServiceConfig {
    pub fn inference_timeout(&self) -> Duration {
        Duration::from_millis(self.inference_timeout_ms)
    }

    pub fn embed_timeout(&self) -> Duration {
        Duration::from_millis(self.embed_timeout_ms)
    }
}

/// Circuit breaker tuning for the inference dependency
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Trailing window in seconds over which the failure rate is computed
    #[serde(default = "default_breaker_window")]
    pub window_secs: u64,

    /// Failure fraction at or above which the circuit opens
    #[serde(default = "default_failure_rate_threshold")]
    pub failure_rate_threshold: f64,

    /// Minimum calls in the window before the rate is evaluated
    #[serde(default = "default_min_calls")]
    pub min_calls: usize,

    /// Seconds an open circuit waits before allowing a probe
    #[serde(default = "default_reset_interval")]
    pub reset_interval_secs: u64,
}

fn default_breaker_window() -> u64 {
    60
}

fn default_failure_rate_threshold() -> f64 {
    0.5
}

fn default_min_calls() -> usize {
    2
}

fn default_reset_interval() -> u64 {
    30
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            window_secs: default_breaker_window(),
            failure_rate_threshold: default_failure_rate_threshold(),
            min_calls: default_min_calls(),
            reset_interval_secs: default_reset_interval(),
        }
    }
}

impl BreakerConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn reset_interval(&self) -> Duration {
        Duration::from_secs(self.reset_interval_secs)
    }
}

/// Semantic retrieval tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Maximum entries handed to the model as context
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Entries scoring below this cosine similarity are excluded
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f32,

    /// Embedding cache time-to-live in seconds
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    /// Embedding cache entry cap
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

fn default_top_k() -> usize {
    5
}

fn default_min_similarity() -> f32 {
    0.7
}

fn default_cache_ttl() -> u64 {
    3_600
}

fn default_cache_capacity() -> usize {
    1_024
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            min_similarity: default_min_similarity(),
            cache_ttl_secs: default_cache_ttl(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

impl RetrievalConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

/// Fallback chain acceptance floors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackConfig {
    /// Model-path result must score strictly above this to be accepted
    #[serde(default = "default_model_floor")]
    pub model_floor: f32,

    /// Confidence assigned to a successful model answer. The model does not
    /// expose calibrated confidence, so this stays a constant.
    #[serde(default = "default_model_confidence")]
    pub model_confidence: f32,

    /// Lexical match accepted at or above this score
    #[serde(default = "default_lexical_floor")]
    pub lexical_floor: f32,
}

fn default_model_floor() -> f32 {
    0.7
}

fn default_model_confidence() -> f32 {
    0.9
}

fn default_lexical_floor() -> f32 {
    0.7
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            model_floor: default_model_floor(),
            model_confidence: default_model_confidence(),
            lexical_floor: default_lexical_floor(),
        }
    }
}

/// Stage sequencing and language resolution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Language used when detection and stored preference both fail
    #[serde(default = "default_language")]
    pub default_language: Language,

    /// Detection confidence below this consults the preference store
    #[serde(default = "default_detection_floor")]
    pub detection_confidence_floor: f32,

    /// Reply to voice messages with synthesized audio
    #[serde(default = "default_voice_replies")]
    pub voice_replies: bool,

    /// Transcription stage timeout in milliseconds
    #[serde(default = "default_transcribe_stage_timeout")]
    pub transcribe_timeout_ms: u64,

    /// Language detection stage timeout in milliseconds (covers the
    /// preference store lookup)
    #[serde(default = "default_detect_stage_timeout")]
    pub detect_timeout_ms: u64,

    /// Resolution stage timeout in milliseconds (whole fallback chain)
    #[serde(default = "default_resolve_stage_timeout")]
    pub resolve_timeout_ms: u64,

    /// Synthesis stage timeout in milliseconds
    #[serde(default = "default_synthesize_stage_timeout")]
    pub synthesize_timeout_ms: u64,

    /// Whole-request deadline in milliseconds, checked at stage boundaries
    #[serde(default = "default_overall_deadline")]
    pub overall_deadline_ms: u64,
}

fn default_language() -> Language {
    Language::En
}

fn default_detection_floor() -> f32 {
    0.8
}

fn default_voice_replies() -> bool {
    true
}

fn default_transcribe_stage_timeout() -> u64 {
    10_000
}

fn default_detect_stage_timeout() -> u64 {
    2_000
}

fn default_resolve_stage_timeout() -> u64 {
    15_000
}

fn default_synthesize_stage_timeout() -> u64 {
    10_000
}

fn default_overall_deadline() -> u64 {
    30_000
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_language: default_language(),
            detection_confidence_floor: default_detection_floor(),
            voice_replies: default_voice_replies(),
            transcribe_timeout_ms: default_transcribe_stage_timeout(),
            detect_timeout_ms: default_detect_stage_timeout(),
            resolve_timeout_ms: default_resolve_stage_timeout(),
            synthesize_timeout_ms: default_synthesize_stage_timeout(),
            overall_deadline_ms: default_overall_deadline(),
        }
    }
}

impl OrchestratorConfig {
    pub fn transcribe_timeout(&self) -> Duration {
        Duration::from_millis(self.transcribe_timeout_ms)
    }

    pub fn detect_timeout(&self) -> Duration {
        Duration::from_millis(self.detect_timeout_ms)
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_millis(self.resolve_timeout_ms)
    }

    pub fn synthesize_timeout(&self) -> Duration {
        Duration::from_millis(self.synthesize_timeout_ms)
    }

    pub fn overall_deadline(&self) -> Duration {
        Duration::from_millis(self.overall_deadline_ms)
    }
}

/// Outbound delivery retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Total send attempts before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Fixed delay between attempts in milliseconds
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,

    /// Per-send timeout in milliseconds
    #[serde(default = "default_send_timeout")]
    pub send_timeout_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    5_000
}

fn default_send_timeout() -> u64 {
    5_000
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay(),
            send_timeout_ms: default_send_timeout(),
        }
    }
}

impl DeliveryConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

/// Knowledge corpus and preference file locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    #[serde(default = "default_corpus_path")]
    pub corpus_path: String,

    #[serde(default = "default_preferences_path")]
    pub preferences_path: String,
}

fn default_corpus_path() -> String {
    "/etc/mitra/knowledge.json".to_string()
}

fn default_preferences_path() -> String {
    "/etc/mitra/preferences.json".to_string()
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            corpus_path: default_corpus_path(),
            preferences_path: default_preferences_path(),
        }
    }
}

/// Full daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,

    #[serde(default)]
    pub breaker: BreakerConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub fallback: FallbackConfig,

    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    #[serde(default)]
    pub delivery: DeliveryConfig,

    #[serde(default)]
    pub knowledge: KnowledgeConfig,
}

impl Config {
    /// Load config from the standard locations, or return defaults
    pub fn load() -> Self {
        Self::load_from_path(CONFIG_PATH)
            .or_else(|_| Self::load_from_path(LOCAL_CONFIG_PATH))
            .unwrap_or_else(|e| {
                warn!("Config not found, using defaults: {}", e);
                Config::default()
            })
    }

    /// Load config from a specific path
    pub fn load_from_path(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!("Loaded config from {}", path);
        Ok(config)
    }

    /// Save default config to path (for init)
    pub fn save_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)?;
        if let Some(parent) = Path::new(path).parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        info!("Saved default config to {}", path);
        Ok(())
    }
}
