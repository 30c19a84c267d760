//! Chat-completion client for answer generation.
//!
//! Production inference goes through an Ollama-compatible `/api/chat`
//! endpoint. The fallback chain owns the timeout and the circuit breaker;
//! this module only issues the call and normalizes errors.

use async_trait::async_trait;
use mitra_common::MitraError;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

const DEFAULT_KEEP_ALIVE: &str = "10m";

// ============================================================================
// Client trait
// ============================================================================

/// Generates a completion for a prompt.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String, MitraError>;

    /// Cheap liveness probe, used by `doctor` and startup checks.
    async fn is_available(&self) -> bool;
}

// ============================================================================
// Ollama-backed client (production)
// ============================================================================

#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<OllamaChatMessage>,
    stream: bool,
    options: OllamaChatOptions,
    keep_alive: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct OllamaChatOptions {
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: OllamaChatMessage,
}

pub struct OllamaInference {
    http_client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaInference {
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
impl InferenceClient for OllamaInference {
    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String, MitraError> {
        let url = format!("{}/api/chat", self.base_url);
        let request = OllamaChatRequest {
            model: self.model.clone(),
            messages: vec![OllamaChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            stream: false,
            options: OllamaChatOptions {
                num_predict: max_tokens,
            },
            keep_alive: DEFAULT_KEEP_ALIVE.to_string(),
        };

        debug!(model = %self.model, prompt_chars = prompt.len(), "sending inference request");

        let response = self
            .http_client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| MitraError::Inference(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(MitraError::Inference(format!(
                "service returned {}: {}",
                status, body
            )));
        }

        let parsed: OllamaChatResponse = response
            .json()
            .await
            .map_err(|e| MitraError::Inference(format!("bad response body: {}", e)))?;

        let text = parsed.message.content.trim().to_string();
        if text.is_empty() {
            return Err(MitraError::Inference("model returned empty completion".to_string()));
        }
        Ok(text)
    }

    async fn is_available(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        match self.http_client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

// ============================================================================
// Fake client (testing)
// ============================================================================

/// Scripted inference client. Replays a queue of outcomes, then falls back
/// to a fixed outcome; records every prompt it sees.
pub struct FakeInference {
    script: Mutex<VecDeque<Result<String, String>>>,
    fallback: Result<String, String>,
    delay: Option<Duration>,
    available: bool,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl FakeInference {
    /// Every call succeeds with the same text.
    pub fn always_ok(text: &str) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Ok(text.to_string()),
            delay: None,
            available: true,
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every call fails with the same message.
    pub fn all_failing(message: &str) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Err(message.to_string()),
            delay: None,
            available: false,
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Replay the given outcomes in order, then error.
    pub fn sequence(outcomes: Vec<Result<&str, &str>>) -> Self {
        Self {
            script: Mutex::new(
                outcomes
                    .into_iter()
                    .map(|o| o.map(str::to_string).map_err(str::to_string))
                    .collect(),
            ),
            fallback: Err("script exhausted".to_string()),
            delay: None,
            available: true,
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Sleep before answering, to exercise timeout paths.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl InferenceClient for FakeInference {
    async fn complete(&self, prompt: &str, _max_tokens: u32) -> Result<String, MitraError> {
        self.prompts.lock().unwrap().push(prompt.to_string());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        next.map_err(MitraError::Inference)
    }

    async fn is_available(&self) -> bool {
        self.available
    }
}
