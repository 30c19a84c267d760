//! Speech-to-text and text-to-speech clients.
//!
//! Transcription is flaky enough in the field that it carries its own short
//! retry with exponential backoff, layered as a wrapper so the HTTP client
//! stays single-shot. Synthesis never retries: a failed voice render
//! degrades the reply to text-only upstream.

use async_trait::async_trait;
use mitra_common::{Language, MitraError};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// Attempts the transcription wrapper makes before giving up.
pub const TRANSCRIBE_ATTEMPTS: usize = 2;

/// Backoff before the second transcription attempt; doubles per attempt.
pub const TRANSCRIBE_BACKOFF: Duration = Duration::from_millis(500);

/// A recognized utterance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
    pub confidence: f32,
}

// ============================================================================
// Traits
// ============================================================================

#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(
        &self,
        audio_ref: &str,
        language_hint: Option<Language>,
    ) -> Result<Transcript, MitraError>;
}

#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Renders text to speech and returns a reference to the audio.
    async fn synthesize(&self, text: &str, language: Language) -> Result<String, MitraError>;
}

// ============================================================================
// Retry wrapper for transcription
// ============================================================================

/// Retries an inner transcriber a fixed number of times with doubling
/// backoff between attempts.
pub struct RetryingTranscriber {
    inner: Arc<dyn Transcriber>,
    attempts: usize,
    backoff: Duration,
}

impl RetryingTranscriber {
    pub fn new(inner: Arc<dyn Transcriber>) -> Self {
        Self {
            inner,
            attempts: TRANSCRIBE_ATTEMPTS,
            backoff: TRANSCRIBE_BACKOFF,
        }
    }

    #[cfg(test)]
    fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }
}

#[async_trait]
impl Transcriber for RetryingTranscriber {
    async fn transcribe(
        &self,
        audio_ref: &str,
        language_hint: Option<Language>,
    ) -> Result<Transcript, MitraError> {
        let mut last_error = MitraError::Transcription("no attempts made".to_string());

        for attempt in 1..=self.attempts {
            match self.inner.transcribe(audio_ref, language_hint).await {
                Ok(transcript) => return Ok(transcript),
                Err(e) => {
                    warn!(attempt, of = self.attempts, error = %e, "transcription attempt failed");
                    last_error = e;
                }
            }
            if attempt < self.attempts {
                let delay = self.backoff * 2u32.pow(attempt as u32 - 1);
                tokio::time::sleep(delay).await;
            }
        }
        Err(last_error)
    }
}

// ============================================================================
// HTTP clients (production)
// ============================================================================

#[derive(Debug, Serialize)]
struct TranscribeRequest<'a> {
    audio_ref: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    language_hint: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct SynthesizeRequest<'a> {
    text: &'a str,
    language: &'a str,
}

#[derive(Debug, Deserialize)]
struct SynthesizeResponse {
    audio_ref: String,
}

pub struct HttpTranscriber {
    http_client: reqwest::Client,
    url: String,
}

impl HttpTranscriber {
    pub fn new(url: &str, timeout: Duration) -> Self {
        Self {
            http_client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(
        &self,
        audio_ref: &str,
        language_hint: Option<Language>,
    ) -> Result<Transcript, MitraError> {
        let request = TranscribeRequest {
            audio_ref,
            language_hint: language_hint.map(|l| l.code()),
        };

        let response = self
            .http_client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| MitraError::Transcription(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(MitraError::Transcription(format!(
                "service returned {}",
                response.status()
            )));
        }

        let transcript: Transcript = response
            .json()
            .await
            .map_err(|e| MitraError::Transcription(format!("bad response body: {}", e)))?;

        debug!(
            chars = transcript.text.len(),
            confidence = transcript.confidence,
            "transcription complete"
        );
        Ok(transcript)
    }
}

pub struct HttpSynthesizer {
    http_client: reqwest::Client,
    url: String,
}

impl HttpSynthesizer {
    pub fn new(url: &str, timeout: Duration) -> Self {
        Self {
            http_client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl Synthesizer for HttpSynthesizer {
    async fn synthesize(&self, text: &str, language: Language) -> Result<String, MitraError> {
        let request = SynthesizeRequest {
            text,
            language: language.code(),
        };

        let response = self
            .http_client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| MitraError::Synthesis(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(MitraError::Synthesis(format!(
                "service returned {}",
                response.status()
            )));
        }

        let parsed: SynthesizeResponse = response
            .json()
            .await
            .map_err(|e| MitraError::Synthesis(format!("bad response body: {}", e)))?;
        Ok(parsed.audio_ref)
    }
}

// ============================================================================
// Fakes (testing)
// ============================================================================

/// Scripted transcriber. Replays a queue of outcomes, then a fixed fallback.
pub struct FakeTranscriber {
    script: Mutex<VecDeque<Result<Transcript, String>>>,
    fallback: Result<Transcript, String>,
    calls: Arc<Mutex<usize>>,
}

impl FakeTranscriber {
    pub fn always(text: &str, confidence: f32) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Ok(Transcript {
                text: text.to_string(),
                confidence,
            }),
            calls: Arc::new(Mutex::new(0)),
        }
    }

    pub fn all_failing(message: &str) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Err(message.to_string()),
            calls: Arc::new(Mutex::new(0)),
        }
    }

    /// Replay the given outcomes in order, then error.
    pub fn sequence(outcomes: Vec<Result<(&str, f32), &str>>) -> Self {
        Self {
            script: Mutex::new(
                outcomes
                    .into_iter()
                    .map(|o| {
                        o.map(|(text, confidence)| Transcript {
                            text: text.to_string(),
                            confidence,
                        })
                        .map_err(str::to_string)
                    })
                    .collect(),
            ),
            fallback: Err("script exhausted".to_string()),
            calls: Arc::new(Mutex::new(0)),
        }
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    async fn transcribe(
        &self,
        _audio_ref: &str,
        _language_hint: Option<Language>,
    ) -> Result<Transcript, MitraError> {
        *self.calls.lock().unwrap() += 1;

        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        next.map_err(MitraError::Transcription)
    }
}

/// Synthesizer fake that mints deterministic audio refs.
pub struct FakeSynthesizer {
    fail_with: Option<String>,
    calls: Arc<Mutex<usize>>,
}

impl FakeSynthesizer {
    pub fn always_ok() -> Self {
        Self {
            fail_with: None,
            calls: Arc::new(Mutex::new(0)),
        }
    }

    pub fn all_failing(message: &str) -> Self {
        Self {
            fail_with: Some(message.to_string()),
            calls: Arc::new(Mutex::new(0)),
        }
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl Synthesizer for FakeSynthesizer {
    async fn synthesize(&self, _text: &str, language: Language) -> Result<String, MitraError> {
        let mut calls = self.calls.lock().unwrap();
        *calls += 1;

        if let Some(message) = &self.fail_with {
            return Err(MitraError::Synthesis(message.clone()));
        }
        Ok(format!("tts://{}/{}", language.code(), *calls))
    }
}
