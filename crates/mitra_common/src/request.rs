//! Request model threading state through the orchestration stages.
//!
//! A `RequestContext` is created once per inbound request, mutated in place
//! as stages complete, and dropped after delivery or terminal failure.

use crate::language::Language;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

/// Inbound request payload, one variant per input kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InboundRequest {
    Text {
        user_id: String,
        body: String,
        language_hint: Option<Language>,
    },
    Voice {
        user_id: String,
        audio_ref: String,
        language_hint: Option<Language>,
    },
}

impl InboundRequest {
    pub fn user_id(&self) -> &str {
        match self {
            InboundRequest::Text { user_id, .. } => user_id,
            InboundRequest::Voice { user_id, .. } => user_id,
        }
    }

    pub fn language_hint(&self) -> Option<Language> {
        match self {
            InboundRequest::Text { language_hint, .. } => *language_hint,
            InboundRequest::Voice { language_hint, .. } => *language_hint,
        }
    }

    pub fn is_voice(&self) -> bool {
        matches!(self, InboundRequest::Voice { .. })
    }
}

/// Outbound payload for the delivery channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeliveryPayload {
    Text {
        body: String,
        language: Language,
    },
    Voice {
        audio_ref: String,
        language: Language,
    },
}

/// Where the resolved request language came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LanguageSource {
    /// Explicit hint on the inbound request.
    Requested,
    Detected,
    StoredPreference,
    SystemDefault,
}

/// Whether the accepted answer came from the model path or a local fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseMode {
    Online,
    Offline,
}

impl ResponseMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseMode::Online => "online",
            ResponseMode::Offline => "offline",
        }
    }
}

/// Orchestration stages in execution order. Transcription and synthesis are
/// skipped when not applicable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Received,
    Transcribing,
    LanguageDetecting,
    Resolving,
    Synthesizing,
    Delivering,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Received => "received",
            Stage::Transcribing => "transcribing",
            Stage::LanguageDetecting => "language_detecting",
            Stage::Resolving => "resolving",
            Stage::Synthesizing => "synthesizing",
            Stage::Delivering => "delivering",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Terminal outcome of one orchestration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Delivered,
    Failed,
}

/// Per-request mutable record. Serialized whole into the terminal-failure
/// log line so operators see the full picture.
#[derive(Debug, Clone, Serialize)]
pub struct RequestContext {
    pub request_id: Uuid,
    pub user_id: String,
    pub request: InboundRequest,
    pub received_at: DateTime<Utc>,
    /// Normalized query text; for voice input, filled by transcription.
    pub query_text: Option<String>,
    pub transcription_confidence: Option<f32>,
    pub language: Option<Language>,
    pub language_confidence: Option<f32>,
    pub language_source: Option<LanguageSource>,
    pub response_text: Option<String>,
    pub response_mode: Option<ResponseMode>,
    pub voice_reply_ref: Option<String>,
    pub stage_elapsed_ms: HashMap<Stage, u64>,
    pub status: Option<RequestStatus>,
}

impl RequestContext {
    pub fn new(request: InboundRequest) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            user_id: request.user_id().to_string(),
            request,
            received_at: Utc::now(),
            query_text: None,
            transcription_confidence: None,
            language: None,
            language_confidence: None,
            language_source: None,
            response_text: None,
            response_mode: None,
            voice_reply_ref: None,
            stage_elapsed_ms: HashMap::new(),
            status: None,
        }
    }

    pub fn record_stage(&mut self, stage: Stage, elapsed: Duration) {
        self.stage_elapsed_ms
            .insert(stage, elapsed.as_millis() as u64);
    }

    /// Set the resolved response. The mode is written exactly once, by the
    /// strategy that produced the accepted result; later writes are ignored.
    pub fn set_response(&mut self, text: String, mode: ResponseMode) {
        if self.response_mode.is_some() {
            warn!(
                request_id = %self.request_id,
                "response already resolved, ignoring second write"
            );
            return;
        }
        self.response_text = Some(text);
        self.response_mode = Some(mode);
    }

    pub fn set_language(&mut self, language: Language, confidence: f32, source: LanguageSource) {
        self.language = Some(language);
        self.language_confidence = Some(confidence);
        self.language_source = Some(source);
    }

    /// Resolved language, falling back to the given system default when the
    /// detection stage never ran (e.g. transcription failed first).
    pub fn language_or(&self, default: Language) -> Language {
        self.language.unwrap_or(default)
    }
}
