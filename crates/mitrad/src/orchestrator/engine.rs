//! Per-request orchestration engine.
//!
//! ## Flow
//!
//! ```text
//! received → (transcribing) → language_detecting → resolving
//!                → (synthesizing) → delivering → {delivered | failed}
//! ```
//!
//! Bracketed stages run only when applicable: text input skips
//! transcription, voice-disabled skips synthesis.
//!
//! ## Invariants
//!
//! 1. Stages execute sequentially, each under its own timeout
//! 2. The whole-request deadline is checked at every stage boundary;
//!    past it, remaining stages are abandoned
//! 3. Resolution never fails: a resolve-stage timeout degrades to the
//!    canned default for the request language
//! 4. For voice replies, the text send always starts before the voice send
//! 5. Every terminal failure is logged with the full request context and
//!    counted on the metrics registry

use crate::config::Config;
use crate::delivery::{deliver_with_retry, DeliveryChannel, RetryPolicy};
use crate::detect::LanguageDetector;
use crate::fallback::{FallbackChain, FallbackOutcome, StrategyKind};
use crate::metrics::PipelineMetrics;
use crate::speech::{Synthesizer, Transcriber};
use crate::store::PreferenceStore;
use mitra_common::{
    messages, DeliveryPayload, InboundRequest, Language, LanguageSource, RequestContext,
    RequestStatus, ResponseMode, Stage,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Stage timeouts, language policy and delivery retry for one engine.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub default_language: Language,
    pub detection_confidence_floor: f32,
    pub voice_replies: bool,
    pub transcribe_timeout: Duration,
    pub detect_timeout: Duration,
    pub resolve_timeout: Duration,
    pub synthesize_timeout: Duration,
    pub overall_deadline: Duration,
    pub retry_policy: RetryPolicy,
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            default_language: config.orchestrator.default_language,
            detection_confidence_floor: config.orchestrator.detection_confidence_floor,
            voice_replies: config.orchestrator.voice_replies,
            transcribe_timeout: config.orchestrator.transcribe_timeout(),
            detect_timeout: config.orchestrator.detect_timeout(),
            resolve_timeout: config.orchestrator.resolve_timeout(),
            synthesize_timeout: config.orchestrator.synthesize_timeout(),
            overall_deadline: config.orchestrator.overall_deadline(),
            retry_policy: RetryPolicy {
                max_attempts: config.delivery.max_attempts as usize,
                retry_delay: config.delivery.retry_delay(),
                send_timeout: config.delivery.send_timeout(),
            },
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Sequences one request through the pipeline. Owns no request state;
/// everything per-request lives in the `RequestContext` it returns.
pub struct Orchestrator {
    transcriber: Arc<dyn Transcriber>,
    detector: Arc<dyn LanguageDetector>,
    preferences: Arc<dyn PreferenceStore>,
    chain: FallbackChain,
    synthesizer: Arc<dyn Synthesizer>,
    delivery: Arc<dyn DeliveryChannel>,
    metrics: Arc<PipelineMetrics>,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transcriber: Arc<dyn Transcriber>,
        detector: Arc<dyn LanguageDetector>,
        preferences: Arc<dyn PreferenceStore>,
        chain: FallbackChain,
        synthesizer: Arc<dyn Synthesizer>,
        delivery: Arc<dyn DeliveryChannel>,
        metrics: Arc<PipelineMetrics>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            transcriber,
            detector,
            preferences,
            chain,
            synthesizer,
            delivery,
            metrics,
            settings,
        }
    }

    /// Drive one request to a terminal status. Never returns an error;
    /// every failure path lands in the returned context as `Failed`.
    pub async fn handle(&self, request: InboundRequest) -> RequestContext {
        // ================================================================
        // STEP 0: Start clock and bookkeeping
        // ================================================================
        let started = Instant::now();
        let mut ctx = RequestContext::new(request);
        info!(
            "[*]  request {} received ({} from {})",
            ctx.request_id,
            kind_label(&ctx.request),
            ctx.user_id
        );

        // ================================================================
        // STEP 1: Transcription (voice input only)
        // ================================================================
        if self.past_deadline(&started) {
            self.fail_deadline(&mut ctx).await;
            return ctx;
        }

        let audio = match &ctx.request {
            InboundRequest::Voice { audio_ref, .. } => Some(audio_ref.clone()),
            InboundRequest::Text { body, .. } => {
                ctx.query_text = Some(body.trim().to_string());
                None
            }
        };

        if let Some(audio_ref) = audio {
            let stage_start = Instant::now();
            let hint = ctx.request.language_hint();
            let attempt = tokio::time::timeout(
                self.settings.transcribe_timeout,
                self.transcriber.transcribe(&audio_ref, hint),
            )
            .await;
            self.finish_stage(&mut ctx, Stage::Transcribing, stage_start);

            match attempt {
                Ok(Ok(transcript)) => {
                    info!(
                        "[T]  transcribed {} chars (confidence {:.2})",
                        transcript.text.len(),
                        transcript.confidence
                    );
                    ctx.query_text = Some(transcript.text);
                    ctx.transcription_confidence = Some(transcript.confidence);
                }
                Ok(Err(e)) => {
                    warn!("[!]  transcription failed: {}", e);
                    self.deliver_resend_prompt(&mut ctx).await;
                    self.terminal_failure(&mut ctx, "transcription_failed");
                    return ctx;
                }
                Err(_) => {
                    warn!(
                        "[!]  transcription timed out after {}ms",
                        self.settings.transcribe_timeout.as_millis()
                    );
                    self.deliver_resend_prompt(&mut ctx).await;
                    self.terminal_failure(&mut ctx, "transcription_failed");
                    return ctx;
                }
            }
        }

        // ================================================================
        // STEP 2: Language detection
        // ================================================================
        if self.past_deadline(&started) {
            self.fail_deadline(&mut ctx).await;
            return ctx;
        }

        let detect_start = Instant::now();
        self.resolve_language(&mut ctx).await;
        self.finish_stage(&mut ctx, Stage::LanguageDetecting, detect_start);

        // ================================================================
        // STEP 3: Answer resolution through the fallback chain
        // ================================================================
        if self.past_deadline(&started) {
            self.fail_deadline(&mut ctx).await;
            return ctx;
        }

        let language = ctx.language_or(self.settings.default_language);
        let query = ctx.query_text.clone().unwrap_or_default();

        let resolve_start = Instant::now();
        let outcome = match tokio::time::timeout(
            self.settings.resolve_timeout,
            self.chain.resolve(&query, language, &mut ctx),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(
                    "[!]  resolve stage timed out after {}ms, using canned default",
                    self.settings.resolve_timeout.as_millis()
                );
                let text = messages::default_response(language).to_string();
                ctx.set_response(text.clone(), ResponseMode::Offline);
                self.metrics.record_strategy(StrategyKind::Default.as_str(), "offline");
                FallbackOutcome {
                    text,
                    mode: ResponseMode::Offline,
                    confidence: 0.0,
                    elapsed: resolve_start.elapsed(),
                    strategy: StrategyKind::Default,
                }
            }
        };
        self.finish_stage(&mut ctx, Stage::Resolving, resolve_start);
        info!(
            "[F]  resolved via {} in {}ms (mode={})",
            outcome.strategy.as_str(),
            outcome.elapsed.as_millis(),
            outcome.mode.as_str()
        );

        // ================================================================
        // STEP 4: Voice synthesis (voice input with voice replies enabled)
        // ================================================================
        if ctx.request.is_voice() && self.settings.voice_replies {
            if self.past_deadline(&started) {
                self.fail_deadline(&mut ctx).await;
                return ctx;
            }

            let synth_start = Instant::now();
            match tokio::time::timeout(
                self.settings.synthesize_timeout,
                self.synthesizer.synthesize(&outcome.text, language),
            )
            .await
            {
                Ok(Ok(audio_ref)) => {
                    info!("[S]  voice reply synthesized: {}", audio_ref);
                    ctx.voice_reply_ref = Some(audio_ref);
                }
                Ok(Err(e)) => {
                    warn!("[!]  synthesis failed, replying text-only: {}", e);
                }
                Err(_) => {
                    warn!(
                        "[!]  synthesis timed out after {}ms, replying text-only",
                        self.settings.synthesize_timeout.as_millis()
                    );
                }
            }
            self.finish_stage(&mut ctx, Stage::Synthesizing, synth_start);
        }

        // ================================================================
        // STEP 5: Delivery, text strictly before voice
        // ================================================================
        if self.past_deadline(&started) {
            self.fail_deadline(&mut ctx).await;
            return ctx;
        }

        let delivery_start = Instant::now();
        let text_payload = DeliveryPayload::Text {
            body: outcome.text.clone(),
            language,
        };
        match deliver_with_retry(
            self.delivery.as_ref(),
            &ctx.user_id,
            &text_payload,
            &self.settings.retry_policy,
        )
        .await
        {
            Ok(attempts) => {
                self.metrics.record_delivery_attempts(attempts);
                info!("[D]  text reply delivered (attempt {})", attempts);
            }
            Err(e) => {
                warn!("[!]  text delivery exhausted: {}", e);
                self.metrics
                    .record_delivery_attempts(self.settings.retry_policy.max_attempts);
                self.finish_stage(&mut ctx, Stage::Delivering, delivery_start);
                self.terminal_failure(&mut ctx, "delivery_exhausted");
                return ctx;
            }
        }

        if let Some(audio_ref) = ctx.voice_reply_ref.clone() {
            let voice_payload = DeliveryPayload::Voice {
                audio_ref,
                language,
            };
            match deliver_with_retry(
                self.delivery.as_ref(),
                &ctx.user_id,
                &voice_payload,
                &self.settings.retry_policy,
            )
            .await
            {
                Ok(attempts) => {
                    self.metrics.record_delivery_attempts(attempts);
                    info!("[D]  voice reply delivered (attempt {})", attempts);
                }
                Err(e) => {
                    // Text already reached the user; the request still counts
                    // as delivered.
                    warn!("[!]  voice delivery failed after text was delivered: {}", e);
                    self.metrics
                        .record_delivery_attempts(self.settings.retry_policy.max_attempts);
                }
            }
        }
        self.finish_stage(&mut ctx, Stage::Delivering, delivery_start);

        // ================================================================
        // STEP 6: Terminal bookkeeping
        // ================================================================
        ctx.status = Some(RequestStatus::Delivered);
        self.metrics
            .record_request(kind_label(&ctx.request), "delivered");
        info!(
            "[+]  request {} delivered in {}ms",
            ctx.request_id,
            started.elapsed().as_millis()
        );
        ctx
    }

    /// Pick the reply language: explicit hint, then confident detection,
    /// then stored preference, then the system default.
    async fn resolve_language(&self, ctx: &mut RequestContext) {
        if let Some(hint) = ctx.request.language_hint() {
            ctx.set_language(hint, 1.0, LanguageSource::Requested);
            info!("[L]  language {} from request hint", hint);
            return;
        }

        let query = ctx.query_text.clone().unwrap_or_default();
        let detection = match self.detector.detect(&query).await {
            Ok(detection) => Some(detection),
            Err(e) => {
                warn!("[!]  language detection failed: {}", e);
                None
            }
        };

        if let Some(detection) = detection {
            if detection.confidence >= self.settings.detection_confidence_floor {
                ctx.set_language(detection.language, detection.confidence, LanguageSource::Detected);
                info!(
                    "[L]  language {} detected (confidence {:.2})",
                    detection.language, detection.confidence
                );
                return;
            }
            debug!(
                "[L]  detection confidence {:.2} below floor {:.2}",
                detection.confidence, self.settings.detection_confidence_floor
            );
        }

        match tokio::time::timeout(
            self.settings.detect_timeout,
            self.preferences.preferred_language(&ctx.user_id),
        )
        .await
        {
            Ok(Ok(Some(language))) => {
                ctx.set_language(language, 1.0, LanguageSource::StoredPreference);
                info!("[L]  language {} from stored preference", language);
                return;
            }
            Ok(Ok(None)) => {}
            Ok(Err(e)) => warn!("[!]  preference lookup failed: {}", e),
            Err(_) => warn!(
                "[!]  preference lookup timed out after {}ms",
                self.settings.detect_timeout.as_millis()
            ),
        }

        ctx.set_language(
            self.settings.default_language,
            0.0,
            LanguageSource::SystemDefault,
        );
        info!(
            "[L]  language {} from system default",
            self.settings.default_language
        );
    }

    /// Localized "please resend or type" reply for a failed transcription.
    /// Uses the request hint or the system default; detection never ran.
    async fn deliver_resend_prompt(&self, ctx: &mut RequestContext) {
        let language = ctx
            .request
            .language_hint()
            .unwrap_or(self.settings.default_language);
        let payload = DeliveryPayload::Text {
            body: messages::resend_prompt(language).to_string(),
            language,
        };
        match deliver_with_retry(
            self.delivery.as_ref(),
            &ctx.user_id,
            &payload,
            &self.settings.retry_policy,
        )
        .await
        {
            Ok(attempts) => self.metrics.record_delivery_attempts(attempts),
            Err(e) => {
                warn!("[!]  could not deliver resend prompt: {}", e);
                self.metrics
                    .record_delivery_attempts(self.settings.retry_policy.max_attempts);
            }
        }
    }

    /// Whole-request deadline elapsed: best-effort apology, then terminal
    /// failure. One send attempt only; the client has likely moved on.
    async fn fail_deadline(&self, ctx: &mut RequestContext) {
        warn!(
            "[!]  overall deadline of {}ms exceeded, abandoning request",
            self.settings.overall_deadline.as_millis()
        );
        let language = ctx.language_or(self.settings.default_language);
        let payload = DeliveryPayload::Text {
            body: messages::apology(language).to_string(),
            language,
        };
        let one_shot = RetryPolicy {
            max_attempts: 1,
            ..self.settings.retry_policy
        };
        if let Err(e) =
            deliver_with_retry(self.delivery.as_ref(), &ctx.user_id, &payload, &one_shot).await
        {
            debug!("apology delivery failed: {}", e);
        }
        self.terminal_failure(ctx, "deadline_exceeded");
    }

    fn terminal_failure(&self, ctx: &mut RequestContext, reason: &str) {
        ctx.status = Some(RequestStatus::Failed);
        self.metrics.record_terminal_failure(reason);
        self.metrics.record_request(kind_label(&ctx.request), "failed");
        error!(
            reason,
            context = %serde_json::to_string(ctx).unwrap_or_default(),
            "[!]  request failed terminally"
        );
    }

    fn finish_stage(&self, ctx: &mut RequestContext, stage: Stage, started: Instant) {
        let elapsed = started.elapsed();
        ctx.record_stage(stage, elapsed);
        self.metrics.observe_stage(stage, elapsed);
    }

    fn past_deadline(&self, started: &Instant) -> bool {
        started.elapsed() >= self.settings.overall_deadline
    }
}

fn kind_label(request: &InboundRequest) -> &'static str {
    if request.is_voice() {
        "voice"
    } else {
        "text"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::CircuitBreaker;
    use crate::delivery::FakeDeliveryChannel;
    use crate::detect::FakeDetector;
    use crate::embedding::FakeEmbedder;
    use crate::fallback::ChainSettings;
    use crate::inference::{FakeInference, InferenceClient};
    use crate::lexical::LexicalMatcher;
    use crate::retrieval::RetrievalEngine;
    use crate::speech::{FakeSynthesizer, FakeTranscriber};
    use crate::store::{FakeKnowledgeStore, FakePreferenceStore};
    use mitra_common::KnowledgeEntry;

    fn pm_entries() -> Vec<KnowledgeEntry> {
        vec![KnowledgeEntry {
            id: "pmk-elig".to_string(),
            question: "Who is eligible for PM-KISAN".to_string(),
            answer: "All landholding farmer families with cultivable land are eligible."
                .to_string(),
            category: "eligibility".to_string(),
            language: Language::En,
            keywords: vec!["pm-kisan".to_string(), "eligibility".to_string()],
            embedding: vec![0.9, 0.44],
        }]
    }

    fn fast_settings() -> OrchestratorSettings {
        OrchestratorSettings {
            default_language: Language::En,
            detection_confidence_floor: 0.8,
            voice_replies: true,
            transcribe_timeout: Duration::from_millis(200),
            detect_timeout: Duration::from_millis(200),
            resolve_timeout: Duration::from_millis(400),
            synthesize_timeout: Duration::from_millis(200),
            overall_deadline: Duration::from_secs(5),
            retry_policy: RetryPolicy {
                max_attempts: 3,
                retry_delay: Duration::from_millis(10),
                send_timeout: Duration::from_millis(100),
            },
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        transcriber: Arc<dyn Transcriber>,
        detector: Arc<dyn LanguageDetector>,
        preferences: Arc<dyn PreferenceStore>,
        inference: Arc<dyn InferenceClient>,
        synthesizer: Arc<dyn Synthesizer>,
        delivery: Arc<dyn DeliveryChannel>,
        settings: OrchestratorSettings,
    ) -> Orchestrator {
        let store = Arc::new(FakeKnowledgeStore::with_entries(pm_entries()));
        let embedder = Arc::new(FakeEmbedder::with_default(vec![1.0, 0.0]));
        let metrics = Arc::new(PipelineMetrics::new());
        let chain = FallbackChain::new(
            Arc::new(RetrievalEngine::new(store.clone(), embedder, 5, 0.7)),
            inference,
            Arc::new(LexicalMatcher::new(store)),
            CircuitBreaker::default().shared(),
            metrics.clone(),
            ChainSettings {
                inference_timeout: Duration::from_millis(200),
                ..ChainSettings::default()
            },
        );
        Orchestrator::new(
            transcriber,
            detector,
            preferences,
            chain,
            synthesizer,
            delivery,
            metrics,
            settings,
        )
    }

    fn text_request(body: &str) -> InboundRequest {
        InboundRequest::Text {
            user_id: "farmer-1".to_string(),
            body: body.to_string(),
            language_hint: None,
        }
    }

    fn voice_request() -> InboundRequest {
        InboundRequest::Voice {
            user_id: "farmer-1".to_string(),
            audio_ref: "media/q1.ogg".to_string(),
            language_hint: None,
        }
    }

    #[tokio::test]
    async fn test_text_request_skips_transcription_and_delivers_online() {
        let transcriber = Arc::new(FakeTranscriber::always("unused", 0.9));
        let channel = Arc::new(FakeDeliveryChannel::always_ok());
        let orchestrator = build(
            transcriber.clone(),
            Arc::new(FakeDetector::returning(Language::En, 0.95)),
            Arc::new(FakePreferenceStore::empty()),
            Arc::new(FakeInference::always_ok("You qualify if your family holds cultivable land.")),
            Arc::new(FakeSynthesizer::always_ok()),
            channel.clone(),
            fast_settings(),
        );

        let ctx = orchestrator
            .handle(text_request("What is PM-KISAN eligibility"))
            .await;

        assert_eq!(ctx.status, Some(RequestStatus::Delivered));
        assert_eq!(ctx.response_mode, Some(ResponseMode::Online));
        assert_eq!(transcriber.call_count(), 0);
        assert!(!ctx.stage_elapsed_ms.contains_key(&Stage::Transcribing));
        assert!(ctx.stage_elapsed_ms.contains_key(&Stage::Resolving));

        let payloads = channel.payloads();
        assert_eq!(payloads.len(), 1);
        assert!(matches!(payloads[0], DeliveryPayload::Text { .. }));
    }

    #[tokio::test]
    async fn test_voice_request_sends_text_before_voice() {
        let channel = Arc::new(FakeDeliveryChannel::always_ok());
        let orchestrator = build(
            Arc::new(FakeTranscriber::always("who is eligible for pm-kisan", 0.91)),
            Arc::new(FakeDetector::returning(Language::En, 0.95)),
            Arc::new(FakePreferenceStore::empty()),
            Arc::new(FakeInference::always_ok("Landholding farmer families qualify.")),
            Arc::new(FakeSynthesizer::always_ok()),
            channel.clone(),
            fast_settings(),
        );

        let ctx = orchestrator.handle(voice_request()).await;

        assert_eq!(ctx.status, Some(RequestStatus::Delivered));
        assert!(ctx.voice_reply_ref.is_some());
        assert!(ctx.stage_elapsed_ms.contains_key(&Stage::Transcribing));
        assert!(ctx.stage_elapsed_ms.contains_key(&Stage::Synthesizing));

        let payloads = channel.payloads();
        assert_eq!(payloads.len(), 2);
        assert!(matches!(payloads[0], DeliveryPayload::Text { .. }));
        assert!(matches!(payloads[1], DeliveryPayload::Voice { .. }));
    }

    #[tokio::test]
    async fn test_transcription_failure_sends_resend_prompt_and_stops() {
        let detector = Arc::new(FakeDetector::returning(Language::En, 0.95));
        let inference = Arc::new(FakeInference::always_ok("should never run"));
        let channel = Arc::new(FakeDeliveryChannel::always_ok());
        let orchestrator = build(
            Arc::new(FakeTranscriber::all_failing("decoder crashed")),
            detector.clone(),
            Arc::new(FakePreferenceStore::empty()),
            inference.clone(),
            Arc::new(FakeSynthesizer::always_ok()),
            channel.clone(),
            fast_settings(),
        );

        let ctx = orchestrator.handle(voice_request()).await;

        assert_eq!(ctx.status, Some(RequestStatus::Failed));
        // No downstream stage ran
        assert_eq!(detector.call_count(), 0);
        assert_eq!(inference.call_count(), 0);
        assert!(ctx.response_mode.is_none());

        // The user got exactly the localized resend prompt
        let payloads = channel.payloads();
        assert_eq!(payloads.len(), 1);
        match &payloads[0] {
            DeliveryPayload::Text { body, language } => {
                assert_eq!(body, messages::resend_prompt(Language::En));
                assert_eq!(*language, Language::En);
            }
            other => panic!("expected text payload, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_delivery_exhaustion_marks_request_failed() {
        let channel = Arc::new(FakeDeliveryChannel::all_failing("gateway down"));
        let orchestrator = build(
            Arc::new(FakeTranscriber::always("unused", 0.9)),
            Arc::new(FakeDetector::returning(Language::En, 0.95)),
            Arc::new(FakePreferenceStore::empty()),
            Arc::new(FakeInference::always_ok("an answer nobody will receive")),
            Arc::new(FakeSynthesizer::always_ok()),
            channel.clone(),
            fast_settings(),
        );

        let ctx = orchestrator
            .handle(text_request("What is PM-KISAN eligibility"))
            .await;

        assert_eq!(ctx.status, Some(RequestStatus::Failed));
        assert_eq!(channel.call_count(), 3);
    }

    #[tokio::test]
    async fn test_voice_delivery_failure_after_text_still_counts_delivered() {
        // Text send succeeds, then every voice send fails
        let channel = Arc::new(FakeDeliveryChannel::sequence(vec![
            Ok(()),
            Err("player offline"),
            Err("player offline"),
            Err("player offline"),
        ]));
        let orchestrator = build(
            Arc::new(FakeTranscriber::always("who is eligible for pm-kisan", 0.91)),
            Arc::new(FakeDetector::returning(Language::En, 0.95)),
            Arc::new(FakePreferenceStore::empty()),
            Arc::new(FakeInference::always_ok("Landholding farmer families qualify.")),
            Arc::new(FakeSynthesizer::always_ok()),
            channel.clone(),
            fast_settings(),
        );

        let ctx = orchestrator.handle(voice_request()).await;

        assert_eq!(ctx.status, Some(RequestStatus::Delivered));
        assert_eq!(channel.call_count(), 4);
    }

    #[tokio::test]
    async fn test_synthesis_failure_degrades_to_text_only() {
        let channel = Arc::new(FakeDeliveryChannel::always_ok());
        let orchestrator = build(
            Arc::new(FakeTranscriber::always("who is eligible for pm-kisan", 0.91)),
            Arc::new(FakeDetector::returning(Language::En, 0.95)),
            Arc::new(FakePreferenceStore::empty()),
            Arc::new(FakeInference::always_ok("Landholding farmer families qualify.")),
            Arc::new(FakeSynthesizer::all_failing("tts model missing")),
            channel.clone(),
            fast_settings(),
        );

        let ctx = orchestrator.handle(voice_request()).await;

        assert_eq!(ctx.status, Some(RequestStatus::Delivered));
        assert!(ctx.voice_reply_ref.is_none());

        let payloads = channel.payloads();
        assert_eq!(payloads.len(), 1);
        assert!(matches!(payloads[0], DeliveryPayload::Text { .. }));
    }

    #[tokio::test]
    async fn test_language_hint_beats_detection() {
        let detector = Arc::new(FakeDetector::returning(Language::En, 0.99));
        let channel = Arc::new(FakeDeliveryChannel::always_ok());
        let orchestrator = build(
            Arc::new(FakeTranscriber::always("unused", 0.9)),
            detector.clone(),
            Arc::new(FakePreferenceStore::empty()),
            Arc::new(FakeInference::always_ok("answer")),
            Arc::new(FakeSynthesizer::always_ok()),
            channel.clone(),
            fast_settings(),
        );

        let ctx = orchestrator
            .handle(InboundRequest::Text {
                user_id: "farmer-1".to_string(),
                body: "paisa kab aayega".to_string(),
                language_hint: Some(Language::Hi),
            })
            .await;

        assert_eq!(ctx.language, Some(Language::Hi));
        assert_eq!(ctx.language_source, Some(LanguageSource::Requested));
        assert_eq!(detector.call_count(), 0);

        match &channel.payloads()[0] {
            DeliveryPayload::Text { language, .. } => assert_eq!(*language, Language::Hi),
            other => panic!("expected text payload, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_low_confidence_detection_consults_stored_preference() {
        let orchestrator = build(
            Arc::new(FakeTranscriber::always("unused", 0.9)),
            Arc::new(FakeDetector::returning(Language::En, 0.3)),
            Arc::new(FakePreferenceStore::with_preference("farmer-1", Language::Te)),
            Arc::new(FakeInference::always_ok("answer")),
            Arc::new(FakeSynthesizer::always_ok()),
            Arc::new(FakeDeliveryChannel::always_ok()),
            fast_settings(),
        );

        let ctx = orchestrator.handle(text_request("155261")).await;

        assert_eq!(ctx.language, Some(Language::Te));
        assert_eq!(ctx.language_source, Some(LanguageSource::StoredPreference));
    }

    #[tokio::test]
    async fn test_no_preference_falls_back_to_system_default() {
        let orchestrator = build(
            Arc::new(FakeTranscriber::always("unused", 0.9)),
            Arc::new(FakeDetector::returning(Language::En, 0.3)),
            Arc::new(FakePreferenceStore::empty()),
            Arc::new(FakeInference::always_ok("answer")),
            Arc::new(FakeSynthesizer::always_ok()),
            Arc::new(FakeDeliveryChannel::always_ok()),
            fast_settings(),
        );

        let ctx = orchestrator.handle(text_request("155261")).await;

        assert_eq!(ctx.language, Some(Language::En));
        assert_eq!(ctx.language_source, Some(LanguageSource::SystemDefault));
    }

    #[tokio::test]
    async fn test_elapsed_deadline_abandons_before_any_stage() {
        let transcriber = Arc::new(FakeTranscriber::always("unused", 0.9));
        let inference = Arc::new(FakeInference::always_ok("unused"));
        let channel = Arc::new(FakeDeliveryChannel::always_ok());
        let mut settings = fast_settings();
        settings.overall_deadline = Duration::ZERO;

        let orchestrator = build(
            transcriber.clone(),
            Arc::new(FakeDetector::returning(Language::En, 0.95)),
            Arc::new(FakePreferenceStore::empty()),
            inference.clone(),
            Arc::new(FakeSynthesizer::always_ok()),
            channel.clone(),
            settings,
        );

        let ctx = orchestrator.handle(voice_request()).await;

        assert_eq!(ctx.status, Some(RequestStatus::Failed));
        assert_eq!(transcriber.call_count(), 0);
        assert_eq!(inference.call_count(), 0);

        // Best-effort apology, single attempt
        let payloads = channel.payloads();
        assert_eq!(payloads.len(), 1);
        match &payloads[0] {
            DeliveryPayload::Text { body, .. } => {
                assert_eq!(body, messages::apology(Language::En));
            }
            other => panic!("expected text payload, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_resolve_stage_timeout_degrades_to_canned_default() {
        let channel = Arc::new(FakeDeliveryChannel::always_ok());
        let mut settings = fast_settings();
        settings.resolve_timeout = Duration::from_millis(50);

        let orchestrator = build(
            Arc::new(FakeTranscriber::always("unused", 0.9)),
            Arc::new(FakeDetector::returning(Language::En, 0.95)),
            Arc::new(FakePreferenceStore::empty()),
            Arc::new(FakeInference::always_ok("slow answer").with_delay(Duration::from_millis(400))),
            Arc::new(FakeSynthesizer::always_ok()),
            channel.clone(),
            settings,
        );

        let ctx = orchestrator
            .handle(text_request("an unmatched question"))
            .await;

        assert_eq!(ctx.status, Some(RequestStatus::Delivered));
        assert_eq!(ctx.response_mode, Some(ResponseMode::Offline));
        assert_eq!(
            ctx.response_text.as_deref(),
            Some(messages::default_response(Language::En))
        );
    }
}
