//! Multi-level answer resolution.
//!
//! Strategies run strictly in order until one is accepted:
//!
//!   1. model-backed: retrieve context, then infer behind the circuit
//!      breaker (online)
//!   2. lexical: best keyword-overlap entry from the corpus (offline)
//!   3. canned default for the request language (offline, cannot fail)
//!
//! Every failure inside a strategy, the "circuit open" rejection included,
//! demotes to the next strategy instead of surfacing. The chain therefore
//! always produces exactly one result.

use crate::breaker::{CircuitState, SharedCircuitBreaker};
use crate::config::Config;
use crate::inference::InferenceClient;
use crate::lexical::LexicalMatcher;
use crate::metrics::PipelineMetrics;
use crate::retrieval::{RetrievalEngine, ScoredEntry};
use mitra_common::{messages, Language, MitraError, RequestContext, ResponseMode};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Which strategy produced the accepted answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    Model,
    Lexical,
    Default,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Model => "model",
            StrategyKind::Lexical => "lexical",
            StrategyKind::Default => "default",
        }
    }
}

/// The accepted result of one chain run.
#[derive(Debug, Clone)]
pub struct FallbackOutcome {
    pub text: String,
    pub mode: ResponseMode,
    pub confidence: f32,
    pub elapsed: Duration,
    pub strategy: StrategyKind,
}

/// Acceptance floors and inference limits for the chain.
#[derive(Debug, Clone, Copy)]
pub struct ChainSettings {
    pub model_floor: f32,
    /// Confidence assigned to a successful model answer. The inference
    /// service exposes no calibrated confidence, so this is a constant.
    pub model_confidence: f32,
    pub lexical_floor: f32,
    pub inference_timeout: Duration,
    pub max_tokens: u32,
}

impl ChainSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            model_floor: config.fallback.model_floor,
            model_confidence: config.fallback.model_confidence,
            lexical_floor: config.fallback.lexical_floor,
            inference_timeout: config.service.inference_timeout(),
            max_tokens: config.service.max_tokens,
        }
    }
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            model_floor: 0.7,
            model_confidence: 0.9,
            lexical_floor: 0.7,
            inference_timeout: Duration::from_secs(8),
            max_tokens: 512,
        }
    }
}

pub struct FallbackChain {
    retrieval: Arc<RetrievalEngine>,
    inference: Arc<dyn InferenceClient>,
    lexical: Arc<LexicalMatcher>,
    breaker: SharedCircuitBreaker,
    metrics: Arc<PipelineMetrics>,
    settings: ChainSettings,
}

impl FallbackChain {
    pub fn new(
        retrieval: Arc<RetrievalEngine>,
        inference: Arc<dyn InferenceClient>,
        lexical: Arc<LexicalMatcher>,
        breaker: SharedCircuitBreaker,
        metrics: Arc<PipelineMetrics>,
        settings: ChainSettings,
    ) -> Self {
        Self {
            retrieval,
            inference,
            lexical,
            breaker,
            metrics,
            settings,
        }
    }

    /// Resolve a query to an answer. Never fails; the terminal strategy
    /// always produces a result. The accepting strategy writes the response
    /// and its mode into the request context.
    pub async fn resolve(
        &self,
        query: &str,
        language: Language,
        ctx: &mut RequestContext,
    ) -> FallbackOutcome {
        let started = Instant::now();

        // STEP 1: model-backed answer with retrieved context
        match self.try_model(query, language).await {
            Ok(text) => {
                if self.settings.model_confidence > self.settings.model_floor {
                    return self.accept(
                        ctx,
                        started,
                        StrategyKind::Model,
                        text,
                        ResponseMode::Online,
                        self.settings.model_confidence,
                    );
                }
                debug!(
                    confidence = self.settings.model_confidence,
                    floor = self.settings.model_floor,
                    "model answer below acceptance floor"
                );
            }
            Err(e) if e.is_circuit_open() => {
                debug!("inference circuit open, model strategy skipped");
            }
            Err(e) => {
                debug!(error = %e, "model strategy failed");
            }
        }

        // STEP 2: lexical keyword match
        match self.lexical.search(query, language).await {
            Ok(Some(found)) if found.score >= self.settings.lexical_floor => {
                let score = found.score;
                return self.accept(
                    ctx,
                    started,
                    StrategyKind::Lexical,
                    found.entry.answer,
                    ResponseMode::Offline,
                    score,
                );
            }
            Ok(Some(found)) => {
                debug!(
                    score = found.score,
                    floor = self.settings.lexical_floor,
                    "lexical match below acceptance floor"
                );
            }
            Ok(None) => {
                debug!("no lexical candidates for language");
            }
            Err(e) => {
                warn!(error = %e, "lexical strategy failed");
            }
        }

        // STEP 3: canned default, cannot fail
        self.accept(
            ctx,
            started,
            StrategyKind::Default,
            messages::default_response(language).to_string(),
            ResponseMode::Offline,
            0.0,
        )
    }

    /// Retrieval plus one guarded inference call. Retrieval failures fail
    /// the attempt without touching the breaker; the breaker guards the
    /// inference dependency alone.
    async fn try_model(&self, query: &str, language: Language) -> Result<String, MitraError> {
        let entries = self.retrieval.retrieve(query, language).await?;
        debug!(context_entries = entries.len(), "retrieval complete");

        {
            let mut breaker = self.breaker.lock().await;
            let before = breaker.state();
            let allowed = breaker.check();
            self.note_transition(before, breaker.state());
            allowed?;
        }

        let prompt = build_prompt(query, language, &entries);
        let outcome = tokio::time::timeout(
            self.settings.inference_timeout,
            self.inference.complete(&prompt, self.settings.max_tokens),
        )
        .await;

        let mut breaker = self.breaker.lock().await;
        let before = breaker.state();
        let result = match outcome {
            Ok(Ok(text)) => {
                breaker.record_success();
                Ok(text)
            }
            Ok(Err(e)) => {
                breaker.record_failure();
                Err(e)
            }
            Err(_) => {
                breaker.record_failure();
                Err(MitraError::Inference(format!(
                    "timed out after {}ms",
                    self.settings.inference_timeout.as_millis()
                )))
            }
        };
        self.note_transition(before, breaker.state());
        result
    }

    fn note_transition(&self, before: CircuitState, after: CircuitState) {
        if before != after {
            info!(from = ?before, to = ?after, "inference circuit transition");
            self.metrics.record_breaker_transition(after);
        }
    }

    fn accept(
        &self,
        ctx: &mut RequestContext,
        started: Instant,
        strategy: StrategyKind,
        text: String,
        mode: ResponseMode,
        confidence: f32,
    ) -> FallbackOutcome {
        ctx.set_response(text.clone(), mode);
        self.metrics.record_strategy(strategy.as_str(), mode.as_str());
        info!(
            request_id = %ctx.request_id,
            strategy = strategy.as_str(),
            mode = mode.as_str(),
            confidence,
            "answer accepted"
        );
        FallbackOutcome {
            text,
            mode,
            confidence,
            elapsed: started.elapsed(),
            strategy,
        }
    }
}

/// Prompt assembled from the query and retrieved context entries.
pub fn build_prompt(query: &str, language: Language, entries: &[ScoredEntry]) -> String {
    let mut prompt = String::from(
        "You are Mitra, a helpline assistant for Indian government farm schemes. \
         Answer briefly and factually.",
    );
    prompt.push_str(&format!(" Reply in {}.\n", language.name()));

    if !entries.is_empty() {
        prompt.push_str("\nRelevant knowledge:\n");
        for scored in entries {
            prompt.push_str(&format!(
                "Q: {}\nA: {}\n\n",
                scored.entry.question, scored.entry.answer
            ));
        }
    }

    prompt.push_str(&format!("\nFarmer's question: {}\nAnswer:", query));
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::CircuitBreaker;
    use crate::embedding::FakeEmbedder;
    use crate::inference::FakeInference;
    use crate::store::FakeKnowledgeStore;
    use mitra_common::{InboundRequest, KnowledgeEntry};

    fn entry(id: &str, question: &str, answer: &str, embedding: Vec<f32>) -> KnowledgeEntry {
        KnowledgeEntry {
            id: id.to_string(),
            question: question.to_string(),
            answer: answer.to_string(),
            category: "payment".to_string(),
            language: Language::En,
            keywords: vec![],
            embedding,
        }
    }

    fn pm_kisan_entries() -> Vec<KnowledgeEntry> {
        vec![
            entry(
                "pmk-elig",
                "Who is eligible for PM-KISAN",
                "All landholding farmer families with cultivable land are eligible.",
                vec![0.9, 0.44],
            ),
            entry(
                "pmk-pay",
                "When is the PM-KISAN installment paid",
                "Installments of 2000 rupees are released every four months.",
                vec![0.81, 0.59],
            ),
        ]
    }

    fn chain_with(
        inference: Arc<dyn InferenceClient>,
        breaker: CircuitBreaker,
        entries: Vec<KnowledgeEntry>,
    ) -> FallbackChain {
        let store = Arc::new(FakeKnowledgeStore::with_entries(entries));
        let embedder = Arc::new(FakeEmbedder::with_default(vec![1.0, 0.0]));
        FallbackChain::new(
            Arc::new(RetrievalEngine::new(store.clone(), embedder, 5, 0.7)),
            inference,
            Arc::new(LexicalMatcher::new(store)),
            breaker.shared(),
            Arc::new(PipelineMetrics::new()),
            ChainSettings {
                inference_timeout: Duration::from_millis(200),
                ..ChainSettings::default()
            },
        )
    }

    fn ctx() -> RequestContext {
        RequestContext::new(InboundRequest::Text {
            user_id: "farmer-1".to_string(),
            body: "What is PM-KISAN eligibility".to_string(),
            language_hint: None,
        })
    }

    #[tokio::test]
    async fn test_healthy_model_answers_online() {
        let fake = Arc::new(FakeInference::always_ok(
            "Any farmer family holding cultivable land qualifies for PM-KISAN.",
        ));
        let chain = chain_with(fake.clone(), CircuitBreaker::default(), pm_kisan_entries());
        let mut context = ctx();

        let outcome = chain
            .resolve("What is PM-KISAN eligibility", Language::En, &mut context)
            .await;

        assert_eq!(outcome.mode, ResponseMode::Online);
        assert_eq!(outcome.strategy, StrategyKind::Model);
        assert!(outcome.confidence > 0.7);
        assert_eq!(context.response_mode, Some(ResponseMode::Online));

        // Both entries above the similarity floor went into the prompt
        let prompt = &fake.prompts()[0];
        assert!(prompt.contains("Who is eligible for PM-KISAN"));
        assert!(prompt.contains("When is the PM-KISAN installment paid"));
    }

    #[tokio::test]
    async fn test_inference_failure_demotes_to_lexical() {
        let chain = chain_with(
            Arc::new(FakeInference::all_failing("connection refused")),
            CircuitBreaker::default(),
            pm_kisan_entries(),
        );
        let mut context = ctx();

        let outcome = chain
            .resolve("eligible PM-KISAN", Language::En, &mut context)
            .await;

        assert_eq!(outcome.mode, ResponseMode::Offline);
        assert_eq!(outcome.strategy, StrategyKind::Lexical);
        assert!(outcome.text.contains("landholding farmer families"));
    }

    #[tokio::test]
    async fn test_open_circuit_skips_inference_entirely() {
        let mut breaker = CircuitBreaker::default();
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        let fake = Arc::new(FakeInference::always_ok("should never be called"));
        let chain = chain_with(fake.clone(), breaker, pm_kisan_entries());
        let mut context = ctx();

        let outcome = chain
            .resolve("eligible PM-KISAN", Language::En, &mut context)
            .await;

        assert_eq!(fake.call_count(), 0);
        assert_eq!(outcome.mode, ResponseMode::Offline);
    }

    #[tokio::test]
    async fn test_no_match_anywhere_lands_on_default() {
        let chain = chain_with(
            Arc::new(FakeInference::all_failing("down")),
            CircuitBreaker::default(),
            vec![],
        );
        let mut context = ctx();

        let outcome = chain
            .resolve("something entirely unrelated", Language::Hi, &mut context)
            .await;

        assert_eq!(outcome.strategy, StrategyKind::Default);
        assert_eq!(outcome.mode, ResponseMode::Offline);
        assert_eq!(outcome.confidence, 0.0);
        assert_eq!(outcome.text, messages::default_response(Language::Hi));
    }

    #[tokio::test]
    async fn test_slow_inference_times_out_and_demotes() {
        let fake = Arc::new(
            FakeInference::always_ok("too late").with_delay(Duration::from_millis(500)),
        );
        let chain = chain_with(fake, CircuitBreaker::default(), pm_kisan_entries());
        let mut context = ctx();

        let outcome = chain
            .resolve("eligible PM-KISAN", Language::En, &mut context)
            .await;

        assert_eq!(outcome.mode, ResponseMode::Offline);
        assert_ne!(outcome.text, "too late");
    }

    #[tokio::test]
    async fn test_repeated_failures_open_the_breaker() {
        let chain = chain_with(
            Arc::new(FakeInference::all_failing("500 internal")),
            CircuitBreaker::default(),
            pm_kisan_entries(),
        );

        let mut context = ctx();
        chain.resolve("q one", Language::En, &mut context).await;
        let mut context = ctx();
        chain.resolve("q two", Language::En, &mut context).await;

        assert_eq!(chain.breaker.lock().await.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_retrieval_failure_does_not_count_against_breaker() {
        let store = Arc::new(FakeKnowledgeStore::with_entries(pm_kisan_entries()));
        let chain = FallbackChain::new(
            Arc::new(RetrievalEngine::new(
                store.clone(),
                Arc::new(FakeEmbedder::all_failing("embed service down")),
                5,
                0.7,
            )),
            Arc::new(FakeInference::always_ok("unused")),
            Arc::new(LexicalMatcher::new(store)),
            CircuitBreaker::default().shared(),
            Arc::new(PipelineMetrics::new()),
            ChainSettings::default(),
        );

        let mut context = ctx();
        chain.resolve("eligible PM-KISAN", Language::En, &mut context).await;
        let mut context = ctx();
        chain.resolve("eligible PM-KISAN", Language::En, &mut context).await;

        assert_eq!(chain.breaker.lock().await.state(), CircuitState::Closed);
    }

    #[test]
    fn test_prompt_carries_query_context_and_language() {
        let scored: Vec<ScoredEntry> = pm_kisan_entries()
            .into_iter()
            .map(|entry| ScoredEntry {
                entry,
                similarity: 0.8,
            })
            .collect();

        let prompt = build_prompt("mera paisa kab aayega", Language::Hi, &scored);

        assert!(prompt.contains("Reply in Hindi."));
        assert!(prompt.contains("mera paisa kab aayega"));
        assert!(prompt.contains("Installments of 2000 rupees"));
    }

    #[test]
    fn test_prompt_without_context_omits_knowledge_block() {
        let prompt = build_prompt("hello", Language::En, &[]);
        assert!(!prompt.contains("Relevant knowledge"));
        assert!(prompt.contains("Farmer's question: hello"));
    }
}
