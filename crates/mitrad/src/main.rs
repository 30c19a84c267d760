//! Mitra Daemon - multilingual helpline assistant for farm scheme queries.
//!
//! Runs inbound questions through transcription, language resolution, the
//! answer fallback chain, and delivery. The subcommands drive one request
//! at a time; the surrounding platform feeds the same pipeline in bulk.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mitra_common::{InboundRequest, KnowledgeCorpus, Language, RequestStatus};
use mitrad::breaker::CircuitBreaker;
use mitrad::config::{Config, CONFIG_PATH, LOCAL_CONFIG_PATH};
use mitrad::delivery::{ConsoleDeliveryChannel, DeliveryChannel, HttpDeliveryChannel};
use mitrad::detect::ScriptLanguageDetector;
use mitrad::embedding::{CachedEmbedder, EmbeddingCache, OllamaEmbedder};
use mitrad::fallback::{ChainSettings, FallbackChain};
use mitrad::inference::{InferenceClient, OllamaInference};
use mitrad::lexical::LexicalMatcher;
use mitrad::metrics::PipelineMetrics;
use mitrad::orchestrator::{Orchestrator, OrchestratorSettings};
use mitrad::retrieval::RetrievalEngine;
use mitrad::speech::{HttpSynthesizer, HttpTranscriber, RetryingTranscriber};
use mitrad::store::{FileKnowledgeStore, FilePreferenceStore};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn, Level};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "mitrad")]
#[command(about = "Mitra - multilingual helpline assistant for farm scheme queries", long_about = None)]
#[command(version = VERSION)]
struct Cli {
    /// Config file path (default: /etc/mitra/config.toml, then ./mitra.toml)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a text question through the full pipeline
    Ask {
        /// The question to answer
        question: String,

        /// User id the request is attributed to
        #[arg(long, default_value = "local")]
        user: String,

        /// Language hint: en, hi, te or ta
        #[arg(long)]
        language: Option<String>,

        /// Send the reply through the delivery gateway instead of printing it
        #[arg(long)]
        deliver: bool,
    },

    /// Run a voice request through the full pipeline
    Voice {
        /// Audio reference understood by the transcription service
        audio_ref: String,

        /// User id the request is attributed to
        #[arg(long, default_value = "local")]
        user: String,

        /// Language hint: en, hi, te or ta
        #[arg(long)]
        language: Option<String>,

        /// Send the reply through the delivery gateway instead of printing it
        #[arg(long)]
        deliver: bool,
    },

    /// Check configuration, corpus, and service reachability
    Doctor,

    /// Write a default config file
    InitConfig {
        /// Destination path
        #[arg(long, default_value = CONFIG_PATH)]
        path: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    let cli = Cli::parse();
    info!("Mitra Daemon v{} starting", VERSION);

    let config = match &cli.config {
        Some(path) => Config::load_from_path(path)
            .with_context(|| format!("loading config from {}", path))?,
        None => Config::load(),
    };
    let config_source = describe_config_source(cli.config.as_deref());

    match cli.command {
        Commands::Ask {
            question,
            user,
            language,
            deliver,
        } => {
            let request = InboundRequest::Text {
                user_id: user,
                body: question,
                language_hint: parse_language(language.as_deref())?,
            };
            run_request(&config, request, deliver).await
        }
        Commands::Voice {
            audio_ref,
            user,
            language,
            deliver,
        } => {
            let request = InboundRequest::Voice {
                user_id: user,
                audio_ref,
                language_hint: parse_language(language.as_deref())?,
            };
            run_request(&config, request, deliver).await
        }
        Commands::Doctor => doctor(&config, &config_source).await,
        Commands::InitConfig { path } => {
            Config::save_default(&path)
                .with_context(|| format!("writing default config to {}", path))?;
            println!("Wrote default config to {}", path);
            Ok(())
        }
    }
}

/// Drive one request to a terminal status and exit nonzero if it failed.
async fn run_request(config: &Config, request: InboundRequest, deliver: bool) -> Result<()> {
    let delivery: Arc<dyn DeliveryChannel> = if deliver {
        Arc::new(HttpDeliveryChannel::new(
            &config.service.delivery_url,
            config.delivery.send_timeout(),
        ))
    } else {
        Arc::new(ConsoleDeliveryChannel)
    };

    let orchestrator = build_orchestrator(config, delivery);
    let ctx = orchestrator.handle(request).await;

    match ctx.status {
        Some(RequestStatus::Delivered) => Ok(()),
        _ => anyhow::bail!("request {} did not complete", ctx.request_id),
    }
}

/// Wire every production component from config.
fn build_orchestrator(config: &Config, delivery: Arc<dyn DeliveryChannel>) -> Orchestrator {
    let store = load_knowledge(config);
    let preferences = load_preferences(config);

    let embedder = OllamaEmbedder::new(
        &config.service.ollama_url,
        &config.service.embedding_model,
        config.service.embed_timeout(),
    );
    let cache = EmbeddingCache::new(config.retrieval.cache_capacity, config.retrieval.cache_ttl());
    let cached = CachedEmbedder::new(Arc::new(embedder), cache);

    let retrieval = RetrievalEngine::new(
        store.clone(),
        Arc::new(cached),
        config.retrieval.top_k,
        config.retrieval.min_similarity,
    );
    let inference = OllamaInference::new(
        &config.service.ollama_url,
        &config.service.inference_model,
        config.service.inference_timeout(),
    );
    let lexical = LexicalMatcher::new(store);
    let breaker = CircuitBreaker::new(
        config.breaker.window(),
        config.breaker.failure_rate_threshold,
        config.breaker.min_calls,
        config.breaker.reset_interval(),
    )
    .shared();
    let metrics = Arc::new(PipelineMetrics::new());

    let chain = FallbackChain::new(
        Arc::new(retrieval),
        Arc::new(inference),
        Arc::new(lexical),
        breaker,
        metrics.clone(),
        ChainSettings::from_config(config),
    );

    let transcriber = RetryingTranscriber::new(Arc::new(HttpTranscriber::new(
        &config.service.transcribe_url,
        config.orchestrator.transcribe_timeout(),
    )));
    let synthesizer = HttpSynthesizer::new(
        &config.service.synthesize_url,
        config.orchestrator.synthesize_timeout(),
    );

    Orchestrator::new(
        Arc::new(transcriber),
        Arc::new(ScriptLanguageDetector::new()),
        preferences,
        chain,
        Arc::new(synthesizer),
        delivery,
        metrics,
        OrchestratorSettings::from_config(config),
    )
}

/// Load the corpus, or continue with an empty one so the default strategy
/// still answers.
fn load_knowledge(config: &Config) -> Arc<FileKnowledgeStore> {
    let path = Path::new(&config.knowledge.corpus_path);
    let store = FileKnowledgeStore::load(path).unwrap_or_else(|e| {
        warn!("Knowledge corpus unavailable ({}), starting with an empty corpus", e);
        FileKnowledgeStore::from_corpus(KnowledgeCorpus::default())
    });
    Arc::new(store)
}

fn load_preferences(config: &Config) -> Arc<FilePreferenceStore> {
    let path = Path::new(&config.knowledge.preferences_path);
    let store = FilePreferenceStore::load(path).unwrap_or_else(|e| {
        warn!("Preference store unavailable ({}), continuing without stored preferences", e);
        FilePreferenceStore::from_map(HashMap::new())
    });
    Arc::new(store)
}

async fn doctor(config: &Config, config_source: &str) -> Result<()> {
    println!("Mitra doctor");
    println!();
    println!("  config:       {}", config_source);

    let store = load_knowledge(config);
    let per_language = Language::all()
        .iter()
        .map(|l| format!("{} {}", l.code(), store.count_for(*l)))
        .collect::<Vec<_>>()
        .join(", ");
    println!("  corpus:       {} entries ({})", store.total(), per_language);

    let preferences = load_preferences(config);
    println!("  preferences:  {} users", preferences.len());

    let inference = OllamaInference::new(
        &config.service.ollama_url,
        &config.service.inference_model,
        config.service.inference_timeout(),
    );
    let reachable = inference.is_available().await;
    println!(
        "  inference:    {} at {} ({})",
        if reachable { "reachable" } else { "UNREACHABLE" },
        config.service.ollama_url,
        config.service.inference_model
    );
    println!("  embeddings:   {}", config.service.embedding_model);
    println!(
        "  retrieval:    top {} entries at >= {:.2} similarity, cache {} slots / {}s ttl",
        config.retrieval.top_k,
        config.retrieval.min_similarity,
        config.retrieval.cache_capacity,
        config.retrieval.cache_ttl_secs
    );
    println!(
        "  breaker:      opens at {:.0}% failures over {}s, probes after {}s",
        config.breaker.failure_rate_threshold * 100.0,
        config.breaker.window_secs,
        config.breaker.reset_interval_secs
    );

    if !reachable {
        println!();
        println!("  Model answers are offline; lexical and default replies still work.");
    }
    Ok(())
}

fn parse_language(code: Option<&str>) -> Result<Option<Language>> {
    match code {
        None => Ok(None),
        Some(code) => Language::from_code(code).map(Some).ok_or_else(|| {
            anyhow::anyhow!("unknown language code '{}', expected en, hi, te or ta", code)
        }),
    }
}

fn describe_config_source(override_path: Option<&str>) -> String {
    if let Some(path) = override_path {
        return path.to_string();
    }
    if Path::new(CONFIG_PATH).exists() {
        CONFIG_PATH.to_string()
    } else if Path::new(LOCAL_CONFIG_PATH).exists() {
        LOCAL_CONFIG_PATH.to_string()
    } else {
        "built-in defaults".to_string()
    }
}
