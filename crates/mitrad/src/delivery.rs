//! Reply delivery with bounded retry.
//!
//! Every send is wrapped in its own timeout and the whole delivery gets a
//! fixed number of attempts with a fixed pause between them. A timed-out
//! send counts as a failed attempt like any other error.

use async_trait::async_trait;
use mitra_common::{DeliveryPayload, MitraError};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::warn;

#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    async fn send(&self, user_id: &str, payload: &DeliveryPayload) -> Result<(), MitraError>;
}

/// How hard delivery tries before the request is declared lost.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub retry_delay: Duration,
    pub send_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_secs(5),
            send_timeout: Duration::from_secs(5),
        }
    }
}

/// Attempts delivery up to `policy.max_attempts` times. Returns the number
/// of the attempt that succeeded.
pub async fn deliver_with_retry(
    channel: &dyn DeliveryChannel,
    user_id: &str,
    payload: &DeliveryPayload,
    policy: &RetryPolicy,
) -> Result<usize, MitraError> {
    let mut last_error = "no attempts made".to_string();

    for attempt in 1..=policy.max_attempts {
        match tokio::time::timeout(policy.send_timeout, channel.send(user_id, payload)).await {
            Ok(Ok(())) => return Ok(attempt),
            Ok(Err(e)) => {
                warn!(attempt, of = policy.max_attempts, error = %e, "delivery attempt failed");
                last_error = e.to_string();
            }
            Err(_) => {
                warn!(
                    attempt,
                    of = policy.max_attempts,
                    timeout_ms = policy.send_timeout.as_millis() as u64,
                    "delivery attempt timed out"
                );
                last_error = format!(
                    "send timed out after {}ms",
                    policy.send_timeout.as_millis()
                );
            }
        }
        if attempt < policy.max_attempts {
            tokio::time::sleep(policy.retry_delay).await;
        }
    }

    Err(MitraError::DeliveryExhausted {
        attempts: policy.max_attempts,
        last_error,
    })
}

// ============================================================================
// HTTP channel (production)
// ============================================================================

#[derive(Debug, Serialize)]
struct DeliveryRequest<'a> {
    user_id: &'a str,
    #[serde(flatten)]
    payload: &'a DeliveryPayload,
}

pub struct HttpDeliveryChannel {
    http_client: reqwest::Client,
    url: String,
}

impl HttpDeliveryChannel {
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
impl DeliveryChannel for HttpDeliveryChannel {
    async fn send(&self, user_id: &str, payload: &DeliveryPayload) -> Result<(), MitraError> {
        let request = DeliveryRequest { user_id, payload };

        let response = self
            .http_client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| MitraError::Delivery(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(MitraError::Delivery(format!(
                "service returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Prints replies to stdout. Lets the CLI subcommands run the pipeline
/// without a messaging gateway behind them.
pub struct ConsoleDeliveryChannel;

#[async_trait]
impl DeliveryChannel for ConsoleDeliveryChannel {
    async fn send(&self, user_id: &str, payload: &DeliveryPayload) -> Result<(), MitraError> {
        match payload {
            DeliveryPayload::Text { body, language } => {
                println!("[{} -> {}] {}", language.code(), user_id, body);
            }
            DeliveryPayload::Voice {
                audio_ref,
                language,
            } => {
                println!("[{} -> {}] voice reply: {}", language.code(), user_id, audio_ref);
            }
        }
        Ok(())
    }
}

// ============================================================================
// Fake channel (testing)
// ============================================================================

#[derive(Debug, Clone)]
pub struct SentDelivery {
    pub user_id: String,
    pub payload: DeliveryPayload,
    pub at: Instant,
}

/// Scripted delivery channel that records every send with a timestamp.
pub struct FakeDeliveryChannel {
    script: Mutex<VecDeque<Result<(), String>>>,
    fallback: Result<(), String>,
    delay: Option<Duration>,
    sent: Arc<Mutex<Vec<SentDelivery>>>,
}

impl FakeDeliveryChannel {
    pub fn always_ok() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Ok(()),
            delay: None,
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn all_failing(message: &str) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Err(message.to_string()),
            delay: None,
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Replay the given outcomes in order, then succeed.
    pub fn sequence(outcomes: Vec<Result<(), &str>>) -> Self {
        Self {
            script: Mutex::new(
                outcomes
                    .into_iter()
                    .map(|o| o.map_err(str::to_string))
                    .collect(),
            ),
            fallback: Ok(()),
            delay: None,
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Sleep before answering, to exercise the per-send timeout.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn sent(&self) -> Vec<SentDelivery> {
        self.sent.lock().unwrap().clone()
    }

    pub fn payloads(&self) -> Vec<DeliveryPayload> {
        self.sent.lock().unwrap().iter().map(|s| s.payload.clone()).collect()
    }
}

#[async_trait]
impl DeliveryChannel for FakeDeliveryChannel {
    async fn send(&self, user_id: &str, payload: &DeliveryPayload) -> Result<(), MitraError> {
        self.sent.lock().unwrap().push(SentDelivery {
            user_id: user_id.to_string(),
            payload: payload.clone(),
            at: Instant::now(),
        });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        next.map_err(MitraError::Delivery)
    }
}
