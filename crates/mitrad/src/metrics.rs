//! Prometheus metrics for the request pipeline.

use crate::breaker::CircuitState;
use mitra_common::Stage;
use prometheus::{
    register_counter_vec_with_registry, register_histogram_vec_with_registry,
    register_int_counter_with_registry, register_int_gauge_with_registry, CounterVec, Encoder,
    HistogramVec, IntCounter, IntGauge, Registry, TextEncoder,
};
use std::sync::Arc;
use std::time::Duration;

/// Pipeline metrics for Prometheus
#[derive(Clone)]
pub struct PipelineMetrics {
    pub requests_total: CounterVec,
    pub stage_seconds: HistogramVec,
    pub resolve_strategy_total: CounterVec,
    pub breaker_state: IntGauge,
    pub breaker_transitions_total: CounterVec,
    pub delivery_attempts_total: IntCounter,
    pub terminal_failures_total: CounterVec,

    registry: Arc<Registry>,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let requests_total = register_counter_vec_with_registry!(
            "mitra_requests_total",
            "Total requests handled, by input kind and terminal status",
            &["kind", "status"],
            registry
        )
        .unwrap();

        let stage_seconds = register_histogram_vec_with_registry!(
            "mitra_stage_seconds",
            "Wall time spent per orchestration stage",
            &["stage"],
            vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0],
            registry
        )
        .unwrap();

        let resolve_strategy_total = register_counter_vec_with_registry!(
            "mitra_resolve_strategy_total",
            "Accepted answers by resolving strategy and response mode",
            &["strategy", "mode"],
            registry
        )
        .unwrap();

        let breaker_state = register_int_gauge_with_registry!(
            "mitra_breaker_state",
            "Inference circuit state: 0=closed, 1=half_open, 2=open",
            registry
        )
        .unwrap();

        let breaker_transitions_total = register_counter_vec_with_registry!(
            "mitra_breaker_transitions_total",
            "Circuit state transitions by target state",
            &["to"],
            registry
        )
        .unwrap();

        let delivery_attempts_total = register_int_counter_with_registry!(
            "mitra_delivery_attempts_total",
            "Total delivery send attempts including retries",
            registry
        )
        .unwrap();

        let terminal_failures_total = register_counter_vec_with_registry!(
            "mitra_terminal_failures_total",
            "Requests that ended in terminal failure, by reason",
            &["reason"],
            registry
        )
        .unwrap();

        Self {
            requests_total,
            stage_seconds,
            resolve_strategy_total,
            breaker_state,
            breaker_transitions_total,
            delivery_attempts_total,
            terminal_failures_total,
            registry: Arc::new(registry),
        }
    }

    /// Record a finished request
    pub fn record_request(&self, kind: &str, status: &str) {
        self.requests_total.with_label_values(&[kind, status]).inc();
    }

    /// Record wall time for one stage
    pub fn observe_stage(&self, stage: Stage, elapsed: Duration) {
        self.stage_seconds
            .with_label_values(&[stage.as_str()])
            .observe(elapsed.as_secs_f64());
    }

    /// Record which strategy produced the accepted answer
    pub fn record_strategy(&self, strategy: &str, mode: &str) {
        self.resolve_strategy_total
            .with_label_values(&[strategy, mode])
            .inc();
    }

    /// Reflect the current circuit state on the gauge
    pub fn set_breaker_state(&self, state: CircuitState) {
        let value = match state {
            CircuitState::Closed => 0,
            CircuitState::HalfOpen => 1,
            CircuitState::Open => 2,
        };
        self.breaker_state.set(value);
    }

    /// Record a circuit state transition
    pub fn record_breaker_transition(&self, to: CircuitState) {
        let label = match to {
            CircuitState::Closed => "closed",
            CircuitState::HalfOpen => "half_open",
            CircuitState::Open => "open",
        };
        self.breaker_transitions_total
            .with_label_values(&[label])
            .inc();
        self.set_breaker_state(to);
    }

    /// Record delivery attempts, including the failed ones
    pub fn record_delivery_attempts(&self, attempts: usize) {
        self.delivery_attempts_total.inc_by(attempts as u64);
    }

    /// Record a terminal failure
    pub fn record_terminal_failure(&self, reason: &str) {
        self.terminal_failures_total
            .with_label_values(&[reason])
            .inc();
    }

    /// Export metrics in Prometheus text format
    pub fn export(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap_or_default();
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}
