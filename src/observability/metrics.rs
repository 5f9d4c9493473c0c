//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define pipeline metrics (sessions, stage attempts, breaker state)
//! - Expose a Prometheus-compatible metrics endpoint
//! - Track per-dependency and aggregate health
//!
//! # Metrics
//! - `clipscribe_pipeline_requests_total` (counter): sessions by outcome
//! - `clipscribe_pipeline_duration_seconds` (histogram): end-to-end latency
//! - `clipscribe_stage_attempts_total` (counter): attempts by stage, provider, outcome
//! - `clipscribe_stage_attempt_duration_seconds` (histogram): per-attempt latency
//! - `clipscribe_dependency_calls_total` (counter): terminal client outcomes
//! - `clipscribe_dependency_call_duration_seconds` (histogram): client call latency
//! - `clipscribe_breaker_transitions_total` (counter): circuit transitions
//! - `clipscribe_sessions_active` / `clipscribe_sessions_queued` (gauges)
//! - `clipscribe_admission_rejected_total` (counter): by reason
//! - `clipscribe_callbacks_pending` (gauge): parked webhook waiters
//!
//! # Design Decisions
//! - Low-overhead metric updates (atomic operations)
//! - Labels stay low-cardinality: stage, provider, outcome, state

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::providers::StageName;
use crate::resilience::breaker::CircuitState;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(address: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(address).install() {
        Ok(()) => tracing::info!(%address, "Metrics endpoint listening"),
        Err(err) => tracing::error!(%address, error = %err, "Failed to install metrics exporter"),
    }
}

/// One pipeline session finished, successfully or not.
pub fn record_pipeline_request(outcome: &str, started: Instant) {
    metrics::counter!(
        "clipscribe_pipeline_requests_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
    metrics::histogram!("clipscribe_pipeline_duration_seconds")
        .record(started.elapsed().as_secs_f64());
}

/// One provider attempt inside a fallback chain.
pub fn record_stage_attempt(stage: StageName, provider: &str, outcome: &str, duration_ms: u64) {
    metrics::counter!(
        "clipscribe_stage_attempts_total",
        "stage" => stage.to_string(),
        "provider" => provider.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
    metrics::histogram!(
        "clipscribe_stage_attempt_duration_seconds",
        "stage" => stage.to_string(),
        "provider" => provider.to_string()
    )
    .record(duration_ms as f64 / 1000.0);
}

/// Terminal outcome of one resilient client call (after retries).
pub fn record_dependency_call(dependency: &str, outcome: &str, started: Instant) {
    metrics::counter!(
        "clipscribe_dependency_calls_total",
        "dependency" => dependency.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
    metrics::histogram!(
        "clipscribe_dependency_call_duration_seconds",
        "dependency" => dependency.to_string()
    )
    .record(started.elapsed().as_secs_f64());
}

pub fn record_breaker_transition(dependency: &str, to_state: CircuitState) {
    metrics::counter!(
        "clipscribe_breaker_transitions_total",
        "dependency" => dependency.to_string(),
        "to" => to_state.as_str()
    )
    .increment(1);
}

pub fn record_admission(active: usize, queued: usize) {
    metrics::gauge!("clipscribe_sessions_active").set(active as f64);
    metrics::gauge!("clipscribe_sessions_queued").set(queued as f64);
}

pub fn record_admission_rejected(reason: &str) {
    metrics::counter!(
        "clipscribe_admission_rejected_total",
        "reason" => reason.to_string()
    )
    .increment(1);
}

pub fn record_pending_callbacks(count: usize) {
    metrics::gauge!("clipscribe_callbacks_pending").set(count as f64);
}
