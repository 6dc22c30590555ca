//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Chain health
//! - Swap lifecycle (initiations, transitions, outcomes)
//! - Event intake and duplicate suppression
//! - Submissions, retries and fallbacks

use crate::chain::TxKind;
use crate::error::{RelayerError, RelayerResult};
use crate::escrow::ChainId;
use crate::swap::{FillRecommendation, SwapStatus};

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Chain metrics
    pub static ref CHAIN_HEALTHY: GaugeVec = register_gauge_vec!(
        "swap_relayer_chain_healthy",
        "Chain adapter health (1=healthy, 0=unreachable)",
        &["chain_id"]
    ).unwrap();

    pub static ref CHAIN_CHECKPOINT: GaugeVec = register_gauge_vec!(
        "swap_relayer_chain_checkpoint",
        "Last processed event sequence per chain",
        &["chain_id"]
    ).unwrap();

    // Swap metrics
    pub static ref SWAPS_INITIATED: CounterVec = register_counter_vec!(
        "swap_relayer_swaps_initiated_total",
        "Swaps accepted by the orchestrator",
        &["source_chain", "dest_chain"]
    ).unwrap();

    pub static ref STATUS_TRANSITIONS: CounterVec = register_counter_vec!(
        "swap_relayer_status_transitions_total",
        "Swap status transitions",
        &["from", "to"]
    ).unwrap();

    pub static ref SWAP_OUTCOMES: CounterVec = register_counter_vec!(
        "swap_relayer_swap_outcomes_total",
        "Swaps reaching a terminal status",
        &["status"]
    ).unwrap();

    pub static ref PARTIAL_FILLS: CounterVec = register_counter_vec!(
        "swap_relayer_fill_decisions_total",
        "Liquidity decisions by recommendation",
        &["recommendation"]
    ).unwrap();

    pub static ref MANUAL_INTERVENTIONS: CounterVec = register_counter_vec!(
        "swap_relayer_manual_interventions_total",
        "Swaps parked for an operator",
        &[]
    ).unwrap();

    // Event metrics
    pub static ref EVENTS_RECEIVED: CounterVec = register_counter_vec!(
        "swap_relayer_events_received_total",
        "Escrow events received by type",
        &["chain_id", "event_type"]
    ).unwrap();

    pub static ref EVENTS_DUPLICATE: CounterVec = register_counter_vec!(
        "swap_relayer_events_duplicate_total",
        "Escrow events dropped as duplicates",
        &["chain_id"]
    ).unwrap();

    // Submission metrics
    pub static ref SUBMISSIONS: CounterVec = register_counter_vec!(
        "swap_relayer_submissions_total",
        "Escrow transactions submitted",
        &["chain_id", "kind", "outcome"]
    ).unwrap();

    pub static ref SUBMISSION_LATENCY: HistogramVec = register_histogram_vec!(
        "swap_relayer_submission_latency_seconds",
        "Time from submission to receipt",
        &["chain_id", "kind"],
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    ).unwrap();

    pub static ref RETRIES_SCHEDULED: CounterVec = register_counter_vec!(
        "swap_relayer_retries_scheduled_total",
        "Re-attempts scheduled after transient failures",
        &["chain_id", "kind"]
    ).unwrap();

    pub static ref ROUTE_FALLBACKS: CounterVec = register_counter_vec!(
        "swap_relayer_route_fallbacks_total",
        "Route advisor calls replaced by the static venue map",
        &["reason"]
    ).unwrap();

    // Health metrics
    pub static ref HEALTH_CHECK_SUCCESS: CounterVec = register_counter_vec!(
        "swap_relayer_health_check_success_total",
        "Total successful health checks",
        &[]
    ).unwrap();

    pub static ref HEALTH_CHECK_FAILURE: CounterVec = register_counter_vec!(
        "swap_relayer_health_check_failure_total",
        "Total failed health checks",
        &[]
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> RelayerResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| RelayerError::Internal(format!("metrics bind {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| RelayerError::Internal(format!("metrics server: {}", e)))?;

        Ok(())
    }
}

async fn metrics_handler() -> Result<String, StatusCode> {
    gather().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// Text exposition of every registered metric
pub fn gather() -> RelayerResult<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| RelayerError::Internal(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| RelayerError::Internal(e.to_string()))
}

// Helper functions to record metrics

pub fn record_chain_health(chain_id: &ChainId, healthy: bool) {
    CHAIN_HEALTHY
        .with_label_values(&[chain_id.as_str()])
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_checkpoint(chain_id: &ChainId, sequence: u64) {
    CHAIN_CHECKPOINT
        .with_label_values(&[chain_id.as_str()])
        .set(sequence as f64);
}

pub fn record_swap_initiated(source: &ChainId, dest: &ChainId) {
    SWAPS_INITIATED
        .with_label_values(&[source.as_str(), dest.as_str()])
        .inc();
}

pub fn record_status_transition(from: SwapStatus, to: SwapStatus) {
    STATUS_TRANSITIONS
        .with_label_values(&[from.as_str(), to.as_str()])
        .inc();

    if to.is_terminal() {
        SWAP_OUTCOMES.with_label_values(&[to.as_str()]).inc();
    }
    if to.is_parked() {
        MANUAL_INTERVENTIONS.with_label_values(&[]).inc();
    }
}

pub fn record_fill_decision(recommendation: FillRecommendation) {
    let label = match recommendation {
        FillRecommendation::ExecuteFull => "execute_full",
        FillRecommendation::ExecutePartialNowQueueRemainder => "execute_partial",
        FillRecommendation::DeferFullFill => "defer",
    };
    PARTIAL_FILLS.with_label_values(&[label]).inc();
}

pub fn record_event(chain_id: &ChainId, event_type: &str) {
    EVENTS_RECEIVED
        .with_label_values(&[chain_id.as_str(), event_type])
        .inc();
}

pub fn record_duplicate_event(chain_id: &ChainId) {
    EVENTS_DUPLICATE
        .with_label_values(&[chain_id.as_str()])
        .inc();
}

pub fn record_submission(chain_id: &ChainId, kind: TxKind, outcome: &str, latency_secs: f64) {
    SUBMISSIONS
        .with_label_values(&[chain_id.as_str(), kind.as_str(), outcome])
        .inc();
    SUBMISSION_LATENCY
        .with_label_values(&[chain_id.as_str(), kind.as_str()])
        .observe(latency_secs);
}

pub fn record_retry(chain_id: &ChainId, kind: TxKind) {
    RETRIES_SCHEDULED
        .with_label_values(&[chain_id.as_str(), kind.as_str()])
        .inc();
}

pub fn record_route_fallback(reason: &str) {
    ROUTE_FALLBACKS.with_label_values(&[reason]).inc();
}

pub fn record_health_check() {
    HEALTH_CHECK_SUCCESS.with_label_values(&[]).inc();
}

pub fn record_health_check_failure() {
    HEALTH_CHECK_FAILURE.with_label_values(&[]).inc();
}
