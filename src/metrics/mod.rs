//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Guardian lookups and attestation latency
//! - Transfer and auction state transitions
//! - Transaction submission
//! - Event bus delivery

use crate::error::{TrackerError, TrackerResult};

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram, Counter,
    CounterVec, Encoder, Gauge, Histogram, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Guardian metrics
    pub static ref GUARDIAN_REQUESTS: CounterVec = register_counter_vec!(
        "xchain_guardian_requests_total",
        "Guardian endpoint lookups by outcome",
        &["outcome"]
    ).unwrap();

    pub static ref GUARDIAN_EXHAUSTED: Counter = register_counter!(
        "xchain_guardian_exhausted_total",
        "Attestation fetches that ran out of rounds"
    ).unwrap();

    pub static ref ATTESTATION_LATENCY: Histogram = register_histogram!(
        "xchain_attestation_latency_seconds",
        "Time from first guardian request to a usable attestation",
        vec![1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 900.0]
    ).unwrap();

    // Transaction metrics
    pub static ref TX_SUBMITTED: CounterVec = register_counter_vec!(
        "xchain_transactions_submitted_total",
        "Total transactions submitted",
        &["chain"]
    ).unwrap();

    // Transfer metrics
    pub static ref TRANSFER_STATES: CounterVec = register_counter_vec!(
        "xchain_transfer_transitions_total",
        "Transfer state transitions by target state",
        &["state"]
    ).unwrap();

    pub static ref ACTIVE_TRANSFERS: Gauge = register_gauge!(
        "xchain_active_transfers",
        "Transfers not yet completed or failed"
    ).unwrap();

    // Auction metrics
    pub static ref AUCTION_STATES: CounterVec = register_counter_vec!(
        "xchain_auction_transitions_total",
        "Auction state transitions by target state",
        &["state"]
    ).unwrap();

    pub static ref STATUS_QUERY_ERRORS: Counter = register_counter!(
        "xchain_status_query_errors_total",
        "Failed order status queries"
    ).unwrap();

    pub static ref REFUNDS_NEEDED: Counter = register_counter!(
        "xchain_refunds_needed_total",
        "Orders that timed out and need a refund"
    ).unwrap();

    pub static ref ACTIVE_AUCTIONS: Gauge = register_gauge!(
        "xchain_active_auctions",
        "Auctions currently being polled"
    ).unwrap();

    // Event bus metrics
    pub static ref EVENTS_PUBLISHED: CounterVec = register_counter_vec!(
        "xchain_events_published_total",
        "Events published by topic",
        &["topic"]
    ).unwrap();

    pub static ref HANDLER_FAILURES: CounterVec = register_counter_vec!(
        "xchain_event_handler_failures_total",
        "Subscriber handlers that failed or panicked",
        &["topic"]
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

    pub async fn run(&self) -> TrackerResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| TrackerError::Internal(format!("metrics bind {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| TrackerError::Internal(format!("metrics server: {}", e)))
    }
}

async fn metrics_handler() -> Result<String, StatusCode> {
    render().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// Render every registered metric in the text exposition format
pub fn render() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

// Helper functions to record metrics

pub fn record_guardian_request(outcome: &str) {
    GUARDIAN_REQUESTS.with_label_values(&[outcome]).inc();
}

pub fn record_guardian_exhausted() {
    GUARDIAN_EXHAUSTED.inc();
}

pub fn record_attestation_latency(latency_secs: f64) {
    ATTESTATION_LATENCY.observe(latency_secs);
}

pub fn record_tx_submitted(chain: u16) {
    TX_SUBMITTED
        .with_label_values(&[&chain.to_string()])
        .inc();
}

pub fn record_transfer_state(state: &str) {
    TRANSFER_STATES.with_label_values(&[state]).inc();
}

pub fn set_active_transfers(count: usize) {
    ACTIVE_TRANSFERS.set(count as f64);
}

pub fn record_auction_state(state: &str) {
    AUCTION_STATES.with_label_values(&[state]).inc();
}

pub fn record_status_query_error() {
    STATUS_QUERY_ERRORS.inc();
}

pub fn record_refund_needed() {
    REFUNDS_NEEDED.inc();
}

pub fn set_active_auctions(count: usize) {
    ACTIVE_AUCTIONS.set(count as f64);
}

pub fn record_event_published(topic: &str) {
    EVENTS_PUBLISHED.with_label_values(&[topic]).inc();
}

pub fn record_handler_failure(topic: &str) {
    HANDLER_FAILURES.with_label_values(&[topic]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_recorded_series() {
        record_guardian_request("ok");
        record_tx_submitted(2);
        record_event_published("refund_needed");

        let text = render().unwrap();
        assert!(text.contains("xchain_guardian_requests_total"));
        assert!(text.contains("xchain_transactions_submitted_total{chain=\"2\"}"));
        assert!(text.contains("topic=\"refund_needed\""));
    }
}
