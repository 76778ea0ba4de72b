//! Prometheus metrics for the gateway
//!
//! Metrics include:
//! - ingestion tick outcomes
//! - videos inserted
//! - key state transitions
//! - HTTP responses per route and status
//! - upstream call latency (histogram)

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, Encoder,
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec, TextEncoder,
};
use tracing::error;

// ============================================
// METRIC DEFINITIONS
// ============================================

pub const TRANSITION_EXHAUSTED: &str = "exhausted";
pub const TRANSITION_REVALIDATED: &str = "revalidated";
pub const TRANSITION_ADDED: &str = "added";

static INGESTION_TICKS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "gateway_ingestion_ticks_total",
        "Ingestion ticks by outcome",
        &["outcome"]
    )
    .expect("Failed to create ingestion_ticks metric")
});

static VIDEOS_INSERTED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "gateway_videos_inserted_total",
        "Videos inserted into the catalog"
    )
    .expect("Failed to create videos_inserted metric")
});

static KEY_TRANSITIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "gateway_key_transitions_total",
        "API key state transitions",
        &["transition"]
    )
    .expect("Failed to create key_transitions metric")
});

static HTTP_RESPONSES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "gateway_http_responses_total",
        "HTTP responses by route and status",
        &["route", "status"]
    )
    .expect("Failed to create http_responses metric")
});

static UPSTREAM_LATENCY: Lazy<HistogramVec> = Lazy::new(|| {
    let buckets = vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];
    register_histogram_vec!(
        HistogramOpts::new(
            "gateway_upstream_latency_seconds",
            "Latency of upstream API calls in seconds"
        )
        .buckets(buckets),
        &["call"]
    )
    .expect("Failed to create upstream_latency metric")
});

// ============================================
// RECORDING
// ============================================

pub fn record_tick(outcome: &str) {
    INGESTION_TICKS.with_label_values(&[outcome]).inc();
}

pub fn record_videos_inserted(count: u64) {
    VIDEOS_INSERTED.inc_by(count);
}

pub fn record_key_transition(transition: &str) {
    KEY_TRANSITIONS.with_label_values(&[transition]).inc();
}

pub fn record_http_response(route: &str, status: u16) {
    let status = status.to_string();
    HTTP_RESPONSES
        .with_label_values(&[route, status.as_str()])
        .inc();
}

pub fn record_upstream_latency(call: &str, latency_secs: f64) {
    UPSTREAM_LATENCY.with_label_values(&[call]).observe(latency_secs);
}

/// Collects all metrics as Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return String::new();
    }

    String::from_utf8(buffer).unwrap_or_default()
}
