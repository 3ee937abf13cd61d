//! Prometheus Metrics Module
//!
//! Provides application-wide metrics collection using Prometheus.
//!
//! # Metrics Collected
//! - Active WebSocket connections and active rooms
//! - Messages broadcast and frames delivered
//! - Slow-client evictions, persistence failures, rejected inbound frames
//! - Database query duration histograms

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

const NAMESPACE: &str = "chat_hub";

/// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

/// Clients currently registered with the hub
pub static WEBSOCKET_CONNECTIONS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::with_opts(
        Opts::new(
            "websocket_connections_active",
            "Number of clients registered with the hub",
        )
        .namespace(NAMESPACE),
    )
    .expect("Failed to create WEBSOCKET_CONNECTIONS_ACTIVE metric")
});

/// Rooms with at least one member
pub static ROOMS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::with_opts(
        Opts::new("rooms_active", "Number of rooms with at least one member").namespace(NAMESPACE),
    )
    .expect("Failed to create ROOMS_ACTIVE metric")
});

/// Messages persisted and fanned out
pub static MESSAGES_BROADCAST_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::with_opts(
        Opts::new("messages_broadcast_total", "Messages persisted and broadcast")
            .namespace(NAMESPACE),
    )
    .expect("Failed to create MESSAGES_BROADCAST_TOTAL metric")
});

/// Frames pushed onto outbound queues
pub static FRAMES_DELIVERED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::with_opts(
        Opts::new("frames_delivered_total", "Frames enqueued to client outbound queues")
            .namespace(NAMESPACE),
    )
    .expect("Failed to create FRAMES_DELIVERED_TOTAL metric")
});

/// Clients dropped by the hub, by reason
pub static CLIENT_EVICTIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("client_evictions_total", "Clients evicted by the hub").namespace(NAMESPACE),
        &["reason"], // "queue_full", "queue_closed"
    )
    .expect("Failed to create CLIENT_EVICTIONS_TOTAL metric")
});

/// Inbound messages that could not be stored
pub static PERSISTENCE_FAILURES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::with_opts(
        Opts::new(
            "persistence_failures_total",
            "Inbound messages dropped because saving failed",
        )
        .namespace(NAMESPACE),
    )
    .expect("Failed to create PERSISTENCE_FAILURES_TOTAL metric")
});

/// Inbound frames rejected by the codec
pub static DECODE_FAILURES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::with_opts(
        Opts::new("decode_failures_total", "Malformed inbound frames").namespace(NAMESPACE),
    )
    .expect("Failed to create DECODE_FAILURES_TOTAL metric")
});

/// Database query duration histogram
pub static DB_QUERY_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    let buckets = vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5];
    HistogramVec::new(
        HistogramOpts::new(
            "db_query_duration_seconds",
            "Database query latency in seconds",
        )
        .namespace(NAMESPACE)
        .buckets(buckets),
        &["operation", "table"],
    )
    .expect("Failed to create DB_QUERY_DURATION_SECONDS metric")
});

/// Register all metrics with the registry
fn register_metrics(registry: &Registry) {
    registry
        .register(Box::new(WEBSOCKET_CONNECTIONS_ACTIVE.clone()))
        .expect("Failed to register WEBSOCKET_CONNECTIONS_ACTIVE");
    registry
        .register(Box::new(ROOMS_ACTIVE.clone()))
        .expect("Failed to register ROOMS_ACTIVE");
    registry
        .register(Box::new(MESSAGES_BROADCAST_TOTAL.clone()))
        .expect("Failed to register MESSAGES_BROADCAST_TOTAL");
    registry
        .register(Box::new(FRAMES_DELIVERED_TOTAL.clone()))
        .expect("Failed to register FRAMES_DELIVERED_TOTAL");
    registry
        .register(Box::new(CLIENT_EVICTIONS_TOTAL.clone()))
        .expect("Failed to register CLIENT_EVICTIONS_TOTAL");
    registry
        .register(Box::new(PERSISTENCE_FAILURES_TOTAL.clone()))
        .expect("Failed to register PERSISTENCE_FAILURES_TOTAL");
    registry
        .register(Box::new(DECODE_FAILURES_TOTAL.clone()))
        .expect("Failed to register DECODE_FAILURES_TOTAL");
    registry
        .register(Box::new(DB_QUERY_DURATION_SECONDS.clone()))
        .expect("Failed to register DB_QUERY_DURATION_SECONDS");
}

/// Collect and encode all metrics as Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Helper to record database query metrics
pub fn record_db_query(operation: &str, table: &str, duration_secs: f64) {
    DB_QUERY_DURATION_SECONDS
        .with_label_values(&[operation, table])
        .observe(duration_secs);
}

/// Publish the hub's membership counts
pub fn set_membership(clients: usize, rooms: usize) {
    WEBSOCKET_CONNECTIONS_ACTIVE.set(clients as i64);
    ROOMS_ACTIVE.set(rooms as i64);
}

/// Count one eviction
pub fn record_eviction(reason: &str) {
    CLIENT_EVICTIONS_TOTAL.with_label_values(&[reason]).inc();
}
