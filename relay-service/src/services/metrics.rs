//! Prometheus metrics for relay-service.

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::OnceLock;

// Global registry
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

// Relay metrics
pub static RELAY_OUTCOMES_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static RELAY_INCREMENTS_TOTAL: OnceLock<IntCounter> = OnceLock::new();
pub static RELAY_DURATION_SECONDS: OnceLock<Histogram> = OnceLock::new();
pub static RELAY_ACTIVE_CONNECTIONS: OnceLock<IntGauge> = OnceLock::new();
pub static RELAY_CLEANUP_FAILURES_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Initialize all metrics. Must be called once at startup.
pub fn init_metrics() {
    let registry = Registry::new();

    let outcomes = IntCounterVec::new(
        Opts::new("relay_outcomes_total", "Relays by terminal outcome"),
        &["outcome"],
    )
    .expect("Failed to create relay_outcomes_total metric");

    let increments = IntCounter::new(
        "relay_increments_total",
        "Text increments forwarded to clients",
    )
    .expect("Failed to create relay_increments_total metric");

    // Upstream generations run for seconds to minutes
    let duration = Histogram::with_opts(
        HistogramOpts::new(
            "relay_duration_seconds",
            "Time from request receipt to terminal outcome",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
    )
    .expect("Failed to create relay_duration_seconds metric");

    let active = IntGauge::new(
        "relay_active_connections",
        "Connections between connect and close",
    )
    .expect("Failed to create relay_active_connections metric");

    let cleanup_failures = IntCounterVec::new(
        Opts::new(
            "relay_cleanup_failures_total",
            "Cleanup steps that failed and were skipped",
        ),
        &["step"],
    )
    .expect("Failed to create relay_cleanup_failures_total metric");

    registry
        .register(Box::new(outcomes.clone()))
        .expect("Failed to register relay_outcomes_total");
    registry
        .register(Box::new(increments.clone()))
        .expect("Failed to register relay_increments_total");
    registry
        .register(Box::new(duration.clone()))
        .expect("Failed to register relay_duration_seconds");
    registry
        .register(Box::new(active.clone()))
        .expect("Failed to register relay_active_connections");
    registry
        .register(Box::new(cleanup_failures.clone()))
        .expect("Failed to register relay_cleanup_failures_total");

    let _ = REGISTRY.set(registry);
    let _ = RELAY_OUTCOMES_TOTAL.set(outcomes);
    let _ = RELAY_INCREMENTS_TOTAL.set(increments);
    let _ = RELAY_DURATION_SECONDS.set(duration);
    let _ = RELAY_ACTIVE_CONNECTIONS.set(active);
    let _ = RELAY_CLEANUP_FAILURES_TOTAL.set(cleanup_failures);

    tracing::info!("Prometheus metrics initialized");
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();

    let registry = match REGISTRY.get() {
        Some(r) => r,
        None => {
            tracing::error!("Metrics registry not initialized");
            return "# Metrics registry not initialized\n".to_string();
        }
    };

    if let Err(e) = encoder.encode(&registry.gather(), &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return format!("# Failed to encode metrics: {}\n", e);
    }

    match String::from_utf8(buffer) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Failed to convert metrics to UTF-8");
            format!("# Failed to convert metrics to UTF-8: {}\n", e)
        }
    }
}

/// Record a relay that reached a terminal outcome.
pub fn record_relay(outcome: &str, duration_secs: f64) {
    if let Some(counter) = RELAY_OUTCOMES_TOTAL.get() {
        counter.with_label_values(&[outcome]).inc();
    }
    if let Some(histogram) = RELAY_DURATION_SECONDS.get() {
        histogram.observe(duration_secs);
    }
}

pub fn record_increment() {
    if let Some(counter) = RELAY_INCREMENTS_TOTAL.get() {
        counter.inc();
    }
}

pub fn set_active_connections(count: i64) {
    if let Some(gauge) = RELAY_ACTIVE_CONNECTIONS.get() {
        gauge.set(count);
    }
}

/// Record a cleanup step (`transport_close`, `session_delete`, ...) that failed.
pub fn record_cleanup_failure(step: &str) {
    if let Some(counter) = RELAY_CLEANUP_FAILURES_TOTAL.get() {
        counter.with_label_values(&[step]).inc();
    }
}
