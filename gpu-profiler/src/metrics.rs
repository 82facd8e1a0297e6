//! Prometheus metrics for the profiler engine

use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram, Counter,
    CounterVec, Encoder, Gauge, Histogram, TextEncoder,
};

// ── Session metrics ──────────────────────────────────────────────────────────

pub static SESSIONS_OPEN: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("regscope_sessions_open", "Profiler sessions currently open").unwrap()
});

pub static REQUESTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "regscope_requests_total",
        "Control-channel requests handled",
        &["request", "status"]
    )
    .unwrap()
});

// ── Reservation metrics ──────────────────────────────────────────────────────

pub static RESERVATION_CONFLICTS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "regscope_reservation_conflicts_total",
        "PM resource reservations refused because another session holds the resource",
        &["resource"]
    )
    .unwrap()
});

// ── Register op metrics ──────────────────────────────────────────────────────

pub static REG_OPS_EXECUTED: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "regscope_reg_ops_executed_total",
        "Register ops handed to the executor"
    )
    .unwrap()
});

pub static REG_OPS_FAILED: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "regscope_reg_ops_failed_total",
        "Register ops reported with a non-success status"
    )
    .unwrap()
});

pub static EXEC_WINDOWS: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "regscope_exec_windows_total",
        "Staging windows processed by EXEC_REG_OPS"
    )
    .unwrap()
});

pub static EXEC_DURATION: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "regscope_exec_duration_seconds",
        "EXEC_REG_OPS latency",
        vec![0.00001, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1]
    )
    .unwrap()
});

/// Render all registered metrics to Prometheus text format.
pub fn encode_metrics() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
