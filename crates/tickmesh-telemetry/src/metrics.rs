//! Prometheus metrics for tickmesh.
//!
//! # Panics
//!
//! Collector registration unwraps. A failure means a duplicate metric name,
//! which is a startup bug; it can only happen during lazy initialization.

use crate::error::{TelemetryError, TelemetryResult};
use once_cell::sync::Lazy;
use prometheus::{
    register_gauge_vec, register_histogram_vec, register_int_counter,
    register_int_counter_vec, register_int_gauge, Encoder, GaugeVec, HistogramVec, IntCounter,
    IntCounterVec, IntGauge, TextEncoder,
};
use tickmesh_core::Exchange;

const WS_STATES: [&str; 5] = [
    "disconnected",
    "connecting",
    "connected",
    "reconnecting",
    "failed",
];

/// Connection state machine, one-hot per connection.
pub static WS_STATE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "tickmesh_ws_state",
        "Connection state (1=active, 0=inactive)",
        &["exchange", "conn", "state"]
    )
    .unwrap()
});

pub static WS_RECONNECT_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "tickmesh_ws_reconnect_total",
        "Total reconnect cycles",
        &["exchange", "reason"]
    )
    .unwrap()
});

pub static CONNECT_DURATION_MS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "tickmesh_connect_duration_ms",
        "Successful connect duration in milliseconds",
        &["exchange"],
        vec![50.0, 100.0, 250.0, 500.0, 1000.0, 2000.0, 3000.0, 5000.0, 8000.0, 15000.0]
    )
    .unwrap()
});

pub static HEARTBEAT_TIMEOUT_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "tickmesh_heartbeat_timeout_total",
        "Heartbeat staleness episodes",
        &["exchange"]
    )
    .unwrap()
});

pub static TICKS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "tickmesh_ticks_total",
        "Normalized ticker updates received",
        &["exchange"]
    )
    .unwrap()
});

pub static PARSE_FAILURES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "tickmesh_parse_failures_total",
        "Ticker frames that failed to parse",
        &["exchange"]
    )
    .unwrap()
});

/// Exchange event time to local receipt.
pub static FEED_LATENCY_MS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "tickmesh_feed_latency_ms",
        "Exchange event time to local receipt in milliseconds",
        &["exchange"],
        vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 5000.0]
    )
    .unwrap()
});

pub static AGGREGATED_LIVE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "tickmesh_aggregated_live",
        "Aggregated ticker liveness (1=live, 0=degraded)",
        &["symbol"]
    )
    .unwrap()
});

pub static AGGREGATED_SOURCE_PRIORITY: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "tickmesh_aggregated_source_priority",
        "Priority of the exchange currently chosen for a symbol",
        &["symbol"]
    )
    .unwrap()
});

pub static CACHE_ENTRIES: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("tickmesh_cache_entries", "Entries in the last-good cache").unwrap()
});

pub static CACHE_EVICTIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "tickmesh_cache_evictions_total",
        "Cache entries evicted for age"
    )
    .unwrap()
});

/// Metrics facade.
pub struct Metrics;

impl Metrics {
    /// Set the active state of one connection; all other states go to 0.
    pub fn ws_state_set(exchange: Exchange, conn: usize, state: &str) {
        let conn = conn.to_string();
        for s in &WS_STATES {
            WS_STATE
                .with_label_values(&[exchange.as_str(), &conn, s])
                .set(if *s == state { 1.0 } else { 0.0 });
        }
    }

    pub fn ws_reconnect(exchange: Exchange, reason: &str) {
        WS_RECONNECT_TOTAL
            .with_label_values(&[exchange.as_str(), reason])
            .inc();
    }

    pub fn connect_duration(exchange: Exchange, duration_ms: f64) {
        CONNECT_DURATION_MS
            .with_label_values(&[exchange.as_str()])
            .observe(duration_ms);
    }

    pub fn heartbeat_timeout(exchange: Exchange) {
        HEARTBEAT_TIMEOUT_TOTAL
            .with_label_values(&[exchange.as_str()])
            .inc();
    }

    pub fn tick(exchange: Exchange) {
        TICKS_TOTAL.with_label_values(&[exchange.as_str()]).inc();
    }

    pub fn parse_failure(exchange: Exchange) {
        PARSE_FAILURES_TOTAL
            .with_label_values(&[exchange.as_str()])
            .inc();
    }

    pub fn feed_latency(exchange: Exchange, latency_ms: f64) {
        FEED_LATENCY_MS
            .with_label_values(&[exchange.as_str()])
            .observe(latency_ms);
    }

    pub fn aggregated(symbol: &str, is_live: bool, source_priority: u8) {
        AGGREGATED_LIVE
            .with_label_values(&[symbol])
            .set(if is_live { 1.0 } else { 0.0 });
        AGGREGATED_SOURCE_PRIORITY
            .with_label_values(&[symbol])
            .set(f64::from(source_priority));
    }

    /// Symbol has no value at all anymore.
    pub fn aggregated_cleared(symbol: &str) {
        let _ = AGGREGATED_LIVE.remove_label_values(&[symbol]);
        let _ = AGGREGATED_SOURCE_PRIORITY.remove_label_values(&[symbol]);
    }

    pub fn cache_entries(count: usize) {
        CACHE_ENTRIES.set(count as i64);
    }

    pub fn cache_evicted(count: usize) {
        CACHE_EVICTIONS_TOTAL.inc_by(count as u64);
    }

    /// Text exposition of the default registry.
    pub fn render() -> TelemetryResult<String> {
        let families = prometheus::gather();
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&families, &mut buffer)
            .map_err(|e| TelemetryError::Metrics(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| TelemetryError::Metrics(e.to_string()))
    }
}
