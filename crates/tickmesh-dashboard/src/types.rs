//! Dashboard API types.

use serde::Serialize;
use tickmesh_core::AggregatedTicker;
use tickmesh_feed::TickerEvent;
use tickmesh_ws::ExchangeStatus;

/// Full state snapshot (sent on initial connection).
#[derive(Debug, Clone, Serialize)]
pub struct DashboardSnapshot {
    /// Unix milliseconds.
    pub timestamp_ms: i64,
    /// Resolved tickers, sorted by symbol.
    pub tickers: Vec<AggregatedTicker>,
    pub exchanges: Vec<ExchangeStatus>,
}

/// Messages pushed to WebSocket clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum DashboardMessage {
    Snapshot(DashboardSnapshot),
    Event(TickerEvent),
}
