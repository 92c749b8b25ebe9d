//! Read side shared by every handler.

use std::sync::Arc;

use tickmesh_core::AggregatedTicker;
use tickmesh_feed::{Aggregator, TickerEvent};
use tickmesh_ws::ExchangeStatus;
use tokio::sync::broadcast;

use crate::types::DashboardSnapshot;

/// Provides the per-exchange connection view.
pub trait StatusSource: Send + Sync + 'static {
    fn exchange_status(&self) -> Vec<ExchangeStatus>;
}

impl<F> StatusSource for F
where
    F: Fn() -> Vec<ExchangeStatus> + Send + Sync + 'static,
{
    fn exchange_status(&self) -> Vec<ExchangeStatus> {
        self()
    }
}

#[derive(Clone)]
pub struct DashboardState {
    aggregator: Arc<Aggregator>,
    status: Arc<dyn StatusSource>,
}

impl DashboardState {
    pub fn new(aggregator: Arc<Aggregator>, status: Arc<dyn StatusSource>) -> Self {
        Self { aggregator, status }
    }

    pub fn tickers(&self) -> Vec<AggregatedTicker> {
        self.aggregator.snapshot()
    }

    pub fn ticker(&self, symbol: &str) -> Option<AggregatedTicker> {
        self.aggregator.get_aggregated(symbol)
    }

    pub fn exchange_status(&self) -> Vec<ExchangeStatus> {
        self.status.exchange_status()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TickerEvent> {
        self.aggregator.subscribe()
    }

    pub fn collect_snapshot(&self) -> DashboardSnapshot {
        DashboardSnapshot {
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            tickers: self.tickers(),
            exchanges: self.exchange_status(),
        }
    }
}

impl std::fmt::Debug for DashboardState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DashboardState")
            .field("tickers", &self.aggregator.snapshot().len())
            .finish_non_exhaustive()
    }
}
