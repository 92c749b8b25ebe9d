//! Normalized and resolved ticker values.

use crate::exchange::Exchange;
use serde::{Deserialize, Serialize};

/// A single normalized ticker observation from one exchange.
///
/// Produced by a protocol adapter; immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerUpdate {
    /// Canonical symbol (e.g., "BTC").
    pub symbol: String,
    /// Last traded price.
    pub price: f64,
    /// Percent change over the trailing 24h (e.g., 2.5 = +2.5%).
    pub change_24h_percent: f64,
    pub high_24h: f64,
    pub low_24h: f64,
    /// Base-asset volume over the trailing 24h.
    pub volume_24h: f64,
    /// Exchange that produced the update.
    pub source: Exchange,
    /// Local receipt time (ms since epoch). Drives freshness.
    pub observed_at: u64,
    /// Provider event time (ms since epoch), if the message carried one.
    #[serde(default)]
    pub exchange_ts: Option<u64>,
}

impl TickerUpdate {
    /// Age of the observation at `now_ms`.
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.observed_at)
    }

    /// Provider-to-receipt latency, when the provider supplied a timestamp.
    pub fn feed_latency_ms(&self) -> Option<i64> {
        self.exchange_ts
            .map(|ts| self.observed_at as i64 - ts as i64)
    }
}

/// The resolved, authoritative value for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedTicker {
    pub symbol: String,
    pub price: f64,
    pub change_24h_percent: f64,
    pub high_24h: f64,
    pub low_24h: f64,
    pub volume_24h: f64,
    /// Exchange the value was taken from.
    pub source: Exchange,
    /// True only if the contributing update is within the freshness window.
    pub is_live: bool,
    /// Age of the contributing update at resolution time.
    pub age_ms: u64,
    /// Receipt time of the contributing update.
    pub observed_at: u64,
}

impl AggregatedTicker {
    /// Build the resolved view of `update` as seen at `now_ms`.
    pub fn from_update(update: &TickerUpdate, is_live: bool, now_ms: u64) -> Self {
        Self {
            symbol: update.symbol.clone(),
            price: update.price,
            change_24h_percent: update.change_24h_percent,
            high_24h: update.high_24h,
            low_24h: update.low_24h,
            volume_24h: update.volume_24h,
            source: update.source,
            is_live,
            age_ms: update.age_ms(now_ms),
            observed_at: update.observed_at,
        }
    }

    /// Same value and source, ignoring age.
    ///
    /// Used to decide whether a change event is worth publishing.
    pub fn same_value(&self, other: &AggregatedTicker) -> bool {
        self.symbol == other.symbol
            && self.source == other.source
            && self.is_live == other.is_live
            && self.observed_at == other.observed_at
            && self.price == other.price
    }
}
