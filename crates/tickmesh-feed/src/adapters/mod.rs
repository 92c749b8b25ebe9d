//! Exchange protocol adapters.
//!
//! Each adapter turns its provider's ticker frames into canonical
//! [`TickerUpdate`]s and also serves as the connection's
//! [`StreamProtocol`]. Parsing never fails outward: malformed frames are
//! counted, logged once, and dropped.

pub mod binance;
pub mod bybit;
pub mod coinbase;
pub mod kraken;
pub mod okx;

pub use binance::BinanceAdapter;
pub use bybit::BybitAdapter;
pub use coinbase::CoinbaseAdapter;
pub use kraken::KrakenAdapter;
pub use okx::OkxAdapter;

use crate::error::FeedResult;
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tickmesh_core::{Exchange, SharedClock, TickerUpdate};
use tickmesh_telemetry::Metrics;
use tickmesh_ws::StreamProtocol;
use tracing::{debug, warn};

const LOG_SAMPLE_LEN: usize = 200;

/// Per-adapter parse counters.
#[derive(Debug)]
pub struct ParseStats {
    exchange: Exchange,
    parsed: AtomicU64,
    failures: AtomicU64,
    dropped: AtomicU64,
}

impl ParseStats {
    pub fn new(exchange: Exchange) -> Self {
        Self {
            exchange,
            parsed: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Frames that produced an update.
    pub fn parsed(&self) -> u64 {
        self.parsed.load(Ordering::Relaxed)
    }

    /// Frames that could not be decoded.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Decoded tickers dropped for an unusable price.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn record_parsed(&self) {
        self.parsed.fetch_add(1, Ordering::Relaxed);
        Metrics::tick(self.exchange);
    }

    fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// First failure is a warning, the rest are debug noise.
    fn record_failure(&self, error: &dyn std::fmt::Display, raw: &str) {
        let n = self.failures.fetch_add(1, Ordering::Relaxed) + 1;
        Metrics::parse_failure(self.exchange);
        let sample: String = raw.chars().take(LOG_SAMPLE_LEN).collect();
        if n == 1 {
            warn!(exchange = %self.exchange, %error, %sample, "Unparseable ticker frame");
        } else {
            debug!(exchange = %self.exchange, %error, failures = n, "Unparseable ticker frame");
        }
    }
}

/// Normalizes one provider's ticker frames.
pub trait ExchangeAdapter: StreamProtocol {
    /// Decode a frame received at `observed_at`.
    ///
    /// `Ok(None)` means the frame is not a ticker for a known symbol
    /// (acks, other channels, unlisted pairs). `Err` means it looked like
    /// a ticker but could not be read.
    fn decode(&self, raw: &str, observed_at: u64) -> FeedResult<Option<TickerUpdate>>;

    fn stats(&self) -> &ParseStats;

    fn clock(&self) -> &SharedClock;

    /// Parse a frame received at `observed_at`. Never panics.
    fn parse_at(&self, raw: &str, observed_at: u64) -> Option<TickerUpdate> {
        match self.decode(raw, observed_at) {
            Ok(Some(update)) if update.price > 0.0 => {
                self.stats().record_parsed();
                if let Some(latency) = update.feed_latency_ms() {
                    Metrics::feed_latency(update.source, latency.max(0) as f64);
                }
                Some(update)
            }
            Ok(Some(update)) => {
                debug!(
                    exchange = %update.source,
                    symbol = %update.symbol,
                    price = update.price,
                    "Dropping ticker without a usable price"
                );
                self.stats().record_dropped();
                None
            }
            Ok(None) => None,
            Err(e) => {
                self.stats().record_failure(&e, raw);
                None
            }
        }
    }

    /// Parse a frame received now.
    fn parse(&self, raw: &str) -> Option<TickerUpdate> {
        self.parse_at(raw, self.clock().now_ms())
    }
}

/// Numeric field that may arrive as a JSON number or a string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum WireNumber {
    Number(f64),
    Text(String),
}

impl WireNumber {
    /// Finite value, or 0.
    pub(crate) fn value(&self) -> f64 {
        let v = match self {
            WireNumber::Number(n) => *n,
            WireNumber::Text(s) => s.trim().parse().unwrap_or(0.0),
        };
        if v.is_finite() {
            v
        } else {
            0.0
        }
    }

    /// Non-negative integer value (timestamps).
    pub(crate) fn as_u64(&self) -> Option<u64> {
        let v = self.value();
        (v > 0.0).then_some(v as u64)
    }
}

/// Value of an optional numeric field; missing or garbage reads as 0.
pub(crate) fn num(field: &Option<WireNumber>) -> f64 {
    field.as_ref().map_or(0.0, WireNumber::value)
}

/// Percent change from `open` to `last`; 0 without a usable open.
pub(crate) fn change_from_open(last: f64, open: f64) -> f64 {
    if open > 0.0 {
        (last - open) / open * 100.0
    } else {
        0.0
    }
}
