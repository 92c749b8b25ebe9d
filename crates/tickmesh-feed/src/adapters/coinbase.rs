//! Coinbase Exchange `ticker` channel.
//!
//! Change is derived from `open_24h`; `time` is RFC 3339. Liveness uses
//! WebSocket Ping frames.

use super::{change_from_open, num, ExchangeAdapter, ParseStats, WireNumber};
use crate::error::{FeedError, FeedResult};
use chrono::DateTime;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tickmesh_core::{Exchange, SharedClock, SymbolRegistry, TickerUpdate};
use tickmesh_ws::{HeartbeatFrame, Inbound, StreamProtocol};
use tracing::{trace, warn};

const CHANNEL: &str = "ticker";

#[derive(Debug, Deserialize)]
struct RawTicker {
    product_id: String,
    price: Option<WireNumber>,
    open_24h: Option<WireNumber>,
    high_24h: Option<WireNumber>,
    low_24h: Option<WireNumber>,
    volume_24h: Option<WireNumber>,
    time: Option<String>,
}

fn parse_time_ms(time: &str) -> Option<u64> {
    DateTime::parse_from_rfc3339(time)
        .ok()
        .and_then(|t| u64::try_from(t.timestamp_millis()).ok())
}

pub struct CoinbaseAdapter {
    registry: Arc<SymbolRegistry>,
    clock: SharedClock,
    stats: ParseStats,
}

impl CoinbaseAdapter {
    pub fn new(registry: Arc<SymbolRegistry>, clock: SharedClock) -> Self {
        Self {
            registry,
            clock,
            stats: ParseStats::new(Exchange::Coinbase),
        }
    }
}

impl ExchangeAdapter for CoinbaseAdapter {
    fn decode(&self, raw: &str, observed_at: u64) -> FeedResult<Option<TickerUpdate>> {
        let value: serde_json::Value = serde_json::from_str(raw)?;

        match value.get("type").and_then(|t| t.as_str()) {
            Some(CHANNEL) => {}
            Some("error") => {
                warn!(
                    message = value.get("message").and_then(|m| m.as_str()).unwrap_or(""),
                    reason = value.get("reason").and_then(|r| r.as_str()).unwrap_or(""),
                    "Coinbase rejected request"
                );
                return Ok(None);
            }
            _ => return Ok(None),
        }

        let ticker = RawTicker::deserialize(&value)
            .map_err(|e| FeedError::ParseError(format!("ticker: {}", e)))?;
        let Some(symbol) = self.registry.canonical(&ticker.product_id, Exchange::Coinbase) else {
            trace!(product_id = %ticker.product_id, "Unlisted Coinbase product");
            return Ok(None);
        };

        let last = num(&ticker.price);
        Ok(Some(TickerUpdate {
            symbol: symbol.to_string(),
            price: last,
            change_24h_percent: change_from_open(last, num(&ticker.open_24h)),
            high_24h: num(&ticker.high_24h),
            low_24h: num(&ticker.low_24h),
            volume_24h: num(&ticker.volume_24h),
            source: Exchange::Coinbase,
            observed_at,
            exchange_ts: ticker.time.as_deref().and_then(parse_time_ms),
        }))
    }

    fn stats(&self) -> &ParseStats {
        &self.stats
    }

    fn clock(&self) -> &SharedClock {
        &self.clock
    }
}

impl StreamProtocol for CoinbaseAdapter {
    fn exchange(&self) -> Exchange {
        Exchange::Coinbase
    }

    fn subscribe_frames(&self, provider_symbols: &[String]) -> Vec<String> {
        if provider_symbols.is_empty() {
            return Vec::new();
        }
        vec![json!({
            "type": "subscribe",
            "product_ids": provider_symbols,
            "channels": [CHANNEL],
        })
        .to_string()]
    }

    fn heartbeat(&self) -> HeartbeatFrame {
        HeartbeatFrame::Ping
    }

    fn classify(&self, text: &str, received_at: u64) -> Inbound {
        self.parse_at(text, received_at)
            .map_or(Inbound::Ignored, Inbound::Ticker)
    }
}
