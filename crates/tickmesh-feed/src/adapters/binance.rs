//! Binance 24h rolling ticker stream.
//!
//! Streams are named in the URL (`/stream?streams=btcusdt@ticker/...`), so
//! there is no subscribe frame. Frames arrive wrapped as
//! `{"stream": "...", "data": {...}}`; bare payloads are accepted too.

use super::{num, ExchangeAdapter, ParseStats, WireNumber};
use crate::error::{FeedError, FeedResult};
use serde::Deserialize;
use std::sync::Arc;
use tickmesh_core::{Exchange, ExchangeConfig, SharedClock, SymbolRegistry, TickerUpdate};
use tickmesh_ws::{HeartbeatFrame, Inbound, StreamProtocol};
use tracing::trace;

const COMBINED_STREAM_URL: &str = "wss://stream.binance.com:9443/stream?streams=";
const TICKER_EVENT: &str = "24hrTicker";

#[derive(Debug, Deserialize)]
struct RawTicker {
    #[serde(rename = "E")]
    event_time: Option<WireNumber>,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "c")]
    last: Option<WireNumber>,
    #[serde(rename = "P")]
    change_percent: Option<WireNumber>,
    #[serde(rename = "h")]
    high: Option<WireNumber>,
    #[serde(rename = "l")]
    low: Option<WireNumber>,
    #[serde(rename = "v")]
    volume: Option<WireNumber>,
}

pub struct BinanceAdapter {
    registry: Arc<SymbolRegistry>,
    clock: SharedClock,
    stats: ParseStats,
}

impl BinanceAdapter {
    pub fn new(registry: Arc<SymbolRegistry>, clock: SharedClock) -> Self {
        Self {
            registry,
            clock,
            stats: ParseStats::new(Exchange::Binance),
        }
    }

    fn stream_name(provider_symbol: &str) -> String {
        format!("{}@ticker", provider_symbol.to_ascii_lowercase())
    }
}

impl ExchangeAdapter for BinanceAdapter {
    fn decode(&self, raw: &str, observed_at: u64) -> FeedResult<Option<TickerUpdate>> {
        let value: serde_json::Value = serde_json::from_str(raw)?;
        let body = value.get("data").unwrap_or(&value);

        // Subscription results ({"result":null,"id":1}) and other events.
        if body.get("e").and_then(|e| e.as_str()) != Some(TICKER_EVENT) {
            return Ok(None);
        }

        let ticker = RawTicker::deserialize(body)
            .map_err(|e| FeedError::ParseError(format!("24hrTicker: {}", e)))?;
        let Some(symbol) = self.registry.canonical(&ticker.symbol, Exchange::Binance) else {
            trace!(provider_symbol = %ticker.symbol, "Unlisted Binance symbol");
            return Ok(None);
        };

        Ok(Some(TickerUpdate {
            symbol: symbol.to_string(),
            price: num(&ticker.last),
            change_24h_percent: num(&ticker.change_percent),
            high_24h: num(&ticker.high),
            low_24h: num(&ticker.low),
            volume_24h: num(&ticker.volume),
            source: Exchange::Binance,
            observed_at,
            exchange_ts: ticker.event_time.as_ref().and_then(WireNumber::as_u64),
        }))
    }

    fn stats(&self) -> &ParseStats {
        &self.stats
    }

    fn clock(&self) -> &SharedClock {
        &self.clock
    }
}

impl StreamProtocol for BinanceAdapter {
    fn exchange(&self) -> Exchange {
        Exchange::Binance
    }

    fn connect_url(&self, config: &ExchangeConfig, provider_symbols: &[String]) -> String {
        let base = config
            .combined_stream_url
            .as_deref()
            .unwrap_or(COMBINED_STREAM_URL);
        let streams: Vec<String> = provider_symbols
            .iter()
            .map(|s| Self::stream_name(s))
            .collect();
        format!("{}{}", base, streams.join("/"))
    }

    fn subscribe_frames(&self, _provider_symbols: &[String]) -> Vec<String> {
        Vec::new()
    }

    fn heartbeat(&self) -> HeartbeatFrame {
        HeartbeatFrame::Ping
    }

    fn classify(&self, text: &str, received_at: u64) -> Inbound {
        self.parse_at(text, received_at)
            .map_or(Inbound::Ignored, Inbound::Ticker)
    }
}
