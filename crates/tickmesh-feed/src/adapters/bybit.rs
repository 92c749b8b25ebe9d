//! Bybit v5 spot `tickers.{symbol}` topic.
//!
//! `price24hPcnt` is a fraction (0.0196 = 1.96%). When it is absent the
//! change is derived from `prevPrice24h`. Subscriptions are capped at ten
//! topics per request.

use super::{change_from_open, num, ExchangeAdapter, ParseStats, WireNumber};
use crate::error::{FeedError, FeedResult};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tickmesh_core::{Exchange, SharedClock, SymbolRegistry, TickerUpdate};
use tickmesh_ws::{HeartbeatFrame, Inbound, StreamProtocol};
use tracing::{trace, warn};

const TOPIC_PREFIX: &str = "tickers.";
const MAX_ARGS_PER_SUBSCRIBE: usize = 10;

#[derive(Debug, Deserialize)]
struct Push {
    ts: Option<WireNumber>,
    data: RawTicker,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTicker {
    symbol: String,
    last_price: Option<WireNumber>,
    #[serde(rename = "highPrice24h")]
    high_price_24h: Option<WireNumber>,
    #[serde(rename = "lowPrice24h")]
    low_price_24h: Option<WireNumber>,
    #[serde(rename = "prevPrice24h")]
    prev_price_24h: Option<WireNumber>,
    #[serde(rename = "volume24h")]
    volume_24h: Option<WireNumber>,
    #[serde(rename = "price24hPcnt")]
    price_24h_pcnt: Option<WireNumber>,
}

pub struct BybitAdapter {
    registry: Arc<SymbolRegistry>,
    clock: SharedClock,
    stats: ParseStats,
}

impl BybitAdapter {
    pub fn new(registry: Arc<SymbolRegistry>, clock: SharedClock) -> Self {
        Self {
            registry,
            clock,
            stats: ParseStats::new(Exchange::Bybit),
        }
    }

    fn is_pong(text: &str) -> bool {
        if !text.contains("pong") {
            return false;
        }
        let Ok(value) = serde_json::from_str::<serde_json::Value>(text) else {
            return false;
        };
        value.get("op").and_then(|v| v.as_str()) == Some("pong")
            || value.get("ret_msg").and_then(|v| v.as_str()) == Some("pong")
    }
}

impl ExchangeAdapter for BybitAdapter {
    fn decode(&self, raw: &str, observed_at: u64) -> FeedResult<Option<TickerUpdate>> {
        let value: serde_json::Value = serde_json::from_str(raw)?;

        // Command responses: {"success":true,"ret_msg":"","op":"subscribe",...}
        if let Some(op) = value.get("op").and_then(|v| v.as_str()) {
            if value.get("success").and_then(|v| v.as_bool()) == Some(false) {
                warn!(
                    op,
                    ret_msg = value.get("ret_msg").and_then(|v| v.as_str()).unwrap_or(""),
                    "Bybit rejected request"
                );
            }
            return Ok(None);
        }

        let is_ticker_topic = value
            .get("topic")
            .and_then(|t| t.as_str())
            .is_some_and(|t| t.starts_with(TOPIC_PREFIX));
        if !is_ticker_topic {
            return Ok(None);
        }

        let push = Push::deserialize(&value)
            .map_err(|e| FeedError::ParseError(format!("tickers push: {}", e)))?;
        let ticker = push.data;
        let Some(symbol) = self.registry.canonical(&ticker.symbol, Exchange::Bybit) else {
            trace!(provider_symbol = %ticker.symbol, "Unlisted Bybit symbol");
            return Ok(None);
        };

        let last = num(&ticker.last_price);
        let change_24h_percent = match &ticker.price_24h_pcnt {
            Some(pcnt) => pcnt.value() * 100.0,
            None => change_from_open(last, num(&ticker.prev_price_24h)),
        };

        Ok(Some(TickerUpdate {
            symbol: symbol.to_string(),
            price: last,
            change_24h_percent,
            high_24h: num(&ticker.high_price_24h),
            low_24h: num(&ticker.low_price_24h),
            volume_24h: num(&ticker.volume_24h),
            source: Exchange::Bybit,
            observed_at,
            exchange_ts: push.ts.as_ref().and_then(WireNumber::as_u64),
        }))
    }

    fn stats(&self) -> &ParseStats {
        &self.stats
    }

    fn clock(&self) -> &SharedClock {
        &self.clock
    }
}

impl StreamProtocol for BybitAdapter {
    fn exchange(&self) -> Exchange {
        Exchange::Bybit
    }

    fn subscribe_frames(&self, provider_symbols: &[String]) -> Vec<String> {
        provider_symbols
            .chunks(MAX_ARGS_PER_SUBSCRIBE)
            .map(|chunk| {
                let args: Vec<String> = chunk
                    .iter()
                    .map(|s| format!("{}{}", TOPIC_PREFIX, s))
                    .collect();
                json!({ "op": "subscribe", "args": args }).to_string()
            })
            .collect()
    }

    fn heartbeat(&self) -> HeartbeatFrame {
        HeartbeatFrame::Text(json!({ "op": "ping" }).to_string())
    }

    fn classify(&self, text: &str, received_at: u64) -> Inbound {
        if Self::is_pong(text) {
            return Inbound::Pong;
        }
        self.parse_at(text, received_at)
            .map_or(Inbound::Ignored, Inbound::Ticker)
    }
}
