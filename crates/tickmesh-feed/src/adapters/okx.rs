//! OKX v5 public `tickers` channel.
//!
//! OKX does not send a 24h percent change; it is derived from `open24h`.
//! Liveness uses the text `ping`/`pong` exchange.

use super::{change_from_open, num, ExchangeAdapter, ParseStats, WireNumber};
use crate::error::{FeedError, FeedResult};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tickmesh_core::{Exchange, SharedClock, SymbolRegistry, TickerUpdate};
use tickmesh_ws::{HeartbeatFrame, Inbound, StreamProtocol};
use tracing::{trace, warn};

const CHANNEL: &str = "tickers";

#[derive(Debug, Deserialize)]
struct Push {
    arg: PushArg,
    #[serde(default)]
    data: Vec<RawTicker>,
}

#[derive(Debug, Deserialize)]
struct PushArg {
    channel: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTicker {
    inst_id: String,
    last: Option<WireNumber>,
    #[serde(rename = "open24h")]
    open_24h: Option<WireNumber>,
    #[serde(rename = "high24h")]
    high_24h: Option<WireNumber>,
    #[serde(rename = "low24h")]
    low_24h: Option<WireNumber>,
    #[serde(rename = "vol24h")]
    vol_24h: Option<WireNumber>,
    ts: Option<WireNumber>,
}

pub struct OkxAdapter {
    registry: Arc<SymbolRegistry>,
    clock: SharedClock,
    stats: ParseStats,
}

impl OkxAdapter {
    pub fn new(registry: Arc<SymbolRegistry>, clock: SharedClock) -> Self {
        Self {
            registry,
            clock,
            stats: ParseStats::new(Exchange::Okx),
        }
    }
}

impl ExchangeAdapter for OkxAdapter {
    fn decode(&self, raw: &str, observed_at: u64) -> FeedResult<Option<TickerUpdate>> {
        let value: serde_json::Value = serde_json::from_str(raw)?;

        if let Some(event) = value.get("event").and_then(|e| e.as_str()) {
            if event == "error" {
                warn!(
                    code = value.get("code").and_then(|c| c.as_str()).unwrap_or(""),
                    msg = value.get("msg").and_then(|m| m.as_str()).unwrap_or(""),
                    "OKX rejected request"
                );
            }
            return Ok(None);
        }
        if value.get("data").is_none() {
            return Ok(None);
        }

        let push = Push::deserialize(&value)
            .map_err(|e| FeedError::ParseError(format!("tickers push: {}", e)))?;
        if push.arg.channel != CHANNEL {
            return Ok(None);
        }
        let ticker = push
            .data
            .into_iter()
            .next()
            .ok_or_else(|| FeedError::InvalidData("tickers push without data".to_string()))?;

        let Some(symbol) = self.registry.canonical(&ticker.inst_id, Exchange::Okx) else {
            trace!(inst_id = %ticker.inst_id, "Unlisted OKX instrument");
            return Ok(None);
        };

        let last = num(&ticker.last);
        Ok(Some(TickerUpdate {
            symbol: symbol.to_string(),
            price: last,
            change_24h_percent: change_from_open(last, num(&ticker.open_24h)),
            high_24h: num(&ticker.high_24h),
            low_24h: num(&ticker.low_24h),
            volume_24h: num(&ticker.vol_24h),
            source: Exchange::Okx,
            observed_at,
            exchange_ts: ticker.ts.as_ref().and_then(WireNumber::as_u64),
        }))
    }

    fn stats(&self) -> &ParseStats {
        &self.stats
    }

    fn clock(&self) -> &SharedClock {
        &self.clock
    }
}

impl StreamProtocol for OkxAdapter {
    fn exchange(&self) -> Exchange {
        Exchange::Okx
    }

    fn subscribe_frames(&self, provider_symbols: &[String]) -> Vec<String> {
        if provider_symbols.is_empty() {
            return Vec::new();
        }
        let args: Vec<_> = provider_symbols
            .iter()
            .map(|s| json!({ "channel": CHANNEL, "instId": s }))
            .collect();
        vec![json!({ "op": "subscribe", "args": args }).to_string()]
    }

    fn heartbeat(&self) -> HeartbeatFrame {
        HeartbeatFrame::Text("ping".to_string())
    }

    fn classify(&self, text: &str, received_at: u64) -> Inbound {
        if text.trim() == "pong" {
            return Inbound::Pong;
        }
        self.parse_at(text, received_at)
            .map_or(Inbound::Ignored, Inbound::Ticker)
    }
}
