//! Kraken v1 public `ticker` channel.
//!
//! Data frames are positional arrays: `[channelID, {..}, "ticker", "XBT/USD"]`.
//! Each field holds `[today, last24h]`; the trailing-24h column is used and
//! the change is derived from the 24h open. Kraken sends no event time.

use super::{change_from_open, ExchangeAdapter, ParseStats, WireNumber};
use crate::error::{FeedError, FeedResult};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tickmesh_core::{Exchange, SharedClock, SymbolRegistry, TickerUpdate};
use tickmesh_ws::{HeartbeatFrame, Inbound, StreamProtocol};
use tracing::{trace, warn};

const CHANNEL: &str = "ticker";

#[derive(Debug, Default, Deserialize)]
struct RawTicker {
    /// Last trade `[price, lot volume]`.
    #[serde(default)]
    c: Vec<WireNumber>,
    #[serde(default)]
    h: Vec<WireNumber>,
    #[serde(default)]
    l: Vec<WireNumber>,
    #[serde(default)]
    v: Vec<WireNumber>,
    #[serde(default)]
    o: Vec<WireNumber>,
}

/// Trailing-24h column, falling back to the first one.
fn trailing(values: &[WireNumber]) -> f64 {
    values
        .get(1)
        .or_else(|| values.first())
        .map_or(0.0, WireNumber::value)
}

pub struct KrakenAdapter {
    registry: Arc<SymbolRegistry>,
    clock: SharedClock,
    stats: ParseStats,
}

impl KrakenAdapter {
    pub fn new(registry: Arc<SymbolRegistry>, clock: SharedClock) -> Self {
        Self {
            registry,
            clock,
            stats: ParseStats::new(Exchange::Kraken),
        }
    }

    fn is_pong(text: &str) -> bool {
        if !text.starts_with('{') {
            return false;
        }
        let Ok(value) = serde_json::from_str::<serde_json::Value>(text) else {
            return false;
        };
        matches!(
            value.get("event").and_then(|e| e.as_str()),
            Some("pong") | Some("heartbeat")
        )
    }
}

impl ExchangeAdapter for KrakenAdapter {
    fn decode(&self, raw: &str, observed_at: u64) -> FeedResult<Option<TickerUpdate>> {
        let value: serde_json::Value = serde_json::from_str(raw)?;

        let frame = match value {
            serde_json::Value::Array(frame) => frame,
            serde_json::Value::Object(event) => {
                // systemStatus, subscriptionStatus, heartbeat, pong.
                if event.get("status").and_then(|s| s.as_str()) == Some("error") {
                    warn!(
                        error = event.get("errorMessage").and_then(|m| m.as_str()).unwrap_or(""),
                        "Kraken rejected request"
                    );
                }
                return Ok(None);
            }
            _ => return Ok(None),
        };

        if frame.len() < 4 || frame[frame.len() - 2].as_str() != Some(CHANNEL) {
            return Ok(None);
        }
        let pair = frame[frame.len() - 1]
            .as_str()
            .ok_or_else(|| FeedError::InvalidData("ticker frame without pair".to_string()))?;
        let ticker = RawTicker::deserialize(&frame[1])
            .map_err(|e| FeedError::ParseError(format!("ticker body: {}", e)))?;

        let Some(symbol) = self.registry.canonical(pair, Exchange::Kraken) else {
            trace!(pair, "Unlisted Kraken pair");
            return Ok(None);
        };

        let last = ticker.c.first().map_or(0.0, WireNumber::value);
        Ok(Some(TickerUpdate {
            symbol: symbol.to_string(),
            price: last,
            change_24h_percent: change_from_open(last, trailing(&ticker.o)),
            high_24h: trailing(&ticker.h),
            low_24h: trailing(&ticker.l),
            volume_24h: trailing(&ticker.v),
            source: Exchange::Kraken,
            observed_at,
            exchange_ts: None,
        }))
    }

    fn stats(&self) -> &ParseStats {
        &self.stats
    }

    fn clock(&self) -> &SharedClock {
        &self.clock
    }
}

impl StreamProtocol for KrakenAdapter {
    fn exchange(&self) -> Exchange {
        Exchange::Kraken
    }

    fn subscribe_frames(&self, provider_symbols: &[String]) -> Vec<String> {
        if provider_symbols.is_empty() {
            return Vec::new();
        }
        vec![json!({
            "event": "subscribe",
            "pair": provider_symbols,
            "subscription": { "name": CHANNEL },
        })
        .to_string()]
    }

    fn heartbeat(&self) -> HeartbeatFrame {
        HeartbeatFrame::Text(json!({ "event": "ping" }).to_string())
    }

    fn classify(&self, text: &str, received_at: u64) -> Inbound {
        if Self::is_pong(text) {
            return Inbound::Pong;
        }
        self.parse_at(text, received_at)
            .map_or(Inbound::Ignored, Inbound::Ticker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tickmesh_core::ManualClock;

    const SAMPLE: &str = r#"[
        340,
        {
            "a": ["50020.10000", 1, "1.000"],
            "b": ["50019.90000", 0, "0.500"],
            "c": ["50020.00000", "0.00150000"],
            "v": ["1200.5", "2500.25"],
            "p": ["49900.0", "49800.0"],
            "t": [15000, 32000],
            "l": ["49500.0", "48000.0"],
            "h": ["50300.0", "50800.0"],
            "o": ["49800.0", "48500.0"]
        },
        "ticker",
        "XBT/USD"
    ]"#;

    fn adapter() -> KrakenAdapter {
        KrakenAdapter::new(
            Arc::new(SymbolRegistry::builtin()),
            Arc::new(ManualClock::new(1_700_000_002_000)),
        )
    }

    #[test]
    fn test_parse_ticker_uses_trailing_24h() {
        let u = adapter().parse(SAMPLE).unwrap();
        assert_eq!(u.symbol, "BTC");
        assert_eq!(u.source, Exchange::Kraken);
        assert_eq!(u.price, 50_020.0);
        assert_eq!(u.high_24h, 50_800.0);
        assert_eq!(u.low_24h, 48_000.0);
        assert_eq!(u.volume_24h, 2500.25);
        assert!((u.change_24h_percent - (1520.0 / 48500.0 * 100.0)).abs() < 1e-9);
        assert_eq!(u.exchange_ts, None);
        assert_eq!(u.observed_at, 1_700_000_002_000);
    }

    #[test]
    fn test_doge_legacy_code() {
        let raw = r#"[12,{"c":["0.08","10"],"o":["0.07","0.08"]},"ticker","XDG/USD"]"#;
        let u = adapter().parse(raw).unwrap();
        assert_eq!(u.symbol, "DOGE");
        assert_eq!(u.change_24h_percent, 0.0);
    }

    #[test]
    fn test_events_are_not_tickers() {
        let a = adapter();
        assert!(a.parse(r#"{"event":"systemStatus","status":"online","version":"1.9.0"}"#).is_none());
        assert!(a
            .parse(r#"{"event":"subscriptionStatus","status":"error","errorMessage":"Currency pair not supported"}"#)
            .is_none());
        assert!(a.parse(r#"[340,{"a":[]},"book-10","XBT/USD"]"#).is_none());
        assert_eq!(a.stats().failures(), 0);
    }

    #[test]
    fn test_malformed_ticker_frames() {
        let a = adapter();
        assert!(a.parse(r#"[340,{"c":["1"]},"ticker",7]"#).is_none());
        assert!(a.parse(r#"[340,"nope","ticker","XBT/USD"]"#).is_none());
        assert!(a.parse(r#"[340,{"c":[]},"ticker","XBT/USD"]"#).is_none());
        assert_eq!(a.stats().failures(), 2);
        assert_eq!(a.stats().dropped(), 1);
    }

    #[test]
    fn test_subscribe_and_heartbeat_forms() {
        let a = adapter();
        let frames = a.subscribe_frames(&["XBT/USD".to_string(), "ETH/USD".to_string()]);
        assert_eq!(frames.len(), 1);
        let v: serde_json::Value = serde_json::from_str(&frames[0]).unwrap();
        assert_eq!(v["event"], "subscribe");
        assert_eq!(v["pair"][0], "XBT/USD");
        assert_eq!(v["subscription"]["name"], "ticker");

        assert_eq!(a.classify(r#"{"event":"pong","reqid":1}"#, 0), Inbound::Pong);
        assert_eq!(a.classify(r#"{"event":"heartbeat"}"#, 0), Inbound::Pong);
        assert!(matches!(a.classify(SAMPLE, 0), Inbound::Ticker(_)));
    }
}
