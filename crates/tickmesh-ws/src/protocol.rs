//! Per-exchange wire protocol seam.
//!
//! A [`ConnectionManager`](crate::ConnectionManager) knows how to keep a
//! socket alive; a `StreamProtocol` knows what to say on it and how to read
//! what comes back.

use tickmesh_core::{Exchange, ExchangeConfig, TickerUpdate};

/// How a provider expects to be pinged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatFrame {
    /// Application-level text frame.
    Text(String),
    /// WebSocket control Ping; answered by a Pong frame.
    Ping,
}

/// Classified inbound text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Application-level pong or provider heartbeat.
    Pong,
    Ticker(TickerUpdate),
    /// Acks, snapshots of other channels, malformed frames.
    Ignored,
}

pub trait StreamProtocol: Send + Sync + 'static {
    fn exchange(&self) -> Exchange;

    /// URL to dial for a connection carrying `provider_symbols`.
    fn connect_url(&self, config: &ExchangeConfig, provider_symbols: &[String]) -> String {
        let _ = provider_symbols;
        config.endpoint_url.clone()
    }

    /// Frames sent right after the socket opens.
    fn subscribe_frames(&self, provider_symbols: &[String]) -> Vec<String>;

    fn heartbeat(&self) -> HeartbeatFrame;

    /// Classify one text frame. `received_at` is the local receipt time in ms.
    fn classify(&self, text: &str, received_at: u64) -> Inbound;
}
