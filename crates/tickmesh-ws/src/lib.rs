//! WebSocket connectivity for tickmesh exchange feeds.
//!
//! Provides the resilience primitives every exchange connection shares:
//! - Exponential backoff with jitter for reconnect delays
//! - Heartbeat monitoring (periodic ping, pong staleness detection)
//! - Network quality detection (adaptive connect timeout)
//! - An explicit connection state machine with observable transitions
//! - A connection manager driving one socket per symbol shard

pub mod backoff;
pub mod connection;
pub mod error;
pub mod heartbeat;
pub mod protocol;
pub mod quality;
pub mod state;

pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use connection::{ConnectionConfig, ConnectionManager};
pub use error::{WsError, WsResult};
pub use heartbeat::{HeartbeatConfig, HeartbeatMonitor};
pub use protocol::{HeartbeatFrame, Inbound, StreamProtocol};
pub use quality::{NetworkQuality, NetworkQualityDetector};
pub use state::{
    ConnectionEvent, ConnectionState, ConnectionStateMachine, ExchangeStatus, StateTransition,
};

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Initialize the TLS crypto provider.
/// Must be called before any WebSocket connections are made.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
