//! Connection state machine.
//!
//! One machine per socket. It owns the backoff counter and the quality
//! detector so both survive reconnect cycles, and it publishes every
//! transition so status can be observed without polling. All methods take
//! `&mut self`: the owning task serializes transitions.

use crate::backoff::{BackoffConfig, ExponentialBackoff};
use crate::error::{WsError, WsResult};
use crate::quality::{NetworkQuality, NetworkQualityDetector};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tickmesh_core::Exchange;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Terminal: retries were explicitly stopped.
    Failed,
}

impl ConnectionState {
    pub const ALL: [ConnectionState; 5] = [
        ConnectionState::Disconnected,
        ConnectionState::Connecting,
        ConnectionState::Connected,
        ConnectionState::Reconnecting,
        ConnectionState::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
        }
    }

    /// Rank used to summarize several connections of one exchange.
    /// Higher is healthier.
    pub fn health_rank(&self) -> u8 {
        match self {
            Self::Connected => 4,
            Self::Connecting => 3,
            Self::Reconnecting => 2,
            Self::Disconnected => 1,
            Self::Failed => 0,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs that drive the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionEvent {
    Start,
    Opened,
    OpenFailed,
    ConnectTimeout,
    TransportLost,
    Stale,
    RetryDue,
    Disable,
    Shutdown,
}

impl ConnectionEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Opened => "opened",
            Self::OpenFailed => "open_failed",
            Self::ConnectTimeout => "connect_timeout",
            Self::TransportLost => "transport_lost",
            Self::Stale => "stale",
            Self::RetryDue => "retry_due",
            Self::Disable => "disable",
            Self::Shutdown => "shutdown",
        }
    }
}

/// A completed transition, as seen by listeners.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateTransition {
    pub exchange: Exchange,
    pub conn: usize,
    pub from: ConnectionState,
    pub to: ConnectionState,
    pub event: ConnectionEvent,
    pub reason: Option<String>,
    /// Set on `Opened`.
    pub connect_duration_ms: Option<u64>,
}

/// Exchange-level view over its shard connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExchangeStatus {
    pub exchange: Exchange,
    /// Healthiest state across `connections`.
    pub state: ConnectionState,
    pub connections: Vec<ConnectionState>,
}

impl ExchangeStatus {
    pub fn from_connections(exchange: Exchange, connections: Vec<ConnectionState>) -> Self {
        let state = connections
            .iter()
            .copied()
            .max_by_key(ConnectionState::health_rank)
            .unwrap_or(ConnectionState::Disconnected);
        Self {
            exchange,
            state,
            connections,
        }
    }
}

const TRANSITION_CHANNEL_CAPACITY: usize = 64;

pub struct ConnectionStateMachine {
    exchange: Exchange,
    conn: usize,
    state: ConnectionState,
    backoff: ExponentialBackoff,
    quality: NetworkQualityDetector,
    state_tx: watch::Sender<ConnectionState>,
    transitions_tx: broadcast::Sender<StateTransition>,
    reconnect_count: u64,
}

impl ConnectionStateMachine {
    pub fn new(
        exchange: Exchange,
        conn: usize,
        backoff: BackoffConfig,
        quality: NetworkQualityDetector,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (transitions_tx, _) = broadcast::channel(TRANSITION_CHANNEL_CAPACITY);
        Self {
            exchange,
            conn,
            state: ConnectionState::Disconnected,
            backoff: ExponentialBackoff::new(backoff),
            quality,
            state_tx,
            transitions_tx,
            reconnect_count: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn exchange(&self) -> Exchange {
        self.exchange
    }

    pub fn conn(&self) -> usize {
        self.conn
    }

    /// Latest-state channel.
    pub fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Transition event feed.
    pub fn subscribe(&self) -> broadcast::Receiver<StateTransition> {
        self.transitions_tx.subscribe()
    }

    pub fn quality(&self) -> NetworkQuality {
        self.quality.quality()
    }

    /// Connect timeout for the next attempt.
    pub fn connect_timeout(&self) -> Duration {
        self.quality.recommended_timeout()
    }

    /// Backoff attempts since the last successful connect.
    pub fn backoff_attempt(&self) -> u32 {
        self.backoff.attempt()
    }

    /// Reconnect cycles since creation.
    pub fn reconnect_count(&self) -> u64 {
        self.reconnect_count
    }

    /// Disconnected -> Connecting.
    pub fn start(&mut self) -> WsResult<StateTransition> {
        self.transition(
            ConnectionEvent::Start,
            &[ConnectionState::Disconnected],
            ConnectionState::Connecting,
            None,
        )
    }

    /// Connecting -> Connected. Resets backoff and records the connect time.
    pub fn on_opened(&mut self, connect_duration: Duration) -> WsResult<StateTransition> {
        let t = self.transition_with(
            ConnectionEvent::Opened,
            &[ConnectionState::Connecting],
            ConnectionState::Connected,
            None,
            Some(connect_duration.as_millis() as u64),
        )?;
        self.backoff.reset();
        self.quality.record(connect_duration);
        debug!(
            exchange = %self.exchange,
            conn = self.conn,
            connect_ms = connect_duration.as_millis() as u64,
            quality = %self.quality.quality(),
            "Connect duration recorded"
        );
        Ok(t)
    }

    /// Connecting -> Reconnecting after a failed open.
    pub fn on_open_failed(&mut self, reason: impl Into<String>) -> WsResult<StateTransition> {
        self.enter_reconnecting(
            ConnectionEvent::OpenFailed,
            &[ConnectionState::Connecting],
            Some(reason.into()),
        )
    }

    /// Connecting -> Reconnecting after the connect timeout elapsed.
    pub fn on_connect_timeout(&mut self) -> WsResult<StateTransition> {
        let reason = format!("no open within {}ms", self.connect_timeout().as_millis());
        self.enter_reconnecting(
            ConnectionEvent::ConnectTimeout,
            &[ConnectionState::Connecting],
            Some(reason),
        )
    }

    /// Connected -> Reconnecting on socket error or close.
    pub fn on_transport_lost(&mut self, reason: impl Into<String>) -> WsResult<StateTransition> {
        self.enter_reconnecting(
            ConnectionEvent::TransportLost,
            &[ConnectionState::Connected],
            Some(reason.into()),
        )
    }

    /// Connected -> Reconnecting on heartbeat staleness.
    pub fn on_stale(&mut self) -> WsResult<StateTransition> {
        self.enter_reconnecting(
            ConnectionEvent::Stale,
            &[ConnectionState::Connected],
            Some("heartbeat timeout".to_string()),
        )
    }

    /// Delay to wait in Reconnecting before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        self.backoff.next_delay()
    }

    /// Reconnecting -> Connecting once the backoff delay elapsed.
    pub fn on_retry_due(&mut self) -> WsResult<StateTransition> {
        self.transition(
            ConnectionEvent::RetryDue,
            &[ConnectionState::Reconnecting],
            ConnectionState::Connecting,
            None,
        )
    }

    /// Any live state -> Failed. Terminal.
    pub fn disable(&mut self, reason: impl Into<String>) -> WsResult<StateTransition> {
        self.transition(
            ConnectionEvent::Disable,
            &[
                ConnectionState::Disconnected,
                ConnectionState::Connecting,
                ConnectionState::Connected,
                ConnectionState::Reconnecting,
            ],
            ConnectionState::Failed,
            Some(reason.into()),
        )
    }

    /// Any live state -> Disconnected on subsystem shutdown.
    pub fn shutdown(&mut self) -> WsResult<StateTransition> {
        self.transition(
            ConnectionEvent::Shutdown,
            &[
                ConnectionState::Disconnected,
                ConnectionState::Connecting,
                ConnectionState::Connected,
                ConnectionState::Reconnecting,
            ],
            ConnectionState::Disconnected,
            None,
        )
    }

    fn enter_reconnecting(
        &mut self,
        event: ConnectionEvent,
        from: &[ConnectionState],
        reason: Option<String>,
    ) -> WsResult<StateTransition> {
        let t = self.transition(event, from, ConnectionState::Reconnecting, reason)?;
        self.reconnect_count += 1;
        Ok(t)
    }

    fn transition(
        &mut self,
        event: ConnectionEvent,
        allowed_from: &[ConnectionState],
        to: ConnectionState,
        reason: Option<String>,
    ) -> WsResult<StateTransition> {
        self.transition_with(event, allowed_from, to, reason, None)
    }

    fn transition_with(
        &mut self,
        event: ConnectionEvent,
        allowed_from: &[ConnectionState],
        to: ConnectionState,
        reason: Option<String>,
        connect_duration_ms: Option<u64>,
    ) -> WsResult<StateTransition> {
        let from = self.state;
        if !allowed_from.contains(&from) {
            warn!(
                exchange = %self.exchange,
                conn = self.conn,
                ?event,
                state = %from,
                "Rejected state transition"
            );
            return Err(WsError::InvalidTransition { from, event });
        }

        self.state = to;
        self.state_tx.send_replace(to);

        let transition = StateTransition {
            exchange: self.exchange,
            conn: self.conn,
            from,
            to,
            event,
            reason,
            connect_duration_ms,
        };
        info!(
            exchange = %self.exchange,
            conn = self.conn,
            from = %from,
            to = %to,
            ?event,
            reason = transition.reason.as_deref().unwrap_or(""),
            "Connection state changed"
        );
        // No listeners is fine.
        let _ = self.transitions_tx.send(transition.clone());
        Ok(transition)
    }
}
