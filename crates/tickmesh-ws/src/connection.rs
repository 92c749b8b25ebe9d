//! WebSocket connection manager.
//!
//! Drives one socket through the [`ConnectionStateMachine`]: connect with an
//! adaptive timeout, subscribe, pump frames through the exchange's
//! [`StreamProtocol`], heartbeat, and reconnect with backoff until told to
//! stop.

use crate::backoff::BackoffConfig;
use crate::error::{WsError, WsResult};
use crate::heartbeat::{HeartbeatConfig, HeartbeatMonitor};
use crate::protocol::{HeartbeatFrame, Inbound, StreamProtocol};
use crate::quality::{NetworkQualityDetector, DEFAULT_MAX_SAMPLES};
use crate::state::{ConnectionState, ConnectionStateMachine, StateTransition};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;
use std::time::Instant;
use tickmesh_core::{Exchange, ExchangeConfig, SharedClock, TickerUpdate};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch, Notify};
use tokio_tungstenite::{
    connect_async_tls_with_config, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

const HEARTBEAT_SIGNAL_CAPACITY: usize = 8;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub exchange: ExchangeConfig,
    /// Shard index within the exchange.
    pub conn: usize,
    /// Provider-native symbols carried by this socket.
    pub provider_symbols: Vec<String>,
    pub backoff: BackoffConfig,
    pub heartbeat: HeartbeatConfig,
    /// Connect-duration samples kept for quality detection.
    pub quality_samples: usize,
}

impl ConnectionConfig {
    pub fn new(exchange: ExchangeConfig, conn: usize, provider_symbols: Vec<String>) -> Self {
        Self {
            exchange,
            conn,
            provider_symbols,
            backoff: BackoffConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            quality_samples: DEFAULT_MAX_SAMPLES,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    Shutdown,
    Disable,
}

enum SessionEnd {
    Stopped(Stop),
    Lost(WsError),
}

/// WebSocket connection manager.
pub struct ConnectionManager<P: StreamProtocol> {
    config: ConnectionConfig,
    protocol: Arc<P>,
    machine: Mutex<ConnectionStateMachine>,
    heartbeat: HeartbeatMonitor,
    ticker_tx: mpsc::Sender<TickerUpdate>,
    clock: SharedClock,
    /// Subsystem-wide stop; ends in Disconnected.
    shutdown_token: CancellationToken,
    /// Operator stop for this exchange; ends in Failed.
    disable_token: CancellationToken,
}

impl<P: StreamProtocol> ConnectionManager<P> {
    pub fn new(
        config: ConnectionConfig,
        protocol: Arc<P>,
        ticker_tx: mpsc::Sender<TickerUpdate>,
        clock: SharedClock,
        shutdown_token: CancellationToken,
        disable_token: CancellationToken,
    ) -> Self {
        let machine = ConnectionStateMachine::new(
            config.exchange.name,
            config.conn,
            config.backoff.clone(),
            NetworkQualityDetector::new(config.quality_samples),
        );
        let heartbeat = HeartbeatMonitor::new(config.heartbeat.clone());
        Self {
            config,
            protocol,
            machine: Mutex::new(machine),
            heartbeat,
            ticker_tx,
            clock,
            shutdown_token,
            disable_token,
        }
    }

    pub fn exchange(&self) -> Exchange {
        self.config.exchange.name
    }

    pub fn conn(&self) -> usize {
        self.config.conn
    }

    pub fn state(&self) -> ConnectionState {
        self.machine().state()
    }

    pub fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.machine().watch()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateTransition> {
        self.machine().subscribe()
    }

    pub fn heartbeat_timeout_count(&self) -> u64 {
        self.heartbeat.timeout_count()
    }

    /// Stop reconnecting and close the socket; ends in `Disconnected`.
    pub fn shutdown(&self) {
        info!(exchange = %self.exchange(), conn = self.conn(), "Connection shutdown requested");
        self.shutdown_token.cancel();
    }

    /// Stop retrying this connection for good; ends in `Failed`.
    pub fn disable(&self) {
        info!(exchange = %self.exchange(), conn = self.conn(), "Connection disable requested");
        self.disable_token.cancel();
    }

    fn machine(&self) -> MutexGuard<'_, ConnectionStateMachine> {
        self.machine.lock()
    }

    async fn stopped(&self) -> Stop {
        tokio::select! {
            biased;
            () = self.disable_token.cancelled() => Stop::Disable,
            () = self.shutdown_token.cancelled() => Stop::Shutdown,
        }
    }

    fn finish(&self, stop: Stop) -> WsResult<()> {
        self.heartbeat.stop();
        let mut machine = self.machine();
        match stop {
            Stop::Shutdown => machine.shutdown()?,
            Stop::Disable => machine.disable("disabled by operator")?,
        };
        Ok(())
    }

    /// Run until shutdown or disable. Retries are unbounded.
    pub async fn run(&self) -> WsResult<()> {
        self.machine().start()?;

        loop {
            let url = self
                .protocol
                .connect_url(&self.config.exchange, &self.config.provider_symbols);
            let timeout = self.machine().connect_timeout();
            info!(
                exchange = %self.exchange(),
                conn = self.conn(),
                %url,
                timeout_ms = timeout.as_millis() as u64,
                "Connecting to WebSocket"
            );

            let started = Instant::now();
            let attempt = tokio::select! {
                biased;
                stop = self.stopped() => return self.finish(stop),
                res = tokio::time::timeout(
                    timeout,
                    connect_async_tls_with_config(url.as_str(), None, true, None),
                ) => res,
            };

            match attempt {
                Err(_elapsed) => {
                    warn!(exchange = %self.exchange(), conn = self.conn(), "Connect timed out");
                    self.machine().on_connect_timeout()?;
                }
                Ok(Err(e)) => {
                    error!(exchange = %self.exchange(), conn = self.conn(), ?e, "Connect failed");
                    self.machine().on_open_failed(e.to_string())?;
                }
                Ok(Ok((stream, _response))) => {
                    self.machine().on_opened(started.elapsed())?;
                    info!(exchange = %self.exchange(), conn = self.conn(), "WebSocket connected");

                    match self.session(stream).await {
                        SessionEnd::Stopped(stop) => return self.finish(stop),
                        SessionEnd::Lost(WsError::HeartbeatTimeout) => {
                            self.machine().on_stale()?;
                        }
                        SessionEnd::Lost(e) => {
                            warn!(exchange = %self.exchange(), conn = self.conn(), %e, "WebSocket lost");
                            self.machine().on_transport_lost(e.to_string())?;
                        }
                    }
                }
            }

            let delay = self.machine().next_delay();
            warn!(
                exchange = %self.exchange(),
                conn = self.conn(),
                delay_ms = delay.as_millis() as u64,
                "Reconnecting"
            );
            tokio::select! {
                biased;
                stop = self.stopped() => return self.finish(stop),
                () = tokio::time::sleep(delay) => {}
            }
            self.machine().on_retry_due()?;
        }
    }

    async fn session(&self, stream: WsStream) -> SessionEnd {
        let (mut write, mut read) = stream.split();

        for frame in self.protocol.subscribe_frames(&self.config.provider_symbols) {
            debug!(exchange = %self.exchange(), conn = self.conn(), %frame, "Sending subscription");
            if let Err(e) = write.send(Message::Text(frame)).await {
                return SessionEnd::Lost(WsError::SendFailed(e.to_string()));
            }
        }

        // Heartbeat ticks may be dropped; the stale signal never is.
        let (due_tx, mut due_rx) = mpsc::channel::<()>(HEARTBEAT_SIGNAL_CAPACITY);
        let stale = Arc::new(Notify::new());
        let stale_tx = stale.clone();
        self.heartbeat.start(
            move || {
                let _ = due_tx.try_send(());
            },
            move || stale_tx.notify_one(),
        );

        let end = loop {
            tokio::select! {
                biased;
                stop = self.stopped() => {
                    if let Err(e) = write.send(Message::Close(None)).await {
                        debug!(?e, "Close frame not delivered");
                    }
                    break SessionEnd::Stopped(stop);
                }

                () = stale.notified() => {
                    error!(
                        exchange = %self.exchange(),
                        conn = self.conn(),
                        silent_ms = self.heartbeat.since_last_pong().as_millis() as u64,
                        "Heartbeat timeout"
                    );
                    break SessionEnd::Lost(WsError::HeartbeatTimeout);
                }

                Some(()) = due_rx.recv() => {
                    if let Err(e) = self.send_heartbeat(&mut write).await {
                        break SessionEnd::Lost(e);
                    }
                }

                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(stop) = self.handle_text(&text).await {
                            break SessionEnd::Stopped(stop);
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        trace!("Received ping, sending pong");
                        if let Err(e) = write.send(Message::Pong(data)).await {
                            break SessionEnd::Lost(e.into());
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        trace!("Received pong");
                        self.heartbeat.record_pong();
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame
                            .map(|f| (f.code.into(), f.reason.to_string()))
                            .unwrap_or((1000, "Normal close".to_string()));
                        break SessionEnd::Lost(WsError::ConnectionClosed { code, reason });
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break SessionEnd::Lost(e.into()),
                    None => {
                        break SessionEnd::Lost(WsError::ConnectionClosed {
                            code: 1006,
                            reason: "stream ended".to_string(),
                        });
                    }
                },
            }
        };

        self.heartbeat.stop();
        end
    }

    async fn send_heartbeat(&self, write: &mut WsSink) -> WsResult<()> {
        let frame = match self.protocol.heartbeat() {
            HeartbeatFrame::Text(text) => Message::Text(text),
            HeartbeatFrame::Ping => Message::Ping(Vec::new()),
        };
        write
            .send(frame)
            .await
            .map_err(|e| WsError::SendFailed(e.to_string()))?;
        debug!(exchange = %self.exchange(), conn = self.conn(), "Sent heartbeat");
        Ok(())
    }

    /// Returns `Some` when the downstream consumer is gone.
    async fn handle_text(&self, text: &str) -> Option<Stop> {
        match self.protocol.classify(text, self.clock.now_ms()) {
            Inbound::Pong => {
                trace!("Received application pong");
                self.heartbeat.record_pong();
            }
            Inbound::Ticker(update) => {
                if self.ticker_tx.send(update).await.is_err() {
                    warn!(exchange = %self.exchange(), "Ticker receiver dropped");
                    return Some(Stop::Shutdown);
                }
            }
            Inbound::Ignored => {}
        }
        None
    }
}
