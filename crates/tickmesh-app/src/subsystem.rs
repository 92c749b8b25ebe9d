//! Top-level ingestion subsystem.
//!
//! Owns every connection task, the aggregator and its sweeper. Each exchange
//! gets one [`ConnectionManager`] per shard of at most
//! `max_symbols_per_connection` symbols; all shards feed one mpsc channel that
//! the aggregator drains.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tickmesh_core::{
    AggregatedTicker, Exchange, ExchangeConfig, SharedClock, SymbolRegistry, TickerUpdate,
};
use tickmesh_dashboard::StatusSource;
use tickmesh_feed::{
    Aggregator, BinanceAdapter, BybitAdapter, CoinbaseAdapter, KrakenAdapter, OkxAdapter,
    TickerEvent,
};
use tickmesh_telemetry::Metrics;
use tickmesh_ws::{
    ConnectionConfig, ConnectionEvent, ConnectionManager, ConnectionState, ExchangeStatus,
    StateTransition, StreamProtocol,
};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::error::AppResult;

struct ExchangeHandle {
    disable: CancellationToken,
    states: Vec<watch::Receiver<ConnectionState>>,
}

pub struct Subsystem {
    aggregator: Arc<Aggregator>,
    exchanges: HashMap<Exchange, ExchangeHandle>,
    /// Exchanges in configured order, for stable status output.
    order: Vec<Exchange>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Subsystem {
    /// Validate `config` and spawn every task. Must be called inside a tokio
    /// runtime.
    pub fn start(config: &AppConfig, clock: SharedClock) -> AppResult<Self> {
        config.validate()?;

        let registry = Arc::new(SymbolRegistry::builtin());
        let exchange_configs = config.resolved_exchanges()?;
        let aggregator = Arc::new(Aggregator::new(
            config.aggregator.clone(),
            &exchange_configs,
            clock.clone(),
        )?);

        let shutdown = CancellationToken::new();
        let (ticker_tx, ticker_rx) = mpsc::channel(config.aggregator.channel_capacity);
        let mut tasks = Vec::new();
        let mut exchanges = HashMap::new();
        let mut order = Vec::new();

        for exchange_config in exchange_configs {
            let exchange = exchange_config.name;
            let symbols = registry.resolve_all(&config.symbols, exchange);
            if symbols.is_empty() {
                warn!(%exchange, "No configured symbol is listed; skipping exchange");
                continue;
            }

            let spawner = ShardSpawner {
                config,
                exchange_config: &exchange_config,
                ticker_tx: &ticker_tx,
                clock: &clock,
                shutdown: &shutdown,
                disable: CancellationToken::new(),
            };
            let handle = match exchange {
                Exchange::Binance => spawner.spawn(
                    Arc::new(BinanceAdapter::new(registry.clone(), clock.clone())),
                    &symbols,
                    &mut tasks,
                ),
                Exchange::Okx => spawner.spawn(
                    Arc::new(OkxAdapter::new(registry.clone(), clock.clone())),
                    &symbols,
                    &mut tasks,
                ),
                Exchange::Bybit => spawner.spawn(
                    Arc::new(BybitAdapter::new(registry.clone(), clock.clone())),
                    &symbols,
                    &mut tasks,
                ),
                Exchange::Kraken => spawner.spawn(
                    Arc::new(KrakenAdapter::new(registry.clone(), clock.clone())),
                    &symbols,
                    &mut tasks,
                ),
                Exchange::Coinbase => spawner.spawn(
                    Arc::new(CoinbaseAdapter::new(registry.clone(), clock.clone())),
                    &symbols,
                    &mut tasks,
                ),
            };
            info!(
                %exchange,
                symbols = symbols.len(),
                connections = handle.states.len(),
                "Exchange started"
            );
            exchanges.insert(exchange, handle);
            order.push(exchange);
        }
        // Connections hold the only remaining senders.
        drop(ticker_tx);

        let agg = aggregator.clone();
        let token = shutdown.clone();
        tasks.push(tokio::spawn(async move { agg.run(ticker_rx, token).await }));

        let agg = aggregator.clone();
        let token = shutdown.clone();
        tasks.push(tokio::spawn(async move { agg.run_sweeper(token).await }));

        Ok(Self {
            aggregator,
            exchanges,
            order,
            shutdown,
            tasks: Mutex::new(tasks),
        })
    }

    pub fn aggregator(&self) -> Arc<Aggregator> {
        self.aggregator.clone()
    }

    pub fn get_aggregated(&self, symbol: &str) -> Option<AggregatedTicker> {
        self.aggregator.get_aggregated(symbol)
    }

    pub fn snapshot(&self) -> Vec<AggregatedTicker> {
        self.aggregator.snapshot()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TickerEvent> {
        self.aggregator.subscribe()
    }

    /// Connection states per running exchange, in configured order.
    pub fn exchange_status(&self) -> Vec<ExchangeStatus> {
        self.order
            .iter()
            .filter_map(|exchange| {
                let handle = self.exchanges.get(exchange)?;
                let states = handle.states.iter().map(|rx| *rx.borrow()).collect();
                Some(ExchangeStatus::from_connections(*exchange, states))
            })
            .collect()
    }

    /// Stop every connection of `exchange` for good. Returns false when the
    /// exchange is not running.
    pub fn disable_exchange(&self, exchange: Exchange) -> bool {
        match self.exchanges.get(&exchange) {
            Some(handle) => {
                info!(%exchange, "Disabling exchange");
                handle.disable.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel all tasks and wait for them to finish.
    pub async fn shutdown(&self) {
        info!("Shutting down subsystem");
        self.shutdown.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Subsystem task panicked");
            }
        }
        info!("Subsystem stopped");
    }
}

impl StatusSource for Subsystem {
    fn exchange_status(&self) -> Vec<ExchangeStatus> {
        Subsystem::exchange_status(self)
    }
}

/// Spawns the shard connections of one exchange.
struct ShardSpawner<'a> {
    config: &'a AppConfig,
    exchange_config: &'a ExchangeConfig,
    ticker_tx: &'a mpsc::Sender<TickerUpdate>,
    clock: &'a SharedClock,
    shutdown: &'a CancellationToken,
    disable: CancellationToken,
}

impl ShardSpawner<'_> {
    fn spawn<P: StreamProtocol>(
        self,
        protocol: Arc<P>,
        symbols: &[String],
        tasks: &mut Vec<JoinHandle<()>>,
    ) -> ExchangeHandle {
        let exchange = self.exchange_config.name;
        let mut states = Vec::new();

        for (conn, shard) in symbols
            .chunks(self.exchange_config.max_symbols_per_connection)
            .enumerate()
        {
            let mut conn_config =
                ConnectionConfig::new(self.exchange_config.clone(), conn, shard.to_vec());
            conn_config.backoff = self.config.backoff.clone();
            conn_config.heartbeat = self.config.heartbeat.clone();
            conn_config.quality_samples = self.config.quality.max_samples;

            let manager = Arc::new(ConnectionManager::new(
                conn_config,
                protocol.clone(),
                self.ticker_tx.clone(),
                self.clock.clone(),
                self.shutdown.clone(),
                self.disable.clone(),
            ));
            states.push(manager.watch());
            Metrics::ws_state_set(exchange, conn, manager.state().as_str());

            tasks.push(tokio::spawn(record_transitions(manager.subscribe())));
            tasks.push(tokio::spawn(async move {
                if let Err(e) = manager.run().await {
                    error!(
                        exchange = %manager.exchange(),
                        conn = manager.conn(),
                        error = %e,
                        "Connection task ended with error"
                    );
                }
            }));
        }

        ExchangeHandle {
            disable: self.disable,
            states,
        }
    }
}

/// Mirror state transitions into metrics until the connection is dropped.
async fn record_transitions(mut rx: broadcast::Receiver<StateTransition>) {
    loop {
        let transition = match rx.recv().await {
            Ok(t) => t,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                debug!(skipped = n, "Transition listener lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        let exchange = transition.exchange;
        Metrics::ws_state_set(exchange, transition.conn, transition.to.as_str());
        if transition.to == ConnectionState::Reconnecting {
            Metrics::ws_reconnect(exchange, transition.event.as_str());
        }
        if transition.event == ConnectionEvent::Stale {
            Metrics::heartbeat_timeout(exchange);
        }
        if let Some(ms) = transition.connect_duration_ms {
            Metrics::connect_duration(exchange, ms as f64);
        }
    }
}
