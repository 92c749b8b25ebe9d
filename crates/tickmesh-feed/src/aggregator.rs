//! Per-symbol source aggregation.
//!
//! Every exchange's updates land here through one channel. For each symbol
//! the aggregator keeps the latest update per exchange and resolves a single
//! [`AggregatedTicker`]:
//!
//! 1. Among updates younger than `freshness_ms`, the lowest priority value
//!    wins; ties go to the most recent `observed_at`.
//! 2. With no fresh source, the cached last-good value is served with
//!    `is_live = false` until it ages out of the cache.
//!
//! Resolution happens at query time, so liveness is always current. Change
//! events are published on ingest and by the periodic sweep.

use crate::cache::DataCache;
use crate::error::FeedResult;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tickmesh_core::{
    validate_priorities, AggregatedTicker, CoreError, Exchange, ExchangeConfig, SharedClock,
    TickerUpdate,
};
use tickmesh_telemetry::Metrics;
use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Priority given to an exchange missing from the configured order.
const UNRANKED_PRIORITY: u8 = u8::MAX;

/// Aggregation timing and queue sizes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Max update age that still counts as live.
    #[serde(default = "default_freshness_ms")]
    pub freshness_ms: u64,
    /// Max age of the last-good cache entry.
    #[serde(default = "default_cache_max_age_ms")]
    pub cache_max_age_ms: u64,
    /// Period of the stale sweep.
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
    /// Connection -> aggregator queue depth.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Change-event feed depth.
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
}

fn default_freshness_ms() -> u64 {
    5_000
}

fn default_cache_max_age_ms() -> u64 {
    300_000
}

fn default_sweep_interval_ms() -> u64 {
    30_000
}

fn default_channel_capacity() -> usize {
    4_096
}

fn default_broadcast_capacity() -> usize {
    1_024
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            freshness_ms: default_freshness_ms(),
            cache_max_age_ms: default_cache_max_age_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
            channel_capacity: default_channel_capacity(),
            broadcast_capacity: default_broadcast_capacity(),
        }
    }
}

impl AggregatorConfig {
    pub fn validate(&self) -> Result<(), CoreError> {
        let zero = [
            ("freshness_ms", self.freshness_ms == 0),
            ("cache_max_age_ms", self.cache_max_age_ms == 0),
            ("sweep_interval_ms", self.sweep_interval_ms == 0),
            ("channel_capacity", self.channel_capacity == 0),
            ("broadcast_capacity", self.broadcast_capacity == 0),
        ];
        if let Some((field, _)) = zero.iter().find(|(_, is_zero)| *is_zero) {
            return Err(CoreError::InvalidConfig(format!(
                "aggregator.{} must be > 0",
                field
            )));
        }
        Ok(())
    }
}

/// Change event on the aggregated feed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TickerEvent {
    /// New resolved value, or the same value changing liveness.
    Update(AggregatedTicker),
    /// No live source and nothing cached anymore.
    Cleared { symbol: String },
}

impl TickerEvent {
    pub fn symbol(&self) -> &str {
        match self {
            TickerEvent::Update(t) => &t.symbol,
            TickerEvent::Cleared { symbol } => symbol,
        }
    }
}

#[derive(Debug, Default)]
struct SymbolSlot {
    /// Latest update per exchange, in receipt order.
    latest: HashMap<Exchange, TickerUpdate>,
    /// Last value published on the event feed.
    published: Option<AggregatedTicker>,
}

pub struct Aggregator {
    config: AggregatorConfig,
    priorities: HashMap<Exchange, u8>,
    slots: DashMap<String, Arc<RwLock<SymbolSlot>>>,
    cache: DataCache,
    clock: SharedClock,
    events_tx: broadcast::Sender<TickerEvent>,
}

impl Aggregator {
    /// Build an aggregator ranking sources by `exchanges[..].priority`.
    pub fn new(
        config: AggregatorConfig,
        exchanges: &[ExchangeConfig],
        clock: SharedClock,
    ) -> FeedResult<Self> {
        config.validate()?;
        validate_priorities(exchanges)?;

        let priorities = exchanges.iter().map(|e| (e.name, e.priority)).collect();
        let (events_tx, _) = broadcast::channel(config.broadcast_capacity);
        Ok(Self {
            cache: DataCache::new(config.cache_max_age_ms, clock.clone()),
            config,
            priorities,
            slots: DashMap::new(),
            clock,
            events_tx,
        })
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    pub fn priority(&self, exchange: Exchange) -> u8 {
        self.priorities
            .get(&exchange)
            .copied()
            .unwrap_or(UNRANKED_PRIORITY)
    }

    pub fn cache(&self) -> &DataCache {
        &self.cache
    }

    /// Change-event feed.
    pub fn subscribe(&self) -> broadcast::Receiver<TickerEvent> {
        self.events_tx.subscribe()
    }

    /// Apply one update. Returns the event published, if the resolved value changed.
    pub fn ingest(&self, update: TickerUpdate) -> Option<TickerEvent> {
        let now = self.clock.now_ms();
        let symbol = update.symbol.clone();
        self.cache.set(&symbol, update.clone());

        // Holding the map entry keeps a concurrent sweep from dropping the
        // slot between insert and write.
        let entry = self.slots.entry(symbol.clone()).or_default();
        let mut slot = entry.write();
        slot.latest.insert(update.source, update);
        let resolved = self.resolve(&slot, &symbol, now);
        self.publish_if_changed(&mut slot, &symbol, resolved)
    }

    /// Resolved value for `symbol` as of now.
    pub fn get_aggregated(&self, symbol: &str) -> Option<AggregatedTicker> {
        let now = self.clock.now_ms();
        match self.slot(symbol) {
            Some(slot) => self.resolve(&slot.read(), symbol, now),
            None => self.from_cache(symbol, now),
        }
    }

    /// Resolved values for every symbol that has one, sorted by symbol.
    pub fn snapshot(&self) -> Vec<AggregatedTicker> {
        let mut symbols: Vec<String> = self.slots.iter().map(|e| e.key().clone()).collect();
        symbols.sort();
        symbols
            .iter()
            .filter_map(|s| self.get_aggregated(s))
            .collect()
    }

    /// Evict expired cache entries and publish liveness changes.
    ///
    /// Returns the number of events published.
    pub fn sweep(&self) -> usize {
        let evicted = self.cache.clear_stale();
        let now = self.clock.now_ms();
        let max_age = self.config.cache_max_age_ms;

        let slots: Vec<(String, Arc<RwLock<SymbolSlot>>)> = self
            .slots
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        let mut published = 0;
        for (symbol, slot) in &slots {
            let mut slot = slot.write();
            slot.latest.retain(|_, u| u.age_ms(now) < max_age);
            let resolved = self.resolve(&slot, symbol, now);
            if self.publish_if_changed(&mut slot, symbol, resolved).is_some() {
                published += 1;
            }
        }

        self.slots.retain(|_, slot| {
            let slot = slot.read();
            !slot.latest.is_empty() || slot.published.is_some()
        });

        debug!(evicted, published, symbols = self.slots.len(), "Aggregator sweep");
        published
    }

    /// Consume updates until the channel closes or `token` is cancelled.
    pub async fn run(&self, mut rx: mpsc::Receiver<TickerUpdate>, token: CancellationToken) {
        info!("Aggregator started");
        loop {
            tokio::select! {
                biased;
                () = token.cancelled() => break,
                update = rx.recv() => match update {
                    Some(update) => {
                        self.ingest(update);
                    }
                    None => break,
                },
            }
        }
        info!("Aggregator stopped");
    }

    /// Run [`Aggregator::sweep`] every `sweep_interval_ms` until cancelled.
    pub async fn run_sweeper(&self, token: CancellationToken) {
        let period = Duration::from_millis(self.config.sweep_interval_ms);
        let mut timer = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                () = token.cancelled() => break,
                _ = timer.tick() => {
                    self.sweep();
                }
            }
        }
    }

    fn slot(&self, symbol: &str) -> Option<Arc<RwLock<SymbolSlot>>> {
        self.slots.get(symbol).map(|e| e.value().clone())
    }

    fn resolve(&self, slot: &SymbolSlot, symbol: &str, now: u64) -> Option<AggregatedTicker> {
        let best = slot
            .latest
            .values()
            .filter(|u| u.age_ms(now) < self.config.freshness_ms)
            .min_by(|a, b| {
                self.priority(a.source)
                    .cmp(&self.priority(b.source))
                    .then_with(|| b.observed_at.cmp(&a.observed_at))
            });

        match best {
            Some(update) => Some(AggregatedTicker::from_update(update, true, now)),
            None => self.from_cache(symbol, now),
        }
    }

    fn from_cache(&self, symbol: &str, now: u64) -> Option<AggregatedTicker> {
        self.cache
            .get(symbol)
            .map(|u| AggregatedTicker::from_update(&u, false, now))
    }

    fn publish_if_changed(
        &self,
        slot: &mut SymbolSlot,
        symbol: &str,
        resolved: Option<AggregatedTicker>,
    ) -> Option<TickerEvent> {
        if let (Some(prev), Some(next)) = (&slot.published, &resolved) {
            if prev.same_value(next) {
                return None;
            }
        }

        let event = match resolved {
            Some(next) => {
                if slot.published.as_ref().map(|p| p.is_live) != Some(next.is_live) {
                    info!(
                        symbol,
                        source = %next.source,
                        is_live = next.is_live,
                        age_ms = next.age_ms,
                        "Aggregated liveness changed"
                    );
                }
                Metrics::aggregated(symbol, next.is_live, self.priority(next.source));
                slot.published = Some(next.clone());
                TickerEvent::Update(next)
            }
            None => {
                slot.published.take()?;
                info!(symbol, "Aggregated value cleared");
                Metrics::aggregated_cleared(symbol);
                TickerEvent::Cleared {
                    symbol: symbol.to_string(),
                }
            }
        };

        // No subscribers is fine.
        let _ = self.events_tx.send(event.clone());
        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tickmesh_core::ManualClock;
    use tokio_test::assert_ok;

    const T0: u64 = 1_700_000_000_000;

    fn update(source: Exchange, symbol: &str, price: f64, observed_at: u64) -> TickerUpdate {
        TickerUpdate {
            symbol: symbol.to_string(),
            price,
            change_24h_percent: 1.0,
            high_24h: price,
            low_24h: price,
            volume_24h: 100.0,
            source,
            observed_at,
            exchange_ts: None,
        }
    }

    fn aggregator() -> (Arc<ManualClock>, Aggregator) {
        let clock = Arc::new(ManualClock::new(T0));
        let agg = Aggregator::new(
            AggregatorConfig::default(),
            &ExchangeConfig::defaults(),
            clock.clone(),
        )
        .unwrap();
        (clock, agg)
    }

    #[test]
    fn test_fresh_higher_priority_wins_regardless_of_order() {
        let (clock, agg) = aggregator();
        agg.ingest(update(Exchange::Okx, "BTC", 50_010.0, T0));
        clock.advance(100);
        agg.ingest(update(Exchange::Binance, "BTC", 50_000.0, T0 + 100));
        clock.advance(100);
        agg.ingest(update(Exchange::Okx, "BTC", 50_020.0, T0 + 200));

        let t = agg.get_aggregated("BTC").unwrap();
        assert_eq!(t.source, Exchange::Binance);
        assert_eq!(t.price, 50_000.0);
        assert!(t.is_live);
        assert_eq!(t.age_ms, 100);
    }

    #[test]
    fn test_fresh_lower_priority_beats_stale_higher_priority() {
        let (clock, agg) = aggregator();
        agg.ingest(update(Exchange::Binance, "ETH", 3_000.0, T0));
        clock.advance(6_000);
        agg.ingest(update(Exchange::Okx, "ETH", 3_001.0, T0 + 6_000));

        let t = agg.get_aggregated("ETH").unwrap();
        assert_eq!(t.source, Exchange::Okx);
        assert!(t.is_live);
    }

    #[test]
    fn test_equal_priority_prefers_newest() {
        let clock = Arc::new(ManualClock::new(T0));
        let only_binance = vec![ExchangeConfig::default_for(Exchange::Binance)];
        let agg = Aggregator::new(AggregatorConfig::default(), &only_binance, clock.clone())
            .unwrap();
        assert_eq!(agg.priority(Exchange::Kraken), UNRANKED_PRIORITY);

        agg.ingest(update(Exchange::Kraken, "SOL", 150.0, T0));
        clock.advance(500);
        agg.ingest(update(Exchange::Coinbase, "SOL", 151.0, T0 + 500));

        assert_eq!(agg.get_aggregated("SOL").unwrap().source, Exchange::Coinbase);
    }

    #[test]
    fn test_silent_binance_yields_to_okx_after_freshness_window() {
        let (clock, agg) = aggregator();
        agg.ingest(update(Exchange::Binance, "BTC", 50_000.0, T0));
        assert_eq!(agg.get_aggregated("BTC").unwrap().source, Exchange::Binance);

        clock.advance(1_000);
        agg.ingest(update(Exchange::Okx, "BTC", 50_010.0, T0 + 1_000));
        assert_eq!(agg.get_aggregated("BTC").unwrap().source, Exchange::Binance);

        clock.set(T0 + 5_000);
        let t = agg.get_aggregated("BTC").unwrap();
        assert_eq!(t.source, Exchange::Okx);
        assert_eq!(t.price, 50_010.0);
        assert!(t.is_live);
    }

    #[test]
    fn test_total_outage_serves_cache_until_max_age() {
        let (clock, agg) = aggregator();
        agg.ingest(update(Exchange::Binance, "BTC", 50_000.0, T0));

        clock.advance(5_000);
        let t = agg.get_aggregated("BTC").unwrap();
        assert!(!t.is_live);
        assert_eq!(t.price, 50_000.0);
        assert_eq!(t.age_ms, 5_000);

        clock.set(T0 + 299_999);
        let t = agg.get_aggregated("BTC").unwrap();
        assert!(!t.is_live);
        assert_eq!(t.age_ms, 299_999);

        clock.set(T0 + 300_000);
        assert!(agg.get_aggregated("BTC").is_none());
        assert!(agg.get_aggregated("DOGE").is_none());
    }

    #[test]
    fn test_ingest_publishes_only_on_change() {
        let (clock, agg) = aggregator();
        let mut rx = agg.subscribe();

        let event = agg.ingest(update(Exchange::Binance, "BTC", 50_000.0, T0)).unwrap();
        assert_eq!(event.symbol(), "BTC");

        // Lower-priority tick while Binance is fresh changes nothing.
        clock.advance(10);
        assert!(agg.ingest(update(Exchange::Kraken, "BTC", 49_990.0, T0 + 10)).is_none());

        match rx.try_recv().unwrap() {
            TickerEvent::Update(t) => {
                assert_eq!(t.source, Exchange::Binance);
                assert!(t.is_live);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_sweep_publishes_degradation_and_clearing() {
        let (clock, agg) = aggregator();
        agg.ingest(update(Exchange::Bybit, "XRP", 0.6, T0));
        let mut rx = agg.subscribe();

        clock.advance(5_000);
        assert_eq!(agg.sweep(), 1);
        match rx.try_recv().unwrap() {
            TickerEvent::Update(t) => {
                assert!(!t.is_live);
                assert_eq!(t.source, Exchange::Bybit);
            }
            other => panic!("unexpected event {:?}", other),
        }

        // Nothing new until the cache entry expires.
        clock.advance(1_000);
        assert_eq!(agg.sweep(), 0);

        clock.set(T0 + 300_000);
        assert_eq!(agg.sweep(), 1);
        assert_eq!(
            rx.try_recv().unwrap(),
            TickerEvent::Cleared {
                symbol: "XRP".to_string()
            }
        );
        assert!(agg.snapshot().is_empty());
        assert!(agg.cache().is_empty());
    }

    #[test]
    fn test_snapshot_sorted() {
        let (_, agg) = aggregator();
        agg.ingest(update(Exchange::Okx, "SOL", 150.0, T0));
        agg.ingest(update(Exchange::Okx, "BTC", 50_000.0, T0));
        agg.ingest(update(Exchange::Okx, "ETH", 3_000.0, T0));

        let symbols: Vec<String> = agg.snapshot().into_iter().map(|t| t.symbol).collect();
        assert_eq!(symbols, vec!["BTC", "ETH", "SOL"]);
    }

    #[test]
    fn test_config_validation() {
        let clock: SharedClock = Arc::new(ManualClock::new(0));
        let bad = AggregatorConfig {
            freshness_ms: 0,
            ..Default::default()
        };
        assert!(Aggregator::new(bad, &ExchangeConfig::defaults(), clock.clone()).is_err());

        let mut clash = ExchangeConfig::defaults();
        clash[1].priority = clash[0].priority;
        assert!(Aggregator::new(AggregatorConfig::default(), &clash, clock.clone()).is_err());

        assert_ok!(AggregatorConfig::default().validate());
    }

    #[tokio::test]
    async fn test_run_consumes_channel_until_closed() {
        let (_, agg) = aggregator();
        let agg = Arc::new(agg);
        let (tx, rx) = mpsc::channel(16);
        let token = CancellationToken::new();

        let runner = agg.clone();
        let task = tokio::spawn(async move { runner.run(rx, token).await });

        tx.send(update(Exchange::Coinbase, "LTC", 70.0, T0)).await.unwrap();
        tx.send(update(Exchange::Kraken, "LTC", 70.5, T0)).await.unwrap();
        drop(tx);
        task.await.unwrap();

        let t = agg.get_aggregated("LTC").unwrap();
        assert_eq!(t.source, Exchange::Kraken);
    }

    #[test]
    fn test_new_symbols_survive_concurrent_sweeps() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let (_clock, agg) = aggregator();
        let done = AtomicBool::new(false);

        let orphaned = std::thread::scope(|s| {
            s.spawn(|| {
                while !done.load(Ordering::Relaxed) {
                    agg.sweep();
                }
            });
            let ingester = s.spawn(|| {
                let mut orphaned = Vec::new();
                for i in 0..5_000 {
                    let symbol = format!("SYM{i}");
                    agg.ingest(update(Exchange::Binance, &symbol, 1.0, T0));
                    if !agg.get_aggregated(&symbol).is_some_and(|t| t.is_live) {
                        orphaned.push(symbol);
                    }
                }
                done.store(true, Ordering::Relaxed);
                orphaned
            });
            ingester.join().unwrap()
        });

        assert!(orphaned.is_empty(), "lost slots: {orphaned:?}");
        assert_eq!(agg.snapshot().len(), 5_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_runs_on_interval() {
        let (clock, agg) = aggregator();
        let agg = Arc::new(agg);
        agg.ingest(update(Exchange::Binance, "ADA", 0.4, T0));
        let mut rx = agg.subscribe();

        let token = CancellationToken::new();
        let runner = agg.clone();
        let child = token.clone();
        let task = tokio::spawn(async move { runner.run_sweeper(child).await });

        clock.advance(10_000);
        tokio::time::sleep(Duration::from_millis(30_001)).await;

        match rx.try_recv().unwrap() {
            TickerEvent::Update(t) => assert!(!t.is_live),
            other => panic!("unexpected event {:?}", other),
        }

        token.cancel();
        task.await.unwrap();
    }
}
