//! Last-good ticker cache.
//!
//! Holds the most recent update per symbol so consumers can still show a
//! degraded "last known" value while every source is down. Entries expire
//! after `max_age_ms`: lazily on read and in bulk via [`DataCache::clear_stale`].

use parking_lot::Mutex;
use std::collections::HashMap;
use tickmesh_core::{SharedClock, TickerUpdate};
use tickmesh_telemetry::Metrics;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub data: TickerUpdate,
    /// Clock time at insertion (ms).
    pub cached_at: u64,
}

impl CacheEntry {
    fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.cached_at)
    }
}

pub struct DataCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    max_age_ms: u64,
    clock: SharedClock,
}

impl DataCache {
    pub fn new(max_age_ms: u64, clock: SharedClock) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_age_ms,
            clock,
        }
    }

    pub fn max_age_ms(&self) -> u64 {
        self.max_age_ms
    }

    /// Store `data` under `key`, stamped with the current time.
    pub fn set(&self, key: &str, data: TickerUpdate) {
        let cached_at = self.clock.now_ms();
        let mut entries = self.entries.lock();
        entries.insert(key.to_string(), CacheEntry { data, cached_at });
        Metrics::cache_entries(entries.len());
    }

    /// Value for `key` if younger than `max_age_ms`. Expired entries are evicted.
    pub fn get(&self, key: &str) -> Option<TickerUpdate> {
        let now = self.clock.now_ms();
        let mut entries = self.entries.lock();
        let expired = entries.get(key)?.age_ms(now) >= self.max_age_ms;
        if !expired {
            return entries.get(key).map(|e| e.data.clone());
        }
        entries.remove(key);
        Metrics::cache_evicted(1);
        Metrics::cache_entries(entries.len());
        debug!(key, "Evicted expired cache entry");
        None
    }

    /// Whether `key` holds an unexpired value. Does not evict.
    pub fn has(&self, key: &str) -> bool {
        let now = self.clock.now_ms();
        self.entries
            .lock()
            .get(key)
            .is_some_and(|e| e.age_ms(now) < self.max_age_ms)
    }

    /// Age of the entry for `key`, expired or not. Does not evict.
    pub fn age_ms(&self, key: &str) -> Option<u64> {
        let now = self.clock.now_ms();
        self.entries.lock().get(key).map(|e| e.age_ms(now))
    }

    /// Evict every expired entry. Returns the number removed.
    pub fn clear_stale(&self) -> usize {
        let now = self.clock.now_ms();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| e.age_ms(now) < self.max_age_ms);
        let removed = before - entries.len();
        if removed > 0 {
            Metrics::cache_evicted(removed);
            debug!(removed, remaining = entries.len(), "Cleared stale cache entries");
        }
        Metrics::cache_entries(entries.len());
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tickmesh_core::{Exchange, ManualClock};

    const MAX_AGE: u64 = 300_000;

    fn update(symbol: &str, price: f64) -> TickerUpdate {
        TickerUpdate {
            symbol: symbol.to_string(),
            price,
            change_24h_percent: 0.5,
            high_24h: price,
            low_24h: price,
            volume_24h: 10.0,
            source: Exchange::Kraken,
            observed_at: 1_000,
            exchange_ts: None,
        }
    }

    fn cache() -> (Arc<ManualClock>, DataCache) {
        let clock = Arc::new(ManualClock::new(1_000));
        let cache = DataCache::new(MAX_AGE, clock.clone());
        (clock, cache)
    }

    #[test]
    fn test_set_then_get_round_trips() {
        let (_, cache) = cache();
        let u = update("BTC", 50_000.0);
        cache.set("BTC", u.clone());
        assert_eq!(cache.get("BTC"), Some(u));
        assert!(cache.has("BTC"));
        assert_eq!(cache.age_ms("BTC"), Some(0));
    }

    #[test]
    fn test_expiry_boundary() {
        let (clock, cache) = cache();
        cache.set("BTC", update("BTC", 1.0));

        clock.advance(MAX_AGE - 1);
        assert!(cache.get("BTC").is_some());

        clock.advance(1);
        assert!(!cache.has("BTC"));
        assert_eq!(cache.age_ms("BTC"), Some(MAX_AGE));
        assert!(cache.get("BTC").is_none());
        // Evicted on read.
        assert_eq!(cache.age_ms("BTC"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_set_refreshes_timestamp() {
        let (clock, cache) = cache();
        cache.set("ETH", update("ETH", 1.0));
        clock.advance(MAX_AGE - 10);
        cache.set("ETH", update("ETH", 2.0));
        clock.advance(100);
        assert_eq!(cache.get("ETH").map(|u| u.price), Some(2.0));
    }

    #[test]
    fn test_clear_stale_sweeps_only_expired() {
        let (clock, cache) = cache();
        cache.set("BTC", update("BTC", 1.0));
        clock.advance(200_000);
        cache.set("ETH", update("ETH", 1.0));
        clock.advance(100_000);

        assert_eq!(cache.clear_stale(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.has("ETH"));
        assert_eq!(cache.clear_stale(), 0);
    }

    #[test]
    fn test_missing_key() {
        let (_, cache) = cache();
        assert!(cache.get("SOL").is_none());
        assert!(!cache.has("SOL"));
        assert_eq!(cache.age_ms("SOL"), None);
    }
}
