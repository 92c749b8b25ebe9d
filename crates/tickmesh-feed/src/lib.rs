//! Exchange ticker adapters and source aggregation for tickmesh.
//!
//! - `adapters`: one protocol adapter per exchange, normalizing wire frames
//!   into `TickerUpdate`
//! - `cache`: last-good value per symbol with bounded age
//! - `aggregator`: priority-with-freshness resolution and change events

pub mod adapters;
pub mod aggregator;
pub mod cache;
pub mod error;

pub use adapters::{
    BinanceAdapter, BybitAdapter, CoinbaseAdapter, ExchangeAdapter, KrakenAdapter, OkxAdapter,
    ParseStats,
};
pub use aggregator::{Aggregator, AggregatorConfig, TickerEvent};
pub use cache::{CacheEntry, DataCache};
pub use error::{FeedError, FeedResult};
