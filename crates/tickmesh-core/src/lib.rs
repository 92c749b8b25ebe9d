//! Core domain types for the tickmesh market-data layer.
//!
//! This crate provides the types shared by every other tickmesh crate:
//! - `Exchange`, `ExchangeConfig`: the five supported price-feed providers
//! - `SymbolRegistry`: canonical symbol <-> provider symbol mapping
//! - `TickerUpdate`, `AggregatedTicker`: normalized and resolved ticker values
//! - `Clock`: time source, swappable in tests

pub mod clock;
pub mod error;
pub mod exchange;
pub mod symbol;
pub mod ticker;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use error::{CoreError, Result};
pub use exchange::{validate_priorities, Exchange, ExchangeConfig};
pub use symbol::SymbolRegistry;
pub use ticker::{AggregatedTicker, TickerUpdate};
