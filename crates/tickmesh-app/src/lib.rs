//! tickmesh service wiring.
//!
//! Loads and validates [`AppConfig`], then starts a [`Subsystem`]: one
//! connection task per exchange shard feeding a single aggregator.

pub mod config;
pub mod error;
pub mod subsystem;

pub use config::{AppConfig, ExchangeEntry, QualityConfig};
pub use error::{AppError, AppResult};
pub use subsystem::Subsystem;
