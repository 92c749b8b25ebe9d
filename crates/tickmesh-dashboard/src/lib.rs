//! Read-only monitoring surface for tickmesh.
//!
//! Serves the aggregated feed to anything outside the process:
//!
//! ```text
//!  GET /api/tickers           -> every resolved ticker
//!  GET /api/tickers/{symbol}  -> one ticker, 404 when unresolved
//!  GET /api/status            -> per-exchange connection state
//!  GET /metrics               -> Prometheus text exposition
//!  GET /ws                    -> snapshot, then every change event
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use tickmesh_dashboard::{run_server, DashboardConfig, DashboardState};
//!
//! let state = DashboardState::new(aggregator.clone(), status_source);
//! tokio::spawn(async move {
//!     if let Err(e) = run_server(state, DashboardConfig::default(), token).await {
//!         tracing::error!(error = %e, "Dashboard server failed");
//!     }
//! });
//! ```

mod broadcast;
mod config;
mod server;
mod state;
mod types;

pub use config::DashboardConfig;
pub use server::{create_router, run_server, serve, AppState, ConnectionLimiter};
pub use state::{DashboardState, StatusSource};
pub use types::{DashboardMessage, DashboardSnapshot};
