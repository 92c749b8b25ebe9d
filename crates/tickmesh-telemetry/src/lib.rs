//! Prometheus metrics and structured logging for tickmesh.
//!
//! - Prometheus collectors for connection health, feed flow and aggregation
//! - Structured logging with tracing (JSON in production)

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::Metrics;
