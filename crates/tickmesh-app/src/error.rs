//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Core error: {0}")]
    Core(#[from] tickmesh_core::CoreError),

    #[error("Feed error: {0}")]
    Feed(#[from] tickmesh_feed::FeedError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] tickmesh_telemetry::TelemetryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;
