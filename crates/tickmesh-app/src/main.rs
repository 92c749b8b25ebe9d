//! tickmesh - multi-exchange ticker ingestion service.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tickmesh_app::{AppConfig, Subsystem};
use tickmesh_core::SystemClock;
use tickmesh_dashboard::{run_server, DashboardState};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Multi-exchange ticker ingestion service
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via TICKMESH_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Must run before any TLS connection is opened.
    tickmesh_ws::init_crypto();

    let args = Args::parse();

    tickmesh_telemetry::init_logging()?;

    info!("Starting tickmesh v{}", env!("CARGO_PKG_VERSION"));

    // CLI arg > TICKMESH_CONFIG env var > default
    let config_path = args
        .config
        .or_else(|| std::env::var("TICKMESH_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());

    info!(config_path = %config_path, "Loading configuration");
    let config = AppConfig::load(&config_path)?;
    config.validate()?;
    info!(
        symbols = ?config.symbols,
        dashboard = config.dashboard.enabled,
        "Configuration loaded"
    );

    let subsystem = Arc::new(Subsystem::start(&config, SystemClock::shared())?);

    let dashboard_token = CancellationToken::new();
    let dashboard = if config.dashboard.enabled {
        let state = DashboardState::new(subsystem.aggregator(), subsystem.clone());
        let dashboard_config = config.dashboard.clone();
        let token = dashboard_token.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = run_server(state, dashboard_config, token).await {
                error!(error = %e, "Dashboard server failed");
            }
        }))
    } else {
        None
    };

    tokio::signal::ctrl_c().await?;
    info!("Ctrl-C received");

    dashboard_token.cancel();
    if let Some(handle) = dashboard {
        if let Err(e) = handle.await {
            error!(error = %e, "Dashboard task panicked");
        }
    }
    subsystem.shutdown().await;

    info!("tickmesh stopped");
    Ok(())
}
