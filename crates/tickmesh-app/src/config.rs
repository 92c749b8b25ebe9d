//! Application configuration.
//!
//! A TOML file layered with `TICKMESH__SECTION__KEY` environment overrides.
//! Every field has a default, so an empty file yields a runnable service.

use std::collections::HashSet;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use tickmesh_core::{validate_priorities, CoreError, Exchange, ExchangeConfig, SymbolRegistry};
use tickmesh_dashboard::DashboardConfig;
use tickmesh_feed::AggregatorConfig;
use tickmesh_ws::quality::DEFAULT_MAX_SAMPLES;
use tickmesh_ws::{BackoffConfig, HeartbeatConfig};

use crate::error::{AppError, AppResult};

const ENV_PREFIX: &str = "TICKMESH";

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Canonical symbols to track.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,
    #[serde(default)]
    pub aggregator: AggregatorConfig,
    #[serde(default)]
    pub backoff: BackoffConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub quality: QualityConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
    /// Empty means all five exchanges with default priorities.
    #[serde(default)]
    pub exchanges: Vec<ExchangeEntry>,
}

fn default_symbols() -> Vec<String> {
    vec!["BTC".to_string(), "ETH".to_string(), "SOL".to_string()]
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            symbols: default_symbols(),
            aggregator: AggregatorConfig::default(),
            backoff: BackoffConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            quality: QualityConfig::default(),
            dashboard: DashboardConfig::default(),
            exchanges: Vec::new(),
        }
    }
}

/// Network quality detector settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityConfig {
    /// Connect-duration samples kept per connection, at most
    /// `DEFAULT_MAX_SAMPLES`.
    #[serde(default = "default_max_samples")]
    pub max_samples: usize,
}

fn default_max_samples() -> usize {
    DEFAULT_MAX_SAMPLES
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            max_samples: default_max_samples(),
        }
    }
}

/// One `[[exchanges]]` entry. Unset fields fall back to the built-in defaults
/// for that exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeEntry {
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub priority: Option<u8>,
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default)]
    pub combined_stream_url: Option<String>,
    #[serde(default)]
    pub max_symbols_per_connection: Option<usize>,
}

fn default_enabled() -> bool {
    true
}

impl ExchangeEntry {
    fn resolve(&self) -> AppResult<ExchangeConfig> {
        let exchange: Exchange = self.name.parse()?;
        let mut cfg = ExchangeConfig::default_for(exchange);
        if let Some(priority) = self.priority {
            cfg.priority = priority;
        }
        if let Some(url) = &self.endpoint_url {
            cfg.endpoint_url = url.clone();
        }
        if let Some(url) = &self.combined_stream_url {
            cfg.combined_stream_url = Some(url.clone());
        }
        if let Some(max) = self.max_symbols_per_connection {
            cfg.max_symbols_per_connection = max;
        }
        Ok(cfg)
    }
}

impl AppConfig {
    /// Load from a TOML file plus `TICKMESH__*` environment overrides.
    pub fn load(path: &str) -> AppResult<Self> {
        let settings = Config::builder()
            .add_source(File::new(path, FileFormat::Toml))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::Config(format!("Failed to read config {path}: {e}")))?;

        settings
            .try_deserialize()
            .map_err(|e| AppError::Config(format!("Failed to parse config {path}: {e}")))
    }

    pub fn from_toml_str(content: &str) -> AppResult<Self> {
        toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))
    }

    /// Enabled exchanges with overrides applied, in declaration order.
    pub fn resolved_exchanges(&self) -> AppResult<Vec<ExchangeConfig>> {
        if self.exchanges.is_empty() {
            return Ok(ExchangeConfig::defaults());
        }

        let mut seen = HashSet::new();
        let mut resolved = Vec::new();
        for entry in &self.exchanges {
            let cfg = entry.resolve()?;
            if !seen.insert(cfg.name) {
                return Err(AppError::Config(format!(
                    "exchange {} configured more than once",
                    cfg.name
                )));
            }
            if entry.enabled {
                resolved.push(cfg);
            }
        }
        Ok(resolved)
    }

    /// Fail fast on anything that would otherwise surface at runtime.
    pub fn validate(&self) -> AppResult<()> {
        if self.symbols.is_empty() {
            return Err(AppError::Config("symbols must not be empty".to_string()));
        }
        let registry = SymbolRegistry::builtin();
        for symbol in &self.symbols {
            registry.ensure_known(symbol)?;
        }

        let exchanges = self.resolved_exchanges()?;
        if exchanges.is_empty() {
            return Err(AppError::Config("no exchange is enabled".to_string()));
        }
        for cfg in &exchanges {
            cfg.validate()?;
        }
        validate_priorities(&exchanges)?;

        self.aggregator.validate()?;
        self.backoff.validate()?;
        self.heartbeat.validate()?;
        if !(1..=DEFAULT_MAX_SAMPLES).contains(&self.quality.max_samples) {
            return Err(CoreError::InvalidConfig(format!(
                "quality max_samples ({}) must be in 1..={}",
                self.quality.max_samples, DEFAULT_MAX_SAMPLES
            ))
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_is_valid() {
        let config = AppConfig::from_toml_str("").unwrap();
        assert_eq!(config.symbols, vec!["BTC", "ETH", "SOL"]);
        assert_eq!(config.aggregator.freshness_ms, 5_000);
        assert!(!config.dashboard.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_exchange_order() {
        let exchanges = AppConfig::default().resolved_exchanges().unwrap();
        let order: Vec<_> = exchanges.iter().map(|c| (c.name, c.priority)).collect();
        assert_eq!(
            order,
            vec![
                (Exchange::Binance, 1),
                (Exchange::Okx, 2),
                (Exchange::Bybit, 3),
                (Exchange::Kraken, 4),
                (Exchange::Coinbase, 5),
            ]
        );
    }

    #[test]
    fn test_entry_overrides_defaults() {
        let config = AppConfig::from_toml_str(
            r#"
            [[exchanges]]
            name = "kraken"
            priority = 1
            max_symbols_per_connection = 2

            [[exchanges]]
            name = "binance"
            enabled = false
            "#,
        )
        .unwrap();
        let exchanges = config.resolved_exchanges().unwrap();
        assert_eq!(exchanges.len(), 1);
        assert_eq!(exchanges[0].name, Exchange::Kraken);
        assert_eq!(exchanges[0].priority, 1);
        assert_eq!(exchanges[0].max_symbols_per_connection, 2);
        assert_eq!(exchanges[0].endpoint_url, "wss://ws.kraken.com");
    }
}
