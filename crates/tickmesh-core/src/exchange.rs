//! Exchange identification and static connection parameters.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Supported price-feed providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Exchange {
    Binance,
    Okx,
    Bybit,
    Kraken,
    Coinbase,
}

impl Exchange {
    /// All exchanges in default priority order.
    pub const ALL: [Exchange; 5] = [
        Exchange::Binance,
        Exchange::Okx,
        Exchange::Bybit,
        Exchange::Kraken,
        Exchange::Coinbase,
    ];

    /// Lowercase name used in config files, logs and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Binance => "binance",
            Self::Okx => "okx",
            Self::Bybit => "bybit",
            Self::Kraken => "kraken",
            Self::Coinbase => "coinbase",
        }
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Exchange {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "binance" => Ok(Self::Binance),
            "okx" => Ok(Self::Okx),
            "bybit" => Ok(Self::Bybit),
            "kraken" => Ok(Self::Kraken),
            "coinbase" => Ok(Self::Coinbase),
            other => Err(CoreError::UnknownExchange(other.to_string())),
        }
    }
}

/// Static per-exchange connection parameters.
///
/// Loaded once at startup and never mutated. `priority` is a total order
/// across enabled exchanges: lower value = more trusted source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// Exchange this config applies to.
    pub name: Exchange,
    /// Single-stream WebSocket endpoint.
    pub endpoint_url: String,
    /// Combined-stream endpoint prefix, for providers that encode streams in the URL.
    pub combined_stream_url: Option<String>,
    /// Maximum symbols carried by one socket before sharding.
    pub max_symbols_per_connection: usize,
    /// Source priority (lower = more trusted).
    pub priority: u8,
}

impl ExchangeConfig {
    /// Built-in defaults for an exchange.
    ///
    /// Default priority order is Binance > OKX > Bybit > Kraken > Coinbase.
    pub fn default_for(exchange: Exchange) -> Self {
        match exchange {
            Exchange::Binance => Self {
                name: exchange,
                endpoint_url: "wss://stream.binance.com:9443/ws".to_string(),
                combined_stream_url: Some(
                    "wss://stream.binance.com:9443/stream?streams=".to_string(),
                ),
                max_symbols_per_connection: 200,
                priority: 1,
            },
            Exchange::Okx => Self {
                name: exchange,
                endpoint_url: "wss://ws.okx.com:8443/ws/v5/public".to_string(),
                combined_stream_url: None,
                max_symbols_per_connection: 100,
                priority: 2,
            },
            Exchange::Bybit => Self {
                name: exchange,
                endpoint_url: "wss://stream.bybit.com/v5/public/spot".to_string(),
                combined_stream_url: None,
                max_symbols_per_connection: 50,
                priority: 3,
            },
            Exchange::Kraken => Self {
                name: exchange,
                endpoint_url: "wss://ws.kraken.com".to_string(),
                combined_stream_url: None,
                max_symbols_per_connection: 50,
                priority: 4,
            },
            Exchange::Coinbase => Self {
                name: exchange,
                endpoint_url: "wss://ws-feed.exchange.coinbase.com".to_string(),
                combined_stream_url: None,
                max_symbols_per_connection: 50,
                priority: 5,
            },
        }
    }

    /// Defaults for all five exchanges.
    pub fn defaults() -> Vec<Self> {
        Exchange::ALL.iter().map(|e| Self::default_for(*e)).collect()
    }

    /// Validate a single exchange config.
    pub fn validate(&self) -> Result<()> {
        if self.endpoint_url.is_empty() {
            return Err(CoreError::InvalidConfig(format!(
                "{}: endpoint_url is empty",
                self.name
            )));
        }
        if self.max_symbols_per_connection == 0 {
            return Err(CoreError::InvalidConfig(format!(
                "{}: max_symbols_per_connection must be > 0",
                self.name
            )));
        }
        Ok(())
    }
}

/// Check that priorities form a total order (no two exchanges share one).
pub fn validate_priorities(configs: &[ExchangeConfig]) -> Result<()> {
    let mut seen: HashMap<u8, Exchange> = HashMap::new();
    for cfg in configs {
        if let Some(other) = seen.insert(cfg.priority, cfg.name) {
            return Err(CoreError::InvalidConfig(format!(
                "priority {} assigned to both {} and {}",
                cfg.priority, other, cfg.name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exchange_from_str() {
        assert_eq!("Binance".parse::<Exchange>().unwrap(), Exchange::Binance);
        assert_eq!(" okx ".parse::<Exchange>().unwrap(), Exchange::Okx);
        assert!("ftx".parse::<Exchange>().is_err());
    }

    #[test]
    fn test_exchange_serde_lowercase() {
        let json = serde_json::to_string(&Exchange::Coinbase).unwrap();
        assert_eq!(json, "\"coinbase\"");
        let back: Exchange = serde_json::from_str("\"kraken\"").unwrap();
        assert_eq!(back, Exchange::Kraken);
    }

    #[test]
    fn test_default_priorities_are_distinct() {
        let defaults = ExchangeConfig::defaults();
        assert_eq!(defaults.len(), 5);
        assert!(validate_priorities(&defaults).is_ok());
        assert_eq!(defaults[0].name, Exchange::Binance);
        assert_eq!(defaults[0].priority, 1);
        assert_eq!(defaults[4].name, Exchange::Coinbase);
        assert_eq!(defaults[4].priority, 5);
    }

    #[test]
    fn test_priority_collision_rejected() {
        let mut configs = ExchangeConfig::defaults();
        configs[1].priority = 1;
        let err = validate_priorities(&configs).unwrap_err();
        assert!(err.to_string().contains("priority 1"));
    }

    #[test]
    fn test_zero_symbols_per_connection_rejected() {
        let mut cfg = ExchangeConfig::default_for(Exchange::Okx);
        cfg.max_symbols_per_connection = 0;
        assert!(cfg.validate().is_err());
    }
}
