//! Static symbol-mapping tables.
//!
//! Every exchange quotes the same asset differently (`BTCUSDT`, `BTC-USDT`,
//! `XBT/USD`, `BTC-USD`). The registry maps canonical codes to provider
//! symbols and back. It is built once and shared read-only.

use crate::error::{CoreError, Result};
use crate::exchange::Exchange;
use std::collections::HashMap;

/// One row of the mapping table: canonical code and its per-exchange symbol.
struct SymbolRow {
    canonical: &'static str,
    binance: Option<&'static str>,
    okx: Option<&'static str>,
    bybit: Option<&'static str>,
    kraken: Option<&'static str>,
    coinbase: Option<&'static str>,
}

impl SymbolRow {
    fn provider(&self, exchange: Exchange) -> Option<&'static str> {
        match exchange {
            Exchange::Binance => self.binance,
            Exchange::Okx => self.okx,
            Exchange::Bybit => self.bybit,
            Exchange::Kraken => self.kraken,
            Exchange::Coinbase => self.coinbase,
        }
    }
}

macro_rules! row {
    ($c:literal, $bn:expr, $ok:expr, $by:expr, $kr:expr, $cb:expr) => {
        SymbolRow {
            canonical: $c,
            binance: $bn,
            okx: $ok,
            bybit: $by,
            kraken: $kr,
            coinbase: $cb,
        }
    };
}

// USDT pairs on Binance/OKX/Bybit, USD pairs on Kraken/Coinbase.
// Kraken keeps its legacy codes for BTC (XBT) and DOGE (XDG).
const SYMBOL_TABLE: &[SymbolRow] = &[
    row!("BTC", Some("BTCUSDT"), Some("BTC-USDT"), Some("BTCUSDT"), Some("XBT/USD"), Some("BTC-USD")),
    row!("ETH", Some("ETHUSDT"), Some("ETH-USDT"), Some("ETHUSDT"), Some("ETH/USD"), Some("ETH-USD")),
    row!("SOL", Some("SOLUSDT"), Some("SOL-USDT"), Some("SOLUSDT"), Some("SOL/USD"), Some("SOL-USD")),
    row!("XRP", Some("XRPUSDT"), Some("XRP-USDT"), Some("XRPUSDT"), Some("XRP/USD"), Some("XRP-USD")),
    row!("ADA", Some("ADAUSDT"), Some("ADA-USDT"), Some("ADAUSDT"), Some("ADA/USD"), Some("ADA-USD")),
    row!("DOGE", Some("DOGEUSDT"), Some("DOGE-USDT"), Some("DOGEUSDT"), Some("XDG/USD"), Some("DOGE-USD")),
    row!("AVAX", Some("AVAXUSDT"), Some("AVAX-USDT"), Some("AVAXUSDT"), Some("AVAX/USD"), Some("AVAX-USD")),
    row!("DOT", Some("DOTUSDT"), Some("DOT-USDT"), Some("DOTUSDT"), Some("DOT/USD"), Some("DOT-USD")),
    row!("LINK", Some("LINKUSDT"), Some("LINK-USDT"), Some("LINKUSDT"), Some("LINK/USD"), Some("LINK-USD")),
    row!("LTC", Some("LTCUSDT"), Some("LTC-USDT"), Some("LTCUSDT"), Some("LTC/USD"), Some("LTC-USD")),
    row!("ATOM", Some("ATOMUSDT"), Some("ATOM-USDT"), Some("ATOMUSDT"), Some("ATOM/USD"), Some("ATOM-USD")),
    row!("UNI", Some("UNIUSDT"), Some("UNI-USDT"), Some("UNIUSDT"), Some("UNI/USD"), Some("UNI-USD")),
    row!("TRX", Some("TRXUSDT"), Some("TRX-USDT"), Some("TRXUSDT"), Some("TRX/USD"), None),
    row!("BNB", Some("BNBUSDT"), Some("BNB-USDT"), Some("BNBUSDT"), None, None),
    row!("TON", Some("TONUSDT"), Some("TON-USDT"), Some("TONUSDT"), None, None),
];

/// Canonical symbol registry.
#[derive(Debug, Clone)]
pub struct SymbolRegistry {
    /// (exchange, canonical) -> provider symbol.
    forward: HashMap<(Exchange, String), String>,
    /// (exchange, normalized provider symbol) -> canonical.
    reverse: HashMap<(Exchange, String), String>,
    /// All known canonical codes, in table order.
    canonical: Vec<String>,
}

impl SymbolRegistry {
    /// Registry built from the built-in table.
    pub fn builtin() -> Self {
        let mut forward = HashMap::new();
        let mut reverse = HashMap::new();
        let mut canonical = Vec::with_capacity(SYMBOL_TABLE.len());

        for row in SYMBOL_TABLE {
            canonical.push(row.canonical.to_string());
            for exchange in Exchange::ALL {
                if let Some(provider) = row.provider(exchange) {
                    forward.insert((exchange, row.canonical.to_string()), provider.to_string());
                    reverse.insert(
                        (exchange, normalize(provider)),
                        row.canonical.to_string(),
                    );
                }
            }
        }

        Self {
            forward,
            reverse,
            canonical,
        }
    }

    /// Provider symbol for a canonical code on an exchange.
    pub fn resolve(&self, symbol: &str, exchange: Exchange) -> Option<&str> {
        self.forward
            .get(&(exchange, symbol.to_ascii_uppercase()))
            .map(String::as_str)
    }

    /// Canonical code for a provider symbol.
    ///
    /// Case and separators are ignored, so `btcusdt`, `BTC-USDT` and
    /// `BTC/USDT` all match on an exchange that lists `BTCUSDT`.
    pub fn canonical(&self, provider_symbol: &str, exchange: Exchange) -> Option<&str> {
        self.reverse
            .get(&(exchange, normalize(provider_symbol)))
            .map(String::as_str)
    }

    /// Whether the canonical code is known on any exchange.
    pub fn is_known(&self, symbol: &str) -> bool {
        let upper = symbol.to_ascii_uppercase();
        self.canonical.iter().any(|s| *s == upper)
    }

    /// Fail fast on a symbol the registry has never heard of.
    pub fn ensure_known(&self, symbol: &str) -> Result<()> {
        if self.is_known(symbol) {
            Ok(())
        } else {
            Err(CoreError::UnknownSymbol(symbol.to_string()))
        }
    }

    /// Provider symbols for the subset of `symbols` listed on `exchange`.
    pub fn resolve_all(&self, symbols: &[String], exchange: Exchange) -> Vec<String> {
        symbols
            .iter()
            .filter_map(|s| self.resolve(s, exchange).map(str::to_string))
            .collect()
    }

    /// All canonical codes.
    pub fn symbols(&self) -> &[String] {
        &self.canonical
    }
}

impl Default for SymbolRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

fn normalize(provider_symbol: &str) -> String {
    provider_symbol
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}
