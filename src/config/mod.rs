//! Configuration management for the exposure balancer.
//!
//! Loads settings from an optional `config.toml`, a `.env` file and
//! `EXB__`-prefixed environment variables, in increasing precedence.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Binance API credentials
    #[serde(default)]
    pub exchange: ExchangeConfig,
    /// Target exposure and the set of traded tokens
    #[serde(default)]
    pub portfolio: PortfolioConfig,
    /// Ingestion router sizing
    #[serde(default)]
    pub router: RouterConfig,
    /// In-process message bus settings
    #[serde(default)]
    pub bus: BusConfig,
    /// Startup sync retry policy
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// API key for authentication
    #[serde(default)]
    pub api_key: String,
    /// Secret key for signing requests
    #[serde(default)]
    pub secret_key: String,
    /// Use testnet instead of production
    #[serde(default)]
    pub testnet: bool,
    /// Validity window for signed requests
    #[serde(default = "default_recv_window_ms")]
    pub recv_window_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioConfig {
    /// Quote-currency value kept in every traded token
    #[serde(default = "default_target_exposure")]
    pub target_exposure: Decimal,
    /// Quote asset every pair is priced in
    #[serde(default = "default_quote_asset")]
    pub quote_asset: String,
    /// Base assets traded by the bot (e.g. ["BTC", "ETH"])
    #[serde(default)]
    pub trade_assets: Vec<String>,
    /// Base assets never traded even if listed in `trade_assets`
    #[serde(default)]
    pub ignore_assets: Vec<String>,
    /// Kline interval driving price events (Binance notation, e.g. "1h")
    #[serde(default = "default_kline_interval")]
    pub kline_interval: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Maximum number of symbols handled at the same time
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Pending messages buffered per symbol worker
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Delivery attempts per message before it is dropped
    #[serde(default = "default_max_deliver")]
    pub max_deliver: u32,
    /// Buffered messages per subject
    #[serde(default = "default_bus_capacity")]
    pub capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapConfig {
    /// Attempts per exchange fetch before startup is aborted
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay between attempts, multiplied by the attempt number
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

// Default value functions
fn default_recv_window_ms() -> u64 {
    10_000
}

fn default_target_exposure() -> Decimal {
    Decimal::new(100, 0) // 100 USDT per token
}

fn default_quote_asset() -> String {
    "USDT".to_string()
}

fn default_kline_interval() -> String {
    "1h".to_string()
}

fn default_max_concurrency() -> usize {
    8
}

fn default_queue_capacity() -> usize {
    64
}

fn default_max_deliver() -> u32 {
    5
}

fn default_bus_capacity() -> usize {
    1024
}

fn default_max_attempts() -> u32 {
    5
}

fn default_retry_delay_ms() -> u64 {
    1_000
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .prefix("EXB")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("portfolio.trade_assets")
                    .with_list_parse_key("portfolio.ignore_assets"),
            )
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.portfolio.target_exposure > Decimal::ZERO,
            "target_exposure must be positive"
        );

        anyhow::ensure!(
            !self.portfolio.quote_asset.trim().is_empty(),
            "quote_asset must not be empty"
        );

        anyhow::ensure!(
            !self.portfolio.trade_symbols().is_empty(),
            "trade set is empty after removing ignored assets"
        );

        anyhow::ensure!(
            self.router.max_concurrency >= 1 && self.router.queue_capacity >= 1,
            "router concurrency and queue capacity must be >= 1"
        );

        anyhow::ensure!(self.bus.max_deliver >= 1, "max_deliver must be >= 1");

        anyhow::ensure!(
            self.bootstrap.max_attempts >= 1,
            "bootstrap max_attempts must be >= 1"
        );

        Ok(())
    }
}

impl PortfolioConfig {
    /// Pair symbol for a base asset (e.g. "BTC" -> "BTCUSDT").
    pub fn symbol_for(&self, asset: &str) -> String {
        format!(
            "{}{}",
            asset.trim().to_uppercase(),
            self.quote_asset.trim().to_uppercase()
        )
    }

    /// Base asset of a pair symbol, if it is quoted in the configured asset.
    pub fn asset_for<'a>(&self, symbol: &'a str) -> Option<&'a str> {
        symbol
            .strip_suffix(self.quote_asset.trim().to_uppercase().as_str())
            .filter(|base| !base.is_empty())
    }

    /// Traded pair symbols: the trade set minus the ignore set, deduplicated,
    /// in configuration order.
    pub fn trade_symbols(&self) -> Vec<String> {
        let ignored: Vec<String> = self
            .ignore_assets
            .iter()
            .map(|a| a.trim().to_uppercase())
            .collect();

        let mut symbols: Vec<String> = Vec::with_capacity(self.trade_assets.len());
        for asset in &self.trade_assets {
            let asset = asset.trim().to_uppercase();
            if asset.is_empty() || ignored.contains(&asset) {
                continue;
            }
            let symbol = self.symbol_for(&asset);
            if !symbols.contains(&symbol) {
                symbols.push(symbol);
            }
        }
        symbols
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            exchange: ExchangeConfig {
                api_key: String::new(),
                secret_key: String::new(),
                testnet: true,
                recv_window_ms: default_recv_window_ms(),
            },
            portfolio: PortfolioConfig {
                trade_assets: vec!["BTC".to_string(), "ETH".to_string()],
                ..PortfolioConfig::default()
            },
            router: RouterConfig::default(),
            bus: BusConfig::default(),
            bootstrap: BootstrapConfig::default(),
        }
    }
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            secret_key: String::new(),
            testnet: false,
            recv_window_ms: default_recv_window_ms(),
        }
    }
}

impl Default for PortfolioConfig {
    fn default() -> Self {
        Self {
            target_exposure: default_target_exposure(),
            quote_asset: default_quote_asset(),
            trade_assets: Vec::new(),
            ignore_assets: Vec::new(),
            kline_interval: default_kline_interval(),
        }
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_deliver: default_max_deliver(),
            capacity: default_bus_capacity(),
        }
    }
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_trade_symbols_skip_ignored() {
        let portfolio = PortfolioConfig {
            trade_assets: vec![
                "btc".to_string(),
                "ETH".to_string(),
                "DOGE".to_string(),
                "BTC".to_string(),
            ],
            ignore_assets: vec!["doge".to_string()],
            ..PortfolioConfig::default()
        };

        assert_eq!(portfolio.trade_symbols(), vec!["BTCUSDT", "ETHUSDT"]);
    }

    #[test]
    fn test_asset_for_symbol() {
        let portfolio = PortfolioConfig::default();
        assert_eq!(portfolio.asset_for("ICPUSDT"), Some("ICP"));
        assert_eq!(portfolio.asset_for("ICPBTC"), None);
        assert_eq!(portfolio.asset_for("USDT"), None);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.portfolio.target_exposure = dec!(0);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.portfolio.ignore_assets = config.portfolio.trade_assets.clone();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.router.max_concurrency = 0;
        assert!(config.validate().is_err());
    }
}
