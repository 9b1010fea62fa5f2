//! Startup sync: seeds the ledger from the exchange before live pricing.

use crate::config::{BootstrapConfig, PortfolioConfig};
use crate::engine::ledger::Ledger;
use crate::error::{EngineError, EngineResult};
use crate::exchange::ExchangeGateway;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Gate that holds price evaluation back until the ledger is seeded.
#[derive(Debug)]
pub struct ReadinessGate {
    tx: watch::Sender<bool>,
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadinessGate {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    pub fn open(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_open(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Outcome of a successful startup sync.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BootstrapReport {
    /// Symbols whose available balance was seeded
    pub balances_seeded: usize,
    /// Symbols whose lot increment was seeded
    pub lot_sizes_seeded: usize,
    /// Configured symbols the exchange returned no lot size for
    pub unlisted: Vec<String>,
}

/// Fetch balances and lot sizes for every traded symbol and merge them into
/// the ledger, then open the gate.
///
/// The two fetches are independent: a ledger seeded with balances but
/// missing some lot sizes is accepted. Only exhausting the retry budget of
/// a fetch fails the sync.
pub async fn run(
    gateway: &dyn ExchangeGateway,
    ledger: &Ledger,
    portfolio: &PortfolioConfig,
    policy: &BootstrapConfig,
    gate: &ReadinessGate,
) -> EngineResult<BootstrapReport> {
    let symbols = portfolio.trade_symbols();
    info!(symbols = symbols.len(), "🔄 Syncing ledger from exchange");

    let balances = with_retries("fetch_balances", policy, || gateway.fetch_balances()).await?;
    let free: HashMap<String, Decimal> = balances
        .into_iter()
        .map(|balance| (balance.asset.to_uppercase(), balance.free))
        .collect();

    let mut report = BootstrapReport::default();

    for symbol in &symbols {
        let Some(asset) = portfolio.asset_for(symbol) else {
            continue;
        };
        let available = free.get(asset).copied().unwrap_or(Decimal::ZERO);

        match ledger.merge_available(symbol, available) {
            Ok(()) => report.balances_seeded += 1,
            Err(e) => warn!(%symbol, error = %e, "Skipping balance"),
        }
    }

    let lot_sizes =
        with_retries("fetch_lot_sizes", policy, || gateway.fetch_lot_sizes(&symbols)).await?;

    for lot in lot_sizes {
        if !symbols.contains(&lot.symbol) {
            continue;
        }
        match ledger.merge_lot_increment(&lot.symbol, lot.step_size) {
            Ok(()) => report.lot_sizes_seeded += 1,
            Err(e) => warn!(symbol = %lot.symbol, error = %e, "Skipping lot size"),
        }
    }

    report.unlisted = symbols
        .iter()
        .filter(|symbol| {
            ledger
                .get(symbol)
                .map_or(true, |entry| entry.lot_increment.is_none())
        })
        .cloned()
        .collect();

    if !report.unlisted.is_empty() {
        warn!(
            unlisted = ?report.unlisted,
            "Configured symbols without lot size stay uninitialized"
        );
    }

    gate.open();

    info!(
        balances = report.balances_seeded,
        lot_sizes = report.lot_sizes_seeded,
        "✅ Ledger synced, price evaluation enabled"
    );

    Ok(report)
}

/// Retry an exchange fetch with linear backoff.
pub async fn with_retries<T, F, Fut>(
    step: &'static str,
    policy: &BootstrapConfig,
    mut fetch: F,
) -> EngineResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=max_attempts {
        match fetch().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                warn!(
                    step,
                    attempt,
                    max_attempts,
                    error = %e,
                    "Exchange fetch failed, retrying"
                );
                last_error = Some(e);

                if attempt < max_attempts {
                    tokio::time::sleep(Duration::from_millis(
                        policy.retry_delay_ms * attempt as u64,
                    ))
                    .await;
                }
            }
        }
    }

    let last_error = last_error.map(|e| e.to_string()).unwrap_or_default();
    error!(step, attempts = max_attempts, error = %last_error, "Exchange fetch exhausted retries");

    Err(EngineError::BootstrapExhausted {
        step,
        attempts: max_attempts,
        last_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::MockExchange;
    use rust_decimal_macros::dec;

    fn portfolio() -> PortfolioConfig {
        PortfolioConfig {
            trade_assets: vec!["BTC".to_string(), "ETH".to_string(), "ICP".to_string()],
            ignore_assets: vec!["ICP".to_string()],
            ..PortfolioConfig::default()
        }
    }

    fn fast_policy(max_attempts: u32) -> BootstrapConfig {
        BootstrapConfig {
            max_attempts,
            retry_delay_ms: 1,
        }
    }

    #[tokio::test]
    async fn test_bootstrap_seeds_ledger_and_opens_gate() {
        let exchange = MockExchange::new();
        exchange.set_balance("BTC", dec!(0.5)).await;
        exchange.set_balance("ICP", dec!(100)).await;
        exchange.set_balance("USDT", dec!(1000)).await;
        exchange.set_lot_size("BTCUSDT", dec!(0.00001)).await;
        exchange.set_lot_size("ETHUSDT", dec!(0.0001)).await;
        exchange.set_lot_size("ICPUSDT", dec!(0.01)).await;

        let ledger = Ledger::new();
        let gate = ReadinessGate::new();
        let report = run(&exchange, &ledger, &portfolio(), &fast_policy(1), &gate)
            .await
            .unwrap();

        assert!(gate.is_open());
        assert_eq!(report.balances_seeded, 2);
        assert_eq!(report.lot_sizes_seeded, 2);
        assert!(report.unlisted.is_empty());

        let btc = ledger.get("BTCUSDT").unwrap();
        assert_eq!(btc.initialized(), Some((dec!(0.5), dec!(0.00001))));

        // Held nothing: seeded with zero
        let eth = ledger.get("ETHUSDT").unwrap();
        assert_eq!(eth.available, Some(dec!(0)));

        // Ignored asset is not tracked
        assert_eq!(ledger.get("ICPUSDT"), None);
    }

    #[tokio::test]
    async fn test_unlisted_symbol_stays_partial() {
        let exchange = MockExchange::new();
        exchange.set_balance("BTC", dec!(1)).await;
        exchange.set_lot_size("BTCUSDT", dec!(0.001)).await;

        let ledger = Ledger::new();
        let gate = ReadinessGate::new();
        let report = run(&exchange, &ledger, &portfolio(), &fast_policy(1), &gate)
            .await
            .unwrap();

        assert_eq!(report.unlisted, vec!["ETHUSDT".to_string()]);
        let eth = ledger.get("ETHUSDT").unwrap();
        assert_eq!(eth.lot_increment, None);
        assert!(gate.is_open());
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let exchange = MockExchange::new();
        exchange.set_balance("BTC", dec!(1)).await;
        exchange.set_lot_size("BTCUSDT", dec!(0.001)).await;
        exchange.fail_next_fetches(2);

        let ledger = Ledger::new();
        let gate = ReadinessGate::new();
        let result = run(&exchange, &ledger, &portfolio(), &fast_policy(3), &gate).await;

        assert!(result.is_ok());
        assert_eq!(exchange.fetch_calls(), 4);
    }

    #[tokio::test]
    async fn test_exhausted_retries_are_fatal() {
        let exchange = MockExchange::new();
        exchange.fail_next_fetches(10);

        let ledger = Ledger::new();
        let gate = ReadinessGate::new();
        let result = run(&exchange, &ledger, &portfolio(), &fast_policy(3), &gate).await;

        assert!(matches!(
            result,
            Err(EngineError::BootstrapExhausted {
                step: "fetch_balances",
                attempts: 3,
                ..
            })
        ));
        assert!(!gate.is_open());
        assert!(ledger.is_empty());
    }
}
