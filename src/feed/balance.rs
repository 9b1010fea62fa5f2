//! Cross margin user data stream to `balance` messages.

use super::{backoff, stopped};
use crate::bus::{MessageBus, Subject};
use crate::config::{BootstrapConfig, PortfolioConfig};
use crate::engine::bootstrap::with_retries;
use crate::engine::BalanceEvent;
use crate::exchange::{AccountPositionUpdate, BinanceClient, BinanceWebSocket, ExchangeGateway, WsEvent};
use crate::utils::parse_decimal;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Listen keys expire after 60 minutes without a keepalive.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Balance events for the traded assets of an account update.
///
/// Assets outside the trade set, or whose pair has no known lot size, are
/// skipped.
pub fn translate_account_update(
    update: &AccountPositionUpdate,
    portfolio: &PortfolioConfig,
    lot_sizes: &HashMap<String, Decimal>,
) -> Vec<BalanceEvent> {
    let symbols = portfolio.trade_symbols();

    update
        .balances
        .iter()
        .filter_map(|balance| {
            let symbol = portfolio.symbol_for(&balance.asset);
            if !symbols.contains(&symbol) {
                return None;
            }

            let Some(lot_increment) = lot_sizes.get(&symbol).copied() else {
                debug!(%symbol, "No lot size known, skipping balance");
                return None;
            };

            let Some(available) = parse_decimal(&balance.free) else {
                warn!(%symbol, free = %balance.free, "Unparseable free balance");
                return None;
            };

            Some(BalanceEvent {
                symbol,
                available,
                lot_increment,
            })
        })
        .collect()
}

/// Lot sizes of the traded symbols, retried like the startup sync.
pub async fn load_lot_sizes(
    gateway: &dyn ExchangeGateway,
    symbols: &[String],
    policy: &BootstrapConfig,
) -> Result<HashMap<String, Decimal>> {
    let lot_sizes = with_retries("feed_lot_sizes", policy, || gateway.fetch_lot_sizes(symbols))
        .await
        .context("Failed to load lot sizes for balance feed")?;

    Ok(lot_sizes
        .into_iter()
        .map(|lot| (lot.symbol, lot.step_size))
        .collect())
}

/// Publishes a `balance` message for every traded asset the account
/// stream reports.
pub struct BalanceFeed {
    client: Arc<BinanceClient>,
    ws: BinanceWebSocket,
    bus: Arc<dyn MessageBus>,
    portfolio: PortfolioConfig,
    retry: BootstrapConfig,
    lot_sizes: HashMap<String, Decimal>,
}

impl BalanceFeed {
    pub fn new(
        client: Arc<BinanceClient>,
        ws: BinanceWebSocket,
        bus: Arc<dyn MessageBus>,
        portfolio: PortfolioConfig,
        retry: BootstrapConfig,
    ) -> Self {
        Self {
            client,
            ws,
            bus,
            portfolio,
            retry,
            lot_sizes: HashMap::new(),
        }
    }

    /// Stream account updates until shutdown. A fresh listen key is opened
    /// on every (re)connect.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let symbols = self.portfolio.trade_symbols();
        self.lot_sizes = load_lot_sizes(self.client.as_ref(), &symbols, &self.retry).await?;

        info!(lot_sizes = self.lot_sizes.len(), "💰 Balance feed started");

        loop {
            let listen_key = match self.client.create_listen_key().await {
                Ok(key) => key,
                Err(e) => {
                    warn!(error = %e, "Failed to open user data stream");
                    if !backoff(&mut shutdown).await {
                        break;
                    }
                    continue;
                }
            };

            let keepalive = self.spawn_keepalive(listen_key.clone());
            let (tx, mut rx) = mpsc::channel(256);

            if let Err(e) = self.ws.subscribe_user_data(&listen_key, tx).await {
                warn!(error = %e, "User data stream connect failed");
                keepalive.abort();
                if !backoff(&mut shutdown).await {
                    break;
                }
                continue;
            }

            loop {
                let event = tokio::select! {
                    event = rx.recv() => event,
                    _ = stopped(&mut shutdown) => {
                        keepalive.abort();
                        info!("Balance feed stopped");
                        return Ok(());
                    }
                };

                match event {
                    Some(WsEvent::AccountPosition(update)) => self.on_update(&update).await,
                    Some(WsEvent::Connected) => debug!("User data stream connected"),
                    Some(WsEvent::Disconnected) | None => {
                        warn!("User data stream disconnected, reconnecting");
                        break;
                    }
                    Some(_) => {}
                }
            }

            keepalive.abort();
            if !backoff(&mut shutdown).await {
                break;
            }
        }

        info!("Balance feed stopped");
        Ok(())
    }

    fn spawn_keepalive(&self, listen_key: String) -> JoinHandle<()> {
        let client = self.client.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(KEEPALIVE_INTERVAL);
            // First tick fires immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                match client.keep_alive_listen_key(&listen_key).await {
                    Ok(()) => debug!("Listen key kept alive"),
                    Err(e) => warn!(error = %e, "Listen key keepalive failed"),
                }
            }
        })
    }

    async fn on_update(&self, update: &AccountPositionUpdate) {
        for event in translate_account_update(update, &self.portfolio, &self.lot_sizes) {
            debug!(symbol = %event.symbol, available = %event.available, "Balance update");
            if let Err(e) = self.bus.publish(Subject::Balance, event.to_payload()).await {
                warn!(symbol = %event.symbol, error = %e, "Failed to publish balance");
            }
        }
    }
}
