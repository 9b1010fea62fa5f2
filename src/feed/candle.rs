//! Kline stream to `candle` messages.

use super::{backoff, stopped};
use crate::bus::{MessageBus, Subject};
use crate::engine::PriceEvent;
use crate::exchange::{BinanceWebSocket, KlineUpdate, WsEvent};
use crate::utils::parse_decimal;
use anyhow::Result;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Remembers the last open price per symbol.
///
/// Kline streams push every trade update of the running candle; only a
/// changed open price means a new candle has started.
#[derive(Debug, Default)]
pub struct OpenPriceTracker {
    last_open: HashMap<String, Decimal>,
}

impl OpenPriceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Price event for the update if its open price differs from the last one.
    pub fn observe(&mut self, update: &KlineUpdate) -> Option<PriceEvent> {
        let symbol = update.symbol.to_uppercase();
        let Some(open_price) = parse_decimal(&update.open_price) else {
            warn!(%symbol, open = %update.open_price, "Unparseable kline open price");
            return None;
        };

        if self.last_open.get(&symbol) == Some(&open_price) {
            return None;
        }
        self.last_open.insert(symbol.clone(), open_price);

        Some(PriceEvent { symbol, open_price })
    }
}

/// Publishes one `candle` message per new candle of each symbol.
pub struct CandleFeed {
    ws: BinanceWebSocket,
    bus: Arc<dyn MessageBus>,
    symbols: Vec<String>,
    interval: String,
    tracker: OpenPriceTracker,
}

impl CandleFeed {
    pub fn new(
        ws: BinanceWebSocket,
        bus: Arc<dyn MessageBus>,
        symbols: Vec<String>,
        interval: impl Into<String>,
    ) -> Self {
        Self {
            ws,
            bus,
            symbols,
            interval: interval.into(),
            tracker: OpenPriceTracker::new(),
        }
    }

    /// Stream klines until shutdown, reconnecting on disconnect.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(symbols = ?self.symbols, interval = %self.interval, "🕯️ Candle feed started");

        loop {
            let (tx, mut rx) = mpsc::channel(256);

            if let Err(e) = self.ws.subscribe_klines(&self.symbols, &self.interval, tx).await {
                warn!(error = %e, "Kline stream connect failed");
                if !backoff(&mut shutdown).await {
                    break;
                }
                continue;
            }

            loop {
                let event = tokio::select! {
                    event = rx.recv() => event,
                    _ = stopped(&mut shutdown) => {
                        info!("Candle feed stopped");
                        return Ok(());
                    }
                };

                match event {
                    Some(WsEvent::Kline(update)) => self.on_kline(&update).await,
                    Some(WsEvent::Connected) => debug!("Kline stream connected"),
                    Some(WsEvent::Disconnected) | None => {
                        warn!("Kline stream disconnected, reconnecting");
                        break;
                    }
                    Some(_) => {}
                }
            }

            if !backoff(&mut shutdown).await {
                break;
            }
        }

        info!("Candle feed stopped");
        Ok(())
    }

    async fn on_kline(&mut self, update: &KlineUpdate) {
        let Some(event) = self.tracker.observe(update) else {
            return;
        };

        debug!(symbol = %event.symbol, open = %event.open_price, "New candle");
        if let Err(e) = self.bus.publish(Subject::Candle, event.to_payload()).await {
            warn!(symbol = %event.symbol, error = %e, "Failed to publish candle");
        }
    }
}
