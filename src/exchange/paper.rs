//! Paper trading wrapper: real reads, simulated order submission.

use super::traits::ExchangeGateway;
use super::types::*;
use crate::error::EngineResult;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// Delegates balance and lot size reads to a live gateway and records
/// orders instead of sending them.
pub struct PaperExchange {
    inner: Arc<dyn ExchangeGateway>,
    orders: Mutex<Vec<MarginOrder>>,
    next_id: AtomicI64,
}

impl PaperExchange {
    pub fn new(inner: Arc<dyn ExchangeGateway>) -> Self {
        Self {
            inner,
            orders: Mutex::new(Vec::new()),
            next_id: AtomicI64::new(1),
        }
    }

    /// Orders that would have been sent.
    pub async fn orders(&self) -> Vec<MarginOrder> {
        self.orders.lock().await.clone()
    }
}

#[async_trait]
impl ExchangeGateway for PaperExchange {
    async fn fetch_balances(&self) -> Result<Vec<AssetBalance>> {
        self.inner.fetch_balances().await
    }

    async fn fetch_lot_sizes(&self, symbols: &[String]) -> Result<Vec<LotSize>> {
        self.inner.fetch_lot_sizes(symbols).await
    }

    async fn submit_order(&self, order: &MarginOrder) -> EngineResult<OrderAck> {
        let order_id = self.next_id.fetch_add(1, Ordering::SeqCst);

        info!(
            symbol = %order.symbol,
            side = %order.side,
            quantity = %order.quantity,
            price = ?order.price,
            "📝 [PAPER] Order not sent"
        );

        self.orders.lock().await.push(order.clone());

        Ok(OrderAck {
            symbol: order.symbol.clone(),
            order_id,
            client_order_id: format!("paper-{}", order_id),
            status: OrderStatus::New,
        })
    }
}
