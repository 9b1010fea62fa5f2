//! Mock exchange for tests and local dry runs.

use super::traits::ExchangeGateway;
use super::types::*;
use crate::error::{EngineError, EngineResult};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

/// Simulated exchange state.
#[derive(Debug, Default)]
pub struct MockExchangeState {
    pub balances: HashMap<String, Decimal>,
    pub lot_sizes: HashMap<String, Decimal>,
    pub orders: Vec<MarginOrder>,
    /// Queued refusals, consumed one per submitted order
    pub rejections: VecDeque<(i64, String)>,
}

/// In-memory exchange that records submitted orders.
pub struct MockExchange {
    state: RwLock<MockExchangeState>,
    order_id_counter: AtomicI64,
    /// Number of upcoming fetch calls that fail with a transport error
    fetch_failures: AtomicU32,
    fetch_calls: AtomicU32,
}

impl Default for MockExchange {
    fn default() -> Self {
        Self::new()
    }
}

impl MockExchange {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MockExchangeState::default()),
            order_id_counter: AtomicI64::new(1),
            fetch_failures: AtomicU32::new(0),
            fetch_calls: AtomicU32::new(0),
        }
    }

    /// Set the free balance of an asset.
    pub async fn set_balance(&self, asset: &str, free: Decimal) {
        self.state
            .write()
            .await
            .balances
            .insert(asset.to_string(), free);
    }

    /// Set the lot size of a symbol.
    pub async fn set_lot_size(&self, symbol: &str, step_size: Decimal) {
        self.state
            .write()
            .await
            .lot_sizes
            .insert(symbol.to_string(), step_size);
    }

    /// Refuse the next submitted order with the given code.
    pub async fn reject_next(&self, code: i64, message: &str) {
        self.state
            .write()
            .await
            .rejections
            .push_back((code, message.to_string()));
    }

    /// Make the next `count` fetch calls fail.
    pub fn fail_next_fetches(&self, count: u32) {
        self.fetch_failures.store(count, Ordering::SeqCst);
    }

    /// Total fetch calls seen, failed ones included.
    pub fn fetch_calls(&self) -> u32 {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// Orders submitted so far (rejected ones included).
    pub async fn orders(&self) -> Vec<MarginOrder> {
        self.state.read().await.orders.clone()
    }

    fn check_fetch(&self) -> Result<()> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .fetch_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();

        if failing {
            return Err(anyhow!("simulated connection reset"));
        }
        Ok(())
    }
}

#[async_trait]
impl ExchangeGateway for MockExchange {
    async fn fetch_balances(&self) -> Result<Vec<AssetBalance>> {
        self.check_fetch()?;
        let state = self.state.read().await;
        let mut balances: Vec<AssetBalance> = state
            .balances
            .iter()
            .map(|(asset, free)| AssetBalance {
                asset: asset.clone(),
                free: *free,
            })
            .collect();
        balances.sort_by(|a, b| a.asset.cmp(&b.asset));
        Ok(balances)
    }

    async fn fetch_lot_sizes(&self, symbols: &[String]) -> Result<Vec<LotSize>> {
        self.check_fetch()?;
        let state = self.state.read().await;
        Ok(symbols
            .iter()
            .filter_map(|symbol| {
                state.lot_sizes.get(symbol).map(|step_size| LotSize {
                    symbol: symbol.clone(),
                    step_size: *step_size,
                })
            })
            .collect())
    }

    async fn submit_order(&self, order: &MarginOrder) -> EngineResult<OrderAck> {
        let mut state = self.state.write().await;
        state.orders.push(order.clone());

        if let Some((code, message)) = state.rejections.pop_front() {
            return Err(EngineError::OrderRejected {
                symbol: order.symbol.clone(),
                code,
                message,
            });
        }

        let order_id = self.order_id_counter.fetch_add(1, Ordering::SeqCst);
        debug!(symbol = %order.symbol, order_id, "Mock order accepted");

        Ok(OrderAck {
            symbol: order.symbol.clone(),
            order_id,
            client_order_id: format!("mock-{}", order_id),
            status: OrderStatus::New,
        })
    }
}
