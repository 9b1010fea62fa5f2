//! Exchange collaborator interface used by the engine.
//!
//! The engine only needs three things from an exchange:
//! - the free balance of every asset in the trading account
//! - the order quantity step of each traded symbol
//! - a way to submit a signed order

use crate::error::EngineResult;
use crate::exchange::types::{AssetBalance, LotSize, MarginOrder, OrderAck};
use async_trait::async_trait;

/// Trait for exchanges the balancer can trade on.
///
/// Fetch methods surface transport failures as `anyhow` errors so callers can
/// decide on retries. `submit_order` distinguishes a refusal by the exchange
/// (`EngineError::OrderRejected`) from a transport failure
/// (`EngineError::Transport`).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Free balances of all assets held in the account.
    async fn fetch_balances(&self) -> anyhow::Result<Vec<AssetBalance>>;

    /// Quantity steps for the given symbols. Unknown symbols are omitted.
    async fn fetch_lot_sizes(&self, symbols: &[String]) -> anyhow::Result<Vec<LotSize>>;

    /// Submit an order. Called at most once per trade decision.
    async fn submit_order(&self, order: &MarginOrder) -> EngineResult<OrderAck>;
}
