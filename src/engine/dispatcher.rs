//! Order submission for trade decisions.

use crate::engine::decision::TradeDecision;
use crate::error::EngineError;
use crate::exchange::{ExchangeGateway, OrderAck};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Result of a single submission attempt.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// Exchange accepted the order
    Accepted(OrderAck),
    /// Exchange refused the order
    Rejected { code: i64, message: String },
    /// Request did not complete
    Failed(String),
}

/// Counters for the shutdown summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub accepted: u64,
    pub rejected: u64,
    pub failed: u64,
}

/// Sends trade decisions to the exchange.
///
/// Each decision gets exactly one submission attempt. Neither refusals nor
/// transport failures are retried, and the ledger is left as is: the next
/// balance event corrects it.
pub struct OrderDispatcher {
    gateway: Arc<dyn ExchangeGateway>,
    accepted: AtomicU64,
    rejected: AtomicU64,
    failed: AtomicU64,
}

impl OrderDispatcher {
    pub fn new(gateway: Arc<dyn ExchangeGateway>) -> Self {
        Self {
            gateway,
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Submit the order for a decision.
    pub async fn dispatch(&self, decision: &TradeDecision) -> DispatchOutcome {
        let order = decision.to_order();

        match self.gateway.submit_order(&order).await {
            Ok(ack) => {
                self.accepted.fetch_add(1, Ordering::Relaxed);
                info!(
                    symbol = %decision.symbol,
                    side = %decision.side,
                    size = %decision.size,
                    price = %decision.price,
                    order_id = ack.order_id,
                    status = ?ack.status,
                    "✅ Order placed"
                );
                DispatchOutcome::Accepted(ack)
            }
            Err(EngineError::OrderRejected { code, message, .. }) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(
                    symbol = %decision.symbol,
                    side = %decision.side,
                    size = %decision.size,
                    price = %decision.price,
                    code,
                    reason = %message,
                    "Order rejected, not retrying"
                );
                DispatchOutcome::Rejected { code, message }
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    symbol = %decision.symbol,
                    side = %decision.side,
                    size = %decision.size,
                    error = %e,
                    "Order submission failed, not retrying"
                );
                DispatchOutcome::Failed(e.to_string())
            }
        }
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}
