//! Exposure balancing engine.
//!
//! - `events`: bus payload decoding
//! - `ledger`: per-symbol balance and lot increment state
//! - `decision`: target exposure rebalancing rule
//! - `dispatcher`: order submission
//! - `bootstrap`: startup sync and readiness gate
//! - `router`: per-symbol ingestion of bus deliveries

pub mod bootstrap;
pub mod decision;
pub mod dispatcher;
pub mod events;
pub mod ledger;
pub mod router;

pub use bootstrap::{BootstrapReport, ReadinessGate};
pub use decision::{DecisionEngine, TradeDecision};
pub use dispatcher::{DispatchOutcome, DispatchStats, OrderDispatcher};
pub use events::{decode, BalanceEvent, Event, PriceEvent};
pub use ledger::{Ledger, LedgerEntry};
pub use router::{IngestionRouter, RouterStats, RouterStatsHandle};

use crate::config::Config;
use crate::error::EngineResult;
use crate::exchange::ExchangeGateway;
use std::sync::Arc;

/// Wires the engine components around one exchange gateway.
pub struct Engine {
    config: Config,
    gateway: Arc<dyn ExchangeGateway>,
    ledger: Ledger,
    decisions: DecisionEngine,
    dispatcher: Arc<OrderDispatcher>,
    gate: ReadinessGate,
}

impl Engine {
    pub fn new(config: Config, gateway: Arc<dyn ExchangeGateway>) -> Self {
        let decisions = DecisionEngine::new(config.portfolio.target_exposure);
        let dispatcher = Arc::new(OrderDispatcher::new(gateway.clone()));

        Self {
            config,
            gateway,
            ledger: Ledger::new(),
            decisions,
            dispatcher,
            gate: ReadinessGate::new(),
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn gate(&self) -> &ReadinessGate {
        &self.gate
    }

    pub fn dispatch_stats(&self) -> DispatchStats {
        self.dispatcher.stats()
    }

    /// Router over the configured trade symbols, gated on bootstrap.
    pub fn router(&self) -> IngestionRouter {
        IngestionRouter::new(
            self.ledger.clone(),
            self.decisions.clone(),
            self.dispatcher.clone(),
            self.config.portfolio.trade_symbols(),
            self.gate.subscribe(),
            self.config.router.max_concurrency,
            self.config.router.queue_capacity,
        )
    }

    /// Seed the ledger from the exchange and open the readiness gate.
    pub async fn bootstrap(&self) -> EngineResult<BootstrapReport> {
        bootstrap::run(
            self.gateway.as_ref(),
            &self.ledger,
            &self.config.portfolio,
            &self.config.bootstrap,
            &self.gate,
        )
        .await
    }
}
