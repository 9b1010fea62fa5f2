//! Ingestion router: bus deliveries to ledger merges and price evaluations.
//!
//! Every traded symbol gets its own worker task fed by a bounded queue, so
//! events of one symbol are handled strictly in arrival order while
//! different symbols proceed concurrently. A semaphore caps how many
//! workers handle an event at the same time. Deliveries are acknowledged
//! only after their handler returns.
//!
//! Nothing is handled before the readiness gate opens: events arriving
//! during the startup sync stay queued, unacknowledged, and are applied on
//! top of the exchange snapshot once it has been merged.

use crate::bus::{Delivery, Subscription};
use crate::engine::decision::DecisionEngine;
use crate::engine::dispatcher::OrderDispatcher;
use crate::engine::events::{decode, Event};
use crate::engine::ledger::Ledger;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Router counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStats {
    pub balances_applied: u64,
    pub prices_evaluated: u64,
    pub decisions: u64,
    pub malformed: u64,
    pub ignored: u64,
    pub uninitialized: u64,
    pub errors: u64,
}

#[derive(Debug, Default)]
struct RouterCounters {
    balances_applied: AtomicU64,
    prices_evaluated: AtomicU64,
    decisions: AtomicU64,
    malformed: AtomicU64,
    ignored: AtomicU64,
    uninitialized: AtomicU64,
    errors: AtomicU64,
}

impl RouterCounters {
    fn snapshot(&self) -> RouterStats {
        RouterStats {
            balances_applied: self.balances_applied.load(Ordering::Relaxed),
            prices_evaluated: self.prices_evaluated.load(Ordering::Relaxed),
            decisions: self.decisions.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            uninitialized: self.uninitialized.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Read-only view of the router counters while it runs.
#[derive(Debug, Clone)]
pub struct RouterStatsHandle(Arc<RouterCounters>);

impl RouterStatsHandle {
    pub fn get(&self) -> RouterStats {
        self.0.snapshot()
    }
}

/// State shared by all symbol workers.
struct Handlers {
    ledger: Ledger,
    engine: DecisionEngine,
    dispatcher: Arc<OrderDispatcher>,
    ready: watch::Receiver<bool>,
    permits: Semaphore,
    counters: Arc<RouterCounters>,
}

impl Handlers {
    /// Apply one decoded event.
    async fn handle(&self, event: Event) {
        match event {
            Event::Balance(balance) => match self.ledger.apply(&balance) {
                Ok(()) => {
                    self.counters.balances_applied.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        symbol = %balance.symbol,
                        available = %balance.available,
                        lot_increment = %balance.lot_increment,
                        "Balance merged"
                    );
                }
                Err(e) => {
                    self.counters.errors.fetch_add(1, Ordering::Relaxed);
                    warn!(symbol = %balance.symbol, error = %e, "Balance event dropped");
                }
            },
            Event::Price(price) => {
                self.counters.prices_evaluated.fetch_add(1, Ordering::Relaxed);

                match self.engine.evaluate(&self.ledger, &price) {
                    Ok(Some(decision)) => {
                        self.counters.decisions.fetch_add(1, Ordering::Relaxed);
                        info!(
                            symbol = %decision.symbol,
                            side = %decision.side,
                            size = %decision.size,
                            price = %decision.price,
                            "⚖️ Rebalancing"
                        );
                        self.dispatcher.dispatch(&decision).await;
                    }
                    Ok(None) => {
                        debug!(symbol = %price.symbol, price = %price.open_price, "Within one lot of target");
                    }
                    Err(e) if e.is_warning() => {
                        self.counters.errors.fetch_add(1, Ordering::Relaxed);
                        warn!(symbol = %price.symbol, error = %e, "Price event dropped");
                    }
                    Err(e) => {
                        self.counters.uninitialized.fetch_add(1, Ordering::Relaxed);
                        debug!(symbol = %price.symbol, reason = %e, "Price event skipped");
                    }
                }
            }
        }
    }

    /// Wait for the readiness gate. False if shutdown comes first.
    async fn wait_ready(
        &self,
        ready: &mut watch::Receiver<bool>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        tokio::select! {
            result = ready.wait_for(|open| *open) => result.is_ok(),
            _ = shutdown_requested(shutdown) => false,
        }
    }

    /// Sequentially handle the queue of one symbol.
    async fn run_worker(
        self: Arc<Self>,
        symbol: String,
        mut jobs: mpsc::Receiver<(Event, Delivery)>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ready = self.ready.clone();

        while let Some((event, delivery)) = jobs.recv().await {
            let gate_open = *ready.borrow();
            if !gate_open && !self.wait_ready(&mut ready, &mut shutdown).await {
                // Not acknowledged: the bus will deliver it again
                debug!(%symbol, "Worker stopped before ledger sync");
                return;
            }

            let Ok(_permit) = self.permits.acquire().await else {
                return;
            };

            self.handle(event).await;
            delivery.ack();
        }

        debug!(%symbol, "Worker drained");
    }
}

struct SymbolWorker {
    jobs: mpsc::Sender<(Event, Delivery)>,
    handle: JoinHandle<()>,
}

/// Consumes the `balance` and `candle` subscriptions.
pub struct IngestionRouter {
    handlers: Arc<Handlers>,
    symbols: HashSet<String>,
    queue_capacity: usize,
}

impl IngestionRouter {
    pub fn new(
        ledger: Ledger,
        engine: DecisionEngine,
        dispatcher: Arc<OrderDispatcher>,
        symbols: impl IntoIterator<Item = String>,
        ready: watch::Receiver<bool>,
        max_concurrency: usize,
        queue_capacity: usize,
    ) -> Self {
        Self {
            handlers: Arc::new(Handlers {
                ledger,
                engine,
                dispatcher,
                ready,
                permits: Semaphore::new(max_concurrency.max(1)),
                counters: Arc::new(RouterCounters::default()),
            }),
            symbols: symbols.into_iter().collect(),
            queue_capacity: queue_capacity.max(1),
        }
    }

    pub fn stats_handle(&self) -> RouterStatsHandle {
        RouterStatsHandle(self.handlers.counters.clone())
    }

    /// Route deliveries until both subscriptions end or shutdown is signalled,
    /// then wait for the symbol workers to drain.
    pub async fn run(
        self,
        mut balances: Subscription,
        mut candles: Subscription,
        shutdown: watch::Receiver<bool>,
    ) -> RouterStats {
        let mut workers: HashMap<String, SymbolWorker> = HashMap::new();
        let mut stop = shutdown.clone();
        let mut balances_open = true;
        let mut candles_open = true;

        info!(symbols = self.symbols.len(), "📥 Ingestion router started");

        while balances_open || candles_open {
            let delivery = tokio::select! {
                next = balances.next(), if balances_open => match next {
                    Some(delivery) => delivery,
                    None => {
                        balances_open = false;
                        continue;
                    }
                },
                next = candles.next(), if candles_open => match next {
                    Some(delivery) => delivery,
                    None => {
                        candles_open = false;
                        continue;
                    }
                },
                _ = shutdown_requested(&mut stop) => {
                    info!("Shutdown requested, stopping intake");
                    break;
                }
            };

            self.route(delivery, &mut workers, &shutdown).await;
        }

        for (symbol, worker) in workers {
            drop(worker.jobs);
            if let Err(e) = worker.handle.await {
                error!(%symbol, error = %e, "Symbol worker panicked");
            }
        }

        let stats = self.handlers.counters.snapshot();
        info!(?stats, "Ingestion router stopped");
        stats
    }

    async fn route(
        &self,
        delivery: Delivery,
        workers: &mut HashMap<String, SymbolWorker>,
        shutdown: &watch::Receiver<bool>,
    ) {
        let counters = &self.handlers.counters;

        let event = match decode(delivery.subject(), delivery.payload()) {
            Ok(event) => event,
            Err(e) => {
                counters.malformed.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, attempt = delivery.attempt(), "Skipping malformed message");
                delivery.ack();
                return;
            }
        };

        let symbol = event.symbol().to_string();
        if !self.symbols.contains(&symbol) {
            counters.ignored.fetch_add(1, Ordering::Relaxed);
            debug!(%symbol, "Ignoring untracked symbol");
            delivery.ack();
            return;
        }

        let worker = workers.entry(symbol.clone()).or_insert_with(|| {
            let (jobs, rx) = mpsc::channel(self.queue_capacity);
            let handle = tokio::spawn(self.handlers.clone().run_worker(
                symbol.clone(),
                rx,
                shutdown.clone(),
            ));
            debug!(%symbol, "Spawned symbol worker");
            SymbolWorker { jobs, handle }
        });

        if worker.jobs.send((event, delivery)).await.is_err() {
            // Worker gone; the dropped delivery is redelivered by the bus
            warn!(%symbol, "Symbol worker stopped, message left for redelivery");
            workers.remove(&symbol);
        }
    }
}

/// Resolves once `true` is signalled; never resolves if the sender is gone.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{InMemoryBus, MessageBus, Subject};
    use crate::config::BusConfig;
    use crate::engine::events::{BalanceEvent, PriceEvent};
    use crate::exchange::{ExchangeGateway, MockExchange, OrderSide};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    struct Harness {
        bus: Arc<InMemoryBus>,
        exchange: Arc<MockExchange>,
        ledger: Ledger,
        stats: RouterStatsHandle,
        gate: watch::Sender<bool>,
        shutdown: watch::Sender<bool>,
        task: JoinHandle<RouterStats>,
    }

    async fn start(gate_open: bool) -> Harness {
        let bus = Arc::new(InMemoryBus::new(&BusConfig {
            max_deliver: 3,
            capacity: 64,
        }));
        let exchange = Arc::new(MockExchange::new());
        let ledger = Ledger::new();
        let (gate, ready) = watch::channel(gate_open);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let gateway: Arc<dyn ExchangeGateway> = exchange.clone();
        let router = IngestionRouter::new(
            ledger.clone(),
            DecisionEngine::new(dec!(100)),
            Arc::new(OrderDispatcher::new(gateway)),
            ["ICPUSDT".to_string(), "BTCUSDT".to_string()],
            ready,
            4,
            16,
        );
        let stats = router.stats_handle();

        let balances = bus.subscribe(Subject::Balance).await.unwrap();
        let candles = bus.subscribe(Subject::Candle).await.unwrap();
        let task = tokio::spawn(router.run(balances, candles, shutdown_rx));

        Harness {
            bus,
            exchange,
            ledger,
            stats,
            gate,
            shutdown,
            task,
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    fn balance(symbol: &str, available: Decimal, lot_increment: Decimal) -> Vec<u8> {
        BalanceEvent {
            symbol: symbol.to_string(),
            available,
            lot_increment,
        }
        .to_payload()
    }

    fn candle(symbol: &str, open_price: Decimal) -> Vec<u8> {
        PriceEvent {
            symbol: symbol.to_string(),
            open_price,
        }
        .to_payload()
    }

    async fn stop(h: Harness) -> RouterStats {
        h.shutdown.send_replace(true);
        h.bus.close().await;
        h.task.await.unwrap()
    }

    #[tokio::test]
    async fn test_price_before_lot_size_then_after() {
        let h = start(true).await;

        h.ledger.merge_available("ICPUSDT", dec!(10)).unwrap();
        h.bus
            .publish(Subject::Candle, candle("ICPUSDT", dec!(5)))
            .await
            .unwrap();
        wait_until(|| h.stats.get().uninitialized == 1).await;
        assert!(h.exchange.orders().await.is_empty());

        h.bus
            .publish(Subject::Balance, balance("ICPUSDT", dec!(10), dec!(0.1)))
            .await
            .unwrap();
        wait_until(|| h.stats.get().balances_applied == 1).await;

        h.bus
            .publish(Subject::Candle, candle("ICPUSDT", dec!(5)))
            .await
            .unwrap();
        wait_until(|| h.stats.get().decisions == 1).await;

        let orders = h.exchange.orders().await;
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].side, OrderSide::Buy);
        assert_eq!(orders[0].quantity, dec!(10));

        stop(h).await;
    }

    #[tokio::test]
    async fn test_malformed_and_untracked_messages_are_acknowledged() {
        let h = start(true).await;

        h.bus
            .publish(Subject::Balance, b"{\"symbol\":\"ICPUSDT\"}".to_vec())
            .await
            .unwrap();
        h.bus
            .publish(Subject::Candle, candle("DOGEUSDT", dec!(0.1)))
            .await
            .unwrap();
        wait_until(|| {
            let stats = h.stats.get();
            stats.malformed == 1 && stats.ignored == 1
        })
        .await;

        // Give a redelivery the chance to show up
        tokio::time::sleep(Duration::from_millis(50)).await;
        let stats = stop(h).await;
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.ignored, 1);
    }

    #[tokio::test]
    async fn test_events_wait_for_readiness_gate() {
        let h = start(false).await;
        // Seeded by the startup sync
        h.ledger.merge_available("BTCUSDT", dec!(0)).unwrap();
        h.ledger.merge_lot_increment("BTCUSDT", dec!(0.001)).unwrap();

        h.bus
            .publish(Subject::Balance, balance("ICPUSDT", dec!(20), dec!(1)))
            .await
            .unwrap();
        h.bus
            .publish(Subject::Candle, candle("BTCUSDT", dec!(50000)))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.stats.get().balances_applied, 0);
        assert_eq!(h.stats.get().prices_evaluated, 0);
        assert_eq!(h.ledger.get("ICPUSDT"), None);

        h.gate.send_replace(true);
        wait_until(|| {
            let stats = h.stats.get();
            stats.balances_applied == 1 && stats.decisions == 1
        })
        .await;

        assert_eq!(h.ledger.get("ICPUSDT").unwrap().available, Some(dec!(20)));
        let orders = h.exchange.orders().await;
        assert_eq!(orders[0].quantity, dec!(0.002));

        stop(h).await;
    }

    #[tokio::test]
    async fn test_same_symbol_events_apply_in_order() {
        let h = start(true).await;

        for i in 1..=20 {
            h.bus
                .publish(Subject::Balance, balance("ICPUSDT", Decimal::from(i), dec!(0.1)))
                .await
                .unwrap();
        }
        wait_until(|| h.stats.get().balances_applied == 20).await;

        let entry = h.ledger.get("ICPUSDT").unwrap();
        assert_eq!(entry.available, Some(dec!(20)));

        stop(h).await;
    }

    #[tokio::test]
    async fn test_duplicate_balance_is_idempotent() {
        let h = start(true).await;
        let payload = balance("BTCUSDT", dec!(0.5), dec!(0.00001));

        h.bus.publish(Subject::Balance, payload.clone()).await.unwrap();
        h.bus.publish(Subject::Balance, payload).await.unwrap();
        wait_until(|| h.stats.get().balances_applied == 2).await;

        let entry = h.ledger.get("BTCUSDT").unwrap();
        assert_eq!(entry.initialized(), Some((dec!(0.5), dec!(0.00001))));
        assert_eq!(h.ledger.len(), 1);

        stop(h).await;
    }

    #[tokio::test]
    async fn test_rejected_order_leaves_ledger_unchanged() {
        let h = start(true).await;
        h.exchange.reject_next(-2010, "insufficient balance").await;

        h.bus
            .publish(Subject::Balance, balance("ICPUSDT", dec!(30), dec!(1)))
            .await
            .unwrap();
        wait_until(|| h.stats.get().balances_applied == 1).await;
        h.bus
            .publish(Subject::Candle, candle("ICPUSDT", dec!(5)))
            .await
            .unwrap();
        wait_until(|| h.stats.get().decisions == 1).await;

        let entry = h.ledger.get("ICPUSDT").unwrap();
        assert_eq!(entry.available, Some(dec!(30)));
        assert_eq!(h.exchange.orders().await.len(), 1);

        stop(h).await;
    }

    #[tokio::test]
    async fn test_invalid_price_does_not_stop_router() {
        let h = start(true).await;
        h.bus
            .publish(Subject::Balance, balance("ICPUSDT", dec!(30), dec!(1)))
            .await
            .unwrap();
        h.bus
            .publish(Subject::Candle, candle("ICPUSDT", dec!(0)))
            .await
            .unwrap();
        wait_until(|| h.stats.get().errors == 1).await;

        h.bus
            .publish(Subject::Candle, candle("ICPUSDT", dec!(5)))
            .await
            .unwrap();
        wait_until(|| h.stats.get().decisions == 1).await;

        let orders = h.exchange.orders().await;
        assert_eq!(orders[0].side, OrderSide::Sell);
        assert_eq!(orders[0].quantity, dec!(10));

        stop(h).await;
    }
}
