//! Rebalancing decision logic.
//!
//! Every traded token is kept at a fixed quote-currency value, the target
//! exposure. On each candle open the current notional (`price * available`)
//! is compared with the target and the difference is converted back into a
//! base quantity, rounded down to the symbol's lot increment:
//!
//! - notional above target: sell the excess
//! - notional below target: buy the shortfall
//! - difference smaller than one lot: do nothing

use crate::engine::events::PriceEvent;
use crate::engine::ledger::{Ledger, LedgerEntry};
use crate::error::{EngineError, EngineResult};
use crate::exchange::{MarginOrder, OrderSide};
use crate::utils::floor_to_multiple;
use rust_decimal::Decimal;
use tracing::debug;

/// Trade instruction computed from a price event and a ledger snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeDecision {
    pub symbol: String,
    pub side: OrderSide,
    /// Base quantity, a positive multiple of the lot increment
    pub size: Decimal,
    pub price: Decimal,
}

impl TradeDecision {
    /// Limit order carrying out this decision.
    pub fn to_order(&self) -> MarginOrder {
        MarginOrder::limit(&self.symbol, self.side, self.size, self.price)
    }

    /// Quote-currency value of the trade.
    pub fn notional(&self) -> Decimal {
        self.size * self.price
    }
}

/// Computes trade decisions against a uniform target exposure.
#[derive(Debug, Clone)]
pub struct DecisionEngine {
    target_exposure: Decimal,
}

impl DecisionEngine {
    pub fn new(target_exposure: Decimal) -> Self {
        Self { target_exposure }
    }

    /// Evaluate a price event against the current ledger state.
    pub fn evaluate(&self, ledger: &Ledger, event: &PriceEvent) -> EngineResult<Option<TradeDecision>> {
        self.decide(event, ledger.get(&event.symbol))
    }

    /// Decide on a trade for a price event and a ledger entry snapshot.
    ///
    /// Returns `Ok(None)` when the position is within one lot of the target.
    /// A missing or partially filled entry yields `EngineError::Uninitialized`;
    /// a non-positive price yields `EngineError::InvalidPrice`.
    pub fn decide(
        &self,
        event: &PriceEvent,
        entry: Option<LedgerEntry>,
    ) -> EngineResult<Option<TradeDecision>> {
        let price = event.open_price;
        if price <= Decimal::ZERO {
            return Err(EngineError::InvalidPrice {
                symbol: event.symbol.clone(),
                price,
            });
        }

        let (available, lot_increment) = entry
            .and_then(|entry| entry.initialized())
            .ok_or_else(|| EngineError::Uninitialized {
                symbol: event.symbol.clone(),
            })?;

        let notional = price * available;
        let (side, delta) = if notional >= self.target_exposure {
            (OrderSide::Sell, (notional - self.target_exposure) / price)
        } else {
            (OrderSide::Buy, (self.target_exposure - notional) / price)
        };

        let size = floor_to_multiple(delta, lot_increment);

        debug!(
            symbol = %event.symbol,
            %price,
            %available,
            %notional,
            target = %self.target_exposure,
            %delta,
            %size,
            "Evaluated exposure"
        );

        if size <= Decimal::ZERO {
            return Ok(None);
        }

        Ok(Some(TradeDecision {
            symbol: event.symbol.clone(),
            side,
            size,
            price,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn price(symbol: &str, open_price: Decimal) -> PriceEvent {
        PriceEvent {
            symbol: symbol.to_string(),
            open_price,
        }
    }

    fn entry(available: Decimal, lot_increment: Decimal) -> Option<LedgerEntry> {
        Some(LedgerEntry {
            available: Some(available),
            lot_increment: Some(lot_increment),
        })
    }

    #[test]
    fn test_buy_when_below_target() {
        let engine = DecisionEngine::new(dec!(100));
        let decision = engine
            .decide(&price("ICPUSDT", dec!(5)), entry(dec!(10), dec!(0.1)))
            .unwrap()
            .unwrap();

        assert_eq!(decision.side, OrderSide::Buy);
        assert_eq!(decision.size, dec!(10.0));
        assert_eq!(decision.price, dec!(5));
    }

    #[test]
    fn test_sell_when_above_target() {
        let engine = DecisionEngine::new(dec!(100));
        let decision = engine
            .decide(&price("ICPUSDT", dec!(5)), entry(dec!(30), dec!(1)))
            .unwrap()
            .unwrap();

        assert_eq!(decision.side, OrderSide::Sell);
        assert_eq!(decision.size, dec!(10));
        assert_eq!(decision.notional(), dec!(50));
    }

    #[test]
    fn test_on_target_emits_nothing() {
        let engine = DecisionEngine::new(dec!(100));
        let decision = engine
            .decide(&price("ICPUSDT", dec!(5)), entry(dec!(20), dec!(0.1)))
            .unwrap();

        assert_eq!(decision, None);
    }

    #[test]
    fn test_dust_is_suppressed() {
        let engine = DecisionEngine::new(dec!(100));
        // |102 - 100| / 5 = 0.4 < 1
        let decision = engine
            .decide(&price("ICPUSDT", dec!(5)), entry(dec!(20.4), dec!(1)))
            .unwrap();
        assert_eq!(decision, None);

        // |99.5 - 100| / 50 = 0.01 < 0.1
        let decision = engine
            .decide(&price("ICPUSDT", dec!(50)), entry(dec!(1.99), dec!(0.1)))
            .unwrap();
        assert_eq!(decision, None);
    }

    #[test]
    fn test_size_rounds_toward_zero() {
        let engine = DecisionEngine::new(dec!(100));
        // (100 - 0) / 3 = 33.33.. -> 33.3
        let decision = engine
            .decide(&price("ICPUSDT", dec!(3)), entry(dec!(0), dec!(0.1)))
            .unwrap()
            .unwrap();

        assert_eq!(decision.side, OrderSide::Buy);
        assert_eq!(decision.size, dec!(33.3));
        assert!(decision.notional() <= dec!(100));
    }

    #[test]
    fn test_size_is_never_negative() {
        let engine = DecisionEngine::new(dec!(250));
        let prices = [dec!(0.0001), dec!(0.5), dec!(7), dec!(1234.56), dec!(65000)];
        let availables = [dec!(0), dec!(0.003), dec!(1), dec!(42.42), dec!(100000)];
        let increments = [dec!(0.00001), dec!(0.01), dec!(1)];

        for p in prices {
            for a in availables {
                for inc in increments {
                    if let Some(decision) = engine.decide(&price("X", p), entry(a, inc)).unwrap() {
                        assert!(decision.size > Decimal::ZERO);
                        assert_eq!(decision.size % inc, Decimal::ZERO);
                    }
                }
            }
        }
    }

    #[test]
    fn test_uninitialized_entry_is_skipped() {
        let engine = DecisionEngine::new(dec!(100));
        let event = price("ICPUSDT", dec!(5));

        assert!(matches!(
            engine.decide(&event, None),
            Err(EngineError::Uninitialized { .. })
        ));

        let partial = Some(LedgerEntry {
            available: Some(dec!(10)),
            lot_increment: None,
        });
        assert!(matches!(
            engine.decide(&event, partial),
            Err(EngineError::Uninitialized { .. })
        ));
    }

    #[test]
    fn test_non_positive_price_is_rejected() {
        let engine = DecisionEngine::new(dec!(100));
        for bad in [dec!(0), dec!(-5)] {
            assert!(matches!(
                engine.decide(&price("ICPUSDT", bad), entry(dec!(10), dec!(0.1))),
                Err(EngineError::InvalidPrice { .. })
            ));
        }
    }

    #[test]
    fn test_evaluate_reads_ledger_snapshot() {
        let engine = DecisionEngine::new(dec!(100));
        let ledger = Ledger::new();
        let event = price("ICPUSDT", dec!(5));

        ledger.merge_available("ICPUSDT", dec!(10)).unwrap();
        assert!(engine.evaluate(&ledger, &event).is_err());

        ledger.merge_lot_increment("ICPUSDT", dec!(0.1)).unwrap();
        let decision = engine.evaluate(&ledger, &event).unwrap().unwrap();
        assert_eq!(decision.size, dec!(10));
    }

    #[test]
    fn test_decision_to_order() {
        let decision = TradeDecision {
            symbol: "ICPUSDT".to_string(),
            side: OrderSide::Buy,
            size: dec!(10.0),
            price: dec!(5),
        };
        let order = decision.to_order();

        assert_eq!(order.symbol, "ICPUSDT");
        assert_eq!(order.quantity, dec!(10));
        assert_eq!(order.price, Some(dec!(5)));
    }
}
