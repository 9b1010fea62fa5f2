//! In-memory per-symbol balance and quantization state.

use crate::engine::events::BalanceEvent;
use crate::error::{EngineError, EngineResult};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// State of one symbol. Fields are filled independently.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerEntry {
    /// Free quantity of the base asset (>= 0)
    pub available: Option<Decimal>,
    /// Order quantity step (> 0)
    pub lot_increment: Option<Decimal>,
}

impl LedgerEntry {
    /// Both fields, if the entry is fully initialized.
    pub fn initialized(&self) -> Option<(Decimal, Decimal)> {
        Some((self.available?, self.lot_increment?))
    }
}

/// Shared handle to the ledger.
///
/// Clones point at the same state. Entries are created on the first merge
/// and never removed. All operations are synchronous.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    entries: Arc<RwLock<HashMap<String, LedgerEntry>>>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a symbol's entry.
    pub fn get(&self, symbol: &str) -> Option<LedgerEntry> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(symbol)
            .copied()
    }

    /// Set the available quantity of a symbol.
    pub fn merge_available(&self, symbol: &str, value: Decimal) -> EngineResult<()> {
        check_available(symbol, value)?;
        self.update(symbol, |entry| entry.available = Some(value));
        Ok(())
    }

    /// Set the lot increment of a symbol.
    pub fn merge_lot_increment(&self, symbol: &str, value: Decimal) -> EngineResult<()> {
        check_lot_increment(symbol, value)?;
        self.update(symbol, |entry| entry.lot_increment = Some(value));
        Ok(())
    }

    /// Merge both fields of a balance event.
    ///
    /// Both values are validated before either is written.
    pub fn apply(&self, event: &BalanceEvent) -> EngineResult<()> {
        check_available(&event.symbol, event.available)?;
        check_lot_increment(&event.symbol, event.lot_increment)?;

        self.update(&event.symbol, |entry| {
            entry.available = Some(event.available);
            entry.lot_increment = Some(event.lot_increment);
        });
        Ok(())
    }

    /// All entries, sorted by symbol.
    pub fn snapshot(&self) -> Vec<(String, LedgerEntry)> {
        let mut entries: Vec<(String, LedgerEntry)> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(symbol, entry)| (symbol.clone(), *entry))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn update(&self, symbol: &str, f: impl FnOnce(&mut LedgerEntry)) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        f(entries.entry(symbol.to_string()).or_default());
    }
}

fn check_available(symbol: &str, value: Decimal) -> EngineResult<()> {
    if value < Decimal::ZERO {
        return Err(EngineError::InvalidLedgerValue {
            symbol: symbol.to_string(),
            field: "available",
            value,
        });
    }
    Ok(())
}

fn check_lot_increment(symbol: &str, value: Decimal) -> EngineResult<()> {
    if value <= Decimal::ZERO {
        return Err(EngineError::InvalidLedgerValue {
            symbol: symbol.to_string(),
            field: "lot_increment",
            value,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn balance(symbol: &str, available: Decimal, lot_increment: Decimal) -> BalanceEvent {
        BalanceEvent {
            symbol: symbol.to_string(),
            available,
            lot_increment,
        }
    }

    #[test]
    fn test_merge_creates_partial_entry() {
        let ledger = Ledger::new();
        assert_eq!(ledger.get("BTCUSDT"), None);

        ledger.merge_lot_increment("BTCUSDT", dec!(0.001)).unwrap();
        let entry = ledger.get("BTCUSDT").unwrap();
        assert_eq!(entry.available, None);
        assert_eq!(entry.lot_increment, Some(dec!(0.001)));
        assert_eq!(entry.initialized(), None);
    }

    #[test]
    fn test_merge_updates_only_named_field() {
        let ledger = Ledger::new();
        ledger.merge_available("ETHUSDT", dec!(2)).unwrap();
        ledger.merge_lot_increment("ETHUSDT", dec!(0.01)).unwrap();
        ledger.merge_available("ETHUSDT", dec!(3)).unwrap();

        let entry = ledger.get("ETHUSDT").unwrap();
        assert_eq!(entry.initialized(), Some((dec!(3), dec!(0.01))));
    }

    #[test]
    fn test_apply_is_idempotent() {
        let once = Ledger::new();
        let twice = Ledger::new();
        let event = balance("ICPUSDT", dec!(12.5), dec!(0.0001));

        once.apply(&event).unwrap();
        twice.apply(&event).unwrap();
        twice.apply(&event).unwrap();

        assert_eq!(once.get("ICPUSDT"), twice.get("ICPUSDT"));
        assert_eq!(twice.len(), 1);
    }

    #[test]
    fn test_last_write_wins() {
        let ledger = Ledger::new();
        ledger.apply(&balance("ICPUSDT", dec!(1), dec!(0.1))).unwrap();
        ledger.apply(&balance("ICPUSDT", dec!(5), dec!(0.01))).unwrap();

        let entry = ledger.get("ICPUSDT").unwrap();
        assert_eq!(entry.initialized(), Some((dec!(5), dec!(0.01))));
    }

    #[test]
    fn test_invalid_values_leave_entry_untouched() {
        let ledger = Ledger::new();
        ledger.apply(&balance("BTCUSDT", dec!(1), dec!(0.001))).unwrap();

        assert!(ledger.merge_available("BTCUSDT", dec!(-1)).is_err());
        assert!(ledger.merge_lot_increment("BTCUSDT", dec!(0)).is_err());
        assert!(ledger.apply(&balance("BTCUSDT", dec!(9), dec!(-0.1))).is_err());
        assert!(ledger.apply(&balance("BTCUSDT", dec!(-9), dec!(0.1))).is_err());

        let entry = ledger.get("BTCUSDT").unwrap();
        assert_eq!(entry.initialized(), Some((dec!(1), dec!(0.001))));
    }

    #[test]
    fn test_apply_reports_the_invalid_field() {
        let ledger = Ledger::new();

        let err = ledger
            .apply(&balance("ICPUSDT", dec!(-1), dec!(0.1)))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidLedgerValue { field: "available", .. }));

        let err = ledger
            .apply(&balance("ICPUSDT", dec!(1), dec!(0)))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidLedgerValue { field: "lot_increment", .. }));

        // Nothing written, not even a partial entry
        assert_eq!(ledger.get("ICPUSDT"), None);
    }

    #[test]
    fn test_clones_share_state() {
        let ledger = Ledger::new();
        let handle = ledger.clone();
        handle.merge_available("SOLUSDT", dec!(4)).unwrap();

        let snapshot = ledger.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].0, "SOLUSDT");
        assert_eq!(snapshot[0].1.available, Some(dec!(4)));
    }
}
