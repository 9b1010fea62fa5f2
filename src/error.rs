//! Error taxonomy for the rebalancing engine.
//!
//! Every variant except [`EngineError::BootstrapExhausted`] is contained at
//! the event-handler boundary: the router logs it and moves on to the next
//! message.

use rust_decimal::Decimal;
use thiserror::Error;

/// Errors raised by the engine core and its collaborator boundaries.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Bus payload could not be decoded into a balance or price event.
    #[error("Malformed {subject} event: {reason}")]
    MalformedEvent { subject: String, reason: String },

    /// Ledger entry for the symbol is missing `available` or `lot_increment`.
    #[error("Ledger entry for {symbol} is not initialized yet")]
    Uninitialized { symbol: String },

    /// Price events with a non-positive open price are dropped.
    #[error("Invalid price {price} for {symbol}")]
    InvalidPrice { symbol: String, price: Decimal },

    /// A merge would break a ledger invariant.
    #[error("Invalid {field} {value} for {symbol}")]
    InvalidLedgerValue {
        symbol: String,
        field: &'static str,
        value: Decimal,
    },

    /// Exchange refused the order. Never retried.
    #[error("Order for {symbol} rejected (code {code}): {message}")]
    OrderRejected {
        symbol: String,
        code: i64,
        message: String,
    },

    /// Network failure talking to a collaborator.
    #[error("Transport error: {0}")]
    Transport(#[from] anyhow::Error),

    /// Startup could not populate the ledger within the retry budget.
    #[error("Bootstrap step '{step}' failed after {attempts} attempts: {last_error}")]
    BootstrapExhausted {
        step: &'static str,
        attempts: u32,
        last_error: String,
    },
}

impl EngineError {
    /// Build a malformed event error for a bus subject.
    pub fn malformed(subject: impl Into<String>, reason: impl Into<String>) -> Self {
        EngineError::MalformedEvent {
            subject: subject.into(),
            reason: reason.into(),
        }
    }

    /// Whether the failure should surface at warning level or above.
    ///
    /// Uninitialized entries are an expected startup condition and are
    /// reported at debug.
    pub fn is_warning(&self) -> bool {
        !matches!(self, EngineError::Uninitialized { .. })
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_uninitialized_is_not_warning() {
        let err = EngineError::Uninitialized {
            symbol: "BTCUSDT".to_string(),
        };
        assert!(!err.is_warning());

        let err = EngineError::InvalidPrice {
            symbol: "BTCUSDT".to_string(),
            price: dec!(0),
        };
        assert!(err.is_warning());
    }

    #[test]
    fn test_error_messages() {
        let err = EngineError::malformed("candle", "missing field `open_price`");
        assert_eq!(
            err.to_string(),
            "Malformed candle event: missing field `open_price`"
        );

        let err = EngineError::OrderRejected {
            symbol: "ETHUSDT".to_string(),
            code: -2010,
            message: "Account has insufficient balance".to_string(),
        };
        assert!(err.to_string().contains("-2010"));
    }
}
