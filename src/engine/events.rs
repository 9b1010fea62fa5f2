//! Typed events decoded from bus payloads.

use crate::bus::Subject;
use crate::error::{EngineError, EngineResult};
use crate::utils::{parse_decimal, to_wire};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Balance and lot size of one symbol as reported by the account feed.
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceEvent {
    pub symbol: String,
    pub available: Decimal,
    pub lot_increment: Decimal,
}

/// Candle open price of one symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceEvent {
    pub symbol: String,
    pub open_price: Decimal,
}

/// A decoded bus message.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Balance(BalanceEvent),
    Price(PriceEvent),
}

impl Event {
    pub fn symbol(&self) -> &str {
        match self {
            Event::Balance(e) => &e.symbol,
            Event::Price(e) => &e.symbol,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct BalancePayload {
    symbol: String,
    baseincrement: String,
    available: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct CandlePayload {
    symbol: String,
    open_price: String,
}

/// Decode a bus payload. Missing or malformed fields are rejected.
pub fn decode(subject: Subject, payload: &[u8]) -> EngineResult<Event> {
    let malformed = |reason: String| EngineError::malformed(subject.as_str(), reason);

    match subject {
        Subject::Balance => {
            let raw: BalancePayload =
                serde_json::from_slice(payload).map_err(|e| malformed(e.to_string()))?;
            let symbol = parse_symbol(&raw.symbol).ok_or_else(|| malformed("empty symbol".into()))?;

            let available = parse_decimal(&raw.available)
                .ok_or_else(|| malformed(format!("invalid available '{}'", raw.available)))?;
            if available < Decimal::ZERO {
                return Err(malformed(format!("negative available {}", available)));
            }

            let lot_increment = parse_decimal(&raw.baseincrement).ok_or_else(|| {
                malformed(format!("invalid baseincrement '{}'", raw.baseincrement))
            })?;
            if lot_increment <= Decimal::ZERO {
                return Err(malformed(format!(
                    "non-positive baseincrement {}",
                    lot_increment
                )));
            }

            Ok(Event::Balance(BalanceEvent {
                symbol,
                available,
                lot_increment,
            }))
        }
        Subject::Candle => {
            let raw: CandlePayload =
                serde_json::from_slice(payload).map_err(|e| malformed(e.to_string()))?;
            let symbol = parse_symbol(&raw.symbol).ok_or_else(|| malformed("empty symbol".into()))?;
            let open_price = parse_decimal(&raw.open_price)
                .ok_or_else(|| malformed(format!("invalid open_price '{}'", raw.open_price)))?;

            // Non-positive prices are rejected by the decision engine
            Ok(Event::Price(PriceEvent { symbol, open_price }))
        }
    }
}

fn parse_symbol(raw: &str) -> Option<String> {
    let symbol = raw.trim().to_uppercase();
    (!symbol.is_empty()).then_some(symbol)
}

impl BalanceEvent {
    /// Wire payload for the `balance` subject.
    pub fn to_payload(&self) -> Vec<u8> {
        let payload = BalancePayload {
            symbol: self.symbol.clone(),
            baseincrement: to_wire(self.lot_increment),
            available: to_wire(self.available),
        };
        serde_json::to_vec(&payload).unwrap_or_default()
    }
}

impl PriceEvent {
    /// Wire payload for the `candle` subject.
    pub fn to_payload(&self) -> Vec<u8> {
        let payload = CandlePayload {
            symbol: self.symbol.clone(),
            open_price: to_wire(self.open_price),
        };
        serde_json::to_vec(&payload).unwrap_or_default()
    }
}
