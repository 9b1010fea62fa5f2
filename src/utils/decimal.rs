//! Decimal arithmetic utilities for order quantization.

use rust_decimal::Decimal;

/// Round a non-negative quantity down to a multiple of `increment`.
///
/// Rounding is toward zero, so the result never exceeds `value`. A
/// non-positive increment leaves the value unquantized.
pub fn floor_to_multiple(value: Decimal, increment: Decimal) -> Decimal {
    if increment <= Decimal::ZERO {
        return value;
    }
    (value / increment).trunc() * increment
}

/// Render a decimal without trailing zeros (e.g. `10.0` -> `10`).
pub fn to_wire(value: Decimal) -> String {
    value.normalize().to_string()
}

/// Parse a decimal string as sent by the exchange or the bus.
pub fn parse_decimal(raw: &str) -> Option<Decimal> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    raw.parse::<Decimal>()
        .ok()
        .or_else(|| Decimal::from_scientific(raw).ok())
}
