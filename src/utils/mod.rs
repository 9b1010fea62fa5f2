//! Shared helpers.

pub mod decimal;

pub use decimal::{floor_to_multiple, parse_decimal, to_wire};
