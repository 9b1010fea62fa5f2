//! Exchange integrations for the balancer.
//!
//! ## Binance
//! Provides both REST API and WebSocket connectivity for:
//! - Account balances and symbol lot sizes (startup sync)
//! - Cross margin limit orders
//! - Kline and user data streams feeding the message bus
//!
//! ## Mock / Paper
//! In-memory gateways for tests and dry runs.

mod client;
pub mod mock;
pub mod paper;
mod traits;
mod types;
mod websocket;

pub use client::BinanceClient;
pub use mock::MockExchange;
pub use paper::PaperExchange;
#[cfg(test)]
pub use traits::MockExchangeGateway;
pub use traits::ExchangeGateway;
pub use types::*;
pub use websocket::{
    parse_kline_message, parse_user_data_message, AccountPositionUpdate, BinanceWebSocket,
    KlineUpdate, WsBalance, WsEvent,
};
