//! # Exposure Balancer
//!
//! Event-driven rebalancer that keeps a fixed quote-currency exposure in
//! every traded token on a Binance cross margin account.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `bus`: At-least-once message bus for `balance` and `candle` subjects
//! - `engine`: Ledger, decision logic, order dispatch, startup sync, ingestion
//! - `exchange`: Binance API client (REST + WebSocket), mock and paper gateways
//! - `feed`: Kline and account streams publishing to the bus
//! - `error`: Engine error taxonomy
//! - `utils`: Shared utilities and decimal arithmetic

pub mod bus;
pub mod config;
pub mod engine;
pub mod error;
pub mod exchange;
pub mod feed;
pub mod utils;

pub use config::Config;
pub use error::{EngineError, EngineResult};
