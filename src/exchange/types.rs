//! Type definitions for Binance API requests and responses.

use crate::utils::to_wire;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error body returned by Binance on non-2xx responses.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiError {
    pub code: i64,
    pub msg: String,
}

/// Cross margin account details.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossMarginAccount {
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub margin_level: Option<Decimal>,
    pub user_assets: Vec<MarginAccountAsset>,
}

/// Asset balance in margin account.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarginAccountAsset {
    pub asset: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub free: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub locked: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub borrowed: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub interest: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub net_asset: Decimal,
}

/// Spot exchange information, filtered to the requested symbols.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpotExchangeInfo {
    pub symbols: Vec<SpotSymbolInfo>,
}

/// Spot symbol information from exchange info.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpotSymbolInfo {
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    pub status: String,
    /// Whether margin trading is permitted
    #[serde(default)]
    pub is_margin_trading_allowed: bool,
    #[serde(default)]
    pub filters: Vec<SymbolFilter>,
}

impl SpotSymbolInfo {
    /// Quantity step from the `LOT_SIZE` filter.
    pub fn step_size(&self) -> Option<Decimal> {
        self.filters.iter().find_map(|filter| match filter {
            SymbolFilter::LotSize { step_size } => Some(*step_size),
            _ => None,
        })
    }
}

/// Symbol trading filters. Only the quantity filter is interpreted.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "filterType", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SymbolFilter {
    #[serde(rename_all = "camelCase")]
    LotSize {
        #[serde(with = "rust_decimal::serde::str")]
        step_size: Decimal,
    },
    #[serde(other)]
    Other,
}

/// Free balance of one asset in the trading account.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetBalance {
    pub asset: String,
    pub free: Decimal,
}

/// Order quantity step for a symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct LotSize {
    pub symbol: String,
    pub step_size: Decimal,
}

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Limit,
    Market,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Limit => "LIMIT",
            OrderType::Market => "MARKET",
        }
    }
}

/// Time in force for limit orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeInForce {
    Gtc, // Good Till Cancel
    Ioc, // Immediate or Cancel
    Fok, // Fill or Kill
}

impl TimeInForce {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeInForce::Gtc => "GTC",
            TimeInForce::Ioc => "IOC",
            TimeInForce::Fok => "FOK",
        }
    }
}

/// Order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    PendingCancel,
    Rejected,
    Expired,
    ExpiredInMatch,
}

/// Side effect type for margin orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SideEffectType {
    /// Normal trade
    NoSideEffect,
    /// Borrow to execute the trade
    MarginBuy,
    /// Repay debt with trade proceeds
    AutoRepay,
}

impl SideEffectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SideEffectType::NoSideEffect => "NO_SIDE_EFFECT",
            SideEffectType::MarginBuy => "MARGIN_BUY",
            SideEffectType::AutoRepay => "AUTO_REPAY",
        }
    }
}

/// Margin order request (cross margin account).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarginOrder {
    pub symbol: String,
    pub side: OrderSide,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub time_in_force: Option<TimeInForce>,
    /// MARGIN_BUY, AUTO_REPAY, etc.
    pub side_effect_type: Option<SideEffectType>,
}

impl MarginOrder {
    /// Good-till-cancel limit order on the cross margin account.
    ///
    /// Buys borrow the quote asset when the account runs short; sells repay
    /// outstanding debt first.
    pub fn limit(symbol: &str, side: OrderSide, quantity: Decimal, price: Decimal) -> Self {
        let side_effect = match side {
            OrderSide::Buy => SideEffectType::MarginBuy,
            OrderSide::Sell => SideEffectType::AutoRepay,
        };

        Self {
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Limit,
            quantity,
            price: Some(price),
            time_in_force: Some(TimeInForce::Gtc),
            side_effect_type: Some(side_effect),
        }
    }

    /// Request parameters, excluding `timestamp`/`recvWindow`/`signature`.
    pub fn params(&self) -> Vec<(String, String)> {
        let mut params = vec![
            ("symbol".to_string(), self.symbol.clone()),
            ("side".to_string(), self.side.as_str().to_string()),
            ("type".to_string(), self.order_type.as_str().to_string()),
            ("quantity".to_string(), to_wire(self.quantity)),
        ];

        if let Some(price) = self.price {
            params.push(("price".to_string(), to_wire(price)));
        }

        if let Some(tif) = self.time_in_force {
            params.push(("timeInForce".to_string(), tif.as_str().to_string()));
        }

        if let Some(side_effect) = self.side_effect_type {
            params.push((
                "sideEffectType".to_string(),
                side_effect.as_str().to_string(),
            ));
        }

        params
    }
}

/// Response to a margin order placement.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarginOrderResponse {
    pub symbol: String,
    pub order_id: i64,
    pub client_order_id: String,
    #[serde(default)]
    pub transact_time: i64,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub price: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub orig_qty: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub executed_qty: Option<Decimal>,
    pub status: OrderStatus,
    pub side: OrderSide,
}

/// Acknowledgement of an accepted order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderAck {
    pub symbol: String,
    pub order_id: i64,
    pub client_order_id: String,
    pub status: OrderStatus,
}

impl From<MarginOrderResponse> for OrderAck {
    fn from(response: MarginOrderResponse) -> Self {
        Self {
            symbol: response.symbol,
            order_id: response.order_id,
            client_order_id: response.client_order_id,
            status: response.status,
        }
    }
}

/// Listen key for the user data stream.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenKey {
    pub listen_key: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_exchange_info_lot_size() {
        let raw = r#"{
            "symbols": [{
                "symbol": "ICPUSDT",
                "baseAsset": "ICP",
                "quoteAsset": "USDT",
                "status": "TRADING",
                "isMarginTradingAllowed": true,
                "filters": [
                    {"filterType": "PRICE_FILTER", "minPrice": "0.001", "maxPrice": "1000", "tickSize": "0.001"},
                    {"filterType": "LOT_SIZE", "minQty": "0.01", "maxQty": "90000", "stepSize": "0.01000000"}
                ]
            }]
        }"#;

        let info: SpotExchangeInfo = serde_json::from_str(raw).unwrap();
        assert_eq!(info.symbols[0].step_size(), Some(dec!(0.01)));
        assert!(info.symbols[0].is_margin_trading_allowed);
    }

    #[test]
    fn test_limit_order_params() {
        let order = MarginOrder::limit("BTCUSDT", OrderSide::Sell, dec!(0.0100), dec!(50000.00));
        let params = order.params();

        assert!(params.contains(&("quantity".to_string(), "0.01".to_string())));
        assert!(params.contains(&("price".to_string(), "50000".to_string())));
        assert!(params.contains(&("timeInForce".to_string(), "GTC".to_string())));
        assert!(params.contains(&("sideEffectType".to_string(), "AUTO_REPAY".to_string())));
    }

    #[test]
    fn test_margin_account_parse() {
        let raw = r#"{
            "marginLevel": "11.64",
            "totalAssetOfBtc": "6.82",
            "userAssets": [
                {"asset": "BTC", "free": "0.00499500", "locked": "0", "borrowed": "0", "interest": "0", "netAsset": "0.00499500"}
            ]
        }"#;

        let account: CrossMarginAccount = serde_json::from_str(raw).unwrap();
        assert_eq!(account.user_assets[0].free, dec!(0.004995));
        assert_eq!(account.margin_level, Some(dec!(11.64)));
    }
}
