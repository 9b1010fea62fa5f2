//! Binance WebSocket client for klines and user data updates.

use anyhow::{Context, Result};
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

const SPOT_WS_URL: &str = "wss://stream.binance.com:443";
const SPOT_TESTNET_WS_URL: &str = "wss://stream.testnet.binance.vision";

/// WebSocket event types.
#[derive(Debug, Clone)]
pub enum WsEvent {
    /// Kline (candle) update
    Kline(KlineUpdate),
    /// Account balances changed
    AccountPosition(AccountPositionUpdate),
    /// Connection established
    Connected,
    /// Connection lost
    Disconnected,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KlineUpdate {
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "t")]
    pub open_time: i64,
    #[serde(rename = "o")]
    pub open_price: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountPositionUpdate {
    #[serde(rename = "u")]
    pub update_time: i64,
    #[serde(rename = "B")]
    pub balances: Vec<WsBalance>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WsBalance {
    #[serde(rename = "a")]
    pub asset: String,
    #[serde(rename = "f")]
    pub free: String,
    #[serde(rename = "l")]
    pub locked: String,
}

/// Parse one message of the combined kline stream.
pub fn parse_kline_message(msg: &str) -> Vec<WsEvent> {
    #[derive(Deserialize)]
    struct KlinePayload {
        k: KlineUpdate,
    }

    #[derive(Deserialize)]
    struct StreamWrapper {
        data: KlinePayload,
    }

    match serde_json::from_str::<StreamWrapper>(msg) {
        Ok(wrapper) => vec![WsEvent::Kline(wrapper.data.k)],
        Err(e) => {
            debug!(error = %e, "Ignoring non-kline stream message");
            vec![]
        }
    }
}

/// Parse one message of the user data stream.
pub fn parse_user_data_message(msg: &str) -> Vec<WsEvent> {
    #[derive(Deserialize)]
    struct EventType {
        e: String,
    }

    match serde_json::from_str::<EventType>(msg) {
        Ok(event) if event.e == "outboundAccountPosition" => {
            match serde_json::from_str::<AccountPositionUpdate>(msg) {
                Ok(update) => vec![WsEvent::AccountPosition(update)],
                Err(e) => {
                    warn!(error = %e, "Failed to parse account position update");
                    vec![]
                }
            }
        }
        _ => vec![],
    }
}

/// Binance WebSocket client.
pub struct BinanceWebSocket {
    base_url: String,
}

impl BinanceWebSocket {
    /// Create a new WebSocket client.
    pub fn new(testnet: bool) -> Self {
        let base_url = if testnet {
            SPOT_TESTNET_WS_URL.to_string()
        } else {
            SPOT_WS_URL.to_string()
        };

        Self { base_url }
    }

    /// Combined stream URL for the klines of `symbols`.
    pub fn kline_url(&self, symbols: &[String], interval: &str) -> String {
        let streams: Vec<String> = symbols
            .iter()
            .map(|s| format!("{}@kline_{}", s.to_lowercase(), interval))
            .collect();

        format!("{}/stream?streams={}", self.base_url, streams.join("/"))
    }

    /// Subscribe to kline streams for specific symbols.
    pub async fn subscribe_klines(
        &self,
        symbols: &[String],
        interval: &str,
        tx: mpsc::Sender<WsEvent>,
    ) -> Result<()> {
        let url = self.kline_url(symbols, interval);
        self.connect_and_handle(url, tx, |msg| parse_kline_message(&msg))
            .await
    }

    /// Subscribe to the user data stream of a listen key.
    pub async fn subscribe_user_data(
        &self,
        listen_key: &str,
        tx: mpsc::Sender<WsEvent>,
    ) -> Result<()> {
        let url = format!("{}/ws/{}", self.base_url, listen_key);
        self.connect_and_handle(url, tx, |msg| parse_user_data_message(&msg))
            .await
    }

    /// Generic WebSocket connection handler.
    async fn connect_and_handle<F>(
        &self,
        url: String,
        tx: mpsc::Sender<WsEvent>,
        parser: F,
    ) -> Result<()>
    where
        F: Fn(String) -> Vec<WsEvent> + Send + 'static,
    {
        info!("Connecting to WebSocket: {}", url);

        let (ws_stream, _) = connect_async(&url)
            .await
            .context("Failed to connect to WebSocket")?;

        let (_write, mut read) = ws_stream.split();

        // Notify connection established
        let _ = tx.send(WsEvent::Connected).await;

        // Handle incoming messages
        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        for event in parser(text.to_string()) {
                            if tx.send(event).await.is_err() {
                                warn!("Event receiver dropped");
                                return;
                            }
                        }
                    }
                    Ok(Message::Ping(_data)) => {
                        debug!("Received ping, sending pong");
                        // Pong is handled automatically by tungstenite
                    }
                    Ok(Message::Close(_)) => {
                        info!("WebSocket closed by server");
                        let _ = tx.send(WsEvent::Disconnected).await;
                        return;
                    }
                    Err(e) => {
                        error!("WebSocket error: {}", e);
                        let _ = tx.send(WsEvent::Disconnected).await;
                        return;
                    }
                    _ => {}
                }
            }
            let _ = tx.send(WsEvent::Disconnected).await;
        });

        Ok(())
    }
}
