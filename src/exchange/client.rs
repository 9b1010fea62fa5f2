//! Binance REST API client (spot + cross margin).

use crate::config::ExchangeConfig;
use crate::error::{EngineError, EngineResult};
use crate::exchange::traits::ExchangeGateway;
use crate::exchange::types::*;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, Response};
use sha2::Sha256;
use tracing::{debug, instrument};

const SPOT_BASE_URL: &str = "https://api.binance.com";
const SPOT_TESTNET_URL: &str = "https://testnet.binance.vision";

/// Binance API client for the cross margin account.
pub struct BinanceClient {
    http: Client,
    api_key: String,
    secret_key: String,
    base_url: String,
    recv_window_ms: u64,
}

impl BinanceClient {
    /// Create a new Binance client from configuration.
    pub fn new(config: &ExchangeConfig) -> Result<Self> {
        let base_url = if config.testnet {
            SPOT_TESTNET_URL
        } else {
            SPOT_BASE_URL
        };

        Self::with_base_url(config, base_url)
    }

    /// Create a client against an explicit REST endpoint.
    pub fn with_base_url(config: &ExchangeConfig, base_url: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            secret_key: config.secret_key.clone(),
            base_url: base_url.trim_end_matches('/').to_string(),
            recv_window_ms: config.recv_window_ms,
        })
    }

    /// Generate HMAC-SHA256 signature for authenticated requests.
    fn sign(&self, query_string: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.secret_key.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(query_string.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Canonical query string: keys sorted, values URL-encoded.
    fn canonical_query(mut params: Vec<(String, String)>) -> String {
        params.sort_by(|a, b| a.0.cmp(&b.0));
        params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Build the full URL of a signed request.
    fn signed_url(&self, path: &str, mut params: Vec<(String, String)>) -> String {
        params.push(("recvWindow".to_string(), self.recv_window_ms.to_string()));
        params.push((
            "timestamp".to_string(),
            chrono::Utc::now().timestamp_millis().to_string(),
        ));

        let query = Self::canonical_query(params);
        let signature = self.sign(&query);
        format!("{}{}?{}&signature={}", self.base_url, path, query, signature)
    }

    /// Send a request carrying the API key header.
    async fn send_keyed(&self, method: Method, url: &str) -> Result<Response> {
        self.http
            .request(method, url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .with_context(|| format!("Request to {} failed", strip_query(url)))
    }

    /// Parse a successful body, or turn a Binance error body into an error.
    async fn parse<T: serde::de::DeserializeOwned>(response: Response, what: &str) -> Result<T> {
        let status = response.status();
        let body = response
            .text()
            .await
            .with_context(|| format!("Failed to read {} response", what))?;

        if !status.is_success() {
            return match serde_json::from_str::<ApiError>(&body) {
                Ok(err) => Err(anyhow!("{} failed ({}): {} {}", what, status, err.code, err.msg)),
                Err(_) => Err(anyhow!("{} failed ({}): {}", what, status, body)),
            };
        }

        serde_json::from_str(&body).with_context(|| format!("Failed to parse {} response", what))
    }

    // ==================== Market Data (Public) ====================

    /// Get exchange info for a set of spot symbols.
    #[instrument(skip(self))]
    pub async fn get_exchange_info(&self, symbols: &[String]) -> Result<SpotExchangeInfo> {
        let filter = serde_json::to_string(symbols).context("Failed to encode symbol list")?;
        let url = format!(
            "{}/api/v3/exchangeInfo?symbols={}",
            self.base_url,
            urlencoding::encode(&filter)
        );

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .context("Failed to fetch exchange info")?;

        Self::parse(response, "exchange info").await
    }

    // ==================== Account (Authenticated) ====================

    /// Get cross margin account details.
    #[instrument(skip(self))]
    pub async fn get_margin_account(&self) -> Result<CrossMarginAccount> {
        let url = self.signed_url("/sapi/v1/margin/account", Vec::new());
        let response = self.send_keyed(Method::GET, &url).await?;
        Self::parse(response, "margin account").await
    }

    /// Open a user data stream for the cross margin account.
    #[instrument(skip(self))]
    pub async fn create_listen_key(&self) -> Result<String> {
        let url = format!("{}/sapi/v1/userDataStream", self.base_url);
        let response = self.send_keyed(Method::POST, &url).await?;
        let key: ListenKey = Self::parse(response, "listen key").await?;
        Ok(key.listen_key)
    }

    /// Extend the validity of a listen key by 60 minutes.
    #[instrument(skip(self, listen_key))]
    pub async fn keep_alive_listen_key(&self, listen_key: &str) -> Result<()> {
        let url = format!(
            "{}/sapi/v1/userDataStream?listenKey={}",
            self.base_url,
            urlencoding::encode(listen_key)
        );
        let response = self.send_keyed(Method::PUT, &url).await?;
        let _: serde_json::Value = Self::parse(response, "listen key keepalive").await?;
        Ok(())
    }

    // ==================== Orders (Authenticated) ====================

    /// Place a cross margin order. Exchange refusals map to `OrderRejected`.
    #[instrument(skip(self, order), fields(symbol = %order.symbol, side = %order.side))]
    pub async fn place_margin_order(&self, order: &MarginOrder) -> EngineResult<OrderAck> {
        let url = self.signed_url("/sapi/v1/margin/order", order.params());

        debug!("Placing margin order: {:?}", order);

        let response = self
            .send_keyed(Method::POST, &url)
            .await
            .map_err(EngineError::Transport)?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read order response")
            .map_err(EngineError::Transport)?;

        if status.is_success() {
            let parsed: MarginOrderResponse = serde_json::from_str(&body)
                .context("Failed to parse order response")
                .map_err(EngineError::Transport)?;
            return Ok(parsed.into());
        }

        // 4xx with an error body is a refusal; anything else is transport
        match serde_json::from_str::<ApiError>(&body) {
            Ok(err) if status.is_client_error() && status.as_u16() != 429 => {
                Err(EngineError::OrderRejected {
                    symbol: order.symbol.clone(),
                    code: err.code,
                    message: err.msg,
                })
            }
            _ => Err(EngineError::Transport(anyhow!(
                "order placement failed ({}): {}",
                status,
                body
            ))),
        }
    }
}

#[async_trait]
impl ExchangeGateway for BinanceClient {
    async fn fetch_balances(&self) -> Result<Vec<AssetBalance>> {
        let account = self.get_margin_account().await?;
        Ok(account
            .user_assets
            .into_iter()
            .map(|asset| AssetBalance {
                asset: asset.asset,
                free: asset.free,
            })
            .collect())
    }

    async fn fetch_lot_sizes(&self, symbols: &[String]) -> Result<Vec<LotSize>> {
        let info = self.get_exchange_info(symbols).await?;
        Ok(info
            .symbols
            .into_iter()
            .filter_map(|symbol| {
                let step_size = symbol.step_size()?;
                Some(LotSize {
                    symbol: symbol.symbol,
                    step_size,
                })
            })
            .collect())
    }

    async fn submit_order(&self, order: &MarginOrder) -> EngineResult<OrderAck> {
        self.place_margin_order(order).await
    }
}

fn strip_query(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}
