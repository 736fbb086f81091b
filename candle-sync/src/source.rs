//! REST access to the chart backend
//!
//! [`CandleSource`] is the seam the poll loop and the stream's initial load
//! fetch through; [`ApiClient`] is the reqwest implementation.

use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize};
use tracing::debug;
use url::Url;

use crate::config::{join_path, SyncConfig};
use crate::error::FetchError;
use crate::types::{Candle, SubscriptionKey};

/// Longest error body kept when the backend answers with plain text
const MAX_ERROR_BODY: usize = 200;

/// Anything that can produce the full candle array for a subscription
#[async_trait]
pub trait CandleSource: Send + Sync + 'static {
    async fn fetch_candles(&self, key: &SubscriptionKey) -> Result<Vec<Candle>, FetchError>;
}

/// Selectable timeframe advertised by the backend
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Timeframe {
    pub interval: String,
    pub label: String,
}

#[derive(Debug, Deserialize)]
struct SymbolsResponse {
    #[serde(default)]
    symbols: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct PriceResponse {
    price: PriceValue,
}

/// Backend sends the price either as a number or as a decimal string
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PriceValue {
    Number(f64),
    Text(String),
}

/// HTTP client for the chart backend
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    api_base: Url,
    timeout: Duration,
}

impl ApiClient {
    pub fn new(api_base: Url, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base,
            timeout,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.api_base.clone(), config.request_timeout)
    }

    pub fn api_base(&self) -> &Url {
        &self.api_base
    }

    /// Symbols matching `query` (all symbols when `None`)
    pub async fn symbols(&self, query: Option<&str>) -> Result<Vec<String>, FetchError> {
        let mut url = self.url("api/search")?;
        if let Some(query) = query.filter(|q| !q.trim().is_empty()) {
            url.query_pairs_mut().append_pair("q", query.trim());
        }
        let response: SymbolsResponse = self.get_json(url).await?;
        Ok(response.symbols)
    }

    pub async fn timeframes(&self) -> Result<Vec<Timeframe>, FetchError> {
        let url = self.url("api/timeframes")?;
        self.get_json(url).await
    }

    /// Latest traded price for `symbol`, used as the liquidation reference price
    pub async fn reference_price(&self, symbol: &str) -> Result<f64, FetchError> {
        let url = self.url(&format!("get_price/{symbol}"))?;
        let response: PriceResponse = self.get_json(url).await?;
        match response.price {
            PriceValue::Number(price) => Ok(price),
            PriceValue::Text(text) => text
                .trim()
                .parse()
                .map_err(|_| FetchError::Decode(format!("price is not numeric: {text}"))),
        }
    }

    fn url(&self, path: &str) -> Result<Url, FetchError> {
        join_path(&self.api_base, path).map_err(|error| FetchError::Network(error.to_string()))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, FetchError> {
        debug!(%url, "GET");
        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                status: status.as_u16(),
                body: error_message(&body),
            });
        }

        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|error| FetchError::Decode(error.to_string()))
    }
}

#[async_trait]
impl CandleSource for ApiClient {
    async fn fetch_candles(&self, key: &SubscriptionKey) -> Result<Vec<Candle>, FetchError> {
        let mut url = self.url("api/data")?;
        let query = key
            .to_query()
            .map_err(|error| FetchError::Network(error.to_string()))?;
        url.set_query(Some(&query));
        self.get_json(url).await
    }
}

/// Extract a readable message from a non-2xx body (JSON or plain text)
fn error_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for field in ["error", "detail", "message"] {
            if let Some(message) = value.get(field).and_then(|v| v.as_str()) {
                return message.to_string();
            }
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "empty response body".to_string();
    }
    trimmed.chars().take(MAX_ERROR_BODY).collect()
}
