//! Bittrex v1.1 REST gateway
//!
//! Thin HTTP client over the public/account/market endpoints. Private
//! endpoints carry an `apikey` + `nonce` query pair and an `apisign`
//! header, the hex HMAC-SHA512 of the full request URI.
//!
//! Read-only queries retry transient failures with exponential backoff.
//! Placement and cancellation are sent exactly once here; the order
//! lifecycle owns retry policy for those.

use backoff::{future::retry, ExponentialBackoff};
use chrono::{DateTime, NaiveDateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha512;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::ExchangeConfig;
use crate::error::{Error, Result};
use crate::gateway::{Balance, ExchangeGateway, MarketSummary, OrderStatus, Side, Ticker};

type HmacSha512 = Hmac<Sha512>;

/// Response envelope shared by every v1.1 endpoint
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(default)]
    message: String,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TickerResult {
    bid: f64,
    ask: f64,
    last: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SummaryResult {
    market_name: String,
    #[serde(default)]
    bid: f64,
    #[serde(default)]
    ask: f64,
    #[serde(default)]
    last: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BalanceResult {
    currency: String,
    #[serde(default)]
    available: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct OrderResult {
    order_uuid: String,
    is_open: bool,
    closed: Option<String>,
    quantity: f64,
    quantity_remaining: f64,
    price_per_unit: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct UuidResult {
    uuid: String,
}

/// Bittrex implementation of the exchange gateway
pub struct BittrexGateway {
    client: Client,
    api_url: String,
    api_key: String,
    api_secret: String,
    retry_budget: Duration,
}

impl BittrexGateway {
    pub fn new(config: &ExchangeConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
            retry_budget: Duration::from_millis(config.timeout_ms * config.max_retries as u64),
        })
    }

    /// Hex HMAC-SHA512 of the full request URI, keyed by the API secret.
    fn sign(&self, uri: &str) -> Result<String> {
        let mut mac = HmacSha512::new_from_slice(self.api_secret.as_bytes())
            .map_err(|e| Error::Config(format!("Invalid API secret: {}", e)))?;
        mac.update(uri.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn public_uri(&self, path: &str, params: &[(&str, String)]) -> String {
        let mut uri = format!("{}{}", self.api_url, path);
        for (i, (key, value)) in params.iter().enumerate() {
            let sep = if i == 0 { '?' } else { '&' };
            uri.push_str(&format!("{}{}={}", sep, key, value));
        }
        uri
    }

    fn private_uri(&self, path: &str, params: &[(&str, String)]) -> String {
        let nonce = Utc::now().timestamp_millis().to_string();
        let mut all = vec![
            ("apikey", self.api_key.clone()),
            ("nonce", nonce),
        ];
        all.extend(params.iter().map(|(k, v)| (*k, v.clone())));
        self.public_uri(path, &all)
    }

    /// Single request, unwrapping the response envelope.
    async fn request<T: DeserializeOwned>(&self, uri: &str, signed: bool) -> Result<T> {
        let mut req = self.client.get(uri);
        if signed {
            req = req.header("apisign", self.sign(uri)?);
        }

        debug!("GET {}", uri);
        let response: ApiResponse<T> = req.send().await?.json().await?;

        if !response.success {
            return Err(Error::Api(response.message));
        }
        response
            .result
            .ok_or_else(|| Error::Deserialization("Missing result field".to_string()))
    }

    /// Read-only request with bounded exponential-backoff retry.
    async fn query<T: DeserializeOwned>(&self, uri: &str, signed: bool) -> Result<T> {
        let backoff = ExponentialBackoff {
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_millis(500),
            max_elapsed_time: Some(self.retry_budget),
            ..Default::default()
        };

        retry(backoff, || async {
            match self.request(uri, signed).await {
                Ok(result) => Ok(result),
                Err(e) if e.is_retryable() => {
                    warn!("Retryable API error: {}", e);
                    Err(backoff::Error::transient(e))
                }
                Err(e) => Err(backoff::Error::permanent(e)),
            }
        })
        .await
    }
}

fn parse_closed_time(closed: Option<&str>) -> Option<DateTime<Utc>> {
    let closed = closed?;
    // Bittrex reports naive UTC timestamps with optional fraction
    NaiveDateTime::parse_from_str(closed, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

impl From<OrderResult> for OrderStatus {
    fn from(order: OrderResult) -> Self {
        Self {
            closed_at: parse_closed_time(order.closed.as_deref()),
            order_id: order.order_uuid,
            is_open: order.is_open,
            quantity: order.quantity,
            quantity_remaining: order.quantity_remaining,
            price_per_unit: order.price_per_unit,
        }
    }
}

#[async_trait::async_trait]
impl ExchangeGateway for BittrexGateway {
    async fn place_order(
        &self,
        market: &str,
        side: Side,
        quantity: f64,
        rate: f64,
    ) -> Result<String> {
        let path = match side {
            Side::Buy => "/market/buylimit",
            Side::Sell => "/market/selllimit",
        };
        let uri = self.private_uri(
            path,
            &[
                ("market", market.to_string()),
                ("quantity", quantity.to_string()),
                ("rate", rate.to_string()),
            ],
        );

        match self.request::<UuidResult>(&uri, true).await {
            Ok(result) => Ok(result.uuid),
            Err(Error::Api(message)) => Err(Error::OrderRejected(message)),
            Err(e) => Err(e),
        }
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        let uri = self.private_uri("/market/cancel", &[("uuid", order_id.to_string())]);

        // Cancel returns a null result on success, so decode into Value
        match self.request::<serde_json::Value>(&uri, true).await {
            Ok(_) => Ok(()),
            Err(Error::Api(_)) => Err(Error::CancelFailed(order_id.to_string())),
            Err(Error::Deserialization(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn get_order(&self, order_id: &str) -> Result<OrderStatus> {
        let uri = self.private_uri("/account/getorder", &[("uuid", order_id.to_string())]);
        let order: OrderResult = self.query(&uri, true).await?;
        Ok(order.into())
    }

    async fn get_ticker(&self, market: &str) -> Result<Ticker> {
        let uri = self.public_uri("/public/getticker", &[("market", market.to_string())]);
        let ticker: TickerResult = self.query(&uri, false).await?;
        Ok(Ticker {
            bid: ticker.bid,
            ask: ticker.ask,
            last: ticker.last,
        })
    }

    async fn get_market_summaries(&self) -> Result<Vec<MarketSummary>> {
        let uri = self.public_uri("/public/getmarketsummaries", &[]);
        let summaries: Vec<SummaryResult> = self.query(&uri, false).await?;
        Ok(summaries
            .into_iter()
            .map(|s| MarketSummary {
                market_name: s.market_name,
                bid: s.bid,
                ask: s.ask,
                last: s.last,
            })
            .collect())
    }

    async fn get_balance(&self, currency: &str) -> Result<Balance> {
        let uri = self.private_uri("/account/getbalance", &[("currency", currency.to_string())]);
        let balance: BalanceResult = self.query(&uri, true).await?;
        Ok(Balance {
            currency: balance.currency,
            available: balance.available,
        })
    }
}
