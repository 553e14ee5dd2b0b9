//! Signed reqwest-based exchange client.
//!
//! Public market data goes out unsigned; private order calls carry the
//! `ApiKey` / `Request-Time` / `Recv-Window` / `Signature` headers with a
//! server-time offset applied. Transient failures (429, 5xx, transport)
//! are retried with exponential backoff behind a client-side token bucket.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::rate_limit::RateLimiter;
use super::sign::{canonical_query, sign_request};
use super::types::parse_kline;
use crate::domain::{Candle, OrderStatus, Side, Symbol, Timeframe};
use crate::error::{Error, Result};
use crate::port::exchange::{Exchange, OrderAck, OrderRequest};

/// Connection settings for the HTTP exchange.
#[derive(Debug, Clone)]
pub struct HttpExchangeConfig {
    pub base_url: String,
    pub api_key: String,
    pub api_secret: String,
    pub recv_window_ms: i64,
    pub request_timeout_ms: u64,
    pub tokens_per_sec: f64,
    pub max_retries: u32,
}

impl Default for HttpExchangeConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.mexc.com".to_string(),
            api_key: String::new(),
            api_secret: String::new(),
            recv_window_ms: 5_000,
            request_timeout_ms: 5_000,
            tokens_per_sec: 10.0,
            max_retries: 3,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ServerTime {
    #[serde(rename = "serverTime")]
    server_time: i64,
}

/// HTTP implementation of the exchange port.
pub struct HttpExchange {
    http: reqwest::Client,
    config: HttpExchangeConfig,
    limiter: RateLimiter,
    /// serverTime − localTime, applied to every private Request-Time.
    time_offset_ms: AtomicI64,
}

impl HttpExchange {
    /// Build the client.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] if the underlying client cannot be built.
    pub fn new(config: HttpExchangeConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;
        Ok(Self {
            http,
            limiter: RateLimiter::new(config.tokens_per_sec),
            time_offset_ms: AtomicI64::new(0),
            config,
        })
    }

    /// Refresh the server-time offset applied to private requests.
    pub async fn sync_time(&self) -> Result<()> {
        let server = self.server_time().await?;
        let offset = server - Utc::now().timestamp_millis();
        self.time_offset_ms.store(offset, Ordering::Relaxed);
        debug!(offset_ms = offset, "Synchronized exchange time offset");
        Ok(())
    }

    fn request_time(&self) -> i64 {
        Utc::now().timestamp_millis() + self.time_offset_ms.load(Ordering::Relaxed)
    }

    fn backoff_delay(attempt: u32) -> Duration {
        let ms = 100u64.saturating_mul(1u64 << (attempt - 1).min(10));
        Duration::from_millis(ms.min(2_000))
    }

    async fn send_with_retry<F>(&self, build: F) -> Result<reqwest::Response>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut attempt = 0u32;
        loop {
            self.limiter.acquire().await;
            match build().send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }
                    let retryable = status.as_u16() == 429 || status.is_server_error();
                    if retryable && attempt < self.config.max_retries {
                        attempt += 1;
                        warn!(status = status.as_u16(), attempt, "Retrying exchange request");
                        tokio::time::sleep(Self::backoff_delay(attempt)).await;
                        continue;
                    }
                    let message = response.text().await.unwrap_or_default();
                    return Err(Error::Exchange {
                        status: status.as_u16(),
                        message,
                    });
                }
                Err(err) => {
                    if attempt < self.config.max_retries {
                        attempt += 1;
                        warn!(error = %err, attempt, "Retrying after transport error");
                        tokio::time::sleep(Self::backoff_delay(attempt)).await;
                        continue;
                    }
                    return Err(Error::Http(err));
                }
            }
        }
    }

    /// Signed GET: the signature covers the canonical sorted query string.
    async fn signed_get(&self, path: &str, params: Vec<(String, String)>) -> Result<Value> {
        let query = canonical_query(&params);
        let url = format!("{}{}?{}", self.config.base_url, path, query);
        let timestamp = self.request_time();
        let signature = sign_request(&self.config.api_secret, &self.config.api_key, timestamp, &query);
        let response = self
            .send_with_retry(|| {
                self.http
                    .get(&url)
                    .header("ApiKey", &self.config.api_key)
                    .header("Request-Time", timestamp)
                    .header("Recv-Window", self.config.recv_window_ms)
                    .header("Signature", &signature)
            })
            .await?;
        Ok(response.json().await?)
    }

    /// Signed POST/DELETE: the signature covers the raw JSON body.
    async fn signed_with_body(
        &self,
        method: reqwest::Method,
        path: &str,
        body: &Value,
    ) -> Result<Value> {
        let url = format!("{}{}", self.config.base_url, path);
        let raw = serde_json::to_string(body)?;
        let timestamp = self.request_time();
        let signature = sign_request(&self.config.api_secret, &self.config.api_key, timestamp, &raw);
        let response = self
            .send_with_retry(|| {
                self.http
                    .request(method.clone(), &url)
                    .header(CONTENT_TYPE, "application/json")
                    .header("ApiKey", &self.config.api_key)
                    .header("Request-Time", timestamp)
                    .header("Recv-Window", self.config.recv_window_ms)
                    .header("Signature", &signature)
                    .body(raw.clone())
            })
            .await?;
        Ok(response.json().await?)
    }

    fn parse_status(value: &Value) -> Result<OrderStatus> {
        let status = value
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("NEW");
        match status {
            "NEW" | "OPEN" | "PARTIALLY_FILLED" => Ok(OrderStatus::Open),
            "FILLED" => Ok(OrderStatus::Filled),
            "CANCELED" | "PARTIALLY_CANCELED" => Ok(OrderStatus::Canceled),
            "REJECTED" | "EXPIRED" => Ok(OrderStatus::Rejected),
            other => Err(Error::Validation(format!("unknown order status: {other}"))),
        }
    }

    fn parse_ack(value: &Value, client_order_id: &str) -> Result<OrderAck> {
        let avg_fill_price = value.get("avgPrice").and_then(|p| match p {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.parse::<f64>().ok(),
            _ => None,
        });
        Ok(OrderAck {
            client_order_id: client_order_id.to_string(),
            status: Self::parse_status(value)?,
            avg_fill_price,
        })
    }

    const fn side_str(side: Side) -> &'static str {
        match side {
            Side::Long => "BUY",
            Side::Short => "SELL",
        }
    }
}

#[async_trait]
impl Exchange for HttpExchange {
    async fn get_klines(
        &self,
        symbol: &Symbol,
        interval: Timeframe,
        limit: u32,
    ) -> Result<Vec<Candle>> {
        let url = format!("{}/api/v3/klines", self.config.base_url);
        let limit = limit.to_string();
        let response = self
            .send_with_retry(|| {
                self.http.get(&url).query(&[
                    ("symbol", symbol.as_str()),
                    ("interval", interval.as_str()),
                    ("limit", limit.as_str()),
                ])
            })
            .await?;
        let rows: Vec<Value> = response.json().await?;
        rows.iter()
            .map(|row| parse_kline(row, symbol, interval))
            .collect()
    }

    async fn server_time(&self) -> Result<i64> {
        let url = format!("{}/api/v3/time", self.config.base_url);
        let response = self.send_with_retry(|| self.http.get(&url)).await?;
        let time: ServerTime = response.json().await?;
        Ok(time.server_time)
    }

    async fn place_limit(&self, request: &OrderRequest) -> Result<OrderAck> {
        let price = request.price.ok_or_else(|| {
            Error::Execution("limit order requires a price".to_string())
        })?;
        let body = json!({
            "symbol": request.symbol.as_str(),
            "side": Self::side_str(request.side),
            "type": "LIMIT",
            "quantity": request.qty,
            "price": price,
            "newClientOrderId": request.client_order_id,
        });
        let value = self
            .signed_with_body(reqwest::Method::POST, "/api/v3/order", &body)
            .await?;
        Self::parse_ack(&value, &request.client_order_id)
    }

    async fn place_market(&self, request: &OrderRequest) -> Result<OrderAck> {
        let body = json!({
            "symbol": request.symbol.as_str(),
            "side": Self::side_str(request.side),
            "type": "MARKET",
            "quantity": request.qty,
            "newClientOrderId": request.client_order_id,
        });
        let value = self
            .signed_with_body(reqwest::Method::POST, "/api/v3/order", &body)
            .await?;
        Self::parse_ack(&value, &request.client_order_id)
    }

    async fn order_status(&self, symbol: &Symbol, client_order_id: &str) -> Result<OrderStatus> {
        let value = self
            .signed_get(
                "/api/v3/order",
                vec![
                    ("symbol".to_string(), symbol.as_str().to_string()),
                    (
                        "origClientOrderId".to_string(),
                        client_order_id.to_string(),
                    ),
                ],
            )
            .await?;
        Self::parse_status(&value)
    }

    async fn cancel_order(&self, symbol: &Symbol, client_order_id: &str) -> Result<()> {
        let body = json!({
            "symbol": symbol.as_str(),
            "origClientOrderId": client_order_id,
        });
        self.signed_with_body(reqwest::Method::DELETE, "/api/v3/order", &body)
            .await?;
        Ok(())
    }

    fn exchange_name(&self) -> &'static str {
        "http"
    }
}
