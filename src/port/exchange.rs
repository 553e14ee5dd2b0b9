//! Exchange port for market data and order routing.
//!
//! The HTTP adapter and the paper-trading simulator both implement this
//! trait; the pipeline never talks to an exchange any other way.

use async_trait::async_trait;

use crate::domain::{Candle, OrderStatus, Side, Symbol, Timeframe};
use crate::error::Result;

/// An order to submit. `price` is `None` for market orders.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub symbol: Symbol,
    pub side: Side,
    pub qty: f64,
    pub price: Option<f64>,
    /// Client-chosen idempotency key echoed back by the exchange.
    pub client_order_id: String,
}

/// Exchange acknowledgement of a submission.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderAck {
    pub client_order_id: String,
    pub status: OrderStatus,
    /// Average fill price when the exchange reports one.
    pub avg_fill_price: Option<f64>,
}

/// Market data and order routing operations.
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Fetch the most recent `limit` candles for a symbol and interval,
    /// oldest-first. The last bar may still be in progress.
    async fn get_klines(
        &self,
        symbol: &Symbol,
        interval: Timeframe,
        limit: u32,
    ) -> Result<Vec<Candle>>;

    /// Exchange wall-clock in epoch milliseconds.
    async fn server_time(&self) -> Result<i64>;

    /// Place a limit order.
    async fn place_limit(&self, request: &OrderRequest) -> Result<OrderAck>;

    /// Place a market order.
    async fn place_market(&self, request: &OrderRequest) -> Result<OrderAck>;

    /// Current status of an order by client order id.
    async fn order_status(&self, symbol: &Symbol, client_order_id: &str) -> Result<OrderStatus>;

    /// Cancel an open order by client order id.
    async fn cancel_order(&self, symbol: &Symbol, client_order_id: &str) -> Result<()>;

    /// Exchange name for logging.
    fn exchange_name(&self) -> &'static str;
}
