//! Order intents, persisted orders, and fills.

use serde::{Deserialize, Serialize};

use super::id::Symbol;
use super::plan::{Side, TradePlan};

/// Order type submitted to the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Limit,
    Market,
}

/// Exchange-side order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    Open,
    Filled,
    Canceled,
    Rejected,
}

/// A sized, risk-approved plan ready for submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderIntent {
    pub plan: TradePlan,
    pub qty: f64,
    pub order_type: OrderType,
    /// How long a resting limit is given before fallback, in milliseconds.
    pub timeout_ms: u64,
    /// Cancel instead of falling back when the signal no longer holds.
    pub cancel_if_invalid: bool,
}

/// A persisted order row. Unique by `external_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Idempotency key, also sent as the exchange client order id.
    pub external_id: String,
    pub symbol: Symbol,
    pub side: Side,
    pub order_type: OrderType,
    pub price: f64,
    pub qty: f64,
    pub status: OrderStatus,
    pub created_at: i64,
}

/// A fill linked to an order by `external_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub order_external_id: String,
    pub symbol: Symbol,
    pub side: Side,
    pub price: f64,
    pub qty: f64,
    pub fee: f64,
    pub ts: i64,
}
