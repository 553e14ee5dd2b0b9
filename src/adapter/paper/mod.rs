//! Paper-trading exchange.
//!
//! Implements the exchange port entirely in process: candles are seeded
//! by the caller, orders fill according to a configurable mode. Used for
//! dry runs and as the harness for the execution and pipeline tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use crate::domain::{Candle, OrderStatus, Symbol, Timeframe};
use crate::error::{Error, Result};
use crate::port::exchange::{Exchange, OrderAck, OrderRequest};

/// How the paper exchange treats resting limit orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitFillMode {
    /// Limit orders fill at their price the moment they are placed.
    Immediate,
    /// Limit orders rest open and fill on the first status query.
    OnRequery,
    /// Limit orders never fill.
    Never,
}

struct PaperOrder {
    request: OrderRequest,
    status: OrderStatus,
}

/// In-process exchange simulator.
pub struct PaperExchange {
    limit_fill_mode: LimitFillMode,
    klines: RwLock<HashMap<(Symbol, Timeframe), Vec<Candle>>>,
    orders: RwLock<HashMap<String, PaperOrder>>,
    mark_price: RwLock<HashMap<Symbol, f64>>,
    limit_placements: AtomicUsize,
    market_placements: AtomicUsize,
    cancels: AtomicUsize,
}

impl PaperExchange {
    #[must_use]
    pub fn new(limit_fill_mode: LimitFillMode) -> Self {
        Self {
            limit_fill_mode,
            klines: RwLock::new(HashMap::new()),
            orders: RwLock::new(HashMap::new()),
            mark_price: RwLock::new(HashMap::new()),
            limit_placements: AtomicUsize::new(0),
            market_placements: AtomicUsize::new(0),
            cancels: AtomicUsize::new(0),
        }
    }

    /// Seed or extend the candle series returned by `get_klines`.
    pub fn push_candles(&self, candles: Vec<Candle>) {
        let mut klines = self.klines.write();
        for candle in candles {
            klines
                .entry((candle.symbol.clone(), candle.timeframe))
                .or_default()
                .push(candle);
        }
    }

    /// Set the price used to fill market orders for a symbol.
    pub fn set_mark_price(&self, symbol: Symbol, price: f64) {
        self.mark_price.write().insert(symbol, price);
    }

    #[must_use]
    pub fn limit_placements(&self) -> usize {
        self.limit_placements.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn market_placements(&self) -> usize {
        self.market_placements.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Exchange for PaperExchange {
    async fn get_klines(
        &self,
        symbol: &Symbol,
        interval: Timeframe,
        limit: u32,
    ) -> Result<Vec<Candle>> {
        let klines = self.klines.read();
        let series = klines
            .get(&(symbol.clone(), interval))
            .cloned()
            .unwrap_or_default();
        let start = series.len().saturating_sub(limit as usize);
        Ok(series[start..].to_vec())
    }

    async fn server_time(&self) -> Result<i64> {
        Ok(Utc::now().timestamp_millis())
    }

    async fn place_limit(&self, request: &OrderRequest) -> Result<OrderAck> {
        self.limit_placements.fetch_add(1, Ordering::Relaxed);
        let status = match self.limit_fill_mode {
            LimitFillMode::Immediate => OrderStatus::Filled,
            LimitFillMode::OnRequery | LimitFillMode::Never => OrderStatus::Open,
        };
        self.orders.write().insert(
            request.client_order_id.clone(),
            PaperOrder {
                request: request.clone(),
                status,
            },
        );
        Ok(OrderAck {
            client_order_id: request.client_order_id.clone(),
            status,
            avg_fill_price: (status == OrderStatus::Filled).then_some(
                request.price.unwrap_or_default(),
            ),
        })
    }

    async fn place_market(&self, request: &OrderRequest) -> Result<OrderAck> {
        self.market_placements.fetch_add(1, Ordering::Relaxed);
        self.orders.write().insert(
            request.client_order_id.clone(),
            PaperOrder {
                request: request.clone(),
                status: OrderStatus::Filled,
            },
        );
        let fill = self.mark_price.read().get(&request.symbol).copied();
        Ok(OrderAck {
            client_order_id: request.client_order_id.clone(),
            status: OrderStatus::Filled,
            avg_fill_price: fill,
        })
    }

    async fn order_status(&self, _symbol: &Symbol, client_order_id: &str) -> Result<OrderStatus> {
        let mut orders = self.orders.write();
        let order = orders.get_mut(client_order_id).ok_or(Error::Exchange {
            status: 404,
            message: format!("unknown order: {client_order_id}"),
        })?;
        if order.status == OrderStatus::Open && self.limit_fill_mode == LimitFillMode::OnRequery {
            order.status = OrderStatus::Filled;
        }
        Ok(order.status)
    }

    async fn cancel_order(&self, _symbol: &Symbol, client_order_id: &str) -> Result<()> {
        self.cancels.fetch_add(1, Ordering::Relaxed);
        let mut orders = self.orders.write();
        match orders.get_mut(client_order_id) {
            Some(order) => {
                order.status = OrderStatus::Canceled;
                Ok(())
            }
            None => Err(Error::Exchange {
                status: 404,
                message: format!("unknown order: {client_order_id}"),
            }),
        }
    }

    fn exchange_name(&self) -> &'static str {
        "paper"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Side;

    fn request(id: &str, price: Option<f64>) -> OrderRequest {
        OrderRequest {
            symbol: Symbol::new("BTCUSDT"),
            side: Side::Long,
            qty: 1.0,
            price,
            client_order_id: id.to_string(),
        }
    }

    #[tokio::test]
    async fn immediate_mode_fills_limits_at_placement() {
        let exchange = PaperExchange::new(LimitFillMode::Immediate);
        let ack = exchange
            .place_limit(&request("a", Some(100.0)))
            .await
            .unwrap();
        assert_eq!(ack.status, OrderStatus::Filled);
        assert_eq!(ack.avg_fill_price, Some(100.0));
    }

    #[tokio::test]
    async fn never_mode_keeps_limits_open_through_requery() {
        let exchange = PaperExchange::new(LimitFillMode::Never);
        let ack = exchange
            .place_limit(&request("a", Some(100.0)))
            .await
            .unwrap();
        assert_eq!(ack.status, OrderStatus::Open);
        let status = exchange
            .order_status(&Symbol::new("BTCUSDT"), "a")
            .await
            .unwrap();
        assert_eq!(status, OrderStatus::Open);
    }

    #[tokio::test]
    async fn requery_mode_fills_on_status_poll() {
        let exchange = PaperExchange::new(LimitFillMode::OnRequery);
        exchange.place_limit(&request("a", Some(100.0))).await.unwrap();
        let status = exchange
            .order_status(&Symbol::new("BTCUSDT"), "a")
            .await
            .unwrap();
        assert_eq!(status, OrderStatus::Filled);
    }

    #[tokio::test]
    async fn cancel_marks_order_canceled() {
        let exchange = PaperExchange::new(LimitFillMode::Never);
        exchange.place_limit(&request("a", Some(100.0))).await.unwrap();
        exchange
            .cancel_order(&Symbol::new("BTCUSDT"), "a")
            .await
            .unwrap();
        assert_eq!(exchange.cancels(), 1);
        let status = exchange
            .order_status(&Symbol::new("BTCUSDT"), "a")
            .await
            .unwrap();
        assert_eq!(status, OrderStatus::Canceled);
    }

    #[tokio::test]
    async fn klines_return_trailing_window() {
        let exchange = PaperExchange::new(LimitFillMode::Never);
        let symbol = Symbol::new("BTCUSDT");
        let candles: Vec<Candle> = (1..=5)
            .map(|t| Candle {
                symbol: symbol.clone(),
                timeframe: Timeframe::M1,
                close_time: t * 60_000,
                open: 100.0,
                high: 101.0,
                low: 99.0,
                close: 100.0,
                volume: 1.0,
            })
            .collect();
        exchange.push_candles(candles);

        let rows = exchange
            .get_klines(&symbol, Timeframe::M1, 2)
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].close_time, 4 * 60_000);
        assert_eq!(rows[1].close_time, 5 * 60_000);
    }
}
