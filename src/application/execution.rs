//! Idempotent limit-first order execution.
//!
//! Every plan maps to a stable idempotency key; re-executing the same
//! plan is a no-op. A limit order gets `limit_timeout_ms` to fill, then
//! the signal is re-confirmed and either canceled or pushed through the
//! configured fallback (market, or a buffered replacement limit).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::future::BoxFuture;
use tracing::{debug, info, warn};

use crate::bus::{Event, EventBus};
use crate::domain::{
    hash_of, AuditEvent, AuditLevel, Fill, LifecycleState, Order, OrderIntent, OrderStatus,
    OrderType, Position, PositionId, Side, TradePlan,
};
use crate::error::{Error, Result};
use crate::port::exchange::{Exchange, OrderRequest};
use crate::port::store::{FillStore, OrderStore, PositionStore, Stores};

/// What to do when the limit order times out but the signal still holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackMode {
    Market,
    ReplaceLimit,
}

#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    /// How long the initial limit may rest before fallback.
    pub limit_timeout_ms: u64,
    pub fallback: FallbackMode,
    /// Price buffer for the replacement limit, in percent.
    pub replacement_offset_pct: f64,
    /// Taker fee rate applied to recorded fills.
    pub fee_rate: f64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            limit_timeout_ms: 2_000,
            fallback: FallbackMode::Market,
            replacement_offset_pct: 0.05,
            fee_rate: 0.0,
        }
    }
}

/// Terminal outcome of one execution attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Filled {
        order_external_id: String,
        position_id: PositionId,
        fill_price: f64,
    },
    /// An order with this idempotency key already exists.
    Skipped,
    Canceled {
        reason: String,
    },
}

/// Signal-still-valid probe supplied by the caller.
pub type Confirmation = Arc<dyn Fn() -> BoxFuture<'static, Result<bool>> + Send + Sync>;

pub struct ExecutionEngine {
    exchange: Arc<dyn Exchange>,
    stores: Stores,
    bus: Arc<EventBus>,
    config: ExecutionConfig,
    next_position_id: AtomicU64,
}

impl ExecutionEngine {
    pub fn new(
        exchange: Arc<dyn Exchange>,
        stores: Stores,
        bus: Arc<EventBus>,
        config: ExecutionConfig,
    ) -> Self {
        Self {
            exchange,
            stores,
            bus,
            config,
            next_position_id: AtomicU64::new(0),
        }
    }

    /// Stable idempotency key over the plan-defining fields.
    pub fn idempotency_key(plan: &TradePlan) -> Result<String> {
        let hash = hash_of(&serde_json::json!({
            "symbol": plan.symbol,
            "side": plan.side,
            "entryPrice": plan.entry_price,
            "expiresAt": plan.expires_at,
            "engine": plan.engine,
        }))?;
        Ok(format!("exec-{hash}"))
    }

    /// The default intent for an approved plan: limit-first with this
    /// engine's timeout, canceling when the signal dies.
    #[must_use]
    pub fn intent_for(&self, plan: TradePlan, qty: f64) -> OrderIntent {
        OrderIntent {
            plan,
            qty,
            order_type: OrderType::Limit,
            timeout_ms: self.config.limit_timeout_ms,
            cancel_if_invalid: true,
        }
    }

    /// Execute an order intent. At most one initial exchange order is
    /// ever placed for a given plan, no matter how many times this is
    /// called.
    pub async fn execute(
        &self,
        intent: &OrderIntent,
        leverage: f64,
        confirmation: Confirmation,
    ) -> Result<ExecutionOutcome> {
        let plan = &intent.plan;
        let qty = intent.qty;
        let key = Self::idempotency_key(plan)?;

        if self.stores.orders.find(&key).await?.is_some() {
            debug!(key = %key, symbol = %plan.symbol, "Duplicate execution suppressed");
            self.audit(
                AuditLevel::Debug,
                "execution.execution_skip",
                format!("duplicate execution suppressed for {key}"),
                plan,
            )
            .await?;
            return Ok(ExecutionOutcome::Skipped);
        }

        let request = OrderRequest {
            symbol: plan.symbol.clone(),
            side: plan.side,
            qty,
            price: (intent.order_type == OrderType::Limit).then_some(plan.entry_price),
            client_order_id: key.clone(),
        };
        let ack = match intent.order_type {
            OrderType::Limit => self.exchange.place_limit(&request).await?,
            OrderType::Market => self.exchange.place_market(&request).await?,
        };
        let now = Utc::now().timestamp_millis();
        let order = Order {
            external_id: key.clone(),
            symbol: plan.symbol.clone(),
            side: plan.side,
            order_type: intent.order_type,
            price: plan.entry_price,
            qty,
            status: ack.status,
            created_at: now,
        };
        match self.stores.orders.insert(&order).await {
            Ok(()) => {}
            Err(Error::Store(message)) => {
                // Lost a race with a concurrent execution of the same plan.
                warn!(key = %key, message = %message, "Order row already present");
                return Ok(ExecutionOutcome::Skipped);
            }
            Err(err) => return Err(err),
        }
        info!(
            key = %key,
            symbol = %plan.symbol,
            side = %plan.side,
            qty,
            leverage,
            price = plan.entry_price,
            order_type = ?intent.order_type,
            "Order submitted"
        );
        self.bus.publish(Event::OrderSubmitted(order.clone())).await;
        self.audit(
            AuditLevel::Info,
            "execution.execution_submit",
            format!("order submitted for {}", plan.symbol),
            plan,
        )
        .await?;

        if ack.status == OrderStatus::Filled {
            let price = ack.avg_fill_price.unwrap_or(plan.entry_price);
            return self.record_fill(plan, order, qty, price).await;
        }

        tokio::time::sleep(Duration::from_millis(intent.timeout_ms)).await;
        if self.exchange.order_status(&plan.symbol, &key).await? == OrderStatus::Filled {
            return self.record_fill(plan, order, qty, plan.entry_price).await;
        }

        if intent.cancel_if_invalid && !confirmation().await? {
            self.exchange.cancel_order(&plan.symbol, &key).await?;
            return self
                .record_cancel(plan, order, "signal no longer valid")
                .await;
        }

        match self.config.fallback {
            FallbackMode::Market => {
                self.exchange.cancel_order(&plan.symbol, &key).await?;
                let market_request = OrderRequest {
                    price: None,
                    client_order_id: format!("{key}-mkt"),
                    ..request
                };
                let market_ack = self.exchange.place_market(&market_request).await?;
                let price = market_ack.avg_fill_price.unwrap_or(plan.entry_price);
                self.record_fill(plan, order, qty, price).await
            }
            FallbackMode::ReplaceLimit => {
                self.exchange.cancel_order(&plan.symbol, &key).await?;
                let offset = self.config.replacement_offset_pct / 100.0;
                let replacement_price = match plan.side {
                    Side::Long => plan.entry_price * (1.0 + offset),
                    Side::Short => plan.entry_price * (1.0 - offset),
                };
                let replacement_id = format!("{key}-repl");
                let replacement_ack = self
                    .exchange
                    .place_limit(&OrderRequest {
                        price: Some(replacement_price),
                        client_order_id: replacement_id.clone(),
                        ..request
                    })
                    .await?;
                if replacement_ack.status != OrderStatus::Filled {
                    self.exchange
                        .cancel_order(&plan.symbol, &replacement_id)
                        .await?;
                    return self
                        .record_cancel(plan, order, "replacement limit not filled")
                        .await;
                }
                let price = replacement_ack.avg_fill_price.unwrap_or(replacement_price);
                self.record_fill(plan, order, qty, price).await
            }
        }
    }

    async fn record_fill(
        &self,
        plan: &TradePlan,
        mut order: Order,
        qty: f64,
        price: f64,
    ) -> Result<ExecutionOutcome> {
        let now = Utc::now().timestamp_millis();
        let fill = Fill {
            order_external_id: order.external_id.clone(),
            symbol: plan.symbol.clone(),
            side: plan.side,
            price,
            qty,
            fee: qty * price * self.config.fee_rate,
            ts: now,
        };
        self.stores.fills.insert(&fill).await?;
        self.stores
            .orders
            .update_status(&order.external_id, OrderStatus::Filled)
            .await?;
        order.status = OrderStatus::Filled;

        let position_id = PositionId(self.next_position_id.fetch_add(1, Ordering::Relaxed) + 1);
        let initial_stop = Position::build_initial_stop(price, plan.stop_pct, plan.side, 1.0);
        let position = Position {
            id: position_id,
            symbol: plan.symbol.clone(),
            side: plan.side,
            entry_price: price,
            initial_stop_price: initial_stop,
            stop_price: initial_stop,
            qty,
            remaining_qty: qty,
            state: LifecycleState::InPosition,
            realized_r: 0.0,
            took_1r: false,
            took_2r: false,
            trailing_anchor: price,
            atr_pct: plan.atr_pct,
            params_version_id: plan.params_version_id.clone(),
            opened_at: now,
            updated_at: now,
        };
        self.stores.positions.insert(&position).await?;

        info!(
            key = %order.external_id,
            symbol = %plan.symbol,
            price,
            qty,
            position = %position_id,
            "Order filled"
        );
        self.audit(
            AuditLevel::Info,
            "execution.execution_fill",
            format!("filled {qty} {} at {price}", plan.symbol),
            plan,
        )
        .await?;
        self.bus
            .publish(Event::OrderFilled {
                order: order.clone(),
                fill,
            })
            .await;
        self.bus.publish(Event::PositionUpdated(position)).await;

        Ok(ExecutionOutcome::Filled {
            order_external_id: order.external_id,
            position_id,
            fill_price: price,
        })
    }

    async fn record_cancel(
        &self,
        plan: &TradePlan,
        mut order: Order,
        reason: &str,
    ) -> Result<ExecutionOutcome> {
        self.stores
            .orders
            .update_status(&order.external_id, OrderStatus::Canceled)
            .await?;
        order.status = OrderStatus::Canceled;
        warn!(key = %order.external_id, symbol = %plan.symbol, reason, "Execution canceled");
        self.audit(
            AuditLevel::Warn,
            "execution.execution_cancel",
            format!("canceled: {reason}"),
            plan,
        )
        .await?;
        self.bus.publish(Event::OrderCanceled(order)).await;
        Ok(ExecutionOutcome::Canceled {
            reason: reason.to_string(),
        })
    }

    async fn audit(
        &self,
        level: AuditLevel,
        step: &str,
        message: String,
        plan: &TradePlan,
    ) -> Result<()> {
        let audit = AuditEvent::new(Utc::now().timestamp_millis(), step, level, message)
            .with_inputs_hash(hash_of(plan)?)
            .with_params_version(plan.params_version_id.clone())
            .with_metadata(serde_json::json!({
                "symbol": plan.symbol,
                "engine": plan.engine,
            }));
        self.bus.publish(Event::AuditEvent(audit)).await;
        Ok(())
    }
}
