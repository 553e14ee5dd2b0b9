//! Repository ports for persisted pipeline state.
//!
//! One trait per logical entity, mirroring the relational unique
//! constraints: candles by (symbol, timeframe, close_time), features by
//! (symbol, timeframe, computed_at), orders by external id, regime
//! decisions by (symbol, close_time_5m).

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{
    AuditEvent, Candle, FeatureVector, Fill, Order, OrderStatus, ParamVersion, Position,
    PositionId, RegimeDecision, Symbol, Timeframe,
};
use crate::error::Result;

/// Finalized-candle persistence.
#[async_trait]
pub trait CandleStore: Send + Sync {
    /// Insert a candle unless its key already exists. Returns `true` when
    /// the row was newly inserted.
    async fn upsert(&self, candle: &Candle) -> Result<bool>;

    /// The last `limit` candles at or before `close_time`, oldest-first.
    async fn recent(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        close_time: i64,
        limit: usize,
    ) -> Result<Vec<Candle>>;
}

/// Feature-vector persistence, one row per (symbol, timeframe, computed_at).
#[async_trait]
pub trait FeatureStore: Send + Sync {
    async fn upsert(&self, feature: &FeatureVector) -> Result<()>;
}

/// Regime-decision persistence, one row per (symbol, close_time_5m).
#[async_trait]
pub trait RegimeStore: Send + Sync {
    async fn upsert(&self, decision: &RegimeDecision) -> Result<()>;

    async fn latest(&self, symbol: &Symbol) -> Result<Option<RegimeDecision>>;
}

/// Order persistence keyed by external id.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Insert a new order row.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::Error::Store`] when the external id already
    /// exists; the execution engine relies on this constraint for
    /// idempotency.
    async fn insert(&self, order: &Order) -> Result<()>;

    async fn find(&self, external_id: &str) -> Result<Option<Order>>;

    async fn update_status(&self, external_id: &str, status: OrderStatus) -> Result<()>;
}

/// Fill persistence.
#[async_trait]
pub trait FillStore: Send + Sync {
    async fn insert(&self, fill: &Fill) -> Result<()>;
}

/// Position persistence and the aggregates the risk gate needs.
#[async_trait]
pub trait PositionStore: Send + Sync {
    async fn insert(&self, position: &Position) -> Result<()>;

    async fn update(&self, position: &Position) -> Result<()>;

    async fn find(&self, id: PositionId) -> Result<Option<Position>>;

    async fn count_open_for(&self, symbol: &Symbol) -> Result<usize>;

    /// All open positions for a symbol.
    async fn open_for(&self, symbol: &Symbol) -> Result<Vec<Position>>;

    async fn count_open(&self) -> Result<usize>;

    /// When the most recent position for this symbol was closed, if any.
    async fn last_closed_at(&self, symbol: &Symbol) -> Result<Option<i64>>;

    /// Record the close instant for a symbol, feeding the cooldown gate.
    async fn mark_closed(&self, symbol: &Symbol, ts: i64) -> Result<()>;
}

/// Append-only audit trail. The store assigns sequential ids.
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append(&self, event: AuditEvent) -> Result<AuditEvent>;
}

/// Parameter-version lookups.
#[async_trait]
pub trait ParamStore: Send + Sync {
    /// The version with the greatest `effective_from` ≤ `ts`.
    async fn active_at(&self, ts: i64) -> Result<ParamVersion>;
}

/// The bundle of repositories handed to pipeline components.
#[derive(Clone)]
pub struct Stores {
    pub candles: Arc<dyn CandleStore>,
    pub features: Arc<dyn FeatureStore>,
    pub regimes: Arc<dyn RegimeStore>,
    pub orders: Arc<dyn OrderStore>,
    pub fills: Arc<dyn FillStore>,
    pub positions: Arc<dyn PositionStore>,
    pub audits: Arc<dyn AuditStore>,
    pub params: Arc<dyn ParamStore>,
}
