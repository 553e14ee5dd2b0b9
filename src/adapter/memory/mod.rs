//! In-memory repository implementations.
//!
//! Backing store for the paper-trading setup and the test harness. Each
//! store guards its own map with a `parking_lot` lock; locks are never
//! held across await points.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::domain::{
    AuditEvent, Candle, FeatureVector, Fill, Order, OrderStatus, ParamVersion, Position,
    PositionId, RegimeDecision, Symbol, Timeframe,
};
use crate::error::{Error, Result};
use crate::port::store::{
    AuditStore, CandleStore, FeatureStore, FillStore, OrderStore, ParamStore, PositionStore,
    RegimeStore, Stores,
};

/// Candles keyed by (symbol, timeframe, close_time).
#[derive(Default)]
pub struct MemoryCandleStore {
    rows: RwLock<HashMap<(Symbol, Timeframe), BTreeMap<i64, Candle>>>,
}

#[async_trait]
impl CandleStore for MemoryCandleStore {
    async fn upsert(&self, candle: &Candle) -> Result<bool> {
        let mut rows = self.rows.write();
        let series = rows
            .entry((candle.symbol.clone(), candle.timeframe))
            .or_default();
        if series.contains_key(&candle.close_time) {
            return Ok(false);
        }
        series.insert(candle.close_time, candle.clone());
        Ok(true)
    }

    async fn recent(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        close_time: i64,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        let rows = self.rows.read();
        let Some(series) = rows.get(&(symbol.clone(), timeframe)) else {
            return Ok(Vec::new());
        };
        let selected: Vec<Candle> = series
            .range(..=close_time)
            .map(|(_, c)| c.clone())
            .collect();
        let start = selected.len().saturating_sub(limit);
        Ok(selected[start..].to_vec())
    }
}

/// Features keyed by (symbol, timeframe, computed_at).
#[derive(Default)]
pub struct MemoryFeatureStore {
    rows: RwLock<HashMap<(Symbol, Timeframe, i64), FeatureVector>>,
}

#[async_trait]
impl FeatureStore for MemoryFeatureStore {
    async fn upsert(&self, feature: &FeatureVector) -> Result<()> {
        self.rows.write().insert(
            (
                feature.symbol.clone(),
                feature.timeframe,
                feature.close_time,
            ),
            feature.clone(),
        );
        Ok(())
    }
}

/// Regime decisions keyed by (symbol, close_time_5m).
#[derive(Default)]
pub struct MemoryRegimeStore {
    rows: RwLock<HashMap<Symbol, BTreeMap<i64, RegimeDecision>>>,
}

#[async_trait]
impl RegimeStore for MemoryRegimeStore {
    async fn upsert(&self, decision: &RegimeDecision) -> Result<()> {
        self.rows
            .write()
            .entry(decision.symbol.clone())
            .or_default()
            .insert(decision.close_time_5m, decision.clone());
        Ok(())
    }

    async fn latest(&self, symbol: &Symbol) -> Result<Option<RegimeDecision>> {
        let rows = self.rows.read();
        Ok(rows
            .get(symbol)
            .and_then(|series| series.values().next_back().cloned()))
    }
}

/// Orders keyed by external id; insert enforces uniqueness.
#[derive(Default)]
pub struct MemoryOrderStore {
    rows: RwLock<HashMap<String, Order>>,
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn insert(&self, order: &Order) -> Result<()> {
        let mut rows = self.rows.write();
        if rows.contains_key(&order.external_id) {
            return Err(Error::Store(format!(
                "duplicate order external_id: {}",
                order.external_id
            )));
        }
        rows.insert(order.external_id.clone(), order.clone());
        Ok(())
    }

    async fn find(&self, external_id: &str) -> Result<Option<Order>> {
        Ok(self.rows.read().get(external_id).cloned())
    }

    async fn update_status(&self, external_id: &str, status: OrderStatus) -> Result<()> {
        let mut rows = self.rows.write();
        match rows.get_mut(external_id) {
            Some(order) => {
                order.status = status;
                Ok(())
            }
            None => Err(Error::Store(format!("unknown order: {external_id}"))),
        }
    }
}

#[derive(Default)]
pub struct MemoryFillStore {
    rows: RwLock<Vec<Fill>>,
}

impl MemoryFillStore {
    /// Snapshot of all recorded fills, for inspection in tests.
    #[must_use]
    pub fn fills(&self) -> Vec<Fill> {
        self.rows.read().clone()
    }
}

#[async_trait]
impl FillStore for MemoryFillStore {
    async fn insert(&self, fill: &Fill) -> Result<()> {
        self.rows.write().push(fill.clone());
        Ok(())
    }
}

/// Positions plus the per-symbol close timestamps the cooldown gate reads.
#[derive(Default)]
pub struct MemoryPositionStore {
    rows: RwLock<HashMap<PositionId, Position>>,
    closed_at: RwLock<HashMap<Symbol, i64>>,
}

#[async_trait]
impl PositionStore for MemoryPositionStore {
    async fn insert(&self, position: &Position) -> Result<()> {
        self.rows.write().insert(position.id, position.clone());
        Ok(())
    }

    async fn update(&self, position: &Position) -> Result<()> {
        self.rows.write().insert(position.id, position.clone());
        Ok(())
    }

    async fn find(&self, id: PositionId) -> Result<Option<Position>> {
        Ok(self.rows.read().get(&id).cloned())
    }

    async fn count_open_for(&self, symbol: &Symbol) -> Result<usize> {
        Ok(self
            .rows
            .read()
            .values()
            .filter(|p| &p.symbol == symbol && p.is_open())
            .count())
    }

    async fn open_for(&self, symbol: &Symbol) -> Result<Vec<Position>> {
        Ok(self
            .rows
            .read()
            .values()
            .filter(|p| &p.symbol == symbol && p.is_open())
            .cloned()
            .collect())
    }

    async fn count_open(&self) -> Result<usize> {
        Ok(self.rows.read().values().filter(|p| p.is_open()).count())
    }

    async fn last_closed_at(&self, symbol: &Symbol) -> Result<Option<i64>> {
        Ok(self.closed_at.read().get(symbol).copied())
    }

    async fn mark_closed(&self, symbol: &Symbol, ts: i64) -> Result<()> {
        self.closed_at.write().insert(symbol.clone(), ts);
        Ok(())
    }
}

/// Append-only audit log with store-assigned sequential ids.
#[derive(Default)]
pub struct MemoryAuditStore {
    rows: RwLock<Vec<AuditEvent>>,
    next_id: AtomicU64,
}

impl MemoryAuditStore {
    /// Snapshot of the trail, for inspection in tests.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.rows.read().clone()
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn append(&self, mut event: AuditEvent) -> Result<AuditEvent> {
        event.id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.rows.write().push(event.clone());
        Ok(event)
    }
}

/// Parameter versions, seeded with the baseline.
pub struct MemoryParamStore {
    versions: RwLock<Vec<ParamVersion>>,
}

impl Default for MemoryParamStore {
    fn default() -> Self {
        Self {
            versions: RwLock::new(vec![ParamVersion::baseline()]),
        }
    }
}

impl MemoryParamStore {
    /// Publish a new version; callers keep `effective_from` ascending.
    pub fn publish(&self, version: ParamVersion) {
        let mut versions = self.versions.write();
        versions.push(version);
        versions.sort_by_key(|v| v.effective_from);
    }
}

#[async_trait]
impl ParamStore for MemoryParamStore {
    async fn active_at(&self, ts: i64) -> Result<ParamVersion> {
        let versions = self.versions.read();
        versions
            .iter()
            .rev()
            .find(|v| v.effective_from <= ts)
            .or_else(|| versions.first())
            .cloned()
            .ok_or_else(|| Error::Store("no parameter versions published".to_string()))
    }
}

/// All in-memory stores, with typed handles retained for inspection.
pub struct MemoryBackend {
    pub candles: Arc<MemoryCandleStore>,
    pub features: Arc<MemoryFeatureStore>,
    pub regimes: Arc<MemoryRegimeStore>,
    pub orders: Arc<MemoryOrderStore>,
    pub fills: Arc<MemoryFillStore>,
    pub positions: Arc<MemoryPositionStore>,
    pub audits: Arc<MemoryAuditStore>,
    pub params: Arc<MemoryParamStore>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self {
            candles: Arc::new(MemoryCandleStore::default()),
            features: Arc::new(MemoryFeatureStore::default()),
            regimes: Arc::new(MemoryRegimeStore::default()),
            orders: Arc::new(MemoryOrderStore::default()),
            fills: Arc::new(MemoryFillStore::default()),
            positions: Arc::new(MemoryPositionStore::default()),
            audits: Arc::new(MemoryAuditStore::default()),
            params: Arc::new(MemoryParamStore::default()),
        }
    }

    /// The trait-object bundle handed to pipeline components.
    #[must_use]
    pub fn stores(&self) -> Stores {
        Stores {
            candles: self.candles.clone(),
            features: self.features.clone(),
            regimes: self.regimes.clone(),
            orders: self.orders.clone(),
            fills: self.fills.clone(),
            positions: self.positions.clone(),
            audits: self.audits.clone(),
            params: self.params.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Side;

    fn candle(close_time: i64) -> Candle {
        Candle {
            symbol: Symbol::new("BTCUSDT"),
            timeframe: Timeframe::M1,
            close_time,
            open: 100.0,
            high: 101.0,
            low: 99.0,
            close: 100.5,
            volume: 1.0,
        }
    }

    #[tokio::test]
    async fn candle_upsert_is_idempotent() {
        let store = MemoryCandleStore::default();
        assert!(store.upsert(&candle(60_000)).await.unwrap());
        assert!(!store.upsert(&candle(60_000)).await.unwrap());

        let rows = store
            .recent(&Symbol::new("BTCUSDT"), Timeframe::M1, 60_000, 10)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn recent_returns_oldest_first_tail() {
        let store = MemoryCandleStore::default();
        for t in 1..=5 {
            store.upsert(&candle(t * 60_000)).await.unwrap();
        }
        let rows = store
            .recent(&Symbol::new("BTCUSDT"), Timeframe::M1, 4 * 60_000, 2)
            .await
            .unwrap();
        let times: Vec<i64> = rows.iter().map(|c| c.close_time).collect();
        assert_eq!(times, vec![3 * 60_000, 4 * 60_000]);
    }

    #[tokio::test]
    async fn order_insert_rejects_duplicate_external_id() {
        let store = MemoryOrderStore::default();
        let order = Order {
            external_id: "exec-abc".to_string(),
            symbol: Symbol::new("BTCUSDT"),
            side: Side::Long,
            order_type: crate::domain::OrderType::Limit,
            price: 100.0,
            qty: 1.0,
            status: OrderStatus::Open,
            created_at: 0,
        };
        store.insert(&order).await.unwrap();
        assert!(matches!(
            store.insert(&order).await,
            Err(Error::Store(_))
        ));
    }

    #[tokio::test]
    async fn regime_latest_is_greatest_close_time() {
        let store = MemoryRegimeStore::default();
        let symbol = Symbol::new("BTCUSDT");
        for t in [300_000, 600_000, 450_000] {
            store
                .upsert(&RegimeDecision::new(
                    symbol.clone(),
                    t,
                    crate::domain::Regime::Range,
                    false,
                ))
                .await
                .unwrap();
        }
        let latest = store.latest(&symbol).await.unwrap().unwrap();
        assert_eq!(latest.close_time_5m, 600_000);
    }

    #[tokio::test]
    async fn param_store_picks_greatest_effective_from_at_or_before() {
        let store = MemoryParamStore::default();
        let mut v2 = ParamVersion::baseline();
        v2.id = "v2".to_string();
        v2.effective_from = 1_000;
        store.publish(v2);

        assert_eq!(store.active_at(999).await.unwrap().id, "baseline");
        assert_eq!(store.active_at(1_000).await.unwrap().id, "v2");
        assert_eq!(store.active_at(5_000).await.unwrap().id, "v2");
    }

    #[tokio::test]
    async fn audit_ids_are_sequential() {
        let store = MemoryAuditStore::default();
        let a = store
            .append(AuditEvent::new(
                0,
                "test",
                crate::domain::AuditLevel::Info,
                "one",
            ))
            .await
            .unwrap();
        let b = store
            .append(AuditEvent::new(
                0,
                "test",
                crate::domain::AuditLevel::Info,
                "two",
            ))
            .await
            .unwrap();
        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
    }
}
