//! Position lifecycle management.
//!
//! Owns the in-memory table of managed positions and the per-symbol
//! lifecycle slot. Price updates drive R-multiple partial exits, the
//! ATR trail, and stop-outs; regime updates drive protective exits.
//! Every mutation is persisted, published, and audited; a position
//! whose parameter version has drifted from the active one is flagged
//! but never re-sized.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::bus::{Event, EventBus, PositionClosed};
use crate::domain::{
    hash_of, AuditEvent, AuditLevel, LifecycleEvent, LifecycleState, Position, PositionId,
    Regime, RegimeDecision, Side, Symbol,
};
use crate::error::Result;
use crate::indicators::EPS;
use crate::port::store::{ParamStore, PositionStore, Stores};

#[derive(Debug, Clone)]
pub struct PositionConfig {
    /// Trail distance in ATRs once the +2R scale-out has happened.
    pub trailing_atr_multiple: f64,
    pub hard_exit_on_expansion_chaos: bool,
    pub hard_exit_on_range: bool,
    /// Fraction of the original quantity shed on Range when not hard
    /// exiting, in percent.
    pub reduce_risk_on_range_pct: f64,
    /// How long a symbol slot stays in Cooldown after a close.
    pub cooldown_ms: i64,
}

impl Default for PositionConfig {
    fn default() -> Self {
        Self {
            trailing_atr_multiple: 1.0,
            hard_exit_on_expansion_chaos: true,
            hard_exit_on_range: false,
            reduce_risk_on_range_pct: 30.0,
            cooldown_ms: 5 * 60 * 1000,
        }
    }
}

/// One partial-exit record produced by a price or regime update.
#[derive(Debug, Clone, PartialEq)]
struct ExitRecord {
    qty: f64,
    price: f64,
    reason: String,
}

/// Everything a single update did to one position.
#[derive(Debug, Default)]
struct Mutation {
    exits: Vec<ExitRecord>,
    close_reason: Option<String>,
    touched: bool,
}

#[derive(Debug, Default)]
struct SymbolSlot {
    state: LifecycleState,
    closed_at: Option<i64>,
}

/// The in-memory manager of open positions and symbol lifecycle slots.
pub struct PositionManager {
    stores: Stores,
    bus: Arc<EventBus>,
    config: PositionConfig,
    positions: Mutex<HashMap<PositionId, Position>>,
    slots: Mutex<HashMap<Symbol, SymbolSlot>>,
}

impl PositionManager {
    pub fn new(stores: Stores, bus: Arc<EventBus>, config: PositionConfig) -> Self {
        Self {
            stores,
            bus,
            config,
            positions: Mutex::new(HashMap::new()),
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Current lifecycle state of a symbol slot.
    #[must_use]
    pub fn lifecycle_state(&self, symbol: &Symbol) -> LifecycleState {
        self.slots
            .lock()
            .get(symbol)
            .map_or(LifecycleState::Neutral, |slot| slot.state)
    }

    /// Apply one lifecycle event to a symbol slot; illegal transitions
    /// are identity.
    pub fn apply_lifecycle(&self, symbol: &Symbol, event: LifecycleEvent) -> LifecycleState {
        let mut slots = self.slots.lock();
        let slot = slots.entry(symbol.clone()).or_default();
        let next = slot.state.apply(event);
        if next != slot.state {
            debug!(symbol = %symbol, from = ?slot.state, to = ?next, event = ?event, "Lifecycle transition");
            slot.state = next;
        }
        next
    }

    /// Take a newly opened position under management.
    pub fn register(&self, position: Position) {
        self.positions.lock().insert(position.id, position);
    }

    /// Pull open positions for a symbol from the store into the table;
    /// used when an `order.filled` event announces a new position.
    pub async fn adopt_open_positions(&self, symbol: &Symbol) -> Result<()> {
        let open = self.stores.positions.open_for(symbol).await?;
        let mut positions = self.positions.lock();
        for position in open {
            positions.entry(position.id).or_insert(position);
        }
        Ok(())
    }

    /// Number of positions currently under management.
    #[must_use]
    pub fn managed_count(&self) -> usize {
        self.positions.lock().len()
    }

    /// Handle a price update for a symbol, with optional bar extremes.
    pub async fn on_price(
        &self,
        symbol: &Symbol,
        price: f64,
        high: Option<f64>,
        low: Option<f64>,
    ) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        self.expire_cooldown(symbol, now);

        let ids: Vec<PositionId> = {
            let positions = self.positions.lock();
            positions
                .values()
                .filter(|p| &p.symbol == symbol && p.is_open())
                .map(|p| p.id)
                .collect()
        };
        for id in ids {
            let Some(mut position) = self.positions.lock().get(&id).cloned() else {
                continue;
            };
            self.warn_on_param_drift(&position, now).await?;
            let mutation = Self::advance_price(&mut position, price, high, low, &self.config);
            self.commit(position, mutation, now).await?;
        }
        Ok(())
    }

    /// Handle a regime change for a symbol at the given reference price.
    pub async fn on_regime_change(&self, decision: &RegimeDecision, price: f64) -> Result<()> {
        let now = Utc::now().timestamp_millis();

        // Defensive override drives the symbol slot from any state.
        if decision.defensive {
            self.apply_lifecycle(&decision.symbol, LifecycleEvent::DefensiveOn);
        } else if self.lifecycle_state(&decision.symbol) == LifecycleState::Defensive {
            self.apply_lifecycle(&decision.symbol, LifecycleEvent::DefensiveOff);
        }

        let ids: Vec<PositionId> = {
            let positions = self.positions.lock();
            positions
                .values()
                .filter(|p| p.symbol == decision.symbol && p.is_open())
                .map(|p| p.id)
                .collect()
        };
        for id in ids {
            let Some(mut position) = self.positions.lock().get(&id).cloned() else {
                continue;
            };
            self.warn_on_param_drift(&position, now).await?;
            let mutation = self.advance_regime(&mut position, decision.regime, price);
            self.commit(position, mutation, now).await?;
        }
        Ok(())
    }

    /// Pure price-update logic: partial exits, trailing, stop-out.
    fn advance_price(
        position: &mut Position,
        price: f64,
        high: Option<f64>,
        low: Option<f64>,
        config: &PositionConfig,
    ) -> Mutation {
        let mut mutation = Mutation::default();
        let r = Self::r_multiple(position, price);

        if !position.took_1r && r >= 1.0 {
            Self::partial_exit(position, 0.5 * position.qty, price, "+1R partial", &mut mutation);
            position.took_1r = true;
            mutation.touched = true;
        }
        if position.is_open() && !position.took_2r && r >= 2.0 {
            Self::partial_exit(position, 0.3 * position.qty, price, "+2R partial", &mut mutation);
            position.took_2r = true;
            mutation.touched = true;
        }

        if position.is_open() && position.took_2r {
            let observed = match position.side {
                Side::Long => high.unwrap_or(price),
                Side::Short => low.unwrap_or(price),
            };
            position.trailing_anchor = match position.side {
                Side::Long => position.trailing_anchor.max(observed),
                Side::Short => position.trailing_anchor.min(observed),
            };
            let distance = position.atr_pct / 100.0
                * position.entry_price
                * config.trailing_atr_multiple;
            let candidate = match position.side {
                Side::Long => position.trailing_anchor - distance,
                Side::Short => position.trailing_anchor + distance,
            };
            let next_stop = match position.side {
                Side::Long => position.stop_price.max(candidate),
                Side::Short => position.stop_price.min(candidate),
            };
            if (next_stop - position.stop_price).abs() > 0.0 {
                position.stop_price = next_stop;
                mutation.touched = true;
            }
        }

        if position.is_open() {
            let stopped = match position.side {
                Side::Long => price <= position.stop_price,
                Side::Short => price >= position.stop_price,
            };
            if stopped {
                Self::close(position, price, "stop hit", &mut mutation);
            }
        }
        mutation
    }

    /// Regime-triggered protective logic.
    fn advance_regime(&self, position: &mut Position, regime: Regime, price: f64) -> Mutation {
        let mut mutation = Mutation::default();
        match regime {
            Regime::ExpansionChaos if self.config.hard_exit_on_expansion_chaos => {
                Self::close(position, price, "hard exit on ExpansionChaos", &mut mutation);
            }
            Regime::Range => {
                if self.config.hard_exit_on_range {
                    Self::close(position, price, "hard exit on Range", &mut mutation);
                } else {
                    let qty = self.config.reduce_risk_on_range_pct / 100.0 * position.qty;
                    Self::partial_exit(
                        position,
                        qty,
                        price,
                        "risk reduction on Range",
                        &mut mutation,
                    );
                    mutation.touched = true;
                }
            }
            _ => {}
        }
        mutation
    }

    fn r_multiple(position: &Position, price: f64) -> f64 {
        let risk_per_unit =
            (position.entry_price - position.initial_stop_price).abs().max(EPS);
        let pnl_per_unit = match position.side {
            Side::Long => price - position.entry_price,
            Side::Short => position.entry_price - price,
        };
        pnl_per_unit / risk_per_unit
    }

    /// Deduct up to `qty` at `price`, banking the realized R share.
    fn partial_exit(
        position: &mut Position,
        qty: f64,
        price: f64,
        reason: &str,
        mutation: &mut Mutation,
    ) {
        let exit_qty = qty.min(position.remaining_qty);
        if exit_qty <= 0.0 {
            return;
        }
        let r = Self::r_multiple(position, price);
        position.realized_r += r * (exit_qty / position.qty.max(EPS));
        position.remaining_qty -= exit_qty;
        mutation.exits.push(ExitRecord {
            qty: exit_qty,
            price,
            reason: reason.to_string(),
        });
        if position.remaining_qty <= 1e-10 && mutation.close_reason.is_none() {
            position.remaining_qty = 0.0;
            position.state = position.state.apply(LifecycleEvent::PositionClosed);
            mutation.close_reason = Some("all partial exits completed".to_string());
        }
    }

    /// Flatten whatever remains at `price`, banking its R share.
    fn close(position: &mut Position, price: f64, reason: &str, mutation: &mut Mutation) {
        if position.remaining_qty > 0.0 {
            let r = Self::r_multiple(position, price);
            position.realized_r += r * (position.remaining_qty / position.qty.max(EPS));
            mutation.exits.push(ExitRecord {
                qty: position.remaining_qty,
                price,
                reason: reason.to_string(),
            });
            position.remaining_qty = 0.0;
        }
        position.state = position.state.apply(LifecycleEvent::PositionClosed);
        mutation.close_reason = Some(reason.to_string());
        mutation.touched = true;
    }

    /// Persist, publish and audit one position's mutation.
    async fn commit(&self, mut position: Position, mutation: Mutation, now: i64) -> Result<()> {
        if !mutation.touched && mutation.exits.is_empty() && mutation.close_reason.is_none() {
            return Ok(());
        }
        position.updated_at = now;

        for exit in &mutation.exits {
            info!(
                position = %position.id,
                symbol = %position.symbol,
                qty = exit.qty,
                price = exit.price,
                reason = %exit.reason,
                realized_r = position.realized_r,
                "Partial exit"
            );
            let audit = AuditEvent::new(
                now,
                "position.partialExit",
                AuditLevel::Info,
                format!("exit {} at {}: {}", exit.qty, exit.price, exit.reason),
            )
            .with_outputs_hash(hash_of(&position)?)
            .with_params_version(position.params_version_id.clone())
            .with_metadata(serde_json::json!({
                "position_id": position.id,
                "symbol": position.symbol,
            }));
            self.bus.publish(Event::AuditEvent(audit)).await;
        }

        self.stores.positions.update(&position).await?;
        self.positions.lock().insert(position.id, position.clone());

        if let Some(reason) = mutation.close_reason {
            self.stores
                .positions
                .mark_closed(&position.symbol, now)
                .await?;
            {
                let mut slots = self.slots.lock();
                let slot = slots.entry(position.symbol.clone()).or_default();
                slot.state = slot.state.apply(LifecycleEvent::PositionClosed);
                slot.closed_at = Some(now);
            }
            info!(
                position = %position.id,
                symbol = %position.symbol,
                reason = %reason,
                realized_r = position.realized_r,
                "Position closed"
            );
            self.bus
                .publish(Event::PositionClosed(PositionClosed {
                    position_id: position.id,
                    reason,
                    realized_r: position.realized_r,
                }))
                .await;
        }
        self.bus.publish(Event::PositionUpdated(position)).await;
        Ok(())
    }

    /// Emit the informational drift warning when the active parameter
    /// version no longer matches the one the position was opened under.
    async fn warn_on_param_drift(&self, position: &Position, now: i64) -> Result<()> {
        let active = self.stores.params.active_at(now).await?;
        if active.id != position.params_version_id {
            warn!(
                position = %position.id,
                symbol = %position.symbol,
                position_version = %position.params_version_id,
                active_version = %active.id,
                "Parameter version drift"
            );
            let audit = AuditEvent::new(
                now,
                "position.paramDrift",
                AuditLevel::Warn,
                format!(
                    "position {} opened under {} but {} is active",
                    position.id, position.params_version_id, active.id
                ),
            )
            .with_reason("params_drift")
            .with_params_version(position.params_version_id.clone())
            .with_metadata(serde_json::json!({
                "position_id": position.id,
                "symbol": position.symbol,
            }));
            self.bus.publish(Event::AuditEvent(audit)).await;
        }
        Ok(())
    }

    fn expire_cooldown(&self, symbol: &Symbol, now: i64) {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get_mut(symbol) {
            if slot.state == LifecycleState::Cooldown {
                let expired = slot
                    .closed_at
                    .is_some_and(|closed_at| now - closed_at >= self.config.cooldown_ms);
                if expired {
                    slot.state = slot.state.apply(LifecycleEvent::CooldownExpired);
                    slot.closed_at = None;
                }
            }
        }
    }
}
