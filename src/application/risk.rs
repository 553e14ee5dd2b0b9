//! Pre-trade risk gating and quantity sizing.
//!
//! Checks run in a fixed order and the first failure wins: per-symbol
//! uniqueness, portfolio cap, symbol cooldown, engine cooldown, then
//! defensive leverage capping and quantity sizing. Approvals and
//! rejections are both published and audited.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::bus::{Event, EventBus, RiskApproval, RiskRejection};
use crate::domain::{hash_of, AuditEvent, AuditLevel, Engine, TradePlan};
use crate::error::Result;
use crate::indicators::EPS;
use crate::port::store::{ParamStore, PositionStore, RegimeStore, Stores};

/// Account-level sizing inputs.
#[derive(Debug, Clone)]
pub struct RiskConfig {
    /// Account equity used for sizing.
    pub equity: f64,
    /// Quantity lattice step.
    pub qty_step: f64,
    /// Smallest tradeable quantity.
    pub min_qty: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            equity: 10_000.0,
            qty_step: 0.001,
            min_qty: 0.001,
        }
    }
}

/// Outcome of the risk gate.
#[derive(Debug, Clone, PartialEq)]
pub enum RiskDecision {
    Approved { qty: f64, leverage: f64 },
    Rejected { reason: String },
}

/// The admission-control gate between planner and execution.
pub struct RiskService {
    stores: Stores,
    bus: Arc<EventBus>,
    config: RiskConfig,
    /// Last approval instant per engine, feeding the engine cooldown.
    engine_last_approved: Mutex<HashMap<Engine, i64>>,
}

impl RiskService {
    pub fn new(stores: Stores, bus: Arc<EventBus>, config: RiskConfig) -> Self {
        Self {
            stores,
            bus,
            config,
            engine_last_approved: Mutex::new(HashMap::new()),
        }
    }

    /// Handle one `signal.generated`: check, publish, audit.
    pub async fn on_signal(&self, plan: &TradePlan) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        let decision = self.check(plan, now).await?;

        let audit = AuditEvent::new(
            now,
            "risk.gate",
            match decision {
                RiskDecision::Approved { .. } => AuditLevel::Info,
                RiskDecision::Rejected { .. } => AuditLevel::Warn,
            },
            match &decision {
                RiskDecision::Approved { qty, leverage } => {
                    format!("approved qty {qty} at {leverage}x")
                }
                RiskDecision::Rejected { reason } => format!("rejected: {reason}"),
            },
        )
        .with_inputs_hash(hash_of(plan)?)
        .with_outputs_hash(hash_of(&format!("{decision:?}"))?)
        .with_params_version(plan.params_version_id.clone())
        .with_metadata(serde_json::json!({
            "symbol": plan.symbol,
            "engine": plan.engine,
        }));
        self.bus.publish(Event::AuditEvent(audit)).await;

        match decision {
            RiskDecision::Approved { qty, leverage } => {
                info!(
                    symbol = %plan.symbol,
                    engine = %plan.engine,
                    qty,
                    leverage,
                    "Risk approved"
                );
                self.bus
                    .publish(Event::RiskApproved(RiskApproval {
                        plan: plan.clone(),
                        qty,
                        leverage,
                    }))
                    .await;
            }
            RiskDecision::Rejected { reason } => {
                warn!(symbol = %plan.symbol, engine = %plan.engine, reason = %reason, "Risk rejected");
                self.bus
                    .publish(Event::RiskRejected(RiskRejection {
                        plan: plan.clone(),
                        reason,
                    }))
                    .await;
            }
        }
        Ok(())
    }

    /// Ordered checks; the first failure wins. On approval the engine
    /// cooldown clock is advanced.
    pub async fn check(&self, plan: &TradePlan, now: i64) -> Result<RiskDecision> {
        let params = self.stores.params.active_at(now).await?;
        let regime = self.stores.regimes.latest(&plan.symbol).await?;
        let defensive = regime.as_ref().is_some_and(|r| r.defensive);

        // 1. One open position per symbol.
        if self.stores.positions.count_open_for(&plan.symbol).await? >= 1 {
            return Ok(RiskDecision::Rejected {
                reason: "max 1 open position per symbol exceeded".to_string(),
            });
        }

        // 2. Portfolio cap, tighter while defensive.
        let cap = if defensive {
            params.portfolio_caps.max_open_defensive
        } else {
            params.portfolio_caps.max_open
        };
        let open_total = self.stores.positions.count_open().await?;
        if open_total >= cap {
            return Ok(RiskDecision::Rejected {
                reason: format!("max open positions reached ({open_total}/{cap})"),
            });
        }

        // 3. Symbol cooldown since the last close.
        if let Some(closed_at) = self.stores.positions.last_closed_at(&plan.symbol).await? {
            if now - closed_at < params.cooldown_rules.per_symbol_ms {
                return Ok(RiskDecision::Rejected {
                    reason: "symbol cooldown active".to_string(),
                });
            }
        }

        // 4. Engine cooldown since the last approved signal.
        if let Some(&approved_at) = self.engine_last_approved.lock().get(&plan.engine) {
            if now - approved_at < params.cooldown_rules.per_engine_ms {
                return Ok(RiskDecision::Rejected {
                    reason: "engine cooldown active".to_string(),
                });
            }
        }

        // 5. Defensive leverage cap.
        let leverage = if defensive {
            plan.leverage.min(params.portfolio_caps.max_leverage_defensive)
        } else {
            plan.leverage
        };

        // 6. Quantity on the step lattice.
        let qty_raw = self.config.equity * (plan.margin_pct / 100.0) * leverage
            / plan.entry_price.max(EPS);
        let qty = (qty_raw / self.config.qty_step).floor() * self.config.qty_step;
        if qty < self.config.min_qty {
            return Ok(RiskDecision::Rejected {
                reason: "computed qty below minQty".to_string(),
            });
        }

        self.engine_last_approved.lock().insert(plan.engine, now);
        Ok(RiskDecision::Approved { qty, leverage })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::memory::MemoryBackend;
    use crate::bus::DispatchMode;
    use crate::domain::{
        LifecycleState, Position, PositionId, Regime, RegimeDecision, Side, Symbol, TpModel,
    };

    fn plan(symbol: &str, engine: Engine) -> TradePlan {
        TradePlan {
            symbol: Symbol::new(symbol),
            side: Side::Long,
            engine,
            entry_price: 100.0,
            stop_pct: 1.0,
            atr_pct: 1.0,
            tp_model: TpModel::A,
            leverage: 5.0,
            margin_pct: 10.0,
            expires_at: i64::MAX,
            reason: "test".to_string(),
            params_version_id: "baseline".to_string(),
            confidence: 0.5,
        }
    }

    fn open_position(id: u64, symbol: &str) -> Position {
        Position {
            id: PositionId(id),
            symbol: Symbol::new(symbol),
            side: Side::Long,
            entry_price: 100.0,
            initial_stop_price: 99.0,
            stop_price: 99.0,
            qty: 1.0,
            remaining_qty: 1.0,
            state: LifecycleState::InPosition,
            realized_r: 0.0,
            took_1r: false,
            took_2r: false,
            trailing_anchor: 100.0,
            atr_pct: 1.0,
            params_version_id: "baseline".to_string(),
            opened_at: 0,
            updated_at: 0,
        }
    }

    fn service(backend: &MemoryBackend) -> RiskService {
        RiskService::new(
            backend.stores(),
            Arc::new(EventBus::new(DispatchMode::Direct)),
            RiskConfig::default(),
        )
    }

    #[tokio::test]
    async fn approves_and_sizes_on_the_step_lattice() {
        let backend = MemoryBackend::new();
        let risk = service(&backend);
        let decision = risk.check(&plan("BTCUSDT", Engine::Breakout), 1_000_000).await.unwrap();
        match decision {
            RiskDecision::Approved { qty, leverage } => {
                // 10_000 * 0.10 * 5 / 100 = 50, already on the lattice.
                assert!((qty - 50.0).abs() < 1e-9);
                assert!((leverage - 5.0).abs() < 1e-9);
            }
            RiskDecision::Rejected { reason } => panic!("rejected: {reason}"),
        }
    }

    #[tokio::test]
    async fn rejects_second_position_in_same_symbol() {
        let backend = MemoryBackend::new();
        backend
            .positions
            .insert(&open_position(1, "BTCUSDT"))
            .await
            .unwrap();
        let risk = service(&backend);
        let decision = risk.check(&plan("BTCUSDT", Engine::Breakout), 1_000_000).await.unwrap();
        assert!(matches!(
            decision,
            RiskDecision::Rejected { reason } if reason.contains("symbol")
        ));
    }

    #[tokio::test]
    async fn rejects_when_portfolio_cap_reached() {
        let backend = MemoryBackend::new();
        // Baseline cap is 3 open positions.
        for (i, symbol) in ["ETHUSDT", "SOLUSDT", "XRPUSDT"].iter().enumerate() {
            backend
                .positions
                .insert(&open_position(i as u64 + 1, symbol))
                .await
                .unwrap();
        }
        let risk = service(&backend);
        let decision = risk.check(&plan("BTCUSDT", Engine::Breakout), 1_000_000).await.unwrap();
        assert!(matches!(
            decision,
            RiskDecision::Rejected { reason } if reason.contains("max open positions")
        ));
    }

    #[tokio::test]
    async fn symbol_cooldown_blocks_then_expires() {
        let backend = MemoryBackend::new();
        backend
            .positions
            .mark_closed(&Symbol::new("BTCUSDT"), 1_000_000)
            .await
            .unwrap();
        let risk = service(&backend);

        let blocked = risk
            .check(&plan("BTCUSDT", Engine::Breakout), 1_000_000 + 60_000)
            .await
            .unwrap();
        assert!(matches!(
            blocked,
            RiskDecision::Rejected { reason } if reason == "symbol cooldown active"
        ));

        let allowed = risk
            .check(&plan("BTCUSDT", Engine::Breakout), 1_000_000 + 5 * 60_000)
            .await
            .unwrap();
        assert!(matches!(allowed, RiskDecision::Approved { .. }));
    }

    #[tokio::test]
    async fn engine_cooldown_applies_across_symbols() {
        let backend = MemoryBackend::new();
        let risk = service(&backend);

        let first = risk.check(&plan("BTCUSDT", Engine::Breakout), 1_000_000).await.unwrap();
        assert!(matches!(first, RiskDecision::Approved { .. }));

        let second = risk
            .check(&plan("ETHUSDT", Engine::Breakout), 1_000_000 + 60_000)
            .await
            .unwrap();
        assert!(matches!(
            second,
            RiskDecision::Rejected { reason } if reason == "engine cooldown active"
        ));

        // A different engine is not blocked.
        let other = risk
            .check(&plan("ETHUSDT", Engine::Reversal), 1_000_000 + 60_000)
            .await
            .unwrap();
        assert!(matches!(other, RiskDecision::Approved { .. }));
    }

    #[tokio::test]
    async fn defensive_regime_caps_leverage() {
        let backend = MemoryBackend::new();
        backend
            .regimes
            .upsert(&RegimeDecision::new(
                Symbol::new("BTCUSDT"),
                300_000,
                Regime::ExpansionChaos,
                true,
            ))
            .await
            .unwrap();
        let risk = service(&backend);
        let decision = risk.check(&plan("BTCUSDT", Engine::Breakout), 1_000_000).await.unwrap();
        match decision {
            RiskDecision::Approved { leverage, .. } => {
                // Baseline defensive cap is 2x; the plan asked for 5x.
                assert!((leverage - 2.0).abs() < 1e-9);
            }
            RiskDecision::Rejected { reason } => panic!("rejected: {reason}"),
        }
    }

    #[tokio::test]
    async fn dust_quantity_is_rejected() {
        let backend = MemoryBackend::new();
        let mut risk_config = RiskConfig::default();
        risk_config.equity = 0.01;
        let risk = RiskService::new(
            backend.stores(),
            Arc::new(EventBus::new(DispatchMode::Direct)),
            risk_config,
        );
        let decision = risk.check(&plan("BTCUSDT", Engine::Breakout), 1_000_000).await.unwrap();
        assert!(matches!(
            decision,
            RiskDecision::Rejected { reason } if reason == "computed qty below minQty"
        ));
    }
}
