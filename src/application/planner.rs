//! Routes features to exactly one engine per regime and normalizes plans.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::engine::{Evaluation, StrategyEngine};
use crate::bus::{Event, EventBus};
use crate::domain::{
    hash_of, AuditEvent, AuditLevel, Engine, FeatureVector, Regime, RegimeDecision, Symbol,
    Timeframe, TradePlan,
};
use crate::error::Result;
use crate::indicators::clamp;
use crate::port::store::{ParamStore, RegimeStore, Stores};

/// Routes `features.ready`, dispatches to the selected engine, and
/// publishes `signal.generated` for triggered plans. Every rejection is
/// audited with a deterministic reason.
pub struct StrategyPlanner {
    engines: HashMap<Engine, Arc<dyn StrategyEngine>>,
    stores: Stores,
    bus: Arc<EventBus>,
    /// Latest decision per symbol, maintained from `regime.updated`.
    latest_regimes: Mutex<HashMap<Symbol, RegimeDecision>>,
}

impl StrategyPlanner {
    pub fn new(
        engines: Vec<Arc<dyn StrategyEngine>>,
        stores: Stores,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            engines: engines.into_iter().map(|e| (e.kind(), e)).collect(),
            stores,
            bus,
            latest_regimes: Mutex::new(HashMap::new()),
        }
    }

    /// Track the latest regime decision for routing and staleness checks.
    pub fn on_regime_updated(&self, decision: &RegimeDecision) {
        self.latest_regimes
            .lock()
            .insert(decision.symbol.clone(), decision.clone());
    }

    /// Handle one `features.ready`.
    pub async fn on_features_ready(&self, feature: &FeatureVector) -> Result<()> {
        // The regime engine upserts before it publishes, so the store is
        // the freshest view; the cache covers direct-dispatch callers.
        let regime = match self.stores.regimes.latest(&feature.symbol).await? {
            Some(decision) => Some(decision),
            None => self.latest_regimes.lock().get(&feature.symbol).cloned(),
        };
        let Some(regime) = regime else {
            return self.reject(feature, "no_regime_for_symbol").await;
        };
        if regime.defensive {
            return self.reject(feature, "defensive_mode").await;
        }
        if feature.timeframe == Timeframe::M5 && regime.close_time_5m != feature.close_time {
            return self.reject(feature, "stale_regime_for_feature").await;
        }

        let engine = match self.select_engine(feature, &regime) {
            Ok(engine) => engine,
            Err(reason) => return self.reject(feature, reason).await,
        };

        match engine.evaluate(feature, &regime).await? {
            Evaluation::Triggered(plan) => {
                let plan = self.normalize(plan).await?;
                info!(
                    symbol = %plan.symbol,
                    engine = %plan.engine,
                    side = %plan.side,
                    entry = plan.entry_price,
                    leverage = plan.leverage,
                    "Signal generated"
                );
                let audit = AuditEvent::new(
                    Utc::now().timestamp_millis(),
                    "strategy.plan",
                    AuditLevel::Info,
                    format!("plan generated by {}", plan.engine),
                )
                .with_inputs_hash(hash_of(feature)?)
                .with_outputs_hash(hash_of(&plan)?)
                .with_params_version(plan.params_version_id.clone())
                .with_metadata(serde_json::json!({
                    "symbol": plan.symbol,
                    "engine": plan.engine,
                }));
                self.bus.publish(Event::AuditEvent(audit)).await;
                self.bus.publish(Event::SignalGenerated(plan)).await;
            }
            Evaluation::Rejected(reason) => {
                debug!(
                    symbol = %feature.symbol,
                    engine = %engine.kind(),
                    reason = %reason,
                    "Engine rejected feature"
                );
                self.reject(feature, reason).await?;
            }
        }
        Ok(())
    }

    /// The single engine allowed to trade this (regime, timeframe) pair.
    fn select_engine(
        &self,
        feature: &FeatureVector,
        regime: &RegimeDecision,
    ) -> std::result::Result<Arc<dyn StrategyEngine>, &'static str> {
        let engine = match regime.regime {
            Regime::Compression => {
                if feature.timeframe != Timeframe::M1 {
                    return Err("compression_requires_1m_feature");
                }
                Engine::Breakout
            }
            Regime::Trend => {
                if feature.timeframe != Timeframe::M5 {
                    return Err("trend_requires_5m_feature");
                }
                Engine::Continuation
            }
            Regime::Range => {
                if feature.timeframe != Timeframe::M5 {
                    return Err("range_requires_5m_feature");
                }
                Engine::Reversal
            }
            Regime::ExpansionChaos => return Err("expansion_chaos_no_entry_engine"),
        };
        self.engines
            .get(&engine)
            .cloned()
            .ok_or("engine_not_registered")
    }

    /// Clamp confidence, floor expiry at now, and stamp the active
    /// parameter version over whatever the engine wrote.
    async fn normalize(&self, mut plan: TradePlan) -> Result<TradePlan> {
        let now = Utc::now().timestamp_millis();
        plan.confidence = clamp(plan.confidence, 0.0, 1.0);
        plan.expires_at = plan.expires_at.max(now);
        plan.params_version_id = self.stores.params.active_at(now).await?.id;
        Ok(plan)
    }

    async fn reject(&self, feature: &FeatureVector, reason: impl Into<String>) -> Result<()> {
        let reason = reason.into();
        warn!(
            symbol = %feature.symbol,
            timeframe = %feature.timeframe,
            close_time = feature.close_time,
            reason = %reason,
            "Plan rejected"
        );
        let audit = AuditEvent::new(
            Utc::now().timestamp_millis(),
            "strategy.plan",
            AuditLevel::Warn,
            format!("no plan for {} {}", feature.symbol, feature.timeframe),
        )
        .with_reason(reason)
        .with_inputs_hash(hash_of(feature)?)
        .with_metadata(serde_json::json!({
            "symbol": feature.symbol,
            "timeframe": feature.timeframe,
            "close_time": feature.close_time,
        }));
        self.bus.publish(Event::AuditEvent(audit)).await;
        Ok(())
    }
}
