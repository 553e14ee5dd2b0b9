//! Per-regime strategy engines.
//!
//! Each engine consumes a feature vector plus the symbol's latest regime
//! decision and either emits a fully populated [`TradePlan`] or rejects
//! with a deterministic reason string. Engines stamp the placeholder
//! params version; the planner overwrites it with the active version
//! during normalization.

mod breakout;
mod continuation;
mod reversal;

use async_trait::async_trait;

pub use breakout::{BreakoutConfig, BreakoutEngine};
pub use continuation::{ContinuationConfig, ContinuationEngine};
pub use reversal::{ReversalConfig, ReversalEngine};

use crate::domain::{Engine, FeatureVector, Regime, RegimeDecision, Timeframe, TradePlan};
use crate::error::Result;
use crate::indicators::clamp;

/// Version id engines stamp on plans before planner normalization.
pub(crate) const PLACEHOLDER_PARAMS_VERSION: &str = "baseline";

/// Outcome of one engine evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    Triggered(TradePlan),
    Rejected(String),
}

impl Evaluation {
    #[must_use]
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected(reason.into())
    }
}

/// A confirmation-rule engine bound to one regime and timeframe.
#[async_trait]
pub trait StrategyEngine: Send + Sync {
    /// Which engine this is, for routing and cooldown accounting.
    fn kind(&self) -> Engine;

    /// The regime this engine trades.
    fn regime(&self) -> Regime;

    /// The feature timeframe this engine consumes.
    fn timeframe(&self) -> Timeframe;

    /// Evaluate one feature against the latest regime decision.
    async fn evaluate(
        &self,
        feature: &FeatureVector,
        regime: &RegimeDecision,
    ) -> Result<Evaluation>;
}

/// Shared regime/defensive guard; `None` means the engine may proceed.
pub(crate) fn regime_guard(
    expected: Regime,
    regime: &RegimeDecision,
) -> Option<Evaluation> {
    if regime.defensive {
        return Some(Evaluation::rejected("defensive_mode"));
    }
    if regime.regime != expected {
        return Some(Evaluation::rejected(format!(
            "regime_mismatch_expected_{expected}"
        )));
    }
    None
}

/// Engine leverage clamped into its own band and the exchange ceiling.
#[must_use]
pub(crate) fn clamped_leverage(
    raw: f64,
    engine_min: f64,
    engine_max: f64,
    exchange_max: f64,
) -> f64 {
    clamp(clamp(raw, engine_min, engine_max), engine_min, exchange_max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Symbol;

    #[test]
    fn leverage_respects_engine_and_exchange_bounds() {
        assert_eq!(clamped_leverage(100.0, 1.0, 8.0, 20.0), 8.0);
        assert_eq!(clamped_leverage(0.1, 1.0, 8.0, 20.0), 1.0);
        assert_eq!(clamped_leverage(5.0, 1.0, 8.0, 3.0), 3.0);
    }

    #[test]
    fn guard_rejects_defensive_and_mismatch() {
        let defensive =
            RegimeDecision::new(Symbol::new("BTCUSDT"), 0, Regime::Compression, true);
        assert!(matches!(
            regime_guard(Regime::Compression, &defensive),
            Some(Evaluation::Rejected(reason)) if reason == "defensive_mode"
        ));

        let range = RegimeDecision::new(Symbol::new("BTCUSDT"), 0, Regime::Range, false);
        assert!(matches!(
            regime_guard(Regime::Compression, &range),
            Some(Evaluation::Rejected(_))
        ));

        let compression =
            RegimeDecision::new(Symbol::new("BTCUSDT"), 0, Regime::Compression, false);
        assert!(regime_guard(Regime::Compression, &compression).is_none());
    }
}
