//! Versioned tunable parameters.
//!
//! A [`ParamVersion`] is an immutable snapshot of the tunables that shape
//! sizing and admission control. The active version at instant `t` is the
//! one with the greatest `effective_from` ≤ `t`; positions record the
//! version in force at entry and keep it for life.

use serde::{Deserialize, Serialize};

/// One step of the continuation engine's leverage ladder.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LeverageBand {
    /// Upper bound (inclusive) of normalized sigma this band covers.
    pub max_sigma_norm: f64,
    pub leverage: f64,
}

/// Admission-control cooldowns.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CooldownRules {
    pub per_symbol_ms: i64,
    pub per_engine_ms: i64,
}

impl Default for CooldownRules {
    fn default() -> Self {
        Self {
            per_symbol_ms: 5 * 60 * 1000,
            per_engine_ms: 2 * 60 * 1000,
        }
    }
}

/// Portfolio-wide position caps.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PortfolioCaps {
    pub max_open: usize,
    /// Tighter cap applied while the regime is defensive.
    pub max_open_defensive: usize,
    pub max_leverage_defensive: f64,
}

impl Default for PortfolioCaps {
    fn default() -> Self {
        Self {
            max_open: 3,
            max_open_defensive: 1,
            max_leverage_defensive: 2.0,
        }
    }
}

/// Immutable snapshot of tunable parameters identified by `effective_from`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamVersion {
    pub id: String,
    /// Epoch milliseconds from which this version is active.
    pub effective_from: i64,
    /// Breakout stop multiple of ATR.
    pub kb: f64,
    /// Continuation/Reversal stop multiple of ATR.
    pub ks: f64,
    /// Ascending by `max_sigma_norm`.
    pub leverage_bands: Vec<LeverageBand>,
    pub cooldown_rules: CooldownRules,
    pub portfolio_caps: PortfolioCaps,
}

impl ParamVersion {
    /// The built-in version used until an operator publishes one.
    #[must_use]
    pub fn baseline() -> Self {
        Self {
            id: "baseline".to_string(),
            effective_from: 0,
            kb: 1.2,
            ks: 0.9,
            leverage_bands: vec![
                LeverageBand {
                    max_sigma_norm: 0.8,
                    leverage: 5.0,
                },
                LeverageBand {
                    max_sigma_norm: 1.2,
                    leverage: 3.0,
                },
                LeverageBand {
                    max_sigma_norm: 2.0,
                    leverage: 2.0,
                },
            ],
            cooldown_rules: CooldownRules::default(),
            portfolio_caps: PortfolioCaps::default(),
        }
    }
}
