//! Trade plans emitted by strategy engines.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::id::Symbol;
use super::regime::Engine;

/// Direction of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Long => write!(f, "Long"),
            Self::Short => write!(f, "Short"),
        }
    }
}

/// Take-profit model attached to a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TpModel {
    A,
    B,
}

/// A fully specified trade intention produced by a strategy engine.
///
/// Immutable once emitted; the planner normalizes `confidence`,
/// `expires_at` and `params_version_id` before publication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradePlan {
    pub symbol: Symbol,
    pub side: Side,
    pub engine: Engine,
    pub entry_price: f64,
    /// Stop distance as a percentage of entry.
    pub stop_pct: f64,
    /// ATR percentage at signal time, carried through to the position's
    /// trailing-stop math.
    pub atr_pct: f64,
    pub tp_model: TpModel,
    pub leverage: f64,
    /// Fraction of equity committed as margin, in percent.
    pub margin_pct: f64,
    /// Epoch milliseconds after which the plan is void.
    pub expires_at: i64,
    pub reason: String,
    pub params_version_id: String,
    /// Engine conviction in [0, 1].
    pub confidence: f64,
}
