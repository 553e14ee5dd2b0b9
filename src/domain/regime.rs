//! Market regime classification outcomes.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::id::Symbol;

/// Volatility/structure regime of a symbol on the 5m stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Regime {
    Compression,
    Trend,
    Range,
    ExpansionChaos,
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Compression => "Compression",
            Self::Trend => "Trend",
            Self::Range => "Range",
            Self::ExpansionChaos => "ExpansionChaos",
        };
        write!(f, "{s}")
    }
}

/// Strategy engine selected for a regime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Engine {
    Breakout,
    Continuation,
    Reversal,
    Defensive,
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Breakout => "Breakout",
            Self::Continuation => "Continuation",
            Self::Reversal => "Reversal",
            Self::Defensive => "Defensive",
        };
        write!(f, "{s}")
    }
}

impl Engine {
    /// The engine a regime maps to when the defensive flag is off.
    #[must_use]
    pub const fn for_regime(regime: Regime) -> Self {
        match regime {
            Regime::Compression => Self::Breakout,
            Regime::Trend => Self::Continuation,
            Regime::Range => Self::Reversal,
            Regime::ExpansionChaos => Self::Defensive,
        }
    }
}

/// One regime decision per (symbol, 5m close time).
///
/// Invariant: `defensive` implies `engine == Engine::Defensive`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeDecision {
    pub symbol: Symbol,
    pub close_time_5m: i64,
    pub regime: Regime,
    pub engine: Engine,
    pub defensive: bool,
}

impl RegimeDecision {
    /// Build a decision, forcing the engine to Defensive when the flag is set.
    #[must_use]
    pub fn new(symbol: Symbol, close_time_5m: i64, regime: Regime, defensive: bool) -> Self {
        let engine = if defensive {
            Engine::Defensive
        } else {
            Engine::for_regime(regime)
        };
        Self {
            symbol,
            close_time_5m,
            regime,
            engine,
            defensive,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_mapping() {
        assert_eq!(Engine::for_regime(Regime::Compression), Engine::Breakout);
        assert_eq!(Engine::for_regime(Regime::Trend), Engine::Continuation);
        assert_eq!(Engine::for_regime(Regime::Range), Engine::Reversal);
        assert_eq!(Engine::for_regime(Regime::ExpansionChaos), Engine::Defensive);
    }

    #[test]
    fn defensive_forces_defensive_engine() {
        let d = RegimeDecision::new(Symbol::new("BTCUSDT"), 0, Regime::Trend, true);
        assert!(d.defensive);
        assert_eq!(d.engine, Engine::Defensive);
    }
}
