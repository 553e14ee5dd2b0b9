//! Positions and the lifecycle state machine.

use serde::{Deserialize, Serialize};

use super::id::{PositionId, Symbol};
use super::plan::Side;

/// Lifecycle state of a symbol slot in the position manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleState {
    #[default]
    Neutral,
    Armed,
    Entering,
    InPosition,
    Cooldown,
    Defensive,
}

/// Events driving the lifecycle state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleEvent {
    SignalArmed,
    OrderSubmitted,
    OrderFilled,
    PositionClosed,
    CooldownExpired,
    DefensiveOn,
    DefensiveOff,
}

impl LifecycleState {
    /// Total transition function. Transitions not in the table are identity,
    /// so out-of-order bus events cannot corrupt state.
    #[must_use]
    pub const fn apply(self, event: LifecycleEvent) -> Self {
        use LifecycleEvent as E;
        use LifecycleState as S;
        match (self, event) {
            (_, E::DefensiveOn) => S::Defensive,
            (S::Defensive, E::DefensiveOff) => S::Neutral,
            (S::Neutral, E::SignalArmed) => S::Armed,
            (S::Armed, E::OrderSubmitted) => S::Entering,
            (S::Entering, E::OrderFilled) => S::InPosition,
            (S::InPosition, E::PositionClosed) => S::Cooldown,
            (S::Cooldown, E::CooldownExpired) => S::Neutral,
            (state, _) => state,
        }
    }
}

/// An open or closed derivative position.
///
/// `realized_r` accumulates the R multiples banked by partial exits;
/// `remaining_qty` is monotonically non-increasing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub symbol: Symbol,
    pub side: Side,
    pub entry_price: f64,
    /// Stop in force at entry; the denominator of every R computation.
    pub initial_stop_price: f64,
    /// Current stop, monotone in the favorable direction once trailing.
    pub stop_price: f64,
    pub qty: f64,
    pub remaining_qty: f64,
    pub state: LifecycleState,
    pub realized_r: f64,
    pub took_1r: bool,
    pub took_2r: bool,
    /// Best favorable extreme seen since the trail activated.
    pub trailing_anchor: f64,
    pub atr_pct: f64,
    pub params_version_id: String,
    pub opened_at: i64,
    pub updated_at: i64,
}

impl Position {
    /// Initial stop placed `k` ATRs away from entry, against the trade.
    #[must_use]
    pub fn build_initial_stop(entry: f64, atr_pct: f64, side: Side, k: f64) -> f64 {
        let dist = atr_pct / 100.0 * entry * k;
        match side {
            Side::Long => entry - dist,
            Side::Short => entry + dist,
        }
    }

    /// True while quantity remains on the book.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.remaining_qty > 1e-10
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_table_matches_design() {
        use LifecycleEvent as E;
        use LifecycleState as S;
        assert_eq!(S::Neutral.apply(E::SignalArmed), S::Armed);
        assert_eq!(S::Armed.apply(E::OrderSubmitted), S::Entering);
        assert_eq!(S::Entering.apply(E::OrderFilled), S::InPosition);
        assert_eq!(S::InPosition.apply(E::PositionClosed), S::Cooldown);
        assert_eq!(S::Cooldown.apply(E::CooldownExpired), S::Neutral);
        assert_eq!(S::Defensive.apply(E::DefensiveOff), S::Neutral);
    }

    #[test]
    fn defensive_on_from_any_state() {
        use LifecycleEvent as E;
        use LifecycleState as S;
        for state in [
            S::Neutral,
            S::Armed,
            S::Entering,
            S::InPosition,
            S::Cooldown,
            S::Defensive,
        ] {
            assert_eq!(state.apply(E::DefensiveOn), S::Defensive);
        }
    }

    #[test]
    fn illegal_transitions_are_identity() {
        use LifecycleEvent as E;
        use LifecycleState as S;
        assert_eq!(S::Neutral.apply(E::OrderFilled), S::Neutral);
        assert_eq!(S::Armed.apply(E::PositionClosed), S::Armed);
        assert_eq!(S::InPosition.apply(E::SignalArmed), S::InPosition);
        assert_eq!(S::Cooldown.apply(E::OrderSubmitted), S::Cooldown);
        assert_eq!(S::Neutral.apply(E::DefensiveOff), S::Neutral);
    }

    #[test]
    fn initial_stop_is_directional() {
        let long = Position::build_initial_stop(100.0, 1.0, Side::Long, 1.0);
        let short = Position::build_initial_stop(100.0, 1.0, Side::Short, 1.0);
        assert!((long - 99.0).abs() < 1e-12);
        assert!((short - 101.0).abs() < 1e-12);
    }
}
