//! The closed set of events flowing through the bus.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::{
    AuditEvent, Candle, FeatureVector, Fill, Order, Position, PositionId, RegimeDecision,
    TradePlan,
};

/// Payload of `risk.approved`: the plan plus the sized quantity and the
/// (possibly defensively capped) leverage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskApproval {
    pub plan: TradePlan,
    pub qty: f64,
    pub leverage: f64,
}

/// Payload of `risk.rejected`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskRejection {
    pub plan: TradePlan,
    pub reason: String,
}

/// Payload of `position.closed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionClosed {
    pub position_id: PositionId,
    pub reason: String,
    pub realized_r: f64,
}

/// Every event the pipeline can publish, with its payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Event {
    CandleClosed(Candle),
    FeaturesReady(FeatureVector),
    RegimeUpdated(RegimeDecision),
    SignalGenerated(TradePlan),
    RiskApproved(RiskApproval),
    RiskRejected(RiskRejection),
    OrderSubmitted(Order),
    OrderFilled { order: Order, fill: Fill },
    OrderCanceled(Order),
    PositionUpdated(Position),
    PositionClosed(PositionClosed),
    AuditEvent(AuditEvent),
}

impl Event {
    /// The subscription key for this event.
    #[must_use]
    pub const fn name(&self) -> EventName {
        match self {
            Self::CandleClosed(_) => EventName::CandleClosed,
            Self::FeaturesReady(_) => EventName::FeaturesReady,
            Self::RegimeUpdated(_) => EventName::RegimeUpdated,
            Self::SignalGenerated(_) => EventName::SignalGenerated,
            Self::RiskApproved(_) => EventName::RiskApproved,
            Self::RiskRejected(_) => EventName::RiskRejected,
            Self::OrderSubmitted(_) => EventName::OrderSubmitted,
            Self::OrderFilled { .. } => EventName::OrderFilled,
            Self::OrderCanceled(_) => EventName::OrderCanceled,
            Self::PositionUpdated(_) => EventName::PositionUpdated,
            Self::PositionClosed(_) => EventName::PositionClosed,
            Self::AuditEvent(_) => EventName::AuditEvent,
        }
    }
}

/// Names of the internal event contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventName {
    CandleClosed,
    FeaturesReady,
    RegimeUpdated,
    SignalGenerated,
    RiskApproved,
    RiskRejected,
    OrderSubmitted,
    OrderFilled,
    OrderCanceled,
    PositionUpdated,
    PositionClosed,
    AuditEvent,
}

impl EventName {
    /// Wire name of the event (`candle.closed`, `features.ready`, ...).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CandleClosed => "candle.closed",
            Self::FeaturesReady => "features.ready",
            Self::RegimeUpdated => "regime.updated",
            Self::SignalGenerated => "signal.generated",
            Self::RiskApproved => "risk.approved",
            Self::RiskRejected => "risk.rejected",
            Self::OrderSubmitted => "order.submitted",
            Self::OrderFilled => "order.filled",
            Self::OrderCanceled => "order.canceled",
            Self::PositionUpdated => "position.updated",
            Self::PositionClosed => "position.closed",
            Self::AuditEvent => "audit.event",
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
