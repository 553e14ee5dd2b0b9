//! Domain value types for the trading pipeline.
//!
//! Everything in this module is an exchange-agnostic value: candles,
//! feature vectors, regime decisions, trade plans, orders, fills,
//! positions, parameter versions, and audit events. Values are passed
//! by value through the event bus; rolling state lives with the
//! component that computes it.

pub mod audit;
pub mod candle;
pub mod feature;
pub mod hash;
pub mod id;
pub mod order;
pub mod params;
pub mod plan;
pub mod position;
pub mod regime;

pub use audit::{AuditEvent, AuditLevel};
pub use candle::{Candle, Timeframe};
pub use feature::FeatureVector;
pub use hash::hash_of;
pub use id::{PositionId, Symbol};
pub use order::{Fill, Order, OrderIntent, OrderStatus, OrderType};
pub use params::{CooldownRules, LeverageBand, ParamVersion, PortfolioCaps};
pub use plan::{Side, TpModel, TradePlan};
pub use position::{LifecycleEvent, LifecycleState, Position};
pub use regime::{Engine, Regime, RegimeDecision};
