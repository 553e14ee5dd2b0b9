//! Trait definitions for external collaborators.
//!
//! Ports are the integration seams of the pipeline: the exchange (market
//! data and order routing) and the repositories backing persisted state.
//! Adapters live under [`crate::adapter`].

pub mod exchange;
pub mod store;

pub use exchange::{Exchange, OrderAck, OrderRequest};
pub use store::{
    AuditStore, CandleStore, FeatureStore, FillStore, OrderStore, ParamStore, PositionStore,
    RegimeStore, Stores,
};
