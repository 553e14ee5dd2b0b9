//! Regent - Regime-driven crypto-derivatives trading bot.
//!
//! # Architecture
//!
//! ```text
//! src/
//! ├── domain/          # Exchange-agnostic value types and canonical hashing
//! ├── indicators/      # Pure numeric routines (EMA, ATR, EWMA sigma, ...)
//! ├── bus/             # Typed in-process event bus
//! ├── port/            # Exchange and repository trait definitions
//! ├── adapter/         # Port implementations (HTTP exchange, in-memory
//! │                    # stores, paper exchange)
//! ├── application/     # The decision pipeline: ingest → features → regime
//! │                    # → strategy → risk → execution → positions
//! └── app/             # Application layer (config, wiring, run loop)
//! ```
//!
//! The pipeline is wired by the event bus: ingest publishes `candle.closed`,
//! the feature service answers with `features.ready`, the regime engine with
//! `regime.updated`, the planner with `signal.generated`, the risk service
//! with `risk.approved`/`risk.rejected`, the execution engine with order
//! events, and the position manager with `position.updated`/`position.closed`.

pub mod adapter;
pub mod app;
pub mod application;
pub mod bus;
pub mod domain;
pub mod error;
pub mod indicators;
pub mod port;
