//! Application wiring and run loop.
//!
//! [`Pipeline::new`] builds every service against one bus and one set of
//! stores; [`Pipeline::wire`] subscribes them in pipeline order. [`App`]
//! adds the poll loop and the choice between the live HTTP exchange and
//! the paper exchange.

pub mod config;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info};

pub use config::Config;

use crate::adapter::http::HttpExchange;
use crate::adapter::memory::MemoryBackend;
use crate::adapter::paper::{LimitFillMode, PaperExchange};
use crate::application::engine::{
    BreakoutEngine, ContinuationEngine, ReversalEngine, StrategyEngine,
};
use crate::application::execution::{Confirmation, ExecutionEngine};
use crate::application::features::FeatureService;
use crate::application::ingest::CandleIngest;
use crate::application::planner::StrategyPlanner;
use crate::application::position::PositionManager;
use crate::application::regime::RegimeEngine;
use crate::application::risk::RiskService;
use crate::bus::{handler, DispatchMode, Event, EventBus, EventName};
use crate::domain::{LifecycleEvent, Symbol, Timeframe};
use crate::error::Result;
use crate::port::exchange::Exchange;
use crate::port::store::{AuditStore, CandleStore, RegimeStore, Stores};

/// All pipeline services bound to one bus and one store set.
pub struct Pipeline {
    pub bus: Arc<EventBus>,
    pub stores: Stores,
    pub ingest: Arc<CandleIngest>,
    pub features: Arc<FeatureService>,
    pub regime: Arc<RegimeEngine>,
    pub planner: Arc<StrategyPlanner>,
    pub risk: Arc<RiskService>,
    pub execution: Arc<ExecutionEngine>,
    pub positions: Arc<PositionManager>,
}

impl Pipeline {
    pub fn new(
        config: &Config,
        exchange: Arc<dyn Exchange>,
        stores: Stores,
        mode: DispatchMode,
    ) -> Arc<Self> {
        let bus = Arc::new(EventBus::new(mode));
        let engines: Vec<Arc<dyn StrategyEngine>> = vec![
            Arc::new(BreakoutEngine::new(stores.clone(), config.breakout.clone())),
            Arc::new(ContinuationEngine::new(
                stores.clone(),
                config.continuation.clone(),
            )),
            Arc::new(ReversalEngine::new(stores.clone(), config.reversal.clone())),
        ];
        Arc::new(Self {
            ingest: Arc::new(CandleIngest::new(
                exchange.clone(),
                stores.clone(),
                bus.clone(),
                config.ingest.clone(),
            )),
            features: Arc::new(FeatureService::new(
                stores.clone(),
                bus.clone(),
                config.features.clone(),
            )),
            regime: Arc::new(RegimeEngine::new(
                stores.clone(),
                bus.clone(),
                config.regime.clone(),
            )),
            planner: Arc::new(StrategyPlanner::new(engines, stores.clone(), bus.clone())),
            risk: Arc::new(RiskService::new(
                stores.clone(),
                bus.clone(),
                config.risk.clone(),
            )),
            execution: Arc::new(ExecutionEngine::new(
                exchange,
                stores.clone(),
                bus.clone(),
                config.execution.clone(),
            )),
            positions: Arc::new(PositionManager::new(
                stores.clone(),
                bus.clone(),
                config.position.clone(),
            )),
            stores,
            bus,
        })
    }

    /// Subscribe every service in pipeline order. The regime engine is
    /// subscribed to `features.ready` before the planner so routing
    /// always sees the decision for the feature being routed.
    pub fn wire(self: &Arc<Self>) {
        // Audit persistence is owned by this single subscriber.
        {
            let stores = self.stores.clone();
            self.bus.subscribe(
                EventName::AuditEvent,
                handler(move |event| {
                    let stores = stores.clone();
                    async move {
                        if let Event::AuditEvent(audit) = event {
                            stores.audits.append(audit).await?;
                        }
                        Ok(())
                    }
                }),
            );
        }
        {
            let features = self.features.clone();
            self.bus.subscribe(
                EventName::CandleClosed,
                handler(move |event| {
                    let features = features.clone();
                    async move {
                        if let Event::CandleClosed(candle) = event {
                            features.on_candle_closed(&candle).await?;
                        }
                        Ok(())
                    }
                }),
            );
        }
        {
            let positions = self.positions.clone();
            self.bus.subscribe(
                EventName::CandleClosed,
                handler(move |event| {
                    let positions = positions.clone();
                    async move {
                        if let Event::CandleClosed(candle) = event {
                            positions
                                .on_price(
                                    &candle.symbol,
                                    candle.close,
                                    Some(candle.high),
                                    Some(candle.low),
                                )
                                .await?;
                        }
                        Ok(())
                    }
                }),
            );
        }
        {
            let regime = self.regime.clone();
            self.bus.subscribe(
                EventName::FeaturesReady,
                handler(move |event| {
                    let regime = regime.clone();
                    async move {
                        if let Event::FeaturesReady(feature) = event {
                            regime.on_features_ready(&feature).await?;
                        }
                        Ok(())
                    }
                }),
            );
        }
        {
            let planner = self.planner.clone();
            self.bus.subscribe(
                EventName::FeaturesReady,
                handler(move |event| {
                    let planner = planner.clone();
                    async move {
                        if let Event::FeaturesReady(feature) = event {
                            planner.on_features_ready(&feature).await?;
                        }
                        Ok(())
                    }
                }),
            );
        }
        {
            let planner = self.planner.clone();
            let positions = self.positions.clone();
            let stores = self.stores.clone();
            self.bus.subscribe(
                EventName::RegimeUpdated,
                handler(move |event| {
                    let planner = planner.clone();
                    let positions = positions.clone();
                    let stores = stores.clone();
                    async move {
                        if let Event::RegimeUpdated(decision) = event {
                            planner.on_regime_updated(&decision);
                            let reference_price = stores
                                .candles
                                .recent(
                                    &decision.symbol,
                                    Timeframe::M5,
                                    decision.close_time_5m,
                                    1,
                                )
                                .await?
                                .last()
                                .map(|c| c.close);
                            if let Some(price) = reference_price {
                                positions.on_regime_change(&decision, price).await?;
                            }
                        }
                        Ok(())
                    }
                }),
            );
        }
        {
            let positions = self.positions.clone();
            let risk = self.risk.clone();
            self.bus.subscribe(
                EventName::SignalGenerated,
                handler(move |event| {
                    let positions = positions.clone();
                    let risk = risk.clone();
                    async move {
                        if let Event::SignalGenerated(plan) = event {
                            positions.apply_lifecycle(&plan.symbol, LifecycleEvent::SignalArmed);
                            risk.on_signal(&plan).await?;
                        }
                        Ok(())
                    }
                }),
            );
        }
        {
            let execution = self.execution.clone();
            let stores = self.stores.clone();
            self.bus.subscribe(
                EventName::RiskApproved,
                handler(move |event| {
                    let execution = execution.clone();
                    let stores = stores.clone();
                    async move {
                        if let Event::RiskApproved(approval) = event {
                            let confirmation =
                                signal_confirmation(stores.clone(), &approval.plan);
                            let intent =
                                execution.intent_for(approval.plan.clone(), approval.qty);
                            execution
                                .execute(&intent, approval.leverage, confirmation)
                                .await?;
                        }
                        Ok(())
                    }
                }),
            );
        }
        {
            let positions = self.positions.clone();
            self.bus.subscribe(
                EventName::OrderSubmitted,
                handler(move |event| {
                    let positions = positions.clone();
                    async move {
                        if let Event::OrderSubmitted(order) = event {
                            positions
                                .apply_lifecycle(&order.symbol, LifecycleEvent::OrderSubmitted);
                        }
                        Ok(())
                    }
                }),
            );
        }
        {
            let positions = self.positions.clone();
            self.bus.subscribe(
                EventName::OrderFilled,
                handler(move |event| {
                    let positions = positions.clone();
                    async move {
                        if let Event::OrderFilled { order, .. } = event {
                            positions.adopt_open_positions(&order.symbol).await?;
                            positions.apply_lifecycle(&order.symbol, LifecycleEvent::OrderFilled);
                        }
                        Ok(())
                    }
                }),
            );
        }
    }

    /// Poll each symbol on both timeframes until cancelled.
    pub async fn run_polls(&self, symbols: Vec<Symbol>) -> Result<()> {
        let mut m1 = tokio::time::interval(Duration::from_millis(
            Timeframe::M1.interval_ms() as u64,
        ));
        let mut m5 = tokio::time::interval(Duration::from_millis(
            Timeframe::M5.interval_ms() as u64,
        ));
        loop {
            tokio::select! {
                _ = m1.tick() => self.poll_all(&symbols, Timeframe::M1).await,
                _ = m5.tick() => self.poll_all(&symbols, Timeframe::M5).await,
            }
        }
    }

    async fn poll_all(&self, symbols: &[Symbol], timeframe: Timeframe) {
        for symbol in symbols {
            if let Err(err) = self.ingest.poll(symbol, timeframe).await {
                // The next poll is the retry; integrity defects were audited.
                error!(symbol = %symbol, timeframe = %timeframe, error = %err, "Poll failed");
            }
        }
    }
}

/// The signal-still-valid probe handed to the execution engine: the plan
/// must not be expired and the symbol's latest regime must still select
/// the plan's engine.
fn signal_confirmation(stores: Stores, plan: &crate::domain::TradePlan) -> Confirmation {
    let symbol = plan.symbol.clone();
    let engine = plan.engine;
    let expires_at = plan.expires_at;
    Arc::new(move || {
        let stores = stores.clone();
        let symbol = symbol.clone();
        Box::pin(async move {
            if Utc::now().timestamp_millis() >= expires_at {
                return Ok(false);
            }
            let regime = stores.regimes.latest(&symbol).await?;
            Ok(regime.is_some_and(|r| !r.defensive && r.engine == engine))
        })
    })
}

/// Top-level application: config in, run loop out.
pub struct App;

impl App {
    /// Build the pipeline per configuration and run until cancelled.
    ///
    /// # Errors
    ///
    /// Returns configuration and exchange-construction errors; runtime
    /// poll failures are logged and retried on the next tick.
    pub async fn run(config: Config) -> Result<()> {
        let backend = MemoryBackend::new();
        let stores = backend.stores();

        let exchange: Arc<dyn Exchange> = if config.dry_run {
            info!("Dry-run mode: paper exchange");
            Arc::new(PaperExchange::new(LimitFillMode::Immediate))
        } else {
            let http = HttpExchange::new(config.http_exchange_config())?;
            http.sync_time().await?;
            Arc::new(http)
        };

        let pipeline = Pipeline::new(&config, exchange, stores, DispatchMode::Queued);
        pipeline.wire();
        info!(
            symbols = ?config.symbols,
            dry_run = config.dry_run,
            "Pipeline wired; starting polls"
        );
        pipeline.run_polls(config.symbols.clone()).await
    }
}
