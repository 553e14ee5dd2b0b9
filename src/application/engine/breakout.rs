//! Compression breakout engine (1m).
//!
//! Waits for a tight band and elevated volume, then requires every
//! confirmation close to clear a buffered barrier above (or below) the
//! baseline range before committing a direction.

use async_trait::async_trait;

use super::{
    clamped_leverage, regime_guard, Evaluation, StrategyEngine, PLACEHOLDER_PARAMS_VERSION,
};
use crate::domain::{
    Engine, FeatureVector, Regime, RegimeDecision, Side, Timeframe, TpModel, TradePlan,
};
use crate::error::Result;
use crate::indicators::EPS;
use crate::port::store::{CandleStore, Stores};

#[derive(Debug, Clone)]
pub struct BreakoutConfig {
    /// Band-width percentile gate.
    pub compression_percentile_max: f64,
    /// Volume percentile gate.
    pub volume_percentile_min: f64,
    pub range_lookback_bars: usize,
    pub confirmation_bars: usize,
    /// Barrier buffer in percent of the baseline extreme.
    pub barrier_buffer_pct: f64,
    /// Stop multiple of ATR.
    pub kb: f64,
    pub leverage_base: f64,
    pub engine_min_leverage: f64,
    pub engine_max_leverage: f64,
    pub exchange_max_leverage: f64,
    pub margin_pct: f64,
    pub confidence: f64,
    pub expiry_ms: i64,
}

impl Default for BreakoutConfig {
    fn default() -> Self {
        Self {
            compression_percentile_max: 35.0,
            volume_percentile_min: 60.0,
            range_lookback_bars: 20,
            confirmation_bars: 2,
            barrier_buffer_pct: 0.02,
            kb: 1.2,
            leverage_base: 4.0,
            engine_min_leverage: 1.0,
            engine_max_leverage: 8.0,
            exchange_max_leverage: 20.0,
            margin_pct: 10.0,
            confidence: 0.7,
            expiry_ms: 5 * 60 * 1000,
        }
    }
}

pub struct BreakoutEngine {
    stores: Stores,
    config: BreakoutConfig,
}

impl BreakoutEngine {
    pub fn new(stores: Stores, config: BreakoutConfig) -> Self {
        Self { stores, config }
    }
}

#[async_trait]
impl StrategyEngine for BreakoutEngine {
    fn kind(&self) -> Engine {
        Engine::Breakout
    }

    fn regime(&self) -> Regime {
        Regime::Compression
    }

    fn timeframe(&self) -> Timeframe {
        Timeframe::M1
    }

    async fn evaluate(
        &self,
        feature: &FeatureVector,
        regime: &RegimeDecision,
    ) -> Result<Evaluation> {
        if let Some(rejection) = regime_guard(Regime::Compression, regime) {
            return Ok(rejection);
        }
        if feature.bb_width_percentile > self.config.compression_percentile_max {
            return Ok(Evaluation::rejected("bb_width_above_compression_gate"));
        }
        if feature.volume_percentile < self.config.volume_percentile_min {
            return Ok(Evaluation::rejected("volume_below_min_percentile"));
        }

        let needed = self.config.range_lookback_bars + self.config.confirmation_bars + 1;
        let candles = self
            .stores
            .candles
            .recent(&feature.symbol, Timeframe::M1, feature.close_time, needed)
            .await?;
        if candles.len() < needed {
            return Ok(Evaluation::rejected("insufficient_history"));
        }
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let split = closes.len() - self.config.confirmation_bars;
        let (baseline, recent) = closes.split_at(split);

        let baseline_high = baseline.iter().cloned().fold(f64::MIN, f64::max);
        let baseline_low = baseline.iter().cloned().fold(f64::MAX, f64::min);
        let buffer = self.config.barrier_buffer_pct / 100.0;
        let upper = baseline_high * (1.0 + buffer);
        let lower = baseline_low * (1.0 - buffer);

        let side = if recent.iter().all(|&c| c > upper) {
            Side::Long
        } else if recent.iter().all(|&c| c < lower) {
            Side::Short
        } else {
            return Ok(Evaluation::rejected("no_breakout_confirmation"));
        };

        let entry_price = *closes.last().unwrap_or(&feature.ema20);
        let raw_leverage = self.config.leverage_base / feature.sigma_norm.max(EPS).sqrt();
        let leverage = clamped_leverage(
            raw_leverage,
            self.config.engine_min_leverage,
            self.config.engine_max_leverage,
            self.config.exchange_max_leverage,
        );

        let barrier = match side {
            Side::Long => upper,
            Side::Short => lower,
        };
        Ok(Evaluation::Triggered(TradePlan {
            symbol: feature.symbol.clone(),
            side,
            engine: Engine::Breakout,
            entry_price,
            stop_pct: self.config.kb * feature.atr_pct,
            atr_pct: feature.atr_pct,
            tp_model: TpModel::A,
            leverage,
            margin_pct: self.config.margin_pct,
            expires_at: feature.close_time + self.config.expiry_ms,
            reason: format!("compression breakout {side} through {barrier:.4}"),
            params_version_id: PLACEHOLDER_PARAMS_VERSION.to_string(),
            confidence: self.config.confidence,
        }))
    }
}
