//! Trend continuation engine (5m).
//!
//! Trades pullbacks in the direction of the EMA50/EMA200 alignment:
//! price must sit inside the EMA20/EMA50 pullback zone and the latest
//! close must reclaim the previous bar's extreme plus EMA20.

use async_trait::async_trait;

use super::{regime_guard, Evaluation, StrategyEngine, PLACEHOLDER_PARAMS_VERSION};
use crate::domain::{
    Engine, FeatureVector, LeverageBand, Regime, RegimeDecision, Side, Timeframe, TpModel,
    TradePlan,
};
use crate::error::Result;
use crate::indicators::clamp;
use crate::port::store::{CandleStore, Stores};

#[derive(Debug, Clone)]
pub struct ContinuationConfig {
    pub confirmation_bars: usize,
    /// Pullback zone tolerance in percent around the EMA20/EMA50 span.
    pub pullback_zone_pct: f64,
    /// Stop multiple of ATR.
    pub ks: f64,
    /// Bounds applied to sigma before the band walk.
    pub sigma_min: f64,
    pub sigma_max: f64,
    /// Ascending by `max_sigma_norm`; first band covering the clamped
    /// sigma wins.
    pub leverage_bands: Vec<LeverageBand>,
    pub margin_pct: f64,
    pub confidence: f64,
    pub expiry_ms: i64,
}

impl Default for ContinuationConfig {
    fn default() -> Self {
        Self {
            confirmation_bars: 2,
            pullback_zone_pct: 0.25,
            ks: 0.9,
            sigma_min: 0.5,
            sigma_max: 2.0,
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
            margin_pct: 10.0,
            confidence: 0.6,
            expiry_ms: 10 * 60 * 1000,
        }
    }
}

pub struct ContinuationEngine {
    stores: Stores,
    config: ContinuationConfig,
}

impl ContinuationEngine {
    pub fn new(stores: Stores, config: ContinuationConfig) -> Self {
        Self { stores, config }
    }

    /// Stepwise leverage: first band whose ceiling covers the clamped
    /// sigma; beyond the last band the last band applies.
    fn banded_leverage(&self, sigma_norm: f64) -> f64 {
        let bounded = clamp(sigma_norm, self.config.sigma_min, self.config.sigma_max);
        self.config
            .leverage_bands
            .iter()
            .find(|band| band.max_sigma_norm >= bounded)
            .or_else(|| self.config.leverage_bands.last())
            .map_or(1.0, |band| band.leverage)
    }
}

#[async_trait]
impl StrategyEngine for ContinuationEngine {
    fn kind(&self) -> Engine {
        Engine::Continuation
    }

    fn regime(&self) -> Regime {
        Regime::Trend
    }

    fn timeframe(&self) -> Timeframe {
        Timeframe::M5
    }

    async fn evaluate(
        &self,
        feature: &FeatureVector,
        regime: &RegimeDecision,
    ) -> Result<Evaluation> {
        if let Some(rejection) = regime_guard(Regime::Trend, regime) {
            return Ok(rejection);
        }

        let side = if feature.ema50 >= feature.ema200 {
            Side::Long
        } else {
            Side::Short
        };

        let candles = self
            .stores
            .candles
            .recent(
                &feature.symbol,
                Timeframe::M5,
                feature.close_time,
                self.config.confirmation_bars,
            )
            .await?;
        if candles.len() < self.config.confirmation_bars {
            return Ok(Evaluation::rejected("insufficient_history"));
        }
        let latest = &candles[candles.len() - 1];
        let previous = &candles[candles.len() - 2];

        let zone = self.config.pullback_zone_pct / 100.0;
        let zone_low = feature.ema20.min(feature.ema50) * (1.0 - zone);
        let zone_high = feature.ema20.max(feature.ema50) * (1.0 + zone);
        if latest.close < zone_low || latest.close > zone_high {
            return Ok(Evaluation::rejected("price_outside_pullback_zone"));
        }

        let confirmed = match side {
            Side::Long => latest.close > previous.high && latest.close > feature.ema20,
            Side::Short => latest.close < previous.low && latest.close < feature.ema20,
        };
        if !confirmed {
            return Ok(Evaluation::rejected("no_continuation_confirmation"));
        }

        Ok(Evaluation::Triggered(TradePlan {
            symbol: feature.symbol.clone(),
            side,
            engine: Engine::Continuation,
            entry_price: latest.close,
            stop_pct: self.config.ks * feature.atr_pct,
            atr_pct: feature.atr_pct,
            tp_model: TpModel::B,
            leverage: self.banded_leverage(feature.sigma_norm),
            margin_pct: self.config.margin_pct,
            expires_at: feature.close_time + self.config.expiry_ms,
            reason: format!("trend continuation {side} after pullback reclaim"),
            params_version_id: PLACEHOLDER_PARAMS_VERSION.to_string(),
            confidence: self.config.confidence,
        }))
    }
}
