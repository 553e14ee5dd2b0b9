//! Range reversal engine (5m).
//!
//! Fades touches of the established range extremes, requiring a rejection
//! bar with a meaningful body in the fade direction.

use async_trait::async_trait;

use super::{
    clamped_leverage, regime_guard, Evaluation, StrategyEngine, PLACEHOLDER_PARAMS_VERSION,
};
use crate::domain::{
    Engine, FeatureVector, Regime, RegimeDecision, Side, Timeframe, TpModel, TradePlan,
};
use crate::error::Result;
use crate::indicators::{clamp, EPS};
use crate::port::store::{CandleStore, Stores};

#[derive(Debug, Clone)]
pub struct ReversalConfig {
    pub range_lookback_bars: usize,
    /// Touch tolerance in percent of the range extreme.
    pub touch_pct: f64,
    /// Minimum candle body in percent of the open.
    pub confirmation_body_pct: f64,
    /// Stop multiple of ATR.
    pub ks: f64,
    pub leverage_base: f64,
    pub sigma_min: f64,
    pub sigma_max: f64,
    pub engine_min_leverage: f64,
    pub engine_max_leverage: f64,
    pub exchange_max_leverage: f64,
    pub margin_pct: f64,
    pub confidence: f64,
    pub expiry_ms: i64,
}

impl Default for ReversalConfig {
    fn default() -> Self {
        Self {
            range_lookback_bars: 30,
            touch_pct: 0.05,
            confirmation_body_pct: 0.04,
            ks: 0.8,
            leverage_base: 3.0,
            sigma_min: 0.5,
            sigma_max: 2.0,
            engine_min_leverage: 1.0,
            engine_max_leverage: 5.0,
            exchange_max_leverage: 20.0,
            margin_pct: 10.0,
            confidence: 0.55,
            expiry_ms: 10 * 60 * 1000,
        }
    }
}

pub struct ReversalEngine {
    stores: Stores,
    config: ReversalConfig,
}

impl ReversalEngine {
    pub fn new(stores: Stores, config: ReversalConfig) -> Self {
        Self { stores, config }
    }
}

#[async_trait]
impl StrategyEngine for ReversalEngine {
    fn kind(&self) -> Engine {
        Engine::Reversal
    }

    fn regime(&self) -> Regime {
        Regime::Range
    }

    fn timeframe(&self) -> Timeframe {
        Timeframe::M5
    }

    async fn evaluate(
        &self,
        feature: &FeatureVector,
        regime: &RegimeDecision,
    ) -> Result<Evaluation> {
        if let Some(rejection) = regime_guard(Regime::Range, regime) {
            return Ok(rejection);
        }

        let candles = self
            .stores
            .candles
            .recent(
                &feature.symbol,
                Timeframe::M5,
                feature.close_time,
                self.config.range_lookback_bars,
            )
            .await?;
        if candles.len() < self.config.range_lookback_bars {
            return Ok(Evaluation::rejected("insufficient_history"));
        }

        let range_high = candles.iter().map(|c| c.high).fold(f64::MIN, f64::max);
        let range_low = candles.iter().map(|c| c.low).fold(f64::MAX, f64::min);
        let latest = &candles[candles.len() - 1];

        let touch = self.config.touch_pct / 100.0;
        let touched_upper = latest.close >= range_high * (1.0 - touch);
        let touched_lower = latest.close <= range_low * (1.0 + touch);
        if !touched_upper && !touched_lower {
            return Ok(Evaluation::rejected("no_range_touch"));
        }

        let body_pct = (latest.close - latest.open).abs() / latest.open.max(EPS) * 100.0;
        if body_pct < self.config.confirmation_body_pct {
            return Ok(Evaluation::rejected("body_below_confirmation_threshold"));
        }

        let side = if touched_upper && latest.close < latest.open && latest.high >= range_high {
            Side::Short
        } else if touched_lower && latest.close > latest.open && latest.low <= range_low {
            Side::Long
        } else {
            return Ok(Evaluation::rejected("no_reversal_confirmation"));
        };

        let bounded_sigma = clamp(
            feature.sigma_norm,
            self.config.sigma_min,
            self.config.sigma_max,
        );
        let leverage = clamped_leverage(
            self.config.leverage_base / bounded_sigma.max(EPS),
            self.config.engine_min_leverage,
            self.config.engine_max_leverage,
            self.config.exchange_max_leverage,
        );

        let extreme = match side {
            Side::Short => range_high,
            Side::Long => range_low,
        };
        Ok(Evaluation::Triggered(TradePlan {
            symbol: feature.symbol.clone(),
            side,
            engine: Engine::Reversal,
            entry_price: latest.close,
            stop_pct: self.config.ks * feature.atr_pct,
            atr_pct: feature.atr_pct,
            tp_model: TpModel::B,
            leverage,
            margin_pct: self.config.margin_pct,
            expires_at: feature.close_time + self.config.expiry_ms,
            reason: format!("range reversal {side} off {extreme:.4}"),
            params_version_id: PLACEHOLDER_PARAMS_VERSION.to_string(),
            confidence: self.config.confidence,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::memory::MemoryBackend;
    use crate::domain::{Candle, Symbol};

    fn range(symbol: &str) -> RegimeDecision {
        RegimeDecision::new(Symbol::new(symbol), 300_000 * 30, Regime::Range, false)
    }

    fn feature(close_time: i64) -> FeatureVector {
        FeatureVector {
            symbol: Symbol::new("BTCUSDT"),
            timeframe: Timeframe::M5,
            close_time,
            log_return: 0.0,
            atr_pct: 1.0,
            ewma_sigma: 0.01,
            sigma_norm: 1.0,
            vol_pct_5m: 2.0,
            bb_width_pct: 1.0,
            bb_width_percentile: 50.0,
            ema20: 100.0,
            ema50: 100.0,
            ema200: 100.0,
            ema50_slope: 0.0,
            volume_pct: 100.0,
            volume_percentile: 50.0,
        }
    }

    /// 29 bars oscillating between 99 and 101, then a caller-shaped latest bar.
    async fn seed_range(
        backend: &MemoryBackend,
        latest: (f64, f64, f64, f64),
    ) -> i64 {
        for i in 0..29i64 {
            backend
                .candles
                .upsert(&Candle {
                    symbol: Symbol::new("BTCUSDT"),
                    timeframe: Timeframe::M5,
                    close_time: (i + 1) * 300_000,
                    open: 100.0,
                    high: 101.0,
                    low: 99.0,
                    close: if i % 2 == 0 { 100.5 } else { 99.5 },
                    volume: 5.0,
                })
                .await
                .unwrap();
        }
        let (open, high, low, close) = latest;
        let last = 30 * 300_000;
        backend
            .candles
            .upsert(&Candle {
                symbol: Symbol::new("BTCUSDT"),
                timeframe: Timeframe::M5,
                close_time: last,
                open,
                high,
                low,
                close,
                volume: 5.0,
            })
            .await
            .unwrap();
        last
    }

    #[tokio::test]
    async fn short_on_upper_touch_with_bearish_rejection_bar() {
        let backend = MemoryBackend::new();
        // Pokes a new range high, closes back down with a real body while
        // still inside the touch band of the extreme.
        let last = seed_range(&backend, (101.40, 101.40, 101.20, 101.35)).await;

        let engine = ReversalEngine::new(backend.stores(), ReversalConfig::default());
        let result = engine
            .evaluate(&feature(last), &range("BTCUSDT"))
            .await
            .unwrap();

        match result {
            Evaluation::Triggered(plan) => {
                assert_eq!(plan.side, Side::Short);
                assert!((plan.stop_pct - 0.8).abs() < 1e-9);
                assert_eq!(plan.tp_model, TpModel::B);
            }
            Evaluation::Rejected(reason) => panic!("unexpected rejection: {reason}"),
        }
    }

    #[tokio::test]
    async fn long_on_lower_touch_with_bullish_rejection_bar() {
        let backend = MemoryBackend::new();
        let last = seed_range(&backend, (98.58, 98.90, 98.58, 98.625)).await;

        let engine = ReversalEngine::new(backend.stores(), ReversalConfig::default());
        let result = engine
            .evaluate(&feature(last), &range("BTCUSDT"))
            .await
            .unwrap();

        assert!(matches!(
            result,
            Evaluation::Triggered(plan) if plan.side == Side::Long
        ));
    }

    #[tokio::test]
    async fn mid_range_close_rejects_without_touch() {
        let backend = MemoryBackend::new();
        let last = seed_range(&backend, (100.0, 100.3, 99.8, 100.1)).await;

        let engine = ReversalEngine::new(backend.stores(), ReversalConfig::default());
        let result = engine
            .evaluate(&feature(last), &range("BTCUSDT"))
            .await
            .unwrap();

        assert_eq!(result, Evaluation::rejected("no_range_touch"));
    }

    #[tokio::test]
    async fn doji_body_rejects() {
        let backend = MemoryBackend::new();
        // Upper touch but an almost non-existent body.
        let last = seed_range(&backend, (101.30, 101.30, 101.25, 101.299)).await;

        let engine = ReversalEngine::new(backend.stores(), ReversalConfig::default());
        let result = engine
            .evaluate(&feature(last), &range("BTCUSDT"))
            .await
            .unwrap();

        assert_eq!(
            result,
            Evaluation::rejected("body_below_confirmation_threshold")
        );
    }

    #[tokio::test]
    async fn bullish_bar_at_upper_touch_rejects_confirmation() {
        let backend = MemoryBackend::new();
        // Close at the high band but the bar closed up: no rejection bar.
        let last = seed_range(&backend, (101.20, 101.45, 101.15, 101.42)).await;

        let engine = ReversalEngine::new(backend.stores(), ReversalConfig::default());
        let result = engine
            .evaluate(&feature(last), &range("BTCUSDT"))
            .await
            .unwrap();

        assert_eq!(result, Evaluation::rejected("no_reversal_confirmation"));
    }
}
