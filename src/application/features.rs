//! Feature computation on closed candles.

use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use crate::bus::{Event, EventBus};
use crate::domain::{hash_of, AuditEvent, AuditLevel, Candle, FeatureVector};
use crate::error::Result;
use crate::indicators::{
    atr, bollinger_width_pct, ema_series, ewma_sigma_series, log_returns, median,
    percentile_rank, sigma_norm, EPS,
};
use crate::port::store::{CandleStore, FeatureStore, Stores};

/// Feature-computation tuning.
#[derive(Debug, Clone)]
pub struct FeatureConfig {
    /// Candles loaded per computation.
    pub history_limit: usize,
    /// Minimum candles required; fewer means a silent skip.
    pub min_candles: usize,
    /// Minimum usable log returns required.
    pub min_returns: usize,
    pub atr_period: usize,
    pub bb_period: usize,
    pub bb_num_std: f64,
    /// Rolling windows for the percentile/median normalizations.
    pub sigma_window: usize,
    pub bb_window: usize,
    pub volume_window: usize,
    /// Bars between the EMA50 slope endpoints.
    pub slope_lag: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            history_limit: 260,
            min_candles: 205,
            min_returns: 30,
            atr_period: 14,
            bb_period: 20,
            bb_num_std: 2.0,
            sigma_window: 50,
            bb_window: 50,
            volume_window: 50,
            slope_lag: 5,
        }
    }
}

/// Computes the feature vector for each closed candle and publishes
/// `features.ready`.
pub struct FeatureService {
    stores: Stores,
    bus: Arc<EventBus>,
    config: FeatureConfig,
}

impl FeatureService {
    pub fn new(stores: Stores, bus: Arc<EventBus>, config: FeatureConfig) -> Self {
        Self {
            stores,
            bus,
            config,
        }
    }

    /// Handle one `candle.closed`: silently skips when history is thin.
    pub async fn on_candle_closed(&self, candle: &Candle) -> Result<()> {
        let candles = self
            .stores
            .candles
            .recent(
                &candle.symbol,
                candle.timeframe,
                candle.close_time,
                self.config.history_limit,
            )
            .await?;
        if candles.len() < self.config.min_candles {
            debug!(
                symbol = %candle.symbol,
                timeframe = %candle.timeframe,
                have = candles.len(),
                need = self.config.min_candles,
                "Skipping feature computation"
            );
            return Ok(());
        }
        let Some(feature) = self.compute(&candles) else {
            return Ok(());
        };

        self.stores.features.upsert(&feature).await?;
        let feature_hash = hash_of(&feature)?;
        let audit = AuditEvent::new(
            Utc::now().timestamp_millis(),
            "features.compute",
            AuditLevel::Debug,
            format!(
                "features computed for {} {} at {}",
                feature.symbol, feature.timeframe, feature.close_time
            ),
        )
        .with_outputs_hash(feature_hash);
        self.bus.publish(Event::AuditEvent(audit)).await;
        self.bus.publish(Event::FeaturesReady(feature)).await;
        Ok(())
    }

    /// Pure computation over an oldest-first candle window ending at the
    /// bar being featured. `None` when any prerequisite is missing.
    pub fn compute(&self, candles: &[Candle]) -> Option<FeatureVector> {
        let latest = candles.last()?;
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let highs: Vec<f64> = candles.iter().map(|c| c.high).collect();
        let lows: Vec<f64> = candles.iter().map(|c| c.low).collect();
        let volumes: Vec<f64> = candles.iter().map(|c| c.volume).collect();

        let returns = log_returns(&closes);
        if returns.len() < self.config.min_returns {
            return None;
        }
        let log_return = *returns.last()?;

        let atr_value = atr(&highs, &lows, &closes, self.config.atr_period)?;
        let atr_pct = atr_value / latest.close.max(EPS) * 100.0;

        let lambda = latest.timeframe.ewma_lambda();
        let sigmas = ewma_sigma_series(&returns, lambda);
        let ewma_sigma = *sigmas.last()?;
        let sigma_norm_value = sigma_norm(&sigmas, self.config.sigma_window);
        let vol_pct_5m = ewma_sigma * 5f64.sqrt() * 100.0;

        let widths = self.bollinger_width_series(&closes)?;
        let bb_width_pct = *widths.last()?;
        let bb_width_percentile = percentile_rank(&widths, bb_width_pct);

        let ema20 = *ema_series(&closes, 20)?.last()?;
        let ema50_series = ema_series(&closes, 50)?;
        let ema50 = *ema50_series.last()?;
        let ema200 = *ema_series(&closes, 200)?.last()?;
        let ema50_slope = if ema50_series.len() > self.config.slope_lag {
            let earlier = ema50_series[ema50_series.len() - 1 - self.config.slope_lag];
            (ema50 - earlier) / earlier.max(EPS)
        } else {
            return None;
        };

        let volume_tail =
            &volumes[volumes.len().saturating_sub(self.config.volume_window)..];
        let latest_volume = *volumes.last()?;
        let volume_percentile = percentile_rank(volume_tail, latest_volume);
        let volume_pct = latest_volume / median(volume_tail).max(EPS) * 100.0;

        Some(FeatureVector {
            symbol: latest.symbol.clone(),
            timeframe: latest.timeframe,
            close_time: latest.close_time,
            log_return,
            atr_pct,
            ewma_sigma,
            sigma_norm: sigma_norm_value,
            vol_pct_5m,
            bb_width_pct,
            bb_width_percentile,
            ema20,
            ema50,
            ema200,
            ema50_slope,
            volume_pct,
            volume_percentile,
        })
    }

    /// One band width per bar over the trailing `bb_window` bars.
    fn bollinger_width_series(&self, closes: &[f64]) -> Option<Vec<f64>> {
        let window_start = closes.len().saturating_sub(self.config.bb_window);
        let mut widths = Vec::with_capacity(self.config.bb_window);
        for end in window_start..closes.len() {
            if end + 1 < self.config.bb_period {
                continue;
            }
            widths.push(bollinger_width_pct(
                &closes[..=end],
                self.config.bb_period,
                self.config.bb_num_std,
            )?);
        }
        (!widths.is_empty()).then_some(widths)
    }
}
