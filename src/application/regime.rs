//! Sliding-window percentile regime classification.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::bus::{Event, EventBus};
use crate::domain::{FeatureVector, Regime, RegimeDecision, Symbol, Timeframe};
use crate::error::Result;
use crate::indicators::percentile_rank;
use crate::port::store::{RegimeStore, Stores};

/// Classification thresholds, all percentile ranks in [0, 100].
#[derive(Debug, Clone)]
pub struct RegimeConfig {
    /// Ring-buffer length per symbol.
    pub window_size: usize,
    pub compression_th: f64,
    pub trend_th: f64,
    pub expansion_th: f64,
    /// Volume percentile at or above which the defensive flag raises.
    pub defensive_th: f64,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            window_size: 100,
            compression_th: 25.0,
            trend_th: 65.0,
            expansion_th: 85.0,
            defensive_th: 90.0,
        }
    }
}

/// Ordered classification over the three percentile ranks.
///
/// The predicates are evaluated in order; the first match wins and the
/// fallthrough is Range, so the function is total.
#[must_use]
pub fn classify(
    sigma_norm_pct: f64,
    bb_width_pctile: f64,
    slope_abs_pctile: f64,
    config: &RegimeConfig,
) -> Regime {
    if sigma_norm_pct <= config.compression_th && bb_width_pctile <= config.compression_th {
        Regime::Compression
    } else if sigma_norm_pct >= config.expansion_th && bb_width_pctile >= config.expansion_th {
        Regime::ExpansionChaos
    } else if sigma_norm_pct >= config.trend_th && slope_abs_pctile >= config.trend_th {
        Regime::Trend
    } else {
        Regime::Range
    }
}

#[derive(Debug, Clone, Copy)]
struct RegimeSample {
    sigma_norm: f64,
    bb_width_pct: f64,
    slope_abs: f64,
}

/// Classifies each 5m feature against its per-symbol rolling window and
/// publishes `regime.updated`.
pub struct RegimeEngine {
    stores: Stores,
    bus: Arc<EventBus>,
    config: RegimeConfig,
    windows: Mutex<HashMap<Symbol, VecDeque<RegimeSample>>>,
}

impl RegimeEngine {
    pub fn new(stores: Stores, bus: Arc<EventBus>, config: RegimeConfig) -> Self {
        Self {
            stores,
            bus,
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Handle one `features.ready`; non-5m features are ignored.
    pub async fn on_features_ready(&self, feature: &FeatureVector) -> Result<()> {
        if feature.timeframe != Timeframe::M5 {
            return Ok(());
        }

        let (sigma_norm_pct, bb_width_pctile, slope_abs_pctile) = {
            let mut windows = self.windows.lock();
            let window = windows.entry(feature.symbol.clone()).or_default();
            window.push_back(RegimeSample {
                sigma_norm: feature.sigma_norm,
                bb_width_pct: feature.bb_width_pct,
                slope_abs: feature.ema50_slope.abs(),
            });
            while window.len() > self.config.window_size {
                window.pop_front();
            }
            let sigma_norms: Vec<f64> = window.iter().map(|s| s.sigma_norm).collect();
            let widths: Vec<f64> = window.iter().map(|s| s.bb_width_pct).collect();
            let slopes: Vec<f64> = window.iter().map(|s| s.slope_abs).collect();
            (
                percentile_rank(&sigma_norms, feature.sigma_norm),
                percentile_rank(&widths, feature.bb_width_pct),
                percentile_rank(&slopes, feature.ema50_slope.abs()),
            )
        };

        let regime = classify(
            sigma_norm_pct,
            bb_width_pctile,
            slope_abs_pctile,
            &self.config,
        );
        let defensive = feature.volume_percentile >= self.config.defensive_th;
        let decision = RegimeDecision::new(
            feature.symbol.clone(),
            feature.close_time,
            regime,
            defensive,
        );

        debug!(
            symbol = %decision.symbol,
            close_time = decision.close_time_5m,
            regime = %decision.regime,
            engine = %decision.engine,
            defensive = decision.defensive,
            sigma_norm_pct,
            bb_width_pctile,
            slope_abs_pctile,
            "Regime classified"
        );

        self.stores.regimes.upsert(&decision).await?;
        self.bus.publish(Event::RegimeUpdated(decision)).await;
        Ok(())
    }
}
