//! Feature vectors computed from rolling candle history.

use serde::{Deserialize, Serialize};

use super::candle::Timeframe;
use super::id::Symbol;

/// The full feature vector derived from the most recent candles ending at
/// `close_time`. One-to-one with (symbol, timeframe, close_time).
///
/// Percentile fields are in [0, 100]; `ewma_sigma` is never negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub symbol: Symbol,
    pub timeframe: Timeframe,
    pub close_time: i64,
    /// ln(close / previous close) of the latest bar.
    pub log_return: f64,
    /// ATR(14) as a percentage of the latest close.
    pub atr_pct: f64,
    /// Square root of the EWMA variance of log returns.
    pub ewma_sigma: f64,
    /// Latest sigma normalized by the rolling median sigma.
    pub sigma_norm: f64,
    /// ewma_sigma · √5 · 100.
    pub vol_pct_5m: f64,
    /// Bollinger(20, 2σ) band width as a percentage of the band mean.
    pub bb_width_pct: f64,
    /// Percentile rank of the latest band width in the rolling window.
    pub bb_width_percentile: f64,
    pub ema20: f64,
    pub ema50: f64,
    pub ema200: f64,
    /// Five-bar relative slope of EMA(50).
    pub ema50_slope: f64,
    /// Latest volume over the rolling median volume, ·100.
    pub volume_pct: f64,
    /// Percentile rank of the latest volume in the rolling window.
    pub volume_percentile: f64,
}
