//! Bollinger band width.

use super::EPS;

/// Band width of a `period`-bar, `num_std`-sigma Bollinger band as a
/// percentage of the band mean, over the last `period` closes of the slice.
///
/// Width % = (upper − lower) / max(mean, 1e-8) · 100, with the population
/// standard deviation of the window.
#[must_use]
pub fn bollinger_width_pct(closes: &[f64], period: usize, num_std: f64) -> Option<f64> {
    if period == 0 || closes.len() < period {
        return None;
    }
    let window = &closes[closes.len() - period..];
    let mean = window.iter().sum::<f64>() / period as f64;
    let variance = window.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / period as f64;
    let std = variance.sqrt();
    let width = 2.0 * num_std * std;
    Some(width / mean.max(EPS) * 100.0)
}
