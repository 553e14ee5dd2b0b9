//! Exponential moving average.

/// EMA series with smoothing k = 2/(period+1), seeded by the simple
/// average of the first `period` values.
///
/// Returns one value per input bar from the seed bar onward, so the
/// result has `values.len() - period + 1` entries; `None` when there is
/// not enough history.
#[must_use]
pub fn ema_series(values: &[f64], period: usize) -> Option<Vec<f64>> {
    if period == 0 || values.len() < period {
        return None;
    }
    let k = 2.0 / (period as f64 + 1.0);
    let seed = values[..period].iter().sum::<f64>() / period as f64;
    let mut series = Vec::with_capacity(values.len() - period + 1);
    series.push(seed);
    let mut ema = seed;
    for &v in &values[period..] {
        ema = v * k + ema * (1.0 - k);
        series.push(ema);
    }
    Some(series)
}

/// Latest EMA value, if enough history exists.
#[must_use]
pub fn ema(values: &[f64], period: usize) -> Option<f64> {
    ema_series(values, period).map(|s| s[s.len() - 1])
}
