//! Average true range.

/// ATR over the last `period` true ranges.
///
/// True range = max(high − low, |high − prev close|, |low − prev close|).
/// The first bar has no previous close, so `period + 1` bars are required;
/// the result is the plain average of the last `period` true ranges.
#[must_use]
pub fn atr(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> Option<f64> {
    let n = highs.len();
    if period == 0 || n != lows.len() || n != closes.len() || n < period + 1 {
        return None;
    }
    let mut trs = Vec::with_capacity(n - 1);
    for i in 1..n {
        let prev_close = closes[i - 1];
        let tr = (highs[i] - lows[i])
            .max((highs[i] - prev_close).abs())
            .max((lows[i] - prev_close).abs());
        trs.push(tr);
    }
    let tail = &trs[trs.len() - period..];
    Some(tail.iter().sum::<f64>() / period as f64)
}
