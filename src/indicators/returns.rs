//! Log returns over a close series.

/// Natural-log returns of consecutive closes.
///
/// A pair contributes a return only when both closes are positive and the
/// ratio is finite; degenerate bars are skipped rather than poisoning the
/// downstream EWMA.
#[must_use]
pub fn log_returns(closes: &[f64]) -> Vec<f64> {
    closes
        .windows(2)
        .filter_map(|pair| {
            let (prev, curr) = (pair[0], pair[1]);
            if prev > 0.0 && curr > 0.0 {
                let r = (curr / prev).ln();
                r.is_finite().then_some(r)
            } else {
                None
            }
        })
        .collect()
}
