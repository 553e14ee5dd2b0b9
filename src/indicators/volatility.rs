//! EWMA variance and regime-normalized sigma.

use super::percentile::median;
use super::EPS;

/// Exponentially weighted moving variance of a return series.
///
/// Initialized at r₁², then σ²ₜ = λ·σ²ₜ₋₁ + (1−λ)·rₜ². One value per
/// return; empty input gives an empty series.
#[must_use]
pub fn ewma_variance_series(returns: &[f64], lambda: f64) -> Vec<f64> {
    let mut series = Vec::with_capacity(returns.len());
    let mut variance = 0.0;
    for (i, &r) in returns.iter().enumerate() {
        variance = if i == 0 {
            r * r
        } else {
            lambda * variance + (1.0 - lambda) * r * r
        };
        series.push(variance);
    }
    series
}

/// √max(0, σ²) for each entry of the EWMA variance series.
#[must_use]
pub fn ewma_sigma_series(returns: &[f64], lambda: f64) -> Vec<f64> {
    ewma_variance_series(returns, lambda)
        .into_iter()
        .map(|v| v.max(0.0).sqrt())
        .collect()
}

/// Latest sigma normalized by the median of the last `window` sigmas.
#[must_use]
pub fn sigma_norm(sigmas: &[f64], window: usize) -> f64 {
    match sigmas.last() {
        Some(&latest) => {
            let start = sigmas.len().saturating_sub(window);
            latest / median(&sigmas[start..]).max(EPS)
        }
        None => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_at_first_return_squared() {
        let s = ewma_variance_series(&[0.02, 0.01], 0.94);
        assert!((s[0] - 0.0004).abs() < 1e-12);
        let expected = 0.94 * 0.0004 + 0.06 * 0.0001;
        assert!((s[1] - expected).abs() < 1e-12);
    }

    #[test]
    fn sigma_is_sqrt_of_variance() {
        let sigmas = ewma_sigma_series(&[0.02], 0.97);
        assert!((sigmas[0] - 0.02).abs() < 1e-12);
    }

    #[test]
    fn sigma_norm_of_constant_series_is_one() {
        let sigmas = vec![0.01; 50];
        assert!((sigma_norm(&sigmas, 50) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn sigma_norm_ratio_against_window_median() {
        // Median of [1, 1, 1, 2] window is 1.0 → norm = latest / 1.0
        let sigmas = [1.0, 1.0, 1.0, 2.0];
        assert!((sigma_norm(&sigmas, 4) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn empty_series_is_zero() {
        assert_eq!(sigma_norm(&[], 50), 0.0);
    }
}
