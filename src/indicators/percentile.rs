//! Percentile rank and median.

/// Percentile rank of `v` within `sample`: the share of values ≤ `v`
/// (ties counted inclusive), in [0, 100]. Empty samples rank 0.
#[must_use]
pub fn percentile_rank(sample: &[f64], v: f64) -> f64 {
    if sample.is_empty() {
        return 0.0;
    }
    let mut sorted = sample.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let count = sorted.iter().take_while(|&&x| x <= v).count();
    count as f64 / sorted.len() as f64 * 100.0
}

/// Median over a copy of `xs`; 0 for an empty slice.
#[must_use]
pub fn median(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    let mut sorted = xs.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rank_counts_ties_inclusive() {
        let sample = [1.0, 2.0, 2.0, 3.0];
        assert!((percentile_rank(&sample, 2.0) - 75.0).abs() < 1e-9);
    }

    #[test]
    fn rank_extremes() {
        let sample = [1.0, 2.0, 3.0, 4.0];
        assert!((percentile_rank(&sample, 0.5) - 0.0).abs() < 1e-9);
        assert!((percentile_rank(&sample, 4.0) - 100.0).abs() < 1e-9);
        assert!((percentile_rank(&sample, 99.0) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn rank_of_empty_sample_is_zero() {
        assert_eq!(percentile_rank(&[], 1.0), 0.0);
    }

    #[test]
    fn median_odd_and_even() {
        assert!((median(&[3.0, 1.0, 2.0]) - 2.0).abs() < 1e-12);
        assert!((median(&[4.0, 1.0, 3.0, 2.0]) - 2.5).abs() < 1e-12);
    }

    #[test]
    fn median_of_empty_is_zero() {
        assert_eq!(median(&[]), 0.0);
    }
}
