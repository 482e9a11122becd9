/// Percentile of an ascending slice using linear interpolation between ranks.
///
/// `p` is a fraction in `[0, 1]`. Returns `None` for an empty slice.
pub fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    let last = sorted.len().checked_sub(1)?;

    #[allow(clippy::cast_precision_loss)]
    let rank = p.clamp(0.0, 1.0) * last as f64;

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let (lower, upper) = (rank.floor() as usize, rank.ceil() as usize);

    #[allow(clippy::cast_precision_loss)]
    let fraction = rank - lower as f64;

    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * fraction)
}

/// Mean of the values, summed in slice order.
#[allow(clippy::cast_precision_loss)]
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// `numerator / denominator`, absent when nothing was counted.
#[allow(clippy::cast_precision_loss)]
pub fn ratio(numerator: usize, denominator: usize) -> Option<f64> {
    (denominator > 0).then(|| numerator as f64 / denominator as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentile_interpolates_between_ranks() {
        let values = [10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 70.0, 80.0, 90.0, 100.0];

        assert_eq!(percentile(&values, 0.5), Some(55.0));
        assert!((percentile(&values, 0.9).unwrap() - 91.0).abs() < 1e-9);
        assert!((percentile(&values, 0.99).unwrap() - 99.1).abs() < 1e-9);
        assert_eq!(percentile(&values, 0.0), Some(10.0));
        assert_eq!(percentile(&values, 1.0), Some(100.0));
    }

    #[test]
    fn test_percentile_single_value() {
        assert_eq!(percentile(&[42.0], 0.5), Some(42.0));
        assert_eq!(percentile(&[42.0], 0.99), Some(42.0));
    }

    #[test]
    fn test_percentile_empty_is_none() {
        assert_eq!(percentile(&[], 0.5), None);
        assert_eq!(mean(&[]), None);
    }

    #[test]
    fn test_percentiles_are_monotonic() {
        let mut values: Vec<f64> = (0..37u32).map(|i| f64::from((i * 7919) % 101)).collect();
        values.sort_by(f64::total_cmp);

        let p50 = percentile(&values, 0.5).unwrap();
        let p90 = percentile(&values, 0.9).unwrap();
        let p99 = percentile(&values, 0.99).unwrap();
        assert!(p50 <= p90 && p90 <= p99);
    }

    #[test]
    fn test_ratio_with_empty_denominator() {
        assert_eq!(ratio(0, 0), None);
        assert_eq!(ratio(3, 4), Some(0.75));
    }
}
