use super::error::{EngineError, EngineResult};

/// Converts a raw score into a 0-100 percentage.
///
/// Bonus points above `max_score` are capped at 100 rather than extrapolated, so extra credit
/// can lift an assessment to full marks but never past it.
pub fn normalize(raw_score: f64, max_score: f64) -> EngineResult<f64> {
    if !raw_score.is_finite() || !max_score.is_finite() {
        return Err(EngineError::InvalidScore {
            raw_score,
            max_score,
            reason: "scores must be finite numbers",
        });
    }
    if max_score <= 0.0 {
        return Err(EngineError::InvalidScore {
            raw_score,
            max_score,
            reason: "max score must be greater than zero",
        });
    }
    if raw_score < 0.0 {
        return Err(EngineError::InvalidScore {
            raw_score,
            max_score,
            reason: "raw score must not be negative",
        });
    }
    Ok((raw_score / max_score * 100.0).clamp(0.0, 100.0))
}

/// Half-away-from-zero rounding to two decimals, the precision averages are reported and
/// compared at.
pub fn round_2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Integer key for comparing percentages at two decimals without float equality.
pub(crate) fn hundredths(x: f64) -> i64 {
    (x * 100.0).round() as i64
}

/// Sums in ascending order so the result does not depend on input order.
pub(crate) fn stable_mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let sum: f64 = sorted.iter().sum();
    Some(sum / sorted.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_marks_is_one_hundred() {
        for max in [1.0, 7.5, 20.0, 100.0, 250.0] {
            assert_eq!(normalize(max, max).expect("normalize"), 100.0);
        }
    }

    #[test]
    fn stays_within_bounds() {
        let cases = [(0.0, 10.0), (3.3, 10.0), (18.0, 20.0), (0.001, 1000.0), (99.0, 99.5)];
        for (raw, max) in cases {
            let p = normalize(raw, max).expect("normalize");
            assert!((0.0..=100.0).contains(&p), "{} out of range", p);
        }
        assert_eq!(normalize(18.0, 20.0).expect("normalize"), 90.0);
    }

    #[test]
    fn bonus_points_are_capped() {
        assert_eq!(normalize(24.0, 20.0).expect("normalize"), 100.0);
    }

    #[test]
    fn rejects_non_positive_max_and_negative_raw() {
        assert!(matches!(
            normalize(5.0, 0.0),
            Err(EngineError::InvalidScore { .. })
        ));
        assert!(matches!(
            normalize(5.0, -10.0),
            Err(EngineError::InvalidScore { .. })
        ));
        assert!(matches!(
            normalize(-1.0, 10.0),
            Err(EngineError::InvalidScore { .. })
        ));
        assert!(matches!(
            normalize(f64::NAN, 10.0),
            Err(EngineError::InvalidScore { .. })
        ));
    }

    #[test]
    fn rounding_and_means() {
        assert_eq!(round_2(85.0), 85.0);
        assert_eq!(round_2(66.666_666), 66.67);
        assert_eq!(hundredths(92.5), 9250);
        assert_eq!(hundredths(92.499_999_9), 9250);
        assert_eq!(stable_mean(&[]), None);
        assert_eq!(stable_mean(&[80.0, 90.0]), Some(85.0));
    }
}
