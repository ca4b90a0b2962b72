//! Numeric helpers shared by the attempt extractor and the set aggregator.
//!
//! Every value that leaves these helpers is finite; `clamp` folds NaN to 0 so
//! that a degenerate division never surfaces as an error.

/// Restricts `value` to `[0, 1]`; NaN maps to 0.
pub fn clamp(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

pub fn population_std_dev(values: &[f64]) -> Option<f64> {
    let avg = mean(values)?;
    let variance = values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / values.len() as f64;
    Some(variance.sqrt())
}

/// Coefficient of variation (population std-dev / mean), clamped.
/// Empty input or a zero mean yields 0.
pub fn variation(values: &[f64]) -> f64 {
    let Some(avg) = mean(values) else {
        return 0.0;
    };
    if avg == 0.0 {
        return 0.0;
    }
    let std_dev = population_std_dev(values).unwrap_or(0.0);
    clamp(std_dev / avg)
}

/// Gaps between consecutive entries of an already sorted series.
pub fn consecutive_gaps(sorted: &[i64]) -> Vec<f64> {
    sorted.windows(2).map(|w| (w[1] - w[0]) as f64).collect()
}
