//! Statistical functions for background estimation

use thiserror::Error;

/// Error when a statistic has no valid input to work with
#[derive(Error, Debug, Clone, PartialEq)]
#[error("insufficient data: {total} values, {valid} finite")]
pub struct InsufficientDataError {
    pub total: usize,
    pub valid: usize,
}

/// Mean and population standard deviation of the finite values in a sample.
///
/// NaN and infinite values are skipped. Uses a two-pass computation so the
/// variance is never negative.
///
/// # Returns
/// * `Ok((mean, std_dev))`
/// * `Err(InsufficientDataError)` - if no finite values remain
pub fn mean_and_std(values: &[f64]) -> Result<(f64, f64), InsufficientDataError> {
    let finite = || values.iter().copied().filter(|v| v.is_finite());
    let count = finite().count();

    if count == 0 {
        return Err(InsufficientDataError {
            total: values.len(),
            valid: 0,
        });
    }

    let mean = finite().sum::<f64>() / count as f64;
    let variance = finite().map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;

    Ok((mean, variance.sqrt()))
}

/// Calculate median of a slice of f64 values
///
/// NaN values are filtered out; infinities are kept. For even-length data,
/// returns the average of the two middle values.
pub fn median(values: &[f64]) -> Result<f64, InsufficientDataError> {
    let mut valid_values: Vec<f64> = values.iter().filter(|v| !v.is_nan()).copied().collect();

    if valid_values.is_empty() {
        return Err(InsufficientDataError {
            total: values.len(),
            valid: 0,
        });
    }

    valid_values.sort_by(|a, b| a.total_cmp(b));
    let mid = valid_values.len() / 2;
    if valid_values.len() % 2 == 0 {
        Ok(0.5 * (valid_values[mid - 1] + valid_values[mid]))
    } else {
        Ok(valid_values[mid])
    }
}
