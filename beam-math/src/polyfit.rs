//! Linear least-squares polynomial fitting
//!
//! Abscissae are centred on their mean before building the Vandermonde
//! matrix, which keeps the normal system well conditioned when x values are
//! large compared to their spread (axial positions far from the origin).

use nalgebra::{DMatrix, DVector};
use thiserror::Error;

/// Errors from polynomial fitting
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PolyfitError {
    #[error("x and y lengths differ: {x_len} vs {y_len}")]
    LengthMismatch { x_len: usize, y_len: usize },

    #[error("{points} points cannot determine a degree-{degree} polynomial")]
    Underdetermined { points: usize, degree: usize },

    #[error("least-squares solve failed: {0}")]
    SolveFailed(String),
}

/// Polynomial in powers of `(x - center)`, coefficients in ascending order.
#[derive(Debug, Clone, PartialEq)]
pub struct CenteredPolynomial {
    pub center: f64,
    pub coefficients: Vec<f64>,
}

impl CenteredPolynomial {
    /// Evaluate with Horner's scheme.
    pub fn eval(&self, x: f64) -> f64 {
        let t = x - self.center;
        self.coefficients
            .iter()
            .rev()
            .fold(0.0, |acc, &c| acc * t + c)
    }

    /// Coefficient of `(x - center)^power`, zero past the degree.
    pub fn coefficient(&self, power: usize) -> f64 {
        self.coefficients.get(power).copied().unwrap_or(0.0)
    }
}

/// Fit a polynomial of the given degree to `(x, y)` by linear least squares.
///
/// # Arguments
/// * `x` - Abscissae
/// * `y` - Ordinates, same length as `x`
/// * `degree` - Polynomial degree; needs at least `degree + 1` points
pub fn fit_polynomial(
    x: &[f64],
    y: &[f64],
    degree: usize,
) -> Result<CenteredPolynomial, PolyfitError> {
    if x.len() != y.len() {
        return Err(PolyfitError::LengthMismatch {
            x_len: x.len(),
            y_len: y.len(),
        });
    }
    if x.len() <= degree {
        return Err(PolyfitError::Underdetermined {
            points: x.len(),
            degree,
        });
    }

    let center = x.iter().sum::<f64>() / x.len() as f64;
    let vandermonde = DMatrix::from_fn(x.len(), degree + 1, |i, j| (x[i] - center).powi(j as i32));
    let rhs = DVector::from_column_slice(y);

    let svd = vandermonde.svd(true, true);
    let coefficients = svd
        .solve(&rhs, f64::EPSILON)
        .map_err(|e| PolyfitError::SolveFailed(e.to_string()))?;

    Ok(CenteredPolynomial {
        center,
        coefficients: coefficients.iter().copied().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_exact_quadratic() {
        let x: Vec<f64> = (0..7).map(|i| 100.0 + i as f64).collect();
        let y: Vec<f64> = x.iter().map(|x| 2.0 + 0.5 * (x - 103.0).powi(2)).collect();

        let poly = fit_polynomial(&x, &y, 2).unwrap();

        assert_relative_eq!(poly.center, 103.0, epsilon = 1e-12);
        assert_relative_eq!(poly.coefficient(0), 2.0, epsilon = 1e-9);
        assert_relative_eq!(poly.coefficient(1), 0.0, epsilon = 1e-9);
        assert_relative_eq!(poly.coefficient(2), 0.5, epsilon = 1e-9);
        assert_relative_eq!(poly.eval(110.0), 2.0 + 0.5 * 49.0, epsilon = 1e-8);
        assert_eq!(poly.coefficient(5), 0.0);
    }

    #[test]
    fn test_line_through_noisy_points() {
        let x = [0.0, 1.0, 2.0, 3.0];
        let y = [1.1, 2.9, 5.1, 6.9];

        let poly = fit_polynomial(&x, &y, 1).unwrap();

        // Slope from ordinary least squares
        assert_relative_eq!(poly.coefficient(1), 1.96, epsilon = 1e-9);
        assert_relative_eq!(poly.eval(1.5), 4.0, epsilon = 1e-9);
    }

    #[test]
    fn test_underdetermined() {
        let result = fit_polynomial(&[0.0, 1.0], &[0.0, 1.0], 2);
        assert_eq!(
            result,
            Err(PolyfitError::Underdetermined {
                points: 2,
                degree: 2
            })
        );
    }

    #[test]
    fn test_length_mismatch() {
        let result = fit_polynomial(&[0.0, 1.0, 2.0], &[0.0, 1.0], 1);
        assert!(matches!(result, Err(PolyfitError::LengthMismatch { .. })));
    }
}
