//! Levenberg-Marquardt nonlinear least squares
//!
//! Minimizes `Σ r_i(p)²` for a problem that supplies its residual vector and
//! Jacobian. Damping follows Marquardt's scaling by the diagonal of `JᵀJ`, so
//! parameters with very different magnitudes (millimetre waists next to
//! metre-scale positions) share one tolerance.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced by the least-squares solver
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LeastSquaresError {
    #[error("residual/jacobian dimension mismatch: expected {expected_rows}x{expected_cols}, got {rows}x{cols}")]
    DimensionMismatch {
        expected_rows: usize,
        expected_cols: usize,
        rows: usize,
        cols: usize,
    },

    #[error("problem has {observations} observations for {params} parameters")]
    Underdetermined { observations: usize, params: usize },

    #[error("non-finite residuals or jacobian at iteration {iteration}")]
    NonFinite { iteration: usize },

    #[error("did not converge within {iterations} iterations (cost {cost:.6e})")]
    NotConverged { iterations: usize, cost: f64 },
}

/// A residual model that can be minimized with [`levenberg_marquardt`].
pub trait LeastSquaresProblem {
    /// Number of observations (rows of the residual vector)
    fn num_observations(&self) -> usize;

    /// Residual vector `r(p)`
    fn residuals(&self, params: &DVector<f64>) -> DVector<f64>;

    /// Jacobian `∂r/∂p`, one row per observation
    fn jacobian(&self, params: &DVector<f64>) -> DMatrix<f64>;
}

/// Solver settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LmConfig {
    /// Maximum number of outer iterations (accepted or rejected steps)
    pub max_iterations: usize,
    /// Relative step tolerance: stop when `‖Dδ‖ <= xtol·(‖Dp‖ + xtol)`
    pub xtol: f64,
    /// Relative cost tolerance: stop when an accepted step reduces the cost by
    /// less than `ftol·cost`
    pub ftol: f64,
    /// Initial damping factor
    pub initial_lambda: f64,
    /// Damping multiplier after a rejected step
    pub lambda_up: f64,
    /// Damping multiplier after an accepted step
    pub lambda_down: f64,
}

impl Default for LmConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            xtol: 1e-10,
            ftol: 1e-12,
            initial_lambda: 1e-3,
            lambda_up: 10.0,
            lambda_down: 0.1,
        }
    }
}

/// Converged solution
#[derive(Debug, Clone)]
pub struct LmSolution {
    /// Parameter vector at the minimum
    pub params: DVector<f64>,
    /// Residuals at the minimum
    pub residuals: DVector<f64>,
    /// Sum of squared residuals
    pub cost: f64,
    /// `JᵀJ` evaluated at the minimum (undamped)
    pub jtj: DMatrix<f64>,
    /// Iterations used
    pub iterations: usize,
}

impl LmSolution {
    /// Parameter covariance `s²·(JᵀJ)⁻¹` with `s² = cost / (n - p)`.
    ///
    /// Returns `None` when there are no degrees of freedom left or `JᵀJ` is
    /// singular.
    pub fn covariance(&self) -> Option<DMatrix<f64>> {
        let n = self.residuals.len();
        let p = self.params.len();
        if n <= p {
            return None;
        }
        let s2 = self.cost / (n - p) as f64;
        let inverse = self.jtj.clone().try_inverse()?;
        Some(inverse * s2)
    }
}

fn sum_of_squares(r: &DVector<f64>) -> f64 {
    r.iter().map(|v| v * v).sum()
}

fn check_dimensions(
    residuals: &DVector<f64>,
    jacobian: &DMatrix<f64>,
    n: usize,
    p: usize,
) -> Result<(), LeastSquaresError> {
    if residuals.len() != n || jacobian.nrows() != n || jacobian.ncols() != p {
        return Err(LeastSquaresError::DimensionMismatch {
            expected_rows: n,
            expected_cols: p,
            rows: jacobian.nrows(),
            cols: jacobian.ncols(),
        });
    }
    Ok(())
}

/// Minimize a least-squares problem starting from `initial`.
///
/// # Errors
/// * `Underdetermined` - fewer observations than parameters
/// * `NonFinite` - the model produced NaN/inf
/// * `NotConverged` - `max_iterations` exhausted before a stopping criterion held
pub fn levenberg_marquardt<P: LeastSquaresProblem>(
    problem: &P,
    initial: DVector<f64>,
    config: &LmConfig,
) -> Result<LmSolution, LeastSquaresError> {
    let n = problem.num_observations();
    let p = initial.len();
    if n < p {
        return Err(LeastSquaresError::Underdetermined {
            observations: n,
            params: p,
        });
    }

    let mut params = initial;
    let mut residuals = problem.residuals(&params);
    let mut jacobian = problem.jacobian(&params);
    check_dimensions(&residuals, &jacobian, n, p)?;
    let mut cost = sum_of_squares(&residuals);
    let mut lambda = config.initial_lambda;

    for iteration in 1..=config.max_iterations {
        if !cost.is_finite() || jacobian.iter().any(|v| !v.is_finite()) {
            return Err(LeastSquaresError::NonFinite { iteration });
        }

        let jtj = jacobian.transpose() * &jacobian;
        if cost == 0.0 {
            log::debug!("LM exact fit at iteration {iteration}");
            return Ok(LmSolution {
                params,
                residuals,
                cost,
                jtj,
                iterations: iteration,
            });
        }
        let gradient = jacobian.transpose() * &residuals;

        let max_diag = jtj.diagonal().iter().copied().fold(0.0_f64, f64::max);
        let scale = jtj
            .diagonal()
            .map(|d| d.max(max_diag * 1e-15).max(f64::MIN_POSITIVE));

        let mut damped = jtj.clone();
        for i in 0..p {
            damped[(i, i)] += lambda * scale[i];
        }

        let step = damped.cholesky().map(|chol| -chol.solve(&gradient));
        let Some(step) = step else {
            lambda *= config.lambda_up;
            continue;
        };

        let scaled_step = step.component_mul(&scale.map(f64::sqrt)).norm();
        let scaled_params = params.component_mul(&scale.map(f64::sqrt)).norm();
        let small_step = scaled_step <= config.xtol * (scaled_params + config.xtol);

        let candidate = &params + &step;
        let candidate_residuals = problem.residuals(&candidate);
        let candidate_cost = sum_of_squares(&candidate_residuals);

        if candidate_cost.is_finite() && candidate_cost < cost {
            let reduction = cost - candidate_cost;
            params = candidate;
            residuals = candidate_residuals;
            jacobian = problem.jacobian(&params);
            check_dimensions(&residuals, &jacobian, n, p)?;
            let previous = cost;
            cost = candidate_cost;
            lambda *= config.lambda_down;

            log::debug!(
                "LM iteration {iteration}: accepted, cost {previous:.6e} -> {cost:.6e}, lambda {lambda:.3e}"
            );

            if small_step || reduction <= config.ftol * previous {
                let jtj = jacobian.transpose() * &jacobian;
                return Ok(LmSolution {
                    params,
                    residuals,
                    cost,
                    jtj,
                    iterations: iteration,
                });
            }
        } else {
            lambda *= config.lambda_up;
            log::debug!("LM iteration {iteration}: rejected, lambda {lambda:.3e}");

            // Even a vanishing step cannot lower the cost: stationary point
            if small_step {
                return Ok(LmSolution {
                    params,
                    residuals,
                    cost,
                    jtj,
                    iterations: iteration,
                });
            }
        }
    }

    Err(LeastSquaresError::NotConverged {
        iterations: config.max_iterations,
        cost,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::{rngs::StdRng, SeedableRng};
    use rand_distr::{Distribution, Normal};

    /// y = a·exp(-b·x)
    struct ExpDecay {
        x: Vec<f64>,
        y: Vec<f64>,
    }

    impl LeastSquaresProblem for ExpDecay {
        fn num_observations(&self) -> usize {
            self.x.len()
        }

        fn residuals(&self, p: &DVector<f64>) -> DVector<f64> {
            DVector::from_iterator(
                self.x.len(),
                self.x
                    .iter()
                    .zip(&self.y)
                    .map(|(x, y)| p[0] * (-p[1] * x).exp() - y),
            )
        }

        fn jacobian(&self, p: &DVector<f64>) -> DMatrix<f64> {
            DMatrix::from_fn(self.x.len(), 2, |i, j| {
                let e = (-p[1] * self.x[i]).exp();
                match j {
                    0 => e,
                    _ => -p[0] * self.x[i] * e,
                }
            })
        }
    }

    fn decay_data(a: f64, b: f64, noise: f64, seed: u64) -> ExpDecay {
        let mut rng = StdRng::seed_from_u64(seed);
        let normal = Normal::new(0.0, noise.max(f64::MIN_POSITIVE)).unwrap();
        let x: Vec<f64> = (0..30).map(|i| i as f64 * 0.1).collect();
        let y = x
            .iter()
            .map(|x| a * (-b * x).exp() + if noise > 0.0 { normal.sample(&mut rng) } else { 0.0 })
            .collect();
        ExpDecay { x, y }
    }

    #[test]
    fn test_recovers_exact_parameters() {
        let problem = decay_data(5.0, 1.3, 0.0, 0);
        let solution =
            levenberg_marquardt(&problem, DVector::from_vec(vec![1.0, 0.5]), &LmConfig::default())
                .unwrap();

        assert_relative_eq!(solution.params[0], 5.0, epsilon = 1e-6);
        assert_relative_eq!(solution.params[1], 1.3, epsilon = 1e-6);
        assert!(solution.cost < 1e-12);
    }

    #[test]
    fn test_noisy_fit_and_covariance() {
        let problem = decay_data(5.0, 1.3, 0.01, 7);
        let solution =
            levenberg_marquardt(&problem, DVector::from_vec(vec![4.0, 1.0]), &LmConfig::default())
                .unwrap();

        assert_relative_eq!(solution.params[0], 5.0, epsilon = 0.05);
        assert_relative_eq!(solution.params[1], 1.3, epsilon = 0.05);

        let cov = solution.covariance().unwrap();
        assert_eq!(cov.shape(), (2, 2));
        assert!(cov[(0, 0)] > 0.0 && cov[(1, 1)] > 0.0);
        // Standard errors should be small but non-zero for 1% noise
        assert!(cov[(0, 0)].sqrt() < 0.05);
    }

    #[test]
    fn test_starting_at_minimum_returns_immediately() {
        let problem = decay_data(2.0, 0.7, 0.0, 0);
        let solution =
            levenberg_marquardt(&problem, DVector::from_vec(vec![2.0, 0.7]), &LmConfig::default())
                .unwrap();

        assert!(solution.iterations <= 2);
        assert_relative_eq!(solution.params[0], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_iteration_cap_reports_not_converged() {
        let problem = decay_data(5.0, 1.3, 0.01, 3);
        let config = LmConfig {
            max_iterations: 1,
            ..Default::default()
        };
        let result = levenberg_marquardt(&problem, DVector::from_vec(vec![0.1, 5.0]), &config);

        assert!(matches!(
            result,
            Err(LeastSquaresError::NotConverged { iterations: 1, .. })
        ));
    }

    #[test]
    fn test_underdetermined() {
        let problem = ExpDecay {
            x: vec![0.0],
            y: vec![1.0],
        };
        let result =
            levenberg_marquardt(&problem, DVector::from_vec(vec![1.0, 1.0]), &LmConfig::default());

        assert!(matches!(
            result,
            Err(LeastSquaresError::Underdetermined {
                observations: 1,
                params: 2
            })
        ));
    }

    #[test]
    fn test_no_covariance_without_degrees_of_freedom() {
        let problem = ExpDecay {
            x: vec![0.0, 1.0],
            y: vec![2.0, 2.0 * (-0.5f64).exp()],
        };
        let solution =
            levenberg_marquardt(&problem, DVector::from_vec(vec![1.0, 1.0]), &LmConfig::default())
                .unwrap();

        assert!(solution.covariance().is_none());
    }
}
