//! M² beam quality from a through-focus diameter series (ISO 11146-1).
//!
//! Fits the hyperbolic caustic `d(z)² = d0² + Θ²·(z - z0)²` to measured
//! diameters. Residuals are taken in `d²`, where the model is a quadratic in
//! `z`, which also gives a closed-form starting point: a linear quadratic
//! fit of `d²` against `z`. Levenberg-Marquardt then refines `(d0, z0, Θ)`.
//!
//! All lengths share one unit, the wavelength's included.

use beam_math::{
    fit_polynomial, levenberg_marquardt, LeastSquaresError, LeastSquaresProblem, LmSolution,
};
use nalgebra::{DMatrix, DVector, Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use super::model::{beam_parameter_product, caustic_diameter_squared, rayleigh_range};
use crate::config::M2FitConfig;
use crate::error::{FitError, FitWarning};

/// Fewest distinct axial positions that determine the three caustic parameters
pub const MIN_DISTINCT_POSITIONS: usize = 3;

/// One measured diameter at axial position `z`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PropagationSample {
    pub z: f64,
    pub diameter: f64,
}

/// Pair up positions and diameters.
///
/// # Errors
/// `InvalidSample` when the slices differ in length.
pub fn samples_from(z: &[f64], diameters: &[f64]) -> Result<Vec<PropagationSample>, FitError> {
    if z.len() != diameters.len() {
        return Err(FitError::InvalidSample(format!(
            "{} positions but {} diameters",
            z.len(),
            diameters.len()
        )));
    }
    Ok(z.iter()
        .zip(diameters)
        .map(|(&z, &diameter)| PropagationSample { z, diameter })
        .collect())
}

/// Fitted beam caustic.
///
/// Satisfies `m2 = π·w0·theta/λ` and `z_rayleigh = π·w0²/(m2·λ)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct M2FitResult {
    /// Waist radius
    pub w0: f64,
    /// Waist position
    pub z0: f64,
    /// Far-field divergence half-angle (radians)
    pub theta: f64,
    pub z_rayleigh: f64,
    pub m2: f64,
    pub wavelength: f64,
}

impl M2FitResult {
    pub fn waist_diameter(&self) -> f64 {
        2.0 * self.w0
    }

    /// Full divergence angle Θ
    pub fn full_divergence(&self) -> f64 {
        2.0 * self.theta
    }

    pub fn beam_parameter_product(&self) -> f64 {
        beam_parameter_product(self.w0, self.theta)
    }
}

/// Parameter covariance and propagated one-sigma standard errors.
///
/// Covariance rows/columns are `(d0, z0, Θ)`; those of a parameter held
/// fixed are zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitUncertainty {
    pub covariance: Matrix3<f64>,
    pub d0: f64,
    pub z0: f64,
    pub divergence: f64,
    pub w0: f64,
    pub theta: f64,
    pub m2: f64,
    pub z_rayleigh: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitDiagnostics {
    /// Residual sum of squares in `d²` units
    pub rss: f64,
    pub iterations: usize,
    /// Observations minus fitted parameters
    pub dof: usize,
    /// `None` without spare degrees of freedom or with a singular fit
    pub uncertainty: Option<FitUncertainty>,
    pub warnings: Vec<FitWarning>,
    /// Samples within one Rayleigh range of the waist
    pub near_waist: usize,
    /// Samples beyond two Rayleigh ranges from the waist
    pub far_field: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct M2Fit {
    pub result: M2FitResult,
    pub diagnostics: FitDiagnostics,
}

/// Independent fits of the two transverse axes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct M2FitXY {
    pub x: M2Fit,
    pub y: M2Fit,
}

/// Caustic model in `d²` with optionally held parameters.
struct CausticProblem {
    z: Vec<f64>,
    d2: Vec<f64>,
    fixed_d0: Option<f64>,
    fixed_z0: Option<f64>,
}

impl CausticProblem {
    /// Indices into `(d0, z0, Θ)` of the parameters being fitted
    fn free(&self) -> Vec<usize> {
        let mut free = Vec::with_capacity(3);
        if self.fixed_d0.is_none() {
            free.push(0);
        }
        if self.fixed_z0.is_none() {
            free.push(1);
        }
        free.push(2);
        free
    }

    fn unpack(&self, params: &DVector<f64>) -> Vector3<f64> {
        let mut full = Vector3::new(
            self.fixed_d0.unwrap_or(0.0),
            self.fixed_z0.unwrap_or(0.0),
            0.0,
        );
        for (k, &i) in self.free().iter().enumerate() {
            full[i] = params[k];
        }
        full
    }

    fn pack(&self, full: &Vector3<f64>) -> DVector<f64> {
        DVector::from_iterator(self.free().len(), self.free().iter().map(|&i| full[i]))
    }
}

impl LeastSquaresProblem for CausticProblem {
    fn num_observations(&self) -> usize {
        self.z.len()
    }

    fn residuals(&self, params: &DVector<f64>) -> DVector<f64> {
        let p = self.unpack(params);
        DVector::from_iterator(
            self.z.len(),
            self.z
                .iter()
                .zip(&self.d2)
                .map(|(&z, &d2)| caustic_diameter_squared(z, p[0], p[1], p[2]) - d2),
        )
    }

    fn jacobian(&self, params: &DVector<f64>) -> DMatrix<f64> {
        let p = self.unpack(params);
        let (d0, z0, divergence) = (p[0], p[1], p[2]);
        let free = self.free();
        DMatrix::from_fn(self.z.len(), free.len(), |row, col| {
            let dz = self.z[row] - z0;
            match free[col] {
                0 => 2.0 * d0,
                1 => -2.0 * divergence * divergence * dz,
                _ => 2.0 * divergence * dz * dz,
            }
        })
    }
}

/// Fit the caustic of one transverse axis.
///
/// # Arguments
/// * `samples` - Diameters measured through focus
/// * `wavelength` - Vacuum wavelength, same unit as `z` and the diameters
/// * `config` - Solver settings and optionally held parameters
///
/// # Errors
/// * `InvalidWavelength` / `InvalidSample` / `InvalidConfig` - bad input
/// * `InsufficientData` - fewer than three distinct positions
/// * `FitConvergence` - the solver gave up; no partial result
/// * `NonPhysicalWaist` - the fitted waist collapsed to zero
pub fn fit_m2(
    samples: &[PropagationSample],
    wavelength: f64,
    config: &M2FitConfig,
) -> Result<M2Fit, FitError> {
    if !(wavelength.is_finite() && wavelength > 0.0) {
        return Err(FitError::InvalidWavelength(wavelength));
    }
    config.validate()?;
    validate_samples(samples)?;

    let distinct = count_distinct(samples.iter().map(|s| s.z).collect());
    if distinct < MIN_DISTINCT_POSITIONS {
        return Err(FitError::InsufficientData {
            distinct,
            required: MIN_DISTINCT_POSITIONS,
        });
    }

    let problem = CausticProblem {
        z: samples.iter().map(|s| s.z).collect(),
        d2: samples.iter().map(|s| s.diameter * s.diameter).collect(),
        fixed_d0: config.fixed_waist_diameter,
        fixed_z0: config.fixed_waist_position,
    };

    let mut guess = initial_guess(samples);
    if let Some(d0) = config.fixed_waist_diameter {
        guess[0] = d0;
    }
    if let Some(z0) = config.fixed_waist_position {
        guess[1] = z0;
    }
    log::debug!(
        "M² initial guess: d0 {:.6e}, z0 {:.6e}, divergence {:.6e}",
        guess[0],
        guess[1],
        guess[2]
    );

    let solution = levenberg_marquardt(&problem, problem.pack(&guess), &config.solver_config())
        .map_err(convergence_error)?;

    let fitted = problem.unpack(&solution.params);
    let d0 = fitted[0].abs();
    let z0 = fitted[1];
    let divergence = fitted[2].abs();

    let scale = samples.iter().fold(0.0_f64, |acc, s| acc.max(s.diameter));
    if d0 <= f64::EPSILON * scale.max(f64::MIN_POSITIVE) {
        return Err(FitError::NonPhysicalWaist { d0 });
    }

    let w0 = 0.5 * d0;
    let theta = 0.5 * divergence;
    let m2 = PI * d0 * divergence / (4.0 * wavelength);
    let result = M2FitResult {
        w0,
        z0,
        theta,
        z_rayleigh: rayleigh_range(w0, m2, wavelength),
        m2,
        wavelength,
    };

    let mut warnings = Vec::new();
    if m2 < 1.0 {
        let warning = FitWarning::PhysicallyInvalid { m2 };
        log::warn!("{warning}");
        warnings.push(warning);
    }

    let (near_waist, far_field) = iso_sample_counts(samples, &result);
    let required = config.iso_samples_per_region;
    if required > 0 && (near_waist < required || far_field < required) {
        let warning = FitWarning::IsoSampling {
            near_waist,
            far_field,
            required,
        };
        log::warn!("{warning}");
        warnings.push(warning);
    }

    let free = problem.free();
    let uncertainty = propagate_uncertainty(&solution, &free, d0, divergence, wavelength);

    log::info!(
        "M² fit: w0 {:.4e}, z0 {:.4e}, theta {:.4e}, M² {:.4} after {} iterations",
        result.w0,
        result.z0,
        result.theta,
        result.m2,
        solution.iterations
    );

    Ok(M2Fit {
        result,
        diagnostics: FitDiagnostics {
            rss: solution.cost,
            iterations: solution.iterations,
            dof: samples.len() - free.len(),
            uncertainty,
            warnings,
            near_waist,
            far_field,
        },
    })
}

/// Fit both transverse axes from diameters measured at the same positions.
pub fn fit_m2_axes(
    z: &[f64],
    dx: &[f64],
    dy: &[f64],
    wavelength: f64,
    config: &M2FitConfig,
) -> Result<M2FitXY, FitError> {
    let x = fit_m2(&samples_from(z, dx)?, wavelength, config)?;
    let y = fit_m2(&samples_from(z, dy)?, wavelength, config)?;
    Ok(M2FitXY { x, y })
}

fn validate_samples(samples: &[PropagationSample]) -> Result<(), FitError> {
    for (i, sample) in samples.iter().enumerate() {
        if !sample.z.is_finite() {
            return Err(FitError::InvalidSample(format!(
                "sample {i}: position {} is not finite",
                sample.z
            )));
        }
        if !(sample.diameter.is_finite() && sample.diameter >= 0.0) {
            return Err(FitError::InvalidSample(format!(
                "sample {i}: diameter {} is not a finite non-negative value",
                sample.diameter
            )));
        }
    }
    Ok(())
}

fn count_distinct(mut z: Vec<f64>) -> usize {
    z.sort_by(|a, b| a.total_cmp(b));
    z.dedup();
    z.len()
}

/// `(d0, z0, Θ)` from a quadratic fit of `d²` against `z`.
///
/// A quadratic opening downwards or with a negative vertex has no caustic
/// reading; the smallest sample then stands in for the waist.
fn initial_guess(samples: &[PropagationSample]) -> Vector3<f64> {
    let z: Vec<f64> = samples.iter().map(|s| s.z).collect();
    let d2: Vec<f64> = samples.iter().map(|s| s.diameter * s.diameter).collect();

    if let Ok(poly) = fit_polynomial(&z, &d2, 2) {
        let alpha = poly.coefficient(0);
        let beta = poly.coefficient(1);
        let gamma = poly.coefficient(2);
        if gamma > 0.0 {
            let d0_sq = alpha - beta * beta / (4.0 * gamma);
            if d0_sq > 0.0 {
                let z0 = poly.center - beta / (2.0 * gamma);
                return Vector3::new(d0_sq.sqrt(), z0, gamma.sqrt());
            }
        }
    }

    log::debug!("quadratic start rejected, seeding from the narrowest sample");
    let waist = samples
        .iter()
        .min_by(|a, b| a.diameter.total_cmp(&b.diameter))
        .copied()
        .unwrap_or(PropagationSample {
            z: 0.0,
            diameter: 0.0,
        });
    let divergence = samples
        .iter()
        .filter(|s| s.z != waist.z)
        .map(|s| {
            let growth = (s.diameter * s.diameter - waist.diameter * waist.diameter).max(0.0);
            growth.sqrt() / (s.z - waist.z).abs()
        })
        .fold(0.0_f64, f64::max);
    Vector3::new(waist.diameter, waist.z, divergence)
}

fn convergence_error(error: LeastSquaresError) -> FitError {
    let iterations = match error {
        LeastSquaresError::NotConverged { iterations, .. } => iterations,
        LeastSquaresError::NonFinite { iteration } => iteration,
        _ => 0,
    };
    FitError::FitConvergence {
        iterations,
        reason: error.to_string(),
    }
}

fn iso_sample_counts(samples: &[PropagationSample], result: &M2FitResult) -> (usize, usize) {
    let zr = result.z_rayleigh;
    let near = samples
        .iter()
        .filter(|s| (s.z - result.z0).abs() <= zr)
        .count();
    let far = samples
        .iter()
        .filter(|s| (s.z - result.z0).abs() >= 2.0 * zr)
        .count();
    (near, far)
}

/// Expand the free-parameter covariance to `(d0, z0, Θ)` and carry it
/// through to the derived quantities by first-order propagation.
fn propagate_uncertainty(
    solution: &LmSolution,
    free: &[usize],
    d0: f64,
    divergence: f64,
    wavelength: f64,
) -> Option<FitUncertainty> {
    let reduced = solution.covariance()?;
    let mut covariance = Matrix3::zeros();
    for (a, &i) in free.iter().enumerate() {
        for (b, &j) in free.iter().enumerate() {
            covariance[(i, j)] = reduced[(a, b)];
        }
    }

    let sigma = |gradient: Vector3<f64>| gradient.dot(&(covariance * gradient)).max(0.0).sqrt();
    let k = PI / (4.0 * wavelength);
    let m2_gradient = Vector3::new(k * divergence, 0.0, k * d0);
    let zr_gradient = Vector3::new(1.0 / divergence, 0.0, -d0 / (divergence * divergence));

    let sd = |i: usize| covariance[(i, i)].max(0.0).sqrt();
    Some(FitUncertainty {
        covariance,
        d0: sd(0),
        z0: sd(1),
        divergence: sd(2),
        w0: 0.5 * sd(0),
        theta: 0.5 * sd(2),
        m2: sigma(m2_gradient),
        z_rayleigh: sigma(zr_gradient),
    })
}
