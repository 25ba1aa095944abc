use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::image_proc::PixelRegion;

/// Fatal errors of a single-image measurement.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MeasurementError {
    /// The measured region carries no usable signal (black frame, empty mask).
    #[error("degenerate input: total intensity {total:.3e} over {pixels} pixels")]
    DegenerateInput {
        /// Summed intensity over the region
        total: f64,
        /// Number of pixels that contributed
        pixels: usize,
    },

    /// Crop region is empty or falls outside the image.
    #[error("region {region} does not fit a {rows}x{cols} image")]
    InvalidRegion {
        region: PixelRegion,
        rows: usize,
        cols: usize,
    },

    /// Two arrays that must share a shape do not.
    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },

    /// Configuration validation failure.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Non-fatal conditions raised while measuring; the result is still usable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MeasurementWarning {
    /// The elliptical mask enclosed (almost) no intensity; the previous
    /// estimate was kept.
    MaskCollapse {
        iteration: usize,
        mask_total: f64,
    },

    /// Iteration cap reached before the estimate settled.
    Convergence {
        iterations: usize,
        last_change: f64,
    },

    /// Covariance was not positive semi-definite; the negative variance was
    /// clamped to zero.
    NumericInstability { variance: f64 },
}

impl fmt::Display for MeasurementWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MaskCollapse {
                iteration,
                mask_total,
            } => write!(
                f,
                "mask collapsed at iteration {iteration} (enclosed intensity {mask_total:.3e})"
            ),
            Self::Convergence {
                iterations,
                last_change,
            } => write!(
                f,
                "no convergence after {iterations} iterations (last relative change {last_change:.3e})"
            ),
            Self::NumericInstability { variance } => {
                write!(f, "negative variance {variance:.3e} clamped to zero")
            }
        }
    }
}

/// Fatal errors of an M² fit. No partial result accompanies any of them.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FitError {
    /// Fewer distinct axial positions than the model needs.
    #[error("insufficient data: {distinct} distinct z positions, need at least {required}")]
    InsufficientData { distinct: usize, required: usize },

    /// Optimizer did not settle within its iteration budget or diverged.
    #[error("fit did not converge after {iterations} iterations: {reason}")]
    FitConvergence { iterations: usize, reason: String },

    /// Wavelength must be finite and positive.
    #[error("invalid wavelength {0}")]
    InvalidWavelength(f64),

    /// A sample has a non-finite position or a non-finite/negative diameter,
    /// or input slices have mismatched lengths.
    #[error("invalid sample: {0}")]
    InvalidSample(String),

    /// Fitted waist collapsed to zero; divergence and Rayleigh range are
    /// undefined.
    #[error("fitted waist diameter {d0:.3e} is not positive")]
    NonPhysicalWaist { d0: f64 },

    /// Configuration validation failure.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Non-fatal findings attached to an accepted fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FitWarning {
    /// M² below the diffraction limit of 1; the caller decides whether to reject.
    PhysicallyInvalid { m2: f64 },

    /// Sampling does not follow the ISO 11146 layout (enough points within one
    /// Rayleigh range of the waist and beyond two Rayleigh ranges).
    IsoSampling {
        near_waist: usize,
        far_field: usize,
        required: usize,
    },
}

impl fmt::Display for FitWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PhysicallyInvalid { m2 } => write!(f, "M² = {m2:.4} is below 1"),
            Self::IsoSampling {
                near_waist,
                far_field,
                required,
            } => write!(
                f,
                "{near_waist} samples within zR and {far_field} beyond 2·zR, ISO 11146 asks for {required} of each"
            ),
        }
    }
}
