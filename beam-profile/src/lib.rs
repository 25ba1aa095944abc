//! beam-profile - Laser beam characterization from camera images
//!
//! Measures beam centroid, D4σ diameters and orientation from 2D intensity
//! images following ISO 11146, and estimates the beam quality factor M² from
//! a series of diameters measured through focus:
//!
//! - **image_proc** - Moments, iterative elliptical masking, beam parameters
//! - **propagation** - Gaussian beam propagation model and the M² caustic fit
//! - **config** - Serializable settings with documented defaults
//! - **error** - Fatal errors and the non-fatal warnings carried in results
//!
//! # Example
//!
//! ```
//! use beam_profile::image_proc::test_patterns::{elliptical_gaussian, GaussianBeam};
//! use beam_profile::{measure_beam, MeasureConfig};
//!
//! let image = elliptical_gaussian(128, 128, &GaussianBeam::round(64.0, 64.0, 20.0, 1000.0));
//! let beam = measure_beam(&image.view(), &MeasureConfig::default()).unwrap();
//!
//! assert!((beam.params.dx - 20.0).abs() < 0.05);
//! assert!(beam.diagnostics.converged);
//! ```

pub mod config;
pub mod error;
pub mod image_proc;
pub mod propagation;

// Re-export commonly used types
pub use config::{BackgroundMode, M2FitConfig, MeasureConfig, RefineConfig};
pub use error::{FitError, FitWarning, MeasurementError, MeasurementWarning};
pub use image_proc::{
    measure_beam, measure_beam_basic, measure_beams, BeamMeasurement, BeamParameters,
    MeasurementDiagnostics, MomentSet, PixelRegion, StopReason,
};
pub use propagation::{fit_m2, fit_m2_axes, M2Fit, M2FitResult, M2FitXY, PropagationSample};
