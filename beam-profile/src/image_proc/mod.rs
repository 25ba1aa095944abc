//! Beam width, centroid and orientation measurement from 2D intensity images.
//!
//! # Module Organization
//!
//! - **moments**: Intensity-weighted centroid and second central moments
//! - **params**: D4σ diameters and orientation from a moment set
//! - **mask**: Rotated elliptical regions of interest
//! - **refine**: ISO 11146 iterative mask refinement state machine
//! - **beam**: Single-image and batch measurement entry points
//! - **background**: Frame conversion and background subtraction
//! - **test_patterns**: Synthetic Gaussian beams for validation
//!
//! Images are indexed `[[row, col]]`; x is the column and y the row, both in
//! pixel-centre coordinates of the full frame.

pub mod background;
pub mod beam;
pub mod mask;
pub mod moments;
pub mod params;
pub mod refine;
pub mod region;
pub mod test_patterns;

pub use background::{
    corner_background, subtract_background, subtract_corner_background, to_intensity_field,
    Background, CornerStatistics,
};
pub use beam::{
    measure_beam, measure_beam_basic, measure_beams, BeamMeasurement, MeasurementDiagnostics,
};
pub use mask::EllipseMask;
pub use moments::{compute_moments, compute_moments_from_mask, MomentSet};
pub use params::BeamParameters;
pub use refine::{IterativeMaskRefiner, RefineOutcome, RefineState, StopReason};
pub use region::PixelRegion;
