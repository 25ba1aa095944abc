//! Beam propagation through focus and M² estimation.

pub mod m2;
pub mod model;

pub use m2::{
    fit_m2, fit_m2_axes, samples_from, FitDiagnostics, FitUncertainty, M2Fit, M2FitResult,
    M2FitXY, PropagationSample, MIN_DISTINCT_POSITIONS,
};
pub use model::{
    beam_diameter, beam_parameter_product, beam_radius, caustic_diameter_squared,
    divergence_half_angle, m2_from_waist_divergence, radius_of_curvature, rayleigh_range,
};
