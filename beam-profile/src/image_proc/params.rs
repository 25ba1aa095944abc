//! Beam parameters from second moments.
//!
//! Diameters follow the ISO 11146 D4σ convention: four times the standard
//! deviation of the intensity distribution along an axis. For a Gaussian
//! `exp(-2r²/w²)` this equals the 1/e² diameter `2w`.

use beam_math::{normalize_axis_angle, projected_variance};
use serde::{Deserialize, Serialize};
use std::f64::consts::FRAC_PI_2;

use super::moments::MomentSet;
use crate::error::MeasurementWarning;

/// Centroid, D4σ diameters and orientation of one beam image.
///
/// `dx` is the diameter along the axis at angle `phi` (measured from +x
/// towards +y), `dy` the diameter along the perpendicular axis. When the
/// orientation is free, `dx` is the major diameter; with a fixed orientation
/// either may be larger, and [`major_diameter`](Self::major_diameter) and
/// [`minor_diameter`](Self::minor_diameter) give the ordered pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BeamParameters {
    pub xc: f64,
    pub yc: f64,
    pub dx: f64,
    pub dy: f64,
    /// Orientation in [-π/2, π/2)
    pub phi: f64,
}

impl BeamParameters {
    /// Principal-axis parameters of a moment set.
    ///
    /// A covariance that is not positive semi-definite (possible with a
    /// signed background-subtracted field) has its negative eigenvalues
    /// clamped to zero, each reported as `NumericInstability`.
    pub fn from_moments(moments: &MomentSet) -> (Self, Vec<MeasurementWarning>) {
        let eigen = moments.eigen();
        let mut warnings = Vec::new();
        let major = clamp_variance(eigen.major, &mut warnings);
        let minor = clamp_variance(eigen.minor, &mut warnings);

        let params = Self {
            xc: moments.xc,
            yc: moments.yc,
            dx: d4_sigma(major),
            dy: d4_sigma(minor),
            phi: eigen.angle,
        };
        (params, warnings)
    }

    /// Parameters along a caller-chosen axis `phi` and its perpendicular.
    ///
    /// The returned `phi` is the input normalized into [-π/2, π/2); `dx` is
    /// whichever diameter lies along it, so it may be the smaller one.
    pub fn from_moments_fixed_angle(
        moments: &MomentSet,
        phi: f64,
    ) -> (Self, Vec<MeasurementWarning>) {
        let (a, b, c) = (moments.var_x, moments.cov_xy, moments.var_y);
        let mut warnings = Vec::new();
        let var_u = clamp_variance(projected_variance(a, b, c, phi), &mut warnings);
        let var_v = clamp_variance(projected_variance(a, b, c, phi + FRAC_PI_2), &mut warnings);

        let params = Self {
            xc: moments.xc,
            yc: moments.yc,
            dx: d4_sigma(var_u),
            dy: d4_sigma(var_v),
            phi: normalize_axis_angle(phi),
        };
        (params, warnings)
    }

    /// Ratio of the smaller to the larger diameter, in [0, 1].
    ///
    /// A point source with both diameters zero counts as round.
    pub fn ellipticity(&self) -> f64 {
        let major = self.major_diameter();
        if major > 0.0 {
            self.minor_diameter() / major
        } else {
            1.0
        }
    }

    /// Larger of the two diameters, whichever axis it lies on.
    pub fn major_diameter(&self) -> f64 {
        self.dx.max(self.dy)
    }

    pub fn minor_diameter(&self) -> f64 {
        self.dx.min(self.dy)
    }

    /// Convert centroid and diameters from pixels to physical units.
    pub fn scaled(&self, pixel_size: f64) -> Self {
        Self {
            xc: self.xc * pixel_size,
            yc: self.yc * pixel_size,
            dx: self.dx * pixel_size,
            dy: self.dy * pixel_size,
            phi: self.phi,
        }
    }
}

fn d4_sigma(variance: f64) -> f64 {
    4.0 * variance.sqrt()
}

fn clamp_variance(variance: f64, warnings: &mut Vec<MeasurementWarning>) -> f64 {
    if variance < 0.0 {
        log::warn!("negative variance {variance:.3e} clamped to zero");
        warnings.push(MeasurementWarning::NumericInstability { variance });
        0.0
    } else {
        variance
    }
}
