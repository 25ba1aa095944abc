//! Measurement and fit configuration.
//!
//! Every tunable of the algorithms lives here as an explicit field with a
//! documented default. All structs deserialize with `#[serde(default)]`, so a
//! partial JSON document only needs the fields it changes.

use beam_math::LmConfig;
use serde::{Deserialize, Serialize};

use crate::error::{FitError, MeasurementError};
use crate::image_proc::PixelRegion;

/// Default mask size in multiples of the current beam diameters (ISO 11146)
pub const DEFAULT_MASK_MULTIPLIER: f64 = 3.0;

/// Default relative change below which the refiner stops
pub const DEFAULT_REFINE_TOLERANCE: f64 = 1e-3;

/// Default refinement iteration cap
pub const DEFAULT_MAX_REFINE_ITERATIONS: usize = 25;

/// Iterative mask refinement settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefineConfig {
    /// Ellipse semi-axes as multiples of the current beam radii
    /// (equivalently, full axes as multiples of the diameters)
    pub mask_multiplier: f64,
    /// Relative change of centroid and diameters below which iteration stops
    pub tolerance: f64,
    /// Maximum number of mask/recompute rounds
    pub max_iterations: usize,
    /// A mask enclosing less than this fraction of the initial total
    /// intensity counts as collapsed
    pub collapse_fraction: f64,
}

impl Default for RefineConfig {
    fn default() -> Self {
        Self {
            mask_multiplier: DEFAULT_MASK_MULTIPLIER,
            tolerance: DEFAULT_REFINE_TOLERANCE,
            max_iterations: DEFAULT_MAX_REFINE_ITERATIONS,
            collapse_fraction: 1e-9,
        }
    }
}

impl RefineConfig {
    pub fn validate(&self) -> Result<(), MeasurementError> {
        if !(self.mask_multiplier.is_finite() && self.mask_multiplier > 0.0) {
            return Err(MeasurementError::InvalidConfig(format!(
                "mask_multiplier must be positive, got {}",
                self.mask_multiplier
            )));
        }
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(MeasurementError::InvalidConfig(format!(
                "tolerance must be positive, got {}",
                self.tolerance
            )));
        }
        if self.max_iterations == 0 {
            return Err(MeasurementError::InvalidConfig(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.collapse_fraction) {
            return Err(MeasurementError::InvalidConfig(format!(
                "collapse_fraction must be in [0, 1), got {}",
                self.collapse_fraction
            )));
        }
        Ok(())
    }
}

/// Background handling applied before the moments are computed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum BackgroundMode {
    /// Input is already a non-negative, background-free intensity field
    #[default]
    None,
    /// Subtract a constant level and clip at zero
    Constant { level: f64 },
    /// Estimate the level from the four image corners and subtract
    /// `mean + n_sigma·std`, clipping at zero
    Corners { fraction: f64, n_sigma: f64 },
}

impl BackgroundMode {
    /// Corner estimation with the usual ISO 11146 settings
    pub fn iso_corners() -> Self {
        Self::Corners {
            fraction: 0.035,
            n_sigma: 3.0,
        }
    }
}

/// Settings for one single-image beam measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MeasureConfig {
    pub refine: RefineConfig,
    pub background: BackgroundMode,
    /// Restrict the measurement to this region of the image
    pub crop: Option<PixelRegion>,
    /// Measure diameters along this orientation (radians) instead of the
    /// principal axes
    pub fixed_angle: Option<f64>,
}

impl MeasureConfig {
    pub fn validate(&self) -> Result<(), MeasurementError> {
        self.refine.validate()?;
        match self.background {
            BackgroundMode::None => {}
            BackgroundMode::Constant { level } => {
                if !level.is_finite() {
                    return Err(MeasurementError::InvalidConfig(format!(
                        "background level must be finite, got {level}"
                    )));
                }
            }
            BackgroundMode::Corners { fraction, n_sigma } => {
                if !(fraction > 0.0 && fraction < 0.5) {
                    return Err(MeasurementError::InvalidConfig(format!(
                        "corner fraction must be in (0, 0.5), got {fraction}"
                    )));
                }
                if !(n_sigma.is_finite() && n_sigma >= 0.0) {
                    return Err(MeasurementError::InvalidConfig(format!(
                        "n_sigma must be non-negative, got {n_sigma}"
                    )));
                }
            }
        }
        if let Some(angle) = self.fixed_angle {
            if !angle.is_finite() {
                return Err(MeasurementError::InvalidConfig(format!(
                    "fixed_angle must be finite, got {angle}"
                )));
            }
        }
        Ok(())
    }
}

/// M² curve fit settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct M2FitConfig {
    /// Levenberg-Marquardt iteration budget
    pub max_iterations: usize,
    /// Relative step tolerance of the optimizer
    pub xtol: f64,
    /// Relative cost tolerance of the optimizer
    pub ftol: f64,
    /// Hold the waist position fixed at this z instead of fitting it
    pub fixed_waist_position: Option<f64>,
    /// Hold the waist diameter fixed at this value instead of fitting it
    pub fixed_waist_diameter: Option<f64>,
    /// Samples ISO 11146 asks for within zR of the waist and beyond 2·zR
    pub iso_samples_per_region: usize,
}

impl Default for M2FitConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            xtol: 1e-10,
            ftol: 1e-12,
            fixed_waist_position: None,
            fixed_waist_diameter: None,
            iso_samples_per_region: 5,
        }
    }
}

impl M2FitConfig {
    pub fn validate(&self) -> Result<(), FitError> {
        if self.max_iterations == 0 {
            return Err(FitError::InvalidConfig(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        if !(self.xtol > 0.0 && self.ftol > 0.0) {
            return Err(FitError::InvalidConfig(format!(
                "tolerances must be positive, got xtol={} ftol={}",
                self.xtol, self.ftol
            )));
        }
        if let Some(z0) = self.fixed_waist_position {
            if !z0.is_finite() {
                return Err(FitError::InvalidConfig(format!(
                    "fixed_waist_position must be finite, got {z0}"
                )));
            }
        }
        if let Some(d0) = self.fixed_waist_diameter {
            if !(d0.is_finite() && d0 > 0.0) {
                return Err(FitError::InvalidConfig(format!(
                    "fixed_waist_diameter must be positive, got {d0}"
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn solver_config(&self) -> LmConfig {
        LmConfig {
            max_iterations: self.max_iterations,
            xtol: self.xtol,
            ftol: self.ftol,
            ..LmConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(MeasureConfig::default().validate().is_ok());
        assert!(M2FitConfig::default().validate().is_ok());
        let refine = RefineConfig::default();
        assert_eq!(refine.mask_multiplier, 3.0);
        assert_eq!(refine.max_iterations, 25);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: MeasureConfig = serde_json::from_str(
            r#"{"refine": {"mask_multiplier": 2.0}, "background": {"method": "corners", "fraction": 0.05, "n_sigma": 2.0}}"#,
        )
        .unwrap();

        assert_eq!(config.refine.mask_multiplier, 2.0);
        assert_eq!(config.refine.max_iterations, DEFAULT_MAX_REFINE_ITERATIONS);
        assert_eq!(
            config.background,
            BackgroundMode::Corners {
                fraction: 0.05,
                n_sigma: 2.0
            }
        );
        assert!(config.crop.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_values() {
        let config = MeasureConfig {
            refine: RefineConfig {
                mask_multiplier: 0.0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(MeasurementError::InvalidConfig(_))
        ));

        let config = MeasureConfig {
            background: BackgroundMode::Corners {
                fraction: 0.6,
                n_sigma: 3.0,
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let fit = M2FitConfig {
            fixed_waist_diameter: Some(-1.0),
            ..Default::default()
        };
        assert!(matches!(fit.validate(), Err(FitError::InvalidConfig(_))));
    }
}
