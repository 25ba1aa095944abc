//! ISO 11146 iterative elliptical mask refinement.
//!
//! Raw second moments over a whole frame are dominated by whatever sits far
//! from the beam: a faint noise floor or a single hot pixel inflates the
//! diameters because the moments weight by distance squared. The refiner
//! repeatedly restricts the moments to an ellipse a fixed multiple of the
//! current beam size, recomputing from scratch each pass, until centroid and
//! diameters stop moving.

use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

use super::mask::EllipseMask;
use super::moments::{compute_moments, compute_moments_from_mask, MomentSet};
use super::params::BeamParameters;
use super::region::PixelRegion;
use crate::config::RefineConfig;
use crate::error::{MeasurementError, MeasurementWarning};

/// Why the refiner stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// Relative change fell below the tolerance
    Converged,
    /// `max_iterations` passes ran without settling
    IterationCap,
    /// A mask enclosed no usable intensity; the previous estimate stands
    MaskCollapse,
}

/// Estimate after the most recent accepted pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RefineState {
    pub moments: MomentSet,
    pub params: BeamParameters,
    /// Accepted masked passes so far; 0 is the unmasked starting estimate
    pub iteration: usize,
    pub converged: bool,
    /// Relative change of the last accepted pass, infinite before the first
    pub last_change: f64,
}

/// Final result of a refinement run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefineOutcome {
    pub moments: MomentSet,
    pub params: BeamParameters,
    pub iterations: usize,
    pub stop_reason: StopReason,
    pub warnings: Vec<MeasurementWarning>,
}

/// State machine driving the mask/recompute loop over one image.
///
/// Construction computes the unmasked starting estimate over `region`. Each
/// [`step`](Self::step) lays an ellipse over the current estimate and
/// recomputes the moments inside it. Masks never extend past `region`.
pub struct IterativeMaskRefiner<'a> {
    image: ArrayView2<'a, f64>,
    bounds: PixelRegion,
    config: RefineConfig,
    fixed_angle: Option<f64>,
    initial_total: f64,
    state: RefineState,
    /// Warnings of the refinement itself
    warnings: Vec<MeasurementWarning>,
    /// Warnings of the parameter extraction behind the current state
    extraction_warnings: Vec<MeasurementWarning>,
    stop_reason: Option<StopReason>,
}

impl<'a> IterativeMaskRefiner<'a> {
    /// # Errors
    /// * `InvalidConfig` - refine settings out of range
    /// * `InvalidRegion` - region empty or outside the image
    /// * `DegenerateInput` - no intensity in the region
    pub fn new(
        image: ArrayView2<'a, f64>,
        region: PixelRegion,
        config: RefineConfig,
        fixed_angle: Option<f64>,
    ) -> Result<Self, MeasurementError> {
        config.validate()?;
        let moments = compute_moments(&image, &region)?;
        let (params, extraction_warnings) = extract(&moments, fixed_angle);

        log::debug!(
            "initial estimate: centroid ({:.3}, {:.3}), diameters {:.3} x {:.3}",
            params.xc,
            params.yc,
            params.dx,
            params.dy
        );

        Ok(Self {
            image,
            bounds: region,
            config,
            fixed_angle,
            initial_total: moments.total,
            state: RefineState {
                moments,
                params,
                iteration: 0,
                converged: false,
                last_change: f64::INFINITY,
            },
            warnings: Vec::new(),
            extraction_warnings,
            stop_reason: None,
        })
    }

    pub fn state(&self) -> &RefineState {
        &self.state
    }

    /// `None` while the refiner can still take steps.
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop_reason
    }

    /// Run one masked pass.
    ///
    /// Returns the stop reason once the refiner has terminated; further calls
    /// leave the state untouched and return the same reason.
    pub fn step(&mut self) -> Result<Option<StopReason>, MeasurementError> {
        if self.stop_reason.is_some() {
            return Ok(self.stop_reason);
        }

        let attempt = self.state.iteration + 1;
        let mask = EllipseMask::from_beam(&self.state.params, self.config.mask_multiplier);

        let Some(window) = mask.bounding_region(&self.bounds) else {
            return Ok(Some(self.collapse(attempt, 0.0)));
        };
        let raster = mask.rasterize(&window);

        let moments = match compute_moments_from_mask(&self.image, &window, &raster.view()) {
            Ok(moments) => moments,
            Err(MeasurementError::DegenerateInput { total, .. }) => {
                return Ok(Some(self.collapse(attempt, total)));
            }
            Err(e) => return Err(e),
        };
        if moments.total <= self.config.collapse_fraction * self.initial_total {
            return Ok(Some(self.collapse(attempt, moments.total)));
        }

        let (params, extraction_warnings) = extract(&moments, self.fixed_angle);
        let change = relative_change(&self.state.params, &params);

        log::debug!(
            "refine iteration {attempt}: centroid ({:.3}, {:.3}), diameters {:.3} x {:.3}, change {change:.3e}",
            params.xc,
            params.yc,
            params.dx,
            params.dy
        );

        self.state = RefineState {
            moments,
            params,
            iteration: attempt,
            converged: change < self.config.tolerance,
            last_change: change,
        };
        self.extraction_warnings = extraction_warnings;

        if self.state.converged {
            self.stop_reason = Some(StopReason::Converged);
        } else if attempt >= self.config.max_iterations {
            let warning = MeasurementWarning::Convergence {
                iterations: attempt,
                last_change: change,
            };
            log::warn!("{warning}");
            self.warnings.push(warning);
            self.stop_reason = Some(StopReason::IterationCap);
        }
        Ok(self.stop_reason)
    }

    /// Step until a stop condition holds.
    pub fn run(mut self) -> Result<RefineOutcome, MeasurementError> {
        let stop_reason = loop {
            if let Some(reason) = self.step()? {
                break reason;
            }
        };

        let mut warnings = self.warnings;
        warnings.extend(self.extraction_warnings);

        Ok(RefineOutcome {
            moments: self.state.moments,
            params: self.state.params,
            iterations: self.state.iteration,
            stop_reason,
            warnings,
        })
    }

    fn collapse(&mut self, iteration: usize, mask_total: f64) -> StopReason {
        let warning = MeasurementWarning::MaskCollapse {
            iteration,
            mask_total,
        };
        log::warn!("{warning}");
        self.warnings.push(warning);
        self.stop_reason = Some(StopReason::MaskCollapse);
        StopReason::MaskCollapse
    }
}

fn extract(
    moments: &MomentSet,
    fixed_angle: Option<f64>,
) -> (BeamParameters, Vec<MeasurementWarning>) {
    match fixed_angle {
        Some(phi) => BeamParameters::from_moments_fixed_angle(moments, phi),
        None => BeamParameters::from_moments(moments),
    }
}

/// Largest change of centroid or diameters, relative to the previous beam
/// size. Sizes below one pixel are treated as one pixel.
fn relative_change(previous: &BeamParameters, current: &BeamParameters) -> f64 {
    let scale = previous.major_diameter().max(1.0);
    [
        current.xc - previous.xc,
        current.yc - previous.yc,
        current.dx - previous.dx,
        current.dy - previous.dy,
    ]
    .iter()
    .fold(0.0_f64, |acc, d| acc.max(d.abs()))
        / scale
}
