//! Intensity moment calculation for beam images
//!
//! Computes the intensity-weighted centroid and second central moments of a
//! rectangular pixel region, optionally restricted by a boolean mask. Both
//! passes run from scratch on every call: the centroid first, then the central
//! moments about it, which keeps variances free of the cancellation that
//! raw-moment formulas (`E[x²] - E[x]²`) suffer far from the origin.

use beam_math::SymmetricEigen2;
use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

use super::region::PixelRegion;
use crate::error::MeasurementError;

/// Net intensity, as a fraction of the summed magnitudes, at or below which
/// a region is considered empty
pub const MIN_NET_FRACTION: f64 = f64::EPSILON;

/// Zeroth, first and second central intensity moments.
///
/// Coordinates are absolute pixel indices of the full image: `xc` is the
/// column coordinate and `yc` the row coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MomentSet {
    /// Total intensity (sum of pixel values)
    pub total: f64,
    /// Centroid column coordinate
    pub xc: f64,
    /// Centroid row coordinate
    pub yc: f64,
    /// Second central moment μ₂₀ (variance in x)
    pub var_x: f64,
    /// Second central moment μ₀₂ (variance in y)
    pub var_y: f64,
    /// Second central moment μ₁₁ (covariance between x and y)
    pub cov_xy: f64,
}

impl MomentSet {
    /// Closed-form principal-axis decomposition of the covariance
    pub fn eigen(&self) -> SymmetricEigen2 {
        SymmetricEigen2::from_components(self.var_x, self.cov_xy, self.var_y)
    }
}

/// Calculate centroid and second moments over a rectangular region.
///
/// # Arguments
///
/// * `image` - Non-negative intensity field
/// * `region` - Pixels to include
///
/// # Errors
///
/// * `InvalidRegion` - region empty or outside the image
/// * `DegenerateInput` - total intensity is not positive
pub fn compute_moments(
    image: &ArrayView2<f64>,
    region: &PixelRegion,
) -> Result<MomentSet, MeasurementError> {
    region.validate(image.dim())?;
    accumulate(image, region, None)
}

/// Calculate centroid and second moments over the masked pixels of a region.
///
/// # Arguments
///
/// * `image` - Non-negative intensity field
/// * `region` - Rectangle the mask is laid over
/// * `mask` - Same shape as `region`, true where pixels belong to the beam
///
/// # Errors
///
/// * `InvalidRegion` - region empty or outside the image
/// * `ShapeMismatch` - mask shape differs from region shape
/// * `DegenerateInput` - masked intensity is not positive
pub fn compute_moments_from_mask(
    image: &ArrayView2<f64>,
    region: &PixelRegion,
    mask: &ArrayView2<bool>,
) -> Result<MomentSet, MeasurementError> {
    region.validate(image.dim())?;
    if mask.dim() != region.dim() {
        return Err(MeasurementError::ShapeMismatch {
            expected: region.dim(),
            actual: mask.dim(),
        });
    }
    accumulate(image, region, Some(mask))
}

fn accumulate(
    image: &ArrayView2<f64>,
    region: &PixelRegion,
    mask: Option<&ArrayView2<bool>>,
) -> Result<MomentSet, MeasurementError> {
    let sub = region.view(image);
    let included = |row: usize, col: usize| mask.map_or(true, |m| m[[row, col]]);

    // Pass 1: total and centroid (relative to region origin)
    let mut m00 = 0.0;
    let mut m10 = 0.0;
    let mut m01 = 0.0;
    let mut magnitude = 0.0;
    let mut pixels = 0usize;
    for ((row, col), &intensity) in sub.indexed_iter() {
        if included(row, col) {
            m00 += intensity;
            magnitude += intensity.abs();
            m10 += col as f64 * intensity;
            m01 += row as f64 * intensity;
            pixels += 1;
        }
    }

    if !m00.is_finite() || m00 <= MIN_NET_FRACTION * magnitude {
        return Err(MeasurementError::DegenerateInput { total: m00, pixels });
    }

    let x_rel = m10 / m00;
    let y_rel = m01 / m00;

    // Pass 2: central moments
    let mut mu20 = 0.0;
    let mut mu02 = 0.0;
    let mut mu11 = 0.0;
    for ((row, col), &intensity) in sub.indexed_iter() {
        if included(row, col) {
            let dx = col as f64 - x_rel;
            let dy = row as f64 - y_rel;
            mu20 += dx * dx * intensity;
            mu02 += dy * dy * intensity;
            mu11 += dx * dy * intensity;
        }
    }

    Ok(MomentSet {
        total: m00,
        xc: x_rel + region.col_start as f64,
        yc: y_rel + region.row_start as f64,
        var_x: mu20 / m00,
        var_y: mu02 / m00,
        cov_xy: mu11 / m00,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{abs_diff_eq, assert_relative_eq};
    use ndarray::Array2;

    fn full(image: &Array2<f64>) -> PixelRegion {
        PixelRegion::full(image.dim())
    }

    #[test]
    fn test_single_pixel() {
        let mut image = Array2::from_elem((3, 3), 0.0);
        image[[1, 2]] = 100.0;

        let result = compute_moments(&image.view(), &full(&image)).unwrap();

        assert_relative_eq!(result.xc, 2.0, epsilon = 1e-10);
        assert_relative_eq!(result.yc, 1.0, epsilon = 1e-10);
        assert_relative_eq!(result.total, 100.0, epsilon = 1e-10);
        assert_relative_eq!(result.var_x, 0.0, epsilon = 1e-12);
        assert_relative_eq!(result.var_y, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_symmetric_cross() {
        let mut image = Array2::from_elem((5, 5), 0.0);
        image[[2, 1]] = 50.0;
        image[[2, 2]] = 100.0;
        image[[2, 3]] = 50.0;
        image[[1, 2]] = 50.0;
        image[[3, 2]] = 50.0;

        let result = compute_moments(&image.view(), &full(&image)).unwrap();

        assert_relative_eq!(result.xc, 2.0, epsilon = 1e-10);
        assert_relative_eq!(result.yc, 2.0, epsilon = 1e-10);
        assert_relative_eq!(result.total, 300.0, epsilon = 1e-10);
        // Two pixels of 50 at distance 1 out of 300 total
        assert_relative_eq!(result.var_x, 100.0 / 300.0, epsilon = 1e-12);
        assert_relative_eq!(result.var_y, 100.0 / 300.0, epsilon = 1e-12);
        assert_relative_eq!(result.cov_xy, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_horizontal_pattern_has_larger_x_variance() {
        let mut image = Array2::from_elem((7, 7), 0.0);
        image[[3, 1]] = 25.0;
        image[[3, 2]] = 50.0;
        image[[3, 3]] = 100.0;
        image[[3, 4]] = 50.0;
        image[[3, 5]] = 25.0;
        image[[2, 3]] = 25.0;
        image[[4, 3]] = 25.0;

        let result = compute_moments(&image.view(), &full(&image)).unwrap();

        assert!(
            abs_diff_eq!(result.xc, 3.0, epsilon = 1e-10),
            "x centroid should be 3.0, got {}",
            result.xc
        );
        assert!(
            result.var_x > result.var_y,
            "var_x ({}) should be > var_y ({}) for horizontal pattern",
            result.var_x,
            result.var_y
        );
        assert!(
            abs_diff_eq!(result.cov_xy, 0.0, epsilon = 1e-12),
            "cov_xy should vanish for axis-aligned pattern, got {}",
            result.cov_xy
        );
    }

    #[test]
    fn test_diagonal_pattern_has_positive_covariance() {
        let mut image = Array2::from_elem((7, 7), 0.0);
        for i in 1..6 {
            image[[i, i]] = 100.0;
        }

        let result = compute_moments(&image.view(), &full(&image)).unwrap();

        // Pixels at offsets -2..=2 along the diagonal: variance 2 on each axis
        assert_relative_eq!(result.var_x, 2.0, epsilon = 1e-12);
        assert_relative_eq!(result.var_y, 2.0, epsilon = 1e-12);
        assert_relative_eq!(result.cov_xy, 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_region_offsets_are_absolute() {
        let mut image = Array2::from_elem((20, 20), 0.0);
        image[[12, 15]] = 10.0;
        image[[2, 2]] = 1000.0; // outside the region

        let region = PixelRegion::new(10..20, 10..20);
        let result = compute_moments(&image.view(), &region).unwrap();

        assert_relative_eq!(result.xc, 15.0, epsilon = 1e-12);
        assert_relative_eq!(result.yc, 12.0, epsilon = 1e-12);
        assert_relative_eq!(result.total, 10.0, epsilon = 1e-12);
    }

    #[test]
    fn test_mask_excludes_pixels() {
        let mut image = Array2::from_elem((5, 5), 0.0);
        image[[2, 2]] = 10.0;
        image[[0, 0]] = 10.0;
        let mut mask = Array2::from_elem((5, 5), true);
        mask[[0, 0]] = false;

        let result =
            compute_moments_from_mask(&image.view(), &full(&image), &mask.view()).unwrap();

        assert_relative_eq!(result.xc, 2.0, epsilon = 1e-12);
        assert_relative_eq!(result.yc, 2.0, epsilon = 1e-12);
        assert_relative_eq!(result.total, 10.0, epsilon = 1e-12);
    }

    #[test]
    fn test_zero_image_is_degenerate() {
        let image = Array2::<f64>::zeros((8, 8));

        let result = compute_moments(&image.view(), &full(&image));

        assert_eq!(
            result,
            Err(MeasurementError::DegenerateInput {
                total: 0.0,
                pixels: 64
            })
        );
    }

    #[test]
    fn test_intensity_scale_does_not_matter() {
        let mut image = Array2::from_elem((5, 5), 0.0);
        image[[2, 1]] = 1.0;
        image[[2, 2]] = 2.0;
        image[[2, 3]] = 1.0;

        let bright = compute_moments(&image.view(), &full(&image)).unwrap();
        let faint = compute_moments(&(&image * 1e-18).view(), &full(&image)).unwrap();

        assert_relative_eq!(faint.xc, bright.xc, epsilon = 1e-12);
        assert_relative_eq!(faint.var_x, bright.var_x, epsilon = 1e-12);
        assert_relative_eq!(faint.total, 4e-18, max_relative = 1e-12);
    }

    #[test]
    fn test_cancelling_signed_field_is_degenerate() {
        let mut image = Array2::from_elem((4, 4), 0.0);
        image[[1, 1]] = 5.0;
        image[[2, 2]] = -5.0;

        assert!(matches!(
            compute_moments(&image.view(), &full(&image)),
            Err(MeasurementError::DegenerateInput { pixels: 16, .. })
        ));
    }

    #[test]
    fn test_mask_shape_mismatch() {
        let image = Array2::from_elem((5, 5), 1.0);
        let mask = Array2::from_elem((4, 5), true);

        let result = compute_moments_from_mask(&image.view(), &full(&image), &mask.view());

        assert!(matches!(
            result,
            Err(MeasurementError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_region_outside_image() {
        let image = Array2::from_elem((5, 5), 1.0);
        let result = compute_moments(&image.view(), &PixelRegion::new(0..6, 0..5));
        assert!(matches!(result, Err(MeasurementError::InvalidRegion { .. })));
    }

    #[test]
    fn test_far_from_origin_keeps_precision() {
        // Two pixels one apart, a long way from the origin
        let mut image = Array2::from_elem((4, 4000), 0.0);
        image[[1, 3998]] = 1.0;
        image[[1, 3999]] = 1.0;

        let result = compute_moments(&image.view(), &full(&image)).unwrap();

        assert_relative_eq!(result.var_x, 0.25, epsilon = 1e-12);
        assert_relative_eq!(result.xc, 3998.5, epsilon = 1e-12);
    }
}
