//! Background normalization of camera frames.
//!
//! Moments assume a non-negative intensity field with the background already
//! removed. These helpers convert raw sensor frames to `f64`, subtract a
//! background and clip what falls below zero.

use beam_math::{mean_and_std, median};
use ndarray::{s, Array2, ArrayView2, Zip};
use num_traits::NumCast;
use serde::{Deserialize, Serialize};

use crate::error::MeasurementError;

/// Background to remove from a frame.
#[derive(Debug, Clone, Copy)]
pub enum Background<'a> {
    None,
    Constant(f64),
    /// Per-pixel dark frame with the same shape as the image
    Image(ArrayView2<'a, f64>),
}

/// Convert any numeric pixel type to an `f64` intensity field.
///
/// Values that do not fit an `f64` become NaN and are later treated as
/// missing by the statistics.
pub fn to_intensity_field<T>(image: &ArrayView2<T>) -> Array2<f64>
where
    T: Copy + NumCast,
{
    image.mapv(|v| num_traits::cast::<T, f64>(v).unwrap_or(f64::NAN))
}

/// Subtract `background` and clip negative values to zero.
///
/// # Errors
/// `ShapeMismatch` when a background image does not match the frame.
pub fn subtract_background(
    image: &ArrayView2<f64>,
    background: Background<'_>,
) -> Result<Array2<f64>, MeasurementError> {
    match background {
        Background::None => Ok(image.mapv(clip)),
        Background::Constant(level) => Ok(image.mapv(|v| clip(v - level))),
        Background::Image(dark) => {
            if dark.dim() != image.dim() {
                return Err(MeasurementError::ShapeMismatch {
                    expected: image.dim(),
                    actual: dark.dim(),
                });
            }
            Ok(Zip::from(image)
                .and(&dark)
                .map_collect(|&v, &b| clip(v - b)))
        }
    }
}

fn clip(v: f64) -> f64 {
    // NaN compares false and is dropped along with negatives
    if v > 0.0 {
        v
    } else {
        0.0
    }
}

/// Background level estimated from the four image corners.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CornerStatistics {
    pub mean: f64,
    pub std_dev: f64,
    pub median: f64,
    /// Finite corner pixels the statistics were taken over
    pub samples: usize,
}

/// Estimate the background from rectangles in the four corners.
///
/// Each corner rectangle is `fraction` of the image height by `fraction` of
/// its width, at least one pixel each way. ISO 11146-3 suggests 2-5%.
///
/// # Errors
/// * `InvalidConfig` - `fraction` outside (0, 0.5)
/// * `DegenerateInput` - no finite pixel in the corners
pub fn corner_background(
    image: &ArrayView2<f64>,
    fraction: f64,
) -> Result<CornerStatistics, MeasurementError> {
    if !(fraction > 0.0 && fraction < 0.5) {
        return Err(MeasurementError::InvalidConfig(format!(
            "corner fraction must be in (0, 0.5), got {fraction}"
        )));
    }

    let (rows, cols) = image.dim();
    let n = ((rows as f64 * fraction) as usize).max(1).min(rows / 2);
    let m = ((cols as f64 * fraction) as usize).max(1).min(cols / 2);
    if n == 0 || m == 0 {
        return Err(MeasurementError::DegenerateInput {
            total: 0.0,
            pixels: rows * cols,
        });
    }

    let corners = [
        image.slice(s![..n, ..m]),
        image.slice(s![..n, cols - m..]),
        image.slice(s![rows - n.., ..m]),
        image.slice(s![rows - n.., cols - m..]),
    ];
    let values: Vec<f64> = corners
        .iter()
        .flat_map(|corner| corner.iter().copied())
        .filter(|v| v.is_finite())
        .collect();

    let degenerate = |_| MeasurementError::DegenerateInput {
        total: 0.0,
        pixels: 4 * n * m,
    };
    let (mean, std_dev) = mean_and_std(&values).map_err(degenerate)?;
    let median = median(&values).map_err(degenerate)?;

    Ok(CornerStatistics {
        mean,
        std_dev,
        median,
        samples: values.len(),
    })
}

/// Subtract `mean + n_sigma·std` of the corner background and clip at zero.
///
/// Returns the cleaned field together with the statistics used.
pub fn subtract_corner_background(
    image: &ArrayView2<f64>,
    fraction: f64,
    n_sigma: f64,
) -> Result<(Array2<f64>, CornerStatistics), MeasurementError> {
    let stats = corner_background(image, fraction)?;
    let threshold = stats.mean + n_sigma * stats.std_dev;
    log::debug!(
        "corner background mean {:.4}, std {:.4} over {} pixels, threshold {threshold:.4}",
        stats.mean,
        stats.std_dev,
        stats.samples
    );
    let cleaned = subtract_background(image, Background::Constant(threshold))?;
    Ok((cleaned, stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_integer_frame_conversion() {
        let frame = Array2::from_shape_fn((2, 3), |(r, c)| (r * 1000 + c) as u16);
        let field = to_intensity_field(&frame.view());
        assert_eq!(field[[1, 2]], 1002.0);
        assert_eq!(field.dim(), (2, 3));
    }

    #[test]
    fn test_constant_subtraction_clips() {
        let image = Array2::from_shape_vec((1, 4), vec![0.0, 5.0, 10.0, -3.0]).unwrap();
        let out = subtract_background(&image.view(), Background::Constant(4.0)).unwrap();
        assert_eq!(out.as_slice().unwrap(), &[0.0, 1.0, 6.0, 0.0]);

        let passthrough = subtract_background(&image.view(), Background::None).unwrap();
        assert_eq!(passthrough[[0, 3]], 0.0);
        assert_eq!(passthrough[[0, 2]], 10.0);
    }

    #[test]
    fn test_dark_frame_subtraction() {
        let image = Array2::from_elem((3, 3), 10.0);
        let mut dark = Array2::from_elem((3, 3), 2.0);
        dark[[1, 1]] = 12.0;

        let out = subtract_background(&image.view(), Background::Image(dark.view())).unwrap();
        assert_eq!(out[[0, 0]], 8.0);
        assert_eq!(out[[1, 1]], 0.0);

        let wrong = Array2::zeros((2, 3));
        assert!(matches!(
            subtract_background(&image.view(), Background::Image(wrong.view())),
            Err(MeasurementError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_corner_statistics() {
        // 100x100 frame, corners 5x5 at level 2 or 4, centre bright
        let mut image = Array2::from_elem((100, 100), 50.0);
        image.slice_mut(s![..5, ..5]).fill(2.0);
        image.slice_mut(s![..5, 95..]).fill(2.0);
        image.slice_mut(s![95.., ..5]).fill(4.0);
        image.slice_mut(s![95.., 95..]).fill(4.0);

        let stats = corner_background(&image.view(), 0.05).unwrap();
        assert_eq!(stats.samples, 100);
        assert_relative_eq!(stats.mean, 3.0, epsilon = 1e-12);
        assert_relative_eq!(stats.std_dev, 1.0, epsilon = 1e-12);
        assert_relative_eq!(stats.median, 3.0, epsilon = 1e-12);

        let (cleaned, _) = subtract_corner_background(&image.view(), 0.05, 2.0).unwrap();
        assert_eq!(cleaned[[0, 0]], 0.0);
        assert_relative_eq!(cleaned[[50, 50]], 45.0, epsilon = 1e-12);
    }

    #[test]
    fn test_corner_fraction_validated() {
        let image = Array2::from_elem((10, 10), 1.0);
        assert!(matches!(
            corner_background(&image.view(), 0.0),
            Err(MeasurementError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_tiny_frame_uses_single_pixel_corners() {
        let image = Array2::from_shape_fn((4, 4), |(r, c)| (r * 4 + c) as f64);
        let stats = corner_background(&image.view(), 0.035).unwrap();
        assert_eq!(stats.samples, 4);
        // Corners 0, 3, 12, 15
        assert_relative_eq!(stats.mean, 7.5, epsilon = 1e-12);
    }
}
