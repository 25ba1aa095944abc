//! Synthetic beam images for validating the measurement pipeline.
//!
//! Beams are rendered analytically at pixel centres, so their true D4σ
//! diameters and orientation are known exactly.

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal, NormalError};
use serde::{Deserialize, Serialize};

/// An elliptical TEM00-like Gaussian spot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GaussianBeam {
    /// Centre column
    pub xc: f64,
    /// Centre row
    pub yc: f64,
    /// D4σ diameter along `phi`
    pub d_major: f64,
    /// D4σ diameter perpendicular to `phi`
    pub d_minor: f64,
    /// Orientation of the `d_major` axis, radians from +x towards +y
    pub phi: f64,
    /// Value at the centre
    pub peak: f64,
}

impl GaussianBeam {
    /// Round beam of diameter `d` centred at `(xc, yc)`.
    pub fn round(xc: f64, yc: f64, d: f64, peak: f64) -> Self {
        Self {
            xc,
            yc,
            d_major: d,
            d_minor: d,
            phi: 0.0,
            peak,
        }
    }

    /// Intensity at pixel centre `(x, y)`.
    ///
    /// `peak·exp(-2(u²/wu² + v²/wv²))` with `w = d/2`, the 1/e² radii.
    pub fn intensity(&self, x: f64, y: f64) -> f64 {
        let (s, c) = self.phi.sin_cos();
        let dx = x - self.xc;
        let dy = y - self.yc;
        let u = dx * c + dy * s;
        let v = -dx * s + dy * c;
        let wu = 0.5 * self.d_major;
        let wv = 0.5 * self.d_minor;
        self.peak * (-2.0 * ((u / wu).powi(2) + (v / wv).powi(2))).exp()
    }
}

/// Render `beam` into a `height x width` image.
///
/// # Arguments
/// * `width` - Number of columns
/// * `height` - Number of rows
/// * `beam` - Spot to draw
pub fn elliptical_gaussian(width: usize, height: usize, beam: &GaussianBeam) -> Array2<f64> {
    Array2::from_shape_fn((height, width), |(row, col)| {
        beam.intensity(col as f64, row as f64)
    })
}

/// Add seeded normally distributed noise to every pixel.
///
/// The same seed always produces the same noise field.
///
/// # Errors
/// Returns `NormalError` when `std_dev` is negative or not finite.
pub fn add_gaussian_noise(
    image: &mut Array2<f64>,
    mean: f64,
    std_dev: f64,
    seed: u64,
) -> Result<(), NormalError> {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(mean, std_dev)?;
    image.iter_mut().for_each(|pixel| *pixel += normal.sample(&mut rng));
    Ok(())
}
