//! Elliptical region-of-interest masks for ISO 11146 moment windows.

use beam_math::rotation_matrix;
use nalgebra::{Matrix2, Vector2};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use super::params::BeamParameters;
use super::region::PixelRegion;

/// Smallest semi-axis a mask may have, in pixels. Keeps the pixel under the
/// centroid inside the mask when the beam is narrower than one pixel.
pub const MIN_SEMI_AXIS: f64 = 0.5;

/// Rotated ellipse in image coordinates (x = column, y = row).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EllipseMask {
    pub xc: f64,
    pub yc: f64,
    /// Semi-axis along `angle`
    pub semi_u: f64,
    /// Semi-axis perpendicular to `angle`
    pub semi_v: f64,
    pub angle: f64,
}

impl EllipseMask {
    /// Mask sized `multiplier` times the beam diameters along its axes.
    ///
    /// Semi-axes are `multiplier·d/2`, the ISO 11146 window for the
    /// conventional multiplier of 3.
    pub fn from_beam(params: &BeamParameters, multiplier: f64) -> Self {
        Self {
            xc: params.xc,
            yc: params.yc,
            semi_u: (0.5 * multiplier * params.dx).max(MIN_SEMI_AXIS),
            semi_v: (0.5 * multiplier * params.dy).max(MIN_SEMI_AXIS),
            angle: params.phi,
        }
    }

    /// Inside test with the rotation and inverse squared axes precomputed.
    fn inside(&self, rot: &Matrix2<f64>, inv_u2: f64, inv_v2: f64, x: f64, y: f64) -> bool {
        let p = rot * Vector2::new(x - self.xc, y - self.yc);
        p.x * p.x * inv_u2 + p.y * p.y * inv_v2 <= 1.0
    }

    fn frame(&self) -> (Matrix2<f64>, f64, f64) {
        (
            rotation_matrix(-self.angle),
            1.0 / (self.semi_u * self.semi_u),
            1.0 / (self.semi_v * self.semi_v),
        )
    }

    /// True when pixel centre `(x, y)` lies inside or on the ellipse.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        let (rot, inv_u2, inv_v2) = self.frame();
        self.inside(&rot, inv_u2, inv_v2, x, y)
    }

    /// Smallest pixel rectangle inside `bounds` that contains the ellipse,
    /// `None` if the ellipse misses `bounds` entirely.
    pub fn bounding_region(&self, bounds: &PixelRegion) -> Option<PixelRegion> {
        let (s, c) = self.angle.sin_cos();
        let half_w = ((self.semi_u * c).powi(2) + (self.semi_v * s).powi(2)).sqrt();
        let half_h = ((self.semi_u * s).powi(2) + (self.semi_v * c).powi(2)).sqrt();

        let clamp_start = |v: f64| v.ceil().max(0.0) as usize;
        let clamp_end = |v: f64| (v.floor() + 1.0).max(0.0) as usize;

        let ellipse_box = PixelRegion {
            row_start: clamp_start(self.yc - half_h),
            row_end: clamp_end(self.yc + half_h),
            col_start: clamp_start(self.xc - half_w),
            col_end: clamp_end(self.xc + half_w),
        };
        ellipse_box.intersect(bounds)
    }

    /// Rasterize over `region`: element `[[r, c]]` is true when pixel
    /// `(region.row_start + r, region.col_start + c)` is inside the ellipse.
    pub fn rasterize(&self, region: &PixelRegion) -> Array2<bool> {
        let (rot, inv_u2, inv_v2) = self.frame();

        Array2::from_shape_fn(region.dim(), |(r, c)| {
            self.inside(
                &rot,
                inv_u2,
                inv_v2,
                (region.col_start + c) as f64,
                (region.row_start + r) as f64,
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    fn beam(dx: f64, dy: f64, phi: f64) -> BeamParameters {
        BeamParameters {
            xc: 20.0,
            yc: 10.0,
            dx,
            dy,
            phi,
        }
    }

    #[test]
    fn test_semi_axes_scale_with_diameters() {
        let mask = EllipseMask::from_beam(&beam(8.0, 4.0, 0.0), 3.0);
        assert_eq!(mask.semi_u, 12.0);
        assert_eq!(mask.semi_v, 6.0);

        let tiny = EllipseMask::from_beam(&beam(0.0, 0.0, 0.0), 3.0);
        assert_eq!(tiny.semi_u, MIN_SEMI_AXIS);
        assert!(tiny.contains(20.0, 10.0));
    }

    #[test]
    fn test_contains_respects_rotation() {
        // Long axis along y after a quarter turn
        let mask = EllipseMask::from_beam(&beam(8.0, 2.0, FRAC_PI_2), 1.0);
        assert!(mask.contains(20.0, 13.5));
        assert!(!mask.contains(23.5, 10.0));
        assert!(mask.contains(20.9, 10.0));
    }

    #[test]
    fn test_rasterize_matches_contains() {
        let mask = EllipseMask::from_beam(&beam(10.0, 4.0, 0.5), 1.5);
        let bounds = PixelRegion::full((30, 40));
        let region = mask.bounding_region(&bounds).unwrap();
        let raster = mask.rasterize(&region);

        for ((r, c), &inside) in raster.indexed_iter() {
            let x = (region.col_start + c) as f64;
            let y = (region.row_start + r) as f64;
            assert_eq!(inside, mask.contains(x, y), "pixel ({x}, {y})");
        }

        // Every inside pixel of the full frame falls within the bounding box
        let full = mask.rasterize(&bounds);
        let inside_full = full.iter().filter(|&&v| v).count();
        let inside_box = raster.iter().filter(|&&v| v).count();
        assert_eq!(inside_full, inside_box);
    }

    #[test]
    fn test_bounding_region_clipped_to_bounds() {
        let mut params = beam(10.0, 10.0, 0.0);
        params.xc = 1.0;
        params.yc = 1.0;
        let mask = EllipseMask::from_beam(&params, 3.0);
        let region = mask.bounding_region(&PixelRegion::full((30, 40))).unwrap();

        assert_eq!(region.row_start, 0);
        assert_eq!(region.col_start, 0);
        assert_eq!(region.row_end, 17);
        assert_eq!(region.col_end, 17);
    }

    #[test]
    fn test_bounding_region_outside_bounds() {
        let mut params = beam(2.0, 2.0, 0.0);
        params.xc = 100.0;
        let mask = EllipseMask::from_beam(&params, 3.0);
        assert!(mask.bounding_region(&PixelRegion::full((30, 40))).is_none());
    }
}
