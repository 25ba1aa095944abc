//! Embedded Gaussian beam propagation formulas.
//!
//! A real beam with quality factor M² propagates like a Gaussian beam whose
//! wavelength is scaled by M². All lengths share one unit, which must also be
//! the unit of the wavelength; angles are radians.

use std::f64::consts::PI;

/// Rayleigh range `π·w0² / (M²·λ)`.
pub fn rayleigh_range(w0: f64, m2: f64, wavelength: f64) -> f64 {
    PI * w0 * w0 / (m2 * wavelength)
}

/// Far-field divergence half-angle `M²·λ / (π·w0)`.
pub fn divergence_half_angle(w0: f64, m2: f64, wavelength: f64) -> f64 {
    m2 * wavelength / (PI * w0)
}

/// Beam radius at `z` for a waist `w0` located at `z0`.
pub fn beam_radius(w0: f64, z: f64, z0: f64, m2: f64, wavelength: f64) -> f64 {
    let zr = rayleigh_range(w0, m2, wavelength);
    w0 * (1.0 + ((z - z0) / zr).powi(2)).sqrt()
}

/// Beam diameter at `z` for a waist diameter `d0` located at `z0`.
pub fn beam_diameter(d0: f64, z: f64, z0: f64, m2: f64, wavelength: f64) -> f64 {
    2.0 * beam_radius(0.5 * d0, z, z0, m2, wavelength)
}

/// Beam parameter product `w0·θ`, invariant under ideal optics.
pub fn beam_parameter_product(w0: f64, theta: f64) -> f64 {
    w0 * theta
}

/// Wavefront radius of curvature at `z`; infinite at the waist.
pub fn radius_of_curvature(z: f64, z0: f64, z_rayleigh: f64) -> f64 {
    let dz = z - z0;
    if dz == 0.0 {
        return f64::INFINITY;
    }
    dz * (1.0 + (z_rayleigh / dz).powi(2))
}

/// Beam quality factor from waist radius and divergence half-angle.
pub fn m2_from_waist_divergence(w0: f64, theta: f64, wavelength: f64) -> f64 {
    PI * w0 * theta / wavelength
}

/// Squared diameter of the hyperbolic caustic `d0² + Θ²·(z - z0)²`, with
/// `Θ` the full divergence angle.
pub fn caustic_diameter_squared(z: f64, d0: f64, z0: f64, divergence: f64) -> f64 {
    d0 * d0 + (divergence * (z - z0)).powi(2)
}
