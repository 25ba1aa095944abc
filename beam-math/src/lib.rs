//! beam-math - Numeric algorithms for laser beam characterization
//!
//! This crate provides the small, image-independent numerical pieces used by
//! `beam-profile`:
//!
//! - **Matrix** - Closed-form eigen decomposition of symmetric 2x2 matrices
//!   and axis-angle helpers
//! - **Least squares** - Levenberg-Marquardt solver for nonlinear models
//! - **Polyfit** - Linear least-squares polynomial fitting
//! - **Statistics** - Mean, standard deviation and median
//!
//! # Example
//!
//! ```
//! use beam_math::SymmetricEigen2;
//!
//! // Covariance of an ellipse stretched along x
//! let eig = SymmetricEigen2::from_components(9.0, 0.0, 4.0);
//! assert_eq!(eig.major, 9.0);
//! assert_eq!(eig.minor, 4.0);
//! assert_eq!(eig.angle, 0.0);
//! ```

pub mod least_squares;
pub mod matrix2;
pub mod polyfit;
pub mod stats;

// Re-export commonly used types
pub use least_squares::{
    levenberg_marquardt, LeastSquaresError, LeastSquaresProblem, LmConfig, LmSolution,
};
pub use matrix2::{normalize_axis_angle, projected_variance, rotation_matrix, SymmetricEigen2};
pub use polyfit::{fit_polynomial, CenteredPolynomial, PolyfitError};
pub use stats::{mean_and_std, median, InsufficientDataError};
