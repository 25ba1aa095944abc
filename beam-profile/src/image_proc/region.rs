//! Rectangular pixel regions.

use std::fmt;

use ndarray::{s, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::error::MeasurementError;

/// Half-open rectangle of pixel indices: rows `row_start..row_end`, columns
/// `col_start..col_end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelRegion {
    pub row_start: usize,
    pub row_end: usize,
    pub col_start: usize,
    pub col_end: usize,
}

impl PixelRegion {
    pub fn new(rows: std::ops::Range<usize>, cols: std::ops::Range<usize>) -> Self {
        Self {
            row_start: rows.start,
            row_end: rows.end,
            col_start: cols.start,
            col_end: cols.end,
        }
    }

    /// Region covering a whole `(rows, cols)` image.
    pub fn full(dim: (usize, usize)) -> Self {
        Self::new(0..dim.0, 0..dim.1)
    }

    pub fn rows(&self) -> usize {
        self.row_end.saturating_sub(self.row_start)
    }

    pub fn cols(&self) -> usize {
        self.col_end.saturating_sub(self.col_start)
    }

    pub fn dim(&self) -> (usize, usize) {
        (self.rows(), self.cols())
    }

    pub fn is_empty(&self) -> bool {
        self.rows() == 0 || self.cols() == 0
    }

    /// Overlap of two regions, `None` when they do not intersect.
    pub fn intersect(&self, other: &PixelRegion) -> Option<PixelRegion> {
        let region = PixelRegion {
            row_start: self.row_start.max(other.row_start),
            row_end: self.row_end.min(other.row_end),
            col_start: self.col_start.max(other.col_start),
            col_end: self.col_end.min(other.col_end),
        };
        (!region.is_empty()).then_some(region)
    }

    /// Check that the region is non-empty and inside an image of shape `dim`.
    pub fn validate(&self, dim: (usize, usize)) -> Result<(), MeasurementError> {
        if self.is_empty() || self.row_end > dim.0 || self.col_end > dim.1 {
            return Err(MeasurementError::InvalidRegion {
                region: *self,
                rows: dim.0,
                cols: dim.1,
            });
        }
        Ok(())
    }

    /// Borrow the part of `image` covered by this region.
    ///
    /// The region must already be validated against the image shape.
    pub fn view<'a, T>(&self, image: &ArrayView2<'a, T>) -> ArrayView2<'a, T> {
        image
            .clone()
            .slice_move(s![self.row_start..self.row_end, self.col_start..self.col_end])
    }
}

impl fmt::Display for PixelRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rows {}..{}, cols {}..{}",
            self.row_start, self.row_end, self.col_start, self.col_end
        )
    }
}
