use serde::{Deserialize, Serialize};

use crate::{Pt3, Real};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum TargetGeometryError {
    #[error("square size must be positive and finite, got {0}")]
    BadSquareSize(Real),
    #[error("board needs at least 2x2 interior corners, got {rows}x{cols}")]
    TooSmall { rows: u32, cols: u32 },
}

/// Chessboard geometry: square side length in metres and the number of
/// *interior* corners per axis.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TargetGeometry {
    pub square_size: Real,
    pub rows: u32,
    pub cols: u32,
}

impl Default for TargetGeometry {
    fn default() -> Self {
        Self {
            square_size: 0.0158,
            rows: 7,
            cols: 9,
        }
    }
}

impl TargetGeometry {
    pub fn validate(&self) -> Result<(), TargetGeometryError> {
        if !self.square_size.is_finite() || self.square_size <= 0.0 {
            return Err(TargetGeometryError::BadSquareSize(self.square_size));
        }
        if self.rows < 2 || self.cols < 2 {
            return Err(TargetGeometryError::TooSmall {
                rows: self.rows,
                cols: self.cols,
            });
        }
        Ok(())
    }

    pub fn corner_count(&self) -> usize {
        self.rows as usize * self.cols as usize
    }

    /// Board-frame position of interior corner `(i, j)` on the plane z = 0.
    pub fn object_point(&self, i: u32, j: u32) -> Pt3 {
        Pt3::new(
            i as Real * self.square_size,
            j as Real * self.square_size,
            0.0,
        )
    }

    /// All interior corners, row-major (`j` outer, `i` inner).
    pub fn object_points(&self) -> Vec<Pt3> {
        (0..self.rows)
            .flat_map(|j| (0..self.cols).map(move |i| (i, j)))
            .map(|(i, j)| self.object_point(i, j))
            .collect()
    }
}
