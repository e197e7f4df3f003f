use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// Canonical 2D corner consumed by the chessboard detector.
///
/// This is what you obtain by adapting the output of a ChESS corner detector.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Corner {
    /// Corner position in pixel coordinates.
    pub position: Point2<f32>,

    /// Dominant diagonal orientation at the corner, in radians.
    ///
    /// Defined modulo π: chessboard axes are undirected.
    pub orientation: f32,

    /// Orientation family (0 or 1) once clustering ran, `None` for outliers
    /// or before clustering.
    pub orientation_cluster: Option<usize>,

    /// Strength / response of the corner detector.
    pub strength: f32,
}

/// Integer grid coordinates (i, j) in board space.
///
/// `i` runs along the board columns, `j` along the rows.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct GridCoords {
    pub i: i32,
    pub j: i32,
}

/// A corner that is part of a detected board.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LabeledCorner {
    /// Pixel position.
    pub position: Point2<f32>,

    /// Grid coordinates on the board.
    pub grid: GridCoords,

    /// Detection confidence in [0, 1].
    pub confidence: f32,
}

/// One detected chessboard in an image.
///
/// Corners are sorted row-major by grid coordinates. When the board is
/// complete, `corners[j * cols + i]` has grid `(i, j)`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TargetDetection {
    pub rows: u32,
    pub cols: u32,
    pub corners: Vec<LabeledCorner>,
}

impl TargetDetection {
    pub fn is_complete(&self) -> bool {
        self.corners.len() == self.rows as usize * self.cols as usize
    }


    /// Pixel positions in row-major grid order.
    pub fn image_points(&self) -> Vec<Point2<f32>> {
        self.corners.iter().map(|c| c.position).collect()
    }
}
