use calib_extrinsics_core::OrientationClusteringParams;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct GridGraphParams {
    pub min_spacing_pix: f32,
    pub max_spacing_pix: f32,
    pub k_neighbors: usize,
    pub orientation_tolerance_deg: f32,
}

impl Default for GridGraphParams {
    fn default() -> Self {
        Self {
            min_spacing_pix: 5.0,
            max_spacing_pix: 160.0,
            k_neighbors: 8,
            orientation_tolerance_deg: 22.5,
        }
    }
}

/// Parameters specific to the chessboard detector.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ChessboardParams {
    /// Minimal corner strength to consider.
    pub min_strength: f32,

    /// Expected number of *inner* corners in vertical direction (rows).
    pub expected_rows: u32,

    /// Expected number of *inner* corners in horizontal direction (cols).
    pub expected_cols: u32,

    /// Minimal completeness ratio (#labeled corners / full grid size).
    ///
    /// The labeled extent must always match the expected shape; below 1.0
    /// interior holes are tolerated.
    pub completeness_threshold: f32,

    pub use_orientation_clustering: bool,
    pub orientation_clustering_params: OrientationClusteringParams,

    pub grid_graph: GridGraphParams,
}

impl Default for ChessboardParams {
    fn default() -> Self {
        Self {
            min_strength: 0.0,
            expected_rows: 7,
            expected_cols: 9,
            completeness_threshold: 1.0,
            use_orientation_clustering: true,
            orientation_clustering_params: OrientationClusteringParams::default(),
            grid_graph: GridGraphParams::default(),
        }
    }
}

impl ChessboardParams {
    pub fn for_board(rows: u32, cols: u32) -> Self {
        Self {
            expected_rows: rows,
            expected_cols: cols,
            ..Self::default()
        }
    }

    pub fn expected_corners(&self) -> usize {
        self.expected_rows as usize * self.expected_cols as usize
    }

    /// Fewest labeled corners accepted as a detection.
    pub fn min_corners(&self) -> usize {
        let ratio = self.completeness_threshold.clamp(0.0, 1.0);
        ((self.expected_corners() as f32 * ratio).ceil() as usize).max(4)
    }
}
