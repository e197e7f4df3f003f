use std::collections::HashMap;

use calib_extrinsics_core::{
    cluster_orientations, Corner, GridCoords, LabeledCorner, TargetDetection,
};
use log::{debug, info};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::gridgraph::{assign_grid_coordinates, connected_components, GridGraph};
use crate::params::ChessboardParams;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ChessboardError {
    #[error("only {found} corners passed the strength filter, need {need}")]
    TooFewCorners { found: usize, need: usize },
    #[error("corner orientations do not form two axis families")]
    NoOrientationClusters,
    #[error("no grid component matches {rows}x{cols} (largest spans {best_rows}x{best_cols})")]
    ShapeMismatch {
        rows: u32,
        cols: u32,
        best_rows: u32,
        best_cols: u32,
    },
    #[error("grid incomplete: {found} of {expected} corners labeled")]
    Incomplete { found: usize, expected: usize },
}

/// A labeled board plus the diagonal directions used to build it.
#[derive(Clone, Debug)]
pub struct ChessboardDetectionResult {
    pub detection: TargetDetection,
    /// Orientation cluster centers (radians, mod π) when clustering ran.
    pub grid_diagonals: Option<[f32; 2]>,
}

/// Candidate component after labeling.
struct LabeledComponent {
    /// `(corner index, grid)` with unique grid coordinates.
    nodes: Vec<(usize, GridCoords)>,
    width: u32,
    height: u32,
}

/// Chessboard detector: ChESS corners → grid graph → labeled board.
pub struct ChessboardDetector {
    pub params: ChessboardParams,
}

impl ChessboardDetector {
    pub fn new(params: ChessboardParams) -> Self {
        Self { params }
    }

    /// Find the expected `rows × cols` board in a cloud of corners.
    ///
    /// The grid origin is the board end nearest the image top-left; a board
    /// seen rotated by 90° is relabeled so that `i` still spans `cols`.
    #[cfg_attr(
        feature = "tracing",
        instrument(
            level = "debug",
            skip(self, corners),
            fields(
                num_corners = corners.len(),
                rows = self.params.expected_rows,
                cols = self.params.expected_cols
            )
        )
    )]
    pub fn detect_from_corners(
        &self,
        corners: &[Corner],
    ) -> Result<ChessboardDetectionResult, ChessboardError> {
        let params = &self.params;
        let need = params.min_corners();

        let mut strong: Vec<Corner> = corners
            .iter()
            .filter(|c| c.strength >= params.min_strength)
            .cloned()
            .collect();
        debug!("{} of {} ChESS corners pass the strength filter", strong.len(), corners.len());
        if strong.len() < need {
            return Err(ChessboardError::TooFewCorners {
                found: strong.len(),
                need,
            });
        }

        let grid_diagonals = if params.use_orientation_clustering {
            let clusters = cluster_orientations(&strong, &params.orientation_clustering_params)
                .ok_or(ChessboardError::NoOrientationClusters)?;
            for (c, label) in strong.iter_mut().zip(&clusters.labels) {
                c.orientation_cluster = *label;
            }
            strong.retain(|c| c.orientation_cluster.is_some());
            debug!(
                "orientation clusters at {:.1}° / {:.1}°, {} corners labeled",
                clusters.centers[0].to_degrees(),
                clusters.centers[1].to_degrees(),
                strong.len()
            );
            Some(clusters.centers)
        } else {
            None
        };

        let graph = GridGraph::new(&strong, &params.grid_graph, grid_diagonals);
        let (rows, cols) = (params.expected_rows, params.expected_cols);

        let mut best_match: Option<LabeledComponent> = None;
        let mut largest: Option<(usize, u32, u32)> = None;
        for component in connected_components(&graph) {
            if component.len() < need {
                continue;
            }
            let labeled = label_component(&graph, &component, &strong);
            if largest.is_none_or(|(n, _, _)| labeled.nodes.len() > n) {
                largest = Some((labeled.nodes.len(), labeled.height, labeled.width));
            }

            let labeled = if (labeled.width, labeled.height) == (cols, rows) {
                labeled
            } else if (labeled.width, labeled.height) == (rows, cols) {
                rotate_quarter_turn(labeled)
            } else {
                continue;
            };
            if best_match
                .as_ref()
                .is_none_or(|b| labeled.nodes.len() > b.nodes.len())
            {
                best_match = Some(labeled);
            }
        }

        let Some(best) = best_match else {
            let (_, best_rows, best_cols) = largest.unwrap_or((0, 0, 0));
            return Err(ChessboardError::ShapeMismatch {
                rows,
                cols,
                best_rows,
                best_cols,
            });
        };

        let expected = params.expected_corners();
        if best.nodes.len() < need {
            return Err(ChessboardError::Incomplete {
                found: best.nodes.len(),
                expected,
            });
        }

        let max_strength = best
            .nodes
            .iter()
            .map(|&(k, _)| strong[k].strength)
            .fold(0.0f32, f32::max);
        let mut labeled: Vec<LabeledCorner> = best
            .nodes
            .iter()
            .map(|&(k, grid)| LabeledCorner {
                position: strong[k].position,
                grid,
                confidence: if max_strength > 0.0 {
                    (strong[k].strength / max_strength).clamp(0.0, 1.0)
                } else {
                    1.0
                },
            })
            .collect();
        labeled.sort_by_key(|c| (c.grid.j, c.grid.i));

        info!(
            "chessboard {}x{}: {} of {} corners labeled",
            rows,
            cols,
            labeled.len(),
            expected
        );

        Ok(ChessboardDetectionResult {
            detection: TargetDetection {
                rows,
                cols,
                corners: labeled,
            },
            grid_diagonals,
        })
    }
}

/// BFS-label one component and drop coordinate collisions, keeping the
/// stronger corner.
fn label_component(graph: &GridGraph, component: &[usize], corners: &[Corner]) -> LabeledComponent {
    let mut by_grid: HashMap<GridCoords, usize> = HashMap::new();
    for (node, grid) in assign_grid_coordinates(graph, component) {
        by_grid
            .entry(grid)
            .and_modify(|k| {
                if corners[node].strength > corners[*k].strength {
                    *k = node;
                }
            })
            .or_insert(node);
    }

    let width = by_grid.keys().map(|g| g.i + 1).max().unwrap_or(0) as u32;
    let height = by_grid.keys().map(|g| g.j + 1).max().unwrap_or(0) as u32;
    let nodes = by_grid.into_iter().map(|(g, k)| (k, g)).collect();
    LabeledComponent {
        nodes,
        width,
        height,
    }
}

/// Relabel `(i, j) -> (h - 1 - j, i)`. This is a proper rotation of the grid
/// so the board frame stays right-handed.
fn rotate_quarter_turn(c: LabeledComponent) -> LabeledComponent {
    let h = c.height as i32;
    LabeledComponent {
        nodes: c
            .nodes
            .into_iter()
            .map(|(k, g)| {
                (
                    k,
                    GridCoords {
                        i: h - 1 - g.j,
                        j: g.i,
                    },
                )
            })
            .collect(),
        width: c.height,
        height: c.width,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Point2;
    use std::f32::consts::FRAC_PI_4;

    /// Corners of a `w × h` lattice in image space, origin `(x0, y0)`.
    fn lattice(w: u32, h: u32, spacing: f32, x0: f32, y0: f32) -> Vec<Corner> {
        let mut out = Vec::new();
        for j in 0..h {
            for i in 0..w {
                out.push(Corner {
                    position: Point2::new(x0 + i as f32 * spacing, y0 + j as f32 * spacing),
                    orientation: if (i + j) % 2 == 0 {
                        FRAC_PI_4
                    } else {
                        3.0 * FRAC_PI_4
                    },
                    orientation_cluster: None,
                    strength: 1.0,
                });
            }
        }
        out
    }

    fn params(rows: u32, cols: u32) -> ChessboardParams {
        let mut p = ChessboardParams::for_board(rows, cols);
        p.grid_graph.max_spacing_pix = 30.0;
        p
    }

    #[test]
    fn labels_complete_lattice() {
        let corners = lattice(9, 7, 20.0, 100.0, 50.0);
        let res = ChessboardDetector::new(params(7, 9))
            .detect_from_corners(&corners)
            .expect("board");
        let det = &res.detection;
        assert!(det.is_complete());
        for (idx, c) in det.corners.iter().enumerate() {
            assert_eq!(c.grid.i as usize, idx % 9);
            assert_eq!(c.grid.j as usize, idx / 9);
            assert_eq!(c.position, corners[idx].position);
        }
    }

    #[test]
    fn relabels_rotated_lattice() {
        // A 7x9 board seen rotated: 7 corners wide, 9 tall in the image.
        let corners = lattice(7, 9, 20.0, 100.0, 50.0);
        let res = ChessboardDetector::new(params(7, 9))
            .detect_from_corners(&corners)
            .expect("board");
        let det = &res.detection;
        assert_eq!((det.rows, det.cols), (7, 9));
        assert!(det.is_complete());

        // Origin at the bottom-left image corner; i runs up, j runs right.
        assert_eq!(det.corners[0].position, Point2::new(100.0, 50.0 + 8.0 * 20.0));
        assert_eq!(det.corners[1].position, Point2::new(100.0, 50.0 + 7.0 * 20.0));
        assert_eq!(det.corners[9].position, Point2::new(120.0, 50.0 + 8.0 * 20.0));
    }

    #[test]
    fn ignores_clutter_component() {
        let mut corners = lattice(9, 7, 20.0, 100.0, 50.0);
        corners.extend(lattice(3, 3, 20.0, 600.0, 400.0));
        let res = ChessboardDetector::new(params(7, 9))
            .detect_from_corners(&corners)
            .expect("board");
        assert!(res.detection.is_complete());
        assert!(res.detection.corners.iter().all(|c| c.position.x < 300.0));
    }

    #[test]
    fn missing_corner_fails_when_full_grid_required() {
        let mut corners = lattice(9, 7, 20.0, 100.0, 50.0);
        corners.remove(30);
        let err = ChessboardDetector::new(params(7, 9))
            .detect_from_corners(&corners)
            .expect_err("incomplete");
        assert!(matches!(err, ChessboardError::TooFewCorners { .. }));

        let mut relaxed = params(7, 9);
        relaxed.completeness_threshold = 0.9;
        let res = ChessboardDetector::new(relaxed)
            .detect_from_corners(&corners)
            .expect("partial board");
        assert_eq!(res.detection.corners.len(), 62);
        assert!(!res.detection.is_complete());
    }

    #[test]
    fn wrong_shape_is_reported() {
        let corners = lattice(10, 7, 20.0, 100.0, 50.0);
        let err = ChessboardDetector::new(params(7, 9))
            .detect_from_corners(&corners)
            .expect_err("shape");
        assert_eq!(
            err,
            ChessboardError::ShapeMismatch {
                rows: 7,
                cols: 9,
                best_rows: 7,
                best_cols: 10
            }
        );
    }

    #[test]
    fn params_round_trip_through_json() {
        let p = params(5, 8);
        let json = serde_json::to_string(&p).expect("serialize");
        let back: ChessboardParams = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, p);
        let partial: ChessboardParams =
            serde_json::from_str(r#"{"expected_rows": 4}"#).expect("defaults");
        assert_eq!(partial.expected_rows, 4);
        assert_eq!(partial.expected_cols, 9);
    }
}
