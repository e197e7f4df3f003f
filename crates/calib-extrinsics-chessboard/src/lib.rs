//! Chessboard grid detection on top of ChESS corners.
//!
//! Input: corners from any ChESS detector, adapted into
//! [`calib_extrinsics_core::Corner`]. Output: a [`TargetDetection`] whose
//! corners carry integer grid coordinates with `i` along the board columns
//! and `j` along the rows, origin at the image-top-left end of the board.
//!
//! ```no_run
//! use calib_extrinsics_chessboard::{ChessboardDetector, ChessboardParams};
//! # let corners = Vec::new();
//! let detector = ChessboardDetector::new(ChessboardParams::for_board(7, 9));
//! match detector.detect_from_corners(&corners) {
//!     Ok(res) => println!("{} corners labeled", res.detection.corners.len()),
//!     Err(err) => println!("no board: {err}"),
//! }
//! ```
//!
//! [`TargetDetection`]: calib_extrinsics_core::TargetDetection

mod detector;
mod geom;
mod gridgraph;
mod params;

pub use detector::{ChessboardDetectionResult, ChessboardDetector, ChessboardError};
pub use gridgraph::{
    assign_grid_coordinates, connected_components, GridGraph, NeighborDirection, NodeNeighbor,
};
pub use params::{ChessboardParams, GridGraphParams};
