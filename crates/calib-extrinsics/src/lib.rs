//! Two-camera chessboard extrinsic calibration.
//!
//! A colour camera whose pose in the robot base frame is known and a depth
//! camera rigidly mounted to a robot link both observe one chessboard. Two
//! interactive captures chain the per-camera board poses through the robot's
//! kinematic frames:
//!
//! - `a`: `T_base_to_chess = T_base_to_color · T_color_to_chess`
//! - `b`: `T_arm_to_depth = T_arm_to_base · T_base_to_chess · T_chess_to_depth`
//!
//! Both results are written as 4×4 text matrices.
//!
//! ## Quickstart
//!
//! ```no_run
//! use calib_extrinsics::core::{CameraIntrinsics, TargetGeometry};
//! use calib_extrinsics::{ChessboardPoseSolver, PoseSolver};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let img = image::open("board.png")?.to_luma8();
//! let camera = CameraIntrinsics::from_slices(
//!     &[600.0, 0.0, 320.0, 0.0, 600.0, 240.0, 0.0, 0.0, 1.0],
//!     &[],
//! )?;
//! let pose = ChessboardPoseSolver::default().solve(&img, &camera, &TargetGeometry::default())?;
//! println!("T_camera_to_chess:\n{}", pose.camera_to_board());
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `calib_extrinsics::core`: transforms, camera model, planar PnP.
//! - `calib_extrinsics::chessboard`: chessboard grid detection from ChESS corners.
//! - [`detect`]: ChESS corner detection on `image::GrayImage`.
//! - [`PoseSolver`]: image → board pose in the camera frame.
//! - [`CalibrationSession`]: per-cycle detection and the two captures.
//! - [`app::run`]: the interactive acquisition loop.

pub use calib_extrinsics_chessboard as chessboard;
pub use calib_extrinsics_core as core;

pub mod app;
pub mod capture;
pub mod config;
pub mod detect;
pub mod draw;
pub mod input;
pub mod robot;
pub mod session;
pub mod sink;
pub mod solver;
pub mod source;

pub use capture::{CaptureState, Command};
pub use config::{CalibConfig, ConfigError};
pub use session::{CalibrationSession, CaptureError, CaptureOutcome, CycleResult};
pub use solver::{BoardPose, Channel, ChessboardPoseSolver, DetectError, PoseSolver};
