//! Core geometry for two-camera chessboard extrinsic calibration.
//!
//! This crate is intentionally small and purely geometric. It does *not*
//! depend on any concrete corner detector or image type: detectors hand in
//! pixel positions, and everything here works on `nalgebra` types.
//!
//! ## API map
//! - [`HomogeneousTransform`]: 4×4 rigid transforms (compose, invert, build).
//! - [`CameraIntrinsics`]: pinhole `K` plus OpenCV-ordered distortion `D`.
//! - [`TargetGeometry`]: chessboard square size and interior-corner counts.
//! - [`solve_planar_pose`]: planar PnP (homography init + LM refinement).
//! - [`Corner`], [`LabeledCorner`], [`TargetDetection`]: detector currency.

mod camera;
mod corner;
mod homography;
mod logger;
mod math;
mod orientation_clustering;
mod pnp;
mod target;
mod transform;

pub use camera::{CameraError, CameraInfo, CameraIntrinsics, Distortion};
pub use corner::{Corner, GridCoords, LabeledCorner, TargetDetection};
pub use homography::{estimate_homography, Homography};
pub use math::{Mat3, Mat4, Pt2, Pt3, Real, Vec2, Vec3};
pub use orientation_clustering::{
    cluster_orientations, OrientationClusteringParams, OrientationClusteringResult,
};
pub use pnp::{solve_planar_pose, PlanarPose, PoseError, PoseRefineParams};
pub use target::{TargetGeometry, TargetGeometryError};
pub use transform::{HomogeneousTransform, TransformError, RIGID_TOLERANCE};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::init_with_level;
