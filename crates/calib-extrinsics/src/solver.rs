//! Chessboard pose per camera frame.

use std::fmt;

use calib_extrinsics_chessboard::{ChessboardDetector, ChessboardError, ChessboardParams};
use calib_extrinsics_core::{
    solve_planar_pose, CameraIntrinsics, HomogeneousTransform, PoseError, PoseRefineParams, Pt2,
    Real, TargetDetection, TargetGeometry, TargetGeometryError, Vec3,
};
use image::GrayImage;
use nalgebra::Rotation3;

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::detect::{chess_config, detect_corners, DEFAULT_CHESS_THRESHOLD_REL};

/// Why a channel has no board pose this cycle.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum DetectError {
    #[error("invalid grayscale image dimensions (width={width}, height={height})")]
    InvalidGrayDimensions { width: u32, height: u32 },
    #[error("no ChESS corners found")]
    NoCorners,
    #[error(transparent)]
    Geometry(#[from] TargetGeometryError),
    #[error(transparent)]
    Chessboard(#[from] ChessboardError),
    #[error(transparent)]
    Pose(#[from] PoseError),
}

/// The two camera streams.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Channel {
    Color,
    Depth,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Channel::Color => "color",
            Channel::Depth => "depth",
        })
    }
}

/// Board pose relative to one camera: `x_cam = rotation * x_board + translation`.
#[derive(Clone, Debug)]
pub struct BoardPose {
    pub rotation: Rotation3<Real>,
    pub translation: Vec3,
    /// Labeled corners the pose was solved from.
    pub detection: TargetDetection,
    pub rms_px: Real,
}

impl BoardPose {
    /// A pose without detection data.
    pub fn new(rotation: Rotation3<Real>, translation: Vec3) -> Self {
        Self {
            rotation,
            translation,
            detection: TargetDetection {
                rows: 0,
                cols: 0,
                corners: Vec::new(),
            },
            rms_px: 0.0,
        }
    }

    /// `T_camera_to_chess`: maps board coordinates into the camera frame.
    pub fn camera_to_board(&self) -> HomogeneousTransform {
        HomogeneousTransform::from_rotation_translation(&self.rotation, &self.translation)
    }

    /// Detected corner pixels in grid order.
    pub fn image_corners(&self) -> Vec<Pt2> {
        self.detection
            .corners
            .iter()
            .map(|c| Pt2::new(c.position.x as Real, c.position.y as Real))
            .collect()
    }
}

/// Image + intrinsics + target geometry → board pose.
pub trait PoseSolver {
    fn solve(
        &self,
        image: &GrayImage,
        camera: &CameraIntrinsics,
        geometry: &TargetGeometry,
    ) -> Result<BoardPose, DetectError>;
}

/// ChESS corners → chessboard grid → planar PnP.
#[derive(Clone, Debug, PartialEq)]
pub struct ChessboardPoseSolver {
    /// ChESS response threshold relative to the strongest response.
    pub chess_threshold_rel: f32,
    pub board: ChessboardParams,
    pub refine: PoseRefineParams,
}

impl Default for ChessboardPoseSolver {
    fn default() -> Self {
        Self::new(
            DEFAULT_CHESS_THRESHOLD_REL,
            ChessboardParams::default(),
            PoseRefineParams::default(),
        )
    }
}

impl ChessboardPoseSolver {
    pub fn new(chess_threshold_rel: f32, board: ChessboardParams, refine: PoseRefineParams) -> Self {
        Self {
            chess_threshold_rel,
            board,
            refine,
        }
    }
}

impl PoseSolver for ChessboardPoseSolver {
    #[cfg_attr(
        feature = "tracing",
        instrument(
            level = "info",
            skip(self, image, camera, geometry),
            fields(width = image.width(), height = image.height())
        )
    )]
    fn solve(
        &self,
        image: &GrayImage,
        camera: &CameraIntrinsics,
        geometry: &TargetGeometry,
    ) -> Result<BoardPose, DetectError> {
        geometry.validate()?;
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(DetectError::InvalidGrayDimensions { width, height });
        }

        let corners = detect_corners(image, &chess_config(self.chess_threshold_rel));
        if corners.is_empty() {
            return Err(DetectError::NoCorners);
        }

        let mut params = self.board.clone();
        params.expected_rows = geometry.rows;
        params.expected_cols = geometry.cols;
        let detection = ChessboardDetector::new(params)
            .detect_from_corners(&corners)?
            .detection;

        let object: Vec<_> = detection
            .corners
            .iter()
            .map(|c| geometry.object_point(c.grid.i as u32, c.grid.j as u32))
            .collect();
        let pixels: Vec<Pt2> = detection
            .corners
            .iter()
            .map(|c| Pt2::new(c.position.x as Real, c.position.y as Real))
            .collect();
        let pose = solve_planar_pose(&object, &pixels, camera, &self.refine)?;

        Ok(BoardPose {
            rotation: pose.rotation,
            translation: pose.translation,
            detection,
            rms_px: pose.rms_px,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn camera() -> CameraIntrinsics {
        CameraIntrinsics::from_slices(&[500.0, 0.0, 32.0, 0.0, 500.0, 24.0, 0.0, 0.0, 1.0], &[])
            .expect("camera")
    }

    fn wide_camera() -> CameraIntrinsics {
        CameraIntrinsics::from_slices(&[600.0, 0.0, 320.0, 0.0, 600.0, 240.0, 0.0, 0.0, 1.0], &[])
            .expect("camera")
    }

    fn small_board() -> TargetGeometry {
        TargetGeometry {
            square_size: 0.03,
            rows: 7,
            cols: 9,
        }
    }

    /// Ray-cast the board plane into a 640x480 image, 3x3 samples per pixel.
    /// Squares span one square beyond the outer inner corners; the rest is white.
    fn render_board(
        camera: &CameraIntrinsics,
        geometry: &TargetGeometry,
        rotation: &Rotation3<Real>,
        translation: &Vec3,
    ) -> GrayImage {
        let k_inv = camera.k().try_inverse().expect("invertible K");
        let rt = rotation.inverse();
        let origin = rt * *translation;
        let s = geometry.square_size;
        let (cols, rows) = (geometry.cols as Real, geometry.rows as Real);
        let is_white = |u: Real, v: Real| {
            let d = rt * (k_inv * Vec3::new(u, v, 1.0));
            let lambda = origin.z / d.z;
            if !(lambda.is_finite() && lambda > 0.0) {
                return true;
            }
            let p = d * lambda - origin;
            let (x, y) = (p.x / s, p.y / s);
            if x < -1.0 || x > cols || y < -1.0 || y > rows {
                return true;
            }
            (x.floor() as i64 + y.floor() as i64).rem_euclid(2) == 0
        };
        GrayImage::from_fn(640, 480, |u, v| {
            let mut sum: Real = 0.0;
            for sy in 0..3 {
                for sx in 0..3 {
                    let su = u as Real + (sx as Real - 1.0) / 3.0;
                    let sv = v as Real + (sy as Real - 1.0) / 3.0;
                    sum += if is_white(su, sv) { 220.0 } else { 30.0 };
                }
            }
            image::Luma([(sum / 9.0).round() as u8])
        })
    }

    fn assert_recovers(rotation: Rotation3<Real>, translation: Vec3) {
        let camera = wide_camera();
        let geometry = small_board();
        let img = render_board(&camera, &geometry, &rotation, &translation);

        let pose = ChessboardPoseSolver::default()
            .solve(&img, &camera, &geometry)
            .expect("board found");
        assert_eq!(pose.detection.corners.len(), 63);
        assert!(pose.rms_px < 0.5, "rms {}", pose.rms_px);

        let first = pose.image_corners()[0];
        let expected = camera
            .project(&(rotation * geometry.object_point(0, 0) + translation))
            .expect("in front");
        assert!((first - expected).norm() < 1.0, "origin at {first}, expected {expected}");

        let rotation_err = (pose.rotation * rotation.inverse()).angle();
        assert!(rotation_err < 5e-3, "rotation error {rotation_err} rad");
        let translation_err = (pose.translation - translation).norm();
        assert!(translation_err < 2e-3, "translation error {translation_err} m");
    }

    #[test]
    fn fronto_parallel_board_pose_is_recovered() {
        assert_recovers(Rotation3::identity(), Vec3::new(-0.12, -0.09, 0.6));
    }

    #[test]
    fn tilted_board_pose_is_recovered() {
        let rotation = Rotation3::from_euler_angles(0.2, 0.15, 0.05);
        let centre = small_board().object_point(4, 3).coords;
        let translation = Vec3::new(0.0, 0.0, 0.6) - rotation * centre;
        assert_recovers(rotation, translation);
    }

    #[test]
    fn blank_image_has_no_board() {
        let img = GrayImage::from_pixel(160, 120, image::Luma([128]));
        let err = ChessboardPoseSolver::default()
            .solve(&img, &camera(), &TargetGeometry::default())
            .expect_err("blank");
        assert!(!matches!(
            err,
            DetectError::Geometry(_) | DetectError::InvalidGrayDimensions { .. }
        ));
    }

    #[test]
    fn invalid_geometry_is_reported_before_detection() {
        let img = GrayImage::new(8, 8);
        let geometry = TargetGeometry {
            square_size: -1.0,
            ..TargetGeometry::default()
        };
        let err = ChessboardPoseSolver::default()
            .solve(&img, &camera(), &geometry)
            .expect_err("bad geometry");
        assert!(matches!(err, DetectError::Geometry(_)));
    }

    #[test]
    fn board_pose_transform_matches_parts() {
        let r = Rotation3::from_euler_angles(0.1, 0.2, 0.3);
        let t = Vec3::new(0.0, 0.0, 1.0);
        let pose = BoardPose::new(r, t);
        let m = pose.camera_to_board();
        assert_relative_eq!(m.rotation(), *r.matrix(), epsilon = 1e-12);
        assert_relative_eq!(m.translation(), t, epsilon = 1e-12);
        assert!(pose.image_corners().is_empty());
    }
}
