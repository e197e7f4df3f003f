//! Calibration session: per-cycle board poses and the two capture commands.
//!
//! A cycle is a pure detection step producing a [`CycleResult`]; commands are
//! dispatched against that result afterwards, so a capture always uses the
//! detections of the cycle it was issued in.

use calib_extrinsics_core::{CameraIntrinsics, HomogeneousTransform, TargetGeometry, TransformError};
use image::GrayImage;
use log::{info, warn};

use crate::capture::{CaptureState, Command};
use crate::robot::{RobotPoseError, RobotPoseProvider};
use crate::sink::{MatrixSink, SinkError};
use crate::solver::{BoardPose, Channel, DetectError, PoseSolver};

#[derive(thiserror::Error, Debug)]
pub enum CaptureError {
    #[error("{channel} camera has no board pose this cycle: {source}")]
    Detection {
        channel: Channel,
        #[source]
        source: DetectError,
    },
    #[error("T_base_to_chess is not available yet, press a to compute it first")]
    MissingBaseCapture,
    #[error("robot pose unavailable: {0}")]
    RobotPose(#[from] RobotPoseError),
    #[error("malformed transform: {0}")]
    MalformedTransform(#[from] TransformError),
    #[error("failed to persist result: {0}")]
    Persist(#[from] SinkError),
}

impl CaptureError {
    /// Only a broken rigid invariant ends the run loop; everything else is
    /// retried on a later cycle.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::MalformedTransform(_))
    }
}

/// Both channels' board poses for one cycle.
#[derive(Clone, Debug)]
pub struct CycleResult {
    pub cycle: u64,
    pub color: Result<BoardPose, DetectError>,
    pub depth: Result<BoardPose, DetectError>,
}

impl CycleResult {
    pub fn pose(&self, channel: Channel) -> Result<&BoardPose, CaptureError> {
        let result = match channel {
            Channel::Color => &self.color,
            Channel::Depth => &self.depth,
        };
        result.as_ref().map_err(|source| CaptureError::Detection {
            channel,
            source: source.clone(),
        })
    }
}

/// A persisted calibration result.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CaptureOutcome {
    BaseToChess(HomogeneousTransform),
    ArmToDepth(HomogeneousTransform),
}

/// Robot frame ids queried from the pose provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RobotFrames {
    /// Frame of the colour camera (`T_base_to_color`).
    pub camera: String,
    /// Kinematic frame the depth camera is mounted to (`T_base_to_arm`).
    pub depth_mount: String,
}

pub struct ResultSinks {
    pub base_to_chess: Box<dyn MatrixSink>,
    pub arm_to_depth: Box<dyn MatrixSink>,
}

pub struct CalibrationSession {
    solver: Box<dyn PoseSolver>,
    geometry: TargetGeometry,
    color_camera: CameraIntrinsics,
    depth_camera: CameraIntrinsics,
    robot: Box<dyn RobotPoseProvider>,
    frames: RobotFrames,
    sinks: ResultSinks,
    state: CaptureState,
    cycle: u64,
}

impl CalibrationSession {
    pub fn new(
        solver: Box<dyn PoseSolver>,
        geometry: TargetGeometry,
        color_camera: CameraIntrinsics,
        depth_camera: CameraIntrinsics,
        robot: Box<dyn RobotPoseProvider>,
        frames: RobotFrames,
        sinks: ResultSinks,
    ) -> Self {
        Self {
            solver,
            geometry,
            color_camera,
            depth_camera,
            robot,
            frames,
            sinks,
            state: CaptureState::default(),
            cycle: 0,
        }
    }

    pub fn geometry(&self) -> &TargetGeometry {
        &self.geometry
    }

    pub fn intrinsics(&self, channel: Channel) -> &CameraIntrinsics {
        match channel {
            Channel::Color => &self.color_camera,
            Channel::Depth => &self.depth_camera,
        }
    }

    pub fn state(&self) -> &CaptureState {
        &self.state
    }

    /// Number of cycles evaluated so far.
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Seed `T_base_to_chess` from an earlier run.
    pub fn preload_base(&mut self, base_to_chess: HomogeneousTransform) {
        info!("preloaded T_base_to_chess:\n{base_to_chess}");
        self.state = self.state.with_base_capture(base_to_chess, None);
    }

    /// Solve the board pose in both frames. Never touches the capture state.
    pub fn evaluate_cycle(&mut self, color: &GrayImage, depth: &GrayImage) -> CycleResult {
        self.cycle += 1;
        CycleResult {
            cycle: self.cycle,
            color: self
                .solver
                .solve(color, &self.color_camera, &self.geometry),
            depth: self
                .solver
                .solve(depth, &self.depth_camera, &self.geometry),
        }
    }

    /// Run the capture bound to `command`; `Quit` is left to the caller.
    pub fn dispatch(
        &mut self,
        command: Command,
        cycle: &CycleResult,
    ) -> Result<Option<CaptureOutcome>, CaptureError> {
        match command {
            Command::CaptureBase => self
                .capture_base_to_chess(cycle)
                .map(|t| Some(CaptureOutcome::BaseToChess(t))),
            Command::CaptureArm => self
                .capture_arm_to_depth(cycle)
                .map(|t| Some(CaptureOutcome::ArmToDepth(t))),
            Command::Quit => Ok(None),
        }
    }

    /// `T_base_to_chess = T_base_to_color · T_color_to_chess`; persisted, then stored.
    pub fn capture_base_to_chess(
        &mut self,
        cycle: &CycleResult,
    ) -> Result<HomogeneousTransform, CaptureError> {
        let color_to_chess = cycle.pose(Channel::Color)?.camera_to_board();
        let base_to_color = self.frame_transform(&self.frames.camera)?;
        let base_to_chess = base_to_color.compose(&color_to_chess);

        self.sinks.base_to_chess.persist(&base_to_chess)?;
        self.state = self.state.with_base_capture(base_to_chess, Some(cycle.cycle));
        info!("T_base_to_chess:\n{base_to_chess}");
        Ok(base_to_chess)
    }

    /// `T_arm_to_depth = T_arm_to_base · T_base_to_chess · T_chess_to_depth`.
    pub fn capture_arm_to_depth(
        &mut self,
        cycle: &CycleResult,
    ) -> Result<HomogeneousTransform, CaptureError> {
        let base_to_chess = *self
            .state
            .base_to_chess()
            .ok_or(CaptureError::MissingBaseCapture)?;
        match self.state.age(cycle.cycle) {
            Some(age) => info!("using T_base_to_chess captured {age} cycle(s) ago"),
            None => info!("using preloaded T_base_to_chess"),
        }

        let chess_to_depth = cycle.pose(Channel::Depth)?.camera_to_board().invert();
        let arm_to_base = self.frame_transform(&self.frames.depth_mount)?.invert();
        let arm_to_depth = arm_to_base.compose(&base_to_chess).compose(&chess_to_depth);

        self.sinks.arm_to_depth.persist(&arm_to_depth)?;
        info!("T_arm_to_depth:\n{arm_to_depth}");
        Ok(arm_to_depth)
    }

    fn frame_transform(&self, frame: &str) -> Result<HomogeneousTransform, CaptureError> {
        let pose = self.robot.frame_pose(frame)?;
        HomogeneousTransform::from_position_quaternion(pose.position, pose.orientation).map_err(|e| {
            warn!("robot frame {frame:?} has a malformed pose: {e}");
            CaptureError::MalformedTransform(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::robot::{FramePose, IdentityPoseProvider};
    use calib_extrinsics_core::Vec3;
    use nalgebra::Rotation3;

    struct NoSink;

    impl MatrixSink for NoSink {
        fn persist(&mut self, _transform: &HomogeneousTransform) -> Result<(), SinkError> {
            Ok(())
        }
    }

    struct FixedSolver(Vec3);

    impl PoseSolver for FixedSolver {
        fn solve(
            &self,
            _image: &GrayImage,
            _camera: &CameraIntrinsics,
            _geometry: &TargetGeometry,
        ) -> Result<BoardPose, DetectError> {
            Ok(BoardPose::new(Rotation3::identity(), self.0))
        }
    }

    struct BrokenRobot;

    impl RobotPoseProvider for BrokenRobot {
        fn frame_pose(&self, _frame_id: &str) -> Result<FramePose, RobotPoseError> {
            Ok(FramePose {
                position: [0.0; 3],
                orientation: [0.0, 0.0, 0.0, 3.0],
            })
        }
    }

    fn session(robot: Box<dyn RobotPoseProvider>) -> CalibrationSession {
        let camera = CameraIntrinsics::from_slices(
            &[500.0, 0.0, 32.0, 0.0, 500.0, 24.0, 0.0, 0.0, 1.0],
            &[],
        )
        .expect("camera");
        CalibrationSession::new(
            Box::new(FixedSolver(Vec3::new(0.0, 0.0, 1.0))),
            TargetGeometry::default(),
            camera,
            camera,
            robot,
            RobotFrames {
                camera: "left_hand_camera".into(),
                depth_mount: "left_lower_forearm".into(),
            },
            ResultSinks {
                base_to_chess: Box::new(NoSink),
                arm_to_depth: Box::new(NoSink),
            },
        )
    }

    #[test]
    fn cycles_are_numbered_and_leave_state_alone() {
        let mut s = session(Box::new(IdentityPoseProvider));
        let img = GrayImage::new(4, 4);
        let first = s.evaluate_cycle(&img, &img);
        let second = s.evaluate_cycle(&img, &img);
        assert_eq!((first.cycle, second.cycle), (1, 2));
        assert!(second.color.is_ok() && second.depth.is_ok());
        assert_eq!(*s.state(), CaptureState::NoBaseCapture);
    }

    #[test]
    fn malformed_robot_pose_is_fatal() {
        let mut s = session(Box::new(BrokenRobot));
        let img = GrayImage::new(4, 4);
        let cycle = s.evaluate_cycle(&img, &img);
        let err = s
            .dispatch(Command::CaptureBase, &cycle)
            .expect_err("malformed quaternion");
        assert!(err.is_fatal());
        assert_eq!(*s.state(), CaptureState::NoBaseCapture);
        assert!(!CaptureError::MissingBaseCapture.is_fatal());
    }

    #[test]
    fn quit_is_not_a_capture() {
        let mut s = session(Box::new(IdentityPoseProvider));
        let img = GrayImage::new(4, 4);
        let cycle = s.evaluate_cycle(&img, &img);
        assert_eq!(s.dispatch(Command::Quit, &cycle).expect("quit"), None);
    }
}
