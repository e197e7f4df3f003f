//! Robot kinematic poses.
//!
//! A provider answers "where is frame X in the robot base frame" with a
//! position and an `[x, y, z, w]` quaternion. Turning that into a rigid
//! transform (and rejecting malformed quaternions) is the caller's job.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use calib_extrinsics_core::Real;
use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug)]
pub enum RobotPoseError {
    #[error("failed to read robot poses from {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse robot poses from {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("frame {0:?} not available")]
    UnknownFrame(String),
}

/// Pose of a robot frame in the base frame (`T_base_to_frame`).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FramePose {
    pub position: [Real; 3],
    /// Quaternion `[x, y, z, w]`.
    pub orientation: [Real; 4],
}

impl FramePose {
    pub fn identity() -> Self {
        Self {
            position: [0.0; 3],
            orientation: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

pub trait RobotPoseProvider {
    fn frame_pose(&self, frame_id: &str) -> Result<FramePose, RobotPoseError>;
}

/// Offline / degraded mode: every frame sits at the base origin.
#[derive(Clone, Copy, Debug, Default)]
pub struct IdentityPoseProvider;

impl RobotPoseProvider for IdentityPoseProvider {
    fn frame_pose(&self, _frame_id: &str) -> Result<FramePose, RobotPoseError> {
        Ok(FramePose::identity())
    }
}

/// JSON document written by an external robot-state publisher.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PoseFile {
    pub frames: HashMap<String, FramePose>,
}

/// Reads a [`PoseFile`] on every query so the answer tracks the robot.
#[derive(Clone, Debug)]
pub struct PoseFileProvider {
    path: PathBuf,
}

impl PoseFileProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<PoseFile, RobotPoseError> {
        let raw = fs::read_to_string(&self.path).map_err(|source| RobotPoseError::Io {
            path: self.path.clone(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| RobotPoseError::Json {
            path: self.path.clone(),
            source,
        })
    }
}

impl RobotPoseProvider for PoseFileProvider {
    fn frame_pose(&self, frame_id: &str) -> Result<FramePose, RobotPoseError> {
        self.read()?
            .frames
            .get(frame_id)
            .copied()
            .ok_or_else(|| RobotPoseError::UnknownFrame(frame_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_provider_answers_any_frame() {
        let pose = IdentityPoseProvider.frame_pose("anything").expect("pose");
        assert_eq!(pose, FramePose::identity());
    }

    #[test]
    fn pose_file_is_reread_on_each_query() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("poses.json");
        let provider = PoseFileProvider::new(&path);
        assert!(matches!(
            provider.frame_pose("left_hand_camera"),
            Err(RobotPoseError::Io { .. })
        ));

        fs::write(
            &path,
            r#"{"frames": {"left_hand_camera": {"position": [0.1, 0.2, 0.3], "orientation": [0, 0, 0, 1]}}}"#,
        )
        .expect("write");
        let pose = provider.frame_pose("left_hand_camera").expect("pose");
        assert_eq!(pose.position, [0.1, 0.2, 0.3]);
        assert!(matches!(
            provider.frame_pose("left_lower_forearm"),
            Err(RobotPoseError::UnknownFrame(_))
        ));

        fs::write(&path, "not json").expect("write");
        assert!(matches!(
            provider.frame_pose("left_hand_camera"),
            Err(RobotPoseError::Json { .. })
        ));
    }
}
