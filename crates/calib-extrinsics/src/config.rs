//! JSON run configuration.

use std::fs;
use std::path::{Path, PathBuf};

use calib_extrinsics_chessboard::ChessboardParams;
use calib_extrinsics_core::{PoseRefineParams, TargetGeometry, TargetGeometryError};
use serde::{Deserialize, Serialize};

use crate::detect::DEFAULT_CHESS_THRESHOLD_REL;
use crate::session::RobotFrames;
use crate::solver::ChessboardPoseSolver;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Geometry(#[from] TargetGeometryError),
    #[error("chess_threshold_rel must be in (0, 1], got {0}")]
    BadThreshold(f32),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub folder: PathBuf,
    pub base_to_chess_file: String,
    pub arm_to_depth_file: String,
    /// Latest annotated frame pair; no visualization when unset.
    pub visualization_path: Option<PathBuf>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            folder: PathBuf::from("."),
            base_to_chess_file: "T_base_to_chess.txt".to_string(),
            arm_to_depth_file: "T_arm_to_depth.txt".to_string(),
            visualization_path: None,
        }
    }
}

impl OutputConfig {
    pub fn base_to_chess_path(&self) -> PathBuf {
        self.folder.join(&self.base_to_chess_file)
    }

    pub fn arm_to_depth_path(&self) -> PathBuf {
        self.folder.join(&self.arm_to_depth_file)
    }
}

/// One camera channel: the frame file an external grabber keeps updating
/// and its camera-info JSON.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    pub image_path: PathBuf,
    pub camera_info_path: PathBuf,
}

impl CameraConfig {
    fn named(name: &str) -> Self {
        Self {
            image_path: PathBuf::from(format!("{name}.png")),
            camera_info_path: PathBuf::from(format!("{name}_info.json")),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RobotSource {
    /// Every robot frame at the base origin.
    #[default]
    Offline,
    PoseFile { path: PathBuf },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RobotConfig {
    pub source: RobotSource,
    pub camera_frame: String,
    pub depth_mount_frame: String,
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            source: RobotSource::Offline,
            camera_frame: "left_hand_camera".to_string(),
            depth_mount_frame: "left_lower_forearm".to_string(),
        }
    }
}

impl RobotConfig {
    pub fn frames(&self) -> RobotFrames {
        RobotFrames {
            camera: self.camera_frame.clone(),
            depth_mount: self.depth_mount_frame.clone(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Bounded wait for a key each cycle.
    pub command_timeout_ms: u64,
    /// Pause at the end of each cycle.
    pub cycle_pause_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: 1000,
            cycle_pause_ms: 50,
        }
    }
}

/// Configuration for `calib-extrinsics run`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibConfig {
    pub target: TargetGeometry,
    pub output: OutputConfig,
    pub color_camera: CameraConfig,
    pub depth_camera: CameraConfig,
    pub robot: RobotConfig,
    pub timing: TimingConfig,
    pub chess_threshold_rel: f32,
    pub chessboard: Option<ChessboardParams>,
    pub pose: Option<PoseRefineParams>,
}

impl Default for CalibConfig {
    fn default() -> Self {
        Self {
            target: TargetGeometry::default(),
            output: OutputConfig::default(),
            color_camera: CameraConfig::named("color"),
            depth_camera: CameraConfig::named("depth"),
            robot: RobotConfig::default(),
            timing: TimingConfig::default(),
            chess_threshold_rel: DEFAULT_CHESS_THRESHOLD_REL,
            chessboard: None,
            pose: None,
        }
    }
}

impl CalibConfig {
    /// Load and validate a JSON config from disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        let cfg: Self = serde_json::from_str(&raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Write this config to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.target.validate()?;
        if !(self.chess_threshold_rel > 0.0 && self.chess_threshold_rel <= 1.0) {
            return Err(ConfigError::BadThreshold(self.chess_threshold_rel));
        }
        Ok(())
    }

    /// Build a pose solver, applying overrides from the config.
    pub fn build_solver(&self) -> ChessboardPoseSolver {
        let board = self
            .chessboard
            .clone()
            .unwrap_or_else(|| ChessboardParams::for_board(self.target.rows, self.target.cols));
        ChessboardPoseSolver::new(
            self.chess_threshold_rel,
            board,
            self.pose.clone().unwrap_or_default(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_json() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("calib.json");
        let cfg = CalibConfig::default();
        cfg.write_json(&path).expect("write");
        assert_eq!(CalibConfig::load_json(&path).expect("load"), cfg);
    }

    #[test]
    fn partial_config_uses_defaults() {
        let cfg: CalibConfig = serde_json::from_str(
            r#"{
                "target": {"square_size": 0.025, "rows": 6, "cols": 8},
                "robot": {"source": {"mode": "pose_file", "path": "poses.json"}},
                "output": {"folder": "/tmp/out"}
            }"#,
        )
        .expect("parse");
        assert_eq!(cfg.target.rows, 6);
        assert_eq!(
            cfg.robot.source,
            RobotSource::PoseFile {
                path: PathBuf::from("poses.json")
            }
        );
        assert_eq!(cfg.robot.camera_frame, "left_hand_camera");
        assert_eq!(
            cfg.output.base_to_chess_path(),
            PathBuf::from("/tmp/out/T_base_to_chess.txt")
        );
        assert_eq!(cfg.timing.command_timeout_ms, 1000);

        let solver = cfg.build_solver();
        assert_eq!((solver.board.expected_rows, solver.board.expected_cols), (6, 8));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut cfg = CalibConfig::default();
        cfg.chess_threshold_rel = 0.0;
        assert!(matches!(cfg.validate(), Err(ConfigError::BadThreshold(_))));

        let mut cfg = CalibConfig::default();
        cfg.target.square_size = 0.0;
        assert!(matches!(cfg.validate(), Err(ConfigError::Geometry(_))));
    }
}
