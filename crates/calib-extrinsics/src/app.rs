//! Interactive capture loop and its construction from a [`CalibConfig`].

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use image::{DynamicImage, RgbImage};
use log::{info, warn};

use crate::capture::Command;
use crate::config::{CalibConfig, ConfigError, RobotSource};
use crate::draw::{annotate, compose_side_by_side};
use crate::input::CommandInput;
use crate::robot::{IdentityPoseProvider, PoseFileProvider, RobotPoseProvider};
use crate::session::{CalibrationSession, CaptureError, CaptureOutcome, CycleResult, ResultSinks};
use crate::sink::{
    read_matrix_file, NullVisualizationSink, PngVisualizationSink, SinkError, TextMatrixSink,
    VisualizationSink,
};
use crate::solver::Channel;
use crate::source::{AcquireError, FileImageSource, ImageSource};

#[derive(thiserror::Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Acquire(#[from] AcquireError),
    #[error("failed to load resume matrix: {0}")]
    Resume(#[source] SinkError),
    #[error("output folder {0} does not exist")]
    MissingOutputFolder(PathBuf),
    #[error("capture aborted: {0}")]
    Capture(#[from] CaptureError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunOptions {
    pub command_timeout: Duration,
    pub cycle_pause: Duration,
    /// Stop after this many cycles; runs until quit when unset.
    pub max_cycles: Option<u64>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_millis(1000),
            cycle_pause: Duration::from_millis(50),
            max_cycles: None,
        }
    }
}

/// What happened during a run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunSummary {
    pub cycles: u64,
    pub outcomes: Vec<CaptureOutcome>,
    pub rejected: usize,
}

/// Everything [`run`] needs besides the command input.
pub struct RunContext {
    pub session: CalibrationSession,
    pub color: Box<dyn ImageSource>,
    pub depth: Box<dyn ImageSource>,
    pub visualization: Box<dyn VisualizationSink>,
    pub options: RunOptions,
}

/// Startup overrides from the command line.
#[derive(Clone, Debug, Default)]
pub struct StartupOverrides {
    pub offline: bool,
    pub resume_base: Option<PathBuf>,
    pub max_cycles: Option<u64>,
}

impl RunContext {
    /// Load intrinsics, wire collaborators and apply overrides.
    pub fn from_config(cfg: &CalibConfig, overrides: &StartupOverrides) -> Result<Self, RunError> {
        cfg.validate()?;
        if !cfg.output.folder.is_dir() {
            return Err(RunError::MissingOutputFolder(cfg.output.folder.clone()));
        }

        let color = FileImageSource::from_camera_info(
            &cfg.color_camera.image_path,
            &cfg.color_camera.camera_info_path,
        )?;
        let depth = FileImageSource::from_camera_info(
            &cfg.depth_camera.image_path,
            &cfg.depth_camera.camera_info_path,
        )?;
        info!("color intrinsics: {:?}", color.intrinsics());
        info!("depth intrinsics: {:?}", depth.intrinsics());

        let robot: Box<dyn RobotPoseProvider> = match (&cfg.robot.source, overrides.offline) {
            (RobotSource::PoseFile { path }, false) => {
                info!("robot poses from {}", path.display());
                Box::new(PoseFileProvider::new(path))
            }
            _ => {
                info!("offline mode: robot frames at the base origin");
                Box::new(IdentityPoseProvider)
            }
        };

        let mut session = CalibrationSession::new(
            Box::new(cfg.build_solver()),
            cfg.target,
            *color.intrinsics(),
            *depth.intrinsics(),
            robot,
            cfg.robot.frames(),
            ResultSinks {
                base_to_chess: Box::new(TextMatrixSink::new(cfg.output.base_to_chess_path())),
                arm_to_depth: Box::new(TextMatrixSink::new(cfg.output.arm_to_depth_path())),
            },
        );
        if let Some(path) = &overrides.resume_base {
            session.preload_base(load_resume(path)?);
        }

        let visualization: Box<dyn VisualizationSink> = match &cfg.output.visualization_path {
            Some(path) => Box::new(PngVisualizationSink::new(path)),
            None => Box::new(NullVisualizationSink),
        };

        Ok(Self {
            session,
            color: Box::new(color),
            depth: Box::new(depth),
            visualization,
            options: RunOptions {
                command_timeout: Duration::from_millis(cfg.timing.command_timeout_ms),
                cycle_pause: Duration::from_millis(cfg.timing.cycle_pause_ms),
                max_cycles: overrides.max_cycles,
            },
        })
    }
}

fn load_resume(path: &Path) -> Result<calib_extrinsics_core::HomogeneousTransform, RunError> {
    read_matrix_file(path).map_err(RunError::Resume)
}

/// Acquire, detect, visualize, poll, capture, pause; until `q`, `stop` or
/// `max_cycles`.
///
/// Acquisition, detection, persistence and robot-pose failures are logged and
/// the loop carries on. A malformed transform ends the run with an error.
pub fn run(
    ctx: &mut RunContext,
    commands: &mut dyn CommandInput,
    stop: &AtomicBool,
) -> Result<RunSummary, RunError> {
    let mut summary = RunSummary::default();
    let opts = ctx.options;

    while !stop.load(Ordering::Relaxed) {
        if opts.max_cycles.is_some_and(|max| summary.cycles >= max) {
            break;
        }
        summary.cycles += 1;

        let frames = match (ctx.color.acquire(), ctx.depth.acquire()) {
            (Ok(c), Ok(d)) => Some((c, d)),
            (Err(e), _) | (_, Err(e)) => {
                warn!("frame acquisition failed: {e}");
                None
            }
        };

        let result = frames.map(|(color, depth)| {
            let result = ctx
                .session
                .evaluate_cycle(&color.to_luma8(), &depth.to_luma8());
            log_cycle(&result);
            publish(ctx, &color, &depth, &result);
            result
        });

        match (commands.poll(opts.command_timeout), &result) {
            (Some(Command::Quit), _) => {
                info!("quit requested");
                break;
            }
            (Some(cmd), Some(result)) => match ctx.session.dispatch(cmd, result) {
                Ok(Some(outcome)) => summary.outcomes.push(outcome),
                Ok(None) => {}
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    warn!("{cmd:?} rejected: {e}");
                    summary.rejected += 1;
                }
            },
            (Some(cmd), None) => {
                warn!("{cmd:?} rejected: no frames this cycle");
                summary.rejected += 1;
            }
            (None, _) => {}
        }

        if !opts.cycle_pause.is_zero() {
            thread::sleep(opts.cycle_pause);
        }
    }
    Ok(summary)
}

fn log_cycle(result: &CycleResult) {
    for (channel, pose) in [(Channel::Color, &result.color), (Channel::Depth, &result.depth)] {
        match pose {
            Ok(p) => {
                let t = p.translation;
                info!(
                    "cycle {} {channel}: chessboard at ({:.3}, {:.3}, {:.3}) m, rms {:.2} px",
                    result.cycle, t.x, t.y, t.z, p.rms_px
                );
            }
            Err(e) => warn!("cycle {} {channel}: {e}", result.cycle),
        }
    }
}

fn publish(ctx: &mut RunContext, color: &DynamicImage, depth: &DynamicImage, result: &CycleResult) {
    let mut panels: [RgbImage; 2] = [color.to_rgb8(), depth.to_rgb8()];
    for (panel, (channel, pose)) in panels
        .iter_mut()
        .zip([(Channel::Color, &result.color), (Channel::Depth, &result.depth)])
    {
        if let Ok(pose) = pose {
            annotate(panel, pose, ctx.session.intrinsics(channel), ctx.session.geometry());
        }
    }
    let [left, right] = panels;
    if let Err(e) = ctx.visualization.publish(&compose_side_by_side(&left, &right)) {
        warn!("visualization skipped: {e}");
    }
}
