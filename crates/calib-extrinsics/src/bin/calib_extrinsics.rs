use std::error::Error;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use calib_extrinsics::app::{run, RunContext, StartupOverrides};
use calib_extrinsics::config::CalibConfig;
use calib_extrinsics::core::TargetGeometry;
use calib_extrinsics::input::StdinCommands;
use calib_extrinsics::source::load_intrinsics;
use calib_extrinsics::PoseSolver;
use clap::{Parser, Subcommand};
use log::{info, LevelFilter};

/// Two-camera chessboard extrinsic calibration.
#[derive(Debug, Parser)]
#[command(author, version, about = "Robot base / arm to camera extrinsics from a chessboard")]
struct Cli {
    /// Log level for the stderr logger.
    #[arg(long, global = true, default_value = "info")]
    log_level: LevelFilter,

    /// Emit JSON log lines (tracing builds only; filtered by RUST_LOG).
    #[cfg(feature = "tracing")]
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Debug, Subcommand)]
enum CliCommand {
    /// Interactive capture loop: `a` base-to-chess, `b` arm-to-depth, `q` quit.
    Run {
        /// JSON run configuration.
        #[arg(long)]
        config: PathBuf,
        /// Ignore the configured robot pose source; all frames at the origin.
        #[arg(long)]
        offline: bool,
        /// Previously persisted T_base_to_chess to start from.
        #[arg(long)]
        resume_base: Option<PathBuf>,
        /// Stop after this many cycles.
        #[arg(long)]
        max_cycles: Option<u64>,
    },
    /// Solve the chessboard pose in a single image and print T_camera_to_chess.
    Solve {
        #[arg(long)]
        image: PathBuf,
        /// Camera-info JSON (`{"k": [...], "d": [...]}`).
        #[arg(long)]
        camera_info: PathBuf,
        /// Board geometry and detector tuning; defaults if omitted.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Write a default run configuration.
    InitConfig {
        #[arg(long, default_value = "calib_extrinsics.json")]
        output: PathBuf,
    },
}

fn main() {
    if let Err(err) = try_main() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logging(&cli)?;

    match cli.command {
        CliCommand::Run {
            config,
            offline,
            resume_base,
            max_cycles,
        } => {
            let cfg = CalibConfig::load_json(&config)?;
            let overrides = StartupOverrides {
                offline,
                resume_base,
                max_cycles,
            };
            let mut ctx = RunContext::from_config(&cfg, &overrides)?;
            let mut commands = StdinCommands::spawn();
            let stop = Arc::new(AtomicBool::new(false));
            let flag = Arc::clone(&stop);
            ctrlc::set_handler(move || {
                info!("interrupt received, stopping after the current cycle");
                flag.store(true, Ordering::Relaxed);
            })?;
            let summary = run(&mut ctx, &mut commands, &stop)?;
            info!(
                "finished after {} cycle(s), {} result(s) written, {} command(s) rejected",
                summary.cycles,
                summary.outcomes.len(),
                summary.rejected
            );
        }
        CliCommand::Solve {
            image,
            camera_info,
            config,
        } => {
            let cfg = match config {
                Some(path) => CalibConfig::load_json(path)?,
                None => CalibConfig::default(),
            };
            let geometry: TargetGeometry = cfg.target;
            let camera = load_intrinsics(&camera_info)?;
            let img = image::open(&image)?.to_luma8();
            let pose = cfg.build_solver().solve(&img, &camera, &geometry)?;
            info!(
                "{} corners, reprojection rms {:.3} px",
                pose.detection.corners.len(),
                pose.rms_px
            );
            print!("{}", pose.camera_to_board());
        }
        CliCommand::InitConfig { output } => {
            CalibConfig::default().write_json(&output)?;
            println!("wrote {}", output.display());
        }
    }
    Ok(())
}

#[cfg(feature = "tracing")]
fn init_logging(cli: &Cli) -> Result<(), Box<dyn Error>> {
    calib_extrinsics::core::init_tracing(cli.log_json);
    log::debug!("--log-level {} ignored, filtering with RUST_LOG", cli.log_level);
    Ok(())
}

#[cfg(not(feature = "tracing"))]
fn init_logging(cli: &Cli) -> Result<(), Box<dyn Error>> {
    calib_extrinsics::core::init_with_level(cli.log_level)?;
    Ok(())
}
