//! Minimal logger.
//!
//! Prints `[elapsed LEVEL target] message` to stderr. Install once at
//! startup with [`init_with_level`]; with the `tracing` feature,
//! [`init_tracing`] installs a `tracing` subscriber instead and forwards
//! `log` records into it.

use std::io::Write;
use std::sync::OnceLock;
use std::time::Instant;

use log::{LevelFilter, Log, Metadata, Record};

struct SimpleLogger {
    level: LevelFilter,
    started: Instant,
}

impl Log for SimpleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let elapsed = self.started.elapsed().as_secs_f64();
        let _ = writeln!(
            std::io::stderr().lock(),
            "[{:8.3}s {:>5} {}] {}",
            elapsed,
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

static LOGGER: OnceLock<SimpleLogger> = OnceLock::new();

/// Install the simple logger with the provided level filter.
///
/// Calling this more than once is a no-op after the first successful
/// initialization.
pub fn init_with_level(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    if LOGGER.get().is_none() {
        let logger = LOGGER.get_or_init(|| SimpleLogger {
            level,
            started: Instant::now(),
        });
        log::set_logger(logger)?;
        log::set_max_level(level);
    }
    Ok(())
}

/// Install a global `tracing` subscriber filtered by `RUST_LOG` (default
/// `info`) and bridge `log` records into it.
#[cfg(feature = "tracing")]
pub fn init_tracing(json: bool) {
    use tracing_subscriber::fmt::format::FmtSpan;
    use tracing_subscriber::{fmt, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_log::LogTracer::init();
    let result = if json {
        tracing::subscriber::set_global_default(
            fmt()
                .with_env_filter(filter)
                .with_span_events(FmtSpan::CLOSE)
                .json()
                .flatten_event(true)
                .finish(),
        )
    } else {
        tracing::subscriber::set_global_default(
            fmt()
                .with_env_filter(filter)
                .with_span_events(FmtSpan::CLOSE)
                .with_timer(fmt::time::Uptime::default())
                .finish(),
        )
    };
    if result.is_err() {
        log::debug!("tracing subscriber already installed");
    }
}
