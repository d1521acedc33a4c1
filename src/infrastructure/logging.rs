//! Logging setup
//!
//! Console output always; optional daily rolling JSON files when a log
//! directory is configured. Pipeline code logs through the target macros
//! below so consumer and producer output can be filtered independently,
//! e.g. `RUST_LOG=consumer=debug,producer=warn`.

use crate::infrastructure::config::LoggingConfig;
use crate::{RelayError, Result};
use std::fs;
use std::path::Path;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging
///
/// Returns the file writer guard when file output is enabled; it must be
/// kept alive for the duration of the program or buffered lines are lost.
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let (json_console, plain_console) = if config.json {
        (Some(tracing_subscriber::fmt::layer().with_target(true).json()), None)
    } else {
        (None, Some(tracing_subscriber::fmt::layer().with_target(true)))
    };

    let mut guard = None;
    let file_layer = match &config.directory {
        Some(dir) => {
            ensure_log_dir(dir)?;
            let (writer, file_guard) = create_appender(dir, "relay.log");
            guard = Some(file_guard);
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_target(true)
                    .with_level(true)
                    .with_thread_ids(true)
                    .with_thread_names(true)
                    .json(),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json_console)
        .with(plain_console)
        .with(file_layer)
        .try_init()
        .map_err(|e| RelayError::fatal("failed to install log subscriber", e))?;

    crate::log_main!(
        tracing::Level::INFO,
        directory = ?config.directory,
        "Logging initialized"
    );

    Ok(guard)
}

fn ensure_log_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        fs::create_dir_all(dir)?;
    }
    Ok(())
}

/// Create a rolling file appender
fn create_appender(dir: &Path, name: &str) -> (NonBlocking, WorkerGuard) {
    let appender = RollingFileAppender::new(Rotation::DAILY, dir, name);
    tracing_appender::non_blocking(appender)
}

/// Log macro helpers for specific log targets
#[macro_export]
macro_rules! log_consumer {
    ($level:expr, $($arg:tt)+) => {
        tracing::event!(target: "consumer", $level, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_producer {
    ($level:expr, $($arg:tt)+) => {
        tracing::event!(target: "producer", $level, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_broker {
    ($level:expr, $($arg:tt)+) => {
        tracing::event!(target: "broker", $level, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_main {
    ($level:expr, $($arg:tt)+) => {
        tracing::event!(target: "main", $level, $($arg)+)
    };
}
