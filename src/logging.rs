//! Tracing subscriber setup.

use crate::config::LoggingConfig;
use crate::error::{FleetError, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// File name prefix of the rolling log.
pub const LOG_FILE_PREFIX: &str = "zkfleet.log";

/// Build the filter: `RUST_LOG` wins, then the configured level.
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("zkfleet=info"))
    })
}

/// Install the global subscriber: stderr always, plus a daily-rolling file
/// in `fleet_dirs::logs_dir()` when enabled.
///
/// The returned guard flushes the file writer on drop; hold it for the life
/// of the process.
///
/// # Errors
///
/// [`FleetError::Config`] if a global subscriber is already installed, or
/// [`FleetError::Io`] if the log directory cannot be created.
pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    init_with_dir(config, &crate::fleet_dirs::logs_dir())
}

/// [`init`] with an explicit log directory.
///
/// # Errors
///
/// Same as [`init`].
pub fn init_with_dir(config: &LoggingConfig, logs_dir: &Path) -> Result<Option<WorkerGuard>> {
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);

    let (file_layer, guard) = if config.file_enabled {
        std::fs::create_dir_all(logs_dir)?;
        let appender = tracing_appender::rolling::daily(logs_dir, LOG_FILE_PREFIX);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(true);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(env_filter(config))
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| FleetError::Config(format!("cannot install log subscriber: {e}")))?;

    Ok(guard)
}
