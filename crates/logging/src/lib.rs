//! Logging for the session orchestrator
//!
//! This crate installs the process-wide `tracing` subscriber: an
//! `EnvFilter` (`RUST_LOG` wins over the configured level), human-readable
//! or JSON output, and an optional daily-rolling log file.

use anyhow::{anyhow, Context, Result};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, EnvFilter};

use orchestrator_config::LogSettings;

/// File name prefix of the rolling log
pub const LOG_FILE_PREFIX: &str = "sessiond.log";

/// Handle to the installed subscriber
///
/// Must be kept alive for the lifetime of the process when logging to a
/// file, otherwise buffered lines are lost on exit.
pub struct Logger {
    /// Flush guard of the non-blocking file writer
    _guard: Option<WorkerGuard>,
}

impl Logger {
    /// Installs the global subscriber
    pub fn init(settings: &LogSettings) -> Result<Self> {
        let filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => filter_for(&settings.level)?,
        };

        let (writer, guard) = match &settings.directory {
            Some(directory) => {
                let appender = tracing_appender::rolling::daily(directory, LOG_FILE_PREFIX);
                let (non_blocking, guard) = tracing_appender::non_blocking(appender);
                (BoxMakeWriter::new(non_blocking), Some(guard))
            }
            None => (BoxMakeWriter::new(std::io::stdout), None),
        };

        let builder = fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(writer);

        let installed = if settings.json {
            builder.json().try_init()
        } else {
            builder.try_init()
        };
        installed.map_err(|e| anyhow!("failed to install tracing subscriber: {}", e))?;

        info!(
            level = %settings.level,
            json = settings.json,
            directory = ?settings.directory,
            "Logging initialised"
        );

        Ok(Self { _guard: guard })
    }
}

/// Builds the filter for a configured level directive
pub fn filter_for(level: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(level).with_context(|| format!("invalid log level directive: {}", level))
}
