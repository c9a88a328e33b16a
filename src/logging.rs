//! Tracing subscriber setup.
//!
//! Library code only emits `tracing` events; installing a subscriber is left
//! to binaries and tests through [`init_tracing`].

use crate::error::{DbError, DbResult};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Layer, fmt, prelude::*};

/// Environment variable consulted when `RUST_LOG` is not set.
pub const LOG_LEVEL_ENV: &str = "SORCERERDB_LOG_LEVEL";

/// Environment variable naming the log file.
pub const LOG_FILE_ENV: &str = "SORCERERDB_LOG_FILE";

pub const DEFAULT_LOG_FILE: &str = "sorcererdb.log";

/// Log files rotate daily; this many are kept.
pub const LOG_RETENTION_DAYS: usize = 7;

/// Keeps the background log-file writer alive. Dropping it flushes
/// pending lines, so hold it until the program exits.
#[must_use]
#[derive(Debug, Default)]
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// Resolve the filter: `RUST_LOG`, then `SORCERERDB_LOG_LEVEL`, then `level`.
pub fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_from_env(LOG_LEVEL_ENV))
        .unwrap_or_else(|_| EnvFilter::new(level))
}

/// Daily-rotating appender for `path`, keeping [`LOG_RETENTION_DAYS`] files.
///
/// Files are named `<file name>.<date>` inside the parent directory of `path`.
pub fn file_appender(path: &Path) -> DbResult<RollingFileAppender> {
    let prefix = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| {
            DbError::invalid_config(format!("log file '{}' has no file name", path.display()))
        })?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(prefix)
        .max_log_files(LOG_RETENTION_DAYS)
        .build(dir)
        .map_err(|e| {
            DbError::invalid_config(format!("cannot open log file '{}': {}", path.display(), e))
        })
}

/// Initialize the global tracing subscriber, writing to stderr and, when
/// `log_file` is given, to a rotating file as well.
///
/// Returns `Ok(None)` if a subscriber was already installed.
pub fn init_tracing(level: &str, json: bool, log_file: Option<&Path>) -> DbResult<Option<LogGuard>> {
    let stderr = if json {
        fmt::layer().json().with_writer(std::io::stderr).boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_writer(std::io::stderr)
            .boxed()
    };

    let (file, guard) = match log_file {
        Some(path) => {
            let (writer, guard) = tracing_appender::non_blocking(file_appender(path)?);
            let layer = if json {
                fmt::layer().json().with_writer(writer).boxed()
            } else {
                fmt::layer().with_ansi(false).with_writer(writer).boxed()
            };
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let installed = tracing_subscriber::registry()
        .with(env_filter(level))
        .with(stderr)
        .with(file)
        .try_init()
        .is_ok();

    Ok(installed.then_some(LogGuard { _file: guard }))
}
