//! Logging setup for the backup binary.
//!
//! Log lines go to stderr or are appended to a file. `RUST_LOG`, when set,
//! overrides the configured level.

use std::io;
use std::str::FromStr;
use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::ambient_authority;
use cap_std::fs_utf8::{Dir, File, OpenOptions};
use thiserror::Error;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Level used when nothing else is configured.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Where and how verbosely to log.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LoggingOptions {
    /// Level filter such as `info` or `debug`.
    pub level: String,
    /// Destination file; stderr when `None`.
    pub file: Option<Utf8PathBuf>,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_owned(),
            file: None,
        }
    }
}

/// Errors raised while installing the subscriber.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The configured level is not a recognised filter.
    #[error("invalid log level {0:?}: expected off, error, warn, info, debug or trace")]
    InvalidLevel(String),
    /// The log file could not be opened for appending.
    #[error("failed to open log file {path}: {source}")]
    OpenFile {
        /// Configured log file.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// A global subscriber was already installed.
    #[error("failed to install tracing subscriber: {0}")]
    Install(String),
}

/// Parses a configured level, ignoring case and surrounding whitespace.
///
/// # Errors
///
/// Returns [`TelemetryError::InvalidLevel`] for unknown levels.
pub fn parse_level(level: &str) -> Result<LevelFilter, TelemetryError> {
    let trimmed = level.trim();
    // `LevelFilter` parses an empty string as `OFF`.
    if trimmed.is_empty() {
        return Err(TelemetryError::InvalidLevel(level.to_owned()));
    }
    LevelFilter::from_str(trimmed).map_err(|_| TelemetryError::InvalidLevel(level.to_owned()))
}

/// Installs the global tracing subscriber.
///
/// # Errors
///
/// Returns [`TelemetryError`] when the level is invalid, the log file cannot
/// be opened, or a subscriber is already installed.
pub fn init_logging(options: &LoggingOptions) -> Result<(), TelemetryError> {
    let filter = build_env_filter(parse_level(&options.level)?);
    let registry = tracing_subscriber::registry().with(filter);

    match &options.file {
        Some(path) => {
            let file = open_log_file(path)?;
            registry
                .with(
                    fmt::layer()
                        .with_target(false)
                        .with_ansi(false)
                        .with_writer(Mutex::new(file.into_std())),
                )
                .try_init()
        }
        None => registry
            .with(fmt::layer().with_target(false).with_writer(io::stderr))
            .try_init(),
    }
    .map_err(|err| TelemetryError::Install(err.to_string()))
}

fn build_env_filter(level: LevelFilter) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()))
}

/// Opens `path` for appending, creating it when missing.
///
/// # Errors
///
/// Returns [`TelemetryError::OpenFile`] when the parent directory or the file
/// cannot be opened.
pub fn open_log_file(path: &Utf8Path) -> Result<File, TelemetryError> {
    let open_error = |source| TelemetryError::OpenFile {
        path: path.to_owned(),
        source,
    };
    let parent = path
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    let file_name = path.file_name().ok_or_else(|| {
        open_error(io::Error::new(
            io::ErrorKind::InvalidInput,
            "log file path has no file name",
        ))
    })?;

    let dir = Dir::open_ambient_dir(parent, ambient_authority()).map_err(open_error)?;
    let mut options = OpenOptions::new();
    options.create(true).append(true);
    dir.open_with(file_name, &options).map_err(open_error)
}
