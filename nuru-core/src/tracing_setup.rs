//! Logging for the `nuru` binary
//!
//! The console shows what the operator asked for. A second layer writes
//! every event, TRACE included, to a per-run file that the next run
//! overwrites, so a failed playback can be reconstructed after the fact.

use std::fs::{File, create_dir_all};
use std::io;
use std::path::{Path, PathBuf};

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// Per-run log written inside the logs directory.
pub const LOG_FILE_NAME: &str = "nuru-last-run.log";

/// Console filter override, checked before `RUST_LOG`.
pub const LOG_ENV: &str = "NURU_LOG";

/// Chatty dependencies held back on the console whatever the level.
const QUIET_DEPENDENCIES: &[&str] = &["hyper=warn", "hyper_util=warn", "tower_http=info"];

#[derive(Debug, thiserror::Error)]
pub enum TracingError {
    #[error("cannot create logs directory {path}: {source}")]
    LogsDir { path: PathBuf, source: io::Error },

    #[error("cannot open log file {path}: {source}")]
    LogFile { path: PathBuf, source: io::Error },

    #[error("a global tracing subscriber is already installed: {0}")]
    AlreadyInstalled(#[from] TryInitError),
}

/// Installs the console and file layers and returns the log file path.
///
/// # Errors
///
/// - `TracingError::LogsDir` / `LogFile` - The log file cannot be created
/// - `TracingError::AlreadyInstalled` - Called twice in one process
pub fn init_tracing(console_level: Level, logs_dir: Option<&Path>) -> Result<PathBuf, TracingError> {
    let logs_dir = logs_dir.unwrap_or_else(|| Path::new("logs"));
    create_dir_all(logs_dir).map_err(|source| TracingError::LogsDir {
        path: logs_dir.to_path_buf(),
        source,
    })?;

    let log_path = logs_dir.join(LOG_FILE_NAME);
    let log_file = File::create(&log_path).map_err(|source| TracingError::LogFile {
        path: log_path.clone(),
        source,
    })?;

    let console = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_filter(console_filter(console_level));

    let file = fmt::layer()
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false)
        .with_writer(log_file)
        .with_filter(EnvFilter::new("trace"));

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .try_init()?;

    tracing::debug!(%console_level, log = %log_path.display(), "Logging started");
    Ok(log_path)
}

/// Console filter: `NURU_LOG`, then `RUST_LOG`, then `level` with noisy
/// dependencies held back.
fn console_filter(level: Level) -> EnvFilter {
    [LOG_ENV, EnvFilter::DEFAULT_ENV]
        .into_iter()
        .find_map(|var| EnvFilter::try_from_env(var).ok())
        .unwrap_or_else(|| EnvFilter::new(default_directives(level)))
}

fn default_directives(level: Level) -> String {
    let mut directives = vec![level.as_str().to_ascii_lowercase()];
    directives.extend(QUIET_DEPENDENCIES.iter().map(|d| (*d).to_string()));
    directives.join(",")
}

/// Console verbosity accepted by `--log-level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CliLogLevel {
    Error,
    Warn,
    /// Session, focus and cleanup milestones
    Info,
    /// Adds per-stream and scheduler pass details
    Debug,
    Trace,
}

impl CliLogLevel {
    /// Converts CLI log level to tracing Level enum.
    ///
    /// # Examples
    /// ```
    /// use nuru_core::tracing_setup::CliLogLevel;
    ///
    /// assert_eq!(CliLogLevel::Debug.as_tracing_level(), tracing::Level::DEBUG);
    /// ```
    pub fn as_tracing_level(self) -> Level {
        match self {
            CliLogLevel::Error => Level::ERROR,
            CliLogLevel::Warn => Level::WARN,
            CliLogLevel::Info => Level::INFO,
            CliLogLevel::Debug => Level::DEBUG,
            CliLogLevel::Trace => Level::TRACE,
        }
    }
}
