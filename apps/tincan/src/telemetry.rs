//! Client logging.
//!
//! The chat prompt owns stdout, so traces go to stderr or, with `--log-file`, to a file through
//! a non-blocking writer. At debug and trace only tincan's own crates get verbose; the WebRTC
//! and HTTP stacks stay at info unless dependency tracing is asked for.

use clap::ValueEnum;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::EnvFilter;

/// Targets that follow `--log-level` directly.
const TINCAN_TARGETS: &[&str] = &["tincan", "tincan_client_core", "tincan_signal"];

/// Crates that flood the log below info: ICE/DTLS/SCTP state machines and the HTTP client.
const CHATTY_DEPENDENCIES: &[&str] = &[
    "webrtc",
    "webrtc_ice",
    "webrtc_sctp",
    "webrtc_dtls",
    "webrtc_mdns",
    "hyper",
    "reqwest",
    "h2",
];

#[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }

    fn is_verbose(self) -> bool {
        self >= LogLevel::Debug
    }
}

#[derive(Clone, Debug, Default)]
pub struct LogConfig {
    pub level: LogLevel,
    /// Log to this file instead of stderr.
    pub file: Option<PathBuf>,
    /// Raw `EnvFilter` directives; replaces everything derived from `level`.
    pub filter: Option<String>,
    /// Let dependencies log at `level` too.
    pub trace_deps: bool,
}

#[derive(thiserror::Error, Debug)]
pub enum InitError {
    #[error("failed to open log file {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid log filter '{directives}': {reason}")]
    Filter { directives: String, reason: String },
    #[error("failed to install logger: {0}")]
    Install(String),
}

static WRITER_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Install the global subscriber. A second call leaves the first one in place.
pub fn init(config: &LogConfig) -> Result<(), InitError> {
    if WRITER_GUARD.get().is_some() {
        return Ok(());
    }

    let filter = match &config.filter {
        Some(directives) => EnvFilter::try_new(directives).map_err(|err| InitError::Filter {
            directives: directives.clone(),
            reason: err.to_string(),
        })?,
        None => EnvFilter::new(filter_directives(config.level, config.trace_deps)),
    };
    let (writer, guard) = open_writer(config.file.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.level.is_verbose())
        .with_ansi(config.file.is_none())
        .with_writer(writer)
        .try_init()
        .map_err(|err| InitError::Install(err.to_string()))?;

    let _ = WRITER_GUARD.set(guard);
    tracing::debug!(
        target: "tincan::telemetry",
        level = config.level.directive(),
        file = ?config.file,
        "logging ready"
    );
    Ok(())
}

/// Directives for `level` when no raw filter is given.
pub fn filter_directives(level: LogLevel, trace_deps: bool) -> String {
    if !level.is_verbose() || trace_deps {
        return level.directive().to_string();
    }

    let mut directives = vec!["info".to_string()];
    directives.extend(
        TINCAN_TARGETS
            .iter()
            .map(|target| format!("{target}={}", level.directive())),
    );
    directives.extend(
        CHATTY_DEPENDENCIES
            .iter()
            .map(|target| format!("{target}=info")),
    );
    directives.join(",")
}

fn open_writer(file: Option<&Path>) -> Result<(NonBlocking, WorkerGuard), InitError> {
    let Some(path) = file else {
        return Ok(tracing_appender::non_blocking(std::io::stderr()));
    };
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| InitError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(tracing_appender::non_blocking(file))
}
