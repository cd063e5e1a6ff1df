use anyhow::{Context, Result, anyhow};
use std::fs::OpenOptions;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Where log records go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    Stderr,
    File(PathBuf),
    /// No subscriber at all; used while a full-screen UI owns the terminal
    Silent,
}

/// Installs the global subscriber. `RUST_LOG` wins over `level`, and
/// `verbose` wins over both.
///
/// File output is written from a background thread; records still queued
/// are flushed when the returned guard is dropped, so hold it until exit.
pub fn init(level: &str, verbose: bool, target: LogTarget) -> Result<Option<WorkerGuard>> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    };

    match target {
        LogTarget::Silent => Ok(None),
        LogTarget::Stderr => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init()
            .map(|_| None)
            .map_err(|e| anyhow!("Failed to initialise logging: {}", e)),
        LogTarget::File(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .try_init()
                .map_err(|e| anyhow!("Failed to initialise logging: {}", e))?;
            Ok(Some(guard))
        }
    }
}

/// Picks the target for a command: full-screen commands never log to the terminal
pub fn target_for(interactive: bool, file: Option<PathBuf>) -> LogTarget {
    match (file, interactive) {
        (Some(path), _) => LogTarget::File(path),
        (None, true) => LogTarget::Silent,
        (None, false) => LogTarget::Stderr,
    }
}
