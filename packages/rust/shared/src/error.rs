//! Error types for Luna.
//!
//! Library crates use [`LunaError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;
use std::time::Duration;

/// Top-level error type for all Luna operations.
#[derive(Debug, thiserror::Error)]
pub enum LunaError {
    /// Configuration loading or validation error (config file, profiles,
    /// unresolved workflow parameters). Surfaced before any stage runs.
    #[error("config error: {message}")]
    Config { message: String },

    /// An adapter could not construct a valid tool invocation.
    #[error("build error: {message}")]
    Build { message: String },

    /// The external tool could not be spawned or exited unsuccessfully.
    #[error("execution error: {message}")]
    Execution { message: String },

    /// The external tool exceeded its time budget and was killed.
    #[error("tool timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// Tool output could not be interpreted.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (invalid target, bad profile name, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Report export error (CSV or spreadsheet writer).
    #[error("export error: {0}")]
    Export(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, LunaError>;

impl LunaError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create an adapter build error.
    pub fn build(msg: impl Into<String>) -> Self {
        Self::Build {
            message: msg.into(),
        }
    }

    /// Create an execution error.
    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
