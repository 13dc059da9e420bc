//! Error types for scriptorium-core

use thiserror::Error;

/// Main error type for the scriptorium-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Analysis not known to the registry
    #[error("analysis not found: {0}")]
    AnalysisNotFound(String),

    /// Requested version has no stored content
    #[error("version {version} not found for analysis '{analysis}'")]
    VersionNotFound { analysis: String, version: u32 },

    /// Log file absent where one is required (log download)
    #[error("log file not found for analysis: {0}")]
    LogsNotFound(String),

    /// Team referenced by an update does not exist
    #[error("team not found: {0}")]
    TeamNotFound(String),

    /// Operation would clobber existing state (rename/create target exists)
    #[error("conflict: {0}")]
    Conflict(String),

    /// Malformed input: bad analysis name, unknown time range, bad payload
    #[error("validation error: {0}")]
    Validation(String),

    /// Filesystem failure with the operation that produced it
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Persisted document failed to (de)serialize
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Cipher failure on environment read/write
    #[error("encryption error: {0}")]
    Encryption(String),

    /// Worker runtime refused a start/stop signal
    #[error("process error: {0}")]
    Process(String),

    /// Engine configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Wrap an I/O error with the operation it interrupted.
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Error::Io {
            context: context.into(),
            source,
        }
    }
}

/// Result type alias for scriptorium-core
pub type Result<T> = std::result::Result<T, Error>;
