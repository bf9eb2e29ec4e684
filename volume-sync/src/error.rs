//! Error types for the volume-sync crate.

/// Errors from reading or writing the desktop volume.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VolumeError {
    /// A level outside 0..=100
    #[error("Volume level {0} out of range 0..=100")]
    OutOfRange(i64),

    /// The mixer tool could not be executed
    #[error("Failed to run {tool}: {message}")]
    CommandFailed {
        /// Name of the mixer tool
        tool: &'static str,
        /// Underlying error or stderr
        message: String,
    },

    /// The mixer tool printed something that is not a volume
    #[error("Unexpected output from {tool}: {output:?}")]
    UnexpectedOutput {
        /// Name of the mixer tool
        tool: &'static str,
        /// The offending output
        output: String,
    },

    /// Backend name not recognised
    #[error("Unknown volume backend: {0}")]
    UnknownBackend(String),
}

/// Errors from the sync controller.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Reading the desktop volume failed; the poll loop cannot continue
    #[error("Failed to read desktop volume: {0}")]
    VolumeRead(#[source] VolumeError),

    /// Invalid configuration provided
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A background task panicked or was cancelled
    #[error("Sync task failed: {0}")]
    TaskFailed(String),
}

/// Convenience type alias for Results using SyncError.
pub type Result<T> = std::result::Result<T, SyncError>;
