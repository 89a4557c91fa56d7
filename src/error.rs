//! Error types for the operation scheduler

use thiserror::Error;

/// Result type alias for scheduler operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur while configuring or driving the scheduler
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A required argument was absent
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// An operation thread could not be started
    #[error("failed to spawn operation thread {name}: {reason}")]
    SpawnFailed {
        /// Name the thread would have carried
        name: String,
        /// Reason reported by the OS
        reason: String,
    },

    /// A queue refused an item
    #[error("queue rejected item: {0}")]
    QueueRejected(String),
}

impl<T> From<flume::SendError<T>> for Error {
    fn from(err: flume::SendError<T>) -> Self {
        Error::QueueRejected(err.to_string())
    }
}
