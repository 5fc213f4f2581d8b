//! Error types for queue operations.

use thiserror::Error;
use tmerge_types::QueueId;

/// Errors that can occur during queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The queue id is not registered (never created, or disposed).
    #[error("unknown task queue: {0}")]
    UnknownQueue(QueueId),

    /// The queue's message loop has been terminated.
    #[error("task queue terminated: {0}")]
    Terminated(QueueId),

    /// The worker thread could not be spawned.
    #[error("failed to spawn message loop thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Convenience type alias for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;
