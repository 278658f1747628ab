use ferry_common::SinkError;

/// Errors surfaced to callers of the admission queue.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The queue already holds its configured maximum of pending operations.
    /// Callers should slow down; this is never retried internally.
    #[error("admission queue full ({depth}/{limit} pending)")]
    QueueFull { depth: usize, limit: usize },

    /// The sink call failed and its retry budget is spent (or it was not retryable).
    #[error("sink operation failed after {retries} retries: {source}")]
    Sink {
        #[source]
        source: SinkError,
        retries: u32,
    },

    /// The queue was shut down before the operation completed.
    #[error("admission queue closed")]
    Closed,
}

impl Error {
    #[must_use]
    pub fn queue_full(depth: usize, limit: usize) -> Self {
        Self::QueueFull { depth, limit }
    }

    /// The underlying sink failure, if this error carries one.
    #[must_use]
    pub fn sink_error(&self) -> Option<&SinkError> {
        match self {
            Self::Sink { source, .. } => Some(source),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
