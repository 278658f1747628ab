use {ferry_common::FromMessage, ferry_recovery::ErrorClass};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The stream was stopped, finished, or never initialized.
    #[error("stream is not active")]
    Inactive,

    /// The admission queue is full. The text stays buffered for the next update.
    #[error("admission queue full, update deferred")]
    Backpressure,

    /// Delivery to this target was abandoned for good.
    #[error("delivery aborted: {note}")]
    Aborted { note: String },

    /// An update failed and recovery did not succeed. The text stays buffered.
    #[error("delivery failed ({class}): {message}")]
    Delivery { class: ErrorClass, message: String },

    #[error(transparent)]
    Session(#[from] ferry_sessions::Error),

    #[error(transparent)]
    Queue(#[from] ferry_throttle::Error),

    #[error("{0}")]
    Message(String),
}

impl Error {
    #[must_use]
    pub fn aborted(note: impl Into<String>) -> Self {
        Self::Aborted { note: note.into() }
    }

    #[must_use]
    pub fn delivery(class: ErrorClass, message: impl Into<String>) -> Self {
        Self::Delivery {
            class,
            message: message.into(),
        }
    }

    /// Whether the buffered text is intact and a later update may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Backpressure | Self::Delivery { .. })
    }
}

impl FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message(message)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

ferry_common::impl_context!();
