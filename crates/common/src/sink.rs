use std::time::Duration;

use async_trait::async_trait;

use crate::types::{DeliveryTarget, MessageHandle, TextFormat};

/// A failure reported by the messaging platform.
///
/// The message text is what classification keys on; `status` and
/// `retry_after` are filled in when the platform reports them.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct SinkError {
    pub message: String,
    pub status: Option<u16>,
    pub retry_after: Option<Duration>,
}

impl SinkError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
            retry_after: None,
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn with_retry_after(mut self, wait: Duration) -> Self {
        self.retry_after = Some(wait);
        self
    }
}

pub type SinkResult<T> = Result<T, SinkError>;

/// The two calls the delivery pipeline needs from a messaging platform.
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Create a new remote message and return its handle.
    async fn create(
        &self,
        target: &DeliveryTarget,
        text: &str,
        format: TextFormat,
    ) -> SinkResult<MessageHandle>;

    /// Replace the text of an existing remote message.
    async fn edit(
        &self,
        target: &DeliveryTarget,
        handle: &MessageHandle,
        text: &str,
        format: TextFormat,
    ) -> SinkResult<()>;
}
