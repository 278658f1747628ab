use std::sync::Arc;

use {
    async_trait::async_trait,
    ferry_common::{DeliveryTarget, MessageHandle, MessageSink, SinkError, SinkResult, TextFormat},
    ferry_throttle::{Admitted, AdmissionQueue, Error as QueueError, Priority},
};

/// A [`MessageSink`] whose calls go through an [`AdmissionQueue`], so they
/// count against the channel's quota and never overlap other calls.
#[derive(Clone)]
pub struct QueuedSink {
    queue: Arc<AdmissionQueue>,
    inner: Arc<dyn MessageSink>,
    priority: Priority,
}

impl QueuedSink {
    #[must_use]
    pub fn new(queue: Arc<AdmissionQueue>, inner: Arc<dyn MessageSink>, priority: Priority) -> Self {
        Self {
            queue,
            inner,
            priority,
        }
    }

    #[must_use]
    pub fn queue(&self) -> &Arc<AdmissionQueue> {
        &self.queue
    }

    /// Queued create at an explicit priority. The result carries the number
    /// of failed attempts the queue retried.
    pub async fn create_with(
        &self,
        priority: Priority,
        target: &DeliveryTarget,
        text: &str,
        format: TextFormat,
    ) -> ferry_throttle::Result<Admitted<MessageHandle>> {
        let inner = Arc::clone(&self.inner);
        let target = target.clone();
        let text = text.to_owned();
        self.queue
            .submit_admitted(priority, move || {
                let inner = Arc::clone(&inner);
                let target = target.clone();
                let text = text.clone();
                async move { inner.create(&target, &text, format).await }
            })
            .await
    }

    /// Queued edit at an explicit priority.
    pub async fn edit_with(
        &self,
        priority: Priority,
        target: &DeliveryTarget,
        handle: &MessageHandle,
        text: &str,
        format: TextFormat,
    ) -> ferry_throttle::Result<Admitted<()>> {
        let inner = Arc::clone(&self.inner);
        let target = target.clone();
        let handle = handle.clone();
        let text = text.to_owned();
        self.queue
            .submit_admitted(priority, move || {
                let inner = Arc::clone(&inner);
                let target = target.clone();
                let handle = handle.clone();
                let text = text.clone();
                async move { inner.edit(&target, &handle, &text, format).await }
            })
            .await
    }
}

/// Fold a queue failure back into the sink error space so it can be classified.
fn into_sink_error(error: QueueError) -> SinkError {
    match error {
        QueueError::Sink { source, .. } => source,
        QueueError::QueueFull { depth, limit } => {
            SinkError::new(format!("too many requests: admission queue full ({depth}/{limit})"))
                .with_status(429)
        },
        QueueError::Closed => SinkError::new("admission queue closed"),
    }
}

#[async_trait]
impl MessageSink for QueuedSink {
    async fn create(
        &self,
        target: &DeliveryTarget,
        text: &str,
        format: TextFormat,
    ) -> SinkResult<MessageHandle> {
        self.create_with(self.priority, target, text, format)
            .await
            .map(Admitted::into_inner)
            .map_err(into_sink_error)
    }

    async fn edit(
        &self,
        target: &DeliveryTarget,
        handle: &MessageHandle,
        text: &str,
        format: TextFormat,
    ) -> SinkResult<()> {
        self.edit_with(self.priority, target, handle, text, format)
            .await
            .map(Admitted::into_inner)
            .map_err(into_sink_error)
    }
}

impl std::fmt::Debug for QueuedSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedSink")
            .field("queue", &self.queue)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}
