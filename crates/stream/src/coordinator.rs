//! Per-session orchestration of a streamed reply.

use std::{borrow::Cow, collections::HashMap, sync::Arc, time::Duration};

use {
    ferry_common::{
        DeliveryTarget, MessageHandle, MessageSink, SinkError, StreamEvent, StreamReceiver,
        TextFormat,
    },
    ferry_recovery::{
        ErrorClassifier, OperationKind, RecoveryContext, RecoveryExecutor, RecoveryStrategy,
    },
    ferry_sessions::{MessageVersion, SessionStatus, SessionStore},
    ferry_throttle::{AdmissionQueue, BackoffCalculator, Error as QueueError, Priority},
    serde_json::Value,
    tokio::time::Instant,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use ferry_metrics::{counter, labels, stream as stream_metrics};

use crate::{
    config::StreamConfig,
    error::{Context, Error, Result},
    sink::QueuedSink,
    truncate::truncate_message,
};

/// Scratch key recording why a session ended early.
const STOP_REASON_KEY: &str = "stop_reason";
/// Scratch key holding the degradation note of an aborted delivery.
const ABORT_NOTE_KEY: &str = "abort_note";
/// Scratch key holding an error reported by the fragment producer.
const UPSTREAM_ERROR_KEY: &str = "upstream_error";

/// Delivers one streamed reply to one target.
///
/// Fragments are appended to a buffer; the buffer is pushed to the remote
/// message at most once per `min_update_interval_ms`, so fast fragments
/// coalesce into one edit. Every sink call goes through the channel's
/// [`AdmissionQueue`], and calls are awaited one at a time, so two updates
/// for the same message never overlap. Failed updates keep their text in the
/// buffer; the next update carries it.
pub struct StreamCoordinator {
    store: Arc<SessionStore>,
    sink: QueuedSink,
    recovery_sink: QueuedSink,
    classifier: Arc<ErrorClassifier>,
    recovery: RecoveryExecutor,
    config: StreamConfig,
    target: DeliveryTarget,
    owner: String,

    session_id: Option<String>,
    /// Everything received so far.
    buffer: String,
    /// Fragments received since the last successful update.
    pending_fragments: u64,
    /// What the remote message shows, as last sent (after truncation).
    last_sent: Option<String>,
    handle: Option<MessageHandle>,
    started_at: Instant,
    last_update: Option<Instant>,
    /// Recovery attempts for the current handle.
    recovery_retries: u32,
    active: bool,
    paused: bool,
    finished: bool,
}

impl StreamCoordinator {
    /// `queue` should be the admission queue of `target`'s channel, built
    /// with the same classifier so queue-level retries follow the same policy.
    #[must_use]
    pub fn new(
        store: Arc<SessionStore>,
        queue: Arc<AdmissionQueue>,
        sink: Arc<dyn MessageSink>,
        config: StreamConfig,
        target: DeliveryTarget,
        owner: impl Into<String>,
    ) -> Self {
        let backoff = BackoffCalculator::from_config(queue.config());
        Self {
            store,
            sink: QueuedSink::new(Arc::clone(&queue), Arc::clone(&sink), config.update_priority),
            recovery_sink: QueuedSink::new(queue, sink, Priority::High),
            classifier: Arc::new(ErrorClassifier::default()),
            recovery: RecoveryExecutor::new(backoff),
            config,
            target,
            owner: owner.into(),
            session_id: None,
            buffer: String::new(),
            pending_fragments: 0,
            last_sent: None,
            handle: None,
            started_at: Instant::now(),
            last_update: None,
            recovery_retries: 0,
            active: false,
            paused: false,
            finished: false,
        }
    }

    #[must_use]
    pub fn with_classifier(mut self, classifier: Arc<ErrorClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    #[must_use]
    pub fn handle(&self) -> Option<&MessageHandle> {
        self.handle.as_ref()
    }

    /// Full text received so far.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.buffer
    }

    #[must_use]
    pub fn last_sent(&self) -> Option<&str> {
        self.last_sent.as_deref()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    fn id(&self) -> Result<&str> {
        self.session_id
            .as_deref()
            .context("stream coordinator used before initialize")
    }

    /// Create the session and start accepting fragments. Calling it again
    /// returns the existing session id.
    pub fn initialize(&mut self, metadata: HashMap<String, Value>) -> Result<String> {
        if let Some(id) = &self.session_id {
            return Ok(id.clone());
        }
        let session = self
            .store
            .create_session(self.target.clone(), self.owner.clone(), metadata);
        self.store.update_status(&session.id, SessionStatus::Active)?;

        self.started_at = Instant::now();
        self.active = true;
        self.session_id = Some(session.id.clone());
        info!(session_id = %session.id, chat = %self.target, "stream started");
        Ok(session.id)
    }

    /// Buffer a fragment and push an update if one is due.
    ///
    /// An [`Error::Backpressure`] or [`Error::Delivery`] here leaves the
    /// fragment buffered; it goes out with the next update.
    pub async fn on_fragment(&mut self, fragment: &str) -> Result<()> {
        if !self.active {
            return Err(Error::Inactive);
        }
        let id = self.id()?.to_owned();
        self.store.record_chunk(&id)?;
        self.buffer.push_str(fragment);
        self.pending_fragments += 1;

        #[cfg(feature = "metrics")]
        counter!(stream_metrics::FRAGMENTS_TOTAL, labels::CHANNEL => self.target.channel.clone())
            .increment(1);

        if self.paused || !self.update_due() {
            debug!(
                session_id = %id,
                buffered = self.buffer.len(),
                pending = self.pending_fragments,
                "fragment coalesced"
            );
            return Ok(());
        }
        self.flush(self.config.update_priority, true).await
    }

    fn update_due(&self) -> bool {
        let since = self.last_update.unwrap_or(self.started_at);
        if since.elapsed() < Duration::from_millis(self.config.min_update_interval_ms) {
            return false;
        }
        self.handle.is_some() || self.buffer.chars().count() >= self.config.min_initial_chars
    }

    /// Stop pushing updates; fragments keep buffering.
    pub fn pause(&mut self) -> Result<()> {
        if !self.active {
            return Err(Error::Inactive);
        }
        let id = self.id()?.to_owned();
        self.store.update_status(&id, SessionStatus::Paused)?;
        self.paused = true;
        debug!(session_id = %id, "stream paused");
        Ok(())
    }

    /// Resume updates, pushing buffered text right away if an update is due.
    pub async fn resume(&mut self) -> Result<()> {
        if !self.active {
            return Err(Error::Inactive);
        }
        let id = self.id()?.to_owned();
        self.store.update_status(&id, SessionStatus::Active)?;
        self.paused = false;
        debug!(session_id = %id, "stream resumed");
        if self.pending_fragments > 0 && self.update_due() {
            self.flush(self.config.update_priority, true).await?;
        }
        Ok(())
    }

    /// Abandon the stream: buffered fragments are dropped and the session is
    /// closed as cancelled. Stopping twice is a no-op.
    pub fn stop(&mut self) -> Result<()> {
        if !self.active {
            return Ok(());
        }
        self.active = false;
        let dropped = self.pending_fragments;
        self.pending_fragments = 0;
        self.buffer = self.last_sent.clone().unwrap_or_default();

        let id = self.id()?.to_owned();
        self.store
            .set_scratch(&id, STOP_REASON_KEY, Value::from("cancelled"))?;
        self.store.update_status(&id, SessionStatus::Error)?;
        info!(session_id = %id, dropped, "stream stopped");
        Ok(())
    }

    /// Push the final text and close the session.
    ///
    /// `final_text` replaces the buffer when given. The final update is only
    /// sent when it differs from what the remote message already shows, and
    /// finalizing an already finished stream does nothing, so repeated calls
    /// cost at most one sink call. Returns the final version, if there was
    /// any text.
    pub async fn finalize(&mut self, final_text: Option<&str>) -> Result<Option<MessageVersion>> {
        self.finish(final_text, SessionStatus::Completed).await
    }

    async fn finish(
        &mut self,
        final_text: Option<&str>,
        status: SessionStatus,
    ) -> Result<Option<MessageVersion>> {
        if self.finished {
            return Ok(None);
        }
        if !self.active {
            return Err(Error::Inactive);
        }
        let id = self.id()?.to_owned();
        if let Some(text) = final_text {
            self.buffer = text.to_owned();
        }
        self.store.update_status(&id, SessionStatus::Finalizing)?;
        self.paused = false;

        if !self.buffer.is_empty() {
            match self.flush(self.config.final_priority, false).await {
                Ok(()) => {},
                // Nothing is lost; the caller may finalize again.
                Err(Error::Backpressure) => return Err(Error::Backpressure),
                Err(err) => {
                    self.fail(&id);
                    return Err(err);
                },
            }
        }

        let version = if self.buffer.is_empty() {
            None
        } else {
            let shown = self.display_text().into_owned();
            let sent = self.last_sent.as_deref() == Some(shown.as_str());
            Some(
                self.store
                    .append_version(&id, shown, sent, self.handle.clone())?,
            )
        };

        self.store.update_status(&id, status)?;
        self.active = false;
        self.finished = true;
        info!(
            session_id = %id,
            status = %status,
            bytes = self.buffer.len(),
            versions = version.as_ref().map_or(0, |v| v.version),
            "stream finished"
        );
        Ok(version)
    }

    /// Drive the coordinator from a fragment channel until the producer
    /// finishes, fails, or `cancel` fires.
    ///
    /// `Done` (or a closed channel) finalizes. `Error` delivers what was
    /// received and closes the session as failed. Cancellation stops the
    /// stream, abandoning any update in flight.
    pub async fn consume(
        &mut self,
        mut receiver: StreamReceiver,
        cancel: CancellationToken,
    ) -> Result<()> {
        if self.session_id.is_none() {
            self.initialize(HashMap::new())?;
        }
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                event = receiver.recv() => Some(event),
            };
            let Some(event) = event else {
                return self.stop();
            };

            match event {
                Some(StreamEvent::Delta(fragment)) => {
                    let outcome = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => None,
                        outcome = self.on_fragment(&fragment) => Some(outcome),
                    };
                    match outcome {
                        None => return self.stop(),
                        Some(Err(err)) if err.is_transient() => {
                            debug!(error = %err, "update deferred");
                        },
                        Some(result) => result?,
                    }
                },
                Some(StreamEvent::Done) | None => {
                    self.finalize(None).await?;
                    return Ok(());
                },
                Some(StreamEvent::Error(message)) => {
                    warn!(chat = %self.target, error = %message, "fragment producer failed");
                    let id = self.id()?.to_owned();
                    self.store
                        .set_scratch(&id, UPSTREAM_ERROR_KEY, Value::from(message))?;
                    self.finish(None, SessionStatus::Error).await?;
                    return Ok(());
                },
            }
        }
    }

    fn display_text(&self) -> Cow<'_, str> {
        truncate_message(
            &self.buffer,
            self.config.max_message_length,
            &self.config.truncation_marker,
        )
    }

    /// Send the buffer if it differs from the remote message.
    async fn flush(&mut self, priority: Priority, record_version: bool) -> Result<()> {
        let id = self.id()?.to_owned();
        let shown = self.display_text().into_owned();
        if self.last_sent.as_deref() == Some(shown.as_str()) {
            self.store.record_processed(&id, self.pending_fragments)?;
            self.pending_fragments = 0;
            return Ok(());
        }

        if shown.len() < self.buffer.len() {
            debug!(
                session_id = %id,
                buffered = self.buffer.len(),
                sent = shown.len(),
                "text truncated to fit the message limit"
            );
            #[cfg(feature = "metrics")]
            counter!(stream_metrics::TRUNCATIONS_TOTAL, labels::CHANNEL => self.target.channel.clone())
                .increment(1);
        }

        let operation = if self.handle.is_some() {
            OperationKind::Update
        } else {
            OperationKind::Create
        };
        let result = match &self.handle {
            Some(handle) => self
                .sink
                .edit_with(priority, &self.target, handle, &shown, TextFormat::Rich)
                .await
                .map(|admitted| (None, admitted.retries)),
            None => self
                .sink
                .create_with(priority, &self.target, &shown, TextFormat::Rich)
                .await
                .map(|admitted| (Some(admitted.value), admitted.retries)),
        };
        self.last_update = Some(Instant::now());

        match result {
            Ok((new_handle, retries)) => {
                self.attribute_failures(&id, retries, retries)?;
                self.commit(&id, shown, new_handle, record_version)
            },
            Err(QueueError::QueueFull { depth, limit }) => {
                warn!(session_id = %id, depth, limit, "update deferred by backpressure");
                Err(Error::Backpressure)
            },
            Err(QueueError::Sink { source, retries }) => {
                self.recover(&id, operation, shown, source, retries, record_version)
                    .await
            },
            Err(err @ QueueError::Closed) => Err(err.into()),
        }
    }

    fn commit(
        &mut self,
        id: &str,
        shown: String,
        new_handle: Option<MessageHandle>,
        record_version: bool,
    ) -> Result<()> {
        if let Some(handle) = new_handle {
            if self.handle.as_ref() != Some(&handle) {
                self.recovery_retries = 0;
            }
            self.store.set_handle(id, Some(handle.clone()))?;
            self.handle = Some(handle);
        }
        self.store.record_processed(id, self.pending_fragments)?;
        self.pending_fragments = 0;
        if record_version {
            self.store
                .append_version(id, shown.clone(), true, self.handle.clone())?;
        }
        debug!(
            session_id = id,
            bytes = shown.len(),
            handle = ?self.handle,
            "remote message updated"
        );
        #[cfg(feature = "metrics")]
        counter!(stream_metrics::UPDATES_TOTAL, labels::CHANNEL => self.target.channel.clone())
            .increment(1);
        self.last_sent = Some(shown);
        Ok(())
    }

    /// Charge failed attempts to the session, whether or not the update
    /// eventually went through.
    fn attribute_failures(&self, id: &str, errors: u32, retries: u32) -> Result<()> {
        for _ in 0..errors {
            self.store.record_error(id)?;
        }
        for _ in 0..retries {
            self.store.record_retry(id)?;
        }
        if errors > 0 {
            debug!(session_id = id, errors, retries, "failed attempts recorded");
        }
        Ok(())
    }

    async fn recover(
        &mut self,
        id: &str,
        operation: OperationKind,
        shown: String,
        error: SinkError,
        queue_retries: u32,
        record_version: bool,
    ) -> Result<()> {
        let classification = self.classifier.classify(&error);
        self.attribute_failures(id, queue_retries + 1, queue_retries)?;

        let ctx = RecoveryContext {
            target: self.target.clone(),
            handle: self.handle.clone(),
            pending_text: shown,
            last_sent_text: self.last_sent.clone(),
            retry_count: queue_retries + self.recovery_retries,
            operation,
        };
        let outcome = self
            .recovery
            .recover(&self.recovery_sink, &classification, &ctx)
            .await;
        self.last_update = Some(Instant::now());

        #[cfg(feature = "metrics")]
        counter!(
            stream_metrics::RECOVERIES_TOTAL,
            labels::ERROR_CLASS => classification.class.as_str(),
            labels::STRATEGY => outcome.strategy.as_str(),
            labels::OUTCOME => if outcome.success { "success" } else { "failure" }
        )
        .increment(1);

        if outcome.strategy == RecoveryStrategy::Retry && ctx.retry_count < classification.max_retries {
            self.recovery_retries += 1;
            self.store.record_retry(id)?;
        }

        if outcome.success {
            return match outcome.strategy {
                // The remote message stays as it was; the text goes out with a later update.
                RecoveryStrategy::Skip => {
                    debug!(session_id = id, class = %classification.class, "update skipped");
                    Ok(())
                },
                _ => self.commit(id, ctx.pending_text, outcome.new_handle, record_version),
            };
        }

        if outcome.strategy == RecoveryStrategy::Abort {
            let note = outcome
                .note
                .unwrap_or_else(|| classification.class.as_str().to_owned());
            self.store
                .set_scratch(id, ABORT_NOTE_KEY, Value::from(note.clone()))?;
            self.fail(id);
            return Err(Error::aborted(note));
        }

        let message = outcome.error.map_or(error.message, |e| e.message);
        warn!(
            session_id = id,
            class = %classification.class,
            strategy = %outcome.strategy,
            error = %message,
            "update failed, text kept for the next attempt"
        );
        Err(Error::delivery(classification.class, message))
    }

    /// Close the session as failed. Errors are logged, not returned: this runs
    /// on paths that are already reporting a failure.
    fn fail(&mut self, id: &str) {
        self.active = false;
        self.finished = true;
        if let Err(err) = self.store.update_status(id, SessionStatus::Error) {
            debug!(session_id = id, error = %err, "could not mark session failed");
        }
    }
}

impl std::fmt::Debug for StreamCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamCoordinator")
            .field("session_id", &self.session_id)
            .field("target", &self.target)
            .field("handle", &self.handle)
            .field("buffered", &self.buffer.len())
            .field("active", &self.active)
            .field("paused", &self.paused)
            .finish_non_exhaustive()
    }
}
