//! A [`MessageSink`] that renders to the terminal and fails on purpose.

use std::{collections::HashMap, sync::Mutex, time::Duration};

use {
    async_trait::async_trait,
    clap::ValueEnum,
    ferry_common::{DeliveryTarget, MessageHandle, MessageSink, SinkError, SinkResult, TextFormat},
    rand::{Rng, SeedableRng, rngs::StdRng},
    serde::Serialize,
    tracing::info,
};

/// Platform failure to simulate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    RateLimited,
    Stale,
    Server,
    Network,
    Content,
    Blocked,
}

impl FailureKind {
    /// The error a real platform would return, or `None` where this kind of
    /// failure cannot happen for the call.
    fn error(self, is_edit: bool, format: TextFormat) -> Option<SinkError> {
        Some(match self {
            Self::RateLimited => SinkError::new("Too Many Requests: retry after 1")
                .with_status(429)
                .with_retry_after(Duration::from_secs(1)),
            Self::Stale if is_edit => {
                SinkError::new("Bad Request: message to edit not found").with_status(400)
            },
            Self::Stale => return None,
            Self::Server => SinkError::new("Internal Server Error").with_status(500),
            Self::Network => SinkError::new("connection reset by peer"),
            Self::Content if format == TextFormat::Rich => {
                SinkError::new("Bad Request: can't parse entities").with_status(400)
            },
            Self::Content => return None,
            Self::Blocked => SinkError::new("Forbidden: bot was blocked by the user").with_status(403),
        })
    }
}

/// Call counters, printed with the replay report.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConsoleStats {
    pub creates: u64,
    pub edits: u64,
    pub injected_failures: u64,
}

struct State {
    rng: StdRng,
    next_id: u64,
    messages: HashMap<MessageHandle, String>,
    stats: ConsoleStats,
}

pub struct ConsoleSink {
    failure_rate: f64,
    failure_kind: FailureKind,
    state: Mutex<State>,
}

impl ConsoleSink {
    /// `failure_rate` is clamped to `0.0..=1.0`.
    #[must_use]
    pub fn new(failure_rate: f64, failure_kind: FailureKind, seed: u64) -> Self {
        Self {
            failure_rate: failure_rate.clamp(0.0, 1.0),
            failure_kind,
            state: Mutex::new(State {
                rng: StdRng::seed_from_u64(seed),
                next_id: 0,
                messages: HashMap::new(),
                stats: ConsoleStats::default(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[must_use]
    pub fn stats(&self) -> ConsoleStats {
        self.lock().stats.clone()
    }

    /// Current text of a remote message.
    #[must_use]
    pub fn message(&self, handle: &MessageHandle) -> Option<String> {
        self.lock().messages.get(handle).cloned()
    }

    fn maybe_fail(&self, state: &mut State, is_edit: bool, format: TextFormat) -> SinkResult<()> {
        if self.failure_rate > 0.0
            && state.rng.random_bool(self.failure_rate)
            && let Some(error) = self.failure_kind.error(is_edit, format)
        {
            state.stats.injected_failures += 1;
            info!(kind = ?self.failure_kind, error = %error, "injecting sink failure");
            return Err(error);
        }
        Ok(())
    }
}

#[async_trait]
impl MessageSink for ConsoleSink {
    async fn create(
        &self,
        target: &DeliveryTarget,
        text: &str,
        format: TextFormat,
    ) -> SinkResult<MessageHandle> {
        let mut state = self.lock();
        self.maybe_fail(&mut state, false, format)?;
        state.next_id += 1;
        let handle = MessageHandle::new(state.next_id.to_string());
        state.messages.insert(handle.clone(), text.to_owned());
        state.stats.creates += 1;
        info!(
            chat = %target,
            handle = %handle,
            format = ?format,
            bytes = text.len(),
            "message created"
        );
        Ok(handle)
    }

    async fn edit(
        &self,
        target: &DeliveryTarget,
        handle: &MessageHandle,
        text: &str,
        format: TextFormat,
    ) -> SinkResult<()> {
        let mut state = self.lock();
        if !state.messages.contains_key(handle) {
            return Err(SinkError::new("Bad Request: message to edit not found").with_status(400));
        }
        self.maybe_fail(&mut state, true, format)?;
        state.messages.insert(handle.clone(), text.to_owned());
        state.stats.edits += 1;
        info!(
            chat = %target,
            handle = %handle,
            format = ?format,
            bytes = text.len(),
            "message edited"
        );
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> DeliveryTarget {
        DeliveryTarget::new("console", "tty")
    }

    #[tokio::test]
    async fn creates_and_edits_without_failures() {
        let sink = ConsoleSink::new(0.0, FailureKind::Server, 1);
        let handle = sink.create(&target(), "a", TextFormat::Rich).await.unwrap();
        sink.edit(&target(), &handle, "ab", TextFormat::Rich)
            .await
            .unwrap();
        assert_eq!(sink.message(&handle).as_deref(), Some("ab"));
        let stats = sink.stats();
        assert_eq!((stats.creates, stats.edits, stats.injected_failures), (1, 1, 0));
    }

    #[tokio::test]
    async fn always_failing_sink_reports_the_kind() {
        let sink = ConsoleSink::new(1.0, FailureKind::RateLimited, 7);
        let err = sink.create(&target(), "a", TextFormat::Rich).await.unwrap_err();
        assert_eq!(err.status, Some(429));
        assert_eq!(err.retry_after, Some(Duration::from_secs(1)));
        assert_eq!(sink.stats().injected_failures, 1);
    }

    #[tokio::test]
    async fn content_failures_spare_plain_text() {
        let sink = ConsoleSink::new(1.0, FailureKind::Content, 3);
        assert!(sink.create(&target(), "*a*", TextFormat::Rich).await.is_err());
        assert!(sink.create(&target(), "a", TextFormat::Plain).await.is_ok());
    }

    #[tokio::test]
    async fn editing_an_unknown_message_is_stale() {
        let sink = ConsoleSink::new(0.0, FailureKind::Server, 1);
        let err = sink
            .edit(&target(), &MessageHandle::new("99"), "x", TextFormat::Rich)
            .await
            .unwrap_err();
        assert!(err.message.contains("not found"));
    }
}
