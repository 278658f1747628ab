use {
    ferry_common::{DeliveryTarget, MessageHandle, MessageSink, SinkError, TextFormat},
    ferry_throttle::BackoffCalculator,
    serde::{Deserialize, Serialize},
    tracing::{debug, info, warn},
};

use crate::{
    classify::{ErrorClassification, RecoveryStrategy},
    plain::strip_rich_text,
};

/// Which sink call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Update,
}

/// Everything the executor needs to know about the failed delivery.
#[derive(Debug, Clone)]
pub struct RecoveryContext {
    pub target: DeliveryTarget,
    /// Remote message being edited; `None` before the first successful create.
    pub handle: Option<MessageHandle>,
    /// Text the failed call tried to send.
    pub pending_text: String,
    /// Text the remote message currently shows.
    pub last_sent_text: Option<String>,
    /// Recovery attempts already made for this target and handle.
    pub retry_count: u32,
    pub operation: OperationKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryOutcome {
    pub success: bool,
    pub strategy: RecoveryStrategy,
    /// The text went out with formatting stripped.
    pub used_fallback: bool,
    /// Set when the message was (re)created; replaces the old handle.
    pub new_handle: Option<MessageHandle>,
    /// Degradation note to surface to the user, if any.
    pub note: Option<String>,
    /// The failure that ended the attempt, when it did not succeed.
    pub error: Option<SinkError>,
}

impl RecoveryOutcome {
    fn succeeded(strategy: RecoveryStrategy) -> Self {
        Self {
            success: true,
            strategy,
            used_fallback: false,
            new_handle: None,
            note: None,
            error: None,
        }
    }

    fn failed(strategy: RecoveryStrategy, error: Option<SinkError>) -> Self {
        Self {
            success: false,
            error,
            ..Self::succeeded(strategy)
        }
    }
}

/// Carries out a recovery strategy against the sink.
///
/// Holds no per-target state: retry counts come in through the
/// [`RecoveryContext`]. The only state is the backoff streak, which a
/// successful recovery clears.
#[derive(Debug)]
pub struct RecoveryExecutor {
    backoff: BackoffCalculator,
}

impl RecoveryExecutor {
    #[must_use]
    pub fn new(backoff: BackoffCalculator) -> Self {
        Self { backoff }
    }

    pub async fn recover(
        &self,
        sink: &dyn MessageSink,
        classification: &ErrorClassification,
        ctx: &RecoveryContext,
    ) -> RecoveryOutcome {
        let strategy = classification.strategy;
        debug!(
            chat = %ctx.target,
            class = %classification.class,
            strategy = %strategy,
            retry_count = ctx.retry_count,
            "recovering from sink failure"
        );

        let outcome = match strategy {
            RecoveryStrategy::Retry => self.retry(sink, classification, ctx).await,
            RecoveryStrategy::Fallback => self.fallback(sink, ctx).await,
            RecoveryStrategy::Recreate => self.recreate(sink, ctx).await,
            RecoveryStrategy::Skip => RecoveryOutcome::succeeded(strategy),
            RecoveryStrategy::Abort => {
                warn!(
                    chat = %ctx.target,
                    class = %classification.class,
                    "delivery aborted"
                );
                RecoveryOutcome::failed(strategy, None)
            },
        };

        let outcome = RecoveryOutcome {
            note: outcome
                .note
                .or_else(|| classification.degradation_note.clone()),
            ..outcome
        };

        if outcome.success {
            self.backoff.record_success();
            if strategy != RecoveryStrategy::Skip {
                info!(
                    chat = %ctx.target,
                    strategy = %strategy,
                    recreated = outcome.new_handle.is_some(),
                    "recovered from sink failure"
                );
            }
        }
        outcome
    }

    async fn retry(
        &self,
        sink: &dyn MessageSink,
        classification: &ErrorClassification,
        ctx: &RecoveryContext,
    ) -> RecoveryOutcome {
        let strategy = RecoveryStrategy::Retry;
        if !classification.retryable || ctx.retry_count >= classification.max_retries {
            debug!(
                chat = %ctx.target,
                retry_count = ctx.retry_count,
                max_retries = classification.max_retries,
                "retry budget exhausted"
            );
            return RecoveryOutcome::failed(strategy, None);
        }

        let delay = self
            .backoff
            .next_delay(ctx.retry_count, classification.multiplier);
        debug!(
            chat = %ctx.target,
            delay_ms = delay.as_millis() as u64,
            "retrying after backoff"
        );
        tokio::time::sleep(delay).await;

        match self.resend(sink, ctx, TextFormat::Rich).await {
            Ok(new_handle) => RecoveryOutcome {
                new_handle,
                ..RecoveryOutcome::succeeded(strategy)
            },
            Err(error) => {
                self.backoff.record_failure();
                RecoveryOutcome::failed(strategy, Some(error))
            },
        }
    }

    async fn fallback(&self, sink: &dyn MessageSink, ctx: &RecoveryContext) -> RecoveryOutcome {
        let strategy = RecoveryStrategy::Fallback;
        let plain = RecoveryContext {
            pending_text: strip_rich_text(&ctx.pending_text),
            ..ctx.clone()
        };
        match self.resend(sink, &plain, TextFormat::Plain).await {
            Ok(new_handle) => RecoveryOutcome {
                used_fallback: true,
                new_handle,
                ..RecoveryOutcome::succeeded(strategy)
            },
            Err(error) => {
                warn!(chat = %ctx.target, error = %error, "plain-text fallback failed");
                RecoveryOutcome {
                    used_fallback: true,
                    ..RecoveryOutcome::failed(strategy, Some(error))
                }
            },
        }
    }

    async fn recreate(&self, sink: &dyn MessageSink, ctx: &RecoveryContext) -> RecoveryOutcome {
        let strategy = RecoveryStrategy::Recreate;
        if let Some(old) = &ctx.handle {
            debug!(chat = %ctx.target, old_handle = %old, "abandoning remote message");
        }
        match sink
            .create(&ctx.target, &ctx.pending_text, TextFormat::Rich)
            .await
        {
            Ok(handle) => RecoveryOutcome {
                new_handle: Some(handle),
                ..RecoveryOutcome::succeeded(strategy)
            },
            Err(error) => {
                warn!(chat = %ctx.target, error = %error, "recreating message failed");
                RecoveryOutcome::failed(strategy, Some(error))
            },
        }
    }

    /// Repeat the failed call. An update with no handle to edit becomes a create.
    async fn resend(
        &self,
        sink: &dyn MessageSink,
        ctx: &RecoveryContext,
        format: TextFormat,
    ) -> Result<Option<MessageHandle>, SinkError> {
        match (ctx.operation, &ctx.handle) {
            (OperationKind::Update, Some(handle)) => {
                sink.edit(&ctx.target, handle, &ctx.pending_text, format)
                    .await?;
                Ok(None)
            },
            _ => sink
                .create(&ctx.target, &ctx.pending_text, format)
                .await
                .map(Some),
        }
    }
}
