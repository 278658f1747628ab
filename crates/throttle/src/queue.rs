//! Priority admission queue with a single-flight worker.
//!
//! Every operation submitted here runs against the sink one at a time, in
//! priority order (stable within a priority), after taking a token from the
//! bucket. Failures are retried in place according to a [`RetryClassifier`].

use std::{
    cmp::Ordering,
    collections::BinaryHeap,
    future::Future,
    pin::Pin,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering as AtomicOrdering},
    },
    task::{Context, Poll},
    time::Duration,
};

use {
    ferry_common::{SinkError, SinkResult},
    futures::future::BoxFuture,
    serde::{Deserialize, Serialize},
    tokio::{
        sync::{Notify, oneshot},
        time::Instant,
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use ferry_metrics::{admission, counter, gauge, histogram, labels};

use crate::{
    backoff::BackoffCalculator,
    bucket::TokenBucket,
    config::RateLimitConfig,
    error::{Error, Result},
    monitor::{RateLimitMetrics, UsageMonitor},
};

/// Longest single sleep while waiting for a token; the wait is recomputed after.
const MAX_THROTTLE_WAIT: Duration = Duration::from_secs(60);

/// Scheduling priority. Higher runs first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl Priority {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }
}

/// How many times a failed operation may be retried, and how hard to back off.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPlan {
    pub max_retries: u32,
    pub multiplier: f64,
}

impl RetryPlan {
    /// Fail on the first error.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            multiplier: 1.0,
        }
    }
}

/// Decides the retry policy for a sink failure.
pub trait RetryClassifier: Send + Sync {
    fn retry_plan(&self, error: &SinkError) -> RetryPlan;
}

/// Retries every failure the same number of times.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedRetry {
    pub max_retries: u32,
    pub multiplier: f64,
}

impl Default for FixedRetry {
    fn default() -> Self {
        Self {
            max_retries: 2,
            multiplier: 1.0,
        }
    }
}

impl RetryClassifier for FixedRetry {
    fn retry_plan(&self, _error: &SinkError) -> RetryPlan {
        RetryPlan {
            max_retries: self.max_retries,
            multiplier: self.multiplier,
        }
    }
}

/// A successful operation together with the failed attempts that preceded it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admitted<T> {
    pub value: T,
    /// Failed attempts the queue retried before this one succeeded.
    pub retries: u32,
}

impl<T> Admitted<T> {
    #[must_use]
    pub fn into_inner(self) -> T {
        self.value
    }
}

/// Type-erased operation plus its reply channel.
trait Job: Send {
    /// Run the operation once. On success the value is delivered to the caller.
    fn attempt(&mut self, retries: u32) -> BoxFuture<'_, SinkResult<()>>;
    fn reject(&mut self, error: Error);
    /// The caller dropped its ticket; running the operation is pointless.
    fn is_abandoned(&self) -> bool;
}

struct TypedJob<T, F> {
    op: F,
    reply: Option<oneshot::Sender<Result<Admitted<T>>>>,
}

impl<T, F, Fut> Job for TypedJob<T, F>
where
    T: Send + 'static,
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = SinkResult<T>> + Send + 'static,
{
    fn attempt(&mut self, retries: u32) -> BoxFuture<'_, SinkResult<()>> {
        let fut = (self.op)();
        Box::pin(async move {
            let value = fut.await?;
            if let Some(reply) = self.reply.take() {
                let _ = reply.send(Ok(Admitted { value, retries }));
            }
            Ok(())
        })
    }

    fn reject(&mut self, error: Error) {
        if let Some(reply) = self.reply.take() {
            let _ = reply.send(Err(error));
        }
    }

    fn is_abandoned(&self) -> bool {
        self.reply.as_ref().is_none_or(|reply| reply.is_closed())
    }
}

struct QueuedOperation {
    id: u64,
    priority: Priority,
    /// Submission order; kept across retries so a retried operation keeps its place.
    seq: u64,
    enqueued_at: Instant,
    retry_count: u32,
    job: Box<dyn Job>,
}

impl PartialEq for QueuedOperation {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueuedOperation {}

impl PartialOrd for QueuedOperation {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedOperation {
    // Max-heap: higher priority first, then lower sequence number first.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Handle to a submitted operation. Resolves to the operation's result and
/// the number of retries it took.
///
/// Dropping the ticket before the operation starts cancels it.
#[derive(Debug)]
pub struct Ticket<T> {
    id: u64,
    rx: oneshot::Receiver<Result<Admitted<T>>>,
}

impl<T> Ticket<T> {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl<T> Future for Ticket<T> {
    type Output = Result<Admitted<T>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Err(Error::Closed)))
    }
}

struct Inner {
    channel: String,
    config: RateLimitConfig,
    bucket: TokenBucket,
    backoff: BackoffCalculator,
    monitor: UsageMonitor,
    classifier: Arc<dyn RetryClassifier>,
    pending: Mutex<BinaryHeap<QueuedOperation>>,
    notify: Notify,
    next_seq: AtomicU64,
    cancel: CancellationToken,
}

/// Admission-controlled queue for one delivery channel.
///
/// Construction spawns the worker task, so it must happen inside a tokio
/// runtime. The worker stops on [`shutdown`](Self::shutdown) or drop.
pub struct AdmissionQueue {
    inner: Arc<Inner>,
}

impl AdmissionQueue {
    /// Queue that retries every failure with [`FixedRetry::default`].
    #[must_use]
    pub fn new(channel: impl Into<String>, config: RateLimitConfig) -> Self {
        Self::with_classifier(channel, config, Arc::new(FixedRetry::default()))
    }

    #[must_use]
    pub fn with_classifier(
        channel: impl Into<String>,
        config: RateLimitConfig,
        classifier: Arc<dyn RetryClassifier>,
    ) -> Self {
        let inner = Arc::new(Inner {
            channel: channel.into(),
            bucket: TokenBucket::new(config.capacity, config.refill_rate_per_second),
            backoff: BackoffCalculator::from_config(&config),
            monitor: UsageMonitor::new(Duration::from_secs(config.monitoring_window_seconds)),
            classifier,
            pending: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
            next_seq: AtomicU64::new(1),
            cancel: CancellationToken::new(),
            config,
        });
        tokio::spawn(run_worker(Arc::clone(&inner)));
        Self { inner }
    }

    #[must_use]
    pub fn channel(&self) -> &str {
        &self.inner.channel
    }

    #[must_use]
    pub fn config(&self) -> &RateLimitConfig {
        &self.inner.config
    }

    /// Queue an operation without waiting for it.
    ///
    /// Fails immediately with [`Error::QueueFull`] when `max_queue_depth`
    /// operations are already pending, and with [`Error::Closed`] after
    /// shutdown. `op` is called once per attempt.
    pub fn enqueue<T, F, Fut>(&self, priority: Priority, op: F) -> Result<Ticket<T>>
    where
        T: Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = SinkResult<T>> + Send + 'static,
    {
        if self.inner.cancel.is_cancelled() {
            return Err(Error::Closed);
        }

        let limit = self.inner.config.max_queue_depth;
        let (tx, rx) = oneshot::channel();
        let seq = self.inner.next_seq.fetch_add(1, AtomicOrdering::SeqCst);
        let depth = {
            let mut pending = self.inner.pending.lock().unwrap_or_else(|e| e.into_inner());
            if pending.len() >= limit {
                let depth = pending.len();
                drop(pending);
                warn!(
                    channel = %self.inner.channel,
                    depth,
                    limit,
                    priority = priority.as_str(),
                    "admission queue full, rejecting submission"
                );
                #[cfg(feature = "metrics")]
                counter!(admission::REJECTED_TOTAL, labels::CHANNEL => self.inner.channel.clone())
                    .increment(1);
                return Err(Error::queue_full(depth, limit));
            }
            pending.push(QueuedOperation {
                id: seq,
                priority,
                seq,
                enqueued_at: Instant::now(),
                retry_count: 0,
                job: Box::new(TypedJob {
                    op,
                    reply: Some(tx),
                }),
            });
            pending.len()
        };

        self.inner.publish_depth(depth);
        self.inner.notify.notify_one();
        debug!(
            channel = %self.inner.channel,
            id = seq,
            priority = priority.as_str(),
            depth,
            "operation queued"
        );
        Ok(Ticket { id: seq, rx })
    }

    /// Queue an operation and wait for its result.
    pub async fn submit<T, F, Fut>(&self, priority: Priority, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = SinkResult<T>> + Send + 'static,
    {
        self.enqueue(priority, op)?.await.map(Admitted::into_inner)
    }

    /// Like [`submit`](Self::submit), but also reports how many failed
    /// attempts were retried on the way to success.
    pub async fn submit_admitted<T, F, Fut>(
        &self,
        priority: Priority,
        op: F,
    ) -> Result<Admitted<T>>
    where
        T: Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = SinkResult<T>> + Send + 'static,
    {
        self.enqueue(priority, op)?.await
    }

    /// Operations waiting to run (not counting one in flight).
    #[must_use]
    pub fn depth(&self) -> usize {
        self.inner.depth()
    }

    #[must_use]
    pub fn metrics(&self) -> RateLimitMetrics {
        let mut snapshot = self
            .inner
            .monitor
            .snapshot(self.inner.bucket.available_tokens());
        snapshot.queue_depth = self.inner.depth();
        snapshot
    }

    /// Stop the worker. Pending operations resolve to [`Error::Closed`]; an
    /// operation already in flight is abandoned at its next suspension point.
    pub fn shutdown(&self) {
        if !self.inner.cancel.is_cancelled() {
            info!(channel = %self.inner.channel, "admission queue shutting down");
            self.inner.cancel.cancel();
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }
}

impl Drop for AdmissionQueue {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}

impl std::fmt::Debug for AdmissionQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionQueue")
            .field("channel", &self.inner.channel)
            .field("depth", &self.inner.depth())
            .field("closed", &self.inner.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

async fn run_worker(inner: Arc<Inner>) {
    loop {
        let op = match inner.pop() {
            Some(op) => op,
            None => {
                tokio::select! {
                    _ = inner.cancel.cancelled() => break,
                    _ = inner.notify.notified() => {},
                }
                continue;
            },
        };
        // Cancelling drops the in-flight job, which closes its reply channel.
        tokio::select! {
            biased;
            _ = inner.cancel.cancelled() => break,
            _ = inner.execute(op) => {}
        }
    }

    let drained = inner.drain();
    debug!(channel = %inner.channel, drained, "admission worker stopped");
}

impl Inner {
    fn depth(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn pop(&self) -> Option<QueuedOperation> {
        let (op, depth) = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            let op = pending.pop();
            (op, pending.len())
        };
        if op.is_some() {
            self.publish_depth(depth);
        }
        op
    }

    /// Put a retried operation back. Retries never count against the depth limit.
    fn requeue(&self, op: QueuedOperation) {
        let depth = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending.push(op);
            pending.len()
        };
        self.publish_depth(depth);
        self.notify.notify_one();
    }

    fn drain(&self) -> usize {
        let drained: Vec<QueuedOperation> = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending.drain().collect()
        };
        let count = drained.len();
        for mut op in drained {
            op.job.reject(Error::Closed);
        }
        self.publish_depth(0);
        count
    }

    fn publish_depth(&self, depth: usize) {
        self.monitor.set_queue_depth(depth);
        #[cfg(feature = "metrics")]
        gauge!(admission::QUEUE_DEPTH, labels::CHANNEL => self.channel.clone()).set(depth as f64);
    }

    async fn acquire_token(&self) {
        loop {
            if self.bucket.try_consume(1) {
                self.monitor
                    .record_admission(self.bucket.available_tokens());
                return;
            }
            let wait = self.bucket.time_until_available(1).min(MAX_THROTTLE_WAIT);
            self.monitor.record_throttle();
            debug!(
                channel = %self.channel,
                wait_ms = wait.as_millis() as u64,
                "admission throttled, waiting for token"
            );
            #[cfg(feature = "metrics")]
            counter!(admission::THROTTLED_TOTAL, labels::CHANNEL => self.channel.clone())
                .increment(1);
            tokio::time::sleep(wait).await;
        }
    }

    async fn execute(&self, mut op: QueuedOperation) {
        if op.job.is_abandoned() {
            debug!(channel = %self.channel, id = op.id, "skipping abandoned operation");
            return;
        }

        self.acquire_token().await;

        let queued_for = op.enqueued_at.elapsed();
        let started = Instant::now();
        let result = op.job.attempt(op.retry_count).await;
        let latency = started.elapsed();

        #[cfg(feature = "metrics")]
        histogram!(admission::OPERATION_DURATION_SECONDS, labels::CHANNEL => self.channel.clone())
            .record(latency.as_secs_f64());

        match result {
            Ok(()) => {
                self.monitor.record_success(latency);
                self.backoff.record_success();
                debug!(
                    channel = %self.channel,
                    id = op.id,
                    retries = op.retry_count,
                    latency_ms = latency.as_millis() as u64,
                    queued_ms = queued_for.as_millis() as u64,
                    "operation completed"
                );
                #[cfg(feature = "metrics")]
                counter!(
                    admission::OPERATIONS_TOTAL,
                    labels::CHANNEL => self.channel.clone(),
                    labels::OUTCOME => "success"
                )
                .increment(1);
            },
            Err(error) => {
                self.monitor.record_failure(latency);
                let streak = self.backoff.record_failure();
                let plan = self.classifier.retry_plan(&error);

                #[cfg(feature = "metrics")]
                counter!(
                    admission::OPERATIONS_TOTAL,
                    labels::CHANNEL => self.channel.clone(),
                    labels::OUTCOME => "failure"
                )
                .increment(1);

                if op.retry_count < plan.max_retries {
                    let mut delay = self
                        .backoff
                        .next_delay(streak.saturating_sub(1), plan.multiplier);
                    if let Some(hint) = error.retry_after {
                        delay = delay.max(hint);
                    }
                    op.retry_count += 1;
                    warn!(
                        channel = %self.channel,
                        id = op.id,
                        retry = op.retry_count,
                        max_retries = plan.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "sink operation failed, retrying"
                    );
                    #[cfg(feature = "metrics")]
                    counter!(admission::RETRIES_TOTAL, labels::CHANNEL => self.channel.clone())
                        .increment(1);
                    tokio::time::sleep(delay).await;
                    self.requeue(op);
                } else {
                    warn!(
                        channel = %self.channel,
                        id = op.id,
                        retries = op.retry_count,
                        error = %error,
                        "sink operation failed permanently"
                    );
                    let retries = op.retry_count;
                    op.job.reject(Error::Sink {
                        source: error,
                        retries,
                    });
                }
            },
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        std::sync::atomic::{AtomicU32, Ordering::SeqCst},
    };

    fn config() -> RateLimitConfig {
        RateLimitConfig {
            capacity: 100,
            refill_rate_per_second: 100.0,
            max_queue_depth: 16,
            base_backoff_ms: 10,
            max_backoff_ms: 1_000,
            monitoring_window_seconds: 60,
        }
    }

    /// Occupies the worker until released, so later submissions pile up.
    async fn block_worker(queue: &AdmissionQueue) -> (Arc<Notify>, Ticket<()>) {
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let ticket = {
            let started = Arc::clone(&started);
            let release = Arc::clone(&release);
            queue
                .enqueue(Priority::Low, move || {
                    let started = Arc::clone(&started);
                    let release = Arc::clone(&release);
                    async move {
                        started.notify_one();
                        release.notified().await;
                        Ok(())
                    }
                })
                .unwrap()
        };
        started.notified().await;
        (release, ticket)
    }

    fn failing(
        attempts: Arc<AtomicU32>,
        failures: u32,
    ) -> impl FnMut() -> BoxFuture<'static, SinkResult<u32>> + Send + 'static {
        move || {
            let attempts = Arc::clone(&attempts);
            Box::pin(async move {
                let n = attempts.fetch_add(1, SeqCst) + 1;
                if n <= failures {
                    Err(SinkError::new("connection reset"))
                } else {
                    Ok(n)
                }
            })
        }
    }

    struct NeverRetry;

    impl RetryClassifier for NeverRetry {
        fn retry_plan(&self, _error: &SinkError) -> RetryPlan {
            RetryPlan::none()
        }
    }

    #[tokio::test]
    async fn runs_by_priority_then_submission_order() {
        let queue = AdmissionQueue::new("test", config());
        let (release, gate) = block_worker(&queue).await;

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut tickets = Vec::new();
        for (label, priority) in [
            ("low", Priority::Low),
            ("urgent-1", Priority::Urgent),
            ("normal", Priority::Normal),
            ("urgent-2", Priority::Urgent),
        ] {
            let order = Arc::clone(&order);
            tickets.push(
                queue
                    .enqueue(priority, move || {
                        let order = Arc::clone(&order);
                        async move {
                            order.lock().unwrap().push(label);
                            Ok(())
                        }
                    })
                    .unwrap(),
            );
        }

        release.notify_one();
        gate.await.unwrap();
        for ticket in tickets {
            ticket.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![
            "urgent-1", "urgent-2", "normal", "low"
        ]);
    }

    #[tokio::test]
    async fn rejects_when_full() {
        let mut cfg = config();
        cfg.max_queue_depth = 2;
        let queue = AdmissionQueue::new("test", cfg);
        let (release, gate) = block_worker(&queue).await;

        let a = queue.enqueue(Priority::Normal, || async { Ok(1) }).unwrap();
        let b = queue.enqueue(Priority::Normal, || async { Ok(2) }).unwrap();
        let err = queue
            .enqueue(Priority::Urgent, || async { Ok(3) })
            .unwrap_err();
        assert!(matches!(err, Error::QueueFull { depth: 2, limit: 2 }));

        release.notify_one();
        gate.await.unwrap();
        assert_eq!(a.await.unwrap().value, 1);
        assert_eq!(b.await.unwrap().value, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let queue = AdmissionQueue::with_classifier(
            "test",
            config(),
            Arc::new(FixedRetry {
                max_retries: 3,
                multiplier: 1.0,
            }),
        );
        let attempts = Arc::new(AtomicU32::new(0));
        let admitted = queue
            .submit_admitted(Priority::Normal, failing(Arc::clone(&attempts), 2))
            .await
            .unwrap();
        assert_eq!(admitted, Admitted {
            value: 3,
            retries: 2
        });
        assert_eq!(attempts.load(SeqCst), 3);

        let metrics = queue.metrics();
        assert_eq!(metrics.total_operations, 3);
        assert_eq!(metrics.failed_operations, 2);
        assert_eq!(metrics.successful_operations, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_surface_the_sink_error() {
        let queue = AdmissionQueue::with_classifier(
            "test",
            config(),
            Arc::new(FixedRetry {
                max_retries: 2,
                multiplier: 1.0,
            }),
        );
        let attempts = Arc::new(AtomicU32::new(0));
        let err = queue
            .submit(Priority::Normal, failing(Arc::clone(&attempts), u32::MAX))
            .await
            .unwrap_err();
        match err {
            Error::Sink { source, retries } => {
                assert_eq!(retries, 2);
                assert_eq!(source.message, "connection reset");
            },
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(attempts.load(SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_failure_is_rejected_at_once() {
        let queue = AdmissionQueue::with_classifier("test", config(), Arc::new(NeverRetry));
        let attempts = Arc::new(AtomicU32::new(0));
        let err = queue
            .submit(Priority::High, failing(Arc::clone(&attempts), 1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Sink { retries: 0, .. }));
        assert_eq!(attempts.load(SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_tokens_when_bucket_is_empty() {
        let mut cfg = config();
        cfg.capacity = 1;
        cfg.refill_rate_per_second = 1.0;
        let queue = AdmissionQueue::new("test", cfg);

        let start = Instant::now();
        queue.submit(Priority::Normal, || async { Ok(()) }).await.unwrap();
        queue.submit(Priority::Normal, || async { Ok(()) }).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(999));

        let metrics = queue.metrics();
        assert!(metrics.last_throttle_at.is_some());
        assert_eq!(metrics.burst_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_hint_extends_backoff() {
        let queue = AdmissionQueue::with_classifier(
            "test",
            config(),
            Arc::new(FixedRetry {
                max_retries: 1,
                multiplier: 1.0,
            }),
        );
        let attempts = Arc::new(AtomicU32::new(0));
        let start = Instant::now();
        let counter = Arc::clone(&attempts);
        queue
            .submit(Priority::Normal, move || {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, SeqCst) == 0 {
                        Err(SinkError::new("Too Many Requests")
                            .with_status(429)
                            .with_retry_after(Duration::from_secs(10)))
                    } else {
                        Ok(())
                    }
                }
            })
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_secs(10));
        assert_eq!(attempts.load(SeqCst), 2);
    }

    #[tokio::test]
    async fn shutdown_closes_pending_operations() {
        let queue = AdmissionQueue::new("test", config());
        let (_release, gate) = block_worker(&queue).await;
        let pending = queue.enqueue(Priority::Normal, || async { Ok(()) }).unwrap();

        queue.shutdown();
        assert!(matches!(pending.await, Err(Error::Closed)));
        assert!(matches!(gate.await, Err(Error::Closed)));
        assert!(matches!(
            queue.enqueue(Priority::Normal, || async { Ok(()) }),
            Err(Error::Closed)
        ));
    }

    #[tokio::test]
    async fn dropped_ticket_is_never_executed() {
        let queue = AdmissionQueue::new("test", config());
        let (release, gate) = block_worker(&queue).await;

        let ran = Arc::new(AtomicU32::new(0));
        let flag = Arc::clone(&ran);
        let ticket = queue
            .enqueue(Priority::Normal, move || {
                let flag = Arc::clone(&flag);
                async move {
                    flag.fetch_add(1, SeqCst);
                    Ok(())
                }
            })
            .unwrap();
        drop(ticket);

        release.notify_one();
        gate.await.unwrap();
        queue.submit(Priority::Low, || async { Ok(()) }).await.unwrap();
        assert_eq!(ran.load(SeqCst), 0);
    }
}
