//! Rolling usage counters for an admission queue.

use std::{
    collections::VecDeque,
    sync::Mutex,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use {
    serde::{Deserialize, Serialize},
    tokio::time::Instant,
};

/// Point-in-time view of an admission queue, for dashboards and logs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitMetrics {
    /// Operations executed since the queue was created.
    pub total_operations: u64,
    pub successful_operations: u64,
    pub failed_operations: u64,
    /// Mean sink latency over the monitoring window.
    pub average_latency_ms: f64,
    /// Failed / executed over the monitoring window (0 when idle).
    pub error_rate: f64,
    /// Operations executed within the monitoring window.
    pub window_operations: u64,
    /// Operations waiting to run.
    pub queue_depth: usize,
    pub tokens_available: f64,
    /// Last time the worker had to wait for a token (Unix millis).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_throttle_at: Option<u64>,
    /// Times the bucket was drained after having headroom.
    pub burst_count: u64,
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    at: Instant,
    latency: Duration,
    success: bool,
}

#[derive(Debug, Default)]
struct MonitorState {
    samples: VecDeque<Sample>,
    total: u64,
    successful: u64,
    failed: u64,
    queue_depth: usize,
    last_throttle_at: Option<u64>,
    burst_count: u64,
    depleted: bool,
}

/// Sliding-window usage monitor.
///
/// Lifetime totals are plain counters; latency and error rate are computed
/// from the samples inside the window, pruned on every read and write.
#[derive(Debug)]
pub struct UsageMonitor {
    window: Duration,
    state: Mutex<MonitorState>,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

impl UsageMonitor {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            state: Mutex::new(MonitorState::default()),
        }
    }

    pub fn record_success(&self, latency: Duration) {
        self.record_at(Instant::now(), latency, true);
    }

    pub fn record_failure(&self, latency: Duration) {
        self.record_at(Instant::now(), latency, false);
    }

    fn record_at(&self, now: Instant, latency: Duration, success: bool) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.total += 1;
        if success {
            state.successful += 1;
        } else {
            state.failed += 1;
        }
        state.samples.push_back(Sample {
            at: now,
            latency,
            success,
        });
        self.prune(&mut state, now);
    }

    /// The worker had to wait for admission.
    pub fn record_throttle(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.last_throttle_at = Some(now_ms());
    }

    /// Called after every admission with what is left in the bucket. A burst
    /// is counted once per transition from headroom to an empty bucket.
    pub fn record_admission(&self, tokens_left: f64) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let depleted = tokens_left < 1.0;
        if depleted && !state.depleted {
            state.burst_count += 1;
        }
        state.depleted = depleted;
    }

    pub fn set_queue_depth(&self, depth: usize) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.queue_depth = depth;
    }

    #[must_use]
    pub fn snapshot(&self, tokens_available: f64) -> RateLimitMetrics {
        self.snapshot_at(Instant::now(), tokens_available)
    }

    fn snapshot_at(&self, now: Instant, tokens_available: f64) -> RateLimitMetrics {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        self.prune(&mut state, now);

        let window_operations = state.samples.len() as u64;
        let window_failed = state.samples.iter().filter(|s| !s.success).count() as u64;
        let (average_latency_ms, error_rate) = if window_operations == 0 {
            (0.0, 0.0)
        } else {
            let latency_sum_ms: f64 = state
                .samples
                .iter()
                .map(|s| s.latency.as_secs_f64() * 1_000.0)
                .sum();
            (
                latency_sum_ms / window_operations as f64,
                window_failed as f64 / window_operations as f64,
            )
        };

        RateLimitMetrics {
            total_operations: state.total,
            successful_operations: state.successful,
            failed_operations: state.failed,
            average_latency_ms,
            error_rate,
            window_operations,
            queue_depth: state.queue_depth,
            tokens_available,
            last_throttle_at: state.last_throttle_at,
            burst_count: state.burst_count,
        }
    }

    fn prune(&self, state: &mut MonitorState, now: Instant) {
        while let Some(front) = state.samples.front() {
            if now.saturating_duration_since(front.at) > self.window {
                state.samples.pop_front();
            } else {
                break;
            }
        }
    }
}
