use serde::{Deserialize, Serialize};

/// Admission settings for one queue. Fixed for the lifetime of the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Burst size: tokens held by a full bucket.
    #[serde(alias = "admissionCapacity")]
    pub capacity: u32,

    /// Tokens added per second.
    #[serde(alias = "refillRatePerSecond")]
    pub refill_rate_per_second: f64,

    /// Pending operations allowed before submissions are rejected.
    #[serde(alias = "maxQueueDepth")]
    pub max_queue_depth: usize,

    /// Delay before the first retry (ms).
    #[serde(alias = "baseBackoffMs")]
    pub base_backoff_ms: u64,

    /// Upper bound for the exponential part of the retry delay (ms).
    #[serde(alias = "maxBackoffMs")]
    pub max_backoff_ms: u64,

    /// Width of the rolling window used for latency and error rate (seconds).
    #[serde(alias = "monitoringWindowSeconds")]
    pub monitoring_window_seconds: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 30,
            refill_rate_per_second: 1.0,
            max_queue_depth: 100,
            base_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
            monitoring_window_seconds: 60,
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let cfg = RateLimitConfig::default();
        assert_eq!(cfg.capacity, 30);
        assert_eq!(cfg.max_queue_depth, 100);
        assert_eq!(cfg.base_backoff_ms, 1_000);
        assert_eq!(cfg.max_backoff_ms, 30_000);
    }

    #[test]
    fn deserialize_accepts_camel_case_aliases() {
        let json = r#"{
            "admissionCapacity": 5,
            "refillRatePerSecond": 0.5,
            "max_queue_depth": 10
        }"#;
        let cfg: RateLimitConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.capacity, 5);
        assert!((cfg.refill_rate_per_second - 0.5).abs() < f64::EPSILON);
        assert_eq!(cfg.max_queue_depth, 10);
        // defaults for unspecified fields
        assert_eq!(cfg.monitoring_window_seconds, 60);
    }
}
