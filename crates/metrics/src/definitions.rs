//! Metric name and label definitions.
//!
//! Centralizing these keeps names consistent between the crates that record
//! them and the dashboards that read them.

/// Admission queue metrics
pub mod admission {
    /// Operations executed against the sink, labelled by outcome
    pub const OPERATIONS_TOTAL: &str = "ferry_admission_operations_total";
    /// Sink call latency in seconds
    pub const OPERATION_DURATION_SECONDS: &str = "ferry_admission_operation_duration_seconds";
    /// Operations re-enqueued after a retryable failure
    pub const RETRIES_TOTAL: &str = "ferry_admission_retries_total";
    /// Times the worker waited for admission tokens
    pub const THROTTLED_TOTAL: &str = "ferry_admission_throttled_total";
    /// Submissions rejected because the queue was full
    pub const REJECTED_TOTAL: &str = "ferry_admission_rejected_total";
    /// Operations waiting in the queue
    pub const QUEUE_DEPTH: &str = "ferry_admission_queue_depth";
}

/// Session store metrics
pub mod session {
    /// Sessions created
    pub const CREATED_TOTAL: &str = "ferry_sessions_created_total";
    /// Sessions removed, labelled by reason
    pub const EVICTED_TOTAL: &str = "ferry_sessions_evicted_total";
    /// Sessions currently held by the store
    pub const ACTIVE: &str = "ferry_sessions_active";
}

/// Stream coordinator metrics
pub mod stream {
    /// Fragments received from the producer
    pub const FRAGMENTS_TOTAL: &str = "ferry_stream_fragments_total";
    /// Remote updates transmitted (create or edit)
    pub const UPDATES_TOTAL: &str = "ferry_stream_updates_total";
    /// Recovery attempts, labelled by strategy and outcome
    pub const RECOVERIES_TOTAL: &str = "ferry_stream_recoveries_total";
    /// Texts cut down to the sink's message limit
    pub const TRUNCATIONS_TOTAL: &str = "ferry_stream_truncations_total";
}

/// Common label keys
pub mod labels {
    pub const CHANNEL: &str = "channel";
    pub const OUTCOME: &str = "outcome";
    pub const ERROR_CLASS: &str = "error_class";
    pub const STRATEGY: &str = "strategy";
    pub const REASON: &str = "reason";
}
