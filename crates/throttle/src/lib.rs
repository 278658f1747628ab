//! Admission control for sink calls.
//!
//! A [`TokenBucket`] gates every call, a [`BackoffCalculator`] spaces out
//! retries, a [`UsageMonitor`] keeps rolling counters, and the
//! [`AdmissionQueue`] ties them together behind a single-flight worker so a
//! delivery channel never has more than one remote call in progress.

pub mod backoff;
pub mod bucket;
pub mod config;
pub mod error;
pub mod monitor;
pub mod queue;

pub use {
    backoff::BackoffCalculator,
    bucket::TokenBucket,
    config::RateLimitConfig,
    error::{Error, Result},
    monitor::{RateLimitMetrics, UsageMonitor},
    queue::{
        Admitted, AdmissionQueue, FixedRetry, Priority, RetryClassifier, RetryPlan, Ticket,
    },
};
