//! Failure handling for sink calls.
//!
//! [`ErrorClassifier`] maps a [`SinkError`](ferry_common::SinkError) onto a
//! closed taxonomy with a retry policy; [`RecoveryExecutor`] carries out the
//! chosen strategy against the sink.

pub mod classify;
pub mod config;
pub mod executor;
pub mod plain;

pub use {
    classify::{ErrorClass, ErrorClassification, ErrorClassifier, RecoveryStrategy, classify_error},
    config::{PolicyOverride, RecoveryConfig},
    executor::{OperationKind, RecoveryContext, RecoveryExecutor, RecoveryOutcome},
    plain::strip_rich_text,
};
