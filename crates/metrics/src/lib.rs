//! Metric names for ferry.
//!
//! Crates record through the `metrics` facade re-exported here, behind their
//! own `metrics` cargo feature. Nothing is exported until the embedding
//! application installs a recorder.
//!
//! ```rust,ignore
//! use ferry_metrics::{admission, counter, labels};
//!
//! counter!(admission::OPERATIONS_TOTAL, labels::OUTCOME => "success").increment(1);
//! ```

mod definitions;

pub use definitions::*;

// Re-export metrics macros for convenience
pub use metrics::{counter, gauge, histogram};
