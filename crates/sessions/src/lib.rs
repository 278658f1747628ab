//! Delivery session bookkeeping.
//!
//! A [`SessionStore`] owns every [`Session`] together with its
//! [`StreamingContext`] and version history. Nothing here runs in the
//! background: expiry happens when the caller invokes
//! [`SessionStore::sweep`] from its own tick.

pub mod config;
pub mod error;
pub mod session;
pub mod store;

pub use {
    config::SessionLimits,
    error::{Error, Result},
    session::{MessageVersion, Session, SessionSnapshot, SessionStatus, StreamingContext},
    store::{SessionStats, SessionStore, now_ms},
};
