//! Streamed-reply delivery.
//!
//! A [`StreamCoordinator`] turns a sequence of text fragments into a single
//! remote message that is created once and then edited in place, at most once
//! per `min_update_interval_ms`, through the channel's admission queue.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod sink;
pub mod truncate;

pub use {
    config::StreamConfig,
    coordinator::StreamCoordinator,
    error::{Error, Result},
    sink::QueuedSink,
    truncate::{TAIL_MARGIN, truncate_message},
};
