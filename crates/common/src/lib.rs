//! Shared types, error definitions, and the sink contract used across all ferry crates.

pub mod error;
pub mod sink;
pub mod types;

pub use {
    error::FromMessage,
    sink::{MessageSink, SinkError, SinkResult},
    types::{DeliveryTarget, MessageHandle, StreamEvent, StreamReceiver, StreamSender, TextFormat},
};
