//! Experience event delivery for bandit.
//!
//! This crate moves serialized scoring and reward events from the request
//! path to a durable delivery stream without making callers wait.
//!
//! # Key Types
//!
//! - [`EventPublisher`] - Buffered or unbuffered publisher with bounded retries
//! - [`DeliveryStream`] - Trait for the destination stream
//! - [`RecordSink`] - What the request path submits events to
//! - [`ChannelSink`] - In-process channel drained by [`EventPublisher::forward_from`]
//! - [`InMemoryDeliveryStream`] / [`JsonlDeliveryStream`] - Stream adapters

pub mod config;
pub mod error;
pub mod jsonl;
pub mod memory;
pub mod publisher;
pub mod traits;

// Re-exports
pub use config::PublisherConfig;
pub use error::{Error, Result};
pub use jsonl::JsonlDeliveryStream;
pub use memory::InMemoryDeliveryStream;
pub use publisher::{ChannelSink, EventPublisher};
pub use traits::{BatchPutOutcome, DeliveryStream, EventSource, Record, RecordResult, RecordSink};
