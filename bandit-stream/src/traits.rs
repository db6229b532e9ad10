//! Core traits for event delivery.

use async_trait::async_trait;
use tokio::sync::mpsc;

/// One record on the wire, newline-terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub data: Vec<u8>,
}

impl Record {
    /// Wrap a serialized event, appending the trailing newline if missing.
    pub fn new(mut data: Vec<u8>) -> Self {
        if data.last() != Some(&b'\n') {
            data.push(b'\n');
        }
        Self { data }
    }
}

/// Per-record status returned by a batch put, in request order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordResult {
    /// Set when the stream rejected this record.
    pub error_code: Option<String>,
}

impl RecordResult {
    pub fn ok() -> Self {
        Self { error_code: None }
    }

    pub fn failed(code: impl Into<String>) -> Self {
        Self {
            error_code: Some(code.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error_code.is_none()
    }
}

/// Result of a batch put.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchPutOutcome {
    pub failed_put_count: usize,
    pub responses: Vec<RecordResult>,
}

impl BatchPutOutcome {
    /// Outcome where every one of `count` records was accepted.
    pub fn all_ok(count: usize) -> Self {
        Self {
            failed_put_count: 0,
            responses: vec![RecordResult::ok(); count],
        }
    }
}

/// A durable delivery stream.
#[async_trait]
pub trait DeliveryStream: Send + Sync {
    /// Submit several records; individual records may be rejected.
    async fn put_record_batch(
        &self,
        stream_name: &str,
        records: &[Record],
    ) -> crate::Result<BatchPutOutcome>;

    /// Submit one record.
    async fn put_record(&self, stream_name: &str, record: &Record) -> crate::Result<()>;
}

/// Source of serialized events for subscriber mode.
#[async_trait]
pub trait EventSource: Send {
    /// Next event, or `None` once the source is exhausted.
    async fn next(&mut self) -> Option<Vec<u8>>;
}

#[async_trait]
impl EventSource for mpsc::Receiver<Vec<u8>> {
    async fn next(&mut self) -> Option<Vec<u8>> {
        self.recv().await
    }
}

/// Anything that accepts serialized events without blocking the caller.
pub trait RecordSink: Send + Sync {
    fn submit(&self, data: Vec<u8>) -> crate::Result<()>;
}
