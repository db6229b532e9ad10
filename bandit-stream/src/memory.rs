//! In-memory DeliveryStream implementation for testing.
//!
//! Accepted records are kept in arrival order. Tests can script failures for
//! upcoming calls: reject specific records of the next batch, or fail a call
//! outright.

use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::traits::{BatchPutOutcome, DeliveryStream, Record, RecordResult};

/// Scripted behaviour for one upcoming call
#[derive(Debug, Clone)]
enum Script {
    /// Reject the records at these positions
    Reject(Vec<usize>),
    /// Fail the whole call
    Fail,
}

/// In-memory implementation of DeliveryStream for testing.
#[derive(Default)]
pub struct InMemoryDeliveryStream {
    accepted: Mutex<Vec<Record>>,
    /// Size of every batch submitted, including rejected ones
    batches: Mutex<Vec<usize>>,
    single_puts: Mutex<usize>,
    scripts: Mutex<VecDeque<Script>>,
}

impl InMemoryDeliveryStream {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the records at `positions` in the next call
    pub async fn reject_next(&self, positions: Vec<usize>) {
        self.scripts.lock().await.push_back(Script::Reject(positions));
    }

    /// Fail the next call with a stream-level error
    pub async fn fail_next(&self) {
        self.scripts.lock().await.push_back(Script::Fail);
    }

    /// Records accepted so far, in order
    pub async fn records(&self) -> Vec<Record> {
        self.accepted.lock().await.clone()
    }

    /// Accepted records decoded as JSON
    pub async fn json_records(&self) -> Vec<serde_json::Value> {
        self.accepted
            .lock()
            .await
            .iter()
            .filter_map(|r| serde_json::from_slice(&r.data).ok())
            .collect()
    }

    /// Sizes of the batches submitted so far
    pub async fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().await.clone()
    }

    pub async fn single_put_count(&self) -> usize {
        *self.single_puts.lock().await
    }
}

#[async_trait]
impl DeliveryStream for InMemoryDeliveryStream {
    async fn put_record_batch(
        &self,
        _stream_name: &str,
        records: &[Record],
    ) -> Result<BatchPutOutcome> {
        self.batches.lock().await.push(records.len());

        let rejected = match self.scripts.lock().await.pop_front() {
            Some(Script::Fail) => {
                return Err(Error::Transient("scripted stream failure".to_string()));
            }
            Some(Script::Reject(positions)) => positions,
            None => Vec::new(),
        };

        let mut accepted = self.accepted.lock().await;
        let mut outcome = BatchPutOutcome::default();
        for (index, record) in records.iter().enumerate() {
            if rejected.contains(&index) {
                outcome.failed_put_count += 1;
                outcome
                    .responses
                    .push(RecordResult::failed("ServiceUnavailableException"));
            } else {
                accepted.push(record.clone());
                outcome.responses.push(RecordResult::ok());
            }
        }
        Ok(outcome)
    }

    async fn put_record(&self, _stream_name: &str, record: &Record) -> Result<()> {
        *self.single_puts.lock().await += 1;

        match self.scripts.lock().await.pop_front() {
            Some(Script::Fail) => Err(Error::Transient("scripted stream failure".to_string())),
            Some(Script::Reject(positions)) if positions.contains(&0) => {
                Err(Error::Transient("record rejected".to_string()))
            }
            _ => {
                self.accepted.lock().await.push(record.clone());
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(n: usize) -> Vec<Record> {
        (0..n)
            .map(|i| Record::new(format!("{{\"i\":{i}}}").into_bytes()))
            .collect()
    }

    #[tokio::test]
    async fn accepts_batches_in_order() {
        let stream = InMemoryDeliveryStream::new();
        let outcome = stream.put_record_batch("s", &records(3)).await.unwrap();
        assert_eq!(outcome, BatchPutOutcome::all_ok(3));
        assert_eq!(stream.records().await, records(3));
    }

    #[tokio::test]
    async fn scripted_rejections_apply_once() {
        let stream = InMemoryDeliveryStream::new();
        stream.reject_next(vec![1]).await;

        let outcome = stream.put_record_batch("s", &records(3)).await.unwrap();
        assert_eq!(outcome.failed_put_count, 1);
        assert!(!outcome.responses[1].is_ok());
        assert_eq!(stream.records().await.len(), 2);

        let outcome = stream.put_record_batch("s", &records(3)).await.unwrap();
        assert_eq!(outcome.failed_put_count, 0);
    }

    #[tokio::test]
    async fn scripted_failure() {
        let stream = InMemoryDeliveryStream::new();
        stream.fail_next().await;
        assert!(stream.put_record("s", &records(1)[0]).await.is_err());
        assert!(stream.put_record("s", &records(1)[0]).await.is_ok());
        assert_eq!(stream.single_put_count().await, 2);
    }
}
