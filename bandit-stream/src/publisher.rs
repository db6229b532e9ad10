//! Buffered, retrying event publisher.
//!
//! In buffered mode records wait in a bounded FIFO queue and are sent in
//! batches, either when the queue reaches `batch_size` or when the monitor
//! task finds records older than `batch_time`. In unbuffered mode every
//! record is sent on its own. Either way the caller never waits on the
//! delivery stream.
//!
//! # Ordering
//!
//! Flushes are serialized. A flush copies up to `batch_size` records from the
//! queue head, sends them, and only then removes them, so records leave the
//! queue in entry order and only after their send attempt has finished.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{Semaphore, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace, warn};

use crate::config::PublisherConfig;
use crate::error::{Error, Result};
use crate::traits::{DeliveryStream, EventSource, Record, RecordSink};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Inner {
    config: PublisherConfig,
    stream: Arc<dyn DeliveryStream>,
    queue: Mutex<VecDeque<Record>>,
    flush_lock: tokio::sync::Mutex<()>,
    last_flush: Mutex<Instant>,
    permits: Semaphore,
}

impl Inner {
    async fn flush(&self) -> usize {
        let _guard = self.flush_lock.lock().await;

        let batch: Vec<Record> = lock(&self.queue)
            .iter()
            .take(self.config.batch_size.max(1))
            .cloned()
            .collect();
        if batch.is_empty() {
            return 0;
        }
        *lock(&self.last_flush) = Instant::now();

        let taken = batch.len();
        let delivered = self.send_batch(batch).await;

        let mut queue = lock(&self.queue);
        let taken = taken.min(queue.len());
        queue.drain(..taken);
        delivered
    }

    async fn send_batch(&self, records: Vec<Record>) -> usize {
        let stream_name = &self.config.stream_name;
        let mut pending = records;
        let mut delivered = 0;

        // One initial send plus up to `max_retries` resubmissions
        for attempt in 0..=self.config.max_retries {
            if pending.is_empty() {
                break;
            }
            if attempt > 0 {
                tokio::time::sleep(self.config.backoff(attempt)).await;
            }

            match self.stream.put_record_batch(stream_name, &pending).await {
                Ok(outcome) if outcome.failed_put_count == 0 => {
                    delivered += pending.len();
                    pending.clear();
                }
                Ok(outcome) => {
                    let failed: Vec<Record> = pending
                        .iter()
                        .enumerate()
                        .filter(|(index, _)| {
                            outcome
                                .responses
                                .get(*index)
                                .is_none_or(|result| !result.is_ok())
                        })
                        .map(|(_, record)| record.clone())
                        .collect();
                    delivered += pending.len() - failed.len();
                    warn!(
                        stream = %stream_name,
                        attempt,
                        failed = failed.len(),
                        "Delivery stream rejected records, resubmitting"
                    );
                    pending = failed;
                }
                Err(e) => {
                    warn!(
                        stream = %stream_name,
                        attempt,
                        error = %e,
                        "Batch put failed, resubmitting"
                    );
                }
            }
        }

        if !pending.is_empty() {
            warn!(
                stream = %stream_name,
                dropped = pending.len(),
                "Dropping records after retries were exhausted"
            );
        }
        delivered
    }

    async fn send_single(&self, record: Record) -> bool {
        let stream_name = &self.config.stream_name;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tokio::time::sleep(self.config.backoff(attempt)).await;
            }
            match self.stream.put_record(stream_name, &record).await {
                Ok(()) => return true,
                Err(e) => {
                    warn!(stream = %stream_name, attempt, error = %e, "Record put failed");
                }
            }
        }

        warn!(stream = %stream_name, "Dropping record after retries were exhausted");
        false
    }
}

/// Publishes serialized events to a [`DeliveryStream`].
///
/// Must be created inside a tokio runtime: buffered mode starts its monitor
/// task immediately.
pub struct EventPublisher {
    inner: Arc<Inner>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    closed: AtomicBool,
}

impl EventPublisher {
    pub fn new(config: PublisherConfig, stream: Arc<dyn DeliveryStream>) -> Self {
        let buffer_on = config.buffer_on;
        let workers = config.workers.max(1);
        let inner = Arc::new(Inner {
            config,
            stream,
            queue: Mutex::new(VecDeque::new()),
            flush_lock: tokio::sync::Mutex::new(()),
            last_flush: Mutex::new(Instant::now()),
            permits: Semaphore::new(workers),
        });

        let publisher = Self {
            inner,
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            closed: AtomicBool::new(false),
        };
        if buffer_on {
            publisher.spawn_monitor();
        }
        info!(
            stream = %publisher.inner.config.stream_name,
            buffered = buffer_on,
            "Event publisher started"
        );
        publisher
    }

    pub fn config(&self) -> &PublisherConfig {
        &self.inner.config
    }

    /// Records waiting in the queue
    pub fn queued(&self) -> usize {
        lock(&self.inner.queue).len()
    }

    fn spawn_monitor(&self) {
        let inner = Arc::clone(&self.inner);
        let shutdown = self.shutdown.clone();
        let batch_time = inner.config.batch_time;

        self.tracker.spawn(async move {
            let mut interval = tokio::time::interval(batch_time);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("Publisher monitor received shutdown signal");
                        break;
                    }
                    _ = interval.tick() => {
                        let stale = lock(&inner.last_flush).elapsed() >= batch_time;
                        let waiting = !lock(&inner.queue).is_empty();
                        if stale && waiting {
                            trace!("Monitor flushing stale records");
                            inner.flush().await;
                        }
                    }
                }
            }
        });
    }

    fn spawn_flush(&self) {
        let inner = Arc::clone(&self.inner);
        self.tracker.spawn(async move {
            let Ok(_permit) = inner.permits.acquire().await else {
                return;
            };
            inner.flush().await;
        });
    }

    fn spawn_single(&self, record: Record) {
        let inner = Arc::clone(&self.inner);
        self.tracker.spawn(async move {
            let Ok(_permit) = inner.permits.acquire().await else {
                return;
            };
            inner.send_single(record).await;
        });
    }

    /// Hand a record to the publisher without waiting for delivery
    pub fn publish(&self, data: Vec<u8>) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        let record = Record::new(data);

        if !self.inner.config.buffer_on {
            self.spawn_single(record);
            return Ok(());
        }

        let should_flush = {
            let mut queue = lock(&self.inner.queue);
            let capacity = self.inner.config.queue_capacity;
            if queue.len() >= capacity {
                warn!(capacity, "Publisher queue is full, rejecting record");
                return Err(Error::QueueFull { capacity });
            }
            queue.push_back(record);
            queue.len() >= self.inner.config.batch_size
        };
        if should_flush {
            self.spawn_flush();
        }
        Ok(())
    }

    /// Send one record inline, retrying on failure
    pub async fn send_now(&self, data: Vec<u8>) -> bool {
        self.inner.send_single(Record::new(data)).await
    }

    /// Send up to `batch_size` queued records as one batch
    ///
    /// Returns how many records the stream accepted.
    pub async fn flush(&self) -> usize {
        self.inner.flush().await
    }

    /// Send `records` as one batch, resubmitting only rejected records
    pub async fn send_batch(&self, records: Vec<Record>) -> usize {
        self.inner.send_batch(records).await
    }

    /// Deliver events from `source` in order until it is exhausted
    ///
    /// With buffering on, relayed events join the queue like published ones;
    /// otherwise each is sent inline before the next is pulled.
    pub async fn forward_from<S: EventSource>(&self, mut source: S) {
        info!(
            stream = %self.inner.config.stream_name,
            buffered = self.inner.config.buffer_on,
            "Forwarding events from subscriber"
        );
        while let Some(data) = source.next().await {
            if !self.inner.config.buffer_on {
                self.send_now(data).await;
            } else if let Err(e) = self.publish(data) {
                warn!(error = %e, "Dropping relayed event");
            }
        }
        debug!("Event source exhausted");
    }

    /// Stop accepting records, drain the queue and wait for in-flight sends
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown.cancel();

        while self.queued() > 0 {
            self.inner.flush().await;
        }

        self.tracker.close();
        if tokio::time::timeout(self.inner.config.shutdown_timeout, self.tracker.wait())
            .await
            .is_err()
        {
            warn!(
                timeout = ?self.inner.config.shutdown_timeout,
                "Timed out waiting for in-flight sends"
            );
        }
        info!(stream = %self.inner.config.stream_name, "Event publisher closed");
    }
}

impl RecordSink for EventPublisher {
    fn submit(&self, data: Vec<u8>) -> Result<()> {
        self.publish(data)
    }
}

/// Sink that hands records to an in-process channel
///
/// The receiving end is drained by [`EventPublisher::forward_from`].
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Vec<u8>>,
}

impl ChannelSink {
    /// Create a sink and the receiver it feeds
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl RecordSink for ChannelSink {
    fn submit(&self, data: Vec<u8>) -> Result<()> {
        self.tx.try_send(data).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => Error::QueueFull {
                capacity: self.tx.max_capacity(),
            },
            mpsc::error::TrySendError::Closed(_) => Error::Closed,
        })
    }
}
