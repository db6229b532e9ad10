//! Configuration for the event publisher.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for [`EventPublisher`](crate::EventPublisher).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherConfig {
    /// Name of the delivery stream receiving records.
    pub stream_name: String,

    /// Queue records and send them in batches instead of one by one.
    #[serde(default)]
    pub buffer_on: bool,

    /// Records per batch; reaching it triggers a flush.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Longest a queued record waits before the monitor flushes it.
    #[serde(default = "default_batch_time", with = "humantime_serde")]
    pub batch_time: Duration,

    /// Attempts per send before the remaining records are dropped.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Backoff unit; attempt `n` waits `base_delay * 2^n`.
    #[serde(default = "default_base_delay", with = "humantime_serde")]
    pub base_delay: Duration,

    /// Concurrent send tasks.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Queued records held before new ones are rejected.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// How long `close` waits for in-flight sends.
    #[serde(default = "default_shutdown_timeout", with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

fn default_batch_size() -> usize {
    50
}

fn default_batch_time() -> Duration {
    Duration::from_millis(200)
}

fn default_max_retries() -> u32 {
    5
}

fn default_base_delay() -> Duration {
    Duration::from_millis(100)
}

fn default_workers() -> usize {
    2
}

fn default_queue_capacity() -> usize {
    10_000
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(10)
}

impl PublisherConfig {
    pub fn new(stream_name: impl Into<String>) -> Self {
        Self {
            stream_name: stream_name.into(),
            buffer_on: false,
            batch_size: default_batch_size(),
            batch_time: default_batch_time(),
            max_retries: default_max_retries(),
            base_delay: default_base_delay(),
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }

    #[must_use]
    pub fn with_buffering(mut self, buffer_on: bool) -> Self {
        self.buffer_on = buffer_on;
        self
    }

    #[must_use]
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    #[must_use]
    pub fn with_batch_time(mut self, time: Duration) -> Self {
        self.batch_time = time;
        self
    }

    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    #[must_use]
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Delay before retry `attempt` (the first attempt has none).
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}
