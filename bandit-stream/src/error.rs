//! Error types for event delivery.

/// Error type for delivery operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The delivery stream failed; the whole request may be retried.
    #[error("Delivery stream error: {0}")]
    Transient(String),

    /// The publisher queue is at capacity.
    #[error("Publisher queue is full ({capacity} records)")]
    QueueFull { capacity: usize },

    /// The publisher or channel has shut down.
    #[error("Publisher is closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, Error>;
