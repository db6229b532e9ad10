//! Shared application state for the scoring server

use std::sync::Arc;

use bandit_core::{CapabilityRegistry, ServerProfile};
use bandit_stream::RecordSink;

use crate::workers::WorkerPool;

/// Shared application state accessible by all handlers
#[derive(Clone)]
pub struct AppState {
    /// Scoring workers
    pub workers: Arc<WorkerPool>,
    /// Destination for experience events; `None` when logging is disabled
    pub sink: Option<Arc<dyn RecordSink>>,
    /// Request decoders and response encoders
    pub registry: Arc<CapabilityRegistry>,
    /// Static serving profile
    pub profile: ServerProfile,
}

impl AppState {
    pub fn new(
        workers: Arc<WorkerPool>,
        registry: Arc<CapabilityRegistry>,
        profile: ServerProfile,
    ) -> Self {
        Self {
            workers,
            sink: None,
            registry,
            profile,
        }
    }

    /// Enable experience logging into `sink`
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn RecordSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn logging_enabled(&self) -> bool {
        self.sink.is_some()
    }
}
