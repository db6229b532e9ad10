//! bandit-core: Core library for serving contextual-bandit policies
//!
//! This crate provides everything the serving process needs apart from the
//! HTTP surface and the event pipeline:
//!
//! - **Scorers** - [`Scorer`] trait and [`VwScorer`], which drives a `vw`
//!   subprocess over its stdin/stdout pipe protocol
//! - **Action choice** - [`agent::choose_actions`] samples from the scorer's
//!   distribution
//! - **Experience events** - [`ScoringEvent`] and [`RewardEvent`] records
//! - **Metadata** - [`MetadataStore`] trait with in-memory and file backends
//! - **Artifacts** - [`ObjectStore`] downloads and model bundle handling
//! - **Lifecycle** - [`ModelManager`] resolves the startup model and hot-swaps
//!   to newer ones, publishing an [`ActiveModelPointer`]
//! - **Capabilities** - [`CapabilityRegistry`] of scorer factories and codecs
//!
//! # Architecture
//!
//! ```text
//! metadata store ──poll──▶ ModelManager ──download──▶ object store
//!                              │
//!                              ├──publish──▶ SharedRegistry (active pointer)
//!                              └──signal───▶ ReloadSignal ──▶ workers
//! ```

pub mod agent;
pub mod artifact;
pub mod codec;
pub mod config;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod pointer;
pub mod registry;
pub mod reload;
pub mod report;
pub mod scorer;
pub mod store;

// Re-export key types for convenience
pub use agent::{Decision, choose_actions};
pub use artifact::{ModelArtifact, ObjectStore, ObjectUri};
pub use codec::{RequestDecoder, ResponseEncoder, parse_content_type};
pub use config::{
    BatchStrategy, InferenceMode, LifecycleConfig, LoggingConfig, ServerProfile, ServingConfig,
};
pub use error::{ErrorKind, Result, ServingError};
pub use events::{EventId, ExperienceEvent, RewardEvent, ScoringEvent, new_event_id};
pub use lifecycle::{ManagerState, ModelManager, PollOutcome};
pub use pointer::{ActiveModelPointer, InMemoryRegistry, SharedRegistry};
pub use registry::CapabilityRegistry;
pub use reload::{ChannelReload, PidFileReload, ReloadSignal};
pub use report::report_error;
pub use scorer::{MockScorer, MockScorerFactory, Scorer, ScorerFactory, ScorerState, VwScorer};
pub use store::{
    ExperimentRecord, FileMetadataStore, HostingState, InMemoryMetadataStore, MetadataStore,
    ModelRecord,
};
