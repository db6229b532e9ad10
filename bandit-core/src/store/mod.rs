//! Experiment and model metadata

pub mod file;
pub mod memory;
pub mod traits;
pub mod types;

pub use file::{FileMetadataStore, MetadataDocument};
pub use memory::InMemoryMetadataStore;
pub use traits::MetadataStore;
pub use types::{ExperimentRecord, HostingState, HostingWorkflowMetadata, ModelRecord};
