//! Metadata store trait

use async_trait::async_trait;

use super::types::{ExperimentRecord, HostingState, ModelRecord};
use crate::error::StoreError;

/// Access to experiment and model metadata
///
/// Reads are consistent: a write acknowledged before a read is visible to it.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Verify the backing tables exist and are usable
    async fn check_ready(&self) -> Result<(), StoreError>;

    /// Register a new experiment; fails with `Conflict` if it already exists
    async fn put_experiment_if_absent(&self, record: ExperimentRecord) -> Result<(), StoreError>;

    /// Register a new model; fails with `Conflict` if it already exists
    async fn put_model_if_absent(&self, record: ModelRecord) -> Result<(), StoreError>;

    /// Look up an experiment
    async fn experiment(&self, experiment_id: &str) -> Result<Option<ExperimentRecord>, StoreError>;

    /// Look up one model of an experiment
    async fn model(
        &self,
        experiment_id: &str,
        model_id: &str,
    ) -> Result<Option<ModelRecord>, StoreError>;

    /// Set the experiment's hosting state, leaving other fields untouched
    async fn update_hosting_state(
        &self,
        experiment_id: &str,
        state: HostingState,
    ) -> Result<(), StoreError>;
}
