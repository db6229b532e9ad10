//! In-memory MetadataStore implementation for testing.
//!
//! Stores records in memory without persistence. The helper methods let a
//! test play the part of the external deployment pipeline.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::traits::MetadataStore;
use super::types::{ExperimentRecord, HostingState, ModelRecord};
use crate::error::StoreError;

/// In-memory implementation of MetadataStore
#[derive(Default)]
pub struct InMemoryMetadataStore {
    experiments: RwLock<HashMap<String, ExperimentRecord>>,
    models: RwLock<HashMap<(String, String), ModelRecord>>,
    unavailable: AtomicBool,
    model_lookups: AtomicUsize,
}

impl InMemoryMetadataStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `check_ready` and every query fail, as if the table were missing
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Point the experiment at a new model, creating the record if needed
    pub async fn set_next_model_to_host(&self, experiment_id: &str, model_id: &str) {
        let mut experiments = self.experiments.write().await;
        experiments
            .entry(experiment_id.to_string())
            .or_insert_with(|| ExperimentRecord::new(experiment_id))
            .hosting_workflow_metadata
            .next_model_to_host_id = Some(model_id.to_string());
    }

    /// Number of model lookups served so far
    pub fn model_lookups(&self) -> usize {
        self.model_lookups.load(Ordering::SeqCst)
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::NotReady("in-memory store marked unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn check_ready(&self) -> Result<(), StoreError> {
        self.ensure_available()
    }

    async fn put_experiment_if_absent(&self, record: ExperimentRecord) -> Result<(), StoreError> {
        self.ensure_available()?;
        let mut experiments = self.experiments.write().await;
        if experiments.contains_key(&record.experiment_id) {
            return Err(StoreError::Conflict {
                key: record.experiment_id,
            });
        }
        experiments.insert(record.experiment_id.clone(), record);
        Ok(())
    }

    async fn put_model_if_absent(&self, record: ModelRecord) -> Result<(), StoreError> {
        self.ensure_available()?;
        let key = (record.experiment_id.clone(), record.model_id.clone());
        let mut models = self.models.write().await;
        if models.contains_key(&key) {
            return Err(StoreError::Conflict {
                key: format!("{}/{}", key.0, key.1),
            });
        }
        models.insert(key, record);
        Ok(())
    }

    async fn experiment(&self, experiment_id: &str) -> Result<Option<ExperimentRecord>, StoreError> {
        self.ensure_available()?;
        Ok(self.experiments.read().await.get(experiment_id).cloned())
    }

    async fn model(
        &self,
        experiment_id: &str,
        model_id: &str,
    ) -> Result<Option<ModelRecord>, StoreError> {
        self.ensure_available()?;
        self.model_lookups.fetch_add(1, Ordering::SeqCst);
        let key = (experiment_id.to_string(), model_id.to_string());
        Ok(self.models.read().await.get(&key).cloned())
    }

    async fn update_hosting_state(
        &self,
        experiment_id: &str,
        state: HostingState,
    ) -> Result<(), StoreError> {
        self.ensure_available()?;
        let mut experiments = self.experiments.write().await;
        let record = experiments
            .get_mut(experiment_id)
            .ok_or_else(|| StoreError::NotFound(experiment_id.to_string()))?;
        record.hosting_state = Some(state);
        Ok(())
    }
}
