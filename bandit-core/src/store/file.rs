//! JSON-document MetadataStore
//!
//! The whole store is one JSON file holding an `experiments` and a `models`
//! array. Every query re-reads the file, so edits made by another process are
//! visible on the next read. Writes replace the file atomically.
//!
//! The deployment pipeline edits the same document. `update_hosting_state`
//! therefore only touches the `hosting_state` key of one experiment, working
//! on the raw JSON so fields this crate does not model survive, and commits
//! only if the file is unchanged since it was read.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use serde_json::Value;
use tracing::debug;

use super::traits::MetadataStore;
use super::types::{ExperimentRecord, HostingState, ModelRecord};
use crate::error::StoreError;

/// On-disk layout of the metadata document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataDocument {
    #[serde(default)]
    pub experiments: Vec<ExperimentRecord>,
    #[serde(default)]
    pub models: Vec<ModelRecord>,
}

/// Tries at a hosting-state update while other writers keep changing the file
const UPDATE_ATTEMPTS: usize = 5;

/// MetadataStore backed by a JSON file
pub struct FileMetadataStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles within this process
    write_lock: Mutex<()>,
}

impl FileMetadataStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create an empty document if none exists yet
    pub async fn initialize(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        if tokio::fs::try_exists(&self.path).await? {
            return Ok(());
        }
        self.write(&MetadataDocument::default()).await
    }

    async fn read_raw(&self) -> Result<Vec<u8>, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotReady(
                format!("metadata document {} does not exist", self.path.display()),
            )),
            Err(e) => Err(e.into()),
        }
    }

    async fn read(&self) -> Result<MetadataDocument, StoreError> {
        Ok(serde_json::from_slice(&self.read_raw().await?)?)
    }

    /// Write `document` next to the store file, ready to be renamed over it
    async fn stage<T: Serialize>(&self, document: &T) -> Result<PathBuf, StoreError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(document)?).await?;
        Ok(tmp)
    }

    async fn write(&self, document: &MetadataDocument) -> Result<(), StoreError> {
        let tmp = self.stage(document).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), "Wrote metadata document");
        Ok(())
    }
}

/// Set `hosting_state` on one experiment of a raw document, leaving every
/// other key as found
fn set_hosting_state(
    document: &mut Value,
    experiment_id: &str,
    state: HostingState,
) -> Result<(), StoreError> {
    let record = document
        .get_mut("experiments")
        .and_then(Value::as_array_mut)
        .and_then(|experiments| {
            experiments
                .iter_mut()
                .find(|e| e.get("experiment_id").and_then(Value::as_str) == Some(experiment_id))
        })
        .and_then(Value::as_object_mut)
        .ok_or_else(|| StoreError::NotFound(experiment_id.to_string()))?;
    record.insert("hosting_state".to_string(), serde_json::to_value(state)?);
    Ok(())
}

#[async_trait]
impl MetadataStore for FileMetadataStore {
    async fn check_ready(&self) -> Result<(), StoreError> {
        self.read().await.map(|_| ())
    }

    async fn put_experiment_if_absent(&self, record: ExperimentRecord) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut document = self.read().await?;
        if document
            .experiments
            .iter()
            .any(|e| e.experiment_id == record.experiment_id)
        {
            return Err(StoreError::Conflict {
                key: record.experiment_id,
            });
        }
        document.experiments.push(record);
        self.write(&document).await
    }

    async fn put_model_if_absent(&self, record: ModelRecord) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut document = self.read().await?;
        if document
            .models
            .iter()
            .any(|m| m.experiment_id == record.experiment_id && m.model_id == record.model_id)
        {
            return Err(StoreError::Conflict {
                key: format!("{}/{}", record.experiment_id, record.model_id),
            });
        }
        document.models.push(record);
        self.write(&document).await
    }

    async fn experiment(&self, experiment_id: &str) -> Result<Option<ExperimentRecord>, StoreError> {
        let document = self.read().await?;
        Ok(document
            .experiments
            .into_iter()
            .find(|e| e.experiment_id == experiment_id))
    }

    async fn model(
        &self,
        experiment_id: &str,
        model_id: &str,
    ) -> Result<Option<ModelRecord>, StoreError> {
        let document = self.read().await?;
        Ok(document
            .models
            .into_iter()
            .find(|m| m.experiment_id == experiment_id && m.model_id == model_id))
    }

    async fn update_hosting_state(
        &self,
        experiment_id: &str,
        state: HostingState,
    ) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;

        for attempt in 1..=UPDATE_ATTEMPTS {
            let before = self.read_raw().await?;
            let mut document: Value = serde_json::from_slice(&before)?;
            set_hosting_state(&mut document, experiment_id, state)?;
            let tmp = self.stage(&document).await?;

            if self.read_raw().await? == before {
                tokio::fs::rename(&tmp, &self.path).await?;
                debug!(experiment_id, %state, "Updated hosting state");
                return Ok(());
            }
            tokio::fs::remove_file(&tmp).await?;
            debug!(attempt, "Metadata document changed during update, retrying");
        }

        Err(StoreError::Conflict {
            key: experiment_id.to_string(),
        })
    }
}
