//! Active model pointer kept in a shared key-value registry
//!
//! Keys: `model_id` names the live model, and `<id>:weights` / `<id>:metadata`
//! hold its file locations. The per-model keys are written before `model_id`,
//! so a reader that sees a new id always finds its paths.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::RegistryError;

/// Key naming the live model
pub const MODEL_ID_KEY: &str = "model_id";

pub fn weights_key(model_id: &str) -> String {
    format!("{model_id}:weights")
}

pub fn metadata_key(model_id: &str) -> String {
    format!("{model_id}:metadata")
}

/// Simple string key-value registry shared by all workers
#[async_trait]
pub trait SharedRegistry: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, RegistryError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), RegistryError>;
    async fn delete(&self, key: &str) -> Result<(), RegistryError>;
}

/// In-process registry
#[derive(Default)]
pub struct InMemoryRegistry {
    entries: RwLock<HashMap<String, String>>,
}

impl InMemoryRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every key currently set
    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl SharedRegistry for InMemoryRegistry {
    async fn get(&self, key: &str) -> Result<Option<String>, RegistryError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), RegistryError> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), RegistryError> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

/// Which model is live and where its files are
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveModelPointer {
    pub model_id: String,
    pub weights_path: PathBuf,
    pub metadata_path: PathBuf,
}

impl ActiveModelPointer {
    /// Write the pointer; path keys first, `model_id` last
    pub async fn publish(&self, registry: &dyn SharedRegistry) -> Result<(), RegistryError> {
        registry
            .set(
                &weights_key(&self.model_id),
                &self.weights_path.to_string_lossy(),
            )
            .await?;
        registry
            .set(
                &metadata_key(&self.model_id),
                &self.metadata_path.to_string_lossy(),
            )
            .await?;
        registry.set(MODEL_ID_KEY, &self.model_id).await?;
        debug!(model_id = %self.model_id, "Published active model pointer");
        Ok(())
    }

    /// Read the current pointer, if one is fully published
    pub async fn load(registry: &dyn SharedRegistry) -> Result<Option<Self>, RegistryError> {
        let Some(model_id) = registry.get(MODEL_ID_KEY).await? else {
            return Ok(None);
        };
        let weights = registry.get(&weights_key(&model_id)).await?;
        let metadata = registry.get(&metadata_key(&model_id)).await?;

        match (weights, metadata) {
            (Some(weights), Some(metadata)) => Ok(Some(Self {
                model_id,
                weights_path: PathBuf::from(weights),
                metadata_path: PathBuf::from(metadata),
            })),
            _ => {
                warn!(model_id = %model_id, "Active model pointer is missing path entries");
                Ok(None)
            }
        }
    }

    /// Delete the entries belonging to a model that is no longer live
    ///
    /// Best-effort: failures are logged, never returned.
    pub async fn retire(registry: &dyn SharedRegistry, old_model_id: &str) {
        for key in [
            old_model_id.to_string(),
            weights_key(old_model_id),
            metadata_key(old_model_id),
        ] {
            if let Err(e) = registry.delete(&key).await {
                warn!(key = %key, error = %e, "Failed to delete stale registry entry");
            }
        }
    }

    /// Remove the live pointer entirely
    pub async fn clear(registry: &dyn SharedRegistry) -> Result<(), RegistryError> {
        if let Some(model_id) = registry.get(MODEL_ID_KEY).await? {
            Self::retire(registry, &model_id).await;
        }
        registry.delete(MODEL_ID_KEY).await
    }
}
