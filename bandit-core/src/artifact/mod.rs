//! Model artifacts: where they come from and how they are laid out on disk

pub mod bundle;
pub mod object_store;

use std::path::{Path, PathBuf};

use rand::Rng;
use rand::distributions::Alphanumeric;
use tracing::{info, warn};

use crate::error::ArtifactError;

pub use bundle::{ArtifactPaths, METADATA_FILE, WEIGHTS_FILE, is_mounted, locate, pack, unpack};
pub use object_store::{HttpObjectStore, LocalObjectStore, ObjectStore, ObjectUri};

/// Name of the downloaded archive inside its working directory
pub const ARCHIVE_NAME: &str = "model.tar.gz";

/// A located model, ready to be handed to a scorer factory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelArtifact {
    pub model_id: String,
    /// Serialized scorer configuration, read from the metadata file
    pub metadata: String,
    pub weights_path: PathBuf,
    pub metadata_path: PathBuf,
}

impl ModelArtifact {
    /// Read the metadata file and bind the paths to `model_id`
    pub async fn load(
        model_id: impl Into<String>,
        metadata_path: &Path,
        weights_path: &Path,
    ) -> Result<Self, ArtifactError> {
        let metadata = tokio::fs::read_to_string(metadata_path).await?;
        Ok(Self {
            model_id: model_id.into(),
            metadata: metadata.trim().to_string(),
            weights_path: weights_path.to_path_buf(),
            metadata_path: metadata_path.to_path_buf(),
        })
    }
}

/// Random name for a per-attempt download directory
pub fn scratch_dir_name() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect()
}

/// Download the bundle at `uri` into a fresh directory under `download_root`,
/// unpack it and locate the model files
///
/// The directory is removed again when any step fails.
pub async fn download_bundle(
    store: &dyn ObjectStore,
    uri: &ObjectUri,
    download_root: &Path,
) -> Result<ArtifactPaths, ArtifactError> {
    let dir = download_root.join(scratch_dir_name());
    tokio::fs::create_dir_all(&dir).await?;

    match fetch_into(store, uri, &dir).await {
        Ok(paths) => {
            info!(uri = %uri, dir = %dir.display(), "Unpacked model bundle");
            Ok(paths)
        }
        Err(e) => {
            if let Err(cleanup) = tokio::fs::remove_dir_all(&dir).await {
                warn!(dir = %dir.display(), error = %cleanup, "Failed to remove download directory");
            }
            Err(e)
        }
    }
}

async fn fetch_into(
    store: &dyn ObjectStore,
    uri: &ObjectUri,
    dir: &Path,
) -> Result<ArtifactPaths, ArtifactError> {
    let archive = dir.join(ARCHIVE_NAME);
    store.download(uri, &archive).await?;
    unpack(&archive, dir).await?;
    locate(dir)
}
