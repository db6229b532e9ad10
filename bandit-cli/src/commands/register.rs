//! Register command: seed a metadata document with an experiment
//!
//! Local stand-in for the deployment pipeline. The experiment record is put
//! conditionally, so registering the same experiment twice fails instead of
//! overwriting what a running server is polling.

use std::path::PathBuf;

use anyhow::{Result, bail};
use bandit_core::error::StoreError;
use bandit_core::{ExperimentRecord, FileMetadataStore, MetadataStore, ModelRecord};
use clap::Args;
use tracing::info;

/// Arguments for the register command
#[derive(Debug, Args)]
pub struct RegisterArgs {
    /// Metadata document to write
    #[arg(long, env = "MODEL_METADATA_PATH")]
    pub metadata_path: PathBuf,

    /// Experiment to register
    #[arg(long, env = "EXPERIMENT_ID")]
    pub experiment_id: String,

    /// Initial model to host
    #[arg(long, requires = "artifact_uri")]
    pub model_id: Option<String>,

    /// Location of the initial model's artifact bundle (scheme://bucket/key)
    #[arg(long, requires = "model_id")]
    pub artifact_uri: Option<String>,
}

/// Run the register command
pub async fn run(args: RegisterArgs) -> Result<()> {
    let store = FileMetadataStore::new(&args.metadata_path);
    store.initialize().await?;

    let mut experiment = ExperimentRecord::new(&args.experiment_id);
    if let Some(model_id) = &args.model_id {
        experiment = experiment.with_next_model_to_host(model_id);
    }

    match store.put_experiment_if_absent(experiment).await {
        Ok(()) => {}
        Err(StoreError::Conflict { .. }) => {
            bail!("Experiment '{}' is already registered", args.experiment_id)
        }
        Err(e) => return Err(e.into()),
    }

    if let (Some(model_id), Some(uri)) = (&args.model_id, &args.artifact_uri) {
        store
            .put_model_if_absent(
                ModelRecord::new(&args.experiment_id, model_id).with_artifact_uri(uri),
            )
            .await?;
    }

    info!(
        experiment_id = %args.experiment_id,
        path = %args.metadata_path.display(),
        "Registered experiment"
    );
    println!("Registered experiment '{}'", args.experiment_id);
    Ok(())
}
