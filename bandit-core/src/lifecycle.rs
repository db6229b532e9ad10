//! Model lifecycle management.
//!
//! The manager resolves the model to serve at startup, then (when polling is
//! enabled) watches the experiment record for a newer model and swaps to it
//! without interrupting traffic: download, publish the new pointer, retire the
//! old one, signal the workers. A candidate that fails at any step is skipped
//! and the current model keeps serving.

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::artifact::{self, ArtifactPaths, ObjectStore, ObjectUri};
use crate::config::LifecycleConfig;
use crate::error::{ArtifactError, Result, ServingError, StoreError};
use crate::pointer::{ActiveModelPointer, SharedRegistry};
use crate::reload::ReloadSignal;
use crate::store::{HostingState, MetadataStore};

/// State of the lifecycle manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerState {
    /// No model resolved yet
    Init,
    /// Serving a model
    Serving { model_id: String },
    /// Replacing one model with another
    Swapping { from: String, to: String },
}

impl std::fmt::Display for ManagerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Init => write!(f, "init"),
            Self::Serving { model_id } => write!(f, "serving({model_id})"),
            Self::Swapping { from, to } => write!(f, "swapping({from} -> {to})"),
        }
    }
}

/// What a single polling tick did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Nothing newer to host
    Unchanged,
    /// Now serving `to`
    Swapped { from: String, to: String },
    /// `candidate` could not be deployed; still serving the previous model
    Rejected { candidate: String, reason: String },
}

/// Resolves, downloads and hot-swaps served models
pub struct ModelManager {
    config: LifecycleConfig,
    metadata: Option<Arc<dyn MetadataStore>>,
    objects: Option<Arc<dyn ObjectStore>>,
    registry: Arc<dyn SharedRegistry>,
    reload: Arc<dyn ReloadSignal>,
    state: ManagerState,
    current: Option<ActiveModelPointer>,
    /// Last candidate that failed to deploy and the artifact it pointed at
    rejected: Option<(String, Option<String>)>,
}

impl ModelManager {
    #[must_use]
    pub fn new(
        config: LifecycleConfig,
        registry: Arc<dyn SharedRegistry>,
        reload: Arc<dyn ReloadSignal>,
    ) -> Self {
        Self {
            config,
            metadata: None,
            objects: None,
            registry,
            reload,
            state: ManagerState::Init,
            current: None,
            rejected: None,
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, store: Arc<dyn MetadataStore>) -> Self {
        self.metadata = Some(store);
        self
    }

    #[must_use]
    pub fn with_objects(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.objects = Some(store);
        self
    }

    pub fn state(&self) -> &ManagerState {
        &self.state
    }

    pub fn current(&self) -> Option<&ActiveModelPointer> {
        self.current.as_ref()
    }

    /// Check that the configured collaborators are usable
    pub async fn validate(&self) -> Result<()> {
        if !self.config.poll_enabled {
            return Ok(());
        }
        let metadata = self.metadata.as_ref().ok_or_else(|| {
            ServingError::Platform("metadata polling requires a metadata store".to_string())
        })?;
        metadata.check_ready().await?;
        if self.objects.is_none() {
            return Err(ServingError::Platform(
                "metadata polling requires an object store".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve the startup model and publish its pointer
    ///
    /// A mounted artifact wins; otherwise the configured model id is looked up
    /// in the metadata store and downloaded.
    pub async fn initialize(&mut self) -> Result<ActiveModelPointer> {
        self.validate().await?;

        let model_id = self.config.model_id.clone();
        let paths = if artifact::is_mounted(&self.config.artifacts_dir) {
            info!(
                dir = %self.config.artifacts_dir.display(),
                "Loading mounted model artifact"
            );
            artifact::locate(&self.config.artifacts_dir)?
        } else {
            info!(model_id = %model_id, "Resolving model from metadata store");
            self.fetch(&model_id).await?
        };

        let pointer = ActiveModelPointer {
            model_id: model_id.clone(),
            weights_path: paths.weights_path,
            metadata_path: paths.metadata_path,
        };
        pointer.publish(self.registry.as_ref()).await?;

        self.current = Some(pointer.clone());
        self.state = ManagerState::Serving { model_id };
        Ok(pointer)
    }

    /// Download and locate the artifact of `model_id`
    async fn fetch(&self, model_id: &str) -> Result<ArtifactPaths> {
        let metadata = self.metadata.as_ref().ok_or_else(|| {
            ServingError::Platform(format!(
                "no metadata store configured to resolve model {model_id}"
            ))
        })?;
        let objects = self.objects.as_ref().ok_or_else(|| {
            ServingError::Platform(format!(
                "no object store configured to download model {model_id}"
            ))
        })?;

        let experiment_id = &self.config.experiment_id;
        let record = metadata
            .model(experiment_id, model_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("{experiment_id}/{model_id}")))?;
        let uri = record
            .artifact_uri()
            .ok_or_else(|| ArtifactError::NoLocation(model_id.to_string()))?;
        let uri = ObjectUri::parse(uri)?;

        Ok(artifact::download_bundle(objects.as_ref(), &uri, &self.config.downloads_dir).await?)
    }

    /// Model the deployment pipeline wants hosted, if it differs from ours
    async fn check_for_new_model(&self) -> Option<String> {
        let metadata = self.metadata.as_ref()?;
        let current = self.current.as_ref()?;

        match metadata.experiment(&self.config.experiment_id).await {
            Ok(Some(record)) => record
                .next_model_to_host()
                .filter(|candidate| *candidate != current.model_id)
                .map(str::to_string),
            Ok(None) => {
                debug!(experiment_id = %self.config.experiment_id, "Experiment record not found");
                None
            }
            Err(e) => {
                warn!(error = %e, "Failed to read experiment record");
                None
            }
        }
    }

    /// Artifact location recorded for `model_id`, if the record has one
    async fn artifact_uri_of(&self, model_id: &str) -> Result<Option<String>> {
        let Some(metadata) = &self.metadata else {
            return Ok(None);
        };
        let record = metadata.model(&self.config.experiment_id, model_id).await?;
        Ok(record.and_then(|r| r.artifact_uri().map(str::to_string)))
    }

    /// Run one polling tick
    ///
    /// A candidate that was rejected is not attempted again until its model
    /// record points at a different artifact.
    pub async fn poll_once(&mut self) -> PollOutcome {
        let Some(candidate) = self.check_for_new_model().await else {
            return PollOutcome::Unchanged;
        };

        if let Some((rejected, rejected_uri)) = &self.rejected
            && *rejected == candidate
        {
            match self.artifact_uri_of(&candidate).await {
                Ok(uri) if uri == *rejected_uri => {
                    debug!(candidate = %candidate, "Skipping previously rejected model");
                    return PollOutcome::Unchanged;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "Failed to read model record");
                    return PollOutcome::Unchanged;
                }
            }
        }
        let from = self
            .current
            .as_ref()
            .map(|p| p.model_id.clone())
            .unwrap_or_default();

        info!(from = %from, to = %candidate, "Found new model, swapping");
        self.state = ManagerState::Swapping {
            from: from.clone(),
            to: candidate.clone(),
        };

        match self.swap_to(&candidate).await {
            Ok(()) => {
                self.state = ManagerState::Serving {
                    model_id: candidate.clone(),
                };
                self.rejected = None;
                info!(model_id = %candidate, "Model swap complete");
                PollOutcome::Swapped {
                    from,
                    to: candidate,
                }
            }
            Err(e) => {
                warn!(
                    candidate = %candidate,
                    error = %e.private_message(),
                    "Failed to deploy model, keeping current one"
                );
                self.state = ManagerState::Serving { model_id: from };
                let uri = self.artifact_uri_of(&candidate).await.unwrap_or_default();
                self.rejected = Some((candidate.clone(), uri));
                PollOutcome::Rejected {
                    candidate,
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn swap_to(&mut self, candidate: &str) -> Result<()> {
        let paths = self.fetch(candidate).await?;

        let pointer = ActiveModelPointer {
            model_id: candidate.to_string(),
            weights_path: paths.weights_path,
            metadata_path: paths.metadata_path,
        };
        pointer.publish(self.registry.as_ref()).await?;

        if let Some(old) = self.current.replace(pointer) {
            if old.model_id != candidate {
                ActiveModelPointer::retire(self.registry.as_ref(), &old.model_id).await;
            }
        }

        if let Err(e) = self.reload.signal() {
            warn!(error = %e, "Failed to signal workers to reload");
        }

        if let Some(metadata) = &self.metadata {
            if let Err(e) = metadata
                .update_hosting_state(&self.config.experiment_id, HostingState::Deployed)
                .await
            {
                warn!(error = %e, "Failed to record deployment state");
            }
        }

        Ok(())
    }

    /// Poll at the configured interval until `shutdown` resolves
    ///
    /// Returns the manager so the caller can clear the pointer afterwards.
    pub async fn run<F>(mut self, shutdown: F) -> Self
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);
        if !self.config.poll_enabled {
            debug!("Metadata polling disabled");
            shutdown.await;
            return self;
        }

        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; the model was just resolved.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = interval.tick() => {
                    let outcome = self.poll_once().await;
                    if outcome != PollOutcome::Unchanged {
                        debug!(state = %self.state, ?outcome, "Polling tick finished");
                    }
                }
            }
        }
        info!("Metadata polling stopped");
        self
    }

    /// Remove the live pointer from the registry
    pub async fn shutdown(&self) -> Result<()> {
        ActiveModelPointer::clear(self.registry.as_ref()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tempfile::TempDir;

    use super::*;
    use crate::artifact::{LocalObjectStore, METADATA_FILE, WEIGHTS_FILE};
    use crate::error::ErrorKind;
    use crate::pointer::InMemoryRegistry;
    use crate::reload::ChannelReload;
    use crate::store::{InMemoryMetadataStore, ModelRecord};

    /// Object store that counts downloads
    struct CountingStore {
        inner: LocalObjectStore,
        downloads: AtomicUsize,
    }

    #[async_trait]
    impl ObjectStore for CountingStore {
        async fn download(
            &self,
            uri: &ObjectUri,
            dest: &Path,
        ) -> std::result::Result<(), ArtifactError> {
            self.downloads.fetch_add(1, Ordering::SeqCst);
            self.inner.download(uri, dest).await
        }
    }

    struct Fixture {
        objects_root: TempDir,
        _work: TempDir,
        metadata: Arc<InMemoryMetadataStore>,
        objects: Arc<CountingStore>,
        registry: Arc<InMemoryRegistry>,
        reload: Arc<ChannelReload>,
        _reload_rx: tokio::sync::watch::Receiver<u64>,
        manager: ModelManager,
    }

    async fn add_model(objects: &Path, metadata: &InMemoryMetadataStore, model_id: &str) {
        let src = TempDir::new().unwrap();
        std::fs::write(src.path().join(METADATA_FILE), format!("--cb_explore 2 # {model_id}"))
            .unwrap();
        std::fs::write(src.path().join(WEIGHTS_FILE), model_id.as_bytes()).unwrap();
        std::fs::create_dir_all(objects.join("models")).unwrap();
        artifact::pack(src.path(), &objects.join("models").join(format!("{model_id}.tar.gz")))
            .await
            .unwrap();
        metadata
            .put_model_if_absent(
                ModelRecord::new("exp", model_id)
                    .with_artifact_uri(format!("s3://models/{model_id}.tar.gz")),
            )
            .await
            .unwrap();
    }

    async fn fixture() -> Fixture {
        let objects_dir = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let metadata = Arc::new(InMemoryMetadataStore::new());
        add_model(objects_dir.path(), &metadata, "m-1").await;
        add_model(objects_dir.path(), &metadata, "m-2").await;
        metadata.set_next_model_to_host("exp", "m-1").await;

        let objects = Arc::new(CountingStore {
            inner: LocalObjectStore::new(objects_dir.path()),
            downloads: AtomicUsize::new(0),
        });
        let registry = Arc::new(InMemoryRegistry::new());
        let reload = Arc::new(ChannelReload::new());
        let reload_rx = reload.subscribe();

        let config = LifecycleConfig::default()
            .with_experiment_id("exp")
            .with_model_id("m-1")
            .with_polling(true)
            .with_artifacts_dir(work.path().join("mount"))
            .with_downloads_dir(work.path().join("downloads"));
        let manager = ModelManager::new(config, registry.clone(), reload.clone())
            .with_metadata(metadata.clone())
            .with_objects(objects.clone());

        Fixture {
            objects_root: objects_dir,
            _work: work,
            metadata,
            objects,
            registry,
            reload,
            _reload_rx: reload_rx,
            manager,
        }
    }

    // ==================== Initialization Tests ====================

    #[tokio::test]
    async fn initialize_downloads_configured_model() {
        let mut f = fixture().await;
        let pointer = f.manager.initialize().await.unwrap();

        assert_eq!(pointer.model_id, "m-1");
        assert_eq!(std::fs::read(&pointer.weights_path).unwrap(), b"m-1");
        assert_eq!(f.objects.downloads.load(Ordering::SeqCst), 1);
        assert_eq!(
            f.manager.state(),
            &ManagerState::Serving {
                model_id: "m-1".to_string()
            }
        );

        let published = ActiveModelPointer::load(f.registry.as_ref())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(published, pointer);
    }

    #[tokio::test]
    async fn initialize_prefers_mounted_artifact() {
        let mount = TempDir::new().unwrap();
        std::fs::write(mount.path().join(METADATA_FILE), "--cb_explore 2").unwrap();
        std::fs::write(mount.path().join(WEIGHTS_FILE), b"mounted").unwrap();

        let registry = Arc::new(InMemoryRegistry::new());
        let config = LifecycleConfig::default()
            .with_model_id("local")
            .with_artifacts_dir(mount.path());
        let mut manager = ModelManager::new(config, registry, Arc::new(ChannelReload::new()));

        let pointer = manager.initialize().await.unwrap();
        assert_eq!(pointer.model_id, "local");
        assert_eq!(std::fs::read(pointer.weights_path).unwrap(), b"mounted");
    }

    #[tokio::test]
    async fn initialize_mount_missing_weights_is_customer_error() {
        let mount = TempDir::new().unwrap();
        std::fs::write(mount.path().join(METADATA_FILE), "--cb_explore 2").unwrap();
        std::fs::write(mount.path().join("README"), b"").unwrap();

        let config = LifecycleConfig::default().with_artifacts_dir(mount.path());
        let mut manager = ModelManager::new(
            config,
            Arc::new(InMemoryRegistry::new()),
            Arc::new(ChannelReload::new()),
        );
        let err = manager.initialize().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Customer);
    }

    #[tokio::test]
    async fn polling_without_store_is_platform_error() {
        let config = LifecycleConfig::default().with_polling(true);
        let manager = ModelManager::new(
            config,
            Arc::new(InMemoryRegistry::new()),
            Arc::new(ChannelReload::new()),
        );
        assert_eq!(
            manager.validate().await.unwrap_err().kind(),
            ErrorKind::Platform
        );
    }

    #[tokio::test]
    async fn polling_with_missing_table_is_platform_error() {
        let f = fixture().await;
        f.metadata.set_unavailable(true);
        assert_eq!(
            f.manager.validate().await.unwrap_err().kind(),
            ErrorKind::Platform
        );
    }

    // ==================== Polling Tests ====================

    #[tokio::test]
    async fn tick_with_same_model_is_idempotent() {
        let mut f = fixture().await;
        f.manager.initialize().await.unwrap();
        let keys_before = f.registry.keys().await;

        assert_eq!(f.manager.poll_once().await, PollOutcome::Unchanged);

        assert_eq!(f.objects.downloads.load(Ordering::SeqCst), 1);
        assert_eq!(f.registry.keys().await, keys_before);
        assert_eq!(f.reload.generation(), 0);
    }

    #[tokio::test]
    async fn tick_swaps_to_new_model_once() {
        let mut f = fixture().await;
        f.manager.initialize().await.unwrap();
        f.metadata.set_next_model_to_host("exp", "m-2").await;

        let outcome = f.manager.poll_once().await;
        assert_eq!(
            outcome,
            PollOutcome::Swapped {
                from: "m-1".to_string(),
                to: "m-2".to_string()
            }
        );
        assert_eq!(f.reload.generation(), 1);
        assert_eq!(f.objects.downloads.load(Ordering::SeqCst), 2);

        let pointer = ActiveModelPointer::load(f.registry.as_ref())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pointer.model_id, "m-2");
        assert_eq!(std::fs::read(pointer.weights_path).unwrap(), b"m-2");
        assert_eq!(
            f.registry.keys().await,
            vec![
                "m-2:metadata".to_string(),
                "m-2:weights".to_string(),
                "model_id".to_string()
            ]
        );

        // Second tick: nothing new.
        assert_eq!(f.manager.poll_once().await, PollOutcome::Unchanged);
        assert_eq!(f.objects.downloads.load(Ordering::SeqCst), 2);
        assert_eq!(f.reload.generation(), 1);
    }

    #[tokio::test]
    async fn swap_marks_experiment_deployed() {
        let mut f = fixture().await;
        f.manager.initialize().await.unwrap();
        f.metadata.set_next_model_to_host("exp", "m-2").await;
        f.manager.poll_once().await;

        let record = f.metadata.experiment("exp").await.unwrap().unwrap();
        assert_eq!(record.hosting_state, Some(HostingState::Deployed));
    }

    #[tokio::test]
    async fn failed_candidate_keeps_current_model() {
        let mut f = fixture().await;
        f.manager.initialize().await.unwrap();
        f.metadata.set_next_model_to_host("exp", "m-404").await;

        let outcome = f.manager.poll_once().await;
        assert!(matches!(outcome, PollOutcome::Rejected { ref candidate, .. } if candidate == "m-404"));
        assert_eq!(f.reload.generation(), 0);
        assert_eq!(
            f.manager.state(),
            &ManagerState::Serving {
                model_id: "m-1".to_string()
            }
        );
        let pointer = ActiveModelPointer::load(f.registry.as_ref())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pointer.model_id, "m-1");
    }

    async fn add_corrupt_model(objects: &Path, metadata: &InMemoryMetadataStore, model_id: &str) {
        std::fs::create_dir_all(objects.join("models")).unwrap();
        std::fs::write(
            objects.join("models").join(format!("{model_id}.tar.gz")),
            b"not a tarball",
        )
        .unwrap();
        metadata
            .put_model_if_absent(
                ModelRecord::new("exp", model_id)
                    .with_artifact_uri(format!("s3://models/{model_id}.tar.gz")),
            )
            .await
            .unwrap();
    }

    fn download_dirs(manager: &ModelManager) -> usize {
        std::fs::read_dir(&manager.config.downloads_dir)
            .unwrap()
            .count()
    }

    #[tokio::test]
    async fn rejected_candidate_leaves_no_download_behind() {
        let mut f = fixture().await;
        f.manager.initialize().await.unwrap();
        assert_eq!(download_dirs(&f.manager), 1);

        add_corrupt_model(f.objects_root.path(), &f.metadata, "m-bad").await;
        f.metadata.set_next_model_to_host("exp", "m-bad").await;

        let outcome = f.manager.poll_once().await;
        assert!(matches!(outcome, PollOutcome::Rejected { ref candidate, .. } if candidate == "m-bad"));
        assert_eq!(download_dirs(&f.manager), 1);

        let downloads = f.objects.downloads.load(Ordering::SeqCst);
        assert_eq!(f.manager.poll_once().await, PollOutcome::Unchanged);
        assert_eq!(f.objects.downloads.load(Ordering::SeqCst), downloads);
        assert_eq!(download_dirs(&f.manager), 1);
    }

    #[tokio::test]
    async fn rejected_candidate_is_not_retried_until_record_changes() {
        let mut f = fixture().await;
        f.manager.initialize().await.unwrap();
        f.metadata.set_next_model_to_host("exp", "m-3").await;

        assert!(matches!(
            f.manager.poll_once().await,
            PollOutcome::Rejected { .. }
        ));
        let downloads = f.objects.downloads.load(Ordering::SeqCst);

        assert_eq!(f.manager.poll_once().await, PollOutcome::Unchanged);
        assert_eq!(f.manager.poll_once().await, PollOutcome::Unchanged);
        assert_eq!(f.objects.downloads.load(Ordering::SeqCst), downloads);

        add_model(f.objects_root.path(), &f.metadata, "m-3").await;
        assert_eq!(
            f.manager.poll_once().await,
            PollOutcome::Swapped {
                from: "m-1".to_string(),
                to: "m-3".to_string()
            }
        );
    }

    #[tokio::test]
    async fn store_outage_during_poll_is_unchanged() {
        let mut f = fixture().await;
        f.manager.initialize().await.unwrap();
        f.metadata.set_unavailable(true);
        assert_eq!(f.manager.poll_once().await, PollOutcome::Unchanged);
    }

    #[tokio::test]
    async fn shutdown_clears_pointer() {
        let mut f = fixture().await;
        f.manager.initialize().await.unwrap();
        f.manager.shutdown().await.unwrap();
        assert!(f.registry.keys().await.is_empty());
    }

    #[tokio::test]
    async fn run_polls_until_shutdown() {
        let mut f = fixture().await;
        f.manager.config.poll_interval = std::time::Duration::from_millis(20);
        f.manager.initialize().await.unwrap();
        f.metadata.set_next_model_to_host("exp", "m-2").await;

        let mut reloads = f.reload.subscribe();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(f.manager.run(async move {
            let _ = rx.await;
        }));

        tokio::time::timeout(std::time::Duration::from_secs(5), reloads.changed())
            .await
            .unwrap()
            .unwrap();
        tx.send(()).unwrap();

        let manager = handle.await.unwrap();
        assert_eq!(manager.current().unwrap().model_id, "m-2");
    }

    #[test]
    fn state_display() {
        assert_eq!(ManagerState::Init.to_string(), "init");
        assert_eq!(
            ManagerState::Swapping {
                from: "a".to_string(),
                to: "b".to_string()
            }
            .to_string(),
            "swapping(a -> b)"
        );
    }
}
