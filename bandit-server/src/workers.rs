//! Scoring worker pool
//!
//! Each worker owns one started scorer behind a mutex, so one request at a
//! time talks to a given scoring process. The set of workers serving one
//! model is a generation. Reloading builds and starts a whole new generation
//! from the active model pointer before swapping it in; the old generation is
//! closed afterwards, each worker once its in-flight call has finished.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bandit_core::{
    ActiveModelPointer, ModelArtifact, Scorer, ScorerFactory, ServingError, SharedRegistry,
};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock, watch};
use tracing::{debug, error, info, warn};

type WorkerSlot = Arc<Mutex<Box<dyn Scorer>>>;

struct Generation {
    model_id: String,
    workers: Vec<WorkerSlot>,
}

/// Exclusive use of one worker's scorer for the duration of a request
pub struct Lease {
    model_id: String,
    worker: usize,
    guard: OwnedMutexGuard<Box<dyn Scorer>>,
}

impl Lease {
    /// Model the leased scorer was started with
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn worker(&self) -> usize {
        self.worker
    }
}

impl Deref for Lease {
    type Target = dyn Scorer;

    fn deref(&self) -> &Self::Target {
        &**self.guard
    }
}

impl DerefMut for Lease {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut **self.guard
    }
}

pub struct WorkerPool {
    factory: Arc<dyn ScorerFactory>,
    registry: Arc<dyn SharedRegistry>,
    size: usize,
    current: RwLock<Arc<Generation>>,
    next: AtomicUsize,
    reload_lock: Mutex<()>,
}

impl WorkerPool {
    /// Start `size` workers against the model the registry points at
    pub async fn start(
        factory: Arc<dyn ScorerFactory>,
        registry: Arc<dyn SharedRegistry>,
        size: usize,
    ) -> Result<Self, ServingError> {
        let size = size.max(1);
        let generation = build_generation(factory.as_ref(), registry.as_ref(), size).await?;
        info!(
            model_id = %generation.model_id,
            workers = size,
            "Worker pool started"
        );

        Ok(Self {
            factory,
            registry,
            size,
            current: RwLock::new(Arc::new(generation)),
            next: AtomicUsize::new(0),
            reload_lock: Mutex::new(()),
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Model served by the current generation
    pub async fn model_id(&self) -> String {
        self.current.read().await.model_id.clone()
    }

    /// Lease a worker, preferring an idle one, round-robin otherwise
    pub async fn lease(&self) -> Lease {
        let generation = Arc::clone(&*self.current.read().await);
        let count = generation.workers.len();
        let start = self.next.fetch_add(1, Ordering::Relaxed) % count;

        for offset in 0..count {
            let index = (start + offset) % count;
            if let Ok(guard) = Arc::clone(&generation.workers[index]).try_lock_owned() {
                return Lease {
                    model_id: generation.model_id.clone(),
                    worker: index,
                    guard,
                };
            }
        }

        let guard = Arc::clone(&generation.workers[start]).lock_owned().await;
        Lease {
            model_id: generation.model_id.clone(),
            worker: start,
            guard,
        }
    }

    /// Replace every worker with one started against the active model
    ///
    /// On failure the current generation keeps serving.
    pub async fn reload(&self) -> Result<String, ServingError> {
        let _guard = self.reload_lock.lock().await;

        let generation =
            build_generation(self.factory.as_ref(), self.registry.as_ref(), self.size).await?;
        let model_id = generation.model_id.clone();

        let old = {
            let mut current = self.current.write().await;
            std::mem::replace(&mut *current, Arc::new(generation))
        };
        info!(from = %old.model_id, to = %model_id, "Workers reloaded");

        close_generation(&old).await;
        Ok(model_id)
    }

    /// Reload whenever `rx` changes, until its sender is dropped
    pub async fn watch_reloads(self: Arc<Self>, mut rx: watch::Receiver<u64>) {
        while rx.changed().await.is_ok() {
            let generation = *rx.borrow_and_update();
            debug!(generation, "Reload requested");
            if let Err(e) = self.reload().await {
                error!(
                    error = %e.private_message(),
                    "Reload failed, keeping current workers"
                );
            }
        }
        debug!("Reload channel closed");
    }

    /// Close every worker of the current generation
    pub async fn shutdown(&self) {
        let generation = Arc::clone(&*self.current.read().await);
        close_generation(&generation).await;
        info!("Worker pool stopped");
    }
}

async fn build_generation(
    factory: &dyn ScorerFactory,
    registry: &dyn SharedRegistry,
    size: usize,
) -> Result<Generation, ServingError> {
    let pointer = ActiveModelPointer::load(registry)
        .await?
        .ok_or_else(|| ServingError::Platform("no active model is published".to_string()))?;
    let artifact =
        ModelArtifact::load(&pointer.model_id, &pointer.metadata_path, &pointer.weights_path)
            .await?;

    let mut workers: Vec<WorkerSlot> = Vec::with_capacity(size);
    for index in 0..size {
        let mut scorer = factory.create(&artifact);
        if let Err(e) = scorer.start().await {
            warn!(worker = index, error = %e, "Failed to start scorer");
            let _ = scorer.close().await;
            for started in &workers {
                let _ = started.lock().await.close().await;
            }
            return Err(e.into());
        }
        workers.push(Arc::new(Mutex::new(scorer)));
    }

    Ok(Generation {
        model_id: pointer.model_id,
        workers,
    })
}

async fn close_generation(generation: &Generation) {
    for (index, worker) in generation.workers.iter().enumerate() {
        let mut scorer = worker.lock().await;
        match scorer.close().await {
            Ok(diagnostics) if !diagnostics.trim().is_empty() => {
                debug!(worker = index, diagnostics = %diagnostics.trim(), "Scorer closed");
            }
            Ok(_) => {}
            Err(e) => warn!(worker = index, error = %e, "Failed to close scorer"),
        }
    }
}
