//! Shared test utilities for bandit-server integration tests

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum_test::TestServer;
use bandit_core::artifact::{METADATA_FILE, WEIGHTS_FILE};
use bandit_core::scorer::VwConfig;
use bandit_core::{
    ActiveModelPointer, CapabilityRegistry, InMemoryRegistry, MockScorerFactory, ScorerFactory,
    ServerProfile,
};
use bandit_server::{AppState, BanditServer, ServerConfig, WorkerPool, create_router};
use bandit_stream::{EventPublisher, InMemoryDeliveryStream, PublisherConfig};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

/// Everything a test needs to drive the router and inspect its effects
#[allow(dead_code)]
pub struct TestContext {
    pub dir: TempDir,
    pub registry: Arc<InMemoryRegistry>,
    pub workers: Arc<WorkerPool>,
    pub state: Arc<AppState>,
    pub publisher: Option<Arc<EventPublisher>>,
    pub stream: Arc<InMemoryDeliveryStream>,
}

#[allow(dead_code)]
impl TestContext {
    pub fn server(&self) -> TestServer {
        TestServer::new(create_router(Arc::clone(&self.state))).unwrap()
    }

    /// Drain the publisher so every submitted event reaches the stream
    pub async fn flush_events(&self) {
        if let Some(publisher) = &self.publisher {
            publisher.close().await;
        }
    }
}

/// Write a model directory and point the registry at it
#[allow(dead_code)]
pub async fn publish_model(
    registry: &InMemoryRegistry,
    root: &Path,
    model_id: &str,
    metadata: &str,
) {
    let dir = root.join(model_id);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(METADATA_FILE), metadata).unwrap();
    std::fs::write(dir.join(WEIGHTS_FILE), model_id.as_bytes()).unwrap();
    ActiveModelPointer {
        model_id: model_id.to_string(),
        weights_path: dir.join(WEIGHTS_FILE),
        metadata_path: dir.join(METADATA_FILE),
    }
    .publish(registry)
    .await
    .unwrap();
}

/// Context backed by two-action mock scorers
#[allow(dead_code)]
pub async fn create_context(logging: bool) -> TestContext {
    create_context_with_factory(Arc::new(MockScorerFactory::new(2)), logging).await
}

#[allow(dead_code)]
pub async fn create_context_with_factory(
    factory: Arc<dyn ScorerFactory>,
    logging: bool,
) -> TestContext {
    let dir = TempDir::new().unwrap();
    let registry = Arc::new(InMemoryRegistry::new());
    publish_model(&registry, dir.path(), "m-1", "--actions 2").await;

    let workers = Arc::new(WorkerPool::start(factory, registry.clone(), 2).await.unwrap());
    let capabilities = Arc::new(CapabilityRegistry::with_defaults(VwConfig::default()));
    let stream = Arc::new(InMemoryDeliveryStream::new());

    let mut state = AppState::new(
        Arc::clone(&workers),
        capabilities,
        ServerProfile::default().with_workers(2),
    );
    let publisher = if logging {
        let publisher = Arc::new(EventPublisher::new(
            PublisherConfig::new("experience"),
            stream.clone(),
        ));
        state = state.with_sink(publisher.clone());
        Some(publisher)
    } else {
        None
    };

    TestContext {
        dir,
        registry,
        workers,
        state: Arc::new(state),
        publisher,
        stream,
    }
}

/// Spawns a real server in the background; send on the returned channel to stop it
#[allow(dead_code)]
pub async fn spawn_server(state: Arc<AppState>) -> (SocketAddr, oneshot::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel::<()>();

    let server = BanditServer::new(ServerConfig::new("127.0.0.1", addr.port()), state);
    tokio::spawn(async move {
        let _ = server
            .run_with_listener(listener, async move {
                let _ = rx.await;
            })
            .await;
    });

    // Brief delay to ensure server is accepting connections
    tokio::time::sleep(Duration::from_millis(10)).await;

    (addr, tx)
}
