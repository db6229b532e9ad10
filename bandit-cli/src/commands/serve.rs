//! Bandit serve command
//!
//! Wires every component into one serving process:
//! - model lifecycle manager (startup resolution and metadata polling)
//! - worker pool with one scorer per worker, reloaded on swap or SIGHUP
//! - optional experience logging through the event publisher
//! - the HTTP surface, drained on SIGTERM or Ctrl-C

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use bandit_core::artifact::{HttpObjectStore, LocalObjectStore};
use bandit_core::reload::{remove_pidfile, write_pidfile};
use bandit_core::scorer::VwConfig;
use bandit_core::{
    CapabilityRegistry, ChannelReload, FileMetadataStore, InMemoryRegistry, InferenceMode,
    LifecycleConfig, LoggingConfig, ModelManager, ObjectStore, ReloadSignal, ServerProfile,
    ServingConfig, ServingError,
};
use bandit_server::{AppState, BanditServer, ServerConfig, ServerError, WorkerPool};
use bandit_stream::{ChannelSink, EventPublisher, JsonlDeliveryStream, PublisherConfig, RecordSink};
use clap::Args;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Default port for the scoring server
pub const DEFAULT_PORT: u16 = 8080;
/// Default host for the scoring server
pub const DEFAULT_HOST: &str = "0.0.0.0";
/// Default pidfile location
pub const DEFAULT_PIDFILE: &str = "/tmp/bandit.pid";

/// Arguments for the serve command
#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Experiment whose models are served
    #[arg(long, env = "EXPERIMENT_ID", default_value = "default_experiment")]
    pub experiment_id: String,

    /// Model served at startup
    #[arg(long, env = "MODEL_ID", default_value = "default_model")]
    pub model_id: String,

    /// Poll the metadata store for newer models
    #[arg(long, env = "MODEL_METADATA_POLLING")]
    pub poll_metadata: bool,

    /// Milliseconds between metadata polls
    #[arg(long, env = "MODEL_POLL_INTERVAL_MS", default_value_t = 1000)]
    pub poll_interval_ms: u64,

    /// JSON metadata document
    #[arg(long, env = "MODEL_METADATA_PATH")]
    pub metadata_path: Option<PathBuf>,

    /// Object store root directory or http(s):// endpoint
    #[arg(long, env = "OBJECT_STORE")]
    pub object_store: Option<String>,

    /// Directory where a model may be mounted
    #[arg(long, env = "ARTIFACTS_DIR", default_value = "/opt/ml/model")]
    pub artifacts_dir: PathBuf,

    /// Root for downloaded models
    #[arg(long, env = "DOWNLOADS_DIR", default_value = "/opt/ml/downloads")]
    pub downloads_dir: PathBuf,

    /// Record decisions and rewards
    #[arg(long, env = "LOG_INFERENCE_DATA")]
    pub log_inference_data: bool,

    /// Delivery stream receiving experience records
    #[arg(long, env = "DELIVERY_STREAM")]
    pub delivery_stream: Option<String>,

    /// Directory holding one JSON-lines file per delivery stream
    #[arg(long, env = "DELIVERY_DIR", default_value = "/opt/ml/output/events")]
    pub delivery_dir: PathBuf,

    /// Buffer records and send them in batches
    #[arg(long, env = "DELIVERY_BUFFER_ON")]
    pub buffer: bool,

    /// Records per batch when buffering
    #[arg(long, env = "DELIVERY_BATCH_SIZE", default_value_t = 50)]
    pub batch_size: usize,

    /// Milliseconds before a partial batch is flushed
    #[arg(long, env = "DELIVERY_BATCH_TIME_MS", default_value_t = 200)]
    pub batch_time_ms: u64,

    /// Route records through an in-process channel relayed by the publisher
    #[arg(long, env = "EXPERIENCE_RELAY")]
    pub relay: bool,

    /// Host to bind to
    #[arg(long, default_value = DEFAULT_HOST)]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "BIND_TO_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Largest accepted request body in bytes
    #[arg(long, env = "MAX_CONTENT_LENGTH", default_value_t = bandit_core::config::DEFAULT_MAX_CONTENT_LENGTH)]
    pub max_content_length: usize,

    /// Batch transform mode
    #[arg(long, env = "BATCH_INFERENCE")]
    pub batch: bool,

    /// An inference accelerator is attached
    #[arg(long, env = "INFERENCE_ACCELERATOR_PRESENT")]
    pub accelerator: bool,

    /// Scoring workers (default: CPU count capped at 4)
    #[arg(long, env = "NUM_WORKERS")]
    pub workers: Option<usize>,

    /// Registered scoring engine
    #[arg(long, env = "SCORER", default_value = "vw")]
    pub scorer: String,

    /// Vowpal Wabbit executable
    #[arg(long, env = "VW_BINARY", default_value = "vw")]
    pub vw_binary: String,

    /// Pidfile used by `bandit reload`
    #[arg(long, env = "PIDFILE", default_value = DEFAULT_PIDFILE)]
    pub pidfile: PathBuf,
}

impl ServeArgs {
    /// Build the serving configuration these arguments describe
    pub fn serving_config(&self) -> ServingConfig {
        let lifecycle = LifecycleConfig::default()
            .with_experiment_id(&self.experiment_id)
            .with_model_id(&self.model_id)
            .with_polling(self.poll_metadata)
            .with_poll_interval(Duration::from_millis(self.poll_interval_ms))
            .with_artifacts_dir(&self.artifacts_dir)
            .with_downloads_dir(&self.downloads_dir);

        let mut profile = ServerProfile {
            accelerator_present: self.accelerator,
            ..ServerProfile::default()
        }
        .with_workers(
            self.workers
                .unwrap_or_else(|| ServerProfile::default_workers(self.accelerator)),
        )
        .with_max_content_length(self.max_content_length);
        if self.batch {
            profile = profile.with_mode(InferenceMode::Batch);
        }

        ServingConfig {
            lifecycle,
            profile,
            logging: LoggingConfig {
                log_inference_data: self.log_inference_data,
                delivery_stream: self.delivery_stream.clone(),
                relay: self.relay,
            },
            scorer: self.scorer.clone(),
            vw_binary: self.vw_binary.clone(),
            port: self.port,
        }
    }

    fn publisher_config(&self, stream_name: &str, workers: usize) -> PublisherConfig {
        PublisherConfig::new(stream_name)
            .with_buffering(self.buffer)
            .with_batch_size(self.batch_size)
            .with_batch_time(Duration::from_millis(self.batch_time_ms))
            .with_workers(workers)
    }
}

/// Run the serve command
///
/// Startup failures exit the process with the code of their error kind.
pub async fn run(args: ServeArgs) -> Result<()> {
    if let Err(e) = serve(&args).await {
        error!(error = %e, exit_code = e.exit_code(), "Server failed");
        std::process::exit(e.exit_code());
    }
    Ok(())
}

/// Experience logging wired into the server
struct Logging {
    publisher: Arc<EventPublisher>,
    sink: Arc<dyn RecordSink>,
    relay: Option<JoinHandle<()>>,
}

fn start_logging(args: &ServeArgs, config: &ServingConfig) -> Option<Logging> {
    if !config.logging.log_inference_data {
        return None;
    }
    let stream_name = config.logging.delivery_stream.as_deref()?;

    let stream = Arc::new(JsonlDeliveryStream::new(&args.delivery_dir));
    info!(
        path = %stream.path_for(stream_name).display(),
        buffered = args.buffer,
        relay = config.logging.relay,
        "Experience logging enabled"
    );
    let publisher_config = args.publisher_config(stream_name, config.profile.num_workers);
    let capacity = publisher_config.queue_capacity;
    let publisher = Arc::new(EventPublisher::new(publisher_config, stream));

    if config.logging.relay {
        let (sink, rx) = ChannelSink::channel(capacity);
        let relay = tokio::spawn({
            let publisher = Arc::clone(&publisher);
            async move { publisher.forward_from(rx).await }
        });
        Some(Logging {
            publisher,
            sink: Arc::new(sink),
            relay: Some(relay),
        })
    } else {
        Some(Logging {
            sink: publisher.clone(),
            publisher,
            relay: None,
        })
    }
}

fn object_store(location: &str) -> Arc<dyn ObjectStore> {
    if location.starts_with("http://") || location.starts_with("https://") {
        Arc::new(HttpObjectStore::new(location))
    } else {
        Arc::new(LocalObjectStore::new(location))
    }
}

async fn serve(args: &ServeArgs) -> Result<(), ServerError> {
    let config = args.serving_config();
    config.validate()?;

    let capabilities = Arc::new(CapabilityRegistry::with_defaults(
        VwConfig::default().with_binary(&config.vw_binary),
    ));
    let factory = capabilities
        .scorer(&config.scorer)
        .map_err(ServingError::from)?;

    let registry = Arc::new(InMemoryRegistry::new());
    let reload = Arc::new(ChannelReload::new());
    let reload_rx = reload.subscribe();

    let mut manager = ModelManager::new(config.lifecycle.clone(), registry.clone(), reload.clone());
    if let Some(path) = &args.metadata_path {
        manager = manager.with_metadata(Arc::new(FileMetadataStore::new(path)));
    }
    if let Some(location) = &args.object_store {
        manager = manager.with_objects(object_store(location));
    }
    manager.initialize().await?;

    let workers = Arc::new(
        WorkerPool::start(factory, registry.clone(), config.profile.num_workers).await?,
    );

    if let Err(e) = write_pidfile(&args.pidfile) {
        warn!(path = %args.pidfile.display(), error = %e, "Failed to write pidfile");
    }

    let logging = start_logging(args, &config);
    let mut state = AppState::new(Arc::clone(&workers), capabilities, config.profile.clone());
    if let Some(logging) = &logging {
        state = state.with_sink(Arc::clone(&logging.sink));
    }

    let cancel = CancellationToken::new();
    let manager_task = tokio::spawn(manager.run(cancel.clone().cancelled_owned()));
    let reload_task = tokio::spawn(Arc::clone(&workers).watch_reloads(reload_rx));
    let hangup_task = tokio::spawn(forward_hangups(reload.clone()));

    info!(
        model_id = %workers.model_id().await,
        workers = workers.size(),
        mode = ?config.profile.mode,
        "Starting bandit server"
    );
    let server = BanditServer::new(ServerConfig::new(&args.host, config.port), Arc::new(state));
    let result = server.run(shutdown_signal()).await;

    // Polling stops before the workers it reloads are closed.
    cancel.cancel();
    hangup_task.abort();
    let manager = manager_task.await.ok();
    reload_task.abort();
    workers.shutdown().await;

    if let Some(logging) = logging {
        let Logging {
            publisher,
            sink,
            relay,
        } = logging;
        drop(sink);
        if let Some(relay) = relay {
            let timeout = publisher.config().shutdown_timeout;
            if tokio::time::timeout(timeout, relay).await.is_err() {
                warn!("Experience relay did not drain before shutdown");
            }
        }
        publisher.close().await;
    }

    if let Some(manager) = manager
        && let Err(e) = manager.shutdown().await
    {
        warn!(error = %e, "Failed to clear active model pointer");
    }
    if let Err(e) = remove_pidfile(&args.pidfile) {
        warn!(path = %args.pidfile.display(), error = %e, "Failed to remove pidfile");
    }

    info!("bandit server shut down");
    result
}

/// Turn SIGHUP into a worker reload
#[cfg(unix)]
async fn forward_hangups(reload: Arc<ChannelReload>) {
    let mut hangup = match signal::unix::signal(signal::unix::SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(e) => {
            warn!(error = %e, "Failed to install SIGHUP handler");
            return;
        }
    };
    while hangup.recv().await.is_some() {
        info!("Received SIGHUP, reloading workers");
        if let Err(e) = reload.signal() {
            warn!(error = %e, "Reload signal not delivered");
        }
    }
}

#[cfg(not(unix))]
async fn forward_hangups(_reload: Arc<ChannelReload>) {}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
