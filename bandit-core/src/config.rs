//! Serving configuration
//!
//! Built once at startup (see `bandit-cli`) and handed to each component.
//! Nothing in the library reads the environment directly.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ServingError;

/// Bytes in one MiB, the unit of `max_payload_in_MB`
pub const MIB: usize = 1024 * 1024;

/// Default cap on request bodies
pub const DEFAULT_MAX_CONTENT_LENGTH: usize = 6 * MIB;

/// Configuration for the model lifecycle manager
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Experiment whose models are served
    #[serde(default = "default_experiment_id")]
    pub experiment_id: String,

    /// Model served at startup
    #[serde(default = "default_model_id")]
    pub model_id: String,

    /// Poll the metadata store for newer models
    #[serde(default)]
    pub poll_enabled: bool,

    /// Interval between polls
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Directory where a single model may be mounted
    #[serde(default = "default_artifacts_dir")]
    pub artifacts_dir: PathBuf,

    /// Root for per-attempt download directories
    #[serde(default = "default_downloads_dir")]
    pub downloads_dir: PathBuf,
}

fn default_experiment_id() -> String {
    "default_experiment".to_string()
}

fn default_model_id() -> String {
    "default_model".to_string()
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_artifacts_dir() -> PathBuf {
    PathBuf::from("/opt/ml/model")
}

fn default_downloads_dir() -> PathBuf {
    PathBuf::from("/opt/ml/downloads")
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            experiment_id: default_experiment_id(),
            model_id: default_model_id(),
            poll_enabled: false,
            poll_interval: default_poll_interval(),
            artifacts_dir: default_artifacts_dir(),
            downloads_dir: default_downloads_dir(),
        }
    }
}

impl LifecycleConfig {
    #[must_use]
    pub fn with_experiment_id(mut self, id: impl Into<String>) -> Self {
        self.experiment_id = id.into();
        self
    }

    #[must_use]
    pub fn with_model_id(mut self, id: impl Into<String>) -> Self {
        self.model_id = id.into();
        self
    }

    #[must_use]
    pub fn with_polling(mut self, enabled: bool) -> Self {
        self.poll_enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    #[must_use]
    pub fn with_artifacts_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifacts_dir = dir.into();
        self
    }

    #[must_use]
    pub fn with_downloads_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.downloads_dir = dir.into();
        self
    }
}

/// Online (single request) or batch (newline-delimited transform) serving
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InferenceMode {
    #[default]
    Online,
    Batch,
}

/// How a batch orchestrator should split input into requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStrategy {
    MultiRecord,
    SingleRecord,
}

/// Static server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerProfile {
    /// Number of scoring workers (one scorer process each)
    pub num_workers: usize,

    /// Request timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Largest accepted request body in bytes
    pub max_content_length: usize,

    pub mode: InferenceMode,

    /// An inference accelerator is attached; limits the pool to one worker
    pub accelerator_present: bool,
}

impl Default for ServerProfile {
    fn default() -> Self {
        Self {
            num_workers: Self::default_workers(false),
            timeout: Duration::from_secs(30),
            max_content_length: DEFAULT_MAX_CONTENT_LENGTH,
            mode: InferenceMode::Online,
            accelerator_present: false,
        }
    }
}

impl ServerProfile {
    /// CPU count capped at four, or one when an accelerator is attached
    pub fn default_workers(accelerator_present: bool) -> usize {
        if accelerator_present {
            return 1;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(4)
    }

    #[must_use]
    pub fn with_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers;
        self
    }

    #[must_use]
    pub fn with_mode(mut self, mode: InferenceMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_max_content_length(mut self, bytes: usize) -> Self {
        self.max_content_length = bytes;
        self
    }

    /// Concurrent transform requests a batch caller should send
    pub fn max_concurrent_transforms(&self) -> usize {
        self.num_workers
    }

    pub fn batch_strategy(&self) -> BatchStrategy {
        BatchStrategy::MultiRecord
    }

    /// Body cap rounded down to whole MiB
    pub fn max_payload_in_mb(&self) -> usize {
        self.max_content_length / MIB
    }
}

/// Experience logging settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Record decisions and rewards
    pub log_inference_data: bool,

    /// Delivery stream receiving the records
    pub delivery_stream: Option<String>,

    /// Route records through the in-process channel instead of publishing directly
    pub relay: bool,
}

/// Everything the serving process needs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServingConfig {
    pub lifecycle: LifecycleConfig,
    pub profile: ServerProfile,
    pub logging: LoggingConfig,
    /// Registry name of the scoring engine
    pub scorer: String,
    /// Binary used by the `vw` scorer
    pub vw_binary: String,
    pub port: u16,
}

impl Default for ServingConfig {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleConfig::default(),
            profile: ServerProfile::default(),
            logging: LoggingConfig::default(),
            scorer: "vw".to_string(),
            vw_binary: "vw".to_string(),
            port: 8080,
        }
    }
}

impl ServingConfig {
    /// Reject combinations that cannot run
    pub fn validate(&self) -> Result<(), ServingError> {
        if self.logging.log_inference_data
            && self
                .logging
                .delivery_stream
                .as_deref()
                .is_none_or(str::is_empty)
        {
            return Err(ServingError::Platform(
                "inference logging is enabled but no delivery stream is configured".to_string(),
            ));
        }
        if self.profile.num_workers == 0 {
            return Err(ServingError::Customer(
                "at least one worker is required".to_string(),
            ));
        }
        if self.profile.max_content_length == 0 {
            return Err(ServingError::Customer(
                "max content length must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
