//! Error types for bandit-core
//!
//! Every module owns a narrow error enum; [`ServingError`] wraps them all and
//! classifies each failure into an [`ErrorKind`], which decides the exit code
//! at startup and the status code on the request path.

use std::fmt;

use thiserror::Error;

use crate::scorer::ScorerState;

/// Coarse classification of a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input or configuration supplied by the caller or operator
    Customer,
    /// Infrastructure misconfiguration (missing table, stream, binary)
    Platform,
    /// Unexpected internal failure
    Algorithm,
    /// The scoring subprocess has exited or stopped answering
    ProcessDown,
}

impl ErrorKind {
    /// Process exit code used when this kind of error aborts startup
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Customer => 1,
            Self::Algorithm => 2,
            Self::Platform => 3,
            Self::ProcessDown => 4,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Customer => write!(f, "customer"),
            Self::Platform => write!(f, "platform"),
            Self::Algorithm => write!(f, "algorithm"),
            Self::ProcessDown => write!(f, "process-down"),
        }
    }
}

/// Top-level error type for bandit-core
#[derive(Error, Debug)]
pub enum ServingError {
    #[error("Scorer error: {0}")]
    Scorer(#[from] ScorerError),

    #[error("Metadata store error: {0}")]
    Store(#[from] StoreError),

    #[error("Artifact error: {0}")]
    Artifact(#[from] ArtifactError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Reload signal error: {0}")]
    Reload(#[from] ReloadError),

    #[error("{0}")]
    Customer(String),

    #[error("{0}")]
    Platform(String),

    #[error("{0}")]
    Algorithm(String),
}

impl ServingError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Scorer(e) => e.kind(),
            Self::Store(e) => e.kind(),
            Self::Artifact(e) => e.kind(),
            Self::Codec(e) => e.kind(),
            Self::Registry(_) | Self::Reload(_) | Self::Platform(_) => ErrorKind::Platform,
            Self::Customer(_) => ErrorKind::Customer,
            Self::Algorithm(_) => ErrorKind::Algorithm,
        }
    }

    /// Exit code for a startup-phase failure
    pub fn exit_code(&self) -> i32 {
        self.kind().exit_code()
    }

    /// Message safe to hand to an external caller
    ///
    /// Customer errors are descriptive; everything else is reduced to its kind
    /// so internal paths and process output never leak.
    pub fn public_message(&self) -> String {
        match self.kind() {
            ErrorKind::Customer => self.to_string(),
            ErrorKind::ProcessDown => "Scoring process unavailable".to_string(),
            kind => format!("{kind} error, see server logs for details"),
        }
    }

    /// Full message including every source in the chain
    pub fn private_message(&self) -> String {
        let mut message = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            let cause_text = cause.to_string();
            if !message.contains(&cause_text) {
                message.push_str(": ");
                message.push_str(&cause_text);
            }
            source = cause.source();
        }
        message
    }
}

/// Errors from the scoring subprocess adapter
#[derive(Error, Debug)]
pub enum ScorerError {
    #[error("Scorer is not ready (state: {state})")]
    NotReady { state: ScorerState },

    #[error("Scoring process exited unexpectedly: code {code:?}")]
    ProcessDown { code: Option<i32> },

    #[error("Scoring process returned no usable scores")]
    Exhausted,

    #[error("Scorer binary not found: {0}")]
    BinaryNotFound(String),

    #[error("Failed to spawn scoring process: {0}")]
    SpawnFailed(#[source] std::io::Error),

    #[error("Scoring process failed validation: {0}")]
    Validation(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid scoring input: {0}")]
    InvalidInput(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ScorerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ProcessDown { .. } | Self::Exhausted => ErrorKind::ProcessDown,
            Self::BinaryNotFound(_) | Self::SpawnFailed(_) | Self::Validation(_) => {
                ErrorKind::Platform
            }
            Self::InvalidInput(_) => ErrorKind::Customer,
            Self::NotReady { .. } | Self::Protocol(_) | Self::Io(_) => ErrorKind::Algorithm,
        }
    }
}

/// Errors from the metadata store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Metadata store is not ready: {0}")]
    NotReady(String),

    #[error("Record already exists: {key}")]
    Conflict { key: String },

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Malformed metadata document: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Conflict { .. } | Self::NotFound(_) => ErrorKind::Customer,
            Self::NotReady(_) | Self::Serialization(_) | Self::Io(_) => ErrorKind::Platform,
        }
    }
}

/// Errors while fetching, unpacking or locating a model artifact
#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("Invalid artifact URI: {0}")]
    InvalidUri(String),

    #[error("Could not find {name} in {dir}")]
    MissingFile { name: String, dir: String },

    #[error("Model {0} has no artifact location")]
    NoLocation(String),

    #[error("Download failed: {0}")]
    Download(String),

    #[error("Failed to unpack artifact: {0}")]
    Unpack(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ArtifactError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidUri(_)
            | Self::MissingFile { .. }
            | Self::NoLocation(_)
            | Self::Unpack(_) => ErrorKind::Customer,
            Self::Download(_) | Self::Io(_) => ErrorKind::Platform,
        }
    }
}

/// Errors decoding requests or encoding responses
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Unsupported content type: {0}")]
    UnsupportedContentType(String),

    #[error("Incorrect JSON format error: {0}")]
    Malformed(String),

    #[error("Failed to encode response: {0}")]
    Encode(String),
}

impl CodecError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsupportedContentType(_) | Self::Malformed(_) => ErrorKind::Customer,
            Self::Encode(_) => ErrorKind::Algorithm,
        }
    }
}

/// Errors from the capability registry
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("No scorer registered under '{0}'")]
    UnknownScorer(String),

    #[error("Shared registry unavailable: {0}")]
    Unavailable(String),
}

/// Errors delivering a reload signal
#[derive(Error, Debug)]
pub enum ReloadError {
    #[error("Failed to read pidfile {path}: {source}")]
    PidFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid pid in pidfile: {0}")]
    InvalidPid(String),

    #[error("Failed to signal process {pid}: {reason}")]
    SignalFailed { pid: i32, reason: String },

    #[error("No reload listener is attached")]
    Closed,
}

pub type Result<T> = std::result::Result<T, ServingError>;
