//! Scorer trait and related types
//!
//! A scorer turns a context vector into a probability distribution over
//! candidate actions. The production implementation drives an external
//! process over pipes; alternate engines only need to implement [`Scorer`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::artifact::ModelArtifact;
use crate::error::ScorerError;

/// Lifecycle state of a scorer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScorerState {
    /// Created but not started
    Uninitialized,
    /// Accepting predict and learn calls
    Running,
    /// Shut down; no further calls accepted
    Closed,
}

impl std::fmt::Display for ScorerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Running => write!(f, "running"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Trait for scoring engines
///
/// Calls take `&mut self`: a scorer handles one request at a time, and callers
/// sharing a scorer serialize through a mutex.
#[async_trait]
pub trait Scorer: Send + Sync {
    /// Launch and validate the engine
    async fn start(&mut self) -> Result<(), ScorerError>;

    /// Score a context vector, returning one normalized probability per action
    async fn predict(&mut self, context: &[f64]) -> Result<Vec<f64>, ScorerError>;

    /// Feed one labelled example back into the engine
    async fn learn(
        &mut self,
        context: &[f64],
        action: usize,
        cost: f64,
        probability: f64,
    ) -> Result<(), ScorerError>;

    /// Shut down, returning any diagnostic output the engine produced
    async fn close(&mut self) -> Result<String, ScorerError>;

    /// Current lifecycle state
    fn state(&self) -> ScorerState;
}

/// Factory for creating scorers bound to a model artifact
///
/// Enables dependency injection of scoring engines.
pub trait ScorerFactory: Send + Sync {
    /// Create an unstarted scorer for the given artifact
    fn create(&self, artifact: &ModelArtifact) -> Box<dyn Scorer>;
}
