//! In-process scorer for tests and dry runs
//!
//! MockScorer returns scripted score vectors without spawning anything, which
//! keeps router and worker-pool tests fast and deterministic.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::traits::{Scorer, ScorerFactory, ScorerState};
use crate::artifact::ModelArtifact;
use crate::error::ScorerError;

/// A recorded `learn()` call
#[derive(Debug, Clone, PartialEq)]
pub struct LearnCall {
    pub context: Vec<f64>,
    pub action: usize,
    pub cost: f64,
    pub probability: f64,
}

/// Mock implementation of Scorer
///
/// Queued responses are consumed first; afterwards every prediction is a
/// uniform distribution over `num_actions`.
pub struct MockScorer {
    state: ScorerState,
    num_actions: usize,
    responses: VecDeque<Result<Vec<f64>, ScorerError>>,
    learned: Arc<Mutex<Vec<LearnCall>>>,
    model_id: Option<String>,
}

impl MockScorer {
    pub fn new(num_actions: usize) -> Self {
        Self {
            state: ScorerState::Uninitialized,
            num_actions,
            responses: VecDeque::new(),
            learned: Arc::new(Mutex::new(Vec::new())),
            model_id: None,
        }
    }

    /// Queue raw scores for the next `predict()`; they are normalized on return
    pub fn queue_scores(&mut self, scores: Vec<f64>) {
        self.responses.push_back(Ok(scores));
    }

    /// Queue a failure for the next `predict()`
    pub fn queue_error(&mut self, error: ScorerError) {
        self.responses.push_back(Err(error));
    }

    /// Handle to the learn calls this scorer receives
    pub fn learned(&self) -> Arc<Mutex<Vec<LearnCall>>> {
        Arc::clone(&self.learned)
    }

    /// Model id this scorer was created for, if any
    pub fn model_id(&self) -> Option<&str> {
        self.model_id.as_deref()
    }
}

#[async_trait]
impl Scorer for MockScorer {
    async fn start(&mut self) -> Result<(), ScorerError> {
        if self.state == ScorerState::Closed {
            return Err(ScorerError::NotReady { state: self.state });
        }
        self.state = ScorerState::Running;
        Ok(())
    }

    async fn predict(&mut self, _context: &[f64]) -> Result<Vec<f64>, ScorerError> {
        if self.state != ScorerState::Running {
            return Err(ScorerError::NotReady { state: self.state });
        }

        let scores = match self.responses.pop_front() {
            Some(response) => response?,
            None => vec![1.0; self.num_actions],
        };

        let total: f64 = scores.iter().sum();
        if scores.is_empty() || total == 0.0 {
            return Err(ScorerError::Exhausted);
        }
        Ok(scores.into_iter().map(|s| s / total).collect())
    }

    async fn learn(
        &mut self,
        context: &[f64],
        action: usize,
        cost: f64,
        probability: f64,
    ) -> Result<(), ScorerError> {
        if self.state != ScorerState::Running {
            return Err(ScorerError::NotReady { state: self.state });
        }
        if let Ok(mut learned) = self.learned.lock() {
            learned.push(LearnCall {
                context: context.to_vec(),
                action,
                cost,
                probability,
            });
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<String, ScorerError> {
        self.state = ScorerState::Closed;
        Ok(String::new())
    }

    fn state(&self) -> ScorerState {
        self.state
    }
}

/// Factory producing uniform MockScorers
///
/// The number of actions is read from an `--actions N` pair in the artifact
/// metadata, defaulting to the configured count.
pub struct MockScorerFactory {
    default_actions: usize,
    created: Arc<Mutex<Vec<String>>>,
}

impl MockScorerFactory {
    pub fn new(default_actions: usize) -> Self {
        Self {
            default_actions,
            created: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Model ids of every scorer created so far, in order
    pub fn created(&self) -> Vec<String> {
        self.created
            .lock()
            .map(|created| created.clone())
            .unwrap_or_default()
    }
}

impl ScorerFactory for MockScorerFactory {
    fn create(&self, artifact: &ModelArtifact) -> Box<dyn Scorer> {
        let mut tokens = artifact.metadata.split_whitespace();
        let mut actions = self.default_actions;
        while let Some(token) = tokens.next() {
            if token == "--actions" {
                if let Some(n) = tokens.next().and_then(|n| n.parse().ok()) {
                    actions = n;
                }
            }
        }

        if let Ok(mut created) = self.created.lock() {
            created.push(artifact.model_id.clone());
        }

        let mut scorer = MockScorer::new(actions);
        scorer.model_id = Some(artifact.model_id.clone());
        Box::new(scorer)
    }
}
