//! Scoring engine abstraction

pub mod mock;
pub mod traits;
pub mod vw;

pub use mock::{LearnCall, MockScorer, MockScorerFactory};
pub use traits::{Scorer, ScorerFactory, ScorerState};
pub use vw::{VwConfig, VwScorer, VwScorerFactory, normalize_scores};
