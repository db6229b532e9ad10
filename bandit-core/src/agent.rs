//! Action selection on top of a scorer
//!
//! The scorer supplies a probability per candidate action. The first action is
//! explored by sampling that distribution; any further `top_k` slots are
//! filled greedily in descending probability.

use rand::Rng;

use crate::error::ScorerError;
use crate::scorer::Scorer;

/// Result of an action choice
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    /// Chosen action indices, zero-based, sampled action first
    pub actions: Vec<usize>,
    /// Full probability distribution, one entry per candidate
    pub action_probs: Vec<f64>,
}

/// Score `shared_context` and choose `top_k` actions
///
/// When `actions_context` is supplied, its length must match the number of
/// probabilities the scorer returns.
pub async fn choose_actions(
    scorer: &mut dyn Scorer,
    shared_context: &[f64],
    actions_context: Option<&[Vec<f64>]>,
    top_k: usize,
) -> Result<Decision, ScorerError> {
    let action_probs = scorer.predict(shared_context).await?;

    if let Some(candidates) = actions_context {
        if candidates.len() != action_probs.len() {
            return Err(ScorerError::InvalidInput(format!(
                "actions_context has {} candidates but the model scores {} actions",
                candidates.len(),
                action_probs.len()
            )));
        }
    }

    let actions = select_actions(&action_probs, top_k, &mut rand::thread_rng())?;
    Ok(Decision {
        actions,
        action_probs,
    })
}

/// Pick `top_k` distinct actions from a probability distribution
pub fn select_actions<R: Rng + ?Sized>(
    probs: &[f64],
    top_k: usize,
    rng: &mut R,
) -> Result<Vec<usize>, ScorerError> {
    if top_k == 0 || top_k > probs.len() {
        return Err(ScorerError::InvalidInput(format!(
            "top_k must be between 1 and {}, got {top_k}",
            probs.len()
        )));
    }

    let draw: f64 = rng.r#gen();
    let mut cumulative = 0.0;
    let mut sampled = probs.len() - 1;
    for (index, p) in probs.iter().enumerate() {
        cumulative += p;
        if draw < cumulative {
            sampled = index;
            break;
        }
    }

    let mut rest: Vec<usize> = (0..probs.len()).filter(|&i| i != sampled).collect();
    rest.sort_by(|a, b| probs[*b].total_cmp(&probs[*a]));

    let mut actions = Vec::with_capacity(top_k);
    actions.push(sampled);
    actions.extend(rest.into_iter().take(top_k - 1));
    Ok(actions)
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;
    use crate::scorer::MockScorer;

    #[test]
    fn select_single_action_follows_distribution() {
        let mut rng = StdRng::seed_from_u64(7);
        let probs = [0.0, 1.0, 0.0];
        for _ in 0..20 {
            assert_eq!(select_actions(&probs, 1, &mut rng).unwrap(), vec![1]);
        }
    }

    #[test]
    fn select_fills_remaining_by_descending_probability() {
        let mut rng = StdRng::seed_from_u64(1);
        let probs = [1.0, 0.0, 0.0, 0.0];
        let chosen = select_actions(&[0.0, 0.2, 0.5, 0.3], 3, &mut rng).unwrap();
        assert_eq!(chosen.len(), 3);
        let mut sorted = chosen.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), 3, "actions must be distinct");
        assert!(!chosen.contains(&0), "zero-probability action is never sampled first");

        let chosen = select_actions(&probs, 3, &mut rng).unwrap();
        assert_eq!(chosen[0], 0);
    }

    #[test]
    fn select_rejects_out_of_range_top_k() {
        let mut rng = StdRng::seed_from_u64(3);
        assert!(select_actions(&[0.5, 0.5], 0, &mut rng).is_err());
        assert!(select_actions(&[0.5, 0.5], 3, &mut rng).is_err());
    }

    #[tokio::test]
    async fn choose_actions_returns_full_distribution() {
        let mut scorer = MockScorer::new(2);
        scorer.start().await.unwrap();
        let candidates = vec![vec![0.0, 1.0], vec![1.0, 0.0]];
        let decision = choose_actions(&mut scorer, &[1.0, 3.0], Some(&candidates), 1)
            .await
            .unwrap();
        assert_eq!(decision.actions.len(), 1);
        assert_eq!(decision.action_probs.len(), 2);
        assert!((decision.action_probs.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn choose_actions_rejects_mismatched_candidates() {
        let mut scorer = MockScorer::new(3);
        scorer.start().await.unwrap();
        let candidates = vec![vec![0.0], vec![1.0]];
        let result = choose_actions(&mut scorer, &[1.0], Some(&candidates), 1).await;
        assert!(matches!(result, Err(ScorerError::InvalidInput(_))));
    }
}
