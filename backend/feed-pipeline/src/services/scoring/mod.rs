// ============================================
// Scoring Oracle
// ============================================
//
// Per-item scoring lives outside the pipeline; this module only defines
// the capability and a weighted reference implementation.
//
// composite = 0.4 * watch_time + 0.2 * completion + 0.15 * rewatch
//           + 0.15 * continuation - 0.05 * skip - 0.05 * fatigue

use crate::models::{objectives, Candidate, ItemFeatures, SessionState, UserContext};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Produces scored candidates for a user and session
#[cfg_attr(test, mockall::automock)]
pub trait ScoringOracle: Send + Sync {
    fn score(
        &self,
        user: &UserContext,
        items: &[ItemFeatures],
        session: &SessionState,
    ) -> Vec<Candidate>;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveWeights {
    pub watch_time: f64,
    pub completion: f64,
    pub rewatch: f64,
    pub continuation: f64,
    pub skip_penalty: f64,
    pub fatigue_penalty: f64,
}

impl Default for ObjectiveWeights {
    fn default() -> Self {
        Self {
            watch_time: 0.4,
            completion: 0.2,
            rewatch: 0.15,
            continuation: 0.15,
            skip_penalty: 0.05,
            fatigue_penalty: 0.05,
        }
    }
}

/// Combines the per-objective predictions carried on each item record
#[derive(Debug, Clone, Default)]
pub struct WeightedObjectiveOracle {
    weights: ObjectiveWeights,
}

impl WeightedObjectiveOracle {
    pub fn new(weights: ObjectiveWeights) -> Self {
        Self { weights }
    }

    pub fn composite(&self, item: &ItemFeatures) -> f64 {
        let p = |name: &str| item.objective_predictions.get(name).copied().unwrap_or(0.0);
        let w = &self.weights;

        w.watch_time * p(objectives::WATCH_TIME)
            + w.completion * p(objectives::COMPLETION)
            + w.rewatch * p(objectives::REWATCH)
            + w.continuation * p(objectives::CONTINUATION)
            - w.skip_penalty * p(objectives::SKIP)
            - w.fatigue_penalty * p(objectives::FATIGUE)
    }
}

impl ScoringOracle for WeightedObjectiveOracle {
    fn score(
        &self,
        user: &UserContext,
        items: &[ItemFeatures],
        _session: &SessionState,
    ) -> Vec<Candidate> {
        let candidates: Vec<Candidate> = items
            .iter()
            .map(|item| {
                let mut candidate =
                    Candidate::new(item.item_id, item.fingerprint.clone(), self.composite(item));
                candidate.category = item.category.clone();
                candidate.objective_scores = item.objective_predictions.clone();
                candidate
            })
            .collect();

        debug!(
            user_id = %user.user_id,
            scored = candidates.len(),
            "Scored candidates"
        );
        candidates
    }
}
