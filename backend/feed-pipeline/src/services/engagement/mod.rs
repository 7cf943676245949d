// ============================================
// Engagement Shaping Module (参与度塑造)
// ============================================
//
// Sub-policies applied in sequence, each re-sorting:
// 1. Variable reward scheduling
// 2. Obsession-loop reinforcement
// 3. Continuation pacing (interleave, cliffhangers, hooks)
// 4. Re-engagement boost for fatigued sessions (top 5 x1.5)

pub mod obsession;
pub mod pacing;
pub mod variable_reward;

pub use obsession::{ObsessionDetector, ObsessionLoop};
pub use pacing::ContinuationPacer;
pub use variable_reward::{UserRewardHistory, VariableRewardScheduler};

use crate::config::EngagementConfig;
use crate::models::{Candidate, FingerprintLookup, SessionState, UserId};
use crate::utils::rerank;
use chrono::{DateTime, Duration, Utc};
use tracing::debug;

pub struct EngagementShaper {
    variable_reward: VariableRewardScheduler,
    obsession: ObsessionDetector,
    pacer: ContinuationPacer,
    fatigue_threshold: f64,
    fatigue_boost: f64,
    fatigue_top_n: usize,
}

impl Default for EngagementShaper {
    fn default() -> Self {
        Self::new(EngagementConfig::default(), None)
    }
}

impl EngagementShaper {
    pub fn new(config: EngagementConfig, seed: Option<u64>) -> Self {
        Self {
            obsession: ObsessionDetector::new(&config),
            pacer: ContinuationPacer::new(&config),
            fatigue_threshold: config.fatigue_threshold,
            fatigue_boost: config.fatigue_boost,
            fatigue_top_n: config.fatigue_top_n,
            variable_reward: VariableRewardScheduler::new(config, seed),
        }
    }

    pub fn variable_reward(&self) -> &VariableRewardScheduler {
        &self.variable_reward
    }

    pub fn shape(
        &self,
        user_id: &UserId,
        session: &SessionState,
        mut candidates: Vec<Candidate>,
        lookup: &dyn FingerprintLookup,
    ) -> Vec<Candidate> {
        self.variable_reward.apply(user_id, &mut candidates);

        if let Some(obsession) = self.obsession.detect(&session.recent_interactions, lookup) {
            self.obsession.apply_boost(&mut candidates, &obsession);
        }

        let mut candidates = self.pacer.optimize(candidates);

        let fatigued = session.fatigue_score > self.fatigue_threshold;
        if fatigued {
            for candidate in candidates.iter_mut().take(self.fatigue_top_n) {
                candidate.composite_score *= self.fatigue_boost;
            }
        }
        rerank(&mut candidates);

        debug!(
            user_id = %user_id,
            fatigued = fatigued,
            count = candidates.len(),
            "Engagement shaping complete"
        );

        candidates
    }

    /// Feed an observed reward into the user's history
    pub fn record_reward(&self, user_id: UserId, reward: f64) {
        self.variable_reward.record_reward(user_id, reward);
    }

    pub fn evict_idle(&self, now: DateTime<Utc>, ttl: Duration) -> usize {
        self.variable_reward.evict_idle(now, ttl)
    }
}
