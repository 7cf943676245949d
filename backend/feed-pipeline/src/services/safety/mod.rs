// ============================================
// Failure Mode Handler (失效模式处理)
// ============================================
//
// Rule-based detectors, each a pure function of an interaction window or
// a feed:
// - Engagement farming (bot pattern, like farming, coordinated bursts)
// - Loop exploitation (history collapsed onto near-identical items)
// - Over-personalization (feed diversity below 0.3, category cap 3)
// - Content homogenization (platform diversity below 0.2, monitoring only)
//
// The handler also owns the bounded per-item interaction windows the spam
// detector reads.

pub mod homogenization;
pub mod loop_detector;
pub mod personalization;
pub mod spam_detector;

pub use homogenization::HomogenizationDetector;
pub use loop_detector::{LoopCheck, LoopExploitationDetector};
pub use personalization::{cap_categories, DiversityCheck, OverPersonalizationDetector};
pub use spam_detector::{EngagementFarmingDetector, SpamAssessment, SpamSignal};

use crate::config::SafetyConfig;
use crate::metrics::{LOOP_FLAGS, OVER_PERSONALIZATION_FLAGS, PLATFORM_DIVERSITY, SPAM_PENALTIES};
use crate::models::{Candidate, FingerprintLookup, Interaction, ItemId, UserId};
use crate::utils::rerank;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::collections::{HashMap, VecDeque};
use tracing::{debug, warn};

pub struct FailureModeHandler {
    penalty_factor: f64,
    window_size: usize,
    farming: EngagementFarmingDetector,
    loops: LoopExploitationDetector,
    personalization: OverPersonalizationDetector,
    homogenization: HomogenizationDetector,
    item_interactions: DashMap<ItemId, VecDeque<Interaction>>,
}

impl Default for FailureModeHandler {
    fn default() -> Self {
        Self::new(&SafetyConfig::default())
    }
}

impl FailureModeHandler {
    pub fn new(config: &SafetyConfig) -> Self {
        Self {
            penalty_factor: config.spam_penalty_factor,
            window_size: config.item_interaction_window.max(1),
            farming: EngagementFarmingDetector::new(config),
            loops: LoopExploitationDetector::new(config),
            personalization: OverPersonalizationDetector::new(config),
            homogenization: HomogenizationDetector::new(config),
            item_interactions: DashMap::new(),
        }
    }

    /// Append to the item's bounded interaction window
    pub fn record_interaction(&self, interaction: &Interaction) {
        let mut window = self.item_interactions.entry(interaction.item_id).or_default();
        window.push_back(interaction.clone());
        while window.len() > self.window_size {
            window.pop_front();
        }
    }

    pub fn item_window(&self, item_id: &ItemId) -> Vec<Interaction> {
        self.item_interactions
            .get(item_id)
            .map(|w| w.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn assess_item(&self, item_id: &ItemId) -> SpamAssessment {
        match self.item_interactions.get(item_id) {
            Some(window) => {
                let interactions: Vec<Interaction> = window.iter().cloned().collect();
                drop(window);
                self.farming.detect(&interactions)
            }
            None => SpamAssessment::default(),
        }
    }

    /// Penalize candidates with farmed engagement: score *= 1 - spam * penalty
    pub fn suppress_spam(&self, candidates: &mut [Candidate]) -> usize {
        let mut penalized = 0;
        for candidate in candidates.iter_mut() {
            let assessment = self.assess_item(&candidate.item_id);
            if assessment.score > 0.0 {
                candidate.composite_score *= 1.0 - assessment.score * self.penalty_factor;
                penalized += 1;
                debug!(
                    item_id = %candidate.item_id,
                    spam_score = assessment.score,
                    signals = ?assessment.signals,
                    "Spam penalty applied"
                );
            }
        }
        rerank(candidates);

        if penalized > 0 {
            SPAM_PENALTIES.inc_by(penalized as u64);
        }
        penalized
    }

    /// Temporal diversity followed by the category cap; a fixed point
    pub fn enforce_diversity(
        &self,
        candidates: Vec<Candidate>,
        history: &[Interaction],
    ) -> Vec<Candidate> {
        let before = candidates.len();
        let candidates = self.loops.enforce_temporal_diversity(candidates, history);
        let candidates = self.personalization.enforce_category_diversity(candidates);

        debug!(
            before = before,
            after = candidates.len(),
            "Diversity enforced"
        );
        candidates
    }

    pub fn check_loop(&self, history: &[Interaction], lookup: &dyn FingerprintLookup) -> LoopCheck {
        let check = self.loops.detect(history, lookup);
        if check.is_loop {
            LOOP_FLAGS.inc();
            warn!(
                mean_similarity = check.mean_similarity,
                "Loop exploitation detected"
            );
        }
        check
    }

    pub fn check_over_personalization(&self, feed: &[Candidate]) -> DiversityCheck {
        let check = self.personalization.detect(feed);
        if check.flagged {
            OVER_PERSONALIZATION_FLAGS.inc();
            warn!(
                diversity_score = check.diversity_score,
                feed_size = feed.len(),
                "Feed over-personalized"
            );
        }
        check
    }

    pub fn check_homogenization(&self, feeds: &HashMap<UserId, Vec<Candidate>>) -> DiversityCheck {
        let check = self.homogenization.detect(feeds);
        PLATFORM_DIVERSITY.set(check.diversity_score);
        if check.flagged {
            warn!(
                diversity_score = check.diversity_score,
                users = feeds.len(),
                "Platform content homogenized"
            );
        }
        check
    }

    /// Drop windows whose newest interaction is older than `ttl`
    pub fn evict_stale(&self, now: DateTime<Utc>, ttl: Duration) -> usize {
        let before = self.item_interactions.len();
        self.item_interactions.retain(|_, window| {
            window
                .back()
                .map(|latest| now - latest.timestamp <= ttl)
                .unwrap_or(false)
        });
        before - self.item_interactions.len()
    }
}
