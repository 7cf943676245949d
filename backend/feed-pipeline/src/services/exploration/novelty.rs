// ============================================
// Novelty Injector
// ============================================
//
// budget = floor(session_length * novelty_rate)
//
// Candidates far from the centroid of recent history (cosine below
// min_similarity) are moved to fixed slots {5, 10, 15, 20, 25}, reused
// cyclically; a slot already taken or past the end is skipped. Moved
// entries are pinned as Placement::Novelty.

use crate::config::ExplorationConfig;
use crate::models::{Candidate, FingerprintLookup, Interaction, Placement};
use crate::utils::{centroid, cosine_similarity, place_in_slots};
use tracing::debug;

pub struct NoveltyInjector {
    novelty_rate: f64,
    min_similarity: f32,
    history_window: usize,
    positions: Vec<usize>,
}

impl Default for NoveltyInjector {
    fn default() -> Self {
        Self::new(&ExplorationConfig::default())
    }
}

impl NoveltyInjector {
    pub fn new(config: &ExplorationConfig) -> Self {
        Self {
            novelty_rate: config.novelty_rate,
            min_similarity: config.novelty_min_similarity as f32,
            history_window: config.novelty_history_window,
            positions: config.novelty_positions.clone(),
        }
    }

    pub fn budget(&self, session_length: usize) -> usize {
        (session_length as f64 * self.novelty_rate).floor() as usize
    }

    pub fn inject(
        &self,
        mut candidates: Vec<Candidate>,
        history: &[Interaction],
        lookup: &dyn FingerprintLookup,
        session_length: usize,
    ) -> Vec<Candidate> {
        let budget = self.budget(session_length);
        if budget == 0 || self.positions.is_empty() {
            return candidates;
        }

        let start = history.len().saturating_sub(self.history_window);
        let history_fingerprints: Vec<Vec<f32>> = history[start..]
            .iter()
            .filter_map(|i| lookup.fingerprint(&i.item_id))
            .collect();
        let Some(history_centroid) = centroid(&history_fingerprints) else {
            return candidates;
        };

        let moves: Vec<(usize, usize)> = candidates
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.placement.is_reserved())
            .filter(|(_, c)| {
                cosine_similarity(&c.fingerprint, &history_centroid) < self.min_similarity
            })
            .take(budget)
            .enumerate()
            .map(|(n, (from, _))| (from, self.positions[n % self.positions.len()]))
            .collect();
        let novel = moves.len();

        let injected = place_in_slots(&mut candidates, &moves, Placement::Novelty);

        debug!(
            budget = budget,
            novel = novel,
            injected = injected,
            "Novelty injection complete"
        );

        candidates
    }
}
