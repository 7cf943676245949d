use crate::config::SafetyConfig;
use crate::models::{Candidate, FingerprintLookup, Interaction};
use crate::utils::{cosine_similarity, mean_pairwise_similarity};
use std::collections::HashSet;

/// Minimum resolvable fingerprints before a loop can be judged
const MIN_LOOP_SAMPLES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopCheck {
    pub is_loop: bool,
    pub mean_similarity: f64,
}

/// Detects users stuck on near-identical content and enforces temporal diversity
pub struct LoopExploitationDetector {
    similarity_threshold: f64,
    window: usize,
    dedup_similarity: f32,
}

impl Default for LoopExploitationDetector {
    fn default() -> Self {
        Self::new(&SafetyConfig::default())
    }
}

impl LoopExploitationDetector {
    pub fn new(config: &SafetyConfig) -> Self {
        Self {
            similarity_threshold: config.loop_similarity_threshold,
            window: config.loop_window,
            dedup_similarity: config.dedup_similarity as f32,
        }
    }

    fn recent<'a>(&self, history: &'a [Interaction]) -> &'a [Interaction] {
        &history[history.len().saturating_sub(self.window)..]
    }

    pub fn detect(&self, history: &[Interaction], lookup: &dyn FingerprintLookup) -> LoopCheck {
        let fingerprints: Vec<Vec<f32>> = self
            .recent(history)
            .iter()
            .filter_map(|i| lookup.fingerprint(&i.item_id))
            .collect();

        if fingerprints.len() < MIN_LOOP_SAMPLES {
            return LoopCheck {
                is_loop: false,
                mean_similarity: 0.0,
            };
        }

        let mean_similarity = mean_pairwise_similarity(&fingerprints);
        LoopCheck {
            is_loop: mean_similarity > self.similarity_threshold,
            mean_similarity,
        }
    }

    /// Drop recently watched items, then greedily drop near-duplicates of
    /// already accepted candidates (first seen wins)
    pub fn enforce_temporal_diversity(
        &self,
        candidates: Vec<Candidate>,
        history: &[Interaction],
    ) -> Vec<Candidate> {
        let recent_ids: HashSet<_> = self.recent(history).iter().map(|i| i.item_id).collect();

        let mut accepted: Vec<Candidate> = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if recent_ids.contains(&candidate.item_id) {
                continue;
            }
            let duplicate = accepted.iter().any(|seen| {
                cosine_similarity(&candidate.fingerprint, &seen.fingerprint) > self.dedup_similarity
            });
            if !duplicate {
                accepted.push(candidate);
            }
        }
        accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ItemId;
    use std::collections::HashMap;
    use uuid::Uuid;

    #[test]
    fn test_detects_repetitive_history() {
        let detector = LoopExploitationDetector::default();
        let user = Uuid::new_v4();
        let mut lookup: HashMap<ItemId, Vec<f32>> = HashMap::new();
        let history: Vec<Interaction> = (0..8)
            .map(|i| {
                let item = Uuid::new_v4();
                lookup.insert(item, vec![1.0, 0.01 * i as f32]);
                Interaction::new(user, item, 0.9)
            })
            .collect();

        let check = detector.detect(&history, &lookup);
        assert!(check.is_loop);
        assert!(check.mean_similarity > 0.99);

        let check = detector.detect(&history[..4], &lookup);
        assert!(!check.is_loop);
    }

    #[test]
    fn test_enforce_temporal_diversity() {
        let detector = LoopExploitationDetector::default();
        let watched = Uuid::new_v4();
        let history = vec![Interaction::new(Uuid::new_v4(), watched, 1.0)];

        let candidates = vec![
            Candidate::new(watched, vec![0.0, 0.0, 1.0], 3.0),
            Candidate::new(Uuid::new_v4(), vec![1.0, 0.0, 0.0], 2.0),
            Candidate::new(Uuid::new_v4(), vec![0.95, 0.1, 0.0], 1.5),
            Candidate::new(Uuid::new_v4(), vec![0.0, 1.0, 0.0], 1.0),
        ];
        let kept_ids = [candidates[1].item_id, candidates[3].item_id];

        let out = detector.enforce_temporal_diversity(candidates, &history);
        assert_eq!(out.iter().map(|c| c.item_id).collect::<Vec<_>>(), kept_ids);
    }
}
