// ============================================
// Obsession Loop Detector
// ============================================
//
// Looks at the last 10 interacted fingerprints. When their mean similarity
// to their own centroid exceeds 0.85 the user is locked onto a theme, and
// candidates near that centroid are boosted:
//   sim > 0.8        => x boost (2.0)
//   0.7 < sim <= 0.8 => x boost * 0.7 (1.4)

use crate::config::EngagementConfig;
use crate::models::{Candidate, FingerprintLookup, Interaction};
use crate::utils::{cosine_similarity, mean_similarity_to_centroid, rerank};
use tracing::{debug, info};

const STRONG_SIMILARITY: f32 = 0.8;
const MODERATE_SIMILARITY: f32 = 0.7;

#[derive(Debug, Clone)]
pub struct ObsessionLoop {
    pub centroid: Vec<f32>,
    /// Mean similarity of the window to its centroid
    pub similarity: f64,
    pub boost_factor: f64,
}

pub struct ObsessionDetector {
    window: usize,
    min_interactions: usize,
    threshold: f64,
    boost_factor: f64,
}

impl Default for ObsessionDetector {
    fn default() -> Self {
        Self::new(&EngagementConfig::default())
    }
}

impl ObsessionDetector {
    pub fn new(config: &EngagementConfig) -> Self {
        Self {
            window: config.obsession_window,
            min_interactions: config.obsession_min_interactions,
            threshold: config.obsession_threshold,
            boost_factor: config.obsession_boost,
        }
    }

    pub fn detect(
        &self,
        history: &[Interaction],
        lookup: &dyn FingerprintLookup,
    ) -> Option<ObsessionLoop> {
        if history.len() < self.min_interactions {
            return None;
        }

        let start = history.len().saturating_sub(self.window);
        let fingerprints: Vec<Vec<f32>> = history[start..]
            .iter()
            .filter_map(|i| lookup.fingerprint(&i.item_id))
            .collect();
        if fingerprints.len() < self.min_interactions {
            return None;
        }

        let (centroid, similarity) = mean_similarity_to_centroid(&fingerprints)?;
        if similarity <= self.threshold {
            return None;
        }

        info!(similarity = similarity, "Obsession loop detected");
        Some(ObsessionLoop {
            centroid,
            similarity,
            boost_factor: self.boost_factor,
        })
    }

    pub fn apply_boost(&self, candidates: &mut [Candidate], obsession: &ObsessionLoop) -> usize {
        let mut boosted = 0;
        for candidate in candidates.iter_mut() {
            let sim = cosine_similarity(&candidate.fingerprint, &obsession.centroid);
            if sim > STRONG_SIMILARITY {
                candidate.composite_score *= obsession.boost_factor;
                boosted += 1;
            } else if sim > MODERATE_SIMILARITY {
                candidate.composite_score *= obsession.boost_factor * 0.7;
                boosted += 1;
            }
        }
        rerank(candidates);

        debug!(boosted = boosted, "Obsession boost applied");
        boosted
    }
}
