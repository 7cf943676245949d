use crate::config::SafetyConfig;
use crate::models::Candidate;
use crate::utils::mean_pairwise_similarity;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Outcome of a diversity check over a set of fingerprints
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DiversityCheck {
    pub flagged: bool,
    /// 1 - mean pairwise similarity
    pub diversity_score: f64,
}

impl DiversityCheck {
    pub fn unflagged() -> Self {
        Self {
            flagged: false,
            diversity_score: 1.0,
        }
    }

    /// Diversity of a fingerprint set; unflagged when fewer than `min_items`
    pub fn compute(fingerprints: &[&[f32]], min_items: usize, threshold: f64) -> Self {
        if fingerprints.len() < min_items.max(2) {
            return Self::unflagged();
        }
        let diversity_score = 1.0 - mean_pairwise_similarity(fingerprints);
        Self {
            flagged: diversity_score < threshold,
            diversity_score,
        }
    }
}

/// Flags feeds that collapsed onto one theme and caps items per category
pub struct OverPersonalizationDetector {
    diversity_threshold: f64,
    max_per_category: usize,
}

impl Default for OverPersonalizationDetector {
    fn default() -> Self {
        Self::new(&SafetyConfig::default())
    }
}

impl OverPersonalizationDetector {
    const MIN_FEED_ITEMS: usize = 3;

    pub fn new(config: &SafetyConfig) -> Self {
        Self {
            diversity_threshold: config.diversity_threshold,
            max_per_category: config.max_per_category,
        }
    }

    pub fn detect(&self, feed: &[Candidate]) -> DiversityCheck {
        let fingerprints: Vec<&[f32]> = feed
            .iter()
            .filter(|c| !c.fingerprint.is_empty())
            .map(|c| c.fingerprint.as_slice())
            .collect();
        DiversityCheck::compute(&fingerprints, Self::MIN_FEED_ITEMS, self.diversity_threshold)
    }

    pub fn enforce_category_diversity(&self, candidates: Vec<Candidate>) -> Vec<Candidate> {
        cap_categories(candidates, self.max_per_category)
    }
}

/// Keep at most `max_per_category` items per category, in order.
/// Uncategorized items always pass.
pub fn cap_categories(candidates: Vec<Candidate>, max_per_category: usize) -> Vec<Candidate> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    candidates
        .into_iter()
        .filter(|candidate| match &candidate.category {
            None => true,
            Some(category) => {
                let count = counts.entry(category.clone()).or_insert(0);
                if *count < max_per_category {
                    *count += 1;
                    true
                } else {
                    false
                }
            }
        })
        .collect()
}
