use super::personalization::DiversityCheck;
use crate::config::SafetyConfig;
use crate::models::{Candidate, UserId};
use std::collections::{HashMap, HashSet};

/// Platform-wide diversity check over items pooled from many users' feeds.
///
/// Monitoring only; never applied inline to a request.
pub struct HomogenizationDetector {
    threshold: f64,
    sample_size: usize,
}

impl Default for HomogenizationDetector {
    fn default() -> Self {
        Self::new(&SafetyConfig::default())
    }
}

impl HomogenizationDetector {
    const MIN_UNIQUE_ITEMS: usize = 10;

    pub fn new(config: &SafetyConfig) -> Self {
        Self {
            threshold: config.homogenization_threshold,
            sample_size: config.homogenization_sample,
        }
    }

    /// Feeds are visited in user-id order so the sample is deterministic
    pub fn detect(&self, feeds: &HashMap<UserId, Vec<Candidate>>) -> DiversityCheck {
        let mut users: Vec<&UserId> = feeds.keys().collect();
        users.sort();

        let mut seen = HashSet::new();
        let sample: Vec<&[f32]> = users
            .into_iter()
            .flat_map(|user| feeds[user].iter())
            .filter(|c| seen.insert(c.item_id))
            .filter(|c| !c.fingerprint.is_empty())
            .take(self.sample_size)
            .map(|c| c.fingerprint.as_slice())
            .collect();

        DiversityCheck::compute(&sample, Self::MIN_UNIQUE_ITEMS, self.threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn feed(fingerprints: impl Iterator<Item = Vec<f32>>) -> Vec<Candidate> {
        fingerprints
            .map(|fp| Candidate::new(Uuid::new_v4(), fp, 1.0))
            .collect()
    }

    #[test]
    fn test_homogenized_platform() {
        let detector = HomogenizationDetector::default();
        let mut feeds = HashMap::new();
        for _ in 0..3 {
            feeds.insert(Uuid::new_v4(), feed((0..5).map(|_| vec![1.0, 0.0])));
        }

        let check = detector.detect(&feeds);
        assert!(check.flagged);
        assert!(check.diversity_score < 0.2);
    }

    #[test]
    fn test_too_few_items() {
        let detector = HomogenizationDetector::default();
        let shared = feed((0..4).map(|_| vec![1.0, 0.0]));
        let mut feeds = HashMap::new();
        // the same items in every feed count once
        for _ in 0..5 {
            feeds.insert(Uuid::new_v4(), shared.clone());
        }

        assert_eq!(detector.detect(&feeds), DiversityCheck::unflagged());
    }

    #[test]
    fn test_diverse_platform() {
        let detector = HomogenizationDetector::default();
        let mut feeds = HashMap::new();
        let basis = |i: usize| {
            let mut v = vec![0.0; 12];
            v[i] = 1.0;
            v
        };
        feeds.insert(Uuid::new_v4(), feed((0..6).map(basis)));
        feeds.insert(Uuid::new_v4(), feed((6..12).map(basis)));

        let check = detector.detect(&feeds);
        assert!(!check.flagged);
        assert!((check.diversity_score - 1.0).abs() < 1e-6);
    }
}
