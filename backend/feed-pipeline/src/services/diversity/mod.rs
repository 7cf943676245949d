use crate::config::StabilizerConfig;
use crate::models::{Candidate, Interaction};
use crate::services::safety::cap_categories;
use crate::utils::cosine_similarity;
use std::collections::HashSet;
use tracing::debug;

/// Feedback-Loop Stabilizer - 回饋迴圈穩定器
/// 截斷前的最後一道多樣性保護
pub struct FeedbackLoopStabilizer {
    min_content_similarity: f32, // 與已選內容的相似度上限
    recent_window: usize,        // 最近互動數量
    max_per_category: usize,
}

impl Default for FeedbackLoopStabilizer {
    fn default() -> Self {
        Self::new(&StabilizerConfig::default())
    }
}

impl FeedbackLoopStabilizer {
    pub fn new(config: &StabilizerConfig) -> Self {
        Self {
            min_content_similarity: config.min_content_similarity as f32,
            recent_window: config.recent_window,
            max_per_category: config.max_per_category,
        }
    }

    /// 1. 內容去重 2. 過濾最近看過的 3. 類別平衡
    pub fn stabilize(&self, candidates: Vec<Candidate>, history: &[Interaction]) -> Vec<Candidate> {
        let before = candidates.len();
        let diverse = self.enforce_content_diversity(candidates);
        let fresh = self.filter_recent_repeats(diverse, history);
        let balanced = cap_categories(fresh, self.max_per_category);

        debug!(
            before = before,
            after = balanced.len(),
            "Feedback loop stabilized"
        );
        balanced
    }

    fn enforce_content_diversity(&self, candidates: Vec<Candidate>) -> Vec<Candidate> {
        let mut selected: Vec<Candidate> = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let too_similar = selected.iter().any(|s| {
                cosine_similarity(&candidate.fingerprint, &s.fingerprint)
                    > self.min_content_similarity
            });
            if !too_similar {
                selected.push(candidate);
            }
        }
        selected
    }

    fn filter_recent_repeats(
        &self,
        candidates: Vec<Candidate>,
        history: &[Interaction],
    ) -> Vec<Candidate> {
        let start = history.len().saturating_sub(self.recent_window);
        let recent: HashSet<_> = history[start..].iter().map(|i| i.item_id).collect();
        candidates
            .into_iter()
            .filter(|c| !recent.contains(&c.item_id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_stabilize_filters() {
        let stabilizer = FeedbackLoopStabilizer::default();
        let watched = Uuid::new_v4();
        let history = vec![Interaction::new(Uuid::new_v4(), watched, 1.0)];

        let candidates = vec![
            Candidate::new(Uuid::new_v4(), vec![1.0, 0.0], 5.0),
            Candidate::new(Uuid::new_v4(), vec![0.99, 0.05], 4.0), // near-duplicate
            Candidate::new(watched, vec![0.0, 1.0], 3.0),          // recently watched
            Candidate::new(Uuid::new_v4(), vec![-1.0, 0.0], 2.0),
        ];
        let expected = vec![candidates[0].item_id, candidates[3].item_id];

        let out = stabilizer.stabilize(candidates, &history);
        assert_eq!(out.iter().map(|c| c.item_id).collect::<Vec<_>>(), expected);
    }

    #[test]
    fn test_category_balance() {
        let stabilizer = FeedbackLoopStabilizer::default();
        let candidates: Vec<Candidate> = (0..6)
            .map(|i| {
                let mut fp = vec![0.0; 6];
                fp[i] = 1.0;
                Candidate::new(Uuid::new_v4(), fp, 1.0).with_category("news")
            })
            .collect();

        let out = stabilizer.stabilize(candidates, &[]);
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn test_empty_input() {
        let stabilizer = FeedbackLoopStabilizer::default();
        assert!(stabilizer.stabilize(Vec::new(), &[]).is_empty());
    }
}
