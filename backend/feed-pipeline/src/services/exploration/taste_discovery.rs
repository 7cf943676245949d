// ============================================
// Fast Taste Discovery (快速口味发现)
// ============================================
//
// Early in a session, boost candidates close to what the user has already
// engaged with. Needs a handful of high-engagement views before it acts.

use crate::config::ExplorationConfig;
use crate::models::{Candidate, FingerprintLookup, SessionState};
use crate::utils::{centroid, cosine_similarity, rerank};
use tracing::debug;

/// Preference inferred from early engagement
#[derive(Debug, Clone)]
pub struct TastePreference {
    pub centroid: Vec<f32>,
    pub boost_factor: f64,
    pub num_preferred: usize,
}

pub struct TasteDiscovery {
    session_limit: usize,
    min_interactions: usize,
    engagement_threshold: f64,
    similarity_threshold: f32,
    boost_factor: f64,
}

impl Default for TasteDiscovery {
    fn default() -> Self {
        Self::new(&ExplorationConfig::default())
    }
}

impl TasteDiscovery {
    pub fn new(config: &ExplorationConfig) -> Self {
        Self {
            session_limit: config.taste_session_limit,
            min_interactions: config.taste_min_interactions,
            engagement_threshold: config.taste_engagement_threshold,
            similarity_threshold: config.taste_similarity_threshold as f32,
            boost_factor: config.taste_boost,
        }
    }

    /// Only sessions shorter than the limit are eligible
    pub fn is_active(&self, session: &SessionState) -> bool {
        session.current_length < self.session_limit
    }

    pub fn discover(
        &self,
        session: &SessionState,
        lookup: &dyn FingerprintLookup,
    ) -> Option<TastePreference> {
        let engaged: Vec<_> = session
            .recent_interactions
            .iter()
            .filter(|i| i.is_high_engagement(self.engagement_threshold))
            .collect();
        if engaged.len() < self.min_interactions {
            return None;
        }

        let fingerprints: Vec<Vec<f32>> = engaged
            .iter()
            .filter_map(|i| lookup.fingerprint(&i.item_id))
            .collect();
        let centroid = centroid(&fingerprints)?;

        Some(TastePreference {
            centroid,
            boost_factor: self.boost_factor,
            num_preferred: engaged.len(),
        })
    }

    /// Boost candidates similar to the preference and re-sort
    pub fn apply_boost(&self, candidates: &mut [Candidate], preference: &TastePreference) -> usize {
        let mut boosted = 0;
        for candidate in candidates.iter_mut() {
            if cosine_similarity(&candidate.fingerprint, &preference.centroid)
                > self.similarity_threshold
            {
                candidate.composite_score *= preference.boost_factor;
                boosted += 1;
            }
        }
        rerank(candidates);

        debug!(
            boosted = boosted,
            num_preferred = preference.num_preferred,
            "Applied taste boost"
        );
        boosted
    }
}
