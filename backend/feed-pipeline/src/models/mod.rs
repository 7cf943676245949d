use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

pub type ItemId = Uuid;
pub type UserId = Uuid;
pub type CohortId = Uuid;

/// Well-known objective names written by the scoring oracle
pub mod objectives {
    pub const WATCH_TIME: &str = "watch_time";
    pub const COMPLETION: &str = "completion";
    pub const REWATCH: &str = "rewatch";
    pub const CONTINUATION: &str = "continuation";
    pub const SKIP: &str = "skip";
    pub const FATIGUE: &str = "fatigue";
}

/// Where a candidate sits in the feed.
///
/// `Novelty` and `Cliffhanger` entries occupy reserved positions: re-sorts keep
/// them pinned and only reorder `Ranked` entries around them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Placement {
    #[default]
    Ranked,
    Novelty,     // 新鮮內容插入位
    Cliffhanger, // 懸念位
}

impl Placement {
    pub fn as_str(&self) -> &'static str {
        match self {
            Placement::Ranked => "ranked",
            Placement::Novelty => "novelty",
            Placement::Cliffhanger => "cliffhanger",
        }
    }

    pub fn is_reserved(&self) -> bool {
        !matches!(self, Placement::Ranked)
    }
}

/// A scored item under consideration for the output feed.
///
/// Items whose bandit arm has never been updated score `+inf`. JSON writes
/// that as `null`, which reads back as `+inf`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub item_id: ItemId,
    /// Content fingerprint (fixed-length embedding)
    pub fingerprint: Vec<f32>,
    pub category: Option<String>,
    /// Scalar used to order candidates at every stage
    #[serde(deserialize_with = "score_or_unbounded")]
    pub composite_score: f64,
    /// Per-objective predictions from the scoring oracle
    pub objective_scores: BTreeMap<String, f64>,
    #[serde(deserialize_with = "score_or_unbounded")]
    pub exploration_bonus: f64,
    pub is_exploration: bool,
    pub placement: Placement,
}

fn score_or_unbounded<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::INFINITY))
}

impl Candidate {
    pub fn new(item_id: ItemId, fingerprint: Vec<f32>, composite_score: f64) -> Self {
        Self {
            item_id,
            fingerprint,
            category: None,
            composite_score,
            objective_scores: BTreeMap::new(),
            exploration_bonus: 0.0,
            is_exploration: false,
            placement: Placement::Ranked,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_objective(mut self, name: &str, value: f64) -> Self {
        self.objective_scores.insert(name.to_string(), value);
        self
    }

    pub fn objective(&self, name: &str) -> Option<f64> {
        self.objective_scores.get(name).copied()
    }

    /// Precomputed session-continuation estimate, if the oracle supplied one
    pub fn continuation_estimate(&self) -> Option<f64> {
        self.objective(objectives::CONTINUATION)
    }
}

/// User embeddings at three horizons (read-only to the pipeline)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserContext {
    pub user_id: UserId,
    pub short_term: Vec<f32>,
    pub mid_term: Vec<f32>,
    pub long_term: Vec<f32>,
}

impl UserContext {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            ..Default::default()
        }
    }

    pub fn with_embeddings(
        mut self,
        short_term: Vec<f32>,
        mid_term: Vec<f32>,
        long_term: Vec<f32>,
    ) -> Self {
        self.short_term = short_term;
        self.mid_term = mid_term;
        self.long_term = long_term;
        self
    }
}

/// Per-request session snapshot, recomputed from interaction history
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    /// Items shown so far in this session
    pub current_length: usize,
    /// Oldest first, bounded by the session tracker
    pub recent_interactions: Vec<Interaction>,
    /// Interactions per minute
    pub scroll_velocity: f64,
    pub avg_engagement: f64,
    /// 0.0 - 1.0
    pub fatigue_score: f64,
}

impl SessionState {
    pub fn new(session_id: impl Into<String>, current_length: usize) -> Self {
        Self {
            session_id: session_id.into(),
            current_length,
            ..Default::default()
        }
    }

    /// The last `n` interactions (or fewer)
    pub fn recent(&self, n: usize) -> &[Interaction] {
        let start = self.recent_interactions.len().saturating_sub(n);
        &self.recent_interactions[start..]
    }
}

/// Immutable interaction event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub user_id: UserId,
    pub item_id: ItemId,
    pub timestamp: DateTime<Utc>,
    /// Fraction of the item watched (0.0 - 1.0)
    pub watch_fraction: f64,
    pub skip: bool,
    pub like: bool,
    pub share: bool,
    pub comment: bool,
}

impl Interaction {
    pub fn new(user_id: UserId, item_id: ItemId, watch_fraction: f64) -> Self {
        Self {
            user_id,
            item_id,
            timestamp: Utc::now(),
            watch_fraction,
            skip: false,
            like: false,
            share: false,
            comment: false,
        }
    }

    /// Bandit / variable-reward signal
    pub fn reward(&self) -> f64 {
        self.engagement() + if self.share { 0.5 } else { 0.0 }
    }

    /// Session engagement signal (no share term)
    pub fn engagement(&self) -> f64 {
        let watched = if self.skip { 0.0 } else { self.watch_fraction };
        watched + if self.like { 0.3 } else { 0.0 }
    }

    pub fn is_high_engagement(&self, watch_threshold: f64) -> bool {
        self.watch_fraction > watch_threshold && !self.skip
    }
}

/// Item record handed over at ingestion time
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemFeatures {
    pub item_id: ItemId,
    pub fingerprint: Vec<f32>,
    pub category: Option<String>,
    /// Per-objective predictions supplied by collaborators
    pub objective_predictions: BTreeMap<String, f64>,
    /// Exposure metadata stamped by the virality engine
    pub exposure_count: u64,
    pub viral_expansion_factor: f64,
}

impl ItemFeatures {
    pub fn new(item_id: ItemId, fingerprint: Vec<f32>) -> Self {
        Self {
            item_id,
            fingerprint,
            viral_expansion_factor: 1.0,
            ..Default::default()
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_prediction(mut self, objective: &str, value: f64) -> Self {
        self.objective_predictions
            .insert(objective.to_string(), value);
        self
    }
}

/// Resolves content fingerprints for items referenced by interactions
pub trait FingerprintLookup {
    fn fingerprint(&self, item_id: &ItemId) -> Option<Vec<f32>>;
}

impl FingerprintLookup for HashMap<ItemId, Vec<f32>> {
    fn fingerprint(&self, item_id: &ItemId) -> Option<Vec<f32>> {
        self.get(item_id).cloned()
    }
}

/// `user_id -> ranked similar users`, refreshed outside the pipeline
pub trait UserSimilarity: Send + Sync {
    fn similar_users(&self, user_id: &UserId) -> &[UserId];
}

impl UserSimilarity for HashMap<UserId, Vec<UserId>> {
    fn similar_users(&self, user_id: &UserId) -> &[UserId] {
        self.get(user_id).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interaction_reward() {
        let mut interaction = Interaction::new(Uuid::new_v4(), Uuid::new_v4(), 0.8);
        interaction.like = true;
        interaction.share = true;
        assert!((interaction.reward() - 1.6).abs() < 1e-9);

        interaction.skip = true;
        assert!((interaction.reward() - 0.8).abs() < 1e-9);
        assert!((interaction.engagement() - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_session_recent_window() {
        let user = Uuid::new_v4();
        let mut session = SessionState::new("s1", 3);
        session.recent_interactions = (0..3)
            .map(|_| Interaction::new(user, Uuid::new_v4(), 0.5))
            .collect();

        assert_eq!(session.recent(2).len(), 2);
        assert_eq!(session.recent(2)[1], session.recent_interactions[2]);
        assert_eq!(session.recent(10).len(), 3);
    }

    #[test]
    fn test_candidate_continuation_estimate() {
        let candidate = Candidate::new(Uuid::new_v4(), vec![1.0], 0.5)
            .with_objective(objectives::CONTINUATION, 0.75);
        assert_eq!(candidate.continuation_estimate(), Some(0.75));
        assert_eq!(candidate.placement, Placement::Ranked);
        assert!(Placement::Cliffhanger.is_reserved());
    }

    #[test]
    fn test_unbounded_score_survives_json() {
        let mut candidate = Candidate::new(Uuid::new_v4(), vec![1.0], f64::INFINITY);
        candidate.exploration_bonus = f64::INFINITY;
        candidate.is_exploration = true;

        let json = serde_json::to_string(&candidate).unwrap();
        assert!(json.contains("\"composite_score\":null"));

        let back: Candidate = serde_json::from_str(&json).unwrap();
        assert_eq!(back.composite_score, f64::INFINITY);
        assert_eq!(back.exploration_bonus, f64::INFINITY);
        assert!(back.is_exploration);

        let finite = Candidate::new(Uuid::new_v4(), vec![1.0], 0.25);
        let back: Candidate = serde_json::from_str(&serde_json::to_string(&finite).unwrap()).unwrap();
        assert_eq!(back.composite_score, 0.25);
        assert_eq!(back.exploration_bonus, 0.0);
    }

    #[test]
    fn test_similarity_map_lookup() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut map: HashMap<UserId, Vec<UserId>> = HashMap::new();
        map.insert(a, vec![b]);

        assert_eq!(map.similar_users(&a), &[b]);
        assert!(map.similar_users(&b).is_empty());
    }
}
