// ============================================
// Feed Pipeline
// ============================================
//
// Request path (synchronous, list in / list out):
//   scored candidates
//     -> Exploration      (taste boost, LinUCB over 2k, novelty)
//     -> Engagement       (variable reward, obsession, pacing, fatigue)
//     -> SpamSuppression  (engagement-farming penalty)
//     -> Diversity        (temporal dedup + category cap)
//     -> Stabilizer       (dedup, recent repeats, category balance)
//     -> Truncation       (top feed_size)
//
// Feedback path: interactions update the bandit, reward histories, the
// cold-start sample and the per-item spam windows.

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::metrics::FEED_REQUESTS;
use crate::models::{
    Candidate, FingerprintLookup, Interaction, ItemFeatures, ItemId, Placement, SessionState,
    UserContext, UserId, UserSimilarity,
};
use crate::services::cold_start::{ColdStartEngine, ViralityEngine};
use crate::services::diversity::FeedbackLoopStabilizer;
use crate::services::engagement::EngagementShaper;
use crate::services::exploration::ExplorationManager;
use crate::services::realtime::SessionTracker;
use crate::services::safety::{DiversityCheck, FailureModeHandler};
use crate::services::scoring::ScoringOracle;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

/// Stage tag used in logs and stats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeedStage {
    Exploration,
    Engagement,
    SpamSuppression,
    Diversity,
    Stabilizer,
    Truncation,
}

impl FeedStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedStage::Exploration => "exploration",
            FeedStage::Engagement => "engagement",
            FeedStage::SpamSuppression => "spam_suppression",
            FeedStage::Diversity => "diversity",
            FeedStage::Stabilizer => "stabilizer",
            FeedStage::Truncation => "truncation",
        }
    }
}

/// Per-request diagnostics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedStats {
    pub input_count: usize,
    /// Candidates left after each stage, in order
    pub stage_counts: Vec<(FeedStage, usize)>,
    pub exploration_count: usize,
    pub novelty_count: usize,
    pub cliffhanger_count: usize,
    pub spam_penalized: usize,
    pub loop_detected: bool,
    pub diversity: DiversityCheck,
}

impl FeedStats {
    fn new(input_count: usize) -> Self {
        Self {
            input_count,
            stage_counts: Vec::new(),
            exploration_count: 0,
            novelty_count: 0,
            cliffhanger_count: 0,
            spam_penalized: 0,
            loop_detected: false,
            diversity: DiversityCheck::unflagged(),
        }
    }

    fn record(&mut self, stage: FeedStage, count: usize) {
        debug!(stage = stage.as_str(), count = count, "Stage complete");
        self.stage_counts.push((stage, count));
    }
}

/// Counts of entries dropped by `evict_expired`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvictionSummary {
    pub cold_start_states: usize,
    pub bandit_arms: usize,
    pub item_windows: usize,
    pub items: usize,
    pub users: usize,
    pub reward_histories: usize,
    pub sessions: usize,
}

#[derive(Debug, Clone)]
struct UserRecord {
    context: UserContext,
    last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct ItemRecord {
    fingerprint: Vec<f32>,
    category: Option<String>,
    last_seen: DateTime<Utc>,
}

/// Fingerprints of every item the pipeline has seen
#[derive(Default)]
pub struct ItemRegistry {
    items: DashMap<ItemId, ItemRecord>,
}

impl ItemRegistry {
    pub fn register(&self, item_id: ItemId, fingerprint: &[f32], category: Option<&str>) {
        let now = Utc::now();
        let mut record = self.items.entry(item_id).or_insert_with(|| ItemRecord {
            fingerprint: Vec::new(),
            category: None,
            last_seen: now,
        });
        if !fingerprint.is_empty() {
            record.fingerprint = fingerprint.to_vec();
        }
        if let Some(category) = category {
            record.category = Some(category.to_string());
        }
        record.last_seen = now;
    }

    pub fn category(&self, item_id: &ItemId) -> Option<String> {
        self.items.get(item_id).and_then(|r| r.category.clone())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn evict_older_than(&self, cutoff: DateTime<Utc>) -> usize {
        let before = self.items.len();
        self.items.retain(|_, record| record.last_seen >= cutoff);
        before - self.items.len()
    }
}

impl FingerprintLookup for ItemRegistry {
    fn fingerprint(&self, item_id: &ItemId) -> Option<Vec<f32>> {
        self.items
            .get(item_id)
            .filter(|r| !r.fingerprint.is_empty())
            .map(|r| r.fingerprint.clone())
    }
}

pub struct FeedPipeline {
    config: PipelineConfig,
    virality: ViralityEngine,
    exploration: ExplorationManager,
    engagement: EngagementShaper,
    safety: FailureModeHandler,
    stabilizer: FeedbackLoopStabilizer,
    sessions: SessionTracker,
    items: ItemRegistry,
    users: DashMap<UserId, UserRecord>,
}

impl Default for FeedPipeline {
    fn default() -> Self {
        Self::new(PipelineConfig::default())
    }
}

impl FeedPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        let seed = config.rng_seed;
        Self {
            virality: ViralityEngine::new(ColdStartEngine::new(config.cold_start.clone(), seed)),
            exploration: ExplorationManager::new(&config.exploration),
            engagement: EngagementShaper::new(config.engagement.clone(), seed),
            safety: FailureModeHandler::new(&config.safety),
            stabilizer: FeedbackLoopStabilizer::new(&config.stabilizer),
            sessions: SessionTracker::new(),
            items: ItemRegistry::default(),
            users: DashMap::new(),
            config,
        }
    }

    /// Build from `FEED_*` environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(PipelineConfig::from_env()?))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn virality(&self) -> &ViralityEngine {
        &self.virality
    }

    pub fn exploration(&self) -> &ExplorationManager {
        &self.exploration
    }

    pub fn engagement(&self) -> &EngagementShaper {
        &self.engagement
    }

    pub fn safety(&self) -> &FailureModeHandler {
        &self.safety
    }

    pub fn sessions(&self) -> &SessionTracker {
        &self.sessions
    }

    pub fn items(&self) -> &ItemRegistry {
        &self.items
    }

    fn validate(&self, candidates: &[Candidate], feed_size: usize) -> Result<()> {
        let max = self.config.max_feed_size;
        if feed_size == 0 || feed_size > max {
            return Err(PipelineError::InvalidFeedSize {
                requested: feed_size,
                max,
            });
        }
        if let Some(bad) = candidates.iter().find(|c| !c.composite_score.is_finite()) {
            return Err(PipelineError::InvalidInput(format!(
                "candidate {} has non-finite score {}",
                bad.item_id, bad.composite_score
            )));
        }
        Ok(())
    }

    pub fn generate_feed(
        &self,
        user: &UserContext,
        session: &SessionState,
        candidates: Vec<Candidate>,
        feed_size: usize,
    ) -> Result<Vec<Candidate>> {
        self.generate_feed_with_stats(user, session, candidates, feed_size)
            .map(|(feed, _)| feed)
    }

    pub fn generate_feed_with_stats(
        &self,
        user: &UserContext,
        session: &SessionState,
        candidates: Vec<Candidate>,
        feed_size: usize,
    ) -> Result<(Vec<Candidate>, FeedStats)> {
        self.validate(&candidates, feed_size)?;

        let mut stats = FeedStats::new(candidates.len());
        for candidate in &candidates {
            self.items.register(
                candidate.item_id,
                &candidate.fingerprint,
                candidate.category.as_deref(),
            );
        }
        self.users.insert(
            user.user_id,
            UserRecord {
                context: user.clone(),
                last_seen: Utc::now(),
            },
        );

        let history = &session.recent_interactions;

        let candidates =
            self.exploration
                .process(user, session, candidates, &self.items, feed_size * 2);
        stats.record(FeedStage::Exploration, candidates.len());

        let mut candidates = self
            .engagement
            .shape(&user.user_id, session, candidates, &self.items);
        stats.record(FeedStage::Engagement, candidates.len());

        stats.spam_penalized = self.safety.suppress_spam(&mut candidates);
        stats.record(FeedStage::SpamSuppression, candidates.len());

        stats.loop_detected = self.safety.check_loop(history, &self.items).is_loop;
        let candidates = self.safety.enforce_diversity(candidates, history);
        stats.record(FeedStage::Diversity, candidates.len());

        let mut feed = self.stabilizer.stabilize(candidates, history);
        stats.record(FeedStage::Stabilizer, feed.len());

        feed.truncate(feed_size);
        stats.record(FeedStage::Truncation, feed.len());

        stats.diversity = self.safety.check_over_personalization(&feed);
        stats.exploration_count = feed.iter().filter(|c| c.is_exploration).count();
        stats.novelty_count = count_placement(&feed, Placement::Novelty);
        stats.cliffhanger_count = count_placement(&feed, Placement::Cliffhanger);

        FEED_REQUESTS.inc();
        info!(
            user_id = %user.user_id,
            session_id = %session.session_id,
            requested = feed_size,
            returned = feed.len(),
            exploration = stats.exploration_count,
            diversity = stats.diversity.diversity_score,
            "Feed generated"
        );

        Ok((feed, stats))
    }

    /// Score raw items with the oracle, then run the pipeline
    pub fn score_and_generate(
        &self,
        oracle: &dyn ScoringOracle,
        user: &UserContext,
        session: &SessionState,
        items: &[ItemFeatures],
        feed_size: usize,
    ) -> Result<Vec<Candidate>> {
        for item in items {
            self.items
                .register(item.item_id, &item.fingerprint, item.category.as_deref());
        }
        let candidates = oracle.score(user, items, session);
        self.generate_feed(user, session, candidates, feed_size)
    }

    /// Feed for a tracked session; the delivered items are counted against it
    pub fn generate_session_feed(
        &self,
        user: &UserContext,
        session_id: &str,
        candidates: Vec<Candidate>,
        feed_size: usize,
    ) -> Result<Vec<Candidate>> {
        let session = self.sessions.snapshot(session_id);
        let feed = self.generate_feed(user, &session, candidates, feed_size)?;
        self.sessions.record_shown(session_id, user.user_id, feed.len());
        Ok(feed)
    }

    /// Cold-start a newly ingested item; returns the initial cohort
    pub fn on_new_item(&self, item: &mut ItemFeatures, user_pool: &[UserId]) -> Vec<UserId> {
        self.items
            .register(item.item_id, &item.fingerprint, item.category.as_deref());
        self.virality.on_new_item(item, user_pool)
    }

    /// Fold one interaction into every piece of keyed state
    pub fn on_interaction(&self, interaction: &Interaction) {
        let user = self
            .users
            .get(&interaction.user_id)
            .map(|record| record.context.clone())
            .unwrap_or_else(|| UserContext::new(interaction.user_id));
        let fingerprint = self.items.fingerprint(&interaction.item_id).unwrap_or_default();

        self.exploration.record_outcome(&user, interaction, &fingerprint);
        self.engagement
            .record_reward(interaction.user_id, interaction.reward());
        self.virality.cold_start().record_interaction(interaction);
        self.safety.record_interaction(interaction);

        debug!(
            user_id = %interaction.user_id,
            item_id = %interaction.item_id,
            reward = interaction.reward(),
            "Interaction recorded"
        );
    }

    /// Track the interaction in its session as well
    pub fn on_session_interaction(&self, session_id: &str, interaction: &Interaction) {
        self.sessions.record_interaction(session_id, interaction.clone());
        self.on_interaction(interaction);
    }

    /// Virality pass over the cold-start feedback buffered for an item
    pub fn reevaluate_exposure(
        &self,
        item_id: &ItemId,
        user_pool: &[UserId],
        similarity: Option<&dyn UserSimilarity>,
    ) -> Vec<UserId> {
        self.virality.reevaluate(item_id, user_pool, similarity)
    }

    pub fn check_homogenization(&self, feeds: &HashMap<UserId, Vec<Candidate>>) -> DiversityCheck {
        self.safety.check_homogenization(feeds)
    }

    /// Drop keyed state idle for longer than the configured TTL
    pub fn evict_expired(&self, now: DateTime<Utc>) -> EvictionSummary {
        let ttl = Duration::hours(self.config.cold_start.state_ttl_hours);
        let summary = EvictionSummary {
            cold_start_states: self.virality.cold_start().evict_expired(now),
            bandit_arms: self.exploration.bandit().evict_idle(now),
            item_windows: self.safety.evict_stale(now, ttl),
            items: self.items.evict_older_than(now - ttl),
            users: self.evict_users_older_than(now - ttl),
            reward_histories: self.engagement.evict_idle(now, ttl),
            sessions: self.sessions.evict_idle(now),
        };

        info!(
            cold_start = summary.cold_start_states,
            arms = summary.bandit_arms,
            windows = summary.item_windows,
            items = summary.items,
            users = summary.users,
            reward_histories = summary.reward_histories,
            sessions = summary.sessions,
            "Evicted expired state"
        );
        summary
    }

    fn evict_users_older_than(&self, cutoff: DateTime<Utc>) -> usize {
        let before = self.users.len();
        self.users.retain(|_, record| record.last_seen >= cutoff);
        before.saturating_sub(self.users.len())
    }

    pub fn tracked_users(&self) -> usize {
        self.users.len()
    }
}

fn count_placement(feed: &[Candidate], placement: Placement) -> usize {
    feed.iter().filter(|c| c.placement == placement).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::objectives;
    use crate::services::scoring::MockScoringOracle;
    use crate::utils::is_ranked_order;
    use uuid::Uuid;

    fn small_config() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.exploration.context_dim = 16;
        config.exploration.embedding_widths = [2, 2, 2];
        config.rng_seed = Some(5);
        config
    }

    fn orthogonal_candidates(n: usize) -> Vec<Candidate> {
        (0..n)
            .map(|i| {
                let mut fp = vec![0.0; n];
                fp[i] = 1.0;
                Candidate::new(Uuid::new_v4(), fp, 1.0 - i as f64 * 0.01)
            })
            .collect()
    }

    #[test]
    fn test_rejects_bad_feed_size() {
        let pipeline = FeedPipeline::new(small_config());
        let user = UserContext::new(Uuid::new_v4());
        let session = SessionState::new("s", 0);

        let err = pipeline
            .generate_feed(&user, &session, orthogonal_candidates(3), 0)
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidFeedSize { requested: 0, .. }));

        let err = pipeline
            .generate_feed(&user, &session, orthogonal_candidates(3), 10_000)
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidFeedSize { .. }));
    }

    #[test]
    fn test_rejects_non_finite_scores() {
        let pipeline = FeedPipeline::new(small_config());
        let mut candidates = orthogonal_candidates(3);
        candidates[1].composite_score = f64::NAN;

        let err = pipeline
            .generate_feed(
                &UserContext::new(Uuid::new_v4()),
                &SessionState::new("s", 0),
                candidates,
                2,
            )
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));
    }

    #[test]
    fn test_feed_respects_size_and_order() {
        let pipeline = FeedPipeline::new(small_config());
        let user = UserContext::new(Uuid::new_v4());
        let (feed, stats) = pipeline
            .generate_feed_with_stats(&user, &SessionState::new("s", 12), orthogonal_candidates(12), 5)
            .unwrap();

        assert_eq!(feed.len(), 5);
        assert!(is_ranked_order(&feed));
        assert_eq!(stats.stage_counts.len(), 6);
        assert_eq!(stats.stage_counts.last(), Some(&(FeedStage::Truncation, 5)));
        // no arm has been updated yet
        assert_eq!(stats.exploration_count, 5);
    }

    #[test]
    fn test_empty_candidates() {
        let pipeline = FeedPipeline::new(small_config());
        let feed = pipeline
            .generate_feed(
                &UserContext::new(Uuid::new_v4()),
                &SessionState::new("s", 0),
                Vec::new(),
                10,
            )
            .unwrap();
        assert!(feed.is_empty());
    }

    #[test]
    fn test_on_interaction_reaches_all_state() {
        let pipeline = FeedPipeline::new(small_config());
        let users: Vec<UserId> = (0..50).map(|_| Uuid::new_v4()).collect();
        let mut item = ItemFeatures::new(Uuid::new_v4(), vec![1.0, 0.0]);
        let cohort = pipeline.on_new_item(&mut item, &users);
        assert!(!cohort.is_empty());

        let mut interaction = Interaction::new(cohort[0], item.item_id, 0.9);
        interaction.like = true;
        pipeline.on_interaction(&interaction);

        assert!(pipeline.exploration().bandit().arm_statistics(&item.item_id).is_some());
        assert!(pipeline.engagement().variable_reward().history(&cohort[0]).is_some());
        assert_eq!(pipeline.safety().item_window(&item.item_id).len(), 1);
        let state = pipeline.virality().cold_start().state(&item.item_id).unwrap();
        assert_eq!(state.pending.len(), 1);
    }

    #[test]
    fn test_score_and_generate_with_mock() {
        let pipeline = FeedPipeline::new(small_config());
        let mut oracle = MockScoringOracle::new();
        oracle.expect_score().times(1).returning(|_, items, _| {
            items
                .iter()
                .enumerate()
                .map(|(i, item)| {
                    Candidate::new(item.item_id, item.fingerprint.clone(), 1.0 / (i + 1) as f64)
                        .with_objective(objectives::CONTINUATION, 0.2)
                })
                .collect()
        });

        let items: Vec<ItemFeatures> = orthogonal_candidates(6)
            .into_iter()
            .map(|c| ItemFeatures::new(c.item_id, c.fingerprint))
            .collect();
        let feed = pipeline
            .score_and_generate(
                &oracle,
                &UserContext::new(Uuid::new_v4()),
                &SessionState::new("s", 20),
                &items,
                4,
            )
            .unwrap();

        assert_eq!(feed.len(), 4);
        assert_eq!(pipeline.items().len(), 6);
    }

    #[test]
    fn test_evict_expired() {
        let pipeline = FeedPipeline::new(small_config());
        let users: Vec<UserId> = (0..10).map(|_| Uuid::new_v4()).collect();
        let mut item = ItemFeatures::new(Uuid::new_v4(), vec![1.0]);
        pipeline.on_new_item(&mut item, &users);
        pipeline
            .generate_feed(
                &UserContext::new(users[0]),
                &SessionState::new("s", 0),
                orthogonal_candidates(3),
                3,
            )
            .unwrap();
        pipeline.on_interaction(&Interaction::new(users[0], item.item_id, 0.5));
        assert_eq!(pipeline.tracked_users(), 1);

        // inside the horizon nothing goes
        assert_eq!(pipeline.evict_expired(Utc::now()), EvictionSummary::default());

        let summary = pipeline.evict_expired(Utc::now() + Duration::days(365));
        assert_eq!(summary.cold_start_states, 1);
        assert_eq!(summary.bandit_arms, 1);
        assert_eq!(summary.item_windows, 1);
        assert_eq!(summary.items, 4);
        assert_eq!(summary.users, 1);
        assert_eq!(summary.reward_histories, 1);
        assert!(pipeline.items().is_empty());
        assert_eq!(pipeline.tracked_users(), 0);
        assert!(pipeline
            .engagement()
            .variable_reward()
            .history(&users[0])
            .is_none());
    }
}
