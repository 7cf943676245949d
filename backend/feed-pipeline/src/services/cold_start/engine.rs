// ============================================
// Cold Start Engine
// ============================================
//
// Performance score for a cohort sample:
//   score = 0.4 * watch / base_watch + 0.4 * completion / base_completion
//         - 0.2 * skip / base_skip
//
// Where each metric is averaged over the sample and base_* comes from the
// cohort baseline (default 0.5 / 0.3 / 0.4).
//
// score > expansion_threshold  => exposure_count = floor(count * 2.0)
// otherwise                    => exposure_count = floor(count * 0.9)

use crate::config::ColdStartConfig;
use crate::metrics::COLD_START_TRANSITIONS;
use crate::models::{CohortId, Interaction, ItemId, UserId, UserSimilarity};
use crate::utils::seeded_rng;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExposureStage {
    Initial,
    Expanding,
    Decaying,
}

impl ExposureStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExposureStage::Initial => "initial",
            ExposureStage::Expanding => "expanding",
            ExposureStage::Decaying => "decaying",
        }
    }
}

/// Reference engagement levels of a cohort
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CohortBaseline {
    pub watch_time_avg: f64,
    pub completion_rate: f64,
    pub skip_rate: f64,
}

impl Default for CohortBaseline {
    fn default() -> Self {
        Self {
            watch_time_avg: 0.5,
            completion_rate: 0.3,
            skip_rate: 0.4,
        }
    }
}

/// Exposure state of one item in the cold-start path
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColdStartState {
    pub item_id: ItemId,
    pub cohort_id: CohortId,
    pub cohort: Vec<UserId>,
    pub exposure_count: u64,
    pub exposed_users: HashSet<UserId>,
    /// Sample the last performance score was computed from
    pub interactions: Vec<Interaction>,
    /// Interactions buffered since the last evaluation
    pub pending: Vec<Interaction>,
    pub performance_score: f64,
    pub stage: ExposureStage,
    pub viral_expansion_factor: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub struct ColdStartEngine {
    config: ColdStartConfig,
    states: DashMap<ItemId, ColdStartState>,
    baselines: DashMap<CohortId, CohortBaseline>,
    rng: Mutex<StdRng>,
}

impl Default for ColdStartEngine {
    fn default() -> Self {
        Self::new(ColdStartConfig::default(), None)
    }
}

impl ColdStartEngine {
    pub fn new(config: ColdStartConfig, seed: Option<u64>) -> Self {
        Self {
            config,
            states: DashMap::new(),
            baselines: DashMap::new(),
            rng: Mutex::new(seeded_rng(seed, 1)),
        }
    }

    pub fn config(&self) -> &ColdStartConfig {
        &self.config
    }

    /// Start exposure for a new item under a fresh cohort id
    pub fn begin_exposure(&self, item_id: ItemId, user_pool: &[UserId]) -> Vec<UserId> {
        self.begin_exposure_in_cohort(item_id, user_pool, Uuid::new_v4())
    }

    /// Start exposure for a new item, sampling a random cohort from the pool.
    ///
    /// Cohort size is uniform in `[size / 2, size * 2]`, capped at the pool size.
    pub fn begin_exposure_in_cohort(
        &self,
        item_id: ItemId,
        user_pool: &[UserId],
        cohort_id: CohortId,
    ) -> Vec<UserId> {
        let size = self.config.initial_cohort_size;
        let cohort: Vec<UserId> = {
            let mut rng = self.rng.lock();
            let target = rng.gen_range(size / 2..=size.saturating_mul(2));
            let take = target.min(user_pool.len());
            user_pool.choose_multiple(&mut *rng, take).copied().collect()
        };

        let now = Utc::now();
        self.states.insert(
            item_id,
            ColdStartState {
                item_id,
                cohort_id,
                exposure_count: cohort.len() as u64,
                exposed_users: cohort.iter().copied().collect(),
                cohort: cohort.clone(),
                interactions: Vec::new(),
                pending: Vec::new(),
                performance_score: 0.0,
                stage: ExposureStage::Initial,
                viral_expansion_factor: 1.0,
                created_at: now,
                updated_at: now,
            },
        );
        self.baselines.entry(cohort_id).or_default();

        info!(
            item_id = %item_id,
            cohort_id = %cohort_id,
            cohort_size = cohort.len(),
            pool_size = user_pool.len(),
            "Started cold-start exposure"
        );

        cohort
    }

    /// Normalize a cohort sample against the baseline and store the score.
    ///
    /// Unknown item or empty sample yields 0.0 and leaves state untouched.
    pub fn normalize_performance(&self, item_id: &ItemId, interactions: &[Interaction]) -> f64 {
        if interactions.is_empty() {
            return 0.0;
        }
        let Some(mut state) = self.states.get_mut(item_id) else {
            return 0.0;
        };

        let baseline = self
            .baselines
            .get(&state.cohort_id)
            .map(|b| *b)
            .unwrap_or_default();

        let n = interactions.len() as f64;
        let avg_watch = interactions.iter().map(|i| i.watch_fraction).sum::<f64>() / n;
        let avg_completion = interactions
            .iter()
            .filter(|i| i.watch_fraction >= self.config.completion_watch_fraction)
            .count() as f64
            / n;
        let avg_skip = interactions.iter().filter(|i| i.skip).count() as f64 / n;

        let watch = ratio_or(avg_watch, baseline.watch_time_avg, 0.0);
        let completion = ratio_or(avg_completion, baseline.completion_rate, 0.0);
        let skip = ratio_or(avg_skip, baseline.skip_rate, 1.0);

        let score = 0.4 * watch + 0.4 * completion - 0.2 * skip;

        state.performance_score = score;
        state.interactions = interactions.to_vec();
        state.updated_at = Utc::now();

        debug!(
            item_id = %item_id,
            samples = interactions.len(),
            watch = avg_watch,
            completion = avg_completion,
            skip = avg_skip,
            score = score,
            "Normalized cold-start performance"
        );

        score
    }

    /// Grow or shrink exposure based on the stored performance score.
    ///
    /// Returns the users newly selected for exposure (empty on decay).
    pub fn expand_or_decay(
        &self,
        item_id: &ItemId,
        user_pool: &[UserId],
        similarity: Option<&dyn UserSimilarity>,
    ) -> Vec<UserId> {
        let Some(mut state) = self.states.get_mut(item_id) else {
            return Vec::new();
        };

        let current = state.exposure_count;
        state.updated_at = Utc::now();

        if state.performance_score <= self.config.expansion_threshold {
            state.exposure_count = (current as f64 * self.config.decay_factor).floor() as u64;
            state.stage = ExposureStage::Decaying;
            COLD_START_TRANSITIONS.with_label_values(&["decay"]).inc();

            debug!(
                item_id = %item_id,
                score = state.performance_score,
                exposure = state.exposure_count,
                "Cold-start exposure decaying"
            );
            return Vec::new();
        }

        let next = (current as f64 * self.config.expansion_factor).floor() as u64;
        let wanted = next.saturating_sub(current) as usize;

        let engaged = self.engaged_seeds(&state);
        let new_users = match similarity {
            Some(similarity) if !engaged.is_empty() => {
                let pool: HashSet<UserId> = user_pool.iter().copied().collect();
                let mut seen = HashSet::new();
                let per_seed = self.config.similar_users_per_seed;
                engaged
                    .iter()
                    .flat_map(|seed| similarity.similar_users(seed).iter().take(per_seed).copied())
                    .filter(|u| pool.contains(u) && !state.exposed_users.contains(u))
                    .filter(|u| seen.insert(*u))
                    .take(wanted)
                    .collect()
            }
            _ => {
                let remaining: Vec<UserId> = user_pool
                    .iter()
                    .copied()
                    .filter(|u| !state.exposed_users.contains(u))
                    .collect();
                let mut rng = self.rng.lock();
                remaining
                    .choose_multiple(&mut *rng, wanted.min(remaining.len()))
                    .copied()
                    .collect::<Vec<_>>()
            }
        };

        state.exposure_count = next;
        state.stage = ExposureStage::Expanding;
        state.exposed_users.extend(new_users.iter().copied());
        COLD_START_TRANSITIONS.with_label_values(&["expand"]).inc();

        info!(
            item_id = %item_id,
            score = state.performance_score,
            exposure = next,
            new_users = new_users.len(),
            "Cold-start exposure expanding"
        );

        new_users
    }

    /// First engaged users of the stored sample, deduplicated in order
    fn engaged_seeds(&self, state: &ColdStartState) -> Vec<UserId> {
        let mut seen = HashSet::new();
        state
            .interactions
            .iter()
            .filter(|i| i.is_high_engagement(self.config.engaged_watch_threshold))
            .map(|i| i.user_id)
            .filter(|u| seen.insert(*u))
            .take(self.config.max_engaged_seeds)
            .collect()
    }

    /// Buffer an interaction for the next evaluation; false for unknown items
    pub fn record_interaction(&self, interaction: &Interaction) -> bool {
        let Some(mut state) = self.states.get_mut(&interaction.item_id) else {
            return false;
        };

        state.pending.push(interaction.clone());
        let overflow = state
            .pending
            .len()
            .saturating_sub(self.config.max_pending_interactions);
        if overflow > 0 {
            state.pending.drain(..overflow);
        }
        state.updated_at = Utc::now();
        true
    }

    /// Drain the buffered interactions of an item
    pub fn take_pending(&self, item_id: &ItemId) -> Vec<Interaction> {
        self.states
            .get_mut(item_id)
            .map(|mut state| std::mem::take(&mut state.pending))
            .unwrap_or_default()
    }

    /// Multiply the stored viral expansion factor; returns the new value
    pub(crate) fn boost_viral_factor(&self, item_id: &ItemId, factor: f64) -> Option<f64> {
        self.states.get_mut(item_id).map(|mut state| {
            state.viral_expansion_factor *= factor;
            state.viral_expansion_factor
        })
    }

    pub fn update_cohort_baseline(&self, cohort_id: CohortId, baseline: CohortBaseline) {
        self.baselines.insert(cohort_id, baseline);
    }

    pub fn baseline(&self, cohort_id: &CohortId) -> Option<CohortBaseline> {
        self.baselines.get(cohort_id).map(|b| *b)
    }

    pub fn state(&self, item_id: &ItemId) -> Option<ColdStartState> {
        self.states.get(item_id).map(|s| s.clone())
    }

    pub fn tracked_items(&self) -> usize {
        self.states.len()
    }

    /// Drop states not updated within the TTL; returns how many were removed
    pub fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        let ttl = Duration::hours(self.config.state_ttl_hours);
        let before = self.states.len();
        self.states.retain(|_, state| now - state.updated_at <= ttl);

        let live: HashSet<CohortId> = self.states.iter().map(|s| s.cohort_id).collect();
        self.baselines.retain(|cohort_id, _| live.contains(cohort_id));

        let evicted = before - self.states.len();
        if evicted > 0 {
            info!(evicted = evicted, "Evicted expired cold-start states");
        }
        evicted
    }
}

fn ratio_or(value: f64, base: f64, fallback: f64) -> f64 {
    if base > 0.0 {
        value / base
    } else {
        fallback
    }
}
