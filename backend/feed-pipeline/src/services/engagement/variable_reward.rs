// ============================================
// Variable Reward Scheduler
// ============================================
//
// Per-user reward history (last 20 observations). After a run of low rewards
// (>= 3 of the last 5 below 0.5) candidates are flagged high-reward with
// probability 0.8; otherwise with base_rate +/- U(-0.2, 0.2).
// Flagged candidates get x1.2.

use crate::config::EngagementConfig;
use crate::models::{Candidate, UserId};
use crate::utils::{rerank, seeded_rng};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;

/// Window of the history inspected for a low-reward run
const RECENT_WINDOW: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRewardHistory {
    pub recent: VecDeque<f64>,
    /// Rewards above the high-reward threshold seen so far
    pub high_reward_count: u64,
    /// 0.9 * old + 0.1 * reward
    pub engagement_ema: f64,
    pub last_updated: DateTime<Utc>,
}

impl UserRewardHistory {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            recent: VecDeque::new(),
            high_reward_count: 0,
            engagement_ema: 0.0,
            last_updated: now,
        }
    }
}

pub struct VariableRewardScheduler {
    config: EngagementConfig,
    histories: DashMap<UserId, UserRewardHistory>,
    rng: Mutex<StdRng>,
}

impl Default for VariableRewardScheduler {
    fn default() -> Self {
        Self::new(EngagementConfig::default(), None)
    }
}

impl VariableRewardScheduler {
    pub fn new(config: EngagementConfig, seed: Option<u64>) -> Self {
        Self {
            config,
            histories: DashMap::new(),
            rng: Mutex::new(seeded_rng(seed, 2)),
        }
    }

    pub fn record_reward(&self, user_id: UserId, reward: f64) {
        let now = Utc::now();
        let mut history = self
            .histories
            .entry(user_id)
            .or_insert_with(|| UserRewardHistory::new(now));
        history.last_updated = now;
        history.recent.push_back(reward);
        while history.recent.len() > self.config.reward_history_size {
            history.recent.pop_front();
        }
        if reward > self.config.high_reward_threshold {
            history.high_reward_count += 1;
        }
        history.engagement_ema = history.engagement_ema * 0.9 + reward * 0.1;
    }

    pub fn history(&self, user_id: &UserId) -> Option<UserRewardHistory> {
        self.histories.get(user_id).map(|h| h.clone())
    }

    pub fn tracked_users(&self) -> usize {
        self.histories.len()
    }

    /// Drop histories with no reward recorded inside `ttl`
    pub fn evict_idle(&self, now: DateTime<Utc>, ttl: Duration) -> usize {
        let before = self.histories.len();
        self.histories
            .retain(|_, history| now - history.last_updated <= ttl);
        before.saturating_sub(self.histories.len())
    }

    /// True after a run of low rewards
    pub fn in_low_reward_run(&self, user_id: &UserId) -> bool {
        self.histories
            .get(user_id)
            .map(|history| {
                let low = history
                    .recent
                    .iter()
                    .rev()
                    .take(RECENT_WINDOW)
                    .filter(|r| **r < self.config.low_reward_threshold)
                    .count();
                low >= self.config.low_reward_trigger
            })
            .unwrap_or(false)
    }

    fn should_flag(&self, elevated: bool, rng: &mut StdRng) -> bool {
        let probability = if elevated {
            self.config.elevated_reward_probability
        } else {
            let jitter = self.config.reward_jitter.abs();
            self.config.base_reward_rate + rng.gen_range(-jitter..=jitter)
        };
        rng.gen::<f64>() < probability
    }

    /// Flag candidates as high-reward, boost the flagged ones and re-sort
    pub fn apply(&self, user_id: &UserId, candidates: &mut [Candidate]) -> usize {
        let elevated = self.in_low_reward_run(user_id);
        let mut flagged = 0;
        {
            let mut rng = self.rng.lock();
            for candidate in candidates.iter_mut() {
                if self.should_flag(elevated, &mut rng) {
                    candidate.composite_score *= self.config.high_reward_boost;
                    flagged += 1;
                }
            }
        }
        rerank(candidates);

        debug!(
            user_id = %user_id,
            elevated = elevated,
            flagged = flagged,
            "Variable reward applied"
        );
        flagged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn candidates(n: usize) -> Vec<Candidate> {
        (0..n)
            .map(|_| Candidate::new(Uuid::new_v4(), vec![1.0], 1.0))
            .collect()
    }

    #[test]
    fn test_history_bookkeeping() {
        let scheduler = VariableRewardScheduler::default();
        let user = Uuid::new_v4();
        for _ in 0..25 {
            scheduler.record_reward(user, 0.8);
        }

        let history = scheduler.history(&user).unwrap();
        assert_eq!(history.recent.len(), 20);
        assert_eq!(history.high_reward_count, 25);
        assert!(history.engagement_ema > 0.7 && history.engagement_ema < 0.8);
    }

    #[test]
    fn test_evict_idle_histories() {
        let scheduler = VariableRewardScheduler::default();
        let user = Uuid::new_v4();
        scheduler.record_reward(user, 0.4);

        assert_eq!(scheduler.evict_idle(Utc::now(), Duration::hours(1)), 0);
        assert_eq!(
            scheduler.evict_idle(Utc::now() + Duration::hours(2), Duration::hours(1)),
            1
        );
        assert!(scheduler.history(&user).is_none());
        assert_eq!(scheduler.tracked_users(), 0);
    }

    #[test]
    fn test_low_reward_run_detection() {
        let scheduler = VariableRewardScheduler::default();
        let user = Uuid::new_v4();
        for r in [0.9, 0.9, 0.1, 0.2, 0.3] {
            scheduler.record_reward(user, r);
        }
        assert!(scheduler.in_low_reward_run(&user));

        scheduler.record_reward(user, 0.9);
        scheduler.record_reward(user, 0.9);
        // last five: 0.1 0.2 0.3 0.9 0.9 -> still three low
        assert!(scheduler.in_low_reward_run(&user));
        scheduler.record_reward(user, 0.9);
        assert!(!scheduler.in_low_reward_run(&user));
        assert!(!scheduler.in_low_reward_run(&Uuid::new_v4()));
    }

    #[test]
    fn test_elevated_flag_rate() {
        let scheduler = VariableRewardScheduler::new(EngagementConfig::default(), Some(42));
        let user = Uuid::new_v4();
        for _ in 0..5 {
            scheduler.record_reward(user, 0.0);
        }

        let mut list = candidates(2000);
        let flagged = scheduler.apply(&user, &mut list);
        let rate = flagged as f64 / 2000.0;
        assert!(rate > 0.75 && rate < 0.85, "rate = {}", rate);
        assert!(list[0].composite_score > list[1999].composite_score);
    }

    #[test]
    fn test_base_flag_rate() {
        let scheduler = VariableRewardScheduler::new(EngagementConfig::default(), Some(7));
        let mut list = candidates(4000);
        let flagged = scheduler.apply(&Uuid::new_v4(), &mut list);
        let rate = flagged as f64 / 4000.0;
        assert!(rate > 0.25 && rate < 0.35, "rate = {}", rate);
    }
}
