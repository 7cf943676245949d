use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};

/// Tunables for every pipeline stage.
///
/// `Default` carries the production constants; `from_env` overlays
/// `FEED_`-prefixed environment variables on top of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub cold_start: ColdStartConfig,
    pub exploration: ExplorationConfig,
    pub engagement: EngagementConfig,
    pub safety: SafetyConfig,
    pub stabilizer: StabilizerConfig,
    /// Upper bound accepted for `feed_size`
    pub max_feed_size: usize,
    /// Fixed seed for cohort sampling and reward jitter (random when unset)
    pub rng_seed: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColdStartConfig {
    pub initial_cohort_size: usize,
    pub expansion_threshold: f64,
    pub expansion_factor: f64,
    pub decay_factor: f64,
    /// Watch fraction at which a view counts as completed
    pub completion_watch_fraction: f64,
    pub engaged_watch_threshold: f64,
    pub max_engaged_seeds: usize,
    pub similar_users_per_seed: usize,
    pub max_pending_interactions: usize,
    pub state_ttl_hours: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplorationConfig {
    /// LinUCB exploration strength
    pub bandit_alpha: f64,
    pub context_dim: usize,
    /// Widths of the short/mid/long embedding blocks; the fingerprint follows
    pub embedding_widths: [usize; 3],
    /// An arm is flagged exploratory when uncertainty > ratio * exploit
    pub exploration_ratio: f64,
    pub arm_idle_ttl_hours: i64,
    pub taste_session_limit: usize,
    pub taste_min_interactions: usize,
    pub taste_engagement_threshold: f64,
    pub taste_similarity_threshold: f64,
    pub taste_boost: f64,
    pub novelty_rate: f64,
    pub novelty_min_similarity: f64,
    pub novelty_history_window: usize,
    pub novelty_positions: Vec<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngagementConfig {
    pub base_reward_rate: f64,
    pub reward_jitter: f64,
    pub reward_history_size: usize,
    pub low_reward_threshold: f64,
    pub high_reward_threshold: f64,
    /// Low rewards among the last five that trigger the elevated rate
    pub low_reward_trigger: usize,
    pub elevated_reward_probability: f64,
    pub high_reward_boost: f64,
    pub obsession_window: usize,
    pub obsession_min_interactions: usize,
    pub obsession_threshold: f64,
    pub obsession_boost: f64,
    pub cliffhanger_positions: Vec<usize>,
    pub fatigue_threshold: f64,
    pub fatigue_boost: f64,
    pub fatigue_top_n: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    pub bot_like_threshold: f64,
    pub bot_skip_threshold: f64,
    pub coordinated_threshold: usize,
    pub spam_penalty_factor: f64,
    pub item_interaction_window: usize,
    pub loop_similarity_threshold: f64,
    pub loop_window: usize,
    pub dedup_similarity: f64,
    pub diversity_threshold: f64,
    pub max_per_category: usize,
    pub homogenization_threshold: f64,
    pub homogenization_sample: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StabilizerConfig {
    pub min_content_similarity: f64,
    pub recent_window: usize,
    pub max_per_category: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cold_start: ColdStartConfig::default(),
            exploration: ExplorationConfig::default(),
            engagement: EngagementConfig::default(),
            safety: SafetyConfig::default(),
            stabilizer: StabilizerConfig::default(),
            max_feed_size: 200,
            rng_seed: None,
        }
    }
}

impl Default for ColdStartConfig {
    fn default() -> Self {
        Self {
            initial_cohort_size: 500,
            expansion_threshold: 1.2,
            expansion_factor: 2.0,
            decay_factor: 0.9,
            completion_watch_fraction: 0.95,
            engaged_watch_threshold: 0.5,
            max_engaged_seeds: 10,
            similar_users_per_seed: 20,
            max_pending_interactions: 1000,
            state_ttl_hours: 168, // 7 days
        }
    }
}

impl Default for ExplorationConfig {
    fn default() -> Self {
        Self {
            bandit_alpha: 1.0,
            context_dim: 1664, // 128 + 256 + 512 + 768
            embedding_widths: [128, 256, 512],
            exploration_ratio: 0.1,
            arm_idle_ttl_hours: 168,
            taste_session_limit: 10,
            taste_min_interactions: 5,
            taste_engagement_threshold: 0.5,
            taste_similarity_threshold: 0.7,
            taste_boost: 1.5,
            novelty_rate: 0.15,
            novelty_min_similarity: 0.5,
            novelty_history_window: 50,
            novelty_positions: vec![5, 10, 15, 20, 25],
        }
    }
}

impl Default for EngagementConfig {
    fn default() -> Self {
        Self {
            base_reward_rate: 0.3,
            reward_jitter: 0.2,
            reward_history_size: 20,
            low_reward_threshold: 0.5,
            high_reward_threshold: 0.7,
            low_reward_trigger: 3,
            elevated_reward_probability: 0.8,
            high_reward_boost: 1.2,
            obsession_window: 10,
            obsession_min_interactions: 5,
            obsession_threshold: 0.85,
            obsession_boost: 2.0,
            cliffhanger_positions: vec![3, 7, 12, 18],
            fatigue_threshold: 0.7,
            fatigue_boost: 1.5,
            fatigue_top_n: 5,
        }
    }
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            bot_like_threshold: 0.95,
            bot_skip_threshold: 0.05,
            coordinated_threshold: 10,
            spam_penalty_factor: 0.5,
            item_interaction_window: 200,
            loop_similarity_threshold: 0.8,
            loop_window: 20,
            dedup_similarity: 0.7,
            diversity_threshold: 0.3,
            max_per_category: 3,
            homogenization_threshold: 0.2,
            homogenization_sample: 100,
        }
    }
}

impl Default for StabilizerConfig {
    fn default() -> Self {
        Self {
            min_content_similarity: 0.7,
            recent_window: 20,
            max_per_category: 3,
        }
    }
}

/// Flat view of the overridable settings (`FEED_<FIELD>`)
#[derive(Debug, Default, Deserialize)]
struct EnvOverrides {
    initial_cohort_size: Option<usize>,
    expansion_threshold: Option<f64>,
    state_ttl_hours: Option<i64>,
    bandit_alpha: Option<f64>,
    context_dim: Option<usize>,
    novelty_rate: Option<f64>,
    base_reward_rate: Option<f64>,
    spam_penalty_factor: Option<f64>,
    max_per_category: Option<usize>,
    max_feed_size: Option<usize>,
    rng_seed: Option<u64>,
}

impl PipelineConfig {
    /// Load configuration from the environment (and `.env` if present)
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let overrides: EnvOverrides = envy::prefixed("FEED_").from_env()?;
        let mut config = Self::default();
        config.apply(overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply(&mut self, env: EnvOverrides) {
        if let Some(v) = env.initial_cohort_size {
            self.cold_start.initial_cohort_size = v;
        }
        if let Some(v) = env.expansion_threshold {
            self.cold_start.expansion_threshold = v;
        }
        if let Some(v) = env.state_ttl_hours {
            self.cold_start.state_ttl_hours = v;
            self.exploration.arm_idle_ttl_hours = v;
        }
        if let Some(v) = env.bandit_alpha {
            self.exploration.bandit_alpha = v;
        }
        if let Some(v) = env.context_dim {
            self.exploration.context_dim = v;
        }
        if let Some(v) = env.novelty_rate {
            self.exploration.novelty_rate = v;
        }
        if let Some(v) = env.base_reward_rate {
            self.engagement.base_reward_rate = v;
        }
        if let Some(v) = env.spam_penalty_factor {
            self.safety.spam_penalty_factor = v;
        }
        if let Some(v) = env.max_per_category {
            self.safety.max_per_category = v;
            self.stabilizer.max_per_category = v;
        }
        if let Some(v) = env.max_feed_size {
            self.max_feed_size = v;
        }
        if env.rng_seed.is_some() {
            self.rng_seed = env.rng_seed;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_feed_size == 0 {
            return Err(PipelineError::Config("max_feed_size must be positive".into()));
        }
        if self.exploration.context_dim == 0 {
            return Err(PipelineError::Config("context_dim must be positive".into()));
        }
        let alpha = self.exploration.bandit_alpha;
        if alpha.is_nan() || alpha < 0.0 {
            return Err(PipelineError::Config("bandit_alpha must be >= 0".into()));
        }
        if !(0.0..=1.0).contains(&self.exploration.novelty_rate) {
            return Err(PipelineError::Config("novelty_rate must be in [0, 1]".into()));
        }
        if !(0.0..=1.0).contains(&self.safety.spam_penalty_factor) {
            return Err(PipelineError::Config(
                "spam_penalty_factor must be in [0, 1]".into(),
            ));
        }
        if self.cold_start.state_ttl_hours <= 0 {
            return Err(PipelineError::Config("state_ttl_hours must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    const VARS: [&str; 3] = ["FEED_BANDIT_ALPHA", "FEED_MAX_PER_CATEGORY", "FEED_RNG_SEED"];

    fn clear_vars() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.cold_start.initial_cohort_size, 500);
        assert_eq!(config.exploration.context_dim, 1664);
        assert_eq!(config.exploration.novelty_positions, vec![5, 10, 15, 20, 25]);
        assert_eq!(config.engagement.cliffhanger_positions, vec![3, 7, 12, 18]);
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        clear_vars();
        env::set_var("FEED_BANDIT_ALPHA", "0.5");
        env::set_var("FEED_MAX_PER_CATEGORY", "2");
        env::set_var("FEED_RNG_SEED", "42");

        let config = PipelineConfig::from_env().unwrap();
        assert_eq!(config.exploration.bandit_alpha, 0.5);
        assert_eq!(config.safety.max_per_category, 2);
        assert_eq!(config.stabilizer.max_per_category, 2);
        assert_eq!(config.rng_seed, Some(42));

        clear_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_bad_values() {
        clear_vars();
        env::set_var("FEED_BANDIT_ALPHA", "not-a-number");

        let result = PipelineConfig::from_env();
        assert!(matches!(result, Err(PipelineError::Config(_))));

        env::set_var("FEED_BANDIT_ALPHA", "-1.0");
        let result = PipelineConfig::from_env();
        assert!(matches!(result, Err(PipelineError::Config(_))));

        clear_vars();
    }
}
