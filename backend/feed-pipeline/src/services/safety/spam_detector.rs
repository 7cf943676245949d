use crate::config::SafetyConfig;
use crate::models::Interaction;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Signals raised against an item's interaction window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpamSignal {
    BotPattern,
    EngagementFarming,
    Coordinated,
}

impl SpamSignal {
    pub fn weight(&self) -> f64 {
        match self {
            SpamSignal::BotPattern => 0.33,
            SpamSignal::EngagementFarming => 0.33,
            SpamSignal::Coordinated => 0.34,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpamAssessment {
    /// Sum of the triggered signal weights (0.0 - 1.0)
    pub score: f64,
    pub signals: Vec<SpamSignal>,
}

/// Engagement-farming detector using interaction heuristics
pub struct EngagementFarmingDetector {
    bot_like_threshold: f64,
    bot_skip_threshold: f64,
    coordinated_threshold: usize,
}

impl Default for EngagementFarmingDetector {
    fn default() -> Self {
        Self::new(&SafetyConfig::default())
    }
}

impl EngagementFarmingDetector {
    /// Minimum samples for the bot-pattern check
    const MIN_BOT_SAMPLES: usize = 5;
    /// Minimum samples for the farming check
    const MIN_FARMING_SAMPLES: usize = 10;
    const BURST_BUCKET_SECS: i64 = 3600;

    pub fn new(config: &SafetyConfig) -> Self {
        Self {
            bot_like_threshold: config.bot_like_threshold,
            bot_skip_threshold: config.bot_skip_threshold,
            coordinated_threshold: config.coordinated_threshold,
        }
    }

    /// Score an item's interaction window
    pub fn detect(&self, interactions: &[Interaction]) -> SpamAssessment {
        let mut assessment = SpamAssessment::default();
        if interactions.is_empty() {
            return assessment;
        }

        if self.has_bot_pattern(interactions) {
            assessment.signals.push(SpamSignal::BotPattern);
            tracing::debug!("Spam indicator: bot-like pattern (+0.33)");
        }

        if self.has_engagement_farming(interactions) {
            assessment.signals.push(SpamSignal::EngagementFarming);
            tracing::debug!("Spam indicator: likes without comments or shares (+0.33)");
        }

        if self.has_coordinated_activity(interactions) {
            assessment.signals.push(SpamSignal::Coordinated);
            tracing::debug!("Spam indicator: coordinated burst (+0.34)");
        }

        assessment.score = assessment.signals.iter().map(SpamSignal::weight).sum();
        assessment
    }

    fn has_bot_pattern(&self, interactions: &[Interaction]) -> bool {
        if interactions.len() < Self::MIN_BOT_SAMPLES {
            return false;
        }

        let n = interactions.len() as f64;
        let skip_rate = interactions.iter().filter(|i| i.skip).count() as f64 / n;
        let like_rate = interactions.iter().filter(|i| i.like).count() as f64 / n;
        if skip_rate < self.bot_skip_threshold && like_rate > self.bot_like_threshold {
            return true;
        }

        // identical watch fractions across many views
        let unique: HashSet<u64> = interactions
            .iter()
            .map(|i| i.watch_fraction.to_bits())
            .collect();
        (unique.len() as f64) < n * 0.1
    }

    fn has_engagement_farming(&self, interactions: &[Interaction]) -> bool {
        if interactions.len() < Self::MIN_FARMING_SAMPLES {
            return false;
        }

        let n = interactions.len() as f64;
        let rate = |f: fn(&Interaction) -> bool| interactions.iter().filter(|i| f(i)).count() as f64 / n;

        rate(|i| i.like) > 0.8 && rate(|i| i.comment) < 0.1 && rate(|i| i.share) < 0.1
    }

    fn has_coordinated_activity(&self, interactions: &[Interaction]) -> bool {
        if interactions.len() < self.coordinated_threshold {
            return false;
        }

        let mut buckets: HashMap<i64, Vec<&Interaction>> = HashMap::new();
        for interaction in interactions {
            let bucket = interaction
                .timestamp
                .timestamp()
                .div_euclid(Self::BURST_BUCKET_SECS);
            buckets.entry(bucket).or_default().push(interaction);
        }

        buckets.values().any(|window| {
            if window.len() < self.coordinated_threshold {
                return false;
            }
            let users: HashSet<_> = window.iter().map(|i| i.user_id).collect();
            (users.len() as f64) < window.len() as f64 * 0.5
        })
    }
}
