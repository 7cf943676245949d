// ============================================
// Exploration Module (探索模块)
// ============================================
//
// Explore-exploit balance for every feed request:
// 1. Early-session taste discovery boost (session length < 10)
// 2. LinUCB contextual bandit selects the top 2k candidates
// 3. Novelty injection moves low-similarity items to fixed slots
// 4. Truncate to k
//
// Feedback path: each interaction becomes a bandit reward
//   reward = watch * (1 - skip) + 0.3 * like + 0.5 * share

pub mod novelty;
pub mod taste_discovery;
pub mod ucb;

pub use novelty::NoveltyInjector;
pub use taste_discovery::{TasteDiscovery, TastePreference};
pub use ucb::{ArmStatistics, ContextualBandit};

use crate::config::ExplorationConfig;
use crate::models::{Candidate, FingerprintLookup, Interaction, SessionState, UserContext};
use tracing::debug;

pub struct ExplorationManager {
    bandit: ContextualBandit,
    taste_discovery: TasteDiscovery,
    novelty_injector: NoveltyInjector,
}

impl Default for ExplorationManager {
    fn default() -> Self {
        Self::new(&ExplorationConfig::default())
    }
}

impl ExplorationManager {
    pub fn new(config: &ExplorationConfig) -> Self {
        Self {
            bandit: ContextualBandit::new(config),
            taste_discovery: TasteDiscovery::new(config),
            novelty_injector: NoveltyInjector::new(config),
        }
    }

    pub fn bandit(&self) -> &ContextualBandit {
        &self.bandit
    }

    /// Run the exploration stages and keep the best `k`
    pub fn process(
        &self,
        user: &UserContext,
        session: &SessionState,
        mut candidates: Vec<Candidate>,
        lookup: &dyn FingerprintLookup,
        k: usize,
    ) -> Vec<Candidate> {
        if self.taste_discovery.is_active(session) {
            if let Some(preference) = self.taste_discovery.discover(session, lookup) {
                self.taste_discovery.apply_boost(&mut candidates, &preference);
            }
        }

        let candidates = self
            .bandit
            .select_top_k(user, candidates, k.saturating_mul(2));

        let mut candidates = self.novelty_injector.inject(
            candidates,
            &session.recent_interactions,
            lookup,
            session.current_length,
        );
        candidates.truncate(k);

        debug!(
            user_id = %user.user_id,
            session_length = session.current_length,
            returned = candidates.len(),
            "Exploration stage complete"
        );

        candidates
    }

    /// Turn an observed interaction into a bandit update
    pub fn record_outcome(&self, user: &UserContext, interaction: &Interaction, fingerprint: &[f32]) {
        self.bandit
            .update(interaction.item_id, user, fingerprint, interaction.reward());
    }
}
