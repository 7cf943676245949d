// ============================================
// Virality Engine (病毒式扩散)
// ============================================
//
// Drives the cold-start engine from ingestion and feedback events and keeps
// the item record's exposure metadata in sync.

use super::engine::ColdStartEngine;
use crate::models::{Interaction, ItemFeatures, ItemId, UserId, UserSimilarity};
use tracing::{debug, info};

pub struct ViralityEngine {
    cold_start: ColdStartEngine,
}

impl Default for ViralityEngine {
    fn default() -> Self {
        Self::new(ColdStartEngine::default())
    }
}

impl ViralityEngine {
    pub fn new(cold_start: ColdStartEngine) -> Self {
        Self { cold_start }
    }

    pub fn cold_start(&self) -> &ColdStartEngine {
        &self.cold_start
    }

    /// Begin exposure for a freshly ingested item and stamp its record
    pub fn on_new_item(&self, item: &mut ItemFeatures, user_pool: &[UserId]) -> Vec<UserId> {
        let cohort = self.cold_start.begin_exposure(item.item_id, user_pool);

        item.exposure_count = cohort.len() as u64;
        item.viral_expansion_factor = 1.0;

        info!(
            item_id = %item.item_id,
            exposure = item.exposure_count,
            "New item entered cold start"
        );

        cohort
    }

    /// Score a batch of feedback and grow or shrink the item's exposure
    pub fn on_interaction_batch(
        &self,
        item_id: &ItemId,
        interactions: &[Interaction],
        user_pool: &[UserId],
        similarity: Option<&dyn UserSimilarity>,
    ) -> Vec<UserId> {
        let config = self.cold_start.config();
        let score = self.cold_start.normalize_performance(item_id, interactions);

        if score > config.expansion_threshold {
            if let Some(factor) = self
                .cold_start
                .boost_viral_factor(item_id, config.expansion_factor)
            {
                debug!(
                    item_id = %item_id,
                    viral_expansion_factor = factor,
                    "Viral expansion factor raised"
                );
            }
        }

        self.cold_start.expand_or_decay(item_id, user_pool, similarity)
    }

    /// Evaluate the interactions buffered since the last pass.
    ///
    /// No buffered feedback means no decision: the state is left as is.
    pub fn reevaluate(
        &self,
        item_id: &ItemId,
        user_pool: &[UserId],
        similarity: Option<&dyn UserSimilarity>,
    ) -> Vec<UserId> {
        let pending = self.cold_start.take_pending(item_id);
        if pending.is_empty() {
            return Vec::new();
        }
        self.on_interaction_batch(item_id, &pending, user_pool, similarity)
    }

    /// Mirror the engine's exposure metadata onto an item record
    pub fn sync_item(&self, item: &mut ItemFeatures) -> bool {
        match self.cold_start.state(&item.item_id) {
            Some(state) => {
                item.exposure_count = state.exposure_count;
                item.viral_expansion_factor = state.viral_expansion_factor;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ColdStartConfig;
    use crate::services::cold_start::ExposureStage;
    use uuid::Uuid;

    fn engine() -> ViralityEngine {
        ViralityEngine::new(ColdStartEngine::new(ColdStartConfig::default(), Some(11)))
    }

    #[test]
    fn test_on_new_item_stamps_record() {
        let virality = engine();
        let pool: Vec<UserId> = (0..100).map(|_| Uuid::new_v4()).collect();
        let mut item = ItemFeatures::new(Uuid::new_v4(), vec![1.0, 0.0]);
        item.viral_expansion_factor = 3.0;

        let cohort = virality.on_new_item(&mut item, &pool);
        assert_eq!(item.exposure_count, cohort.len() as u64);
        assert_eq!(item.viral_expansion_factor, 1.0);
    }

    #[test]
    fn test_strong_batch_doubles_factor() {
        let virality = engine();
        let pool: Vec<UserId> = (0..2000).map(|_| Uuid::new_v4()).collect();
        let mut item = ItemFeatures::new(Uuid::new_v4(), vec![1.0]);
        let cohort = virality.on_new_item(&mut item, &pool);

        let batch: Vec<Interaction> = cohort
            .iter()
            .take(10)
            .map(|u| Interaction::new(*u, item.item_id, 1.0))
            .collect();
        let new_users = virality.on_interaction_batch(&item.item_id, &batch, &pool, None);
        assert!(!new_users.is_empty());

        assert!(virality.sync_item(&mut item));
        assert_eq!(item.viral_expansion_factor, 2.0);
        assert_eq!(item.exposure_count, cohort.len() as u64 * 2);
    }

    #[test]
    fn test_reevaluate_uses_buffered_feedback() {
        let virality = engine();
        let pool: Vec<UserId> = (0..100).map(|_| Uuid::new_v4()).collect();
        let mut item = ItemFeatures::new(Uuid::new_v4(), vec![1.0]);
        virality.on_new_item(&mut item, &pool);

        // nothing buffered yet
        assert!(virality.reevaluate(&item.item_id, &pool, None).is_empty());
        assert_eq!(
            virality.cold_start().state(&item.item_id).unwrap().stage,
            ExposureStage::Initial
        );

        let mut weak = Interaction::new(pool[0], item.item_id, 0.1);
        weak.skip = true;
        virality.cold_start().record_interaction(&weak);

        assert!(virality.reevaluate(&item.item_id, &pool, None).is_empty());
        assert_eq!(
            virality.cold_start().state(&item.item_id).unwrap().stage,
            ExposureStage::Decaying
        );
    }
}
