// ============================================
// Continuation Pacer (续看节奏)
// ============================================
//
// 1. Pacing: alternate high and medium halves of the ranked list
// 2. Cliffhangers: move the best items to slots {3, 7, 12, 18}, length kept
// 3. Hooks: continuation estimate > 0.7 => x1.3, > 0.5 => x1.15, re-sort

use crate::config::EngagementConfig;
use crate::models::{Candidate, Placement};
use crate::utils::{place_in_slots, rerank};
use std::cmp::Ordering;
use tracing::debug;

/// Lists shorter than this are not interleaved
const MIN_PACING_LEN: usize = 3;
/// Lists shorter than this get no cliffhangers
const MIN_CLIFFHANGER_LEN: usize = 5;

const STRONG_HOOK: f64 = 0.7;
const MODERATE_HOOK: f64 = 0.5;

pub struct ContinuationPacer {
    cliffhanger_positions: Vec<usize>,
}

impl Default for ContinuationPacer {
    fn default() -> Self {
        Self::new(&EngagementConfig::default())
    }
}

impl ContinuationPacer {
    pub fn new(config: &EngagementConfig) -> Self {
        Self {
            cliffhanger_positions: config.cliffhanger_positions.clone(),
        }
    }

    pub fn optimize(&self, candidates: Vec<Candidate>) -> Vec<Candidate> {
        let mut paced = self.apply_pacing(candidates);
        self.place_cliffhangers(&mut paced);
        self.apply_hooks(&mut paced);
        paced
    }

    /// Interleave the ranked entries: high, medium, high, medium, ...
    pub fn apply_pacing(&self, mut candidates: Vec<Candidate>) -> Vec<Candidate> {
        let slots: Vec<usize> = candidates
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.placement.is_reserved())
            .map(|(i, _)| i)
            .collect();
        if slots.len() < MIN_PACING_LEN {
            return candidates;
        }

        let mut ranked: Vec<Candidate> = slots.iter().map(|&i| candidates[i].clone()).collect();
        ranked.sort_by(|a, b| {
            b.composite_score
                .partial_cmp(&a.composite_score)
                .unwrap_or(Ordering::Equal)
        });

        let n = ranked.len();
        let half = n / 2;
        let mut order = Vec::with_capacity(n);
        let (mut high, mut medium) = (0, half);
        for i in 0..n {
            if i % 2 == 0 && high < half {
                order.push(high);
                high += 1;
            } else if medium < n {
                order.push(medium);
                medium += 1;
            } else if high < half {
                order.push(high);
                high += 1;
            }
        }

        for (slot, idx) in slots.into_iter().zip(order) {
            candidates[slot] = ranked[idx].clone();
        }
        candidates
    }

    /// Move the highest-scoring ranked entries to the cliffhanger slots.
    ///
    /// The best entry goes to the first slot, the next best to the second
    /// and so on; slots past the end are skipped.
    pub fn place_cliffhangers(&self, candidates: &mut Vec<Candidate>) -> usize {
        if candidates.len() < MIN_CLIFFHANGER_LEN {
            return 0;
        }

        let mut best: Vec<usize> = candidates
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.placement.is_reserved())
            .map(|(i, _)| i)
            .collect();
        // stable: earlier entry wins ties
        best.sort_by(|&a, &b| {
            candidates[b]
                .composite_score
                .partial_cmp(&candidates[a].composite_score)
                .unwrap_or(Ordering::Equal)
        });

        let moves: Vec<(usize, usize)> = best
            .into_iter()
            .zip(self.cliffhanger_positions.iter().copied())
            .filter(|&(_, slot)| slot < candidates.len())
            .collect();
        let placed = place_in_slots(candidates, &moves, Placement::Cliffhanger);

        debug!(placed = placed, "Cliffhangers placed");
        placed
    }

    pub fn apply_hooks(&self, candidates: &mut [Candidate]) {
        for candidate in candidates.iter_mut() {
            match candidate.continuation_estimate() {
                Some(c) if c > STRONG_HOOK => candidate.composite_score *= 1.3,
                Some(c) if c > MODERATE_HOOK => candidate.composite_score *= 1.15,
                _ => {}
            }
        }
        rerank(candidates);
    }
}
