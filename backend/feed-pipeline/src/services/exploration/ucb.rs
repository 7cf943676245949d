// ============================================
// LinUCB Contextual Bandit
// ============================================
//
// Per-item (arm) linear model over the request context x:
//
//   A = I + sum(x x^T)          b = sum(r x)
//   theta = A^-1 b
//   UCB(x) = theta^T x + alpha * sqrt(x^T A^-1 x)
//
// A is held as its lower Cholesky factor L (A = L L^T) and grown with a
// rank-1 update, so an update and a score are both O(d^2):
//
//   exploit     = (L^-1 b) . (L^-1 x)
//   uncertainty = alpha * |L^-1 x|
//
// Arms that have never been updated score +inf (always explored first).

use crate::config::ExplorationConfig;
use crate::models::{Candidate, ItemId, UserContext};
use crate::utils::{build_context, rerank};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use ndarray::{Array1, Array2};
use tracing::debug;

/// Sufficient statistics of one arm
#[derive(Debug, Clone)]
pub struct ArmStatistics {
    /// Lower-triangular factor of A
    cholesky: Array2<f64>,
    b: Array1<f64>,
    /// L^-1 b, refreshed on every update
    whitened_b: Array1<f64>,
    pub updates: u64,
    pub last_updated: DateTime<Utc>,
}

impl ArmStatistics {
    fn new(dim: usize) -> Self {
        Self {
            cholesky: Array2::eye(dim),
            b: Array1::zeros(dim),
            whitened_b: Array1::zeros(dim),
            updates: 0,
            last_updated: Utc::now(),
        }
    }

    pub fn dim(&self) -> usize {
        self.b.len()
    }

    /// A = L L^T
    pub fn covariance(&self) -> Array2<f64> {
        self.cholesky.dot(&self.cholesky.t())
    }

    pub fn reward_vector(&self) -> &Array1<f64> {
        &self.b
    }

    /// theta = A^-1 b (back substitution on L^T)
    pub fn theta(&self) -> Array1<f64> {
        let n = self.dim();
        let l = &self.cholesky;
        let mut theta = Array1::<f64>::zeros(n);
        for i in (0..n).rev() {
            let mut acc = self.whitened_b[i];
            for j in (i + 1)..n {
                acc -= l[[j, i]] * theta[j];
            }
            theta[i] = acc / l[[i, i]];
        }
        theta
    }

    /// A += x x^T, b += r x
    fn update(&mut self, context: &Array1<f64>, reward: f64) {
        let n = self.dim();
        let l = &mut self.cholesky;
        let mut x = context.clone();

        for k in 0..n {
            if x[k] == 0.0 && x.iter().skip(k + 1).all(|v| *v == 0.0) {
                break;
            }
            let lkk = l[[k, k]];
            let r = lkk.hypot(x[k]);
            let c = r / lkk;
            let s = x[k] / lkk;
            l[[k, k]] = r;
            for i in (k + 1)..n {
                l[[i, k]] = (l[[i, k]] + s * x[i]) / c;
                x[i] = c * x[i] - s * l[[i, k]];
            }
        }

        self.b.scaled_add(reward, context);
        self.whitened_b = self.forward_solve(&self.b);
        self.updates += 1;
        self.last_updated = Utc::now();
    }

    /// Solve L y = v
    fn forward_solve(&self, v: &Array1<f64>) -> Array1<f64> {
        let n = self.dim();
        let l = &self.cholesky;
        let mut y = Array1::<f64>::zeros(n);
        for i in 0..n {
            let mut acc = v[i];
            for j in 0..i {
                acc -= l[[i, j]] * y[j];
            }
            y[i] = acc / l[[i, i]];
        }
        y
    }

    /// (exploit, uncertainty / alpha) for a context
    fn components(&self, context: &Array1<f64>) -> (f64, f64) {
        let z = self.forward_solve(context);
        let exploit = self.whitened_b.dot(&z);
        let width = z.dot(&z).sqrt();
        (exploit, width)
    }
}

/// LinUCB selector over per-item arms
pub struct ContextualBandit {
    alpha: f64,
    context_dim: usize,
    embedding_widths: [usize; 3],
    exploration_ratio: f64,
    idle_ttl: Duration,
    arms: DashMap<ItemId, ArmStatistics>,
}

impl Default for ContextualBandit {
    fn default() -> Self {
        Self::new(&ExplorationConfig::default())
    }
}

impl ContextualBandit {
    pub fn new(config: &ExplorationConfig) -> Self {
        Self {
            alpha: config.bandit_alpha,
            context_dim: config.context_dim,
            embedding_widths: config.embedding_widths,
            exploration_ratio: config.exploration_ratio,
            idle_ttl: Duration::hours(config.arm_idle_ttl_hours),
            arms: DashMap::new(),
        }
    }

    /// Create with custom exploration strength
    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn context_dim(&self) -> usize {
        self.context_dim
    }

    fn context(&self, user: &UserContext, fingerprint: &[f32]) -> Array1<f64> {
        build_context(user, fingerprint, &self.embedding_widths, self.context_dim)
    }

    /// Score every candidate by UCB, re-sort and keep the best `k`
    pub fn select_top_k(
        &self,
        user: &UserContext,
        mut candidates: Vec<Candidate>,
        k: usize,
    ) -> Vec<Candidate> {
        let mut unseen = 0usize;
        for candidate in candidates.iter_mut() {
            let (ucb, is_exploration) = match self.arms.get(&candidate.item_id) {
                Some(arm) => {
                    let context = self.context(user, &candidate.fingerprint);
                    let (exploit, width) = arm.components(&context);
                    let uncertainty = self.alpha * width;
                    (
                        exploit + uncertainty,
                        uncertainty > exploit * self.exploration_ratio,
                    )
                }
                None => {
                    unseen += 1;
                    (f64::INFINITY, true)
                }
            };

            candidate.exploration_bonus = ucb - candidate.composite_score;
            candidate.is_exploration = is_exploration;
            candidate.composite_score = ucb;
        }

        rerank(&mut candidates);
        candidates.truncate(k);

        debug!(
            user_id = %user.user_id,
            unseen_arms = unseen,
            selected = candidates.len(),
            "Bandit selection complete"
        );

        candidates
    }

    /// Fold an observed reward into the item's arm (atomic per item)
    pub fn update(&self, item_id: ItemId, user: &UserContext, fingerprint: &[f32], reward: f64) {
        let context = self.context(user, fingerprint);
        let dim = self.context_dim;
        self.arms
            .entry(item_id)
            .or_insert_with(|| ArmStatistics::new(dim))
            .update(&context, reward);
    }

    /// theta^T x for a known arm
    pub fn exploitation_score(
        &self,
        item_id: &ItemId,
        user: &UserContext,
        fingerprint: &[f32],
    ) -> Option<f64> {
        let arm = self.arms.get(item_id)?;
        let context = self.context(user, fingerprint);
        Some(arm.components(&context).0)
    }

    pub fn arm_statistics(&self, item_id: &ItemId) -> Option<ArmStatistics> {
        self.arms.get(item_id).map(|arm| arm.clone())
    }

    pub fn arm_count(&self) -> usize {
        self.arms.len()
    }

    /// Drop arms without updates inside the idle TTL
    pub fn evict_idle(&self, now: DateTime<Utc>) -> usize {
        let before = self.arms.len();
        let ttl = self.idle_ttl;
        self.arms.retain(|_, arm| now - arm.last_updated <= ttl);
        before - self.arms.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn small_bandit() -> ContextualBandit {
        let config = ExplorationConfig {
            context_dim: 6,
            embedding_widths: [1, 1, 1],
            ..Default::default()
        };
        ContextualBandit::new(&config)
    }

    fn user() -> UserContext {
        UserContext::new(Uuid::new_v4()).with_embeddings(vec![0.5], vec![0.2], vec![0.1])
    }

    #[test]
    fn test_unknown_arm_is_explored_first() {
        let bandit = small_bandit();
        let user = user();
        let known = Uuid::new_v4();
        bandit.update(known, &user, &[1.0, 0.0, 0.0], 1.0);

        let candidates = vec![
            Candidate::new(known, vec![1.0, 0.0, 0.0], 0.9),
            Candidate::new(Uuid::new_v4(), vec![0.0, 1.0, 0.0], 0.1),
        ];
        let selected = bandit.select_top_k(&user, candidates, 2);

        assert!(selected[0].composite_score.is_infinite());
        assert!(selected[0].is_exploration);
        assert_eq!(selected[1].item_id, known);
        assert!(selected[1].composite_score.is_finite());
        let bonus = selected[1].exploration_bonus;
        assert!((selected[1].composite_score - 0.9 - bonus).abs() < 1e-9);
    }

    #[test]
    fn test_cholesky_tracks_covariance() {
        let bandit = small_bandit();
        let user = user();
        let item = Uuid::new_v4();
        let fingerprints = [[1.0, 0.0, 0.5], [0.0, 1.0, 0.2], [0.3, 0.3, 0.3]];
        let rewards = [1.0, 0.2, 0.6];
        for (fp, r) in fingerprints.iter().zip(rewards) {
            bandit.update(item, &user, fp, r);
        }

        let mut expected = Array2::<f64>::eye(6);
        let mut b = Array1::<f64>::zeros(6);
        for (fp, r) in fingerprints.iter().zip(rewards) {
            let x = build_context(&user, fp, &[1, 1, 1], 6);
            for i in 0..6 {
                for j in 0..6 {
                    expected[[i, j]] += x[i] * x[j];
                }
            }
            b.scaled_add(r, &x);
        }

        let arm = bandit.arm_statistics(&item).unwrap();
        let covariance = arm.covariance();
        for (got, want) in covariance.iter().zip(expected.iter()) {
            assert!((got - want).abs() < 1e-9);
        }

        // A theta == b
        let reconstructed = expected.dot(&arm.theta());
        for (got, want) in reconstructed.iter().zip(b.iter()) {
            assert!((got - want).abs() < 1e-9);
        }
        assert_eq!(arm.updates, 3);
    }

    #[test]
    fn test_exploitation_converges_monotonically() {
        let bandit = small_bandit();
        let user = user();
        let item = Uuid::new_v4();
        let fingerprint = [0.4, 0.4, 0.2];

        let mut previous = f64::NEG_INFINITY;
        for _ in 0..20 {
            bandit.update(item, &user, &fingerprint, 1.0);
            let score = bandit.exploitation_score(&item, &user, &fingerprint).unwrap();
            assert!(score >= previous);
            previous = score;
        }
        assert!(previous > 0.9);
    }

    #[test]
    fn test_dimension_mismatch_is_padded() {
        let bandit = small_bandit();
        let user = user();
        let item = Uuid::new_v4();
        // longer than the context: truncated rather than rejected
        bandit.update(item, &user, &[1.0; 32], 0.5);
        assert!(bandit.exploitation_score(&item, &user, &[]).is_some());
    }

    #[test]
    fn test_evict_idle_arms() {
        let bandit = small_bandit();
        bandit.update(Uuid::new_v4(), &user(), &[1.0], 1.0);
        assert_eq!(bandit.evict_idle(Utc::now()), 0);
        assert_eq!(bandit.evict_idle(Utc::now() + Duration::hours(200)), 1);
        assert_eq!(bandit.arm_count(), 0);
    }
}
