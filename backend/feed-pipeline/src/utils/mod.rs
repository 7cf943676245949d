// Utility functions for feed-pipeline

use crate::models::{Candidate, Placement, UserContext};
use ndarray::Array1;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::cmp::Ordering;

/// Deterministic RNG when a seed is configured, entropy-seeded otherwise.
///
/// `stream` separates components sharing one configured seed.
pub fn seeded_rng(seed: Option<u64>, stream: u64) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(stream)),
        None => StdRng::from_entropy(),
    }
}

/// Cosine similarity between two fingerprints.
///
/// Returns 0.0 on length mismatch, empty input or a zero-norm vector.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Element-wise mean of a set of fingerprints.
///
/// Vectors whose length differs from the first one are ignored.
pub fn centroid<V: AsRef<[f32]>>(vectors: &[V]) -> Option<Vec<f32>> {
    let dim = vectors.first()?.as_ref().len();
    if dim == 0 {
        return None;
    }

    let mut sum = vec![0.0f32; dim];
    let mut count = 0usize;
    for v in vectors.iter().map(AsRef::as_ref).filter(|v| v.len() == dim) {
        for (acc, x) in sum.iter_mut().zip(v) {
            *acc += x;
        }
        count += 1;
    }

    let n = count as f32;
    Some(sum.into_iter().map(|s| s / n).collect())
}

/// Mean cosine similarity over all unordered pairs (0.0 with fewer than 2 vectors)
pub fn mean_pairwise_similarity<V: AsRef<[f32]>>(vectors: &[V]) -> f64 {
    let mut total = 0.0f64;
    let mut pairs = 0usize;
    for i in 0..vectors.len() {
        for j in (i + 1)..vectors.len() {
            total += cosine_similarity(vectors[i].as_ref(), vectors[j].as_ref()) as f64;
            pairs += 1;
        }
    }

    if pairs == 0 {
        0.0
    } else {
        total / pairs as f64
    }
}

/// Mean cosine similarity of each vector to the centroid of the set
pub fn mean_similarity_to_centroid<V: AsRef<[f32]>>(vectors: &[V]) -> Option<(Vec<f32>, f64)> {
    let center = centroid(vectors)?;
    let total: f64 = vectors
        .iter()
        .map(|v| cosine_similarity(v.as_ref(), &center) as f64)
        .sum();
    let mean = total / vectors.len() as f64;
    Some((center, mean))
}

fn by_score_desc(a: &Candidate, b: &Candidate) -> Ordering {
    b.composite_score
        .partial_cmp(&a.composite_score)
        .unwrap_or(Ordering::Equal)
}

/// Stable descending re-sort by composite score.
///
/// Entries with a reserved placement keep their index; ranked entries are
/// reordered among the remaining slots.
pub fn rerank(candidates: &mut [Candidate]) {
    let slots: Vec<usize> = candidates
        .iter()
        .enumerate()
        .filter(|(_, c)| !c.placement.is_reserved())
        .map(|(i, _)| i)
        .collect();

    if slots.len() == candidates.len() {
        candidates.sort_by(by_score_desc);
        return;
    }
    if slots.len() < 2 {
        return;
    }

    let mut ranked: Vec<Candidate> = slots.iter().map(|&i| candidates[i].clone()).collect();
    ranked.sort_by(by_score_desc);
    for (slot, candidate) in slots.into_iter().zip(ranked) {
        candidates[slot] = candidate;
    }
}

/// Move ranked entries into fixed slots, keeping the list length.
///
/// `moves` pairs a current index with a target slot. Reserved entries keep
/// their index, a target past the end or already taken is skipped (the
/// entry stays ranked), and the remaining entries fill the free slots in
/// their current order. Returns how many entries were placed.
pub fn place_in_slots(
    candidates: &mut Vec<Candidate>,
    moves: &[(usize, usize)],
    placement: Placement,
) -> usize {
    let n = candidates.len();
    let mut taken: Vec<bool> = candidates.iter().map(|c| c.placement.is_reserved()).collect();
    let mut target: Vec<Option<usize>> = vec![None; n];

    let mut placed = 0;
    for &(from, slot) in moves {
        if from >= n || slot >= n || taken[slot] || target[from].is_some() {
            continue;
        }
        if candidates[from].placement.is_reserved() {
            continue;
        }
        taken[slot] = true;
        target[from] = Some(slot);
        placed += 1;
    }
    if placed == 0 {
        return 0;
    }

    let mut slots: Vec<Option<Candidate>> = (0..n).map(|_| None).collect();
    let mut rest = Vec::with_capacity(n);
    for (i, mut candidate) in candidates.drain(..).enumerate() {
        if candidate.placement.is_reserved() {
            slots[i] = Some(candidate);
        } else if let Some(slot) = target[i] {
            candidate.placement = placement;
            slots[slot] = Some(candidate);
        } else {
            rest.push(candidate);
        }
    }

    let mut rest = rest.into_iter();
    for slot in slots.iter_mut().filter(|s| s.is_none()) {
        *slot = rest.next();
    }
    candidates.extend(slots.into_iter().flatten());
    placed
}

/// True when the ranked entries are non-increasing by composite score
pub fn is_ranked_order(candidates: &[Candidate]) -> bool {
    let scores: Vec<f64> = candidates
        .iter()
        .filter(|c| !c.placement.is_reserved())
        .map(|c| c.composite_score)
        .collect();
    scores.windows(2).all(|w| w[0] >= w[1])
}

/// Bandit context: short, mid and long embeddings each zero-padded or
/// truncated to their block width, then the fingerprint, with the whole
/// vector padded or truncated to `dim`.
///
/// Fixed blocks keep the fingerprint at the same coordinates whether or not
/// a user embedding is missing.
pub fn build_context(
    user: &UserContext,
    fingerprint: &[f32],
    widths: &[usize; 3],
    dim: usize,
) -> Array1<f64> {
    let mut context = Array1::<f64>::zeros(dim);
    let blocks = [
        user.short_term.as_slice(),
        user.mid_term.as_slice(),
        user.long_term.as_slice(),
    ];

    let mut offset = 0;
    for (block, &width) in blocks.iter().zip(widths.iter()) {
        for (i, &v) in block.iter().take(width).enumerate() {
            if offset + i >= dim {
                break;
            }
            context[offset + i] = v as f64;
        }
        offset += width;
    }
    for (i, &v) in fingerprint.iter().enumerate() {
        if offset + i >= dim {
            break;
        }
        context[offset + i] = v as f64;
    }
    context
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Placement;
    use uuid::Uuid;

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_centroid_and_pairwise() {
        let vectors = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        let c = centroid(&vectors).unwrap();
        assert_eq!(c, vec![0.5, 0.5]);

        assert!(mean_pairwise_similarity(&vectors).abs() < 1e-6);
        assert_eq!(mean_pairwise_similarity(&vectors[..1]), 0.0);

        let empty: Vec<Vec<f32>> = Vec::new();
        assert!(centroid(&empty).is_none());
    }

    #[test]
    fn test_rerank_keeps_reserved_slots() {
        let mut list: Vec<Candidate> = [0.1, 0.9, 0.5, 0.7]
            .iter()
            .map(|&s| Candidate::new(Uuid::new_v4(), vec![1.0], s))
            .collect();
        list[1].placement = Placement::Novelty;
        let pinned = list[1].item_id;

        rerank(&mut list);

        assert_eq!(list[1].item_id, pinned);
        let ranked: Vec<f64> = list
            .iter()
            .filter(|c| c.placement == Placement::Ranked)
            .map(|c| c.composite_score)
            .collect();
        assert_eq!(ranked, vec![0.7, 0.5, 0.1]);
        assert!(is_ranked_order(&list));
    }

    #[test]
    fn test_build_context_pads_and_truncates() {
        let user = UserContext::new(Uuid::new_v4()).with_embeddings(
            vec![1.0, 2.0],
            vec![3.0],
            vec![],
        );
        let widths = [2, 2, 2];

        let padded = build_context(&user, &[4.0], &widths, 8);
        assert_eq!(padded.to_vec(), vec![1.0, 2.0, 3.0, 0.0, 0.0, 0.0, 4.0, 0.0]);

        let truncated = build_context(&user, &[4.0, 5.0], &widths, 3);
        assert_eq!(truncated.to_vec(), vec![1.0, 2.0, 3.0]);

        // oversized embeddings are cut to their block
        let wide = UserContext::new(Uuid::new_v4()).with_embeddings(vec![9.0; 5], vec![], vec![]);
        let context = build_context(&wide, &[4.0], &widths, 7);
        assert_eq!(context.to_vec(), vec![9.0, 9.0, 0.0, 0.0, 0.0, 0.0, 4.0]);
    }

    #[test]
    fn test_fingerprint_position_independent_of_missing_embeddings() {
        let widths = [3, 3, 3];
        let full = UserContext::new(Uuid::new_v4()).with_embeddings(
            vec![0.1; 3],
            vec![0.2; 3],
            vec![0.3; 3],
        );
        let cold = UserContext::new(Uuid::new_v4());

        let a = build_context(&full, &[1.0, 2.0], &widths, 12);
        let b = build_context(&cold, &[1.0, 2.0], &widths, 12);
        assert_eq!(a.slice(ndarray::s![9..]).to_vec(), vec![1.0, 2.0, 0.0]);
        assert_eq!(b.slice(ndarray::s![9..]).to_vec(), vec![1.0, 2.0, 0.0]);
        assert!(b.slice(ndarray::s![..9]).iter().all(|v| *v == 0.0));
    }
}
