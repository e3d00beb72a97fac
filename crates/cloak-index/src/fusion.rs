//! Weighted reciprocal rank fusion of a dense and a lexical ranking.

use std::collections::{BTreeMap, HashSet};

pub const DEFAULT_FUSION_K: f64 = 60.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusedHit {
    pub id: usize,
    pub score: f64,
}

/// Merge two ranked id lists.
///
/// An id at zero-based rank `r` earns `(1 - alpha) / (r + k)` from the dense list
/// and `alpha / (r + k)` from the lexical list; only its first occurrence in each
/// list counts. Ids whose total is not positive are dropped, the rest are ordered
/// by score with ties broken by lower id, and at most `top_k` are returned.
#[must_use]
pub fn fuse(dense: &[usize], lexical: &[usize], alpha: f64, k: f64, top_k: usize) -> Vec<FusedHit> {
    let mut totals: BTreeMap<usize, f64> = BTreeMap::new();
    accumulate(&mut totals, dense, 1.0 - alpha, k);
    accumulate(&mut totals, lexical, alpha, k);

    let mut hits: Vec<FusedHit> = totals
        .into_iter()
        .filter(|(_, score)| *score > 0.0)
        .map(|(id, score)| FusedHit { id, score })
        .collect();
    hits.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.id.cmp(&b.id)));
    hits.truncate(top_k);
    hits
}

fn accumulate(totals: &mut BTreeMap<usize, f64>, ranked: &[usize], weight: f64, k: f64) {
    let mut seen = HashSet::with_capacity(ranked.len());
    for (rank, &id) in ranked.iter().enumerate() {
        if !seen.insert(id) {
            continue;
        }
        #[allow(clippy::cast_precision_loss)]
        let contribution = weight / (rank as f64 + k);
        *totals.entry(id).or_insert(0.0) += contribution;
    }
}
