//! Reciprocal rank fusion.
//!
//! A candidate at 1-based rank `r` in a list with weight `w` contributes
//! `w / (kappa + r)`; contributions are summed per chunk. Raw retriever scores
//! are ignored, only ranks matter.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use hybridrag_core::config::FusionConfig;
use hybridrag_core::types::{Candidate, ChunkId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedCandidate {
    pub chunk_id: ChunkId,
    pub score: f64,
    pub lexical_rank: Option<usize>,
    pub vector_rank: Option<usize>,
}

impl FusedCandidate {
    pub fn in_both(&self) -> bool { self.lexical_rank.is_some() && self.vector_rank.is_some() }

    pub fn min_rank(&self) -> usize {
        match (self.lexical_rank, self.vector_rank) {
            (Some(a), Some(b)) => a.min(b),
            (Some(a), None) | (None, Some(a)) => a,
            (None, None) => usize::MAX,
        }
    }
}

/// Score descending, then present-in-both first, then lower best rank, then chunk id.
pub fn fused_order(a: &FusedCandidate, b: &FusedCandidate) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.in_both().cmp(&a.in_both()))
        .then_with(|| a.min_rank().cmp(&b.min_rank()))
        .then_with(|| a.chunk_id.cmp(&b.chunk_id))
}

/// Fuse a lexical and a vector ranking and keep the top `cfg.width`.
///
/// A chunk repeated within one list counts at its first (best) rank only.
/// With one list empty the result is that list re-scored by RRF, order kept.
#[allow(clippy::cast_precision_loss)]
pub fn reciprocal_rank_fusion(lexical: &[Candidate], vector: &[Candidate], cfg: &FusionConfig) -> Vec<FusedCandidate> {
    let mut fused: BTreeMap<ChunkId, FusedCandidate> = BTreeMap::new();
    let lists = [(lexical, cfg.lexical_weight, true), (vector, cfg.vector_weight, false)];
    for (list, weight, is_lexical) in lists {
        for (i, cand) in list.iter().enumerate() {
            let rank = i + 1;
            let entry = fused.entry(cand.chunk_id).or_insert_with(|| FusedCandidate {
                chunk_id: cand.chunk_id,
                score: 0.0,
                lexical_rank: None,
                vector_rank: None,
            });
            let slot = if is_lexical { &mut entry.lexical_rank } else { &mut entry.vector_rank };
            if slot.is_some() {
                continue;
            }
            *slot = Some(rank);
            entry.score += weight / (cfg.kappa + rank as f64);
        }
    }
    let mut out: Vec<FusedCandidate> = fused.into_values().collect();
    out.sort_by(fused_order);
    out.truncate(cfg.width);
    out
}
