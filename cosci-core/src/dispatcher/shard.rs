//! Shard partitioning and deterministic merging of shard patches.

use crate::state::{HypothesisId, Stage, StatePatch};

/// Split `ids` into consecutive shards of at most `size` ids.
pub fn partition(ids: &[HypothesisId], size: usize) -> Vec<Vec<HypothesisId>> {
    ids.chunks(size.max(1)).map(<[HypothesisId]>::to_vec).collect()
}

/// Fold shard results in submission order.
///
/// A shard that produced no patch contributes an error entry instead.
pub fn merge_shard_patches(stage: Stage, results: Vec<Option<StatePatch>>) -> StatePatch {
    let mut merged = StatePatch::new();
    for (index, result) in results.into_iter().enumerate() {
        match result {
            Some(patch) => merged.absorb(patch),
            None => merged.push_error(format!("{} shard {} did not complete", stage, index)),
        }
    }
    if stage == Stage::Rank {
        merged.sort_by_rating = true;
    }
    merged
}
