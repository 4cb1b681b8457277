//! Sharded dispatcher.
//!
//! Reflect and rank targets are split into shards, each shard runs against
//! its own snapshot of the state on a bounded [`WorkerPool`], and the shard
//! patches are merged in submission order once every worker has finished.
//! All other stages pass through as a single unsharded unit.

pub mod pool;
pub mod shard;

pub use pool::{PoolRun, WorkerPool};
pub use shard::{merge_shard_patches, partition};

use crate::config::DispatcherConfig;
use crate::decision::{Decision, ReviewDepth, StageParameters};
use crate::state::{HypothesisId, PoolReport, ResearchState, SchedulingReport, Stage, StatePatch};
use crate::tournament::Tournament;
use crate::workers::Reflector;
use std::collections::HashSet;
use tracing::{debug, info};

#[derive(Debug)]
pub struct Dispatcher {
    config: DispatcherConfig,
    reflector: Reflector,
    tournament: Tournament,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig, reflector: Reflector, tournament: Tournament) -> Self {
        Self {
            config,
            reflector,
            tournament,
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Schedule the work of `decision` against `state`.
    pub async fn dispatch(&self, state: &ResearchState, decision: &Decision) -> StatePatch {
        match decision.next_stage {
            Stage::Reflect => {
                let (targets, depth) = reflect_targets(state, &decision.parameters);
                self.run_sharded(state, Stage::Reflect, targets, depth).await
            }
            Stage::Rank => {
                let targets = rank_targets(state, &decision.parameters);
                self.run_sharded(state, Stage::Rank, targets, ReviewDepth::Standard)
                    .await
            }
            stage => forward(state, stage, decision),
        }
    }

    async fn run_sharded(
        &self,
        state: &ResearchState,
        stage: Stage,
        targets: Vec<HypothesisId>,
        depth: ReviewDepth,
    ) -> StatePatch {
        let shard_size = match stage {
            Stage::Rank => self.config.rank_shard_size,
            _ => self.config.reflect_shard_size,
        };
        let shards = partition(&targets, shard_size);
        let shard_sizes: Vec<usize> = shards.iter().map(Vec::len).collect();
        info!(
            stage = %stage,
            targets = targets.len(),
            shards = shards.len(),
            workers = self.config.worker_count,
            "Dispatching sharded stage"
        );

        let mut pool = WorkerPool::new(self.config.worker_count);
        for (index, shard) in shards.into_iter().enumerate() {
            debug!(stage = %stage, shard = index, size = shard.len(), "Submitting shard");
            let shard_state = state.clone();
            match stage {
                Stage::Rank => {
                    let tournament = self.tournament.clone();
                    pool.submit(async move { tournament.rank(&shard_state, &shard, index).await });
                }
                _ => {
                    let reflector = self.reflector.clone();
                    pool.submit(async move { reflector.review(&shard_state, &shard, depth).await });
                }
            }
        }

        let run = pool.run_until_empty().await;
        let report = PoolReport {
            workers: run.workers,
            jobs_submitted: run.jobs_submitted,
            jobs_completed: run.jobs_completed,
            shard_sizes,
        };
        let mut patch = merge_shard_patches(stage, run.results);
        if stage == Stage::Reflect && patch.reflection.is_none() {
            patch.reflection = Some(Default::default());
        }
        patch.scheduling = Some(SchedulingReport {
            stage,
            pool: report,
        });
        patch
    }
}

/// Priority ids that are still unreviewed, or every unreviewed hypothesis
/// when none of them qualify.
pub fn reflect_targets(
    state: &ResearchState,
    parameters: &StageParameters,
) -> (Vec<HypothesisId>, ReviewDepth) {
    let unreviewed = state.unreviewed_ids();
    let (priority, depth) = match parameters {
        StageParameters::Reflect(p) => (p.priority_hypothesis_ids.as_slice(), p.review_depth),
        _ => (&[][..], ReviewDepth::Standard),
    };
    let targets = filtered_or(priority, &unreviewed);
    (targets, depth)
}

/// Requested ids that are reviewed and unranked, or every such hypothesis
/// when none of them qualify.
pub fn rank_targets(state: &ResearchState, parameters: &StageParameters) -> Vec<HypothesisId> {
    let pending = state.rank_pending_ids();
    let requested = match parameters {
        StageParameters::Rank(p) => p.newly_reviewed_ids.as_slice(),
        _ => &[],
    };
    filtered_or(requested, &pending)
}

fn filtered_or(requested: &[HypothesisId], eligible: &[HypothesisId]) -> Vec<HypothesisId> {
    let allowed: HashSet<&str> = eligible.iter().map(String::as_str).collect();
    let mut seen = HashSet::new();
    let picked: Vec<HypothesisId> = requested
        .iter()
        .filter(|id| allowed.contains(id.as_str()) && seen.insert(id.as_str()))
        .cloned()
        .collect();
    if picked.is_empty() {
        eligible.to_vec()
    } else {
        picked
    }
}

/// Unsharded pass-through: state parameters overlaid with the decision's.
fn forward(state: &ResearchState, stage: Stage, decision: &Decision) -> StatePatch {
    let mut parameters = state.parameters.clone();
    parameters.extend(decision.parameters.to_map());
    debug!(stage = %stage, "Forwarding unsharded stage");
    StatePatch {
        parameters: Some(parameters),
        scheduling: Some(SchedulingReport {
            stage,
            pool: PoolReport::default(),
        }),
        ..Default::default()
    }
}
