//! Evolution: derive one new hypothesis from existing ones.

use crate::brain::Brain;
use crate::decision::{EvolutionStrategy, EvolveParams};
use crate::error::StageError;
use crate::prompts;
use crate::state::{EvolutionType, Hypothesis, ResearchState, StatePatch};
use tracing::{info, warn};

/// Inspirations / avoid-list size for analogical evolution.
const ANALOGY_POOL: usize = 3;

#[derive(Debug, Clone)]
pub struct Evolver {
    brain: Brain,
}

impl Evolver {
    pub fn new(brain: Brain) -> Self {
        Self { brain }
    }

    /// Run one evolution strategy. On success the patch prepends exactly
    /// one new, unreviewed hypothesis.
    pub async fn evolve(&self, state: &ResearchState, params: &EvolveParams) -> StatePatch {
        let mut patch = StatePatch::new();
        if state.hypotheses.is_empty() {
            patch.push_error(format!("Evolution: {}", StageError::NoHypotheses));
            return patch;
        }

        let mut targets = Vec::new();
        for id in &params.target_hypothesis_ids {
            match state.hypothesis(id) {
                Some(h) => targets.push(h),
                None => {
                    warn!(hypothesis_id = %id, "Unknown evolution target");
                    patch.push_error(format!(
                        "Evolution: {}",
                        StageError::UnknownHypothesis { id: id.clone() }
                    ));
                }
            }
        }

        let result = match params.strategy {
            EvolutionStrategy::Refine => self.refine(state, &targets).await,
            EvolutionStrategy::Combine => self.combine(state, &targets).await,
            EvolutionStrategy::Analogical => self.analogize(state, &targets).await,
        };

        match result {
            Ok(evolved) => {
                info!(
                    strategy = params.strategy.as_str(),
                    parents = evolved.evolved_from.len(),
                    hypothesis_id = %evolved.short_id(),
                    "Hypothesis evolved"
                );
                patch.prepend.push(evolved);
            }
            Err(message) => {
                warn!(strategy = params.strategy.as_str(), error = %message, "Evolution failed");
                patch.push_error(format!("Evolution error: {}", message));
            }
        }
        patch
    }

    async fn refine(
        &self,
        state: &ResearchState,
        targets: &[&Hypothesis],
    ) -> Result<Hypothesis, String> {
        let Some(&target) = targets.first() else {
            return Err(missing_targets(EvolutionStrategy::Refine, 1, 0));
        };
        let weakness = self
            .brain
            .invoke(&prompts::weakness_prompt(&state.goal, target))
            .await
            .map_err(|e| e.to_string())?;
        let text = self
            .brain
            .invoke(&prompts::refine_prompt(&state.goal, target, weakness.trim()))
            .await
            .map_err(|e| e.to_string())?;
        evolved(text, [target], EvolutionType::Refinement)
    }

    async fn combine(
        &self,
        state: &ResearchState,
        targets: &[&Hypothesis],
    ) -> Result<Hypothesis, String> {
        let [first, second, ..] = targets else {
            return Err(missing_targets(EvolutionStrategy::Combine, 2, targets.len()));
        };
        let text = self
            .brain
            .invoke(&prompts::combine_prompt(&state.goal, first, second))
            .await
            .map_err(|e| e.to_string())?;
        evolved(text, [*first, *second], EvolutionType::Combination)
    }

    async fn analogize(
        &self,
        state: &ResearchState,
        targets: &[&Hypothesis],
    ) -> Result<Hypothesis, String> {
        let mut by_rating: Vec<&Hypothesis> = state.hypotheses.iter().collect();
        by_rating.sort_by(|a, b| b.rating.total_cmp(&a.rating));

        let inspirations: Vec<&Hypothesis> = if targets.is_empty() {
            by_rating.iter().take(ANALOGY_POOL).copied().collect()
        } else {
            targets.iter().take(ANALOGY_POOL).copied().collect()
        };
        let avoid: Vec<&Hypothesis> = by_rating.iter().rev().take(ANALOGY_POOL).copied().collect();

        let text = self
            .brain
            .invoke(&prompts::analogical_prompt(&state.goal, &inspirations, &avoid))
            .await
            .map_err(|e| e.to_string())?;
        evolved(text, inspirations, EvolutionType::Analogical)
    }
}

fn missing_targets(strategy: EvolutionStrategy, required: usize, got: usize) -> String {
    StageError::MissingTargets {
        strategy: strategy.as_str().to_string(),
        required,
        got,
    }
    .to_string()
}

fn evolved<'a>(
    text: String,
    parents: impl IntoIterator<Item = &'a Hypothesis>,
    evolution_type: EvolutionType,
) -> Result<Hypothesis, String> {
    let content = text.trim();
    if content.is_empty() {
        return Err("backend returned an empty hypothesis".to_string());
    }
    Ok(Hypothesis::evolved(
        content,
        parents.into_iter().map(|h| h.id.clone()),
        evolution_type,
    ))
}
