//! Generation: new hypotheses, in standard or simulated-debate form.

use crate::brain::Brain;
use crate::decision::{DEFAULT_DEBATE_TURNS, GenerateParams, GenerationMode};
use crate::error::StageError;
use crate::prompts::{self, GenerationPrompt};
use crate::state::{Hypothesis, ResearchState, StatePatch};
use tracing::{debug, info, warn};

/// Number of top-rated hypotheses shown to the backend as context.
const CONTEXT_SIZE: usize = 3;

#[derive(Debug, Clone)]
pub struct Generator {
    brain: Brain,
}

impl Generator {
    pub fn new(brain: Brain) -> Self {
        Self { brain }
    }

    /// Generate `params.quantity` hypotheses (at least one). Each one is
    /// appended unreviewed and unranked at the initial rating; empty or
    /// failed outputs are skipped and logged.
    pub async fn generate(&self, state: &ResearchState, params: &GenerateParams) -> StatePatch {
        if state.goal.trim().is_empty() {
            warn!("Cannot generate hypotheses without a goal");
            return StatePatch::error(format!("Generation: {}", StageError::MissingGoal));
        }

        let mut context: Vec<&Hypothesis> = state.hypotheses.iter().collect();
        context.sort_by(|a, b| b.rating.total_cmp(&a.rating));
        context.truncate(CONTEXT_SIZE);

        let mode = params.generation_mode.unwrap_or(GenerationMode::Standard);
        let request = GenerationPrompt {
            goal: &state.goal,
            plan: &state.plan_config,
            focus_area: &params.focus_area,
            top_hypotheses: &context,
            meta_review: state.review_summary.as_ref().map(|s| s.critique_text()),
            mode,
            debate_turns: params.debate_max_turns.unwrap_or(DEFAULT_DEBATE_TURNS),
        };
        let prompt = prompts::generation_prompt(&request);
        debug!(prompt_chars = prompt.len(), ?mode, "Generation prompt built");

        let quantity = params.quantity.max(1);
        let mut patch = StatePatch::new();
        for index in 0..quantity {
            match self.brain.invoke(&prompt).await {
                Ok(text) if !text.trim().is_empty() => {
                    let hypothesis = Hypothesis::new(text.trim());
                    debug!(hypothesis_id = %hypothesis.short_id(), index, "Hypothesis generated");
                    patch.upserts.push(hypothesis);
                }
                Ok(_) => {
                    warn!(index, "Backend returned an empty hypothesis");
                    patch.push_error("Generation error: backend returned an empty hypothesis");
                }
                Err(e) => {
                    warn!(index, error = %e, "Generation request failed");
                    patch.push_error(format!("Generation error: {}", e));
                }
            }
        }
        info!(
            requested = quantity,
            generated = patch.upserts.len(),
            ?mode,
            "Generation complete"
        );
        patch
    }
}
