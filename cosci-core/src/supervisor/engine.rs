//! Supervisor: the policy engine driving the research loop.

use super::metrics::{BaseStatistics, EnhancedMetrics, ResearchPhase};
use super::precedence::validate_precedence;
use crate::brain::Brain;
use crate::config::{PrecedenceMode, SupervisorConfig};
use crate::decision::{
    DEFAULT_DEBATE_TURNS, Decision, GenerationMode, RawDecision, StageParameters, TerminateParams,
    TerminationReason,
};
use crate::error::{ParseError, SupervisorError};
use crate::extract::parse_block_as;
use crate::prompts;
use crate::state::{DecisionRecord, ResearchState, Stage, StatePatch};
use serde_json::Value;
use tracing::{debug, info, warn};

/// Diversity below which generation defaults to the debate format.
const DEBATE_DIVERSITY_THRESHOLD: f64 = 0.35;
/// Stagnation risk at or above which generation defaults to the debate format.
const DEBATE_STAGNATION_THRESHOLD: f64 = 0.6;

type ValidDecision = (Stage, StageParameters, String, Value);

/// Chooses the next stage each round and keeps the run bookkeeping.
#[derive(Debug, Clone)]
pub struct Supervisor {
    brain: Brain,
    config: SupervisorConfig,
}

impl Supervisor {
    pub fn new(brain: Brain, config: SupervisorConfig) -> Self {
        Self { brain, config }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Decide the next stage for `state`.
    ///
    /// The returned patch carries the decision, the flattened parameters, the
    /// updated run metadata and any precedence diagnostic. Fails only when the
    /// backend cannot produce a valid decision within the configured attempts.
    pub async fn decide(&self, state: &ResearchState) -> Result<StatePatch, SupervisorError> {
        let mut meta = state.run_metadata.clone();

        if meta.iteration_count >= self.config.max_iterations {
            info!(
                iteration = meta.iteration_count,
                cap = self.config.max_iterations,
                "Iteration cap reached, terminating"
            );
            return Ok(self.cap_decision(state));
        }

        let current_top = state.top_rating();
        if let Some(last) = meta.decision_history.last_mut()
            && last.post_top_rating.is_none()
        {
            last.post_top_rating = Some(current_top);
        }

        let stats = BaseStatistics::compute(state);
        let metrics = EnhancedMetrics::compute(&state.hypotheses, &stats, &meta.decision_history);
        debug!(
            phase = %metrics.research_phase,
            diversity = metrics.hypothesis_diversity,
            momentum = metrics.discovery_momentum,
            stagnation = metrics.stagnation_risk,
            "Computed progress metrics"
        );

        let summary = state.review_summary.as_ref().map(|s| s.critique_text());
        let prompt = prompts::supervisor_prompt(
            &state.goal,
            &state.plan_config,
            &stats,
            &metrics,
            &state.hypotheses,
            summary.as_deref(),
            self.config.max_iterations,
        );
        let (chosen, parameters, rationale, strategic_context) =
            self.request_decision(&prompt).await?;

        let mut errors = Vec::new();
        let mut precedence_warning = None;
        let (stage, parameters) = match validate_precedence(chosen, &stats) {
            Some(violation) => {
                let message = violation.to_string();
                warn!(
                    chosen = %violation.chosen,
                    suggested = %violation.suggested,
                    mode = %self.config.precedence_mode,
                    "Stage precedence violated"
                );
                errors.push(message.clone());
                precedence_warning = Some(message);
                match self.config.precedence_mode {
                    PrecedenceMode::Advisory => (chosen, parameters),
                    PrecedenceMode::Enforce => (
                        violation.suggested,
                        StageParameters::derived(violation.suggested, state),
                    ),
                }
            }
            None => (chosen, parameters),
        };
        let parameters = with_generation_defaults(parameters, &metrics);

        // Compared against the previous round's top, not the best ever seen.
        if stats.top_rating > meta.top_rating {
            meta.iterations_since_improvement = 0;
        } else {
            meta.iterations_since_improvement += 1;
        }
        meta.top_rating = stats.top_rating;
        meta.previous_review_count = stats.total_reviews;
        meta.decision_history.push(DecisionRecord {
            iteration: meta.iteration_count,
            action: stage,
            pre_top_rating: stats.top_rating,
            post_top_rating: None,
        });
        meta.iteration_count += 1;
        meta.last_stage = Some(stage);

        info!(
            iteration = meta.iteration_count,
            stage = %stage,
            top_rating = stats.top_rating,
            "Supervisor decision"
        );

        let decision = Decision {
            next_stage: stage,
            parameters: parameters.clone(),
            rationale,
            statistics: stats,
            enhanced_statistics: metrics,
            strategic_context,
            iteration: meta.iteration_count,
            precedence_warning,
        };
        Ok(StatePatch {
            parameters: Some(parameters.to_map()),
            next_stage: Some(stage),
            decision: Some(decision),
            run_metadata: Some(meta),
            errors,
            ..Default::default()
        })
    }

    fn cap_decision(&self, state: &ResearchState) -> StatePatch {
        let stats = BaseStatistics::compute(state);
        let metrics = EnhancedMetrics::compute(
            &state.hypotheses,
            &stats,
            &state.run_metadata.decision_history,
        );
        let parameters = StageParameters::Terminate(TerminateParams {
            reason: TerminationReason::IterationLimit,
            final_hypothesis_id: state.top_hypothesis().map(|h| h.id.clone()),
        });
        let decision = Decision {
            next_stage: Stage::Terminate,
            parameters: parameters.clone(),
            rationale: format!(
                "Iteration limit of {} reached",
                self.config.max_iterations
            ),
            statistics: stats,
            enhanced_statistics: metrics,
            strategic_context: Value::Null,
            iteration: state.run_metadata.iteration_count,
            precedence_warning: None,
        };
        StatePatch {
            parameters: Some(parameters.to_map()),
            next_stage: Some(Stage::Terminate),
            decision: Some(decision),
            ..Default::default()
        }
    }

    /// Ask the backend for a decision, retrying with a corrective prefix.
    async fn request_decision(&self, prompt: &str) -> Result<ValidDecision, SupervisorError> {
        let attempts = self.config.max_decision_attempts.max(1);
        let mut current = prompt.to_string();
        let mut last_error = ParseError::NoStructuredBlock;

        for attempt in 1..=attempts {
            let text = match self.brain.invoke(&current).await {
                Ok(text) => text,
                Err(source) => {
                    warn!(attempt, error = %source, "Supervisor backend call failed");
                    if attempt == attempts {
                        return Err(SupervisorError::Backend { attempts, source });
                    }
                    continue;
                }
            };
            match parse_decision(&text) {
                Ok(decision) => return Ok(decision),
                Err(e) => {
                    warn!(attempt, error = %e, "Supervisor returned an invalid decision");
                    current = prompts::corrective_prompt(&e.to_string(), prompt);
                    last_error = e;
                }
            }
        }
        Err(SupervisorError::InvalidDecision {
            attempts,
            source: last_error,
        })
    }
}

/// Extract and validate a decision block from backend text.
pub fn parse_decision(text: &str) -> Result<ValidDecision, ParseError> {
    parse_block_as::<RawDecision>(text)?.validate()
}

/// Fill in the generation mode and debate budget when the backend left them out.
fn with_generation_defaults(parameters: StageParameters, metrics: &EnhancedMetrics) -> StageParameters {
    match parameters {
        StageParameters::Generate(mut p) => {
            if p.generation_mode.is_none() {
                let debate = metrics.research_phase == ResearchPhase::Exploratory
                    || metrics.hypothesis_diversity < DEBATE_DIVERSITY_THRESHOLD
                    || metrics.stagnation_risk >= DEBATE_STAGNATION_THRESHOLD;
                p.generation_mode = Some(if debate {
                    GenerationMode::Debate
                } else {
                    GenerationMode::Standard
                });
            }
            p.debate_max_turns.get_or_insert(DEFAULT_DEBATE_TURNS);
            StageParameters::Generate(p)
        }
        other => other,
    }
}
