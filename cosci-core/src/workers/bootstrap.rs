//! Research plan initialisation from the free-text goal.

use crate::brain::Brain;
use crate::error::StageError;
use crate::extract::parse_block_as;
use crate::prompts;
use crate::state::{PlanConfig, ResearchState, StatePatch};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct Bootstrapper {
    brain: Brain,
}

impl Bootstrapper {
    pub fn new(brain: Brain) -> Self {
        Self { brain }
    }

    /// Derive a plan config when the state has none. A state that already
    /// has one gets an empty patch.
    pub async fn bootstrap(&self, state: &ResearchState) -> StatePatch {
        if !state.plan_config.is_empty() {
            return StatePatch::new();
        }
        let goal = state.goal.trim();
        if goal.is_empty() {
            warn!("Cannot initialise a research plan without a goal");
            return StatePatch::error(format!("Bootstrap: {}", StageError::MissingGoal));
        }

        let mut patch = StatePatch::new();
        let plan = match self.brain.invoke(&prompts::bootstrap_prompt(goal)).await {
            Ok(text) => match parse_block_as::<PlanConfig>(&text) {
                Ok(plan) => plan,
                Err(e) => {
                    warn!(error = %e, "Research plan could not be parsed");
                    patch.push_error(format!("Bootstrap parsing failed: {}", e));
                    PlanConfig::default()
                }
            },
            Err(e) => {
                warn!(error = %e, "Research plan request failed");
                patch.push_error(format!("Bootstrap request failed: {}", e));
                PlanConfig::default()
            }
        };
        info!(
            criteria = plan.evaluation_criteria.len(),
            constraints = plan.constraints.len(),
            "Research plan initialised"
        );
        patch.plan_config = Some(plan);
        patch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::MockLlmProvider;
    use std::sync::Arc;

    fn bootstrapper(provider: MockLlmProvider) -> Bootstrapper {
        Bootstrapper::new(Brain::new(Arc::new(provider), 0.2))
    }

    #[tokio::test]
    async fn test_bootstrap_parses_plan() {
        let provider = MockLlmProvider::new();
        provider.queue_response(
            r#"Plan: {"preferences": "mechanistic", "attributes": ["novel"], "constraints": ["in vitro only"], "evaluation_criteria": ["testability"], "domain_hint": "biology"}"#,
        );
        let patch = bootstrapper(provider)
            .bootstrap(&ResearchState::new("why do cells age"))
            .await;
        let plan = patch.plan_config.unwrap();
        assert_eq!(plan.preferences, "mechanistic");
        assert_eq!(plan.constraints, vec!["in vitro only".to_string()]);
        assert_eq!(plan.extra["domain_hint"], serde_json::json!("biology"));
        assert!(patch.errors.is_empty());
    }

    #[tokio::test]
    async fn test_bootstrap_missing_goal_is_noop() {
        let patch = bootstrapper(MockLlmProvider::new())
            .bootstrap(&ResearchState::new("  "))
            .await;
        assert!(patch.plan_config.is_none());
        assert_eq!(patch.errors.len(), 1);
        assert!(patch.errors[0].contains("research goal is empty"));
    }

    #[tokio::test]
    async fn test_bootstrap_parse_failure_uses_empty_plan() {
        let provider = MockLlmProvider::new();
        provider.queue_response("I cannot do that");
        let patch = bootstrapper(provider).bootstrap(&ResearchState::new("goal")).await;
        assert_eq!(patch.plan_config, Some(PlanConfig::default()));
        assert_eq!(patch.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_existing_plan_is_kept() {
        let mut state = ResearchState::new("goal");
        state.plan_config.preferences = "already set".into();
        let patch = bootstrapper(MockLlmProvider::new()).bootstrap(&state).await;
        assert!(patch.is_empty());
    }
}
