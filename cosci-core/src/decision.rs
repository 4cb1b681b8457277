//! Supervisor decisions and the typed parameter schema of each stage.

use crate::error::ParseError;
use crate::state::{HypothesisId, ResearchState, Stage};
use crate::supervisor::metrics::{BaseStatistics, EnhancedMetrics};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Default debate turn budget when the supervisor does not set one.
pub const DEFAULT_DEBATE_TURNS: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationMode {
    Standard,
    Debate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerateParams {
    pub quantity: u32,
    pub focus_area: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_mode: Option<GenerationMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debate_max_turns: Option<u32>,
}

impl Default for GenerateParams {
    fn default() -> Self {
        Self {
            quantity: 1,
            focus_area: String::new(),
            generation_mode: None,
            debate_max_turns: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDepth {
    #[default]
    Standard,
    Deep,
    DeepVerification,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReflectParams {
    pub priority_hypothesis_ids: Vec<HypothesisId>,
    pub review_depth: ReviewDepth,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankParams {
    pub newly_reviewed_ids: Vec<HypothesisId>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvolutionStrategy {
    Refine,
    Combine,
    #[default]
    #[serde(alias = "analogize")]
    Analogical,
}

impl EvolutionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvolutionStrategy::Refine => "refine",
            EvolutionStrategy::Combine => "combine",
            EvolutionStrategy::Analogical => "analogical",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvolveParams {
    pub target_hypothesis_ids: Vec<HypothesisId>,
    pub strategy: EvolutionStrategy,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetaReviewScope {
    #[default]
    FullHistory,
    #[serde(rename = "last_3_iterations")]
    Last3Iterations,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetaReviewFocus {
    #[default]
    IdentifyPatterns,
    SuggestNewDirections,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetaReviewParams {
    pub scope: MetaReviewScope,
    pub focus: MetaReviewFocus,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    IterationLimit,
    BreakthroughAchieved,
    StagnationLimit,
    #[default]
    UserRequested,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminateParams {
    pub reason: TerminationReason,
    pub final_hypothesis_id: Option<HypothesisId>,
}

/// Parameters of a decision, typed by stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageParameters {
    Generate(GenerateParams),
    Reflect(ReflectParams),
    Rank(RankParams),
    Evolve(EvolveParams),
    MetaReview(MetaReviewParams),
    Terminate(TerminateParams),
}

impl StageParameters {
    /// Validate a raw parameter object against the schema of `stage`.
    pub fn parse(stage: Stage, raw: &Value) -> Result<Self, ParseError> {
        match raw {
            Value::Object(map) if !map.is_empty() => {}
            _ => return Err(ParseError::EmptyParameters),
        }
        let mismatch = |e: serde_json::Error| ParseError::SchemaMismatch {
            stage: stage.to_string(),
            message: e.to_string(),
        };
        let raw = raw.clone();
        Ok(match stage {
            Stage::Generate => StageParameters::Generate(serde_json::from_value(raw).map_err(mismatch)?),
            Stage::Reflect => StageParameters::Reflect(serde_json::from_value(raw).map_err(mismatch)?),
            Stage::Rank => StageParameters::Rank(serde_json::from_value(raw).map_err(mismatch)?),
            Stage::Evolve => StageParameters::Evolve(serde_json::from_value(raw).map_err(mismatch)?),
            Stage::MetaReview => {
                StageParameters::MetaReview(serde_json::from_value(raw).map_err(mismatch)?)
            }
            Stage::Terminate => {
                StageParameters::Terminate(serde_json::from_value(raw).map_err(mismatch)?)
            }
        })
    }

    /// Parameters for `stage` derived from the state alone, used when the
    /// supervisor overrides the backend's choice.
    pub fn derived(stage: Stage, state: &ResearchState) -> Self {
        match stage {
            Stage::Generate => StageParameters::Generate(GenerateParams::default()),
            Stage::Reflect => StageParameters::Reflect(ReflectParams {
                priority_hypothesis_ids: state.unreviewed_ids(),
                review_depth: ReviewDepth::Standard,
            }),
            Stage::Rank => StageParameters::Rank(RankParams {
                newly_reviewed_ids: state.rank_pending_ids(),
            }),
            Stage::Evolve => StageParameters::Evolve(EvolveParams::default()),
            Stage::MetaReview => StageParameters::MetaReview(MetaReviewParams::default()),
            Stage::Terminate => StageParameters::Terminate(TerminateParams {
                reason: TerminationReason::UserRequested,
                final_hypothesis_id: state.top_hypothesis().map(|h| h.id.clone()),
            }),
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            StageParameters::Generate(_) => Stage::Generate,
            StageParameters::Reflect(_) => Stage::Reflect,
            StageParameters::Rank(_) => Stage::Rank,
            StageParameters::Evolve(_) => Stage::Evolve,
            StageParameters::MetaReview(_) => Stage::MetaReview,
            StageParameters::Terminate(_) => Stage::Terminate,
        }
    }

    /// Flat JSON object form, as stored in `ResearchState::parameters`.
    pub fn to_map(&self) -> Map<String, Value> {
        let value = match self {
            StageParameters::Generate(p) => serde_json::to_value(p),
            StageParameters::Reflect(p) => serde_json::to_value(p),
            StageParameters::Rank(p) => serde_json::to_value(p),
            StageParameters::Evolve(p) => serde_json::to_value(p),
            StageParameters::MetaReview(p) => serde_json::to_value(p),
            StageParameters::Terminate(p) => serde_json::to_value(p),
        };
        match value {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

/// Shape of the backend's decision block before validation.
#[derive(Debug, Clone, Deserialize)]
pub struct RawDecision {
    #[serde(alias = "next_task", alias = "stage")]
    pub next_stage: Option<String>,
    #[serde(default)]
    pub parameters: Value,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub strategic_context: Value,
}

impl RawDecision {
    /// Resolve the stage and validate its parameters.
    pub fn validate(self) -> Result<(Stage, StageParameters, String, Value), ParseError> {
        let stage_name = self.next_stage.ok_or_else(|| ParseError::MissingField {
            field: "next_stage".to_string(),
        })?;
        let stage: Stage = stage_name
            .parse()
            .map_err(|stage| ParseError::UnknownStage { stage })?;
        let parameters = StageParameters::parse(stage, &self.parameters)?;
        Ok((stage, parameters, self.rationale, self.strategic_context))
    }
}

/// The policy engine's choice for one round. Holds no reference to the state
/// it was computed from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub next_stage: Stage,
    pub parameters: StageParameters,
    pub rationale: String,
    pub statistics: BaseStatistics,
    pub enhanced_statistics: EnhancedMetrics,
    #[serde(default)]
    pub strategic_context: Value,
    pub iteration: u32,
    /// Precedence diagnostic, when the chosen stage broke stage order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precedence_warning: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_generate_params() {
        let params = StageParameters::parse(
            Stage::Generate,
            &json!({"quantity": 3, "focus_area": "mechanisms"}),
        )
        .unwrap();
        match params {
            StageParameters::Generate(p) => {
                assert_eq!(p.quantity, 3);
                assert_eq!(p.focus_area, "mechanisms");
                assert_eq!(p.generation_mode, None);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_empty_parameters() {
        assert_eq!(
            StageParameters::parse(Stage::Rank, &json!({})),
            Err(ParseError::EmptyParameters)
        );
        assert_eq!(
            StageParameters::parse(Stage::Rank, &Value::Null),
            Err(ParseError::EmptyParameters)
        );
    }

    #[test]
    fn test_parse_rejects_schema_mismatch() {
        let err = StageParameters::parse(Stage::Evolve, &json!({"strategy": "mutate"})).unwrap_err();
        assert!(matches!(err, ParseError::SchemaMismatch { ref stage, .. } if stage == "evolve"));
    }

    #[test]
    fn test_analogize_alias() {
        let params =
            StageParameters::parse(Stage::Evolve, &json!({"strategy": "analogize"})).unwrap();
        assert_eq!(
            params,
            StageParameters::Evolve(EvolveParams {
                target_hypothesis_ids: vec![],
                strategy: EvolutionStrategy::Analogical,
            })
        );
    }

    #[test]
    fn test_meta_review_scope_names() {
        let params = StageParameters::parse(
            Stage::MetaReview,
            &json!({"scope": "last_3_iterations", "focus": "suggest_new_directions"}),
        )
        .unwrap();
        let map = params.to_map();
        assert_eq!(map["scope"], json!("last_3_iterations"));
        assert_eq!(map["focus"], json!("suggest_new_directions"));
    }

    #[test]
    fn test_raw_decision_accepts_next_task_key() {
        let raw: RawDecision = serde_json::from_value(json!({
            "next_task": "reflect",
            "parameters": {"review_depth": "deep"},
            "rationale": "pending reviews"
        }))
        .unwrap();
        let (stage, params, rationale, _) = raw.validate().unwrap();
        assert_eq!(stage, Stage::Reflect);
        assert_eq!(params.stage(), Stage::Reflect);
        assert_eq!(rationale, "pending reviews");
    }

    #[test]
    fn test_raw_decision_unknown_stage() {
        let raw: RawDecision = serde_json::from_value(json!({
            "next_stage": "literature_search",
            "parameters": {"x": 1}
        }))
        .unwrap();
        assert!(matches!(raw.validate(), Err(ParseError::UnknownStage { .. })));
    }

    #[test]
    fn test_derived_parameters_follow_state() {
        let mut state = ResearchState::new("goal");
        state.hypotheses.push(crate::state::Hypothesis::new("a"));
        match StageParameters::derived(Stage::Reflect, &state) {
            StageParameters::Reflect(p) => assert_eq!(p.priority_hypothesis_ids.len(), 1),
            other => panic!("unexpected {:?}", other),
        }
    }
}
