//! Shared research state and the patch-merge contract.
//!
//! Stages never mutate `ResearchState` directly. Each returns a `StatePatch`
//! and the router applies it with `ResearchState::apply`. Per-field rules:
//!
//! | field                      | rule                                                   |
//! |----------------------------|--------------------------------------------------------|
//! | `upserts`                  | union by id, last write wins; unknown ids appended     |
//! | `prepend`                  | new hypotheses inserted at the front, in order         |
//! | `sort_by_rating`           | stable re-sort, highest rating first                   |
//! | `plan_config`, `observations`, `review_summary`, `decision`, `next_stage`, `parameters`, `run_metadata` | replace when present |
//! | `reflection`, `scheduling` | overlay onto `run_metadata`                            |
//! | `errors`                   | append                                                 |
//!
//! `is_reviewed` and `is_ranked` only ever go from `false` to `true`; a write
//! carrying `false` for a flag that is already set keeps it set.

use crate::decision::{Decision, MetaReviewFocus, MetaReviewScope};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use uuid::Uuid;

/// Hypothesis identifier (UUID v4 string).
pub type HypothesisId = String;

/// Rating every new hypothesis starts from.
pub const INITIAL_RATING: f64 = 1200.0;

/// Title used when a hypothesis has no `### Proposed Hypothesis:` heading.
pub const UNTITLED: &str = "Untitled Hypothesis";

/// The unit of work the supervisor selects each round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Generate,
    Reflect,
    Rank,
    Evolve,
    MetaReview,
    Terminate,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Generate,
        Stage::Reflect,
        Stage::Rank,
        Stage::Evolve,
        Stage::MetaReview,
        Stage::Terminate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Generate => "generate",
            Stage::Reflect => "reflect",
            Stage::Rank => "rank",
            Stage::Evolve => "evolve",
            Stage::MetaReview => "meta_review",
            Stage::Terminate => "terminate",
        }
    }

    /// Whether the dispatcher splits this stage into shards.
    pub fn is_sharded(&self) -> bool {
        matches!(self, Stage::Reflect | Stage::Rank)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "generate" | "generation" => Ok(Stage::Generate),
            "reflect" | "reflection" | "review" => Ok(Stage::Reflect),
            "rank" | "ranking" => Ok(Stage::Rank),
            "evolve" | "evolution" => Ok(Stage::Evolve),
            "meta_review" | "metareview" => Ok(Stage::MetaReview),
            "terminate" | "stop" => Ok(Stage::Terminate),
            _ => Err(s.to_string()),
        }
    }
}

/// How an evolved hypothesis was derived from its parents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvolutionType {
    Refinement,
    Combination,
    Analogical,
}

/// Reviewer verdict on how a hypothesis relates to the observations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    MissingPiece,
    AlreadyExplained,
    OtherExplanationsMoreLikely,
    #[default]
    Neutral,
    Disproved,
}

impl Classification {
    /// Parse a reviewer label. Accepts `missing piece`, `missing_piece`,
    /// `Missing-Piece`, ...; anything unrecognised is neutral.
    pub fn from_label(label: &str) -> Self {
        let normalized = label.trim().to_lowercase().replace(['_', '-'], " ");
        match normalized.as_str() {
            "missing piece" => Classification::MissingPiece,
            "already explained" => Classification::AlreadyExplained,
            "other explanations more likely" => Classification::OtherExplanationsMoreLikely,
            "disproved" => Classification::Disproved,
            _ => Classification::Neutral,
        }
    }

    /// Rating adjustment applied when a review with this verdict is recorded.
    pub fn rating_adjustment(&self) -> f64 {
        match self {
            Classification::MissingPiece => 50.0,
            Classification::AlreadyExplained => -10.0,
            Classification::OtherExplanationsMoreLikely => -25.0,
            Classification::Neutral => 0.0,
            Classification::Disproved => -75.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::MissingPiece => "missing_piece",
            Classification::AlreadyExplained => "already_explained",
            Classification::OtherExplanationsMoreLikely => "other_explanations_more_likely",
            Classification::Neutral => "neutral",
            Classification::Disproved => "disproved",
        }
    }
}

/// Review scores, each in `[1, 10]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewScores {
    pub overall: u8,
    pub novelty: u8,
    pub validity: u8,
    pub testability: u8,
    pub specificity: u8,
}

impl ReviewScores {
    /// All five scores set to `value` (clamped).
    pub fn uniform(value: u8) -> Self {
        let v = value.clamp(1, 10);
        Self {
            overall: v,
            novelty: v,
            validity: v,
            testability: v,
            specificity: v,
        }
    }

    pub fn clamped(self) -> Self {
        Self {
            overall: self.overall.clamp(1, 10),
            novelty: self.novelty.clamp(1, 10),
            validity: self.validity.clamp(1, 10),
            testability: self.testability.clamp(1, 10),
            specificity: self.specificity.clamp(1, 10),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualitativeFeedback {
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub suggestions: Vec<String>,
    pub summary: String,
}

/// One structured evaluation of a hypothesis. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub id: String,
    pub hypothesis_id: HypothesisId,
    pub scores: ReviewScores,
    pub feedback: QualitativeFeedback,
    pub classification: Classification,
    pub full_analysis: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deep_verification: Option<Value>,
    pub created_at: DateTime<Utc>,
}

/// A candidate research claim under evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hypothesis {
    pub id: HypothesisId,
    pub content: String,
    pub rating: f64,
    #[serde(default)]
    pub reviews: Vec<Review>,
    #[serde(default)]
    pub is_reviewed: bool,
    #[serde(default)]
    pub is_ranked: bool,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub evolved_from: BTreeSet<HypothesisId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evolution_type: Option<EvolutionType>,
    pub created_at: DateTime<Utc>,
}

fn title_regex() -> &'static Regex {
    static TITLE: OnceLock<Regex> = OnceLock::new();
    TITLE.get_or_init(|| {
        Regex::new(r"(?im)^#{1,6}[ \t]*Proposed Hypothesis:[ \t]*(\S.*?)[ \t]*$")
            .expect("valid title regex")
    })
}

impl Hypothesis {
    /// Create a fresh, unreviewed hypothesis with a new id.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            content: content.into(),
            rating: INITIAL_RATING,
            reviews: Vec::new(),
            is_reviewed: false,
            is_ranked: false,
            evolved_from: BTreeSet::new(),
            evolution_type: None,
            created_at: Utc::now(),
        }
    }

    /// Create a hypothesis derived from `parents`.
    pub fn evolved(
        content: impl Into<String>,
        parents: impl IntoIterator<Item = HypothesisId>,
        evolution_type: EvolutionType,
    ) -> Self {
        let mut h = Self::new(content);
        h.evolved_from = parents.into_iter().collect();
        h.evolution_type = Some(evolution_type);
        h
    }

    /// Title from the `### Proposed Hypothesis:` heading, or `UNTITLED`.
    pub fn title(&self) -> &str {
        title_regex()
            .captures(&self.content)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
            .unwrap_or(UNTITLED)
    }

    pub fn short_id(&self) -> &str {
        &self.id[..self.id.len().min(8)]
    }

    pub fn latest_review(&self) -> Option<&Review> {
        self.reviews.last()
    }

    /// Append a review, mark reviewed and apply the verdict's rating adjustment.
    pub fn record_review(&mut self, review: Review) {
        self.rating += review.classification.rating_adjustment();
        self.reviews.push(review);
        self.is_reviewed = true;
    }

    /// Mark ranked. Refuses (returns `false`) for unreviewed hypotheses.
    pub fn mark_ranked(&mut self) -> bool {
        if self.is_reviewed {
            self.is_ranked = true;
        }
        self.is_ranked
    }

    pub fn is_rank_pending(&self) -> bool {
        self.is_reviewed && !self.is_ranked
    }
}

/// Research plan derived from the goal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanConfig {
    pub preferences: String,
    pub attributes: Vec<String>,
    pub constraints: Vec<String>,
    pub evaluation_criteria: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PlanConfig {
    pub fn is_empty(&self) -> bool {
        self.preferences.is_empty()
            && self.attributes.is_empty()
            && self.constraints.is_empty()
            && self.evaluation_criteria.is_empty()
            && self.extra.is_empty()
    }
}

/// Output of the meta-review stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewSummary {
    /// Structured summary, or a plain string when the backend returned prose.
    pub content: Value,
    pub scope: MetaReviewScope,
    pub focus: MetaReviewFocus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReviewSummary {
    /// Text form handed to later prompts.
    pub fn critique_text(&self) -> String {
        match (&self.error, &self.content) {
            (Some(error), _) => format!("Meta-review failed: {}", error),
            (None, Value::String(text)) => text.clone(),
            (None, other) => serde_json::to_string_pretty(other).unwrap_or_default(),
        }
    }
}

/// One supervisor decision as recorded in the run history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub iteration: u32,
    pub action: Stage,
    pub pre_top_rating: f64,
    /// Filled in by the next supervisor call.
    pub post_top_rating: Option<f64>,
}

/// Worker pool usage of the last dispatch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolReport {
    pub workers: usize,
    pub jobs_submitted: usize,
    pub jobs_completed: usize,
    pub shard_sizes: Vec<usize>,
}

/// Operational metadata of the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunMetadata {
    pub iteration_count: u32,
    pub last_stage: Option<Stage>,
    pub top_rating: f64,
    pub iterations_since_improvement: u32,
    pub previous_review_count: usize,
    pub last_reflection_count: usize,
    pub newly_reviewed_ids: Vec<HypothesisId>,
    pub last_scheduled_stage: Option<Stage>,
    pub worker_pool: Option<PoolReport>,
    pub decision_history: Vec<DecisionRecord>,
}

impl Default for RunMetadata {
    fn default() -> Self {
        Self {
            iteration_count: 0,
            last_stage: None,
            top_rating: INITIAL_RATING,
            iterations_since_improvement: 0,
            previous_review_count: 0,
            last_reflection_count: 0,
            newly_reviewed_ids: Vec::new(),
            last_scheduled_stage: None,
            worker_pool: None,
            decision_history: Vec::new(),
        }
    }
}

/// Reflection results carried by a patch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReflectionTally {
    pub reviewed_count: usize,
    pub newly_reviewed_ids: Vec<HypothesisId>,
}

impl ReflectionTally {
    /// Sum counts, union ids (first occurrence order).
    pub fn merge(&mut self, other: ReflectionTally) {
        self.reviewed_count += other.reviewed_count;
        for id in other.newly_reviewed_ids {
            if !self.newly_reviewed_ids.contains(&id) {
                self.newly_reviewed_ids.push(id);
            }
        }
    }
}

/// Dispatcher bookkeeping carried by a patch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulingReport {
    pub stage: Stage,
    pub pool: PoolReport,
}

/// The single shared research record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchState {
    pub goal: String,
    pub plan_config: PlanConfig,
    pub hypotheses: Vec<Hypothesis>,
    pub observations: Option<String>,
    pub literature_text: Option<String>,
    pub review_summary: Option<ReviewSummary>,
    pub decision: Option<Decision>,
    pub next_stage: Option<Stage>,
    pub parameters: Map<String, Value>,
    pub run_metadata: RunMetadata,
    /// Append-only diagnostic log.
    pub errors: Vec<String>,
}

impl ResearchState {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            ..Default::default()
        }
    }

    pub fn with_literature(mut self, text: impl Into<String>) -> Self {
        self.literature_text = Some(text.into());
        self
    }

    pub fn hypothesis(&self, id: &str) -> Option<&Hypothesis> {
        self.hypotheses.iter().find(|h| h.id == id)
    }

    pub fn unreviewed_ids(&self) -> Vec<HypothesisId> {
        self.hypotheses
            .iter()
            .filter(|h| !h.is_reviewed)
            .map(|h| h.id.clone())
            .collect()
    }

    /// Reviewed but not yet ranked.
    pub fn rank_pending_ids(&self) -> Vec<HypothesisId> {
        self.hypotheses
            .iter()
            .filter(|h| h.is_rank_pending())
            .map(|h| h.id.clone())
            .collect()
    }

    /// Highest rating, or `INITIAL_RATING` for an empty pool.
    pub fn top_rating(&self) -> f64 {
        self.hypotheses
            .iter()
            .map(|h| h.rating)
            .fold(None, |acc: Option<f64>, r| Some(acc.map_or(r, |a| a.max(r))))
            .unwrap_or(INITIAL_RATING)
    }

    /// Highest-rated hypothesis; the earliest one wins ties.
    pub fn top_hypothesis(&self) -> Option<&Hypothesis> {
        self.hypotheses
            .iter()
            .reduce(|best, h| if h.rating > best.rating { h } else { best })
    }

    pub fn total_reviews(&self) -> usize {
        self.hypotheses.iter().map(|h| h.reviews.len()).sum()
    }

    pub fn push_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    /// Apply a patch using the per-field merge rules documented on this module.
    pub fn apply(&mut self, patch: StatePatch) {
        if let Some(run_metadata) = patch.run_metadata {
            self.run_metadata = run_metadata;
        }
        if let Some(tally) = patch.reflection {
            self.run_metadata.last_reflection_count = tally.reviewed_count;
            self.run_metadata.newly_reviewed_ids = tally.newly_reviewed_ids;
        }
        if let Some(report) = patch.scheduling {
            self.run_metadata.last_scheduled_stage = Some(report.stage);
            self.run_metadata.worker_pool = Some(report.pool);
        }

        for incoming in patch.upserts {
            upsert_hypothesis(&mut self.hypotheses, incoming);
        }
        if !patch.prepend.is_empty() {
            let mut fresh = Vec::with_capacity(patch.prepend.len());
            for incoming in patch.prepend {
                if self.hypothesis(&incoming.id).is_some() {
                    upsert_hypothesis(&mut self.hypotheses, incoming);
                } else {
                    fresh.push(incoming);
                }
            }
            self.hypotheses.splice(0..0, fresh);
        }
        if patch.sort_by_rating {
            sort_by_rating(&mut self.hypotheses);
        }

        if let Some(plan_config) = patch.plan_config {
            self.plan_config = plan_config;
        }
        if let Some(observations) = patch.observations {
            self.observations = Some(observations);
        }
        if let Some(summary) = patch.review_summary {
            self.review_summary = Some(summary);
        }
        if let Some(decision) = patch.decision {
            self.decision = Some(decision);
        }
        if let Some(stage) = patch.next_stage {
            self.next_stage = Some(stage);
        }
        if let Some(parameters) = patch.parameters {
            self.parameters = parameters;
        }
        self.errors.extend(patch.errors);
    }

    /// Data-model invariants that must hold after every round.
    pub fn invariant_violations(&self) -> Vec<String> {
        let mut violations = Vec::new();
        let mut seen = HashSet::new();
        for h in &self.hypotheses {
            if !seen.insert(h.id.as_str()) {
                violations.push(format!("duplicate hypothesis id {}", h.id));
            }
            if h.is_ranked && !h.is_reviewed {
                violations.push(format!("hypothesis {} is ranked but not reviewed", h.id));
            }
        }
        let history_len = self.run_metadata.decision_history.len();
        if history_len != self.run_metadata.iteration_count as usize {
            violations.push(format!(
                "decision history has {} entries for {} iterations",
                history_len, self.run_metadata.iteration_count
            ));
        }
        violations
    }
}

/// Stable sort, highest rating first.
pub fn sort_by_rating(hypotheses: &mut [Hypothesis]) {
    hypotheses.sort_by(|a, b| b.rating.total_cmp(&a.rating));
}

/// Replace `incoming.id` in place (keeping set flags set) or append it.
fn upsert_hypothesis(hypotheses: &mut Vec<Hypothesis>, mut incoming: Hypothesis) {
    match hypotheses.iter_mut().find(|h| h.id == incoming.id) {
        Some(existing) => {
            incoming.is_reviewed |= existing.is_reviewed;
            incoming.is_ranked |= existing.is_ranked;
            *existing = incoming;
        }
        None => hypotheses.push(incoming),
    }
}

/// An update produced by one stage (or one shard of a stage).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatePatch {
    pub upserts: Vec<Hypothesis>,
    pub prepend: Vec<Hypothesis>,
    pub sort_by_rating: bool,
    pub plan_config: Option<PlanConfig>,
    pub observations: Option<String>,
    pub review_summary: Option<ReviewSummary>,
    pub decision: Option<Decision>,
    pub next_stage: Option<Stage>,
    pub parameters: Option<Map<String, Value>>,
    pub run_metadata: Option<RunMetadata>,
    pub reflection: Option<ReflectionTally>,
    pub scheduling: Option<SchedulingReport>,
    pub errors: Vec<String>,
}

impl StatePatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// A no-op patch that only records a diagnostic.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            errors: vec![message.into()],
            ..Default::default()
        }
    }

    pub fn push_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    /// Fold `later` into `self` as if `later` were applied after `self`.
    ///
    /// Hypotheses merge by id (last write wins, set flags stay set), errors
    /// concatenate, reflection tallies add up.
    pub fn absorb(&mut self, later: StatePatch) {
        for incoming in later.upserts {
            upsert_hypothesis(&mut self.upserts, incoming);
        }
        self.prepend.extend(later.prepend);
        self.sort_by_rating |= later.sort_by_rating;

        if later.plan_config.is_some() {
            self.plan_config = later.plan_config;
        }
        if later.observations.is_some() {
            self.observations = later.observations;
        }
        if later.review_summary.is_some() {
            self.review_summary = later.review_summary;
        }
        if later.decision.is_some() {
            self.decision = later.decision;
        }
        if later.next_stage.is_some() {
            self.next_stage = later.next_stage;
        }
        if later.parameters.is_some() {
            self.parameters = later.parameters;
        }
        if later.run_metadata.is_some() {
            self.run_metadata = later.run_metadata;
        }
        match (&mut self.reflection, later.reflection) {
            (Some(mine), Some(theirs)) => mine.merge(theirs),
            (None, theirs @ Some(_)) => self.reflection = theirs,
            _ => {}
        }
        if later.scheduling.is_some() {
            self.scheduling = later.scheduling;
        }
        self.errors.extend(later.errors);
    }

    pub fn is_empty(&self) -> bool {
        *self == StatePatch::default()
    }
}
