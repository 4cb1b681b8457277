//! Progress statistics the policy engine hands to the backend.

use crate::state::{DecisionRecord, Hypothesis, ResearchState, Stage};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::OnceLock;

/// Reviewed hypotheses above this rating are evolution candidates.
pub const EVOLUTION_CANDIDATE_RATING: f64 = 1300.0;

/// Number of history entries the momentum window covers.
pub const MOMENTUM_WINDOW: usize = 5;

/// Base counts computed from the state on every supervisor call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BaseStatistics {
    pub iteration_count: u32,
    pub total_hypotheses: usize,
    pub unreviewed_hypotheses: usize,
    /// Reviewed but not yet ranked.
    pub newly_reviewed_hypotheses: usize,
    pub top_rating: f64,
    pub last_stage: Option<Stage>,
    pub iterations_since_improvement: u32,
    pub total_reviews: usize,
    pub new_reviews_since_last: usize,
    pub evolution_candidates: usize,
    pub has_review_summary: bool,
}

impl BaseStatistics {
    pub fn compute(state: &ResearchState) -> Self {
        let meta = &state.run_metadata;
        let total_reviews = state.total_reviews();
        Self {
            iteration_count: meta.iteration_count,
            total_hypotheses: state.hypotheses.len(),
            unreviewed_hypotheses: state.hypotheses.iter().filter(|h| !h.is_reviewed).count(),
            newly_reviewed_hypotheses: state
                .hypotheses
                .iter()
                .filter(|h| h.is_rank_pending())
                .count(),
            top_rating: state.top_rating(),
            last_stage: meta.last_stage,
            iterations_since_improvement: meta.iterations_since_improvement,
            total_reviews,
            new_reviews_since_last: total_reviews.saturating_sub(meta.previous_review_count),
            evolution_candidates: state
                .hypotheses
                .iter()
                .filter(|h| h.is_reviewed && h.rating > EVOLUTION_CANDIDATE_RATING)
                .count(),
            has_review_summary: state.review_summary.is_some(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchPhase {
    #[default]
    Exploratory,
    Convergence,
    Breakthrough,
}

impl fmt::Display for ResearchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResearchPhase::Exploratory => write!(f, "exploratory"),
            ResearchPhase::Convergence => write!(f, "convergence"),
            ResearchPhase::Breakthrough => write!(f, "breakthrough"),
        }
    }
}

/// Derived progress metrics. All ratios are in `[0, 1]`, momentum in `[-1, 1]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnhancedMetrics {
    pub research_phase: ResearchPhase,
    pub discovery_momentum: f64,
    pub hypothesis_diversity: f64,
    pub workflow_efficiency: f64,
    pub stagnation_risk: f64,
    pub breakthrough_probability: f64,
    pub bottleneck_indicators: Vec<String>,
}

impl EnhancedMetrics {
    pub fn compute(
        hypotheses: &[Hypothesis],
        stats: &BaseStatistics,
        history: &[DecisionRecord],
    ) -> Self {
        let titles: Vec<&str> = hypotheses
            .iter()
            .filter(|h| !h.content.trim().is_empty())
            .map(|h| h.title())
            .collect();
        let diversity = hypothesis_diversity(&titles);
        let momentum = discovery_momentum(history);
        let stalled = stats.iterations_since_improvement.min(10) as f64 / 10.0;

        let stagnation_risk = (0.5 * stalled + 0.25 * (1.0 - momentum)).clamp(0.0, 1.0);
        let breakthrough_probability = (0.4 * (stats.evolution_candidates as f64 / 3.0).min(1.0)
            + 0.35 * diversity
            + 0.25 * (momentum + 1.0) / 2.0)
            .clamp(0.0, 1.0);

        let research_phase = if stats.top_rating > 1500.0 && stats.iterations_since_improvement <= 1
        {
            ResearchPhase::Breakthrough
        } else if stats.iteration_count < 8 {
            ResearchPhase::Exploratory
        } else {
            ResearchPhase::Convergence
        };

        let mut bottleneck_indicators = Vec::new();
        if stats.unreviewed_hypotheses > 0 {
            bottleneck_indicators.push("pending_reviews".to_string());
        }
        if stats.newly_reviewed_hypotheses > 0 {
            bottleneck_indicators.push("pending_ranking".to_string());
        }

        Self {
            research_phase,
            discovery_momentum: momentum,
            hypothesis_diversity: diversity,
            workflow_efficiency: 1.0 - stalled,
            stagnation_risk,
            breakthrough_probability,
            bottleneck_indicators,
        }
    }
}

fn token_regex() -> &'static Regex {
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    TOKEN.get_or_init(|| Regex::new(r"[A-Za-z0-9_]+").expect("valid token regex"))
}

/// Lowercased word tokens longer than two characters.
pub fn title_tokens(title: &str) -> HashSet<String> {
    token_regex()
        .find_iter(title)
        .map(|m| m.as_str().to_lowercase())
        .filter(|t| t.len() > 2)
        .collect()
}

/// Mean pairwise Jaccard distance of title token sets; 0 for fewer than two titles.
pub fn hypothesis_diversity<S: AsRef<str>>(titles: &[S]) -> f64 {
    if titles.len() < 2 {
        return 0.0;
    }
    let sets: Vec<HashSet<String>> = titles.iter().map(|t| title_tokens(t.as_ref())).collect();
    let mut total = 0.0;
    let mut pairs = 0usize;
    for i in 0..sets.len() {
        for j in (i + 1)..sets.len() {
            let union = sets[i].union(&sets[j]).count();
            let distance = if union == 0 {
                0.0
            } else {
                1.0 - sets[i].intersection(&sets[j]).count() as f64 / union as f64
            };
            total += distance;
            pairs += 1;
        }
    }
    total / pairs as f64
}

/// Average top-rating change per step over the last `MOMENTUM_WINDOW`
/// history entries, scaled by 1/100 and clamped to `[-1, 1]`.
pub fn discovery_momentum(history: &[DecisionRecord]) -> f64 {
    let window = &history[history.len().saturating_sub(MOMENTUM_WINDOW)..];
    let ratings: Vec<f64> = window
        .iter()
        .map(|r| r.post_top_rating.unwrap_or(r.pre_top_rating))
        .collect();
    match (ratings.first(), ratings.last()) {
        (Some(first), Some(last)) if ratings.len() >= 2 => {
            let steps = (ratings.len() - 1).max(1) as f64;
            (((last - first) / steps) / 100.0).clamp(-1.0, 1.0)
        }
        _ => 0.0,
    }
}
