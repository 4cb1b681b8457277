//! Reflection: structured reviews of unreviewed hypotheses.

use super::observations::GENERAL_KNOWLEDGE_NOTE;
use super::truncate_chars;
use crate::brain::Brain;
use crate::decision::ReviewDepth;
use crate::error::{LlmError, ParseError};
use crate::extract::parse_block_as;
use crate::prompts::{self, ReflectionPrompt};
use crate::state::{
    Classification, Hypothesis, HypothesisId, QualitativeFeedback, ReflectionTally, ResearchState,
    Review, ReviewScores, StatePatch,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use std::fmt::Write;
use tracing::{debug, info, warn};
use uuid::Uuid;

const SUMMARY_CHARS: usize = 280;
const FALLBACK_ANALYSIS_CHARS: usize = 2000;
const DEFAULT_CONTEXT: &str = "Evaluate hypotheses to advance the research goal.";

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawScores {
    overall: f64,
    novelty: f64,
    validity: f64,
    testability: f64,
    specificity: f64,
}

impl Default for RawScores {
    fn default() -> Self {
        Self {
            overall: 6.0,
            novelty: 6.0,
            validity: 7.0,
            testability: 6.0,
            specificity: 6.0,
        }
    }
}

fn to_score(value: f64) -> u8 {
    if value.is_finite() {
        value.round().clamp(1.0, 10.0) as u8
    } else {
        5
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawReview {
    scores: RawScores,
    strengths: Vec<String>,
    weaknesses: Vec<String>,
    suggestions: Vec<String>,
    summary: String,
    full_analysis: String,
    classification: String,
    deep_verification: Option<Value>,
}

/// Parse a review response into a `Review` for `hypothesis_id`.
pub fn parse_review(
    text: &str,
    hypothesis_id: &str,
    depth: ReviewDepth,
) -> Result<Review, ParseError> {
    let raw: RawReview = parse_block_as(text)?;
    let full_analysis = if raw.full_analysis.is_empty() {
        raw.summary.clone()
    } else {
        raw.full_analysis
    };
    let summary = if raw.summary.is_empty() {
        truncate_chars(&full_analysis, SUMMARY_CHARS)
    } else {
        raw.summary
    };
    let deep_verification = match (depth, raw.deep_verification) {
        (ReviewDepth::DeepVerification, Some(block @ Value::Object(_))) => Some(block),
        _ => None,
    };
    Ok(Review {
        id: Uuid::new_v4().to_string(),
        hypothesis_id: hypothesis_id.to_string(),
        scores: ReviewScores {
            overall: to_score(raw.scores.overall),
            novelty: to_score(raw.scores.novelty),
            validity: to_score(raw.scores.validity),
            testability: to_score(raw.scores.testability),
            specificity: to_score(raw.scores.specificity),
        },
        feedback: QualitativeFeedback {
            strengths: raw.strengths,
            weaknesses: raw.weaknesses,
            suggestions: raw.suggestions,
            summary,
        },
        classification: Classification::from_label(&raw.classification),
        full_analysis,
        deep_verification,
        created_at: Utc::now(),
    })
}

/// Neutral review built from output that could not be parsed.
pub fn unparsed_review(hypothesis_id: &str, text: &str) -> Review {
    let full_analysis = if text.trim().is_empty() {
        "Failed to generate review".to_string()
    } else {
        truncate_chars(text, FALLBACK_ANALYSIS_CHARS)
    };
    Review {
        id: Uuid::new_v4().to_string(),
        hypothesis_id: hypothesis_id.to_string(),
        scores: ReviewScores::uniform(5),
        feedback: QualitativeFeedback {
            strengths: vec!["Review generated from fallback due to a parsing error".to_string()],
            weaknesses: vec!["Unable to parse structured review".to_string()],
            suggestions: vec!["Re-run review with clearer instructions".to_string()],
            summary: truncate_chars(&full_analysis, SUMMARY_CHARS),
        },
        classification: Classification::Neutral,
        full_analysis,
        deep_verification: None,
        created_at: Utc::now(),
    }
}

/// Low-scored placeholder review recorded when the backend call failed.
pub fn failed_review(hypothesis_id: &str, error: &LlmError) -> Review {
    let message = error.to_string();
    Review {
        id: Uuid::new_v4().to_string(),
        hypothesis_id: hypothesis_id.to_string(),
        scores: ReviewScores::uniform(3),
        feedback: QualitativeFeedback {
            strengths: Vec::new(),
            weaknesses: vec!["Review failed due to a backend error".to_string()],
            suggestions: vec!["Retry review process".to_string()],
            summary: format!("Review failed: {}", truncate_chars(&message, 200)),
        },
        classification: Classification::Neutral,
        full_analysis: format!("Review could not be completed due to error: {}", message),
        deep_verification: None,
        created_at: Utc::now(),
    }
}

/// Best and worst reviewed hypotheses as few-shot calibration, when at
/// least two are reviewed.
fn calibration_examples(state: &ResearchState) -> String {
    let mut reviewed: Vec<&Hypothesis> = state.hypotheses.iter().filter(|h| h.is_reviewed).collect();
    if reviewed.len() < 2 {
        return "(none yet)".to_string();
    }
    reviewed.sort_by(|a, b| a.rating.total_cmp(&b.rating));
    let mut out = String::new();
    for (label, h, default_class) in [
        ("Strong example", reviewed[reviewed.len() - 1], Classification::MissingPiece),
        ("Weak example", reviewed[0], Classification::Disproved),
    ] {
        let review = h.latest_review();
        let _ = writeln!(
            out,
            "{label}:\nHypothesis: {}\nReview summary: {}\nClassification: {}\n",
            h.title(),
            review.map(|r| r.feedback.summary.as_str()).unwrap_or(""),
            review.map(|r| r.classification).unwrap_or(default_class).as_str(),
        );
    }
    out
}

/// Reviews hypotheses. Cloned into each dispatcher shard.
#[derive(Debug, Clone)]
pub struct Reflector {
    brain: Brain,
}

impl Reflector {
    pub fn new(brain: Brain) -> Self {
        Self { brain }
    }

    /// Review every unreviewed hypothesis in `targets`.
    ///
    /// Every target ends up reviewed: unparsable output gives a neutral
    /// fallback review, a backend failure a low-scored placeholder.
    pub async fn review(
        &self,
        state: &ResearchState,
        targets: &[HypothesisId],
        depth: ReviewDepth,
    ) -> StatePatch {
        let observations = state.observations.as_deref().unwrap_or(GENERAL_KNOWLEDGE_NOTE);
        let strategic_context = state
            .decision
            .as_ref()
            .map(|d| d.rationale.as_str())
            .filter(|r| !r.is_empty())
            .unwrap_or(DEFAULT_CONTEXT);
        let calibration = calibration_examples(state);
        let request = ReflectionPrompt {
            goal: &state.goal,
            plan: &state.plan_config,
            observations,
            strategic_context,
            calibration: &calibration,
            depth,
        };

        let mut patch = StatePatch::new();
        let mut tally = ReflectionTally::default();

        for id in targets {
            let Some(hypothesis) = state.hypothesis(id) else {
                patch.push_error(format!("Reflection target {} not found", id));
                continue;
            };
            if hypothesis.is_reviewed {
                debug!(hypothesis_id = %hypothesis.short_id(), "Already reviewed, skipping");
                continue;
            }

            let prompt = prompts::reflection_prompt(&request, hypothesis);
            let review = match self.brain.invoke(&prompt).await {
                Ok(text) => {
                    tally.reviewed_count += 1;
                    match parse_review(&text, id, depth) {
                        Ok(review) => review,
                        Err(e) => {
                            warn!(
                                hypothesis_id = %hypothesis.short_id(),
                                error = %e,
                                "Review could not be parsed, using fallback"
                            );
                            unparsed_review(id, &text)
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        hypothesis_id = %hypothesis.short_id(),
                        error = %e,
                        "Review request failed"
                    );
                    patch.push_error(format!("Reflection error for {}: {}", id, e));
                    failed_review(id, &e)
                }
            };

            let mut updated = hypothesis.clone();
            let classification = review.classification;
            updated.record_review(review);
            info!(
                hypothesis_id = %updated.short_id(),
                classification = classification.as_str(),
                rating = updated.rating,
                "Hypothesis reviewed"
            );
            tally.newly_reviewed_ids.push(id.clone());
            patch.upserts.push(updated);
        }

        patch.reflection = Some(tally);
        patch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::MockLlmProvider;
    use std::sync::Arc;

    fn reflector(provider: MockLlmProvider) -> Reflector {
        Reflector::new(Brain::new(Arc::new(provider), 0.2))
    }

    #[test]
    fn test_parse_review_defaults_and_clamping() {
        let review = parse_review(
            r#"{"scores": {"overall": 12, "novelty": 0.4}, "classification": "Missing piece", "full_analysis": "solid"}"#,
            "h1",
            ReviewDepth::Standard,
        )
        .unwrap();
        assert_eq!(review.scores.overall, 10);
        assert_eq!(review.scores.novelty, 1);
        assert_eq!(review.scores.validity, 7);
        assert_eq!(review.classification, Classification::MissingPiece);
        assert_eq!(review.feedback.summary, "solid");
        assert!(review.deep_verification.is_none());
    }

    #[test]
    fn test_deep_verification_kept_only_at_that_depth() {
        let text = r#"{"classification": "neutral", "deep_verification": {"assumptions": ["a"]}}"#;
        assert!(parse_review(text, "h", ReviewDepth::DeepVerification).unwrap().deep_verification.is_some());
        assert!(parse_review(text, "h", ReviewDepth::Deep).unwrap().deep_verification.is_none());
    }

    #[tokio::test]
    async fn test_review_applies_classification_adjustment() {
        let provider = MockLlmProvider::new();
        provider.queue_response(r#"{"scores": {"overall": 8}, "classification": "disproved", "summary": "contradicts data"}"#);
        let mut state = ResearchState::new("goal");
        let h = Hypothesis::new("### Proposed Hypothesis: X\nbody");
        state.hypotheses.push(h.clone());

        let patch = reflector(provider).review(&state, &[h.id.clone()], ReviewDepth::Standard).await;
        state.apply(patch);
        let reviewed = &state.hypotheses[0];
        assert!(reviewed.is_reviewed);
        assert!(!reviewed.is_ranked);
        assert_eq!(reviewed.rating, 1125.0);
        assert_eq!(reviewed.reviews.len(), 1);
        assert_eq!(state.run_metadata.last_reflection_count, 1);
        assert_eq!(state.run_metadata.newly_reviewed_ids, vec![h.id]);
    }

    #[tokio::test]
    async fn test_unparsable_review_falls_back_to_neutral() {
        let provider = MockLlmProvider::new();
        provider.queue_response("This hypothesis looks promising but I will not use JSON.");
        let mut state = ResearchState::new("goal");
        let h = Hypothesis::new("x");
        state.hypotheses.push(h.clone());

        let patch = reflector(provider).review(&state, &[h.id.clone()], ReviewDepth::Standard).await;
        let updated = &patch.upserts[0];
        assert!(updated.is_reviewed);
        assert_eq!(updated.rating, 1200.0);
        let review = &updated.reviews[0];
        assert_eq!(review.scores, ReviewScores::uniform(5));
        assert_eq!(review.classification, Classification::Neutral);
        assert!(review.full_analysis.contains("looks promising"));
        assert!(patch.errors.is_empty());
    }

    #[tokio::test]
    async fn test_backend_failure_still_marks_reviewed() {
        let provider = MockLlmProvider::new();
        provider.queue_error(LlmError::RateLimited { retry_after_secs: 1 });
        let mut state = ResearchState::new("goal");
        let h = Hypothesis::new("x");
        state.hypotheses.push(h.clone());

        let patch = reflector(provider).review(&state, &[h.id.clone()], ReviewDepth::Standard).await;
        assert_eq!(patch.errors.len(), 1);
        let updated = &patch.upserts[0];
        assert!(updated.is_reviewed);
        assert_eq!(updated.reviews[0].scores, ReviewScores::uniform(3));
        let tally = patch.reflection.unwrap();
        assert_eq!(tally.reviewed_count, 0);
        assert_eq!(tally.newly_reviewed_ids, vec![h.id]);
    }

    #[tokio::test]
    async fn test_calibration_examples_need_two_reviewed() {
        let provider = Arc::new(MockLlmProvider::with_handler(|_| r#"{"classification": "neutral"}"#.into()));
        let r = Reflector::new(Brain::new(provider.clone(), 0.2));
        let mut state = ResearchState::new("goal");
        let mut best = Hypothesis::new("### Proposed Hypothesis: Best one");
        best.is_reviewed = true;
        best.rating = 1400.0;
        let mut worst = Hypothesis::new("### Proposed Hypothesis: Worst one");
        worst.is_reviewed = true;
        worst.rating = 1000.0;
        let fresh = Hypothesis::new("fresh");
        state.hypotheses = vec![best, worst, fresh.clone()];

        r.review(&state, &[fresh.id], ReviewDepth::Deep).await;
        let prompt = &provider.prompts()[0];
        assert!(prompt.contains("Strong example:\nHypothesis: Best one"));
        assert!(prompt.contains("Weak example:\nHypothesis: Worst one"));
        assert!(prompt.contains("proponent and as a skeptic"));
    }
}
