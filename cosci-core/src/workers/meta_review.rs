//! Meta-review: synthesise patterns across all reviews collected so far.

use crate::brain::Brain;
use crate::decision::{MetaReviewParams, MetaReviewScope};
use crate::extract::parse_json_block;
use crate::prompts;
use crate::state::{Hypothesis, ResearchState, Review, ReviewSummary, StatePatch};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::fmt::Write;
use tracing::{info, warn};

/// Hypotheses covered by the `last_3_iterations` scope.
const RECENT_WINDOW: usize = 3;

#[derive(Debug, Clone)]
pub struct MetaReviewer {
    brain: Brain,
}

impl MetaReviewer {
    pub fn new(brain: Brain) -> Self {
        Self { brain }
    }

    /// Summarise the reviews in scope into `review_summary`.
    ///
    /// A failed backend call still stores a summary, with `content` null and
    /// the failure in `error`.
    pub async fn summarize(&self, state: &ResearchState, params: &MetaReviewParams) -> StatePatch {
        let quantitative = quantitative_summary(&state.hypotheses);
        let quantitative_text =
            serde_json::to_string_pretty(&quantitative).unwrap_or_else(|_| quantitative.to_string());
        let reviews = review_digest(&state.hypotheses, params.scope);
        let prompt = prompts::meta_review_prompt(
            &state.goal,
            &state.plan_config,
            params.focus,
            &quantitative_text,
            &reviews,
        );

        let mut patch = StatePatch::new();
        let summary = match self.brain.invoke(&prompt).await {
            Ok(text) => {
                let content = parse_json_block(&text)
                    .unwrap_or_else(|_| Value::String(text.trim().to_string()));
                info!(
                    scope = ?params.scope,
                    focus = ?params.focus,
                    structured = content.is_object(),
                    "Meta-review complete"
                );
                ReviewSummary {
                    content,
                    scope: params.scope,
                    focus: params.focus,
                    error: None,
                }
            }
            Err(e) => {
                warn!(error = %e, "Meta-review request failed");
                patch.push_error(format!("Meta-review error: {}", e));
                ReviewSummary {
                    content: Value::Null,
                    scope: params.scope,
                    focus: params.focus,
                    error: Some(e.to_string()),
                }
            }
        };
        patch.review_summary = Some(summary);
        patch
    }
}

/// Pool-wide numbers handed to the meta-review prompt.
pub fn quantitative_summary(hypotheses: &[Hypothesis]) -> Value {
    let ratings: Vec<f64> = hypotheses.iter().map(|h| h.rating).collect();
    let top_rating = ratings.iter().copied().fold(None, |acc: Option<f64>, r| {
        Some(acc.map_or(r, |a| a.max(r)))
    });

    let reviews: Vec<_> = hypotheses.iter().flat_map(|h| &h.reviews).collect();
    let mean = |f: fn(&Review) -> u8| {
        if reviews.is_empty() {
            None
        } else {
            Some(reviews.iter().map(|r| f64::from(f(*r))).sum::<f64>() / reviews.len() as f64)
        }
    };
    let mut distribution: BTreeMap<&str, usize> = BTreeMap::new();
    for review in &reviews {
        *distribution.entry(review.classification.as_str()).or_default() += 1;
    }

    json!({
        "hypothesis_count": hypotheses.len(),
        "top_rating": top_rating,
        "rating_stdev": sample_stdev(&ratings),
        "average_novelty": mean(|r| r.scores.novelty),
        "average_validity": mean(|r| r.scores.validity),
        "classification_distribution": distribution,
    })
}

fn sample_stdev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    variance.sqrt()
}

/// Reviews in scope, one block per reviewed hypothesis.
fn review_digest(hypotheses: &[Hypothesis], scope: MetaReviewScope) -> String {
    let mut reviewed: Vec<&Hypothesis> =
        hypotheses.iter().filter(|h| !h.reviews.is_empty()).collect();
    if scope == MetaReviewScope::Last3Iterations {
        reviewed.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        reviewed.truncate(RECENT_WINDOW);
    }
    if reviewed.is_empty() {
        return "(no reviews yet)".to_string();
    }

    let mut out = String::new();
    for (i, h) in reviewed.iter().enumerate() {
        if i > 0 {
            out.push_str("---\n");
        }
        let reviews = serde_json::to_string_pretty(&h.reviews).unwrap_or_default();
        let _ = writeln!(out, "ID {} (rating {:.0}):\n{}", h.short_id(), h.rating, reviews);
    }
    out
}
