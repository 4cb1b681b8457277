//! Observation aggregation from user-supplied literature.

use crate::brain::Brain;
use crate::extract::{parse_block_as, parse_json_block};
use crate::prompts;
use crate::state::{Hypothesis, HypothesisId, ResearchState, StatePatch};
use serde::Deserialize;
use std::fmt::Write;
use tracing::{debug, info, warn};

/// Domain labels the backend may answer with.
pub const DOMAINS: [&str; 7] = [
    "biology",
    "chemistry",
    "physics",
    "medicine",
    "materials_science",
    "computer_science",
    "general",
];

/// Observations used when no literature was supplied.
pub const GENERAL_KNOWLEDGE_NOTE: &str = "No scientific literature provided. Reflection proceeds \
    using general knowledge; supply a literature file to improve grounding.";

/// Observations used when extraction failed.
pub const EXTRACTION_FAILED_NOTE: &str =
    "Observation extraction failed; proceeding with general knowledge.";

/// Keyword heuristic used when the backend cannot name a domain.
pub fn infer_domain_from_goal(goal: &str) -> &'static str {
    const RULES: [(&str, &[&str]); 6] = [
        ("biology", &["gene", "protein", "cell", "biolog", "enzyme"]),
        ("medicine", &["clinic", "patient", "trial", "therapy", "disease"]),
        ("chemistry", &["synthesis", "reaction", "molecule", "compound"]),
        ("physics", &["quantum", "optics", "relativity", "particle", "thermo"]),
        (
            "materials_science",
            &["alloy", "polymer", "crystal", "material", "microstructure"],
        ),
        (
            "computer_science",
            &["algorithm", "neural", "network", "model", "data", "compute"],
        ),
    ];
    let text = goal.to_lowercase();
    RULES
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| text.contains(k)))
        .map(|(domain, _)| *domain)
        .unwrap_or("general")
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ExtractedObservation {
    #[serde(alias = "description")]
    statement: String,
    source: String,
}

#[derive(Debug, Deserialize)]
struct Extraction {
    #[serde(alias = "extracted_observations")]
    observations: Vec<ExtractedObservation>,
    #[serde(default, alias = "observation_summary")]
    summary: String,
}

#[derive(Debug, Clone)]
pub struct ObservationAggregator {
    brain: Brain,
}

impl ObservationAggregator {
    pub fn new(brain: Brain) -> Self {
        Self { brain }
    }

    /// Produce the `observations` text for the reflect stage.
    pub async fn aggregate(
        &self,
        state: &ResearchState,
        priority_ids: &[HypothesisId],
    ) -> StatePatch {
        let literature = state.literature_text.as_deref().map(str::trim).unwrap_or("");
        if literature.is_empty() {
            debug!("No literature supplied, using general knowledge note");
            return StatePatch {
                observations: Some(GENERAL_KNOWLEDGE_NOTE.to_string()),
                ..Default::default()
            };
        }

        let mut patch = StatePatch::new();
        let domain = self.infer_domain(&state.goal).await;
        let priority: Vec<&Hypothesis> = priority_ids
            .iter()
            .filter_map(|id| state.hypothesis(id))
            .collect();
        let prompt = prompts::observation_prompt(&state.goal, &domain, &priority, literature);

        let extraction = match self.brain.invoke(&prompt).await {
            Ok(text) => parse_block_as::<Extraction>(&text).map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        let observations = match extraction {
            Ok(extraction) => {
                info!(
                    domain = %domain,
                    count = extraction.observations.len(),
                    "Observations extracted"
                );
                format_observations(&extraction)
            }
            Err(message) => {
                warn!(error = %message, "Observation extraction failed");
                patch.push_error(format!("Observation extraction failed: {}", message));
                EXTRACTION_FAILED_NOTE.to_string()
            }
        };
        patch.observations = Some(observations);
        patch
    }

    async fn infer_domain(&self, goal: &str) -> String {
        match self.brain.invoke(&prompts::domain_prompt(goal, &DOMAINS)).await {
            Ok(text) => {
                let label = parse_json_block(&text)
                    .ok()
                    .and_then(|v| v.get("domain").and_then(|d| d.as_str()).map(str::to_string))
                    .unwrap_or(text)
                    .trim()
                    .to_lowercase();
                if DOMAINS.contains(&label.as_str()) {
                    label
                } else {
                    infer_domain_from_goal(goal).to_string()
                }
            }
            Err(e) => {
                debug!(error = %e, "Domain inference failed, using keyword heuristic");
                infer_domain_from_goal(goal).to_string()
            }
        }
    }
}

fn format_observations(extraction: &Extraction) -> String {
    let mut out = format!(
        "Scientific Observations Summary:\n{}\n\nDetailed Observations:\n",
        extraction.summary
    );
    for (i, obs) in extraction.observations.iter().enumerate() {
        let source = if obs.source.trim().is_empty() {
            "Unknown"
        } else {
            obs.source.trim()
        };
        let _ = writeln!(
            out,
            "- Observation {}: {} (Source: {})",
            i + 1,
            obs.statement.trim(),
            source
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::MockLlmProvider;
    use std::sync::Arc;

    #[test]
    fn test_keyword_domain_inference() {
        assert_eq!(infer_domain_from_goal("Which GENE drives ageing?"), "biology");
        assert_eq!(infer_domain_from_goal("Improve patient outcomes"), "medicine");
        assert_eq!(infer_domain_from_goal("faster sorting algorithm"), "computer_science");
        assert_eq!(infer_domain_from_goal("why is the sky blue"), "general");
    }

    #[tokio::test]
    async fn test_no_literature_uses_note_without_backend() {
        let provider = Arc::new(MockLlmProvider::new());
        let agg = ObservationAggregator::new(Brain::new(provider.clone(), 0.2));
        let patch = agg.aggregate(&ResearchState::new("goal"), &[]).await;
        assert_eq!(patch.observations.as_deref(), Some(GENERAL_KNOWLEDGE_NOTE));
        assert!(provider.prompts().is_empty());
    }

    #[tokio::test]
    async fn test_extraction_is_formatted() {
        let provider = MockLlmProvider::new();
        provider.queue_response(r#"{"domain": "astronomy"}"#);
        provider.queue_response(
            r#"{"extracted_observations": [{"description": "Stars twinkle", "source": "Paper A"}, {"statement": "Planets do not"}], "observation_summary": "Scintillation"}"#,
        );
        let provider = Arc::new(provider);
        let agg = ObservationAggregator::new(Brain::new(provider.clone(), 0.2));
        let state = ResearchState::new("why do stars twinkle").with_literature("Some paper text");

        let patch = agg.aggregate(&state, &[]).await;
        let text = patch.observations.unwrap();
        assert!(text.contains("Scintillation"));
        assert!(text.contains("- Observation 1: Stars twinkle (Source: Paper A)"));
        assert!(text.contains("- Observation 2: Planets do not (Source: Unknown)"));
        assert!(patch.errors.is_empty());
        assert!(provider.prompts()[1].contains("Domain: general"));
    }

    #[tokio::test]
    async fn test_extraction_failure_is_logged() {
        let provider = MockLlmProvider::new();
        provider.queue_response(r#"{"domain": "physics"}"#);
        provider.queue_response("nothing structured");
        let agg = ObservationAggregator::new(Brain::new(Arc::new(provider), 0.2));
        let state = ResearchState::new("goal").with_literature("text");
        let patch = agg.aggregate(&state, &[]).await;
        assert_eq!(patch.observations.as_deref(), Some(EXTRACTION_FAILED_NOTE));
        assert_eq!(patch.errors.len(), 1);
    }
}
