//! Round-by-round progress on stderr.

use cosci_core::decision::Decision;
use cosci_core::{ResearchState, RouterCallback, Stage};

pub struct StderrProgress;

#[async_trait::async_trait]
impl RouterCallback for StderrProgress {
    async fn on_decision(&self, decision: &Decision) {
        eprintln!(
            "[round {}] {} - {}",
            decision.iteration, decision.next_stage, decision.rationale
        );
        if let Some(warning) = &decision.precedence_warning {
            eprintln!("  precedence: {}", warning);
        }
    }

    async fn on_stage_complete(&self, stage: Stage, state: &ResearchState) {
        eprintln!(
            "  {} done: {} hypotheses, top rating {:.0}, {} errors",
            stage,
            state.hypotheses.len(),
            state.top_rating(),
            state.errors.len()
        );
    }

    async fn on_terminate(&self, state: &ResearchState) {
        match state.top_hypothesis() {
            Some(top) => eprintln!("Best hypothesis ({:.0}): {}", top.rating, top.title()),
            None => eprintln!("Run finished without hypotheses"),
        }
    }
}
