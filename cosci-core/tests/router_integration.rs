//! End-to-end tests for the research loop.
//!
//! The supervisor backend replays a scripted sequence of decisions while the
//! worker backend answers by prompt header, so sharded stages can run
//! concurrently without depending on arrival order.

use cosci_core::brain::{Brain, MockLlmProvider};
use cosci_core::checkpoint::Checkpoint;
use cosci_core::config::{CosciConfig, PrecedenceMode};
use cosci_core::prompts::{
    ANALOGY_HEADER, BOOTSTRAP_HEADER, COMPARISON_HEADER, DEBATE_HEADER, GENERATION_HEADER,
    META_REVIEW_HEADER, REFLECTION_HEADER,
};
use cosci_core::router::{ResearchRouter, RouterCallback};
use cosci_core::state::{ResearchState, Stage};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

const PLAN: &str = r#"{"preferences": "mechanistic", "attributes": ["novel"], "constraints": [], "evaluation_criteria": ["testability"]}"#;
const REVIEW: &str = r#"{"scores": {"overall": 8, "novelty": 7, "validity": 8, "testability": 6, "specificity": 7}, "classification": "neutral", "summary": "plausible"}"#;
const VERDICT: &str = r#"{"winner": 1, "confidence": "medium"}"#;

fn worker_backend() -> Arc<MockLlmProvider> {
    let generated = Arc::new(AtomicUsize::new(0));
    Arc::new(MockLlmProvider::with_handler(move |prompt| {
        if prompt.contains(BOOTSTRAP_HEADER) {
            PLAN.to_string()
        } else if prompt.contains(GENERATION_HEADER) || prompt.contains(DEBATE_HEADER) {
            let n = generated.fetch_add(1, Ordering::SeqCst);
            format!("### Proposed Hypothesis: Mechanism {}\nCells age because of factor {}.", n, n)
        } else if prompt.contains(REFLECTION_HEADER) {
            REVIEW.to_string()
        } else if prompt.contains(COMPARISON_HEADER) {
            VERDICT.to_string()
        } else if prompt.contains(ANALOGY_HEADER) {
            "### Proposed Hypothesis: Analogy\nAgeing resembles metal fatigue.".to_string()
        } else if prompt.contains(META_REVIEW_HEADER) {
            r#"{"recurring_strengths": ["mechanistic"], "recurring_weaknesses": ["untested"]}"#
                .to_string()
        } else {
            String::new()
        }
    }))
}

fn scripted_supervisor(decisions: &[&str]) -> Arc<MockLlmProvider> {
    let provider = MockLlmProvider::new();
    for decision in decisions {
        provider.queue_response(*decision);
    }
    Arc::new(provider)
}

#[derive(Default)]
struct StageLog {
    stages: Mutex<Vec<Stage>>,
    terminated: AtomicUsize,
}

#[async_trait::async_trait]
impl RouterCallback for StageLog {
    async fn on_stage_complete(&self, stage: Stage, _state: &ResearchState) {
        self.stages.lock().unwrap().push(stage);
    }

    async fn on_terminate(&self, _state: &ResearchState) {
        self.terminated.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_full_research_cycle() {
    let supervisor = scripted_supervisor(&[
        r#"{"next_stage": "generate", "parameters": {"quantity": 3}, "rationale": "seed the pool"}"#,
        r#"{"next_stage": "reflect", "parameters": {"review_depth": "standard"}, "rationale": "review"}"#,
        r#"{"next_stage": "rank", "parameters": {}, "rationale": "rank"}"#,
        r#"{"next_stage": "evolve", "parameters": {"strategy": "analogical"}, "rationale": "explore"}"#,
        r#"{"next_stage": "meta_review", "parameters": {"scope": "full_history"}, "rationale": "digest"}"#,
        r#"{"next_stage": "terminate", "parameters": {"reason": "breakthrough_achieved"}, "rationale": "done"}"#,
    ]);
    let worker = worker_backend();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("runs").join("cycle.json");

    let mut config = CosciConfig::default();
    config.checkpoint.path = Some(path.clone());
    config.checkpoint.every_round = true;

    let log = Arc::new(StageLog::default());
    let router = ResearchRouter::new(
        Brain::new(supervisor.clone(), 0.2),
        Brain::new(worker.clone(), 0.7),
        &config,
    )
    .with_callback(log.clone());

    let mut state = ResearchState::new("why do cells age");
    router.run(&mut state).await.unwrap();

    assert_eq!(
        *log.stages.lock().unwrap(),
        vec![
            Stage::Generate,
            Stage::Reflect,
            Stage::Rank,
            Stage::Evolve,
            Stage::MetaReview,
            Stage::Terminate,
        ]
    );
    assert_eq!(log.terminated.load(Ordering::SeqCst), 1);
    assert_eq!(supervisor.prompts().len(), 6);
    assert_eq!(state.plan_config.preferences, "mechanistic");

    assert_eq!(state.hypotheses.len(), 4);
    let evolved: Vec<_> = state
        .hypotheses
        .iter()
        .filter(|h| !h.evolved_from.is_empty())
        .collect();
    assert_eq!(evolved.len(), 1);
    assert!(!evolved[0].is_reviewed);

    let originals: Vec<_> = state
        .hypotheses
        .iter()
        .filter(|h| h.evolved_from.is_empty())
        .collect();
    assert_eq!(originals.len(), 3);
    assert!(originals.iter().all(|h| h.is_reviewed && h.is_ranked));
    assert!(originals.iter().all(|h| h.reviews.len() == 1));

    assert_eq!(state.run_metadata.iteration_count, 6);
    assert_eq!(state.run_metadata.decision_history.len(), 6);
    assert_eq!(state.next_stage, Some(Stage::Terminate));
    assert!(state.observations.is_some());
    assert!(state.review_summary.is_some());
    assert!(!state.errors.iter().any(|e| e.contains("did not complete")));
    assert!(state.invariant_violations().is_empty());

    let saved = Checkpoint::load(&path).unwrap().into_state();
    assert_eq!(saved.hypotheses.len(), 4);
    assert_eq!(saved.run_metadata.iteration_count, 6);
}

#[tokio::test]
async fn test_enforced_precedence_reviews_before_ranking() {
    let supervisor = scripted_supervisor(&[
        r#"{"next_stage": "generate", "parameters": {"quantity": 2}}"#,
        r#"{"next_stage": "rank", "parameters": {}}"#,
    ]);
    let mut config = CosciConfig::default();
    config.supervisor.max_iterations = 2;
    config.supervisor.precedence_mode = PrecedenceMode::Enforce;

    let log = Arc::new(StageLog::default());
    let router = ResearchRouter::new(
        Brain::new(supervisor, 0.2),
        Brain::new(worker_backend(), 0.7),
        &config,
    )
    .with_callback(log.clone());

    let mut state = ResearchState::new("why do cells age");
    router.run(&mut state).await.unwrap();

    assert_eq!(
        *log.stages.lock().unwrap(),
        vec![Stage::Generate, Stage::Reflect, Stage::Terminate]
    );
    assert!(state.hypotheses.iter().all(|h| h.is_reviewed));
    assert!(state.hypotheses.iter().all(|h| !h.is_ranked));
    assert!(!state.errors.is_empty());
}

#[tokio::test]
async fn test_resume_from_checkpoint_continues_iteration_count() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("resume.json");

    let mut config = CosciConfig::default();
    config.supervisor.max_iterations = 1;
    config.checkpoint.path = Some(path.clone());
    let first = ResearchRouter::new(
        Brain::new(
            scripted_supervisor(&[r#"{"next_stage": "generate", "parameters": {"quantity": 1}}"#]),
            0.2,
        ),
        Brain::new(worker_backend(), 0.7),
        &config,
    );
    let mut state = ResearchState::new("why do cells age");
    first.run(&mut state).await.unwrap();
    assert_eq!(state.hypotheses.len(), 1);

    let mut resumed = cosci_core::load_state(&path).unwrap();
    config.supervisor.max_iterations = 2;
    let second = ResearchRouter::new(
        Brain::new(
            scripted_supervisor(&[r#"{"next_stage": "generate", "parameters": {"quantity": 1}}"#]),
            0.2,
        ),
        Brain::new(worker_backend(), 0.7),
        &config,
    );
    second.run(&mut resumed).await.unwrap();
    assert_eq!(resumed.hypotheses.len(), 2);
    assert_eq!(resumed.run_metadata.iteration_count, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_invariants_hold_after_every_round() {
    let supervisor = scripted_supervisor(&[
        r#"{"next_stage": "generate", "parameters": {"quantity": 3}}"#,
        r#"{"next_stage": "reflect", "parameters": {}}"#,
        r#"{"next_stage": "rank", "parameters": {}}"#,
        r#"{"next_stage": "evolve", "parameters": {"strategy": "analogical"}}"#,
        r#"{"next_stage": "generate", "parameters": {"quantity": 2}}"#,
        r#"{"next_stage": "reflect", "parameters": {}}"#,
        r#"{"next_stage": "rank", "parameters": {}}"#,
        r#"{"next_stage": "meta_review", "parameters": {"scope": "last_3_iterations"}}"#,
        r#"{"next_stage": "terminate", "parameters": {"reason": "breakthrough_achieved"}}"#,
    ]);
    let router = ResearchRouter::new(
        Brain::new(supervisor, 0.2),
        Brain::new(worker_backend(), 0.7),
        &CosciConfig::default(),
    );

    let mut state = ResearchState::new("why do cells age");
    let mut stages = Vec::new();
    loop {
        let stage = router.step(&mut state).await.unwrap();
        stages.push(stage);
        assert_eq!(state.invariant_violations(), Vec::<String>::new(), "after {}", stage);
        assert!(state.hypotheses.iter().all(|h| !h.is_ranked || h.is_reviewed));
        let ratings: Vec<f64> = state.hypotheses.iter().map(|h| h.rating).collect();
        if stage == Stage::Rank {
            assert!(ratings.windows(2).all(|w| w[0] >= w[1]));
        }
        if stage == Stage::Terminate {
            break;
        }
    }

    assert_eq!(stages.len(), 9);
    assert_eq!(state.hypotheses.len(), 6);
    assert!(state.hypotheses.iter().all(|h| h.is_reviewed && h.is_ranked));
    assert_eq!(state.run_metadata.iteration_count, 9);
}
