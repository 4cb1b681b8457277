//! Research router: the outer loop.
//!
//! Each round asks the supervisor for a decision, applies it, runs the chosen
//! stage through the dispatcher or the matching worker and applies the
//! result. The loop ends when the supervisor decides to terminate, which it
//! always does once the iteration cap is reached.

use crate::brain::Brain;
use crate::checkpoint::Checkpoint;
use crate::config::{CheckpointConfig, CosciConfig};
use crate::decision::{Decision, StageParameters};
use crate::dispatcher::{Dispatcher, reflect_targets};
use crate::error::{CosciError, LlmError};
use crate::providers::create_provider;
use crate::state::{ResearchState, Stage, StatePatch};
use crate::supervisor::Supervisor;
use crate::tournament::Tournament;
use crate::workers::StageWorkers;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// Progress notifications emitted by the router. All methods default to no-ops.
#[async_trait]
pub trait RouterCallback: Send + Sync {
    /// A decision was made and applied to the state.
    async fn on_decision(&self, _decision: &Decision) {}

    /// The stage of the current round finished and its patch was applied.
    async fn on_stage_complete(&self, _stage: Stage, _state: &ResearchState) {}

    /// The run ended.
    async fn on_terminate(&self, _state: &ResearchState) {}
}

/// A callback that ignores every notification.
pub struct NoOpCallback;

impl RouterCallback for NoOpCallback {}

pub struct ResearchRouter {
    supervisor: Supervisor,
    dispatcher: Dispatcher,
    workers: StageWorkers,
    checkpoint: CheckpointConfig,
    callback: Arc<dyn RouterCallback>,
}

impl ResearchRouter {
    /// Wire the supervisor to `supervisor_brain` and every stage worker,
    /// including the tournament judge, to `worker_brain`.
    pub fn new(supervisor_brain: Brain, worker_brain: Brain, config: &CosciConfig) -> Self {
        let workers = StageWorkers::new(worker_brain.clone());
        let tournament = Tournament::new(worker_brain, config.tournament.clone());
        Self {
            supervisor: Supervisor::new(supervisor_brain, config.supervisor.clone()),
            dispatcher: Dispatcher::new(
                config.dispatcher.clone(),
                workers.reflector.clone(),
                tournament,
            ),
            workers,
            checkpoint: config.checkpoint.clone(),
            callback: Arc::new(NoOpCallback),
        }
    }

    /// Build both backends from configuration.
    pub fn from_config(config: &CosciConfig) -> Result<Self, LlmError> {
        let supervisor_provider = create_provider(&config.llm)?;
        let worker_config = config.worker_llm();
        let worker_provider = create_provider(worker_config)?;
        let supervisor_brain = Brain::new(supervisor_provider, config.llm.temperature)
            .with_max_tokens(config.llm.max_tokens);
        let worker_brain = Brain::new(worker_provider, worker_config.temperature)
            .with_max_tokens(worker_config.max_tokens);
        Ok(Self::new(supervisor_brain, worker_brain, config))
    }

    pub fn with_callback(mut self, callback: Arc<dyn RouterCallback>) -> Self {
        self.callback = callback;
        self
    }

    /// Run rounds until the supervisor terminates.
    ///
    /// Only a supervisor failure or a checkpoint write failure aborts the run;
    /// stage failures are recorded in `state.errors`.
    pub async fn run(&self, state: &mut ResearchState) -> Result<(), CosciError> {
        if state.plan_config.is_empty() {
            let patch = self.workers.bootstrapper.bootstrap(state).await;
            state.apply(patch);
        }

        loop {
            let stage = self.step(state).await?;
            if self.checkpoint.every_round
                && let Some(path) = &self.checkpoint.path
            {
                Checkpoint::from_state(state).save(path)?;
            }
            if stage == Stage::Terminate {
                break;
            }
        }

        info!(
            iterations = state.run_metadata.iteration_count,
            hypotheses = state.hypotheses.len(),
            top_rating = state.top_rating(),
            errors = state.errors.len(),
            "Research run finished"
        );
        self.callback.on_terminate(state).await;
        if let Some(path) = &self.checkpoint.path {
            Checkpoint::from_state(state).save(path)?;
        }
        Ok(())
    }

    /// One round: decide, then run the chosen stage. Returns the stage run.
    pub async fn step(&self, state: &mut ResearchState) -> Result<Stage, CosciError> {
        let patch = self.supervisor.decide(state).await?;
        let decision = patch.decision.clone();
        state.apply(patch);
        let Some(decision) = decision else {
            warn!("Supervisor patch carried no decision, terminating");
            return Ok(Stage::Terminate);
        };
        self.callback.on_decision(&decision).await;

        let stage = decision.next_stage;
        match &decision.parameters {
            StageParameters::Terminate(params) => {
                info!(
                    reason = ?params.reason,
                    final_hypothesis = params.final_hypothesis_id.as_deref().unwrap_or("none"),
                    "Supervisor terminated the run"
                );
            }
            StageParameters::Reflect(_) => {
                if state.observations.is_none() {
                    let (priority, _) = reflect_targets(state, &decision.parameters);
                    let patch = self.workers.observations.aggregate(state, &priority).await;
                    state.apply(patch);
                }
                let patch = self.dispatcher.dispatch(state, &decision).await;
                state.apply(patch);
            }
            StageParameters::Rank(_) => {
                let patch = self.dispatcher.dispatch(state, &decision).await;
                state.apply(patch);
            }
            params => {
                let forwarded = self.dispatcher.dispatch(state, &decision).await;
                state.apply(forwarded);
                let patch = self.run_worker(state, params).await;
                state.apply(patch);
            }
        }

        for violation in state.invariant_violations() {
            warn!(violation = %violation, "State invariant violated");
        }
        self.callback.on_stage_complete(stage, state).await;
        Ok(stage)
    }

    async fn run_worker(&self, state: &ResearchState, params: &StageParameters) -> StatePatch {
        match params {
            StageParameters::Generate(p) => self.workers.generator.generate(state, p).await,
            StageParameters::Evolve(p) => self.workers.evolver.evolve(state, p).await,
            StageParameters::MetaReview(p) => self.workers.meta_reviewer.summarize(state, p).await,
            _ => StatePatch::new(),
        }
    }
}
