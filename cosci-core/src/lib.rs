//! # Cosci Core
//!
//! Core library for the cosci research orchestrator.
//! Provides the research state model, the supervisor policy engine, the
//! sharded dispatcher, the stage workers (generation, reflection, ranking,
//! evolution, meta-review), the reasoning backend interface (brain),
//! configuration and checkpoints.

pub mod brain;
pub mod checkpoint;
pub mod config;
pub mod decision;
pub mod dispatcher;
pub mod error;
pub mod extract;
pub mod prompts;
pub mod providers;
pub mod router;
pub mod state;
pub mod supervisor;
pub mod tournament;
pub mod types;
pub mod workers;

// Re-export commonly used types at the crate root.
pub use brain::{Brain, LlmProvider, MockLlmProvider};
pub use checkpoint::{CHECKPOINT_VERSION, Checkpoint, load_state};
pub use config::{CosciConfig, LlmConfig, PrecedenceMode, load_config};
pub use decision::{Decision, StageParameters};
pub use dispatcher::{Dispatcher, WorkerPool};
pub use error::{CosciError, LlmError, Result};
pub use router::{NoOpCallback, ResearchRouter, RouterCallback};
pub use state::{Hypothesis, HypothesisId, ResearchState, Stage, StatePatch};
pub use supervisor::Supervisor;
pub use tournament::Tournament;
pub use types::{CompletionRequest, CompletionResponse, Message, Role, TokenUsage};
