//! Error types for the cosci core.
//!
//! Uses `thiserror` for public API error types. Only the supervisor and the
//! configuration/checkpoint layers surface errors to callers; stage workers
//! fold their failures into the `errors` log of the research state.

use std::path::PathBuf;

/// Top-level error type for the cosci core library.
#[derive(Debug, thiserror::Error)]
pub enum CosciError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Supervisor error: {0}")]
    Supervisor(#[from] SupervisorError),

    #[error("Stage error: {0}")]
    Stage(#[from] StageError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from reasoning backend interactions.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LlmError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Provider connection failed: {message}")]
    Connection { message: String },

    #[error("Unsupported provider: {provider}")]
    UnsupportedProvider { provider: String },
}

/// Backend output that does not match the expected structure.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("no structured block found in response")]
    NoStructuredBlock,

    #[error("invalid JSON: {message}")]
    InvalidJson { message: String },

    #[error("missing field '{field}'")]
    MissingField { field: String },

    #[error("unknown stage '{stage}'")]
    UnknownStage { stage: String },

    #[error("parameters missing or empty")]
    EmptyParameters,

    #[error("parameters do not match the '{stage}' schema: {message}")]
    SchemaMismatch { stage: String, message: String },
}

/// Configuration failures of a single stage round. The round becomes a no-op.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StageError {
    #[error("research goal is empty")]
    MissingGoal,

    #[error("strategy '{strategy}' requires at least {required} target id(s), got {got}")]
    MissingTargets {
        strategy: String,
        required: usize,
        got: usize,
    },

    #[error("unknown hypothesis id: {id}")]
    UnknownHypothesis { id: String },

    #[error("no hypotheses available")]
    NoHypotheses,
}

/// Fatal failures of the policy engine.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("decision still invalid after {attempts} attempts: {source}")]
    InvalidDecision {
        attempts: usize,
        #[source]
        source: ParseError,
    },

    #[error("backend failed after {attempts} attempts: {source}")]
    Backend {
        attempts: usize,
        #[source]
        source: LlmError,
    },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },

    #[error("Environment variable not set: {var}")]
    EnvVarMissing { var: String },
}

/// Errors from checkpoint persistence.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("Failed to write checkpoint {path}: {message}")]
    WriteFailed { path: PathBuf, message: String },

    #[error("Failed to read checkpoint {path}: {message}")]
    ReadFailed { path: PathBuf, message: String },

    #[error("Unsupported checkpoint version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },
}

/// A type alias for results using the top-level `CosciError`.
pub type Result<T> = std::result::Result<T, CosciError>;
