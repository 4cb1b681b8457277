//! Configuration system for cosci.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> CLI args.
//! Configuration is loaded from `~/.config/cosci/config.toml` and/or `.cosci/config.toml`
//! in the workspace directory.

use crate::error::ConfigError;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CosciConfig {
    /// Backend used by the supervisor (and by workers unless `worker_llm` is set).
    pub llm: LlmConfig,
    /// Optional cheaper backend for every non-supervisor stage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_llm: Option<LlmConfig>,
    pub supervisor: SupervisorConfig,
    pub dispatcher: DispatcherConfig,
    pub tournament: TournamentConfig,
    pub checkpoint: CheckpointConfig,
}

impl CosciConfig {
    /// Reject settings that would stall or break the loop.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks: [(bool, &str); 6] = [
            (
                self.supervisor.max_iterations == 0,
                "supervisor.max_iterations must be at least 1",
            ),
            (
                self.supervisor.max_decision_attempts == 0,
                "supervisor.max_decision_attempts must be at least 1",
            ),
            (
                self.dispatcher.worker_count == 0,
                "dispatcher.worker_count must be at least 1",
            ),
            (
                self.dispatcher.reflect_shard_size == 0 || self.dispatcher.rank_shard_size == 0,
                "dispatcher shard sizes must be at least 1",
            ),
            (
                self.tournament.match_count == 0,
                "tournament.match_count must be at least 1",
            ),
            (
                !(self.tournament.base_k.is_finite() && self.tournament.base_k > 0.0),
                "tournament.base_k must be a positive number",
            ),
        ];
        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, message)) => Err(ConfigError::Invalid {
                message: (*message).to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Backend settings for non-supervisor stages.
    pub fn worker_llm(&self) -> &LlmConfig {
        self.worker_llm.as_ref().unwrap_or(&self.llm)
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })
    }
}

/// Reasoning backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider name: "openai" or any OpenAI-compatible endpoint ("local", "ollama", "vllm").
    pub provider: String,
    /// Model identifier.
    pub model: String,
    /// Environment variable name containing the API key.
    pub api_key_env: String,
    /// Optional base URL override for the API endpoint.
    pub base_url: Option<String>,
    /// Maximum tokens to generate in a response.
    pub max_tokens: usize,
    /// Sampling temperature.
    pub temperature: f32,
    /// Optional HTTP timeout. No timeout when unset.
    pub timeout_secs: Option<u64>,
    /// Backoff policy for transient backend errors.
    pub retry: RetryConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            base_url: None,
            max_tokens: 4096,
            temperature: 0.2,
            timeout_secs: None,
            retry: RetryConfig::default(),
        }
    }
}

/// Exponential backoff for rate limits, timeouts and dropped connections.
///
/// Off by default: a failed backend call surfaces to the stage that made it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt. Zero disables retrying.
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    /// Add up to 25% random jitter to each delay.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_backoff_ms: 1000,
            max_backoff_ms: 60_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// How the supervisor treats a stage that breaks the review -> rank -> summary order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrecedenceMode {
    /// Record a diagnostic and run the chosen stage anyway.
    #[default]
    Advisory,
    /// Record a diagnostic and run the suggested stage instead.
    Enforce,
}

impl fmt::Display for PrecedenceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrecedenceMode::Advisory => write!(f, "advisory"),
            PrecedenceMode::Enforce => write!(f, "enforce"),
        }
    }
}

/// Policy engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Iteration cap; the run terminates once reached.
    pub max_iterations: u32,
    pub precedence_mode: PrecedenceMode,
    /// Attempts to obtain a valid decision (first try plus corrective retries).
    pub max_decision_attempts: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            precedence_mode: PrecedenceMode::Advisory,
            max_decision_attempts: 2,
        }
    }
}

/// Sharded dispatcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub worker_count: usize,
    pub reflect_shard_size: usize,
    pub rank_shard_size: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            worker_count: 2,
            reflect_shard_size: 3,
            rank_shard_size: 2,
        }
    }
}

/// Tournament ranking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TournamentConfig {
    /// Base Elo K-factor, scaled by the judge's confidence.
    pub base_k: f64,
    /// Matches per newly reviewed hypothesis.
    pub match_count: usize,
    /// Rating gap below which comparisons use the debate format.
    pub debate_threshold: f64,
    /// Whether fill-in sampling may pick an opponent already selected this round.
    pub allow_duplicate_opponents: bool,
    /// Fixed RNG seed for reproducible opponent sampling.
    pub seed: Option<u64>,
}

impl Default for TournamentConfig {
    fn default() -> Self {
        Self {
            base_k: 32.0,
            match_count: 3,
            debate_threshold: 75.0,
            allow_duplicate_opponents: true,
            seed: None,
        }
    }
}

/// Checkpoint persistence configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    pub path: Option<PathBuf>,
    /// Save after every round instead of only at the end.
    pub every_round: bool,
}

/// Load configuration with layered sources.
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&CosciConfig>,
) -> Result<CosciConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(CosciConfig::default()));

    // User-level config
    if let Some(config_dir) = directories::ProjectDirs::from("dev", "cosci", "cosci") {
        let user_config = config_dir.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    // Workspace-level config
    if let Some(ws) = workspace {
        let ws_config = ws.join(".cosci").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // Environment variables (COSCI_LLM__MODEL, COSCI_DISPATCHER__WORKER_COUNT, etc.)
    figment = figment.merge(Env::prefixed("COSCI_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CosciConfig::default();
        assert_eq!(config.supervisor.max_iterations, 20);
        assert_eq!(config.dispatcher.worker_count, 2);
        assert_eq!(config.dispatcher.reflect_shard_size, 3);
        assert_eq!(config.dispatcher.rank_shard_size, 2);
        assert_eq!(config.tournament.match_count, 3);
        assert_eq!(config.tournament.base_k, 32.0);
        assert_eq!(config.supervisor.precedence_mode, PrecedenceMode::Advisory);
        assert_eq!(config.llm.retry.max_retries, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_shard_size() {
        let mut config = CosciConfig::default();
        config.dispatcher.rank_shard_size = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("shard sizes"));
    }

    #[test]
    fn test_validate_rejects_zero_iterations() {
        let mut config = CosciConfig::default();
        config.supervisor.max_iterations = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_worker_llm_falls_back_to_supervisor_llm() {
        let mut config = CosciConfig::default();
        assert_eq!(config.worker_llm().model, "gpt-4o");
        config.worker_llm = Some(LlmConfig {
            model: "gpt-4o-mini".into(),
            ..Default::default()
        });
        assert_eq!(config.worker_llm().model, "gpt-4o-mini");
    }

    #[test]
    fn test_workspace_config_is_merged() {
        let dir = tempfile::tempdir().unwrap();
        let cfg_dir = dir.path().join(".cosci");
        std::fs::create_dir_all(&cfg_dir).unwrap();
        std::fs::write(
            cfg_dir.join("config.toml"),
            "[dispatcher]\nworker_count = 4\n\n[supervisor]\nprecedence_mode = \"enforce\"\n",
        )
        .unwrap();

        let config = load_config(Some(dir.path()), None).unwrap();
        assert_eq!(config.dispatcher.worker_count, 4);
        assert_eq!(config.dispatcher.reflect_shard_size, 3);
        assert_eq!(config.supervisor.precedence_mode, PrecedenceMode::Enforce);
    }

    #[test]
    fn test_overrides_win() {
        let mut overrides = CosciConfig::default();
        overrides.supervisor.max_iterations = 3;
        let config = load_config(None, Some(&overrides)).unwrap();
        assert_eq!(config.supervisor.max_iterations, 3);
    }

    #[test]
    fn test_to_toml_roundtrips_through_figment() {
        let mut config = CosciConfig::default();
        config.tournament.seed = Some(7);
        let rendered = config.to_toml().unwrap();
        let parsed: CosciConfig = Figment::from(Toml::string(&rendered)).extract().unwrap();
        assert_eq!(parsed.tournament.seed, Some(7));
    }
}
