//! Cosci CLI: runs the hypothesis research loop from the terminal.
//!
//! The final checkpoint is printed to stdout as JSON; progress and logs go
//! to stderr and a daily JSON log file.

mod commands;
mod progress;

use anyhow::Context;
use clap::Parser;
use cosci_core::{CosciConfig, ResearchRouter, ResearchState};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Cosci: supervisor-driven hypothesis generation, review and ranking
#[derive(Parser, Debug)]
#[command(name = "cosci", version, about, long_about = None)]
struct Cli {
    /// Research goal
    #[arg(short, long, conflicts_with = "input_json")]
    goal: Option<String>,

    /// Initial state as JSON (a bare state or a saved checkpoint)
    #[arg(long)]
    input_json: Option<PathBuf>,

    /// Literature text made available to the observation stage
    #[arg(long)]
    literature_file: Option<PathBuf>,

    /// Iteration cap
    #[arg(long)]
    max_iterations: Option<u32>,

    /// Model used by the supervisor
    #[arg(short, long)]
    model: Option<String>,

    /// Model used by every other stage
    #[arg(long)]
    worker_model: Option<String>,

    /// Sampling temperature for the supervisor backend
    #[arg(long)]
    temperature: Option<f32>,

    /// Write a checkpoint to this path after every round
    #[arg(long)]
    checkpoint: Option<PathBuf>,

    /// Workspace directory
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress progress output
    #[arg(short, long)]
    quiet: bool,

    /// Subcommand
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Write a default `.cosci/config.toml` into the workspace
    Init,
    /// Print the effective configuration
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "cosci", "cosci")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "cosci.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    if let Some(Commands::Config { action }) = &cli.command {
        return match action {
            ConfigAction::Init => commands::config_init(&workspace),
            ConfigAction::Show => commands::config_show(&workspace),
        };
    }

    let mut config = cosci_core::load_config(Some(&workspace), None)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    apply_overrides(&cli, &mut config);
    config.validate().context("Invalid configuration")?;

    let mut state = initial_state(&cli)?;

    let mut router =
        ResearchRouter::from_config(&config).context("Failed to initialize the LLM backend")?;
    if !cli.quiet {
        router = router.with_callback(Arc::new(progress::StderrProgress));
    }

    router
        .run(&mut state)
        .await
        .context("Research run aborted")?;

    let checkpoint = cosci_core::Checkpoint::from_state(&state);
    println!("{}", checkpoint.to_json()?);
    Ok(())
}

fn apply_overrides(cli: &Cli, config: &mut CosciConfig) {
    if let Some(max_iterations) = cli.max_iterations {
        config.supervisor.max_iterations = max_iterations;
    }
    if let Some(model) = &cli.model {
        config.llm.model = model.clone();
    }
    if let Some(temperature) = cli.temperature {
        config.llm.temperature = temperature;
    }
    if let Some(worker_model) = &cli.worker_model {
        let mut worker = config.worker_llm().clone();
        worker.model = worker_model.clone();
        config.worker_llm = Some(worker);
    }
    if let Some(path) = &cli.checkpoint {
        config.checkpoint.path = Some(path.clone());
        config.checkpoint.every_round = true;
    }
}

fn initial_state(cli: &Cli) -> anyhow::Result<ResearchState> {
    let mut state = match (&cli.input_json, &cli.goal) {
        (Some(path), _) => cosci_core::load_state(path)
            .with_context(|| format!("Failed to load input state from {}", path.display()))?,
        (None, Some(goal)) => ResearchState::new(goal.clone()),
        (None, None) => anyhow::bail!("Either --goal or --input-json is required"),
    };
    if let Some(path) = &cli.literature_file {
        state.literature_text = Some(read_literature(path)?);
    }
    anyhow::ensure!(!state.goal.trim().is_empty(), "Research goal is empty");
    Ok(state)
}

fn read_literature(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read literature file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("cosci").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_overrides_are_applied() {
        let cli = parse(&[
            "--goal",
            "why do leaves fall",
            "--max-iterations",
            "4",
            "--model",
            "gpt-4.1",
            "--worker-model",
            "gpt-4o-mini",
            "--checkpoint",
            "run.json",
        ]);
        let mut config = CosciConfig::default();
        apply_overrides(&cli, &mut config);
        assert_eq!(config.supervisor.max_iterations, 4);
        assert_eq!(config.llm.model, "gpt-4.1");
        assert_eq!(config.worker_llm().model, "gpt-4o-mini");
        assert_eq!(config.checkpoint.path, Some(PathBuf::from("run.json")));
        assert!(config.checkpoint.every_round);
    }

    #[test]
    fn test_initial_state_from_goal_and_literature() {
        let dir = tempfile::tempdir().unwrap();
        let literature = dir.path().join("paper.txt");
        std::fs::write(&literature, "Leaves fall when abscission cells activate.").unwrap();
        let cli = parse(&[
            "--goal",
            "why do leaves fall",
            "--literature-file",
            literature.to_str().unwrap(),
        ]);
        let state = initial_state(&cli).unwrap();
        assert_eq!(state.goal, "why do leaves fall");
        assert!(state.literature_text.unwrap().contains("abscission"));
    }

    #[test]
    fn test_initial_state_requires_goal() {
        let cli = parse(&[]);
        assert!(initial_state(&cli).is_err());
    }

    #[test]
    fn test_goal_conflicts_with_input_json() {
        let result = Cli::try_parse_from(["cosci", "--goal", "g", "--input-json", "state.json"]);
        assert!(result.is_err());
    }
}
