//! `iceos` CLI entry-point.
//!
//! Available sub-commands:
//! - `validate`: check a blueprint JSON file and print its levels.
//! - `run`: execute a blueprint and print the run result.
//! - `serve`: start the API server.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use engine::{
    Blueprint, EngineConfig, SqlStateStore, StateStore, Workflow, WorkflowExecutionContext,
    WorkflowExecutor,
};
use nodes::Capabilities;

#[derive(Parser)]
#[command(name = "iceos", about = "Workflow DAG execution engine", version)]
struct Cli {
    /// Engine configuration (TOML).
    #[arg(long, global = true, env = "ICEOS_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a blueprint JSON file.
    Validate {
        path: PathBuf,
    },
    /// Execute a blueprint JSON file.
    Run {
        path: PathBuf,
        /// Initial inputs as a JSON object.
        #[arg(long)]
        input: Option<String>,
    },
    /// Start the REST API server.
    Serve {
        #[arg(long, default_value = "0.0.0.0:8080")]
        bind: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("iceos=info,engine=info,nodes=info,api=info,warn")),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("cannot load config {}", path.display()))?,
        None => EngineConfig::default(),
    };

    match cli.command {
        Command::Validate { path } => {
            let workflow = load_workflow(&path)?;
            println!("Blueprint '{}' is valid.", workflow.id);
            for (level, ids) in workflow.graph().get_level_nodes() {
                println!("  level {level}: {}", ids.join(", "));
            }
        }
        Command::Run { path, input } => {
            let workflow = load_workflow(&path)?;
            let inputs = parse_inputs(input.as_deref())?;
            let executor = WorkflowExecutor::with_builtins(Capabilities::new(), config.executor_config())?;

            let mut ctx = WorkflowExecutionContext::new(config.preferences())
                .with_flush_threshold(config.context.flush_threshold);
            if let Some(store) = open_store(&config).await? {
                ctx = ctx.with_store(store);
            }

            let run = executor.run(&workflow, inputs, &mut ctx).await?;
            println!("{}", serde_json::to_string_pretty(&run)?);
            if !run.success {
                bail!("run {} finished with failed nodes", run.run_id);
            }
        }
        Command::Serve { bind } => {
            info!("Starting API server on {bind}");
            let executor = WorkflowExecutor::with_builtins(Capabilities::new(), config.executor_config())?;
            let mut state = api::AppState::new(executor, config.preferences());
            if let Some(store) = open_store(&config).await? {
                state = state.with_store(store, config.context.flush_threshold);
            }
            api::serve(&bind, state).await?;
        }
    }
    Ok(())
}

fn load_workflow(path: &Path) -> Result<Workflow> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read file {}", path.display()))?;
    let blueprint = Blueprint::from_json(&content)?;
    Ok(Workflow::from_blueprint(&blueprint)?)
}

fn parse_inputs(raw: Option<&str>) -> Result<Map<String, Value>> {
    let Some(raw) = raw else {
        return Ok(Map::new());
    };
    match serde_json::from_str::<Value>(raw).context("--input is not valid JSON")? {
        Value::Object(map) => Ok(map),
        other => bail!("--input must be a JSON object, got {other}"),
    }
}

/// `DATABASE_URL` wins over the config file; no URL means in-memory runs.
async fn open_store(config: &EngineConfig) -> Result<Option<Arc<dyn StateStore>>> {
    let url = std::env::var("DATABASE_URL")
        .ok()
        .or_else(|| config.persistence.database_url.clone());
    let Some(url) = url else {
        return Ok(None);
    };
    if url.contains("${") {
        warn!("database_url still contains an unexpanded variable: {url}");
    }
    let store = SqlStateStore::connect(&url)
        .await
        .with_context(|| format!("cannot open state store at {url}"))?;
    Ok(Some(Arc::new(store)))
}
