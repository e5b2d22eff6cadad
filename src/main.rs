//! Drover CLI entry point.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::Table;

use drover::domain::models::{EngineConfig, WorkflowDefinition, WorkflowStatus};
use drover::infrastructure::config::ConfigLoader;
use drover::infrastructure::logging;
use drover::services::{AgentRegistry, DependencyResolver, Engine};

#[derive(Parser)]
#[command(name = "drover", version, about = "Workflow orchestration engine for multi-agent data pipelines")]
struct Cli {
    /// Path to a configuration file (defaults to the .drover/ hierarchy)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a workflow definition file without running it
    Validate {
        /// Workflow definition (YAML or JSON)
        file: PathBuf,
    },
    /// Run a workflow definition to completion in-process
    Run {
        /// Workflow definition (YAML or JSON)
        file: PathBuf,
        /// Give up if the workflow has not finished after this many seconds
        #[arg(long, default_value_t = 3600)]
        timeout_s: u64,
        /// Client identity recorded on the run
        #[arg(long)]
        client_id: Option<String>,
    },
    /// Start the engine and serve until interrupted
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path)?,
        None => ConfigLoader::load()?,
    };
    let _log_guard = logging::init(&config.logging)?;

    match cli.command {
        Commands::Validate { file } => validate(&file, &config),
        Commands::Run {
            file,
            timeout_s,
            client_id,
        } => run(&file, config, timeout_s, client_id).await,
        Commands::Serve => serve(config).await,
    }
}

fn load_definition(path: &Path) -> Result<WorkflowDefinition> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let definition = if path.extension().is_some_and(|e| e == "json") {
        serde_json::from_str(&raw)
            .with_context(|| format!("invalid JSON workflow in {}", path.display()))?
    } else {
        serde_yaml::from_str(&raw)
            .with_context(|| format!("invalid YAML workflow in {}", path.display()))?
    };
    Ok(definition)
}

fn validate(file: &Path, config: &EngineConfig) -> Result<()> {
    let definition = load_definition(file)?;
    definition.validate()?;

    let registry = AgentRegistry::new(config.agent_actions.clone());
    let registry_errors = registry.validate_tasks(&definition.tasks);
    if !registry_errors.is_empty() {
        for error in &registry_errors {
            eprintln!("error: {error}");
        }
        bail!("{} agent/action violation(s)", registry_errors.len());
    }

    DependencyResolver::new().validate(&definition.tasks)?;

    println!(
        "ok: {} ({} tasks)",
        definition.name.as_deref().unwrap_or("unnamed workflow"),
        definition.tasks.len()
    );
    Ok(())
}

async fn run(
    file: &Path,
    config: EngineConfig,
    timeout_s: u64,
    client_id: Option<String>,
) -> Result<()> {
    let definition = load_definition(file)?;
    let engine = Engine::from_config(config).await?;

    // Stream events to stdout while the workflow runs.
    let mut events = engine.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(envelope) = events.recv().await {
            let task = envelope.event.task_id().unwrap_or("-");
            println!(
                "{:<32} run={} task={}",
                envelope.event.kind(),
                envelope.event.run_id(),
                task
            );
        }
    });

    engine.start();
    let run_id = engine
        .init_workflow(definition, serde_json::Value::Null, client_id)
        .await?;
    engine.start_workflow(&run_id).await?;

    let deadline = Instant::now() + Duration::from_secs(timeout_s);
    let final_status = loop {
        let report = engine
            .get_workflow_status(&run_id)
            .await?
            .context("workflow vanished from the records store")?;
        if report.status.is_terminal() {
            break report;
        }
        if Instant::now() > deadline {
            engine
                .cancel_workflow(&run_id, "cli timeout", true, "drover-cli")
                .await?;
            bail!("workflow {run_id} did not finish within {timeout_s}s");
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    };

    let mut table = Table::new();
    table.set_header(vec!["task", "agent", "action", "status", "retries", "error"]);
    for task in engine.list_tasks(&run_id).await? {
        table.add_row(vec![
            task.task_id.clone(),
            task.agent.clone(),
            task.action.clone(),
            task.status.to_string(),
            task.retries.to_string(),
            task.last_error.clone().unwrap_or_default(),
        ]);
    }
    println!("{table}");
    println!(
        "workflow {} finished: {} ({}/{} tasks completed, {} failed)",
        run_id,
        final_status.status,
        final_status.counters.completed_tasks,
        final_status.counters.total_tasks,
        final_status.counters.failed_tasks
    );

    engine.shutdown().await;
    printer.abort();

    if final_status.status != WorkflowStatus::Completed {
        bail!("workflow finished {}", final_status.status);
    }
    Ok(())
}

async fn serve(config: EngineConfig) -> Result<()> {
    let engine = Engine::from_config(config).await?;
    engine.start();
    println!("drover engine running; press ctrl-c to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    println!("shutting down...");
    engine.shutdown().await;
    Ok(())
}
