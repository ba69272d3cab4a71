mod plan;
mod simulated;

use anyhow::Context;
use clap::{Parser, Subcommand};
use guild_orchestrator::{Orchestrator, OrchestratorConfig, StaticRoster, TaskRegistry};
use plan::{parse_plan, Plan};
use simulated::SimulatedExecutor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "guild", about = "Guild: task orchestration for agent organizations")]
struct Cli {
    /// Orchestrator config file; replaces the plan's `[config]` section
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a plan against the simulated executor
    Run {
        /// Plan file with agents and tasks
        #[arg(short, long)]
        plan: PathBuf,
        /// Stop after this many cycles even if work remains
        #[arg(long, default_value_t = 100)]
        max_cycles: usize,
        /// Tool calls each simulated attempt performs
        #[arg(long, default_value_t = 3)]
        tool_calls: u32,
        /// Delay per simulated tool call, in milliseconds
        #[arg(long, default_value_t = 0)]
        step_delay_ms: u64,
        /// Keep polling until Ctrl-C instead of stopping once settled
        #[arg(long)]
        follow: bool,
    },
    /// Load a plan and report dependency errors without executing it
    Validate {
        /// Plan file with agents and tasks
        #[arg(short, long)]
        plan: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            plan,
            max_cycles,
            tool_calls,
            step_delay_ms,
            follow,
        } => {
            let mut loaded = load_plan(&plan)?;
            if let Some(path) = &cli.config {
                loaded.config = load_config(path).await?;
            }
            run_plan(
                loaded,
                max_cycles,
                SimulatedExecutor::new(tool_calls, Duration::from_millis(step_delay_ms)),
                follow,
            )
            .await?;
        }
        Commands::Validate { plan } => {
            let loaded = load_plan(&plan)?;
            let registry = TaskRegistry::new();
            let ids = loaded
                .register(&registry)
                .with_context(|| format!("Plan '{}' has invalid dependencies", plan.display()))?;

            let eligible: Vec<&str> = registry
                .list_eligible()
                .iter()
                .filter_map(|task| {
                    ids.iter()
                        .find(|(_, id)| **id == task.id)
                        .map(|(key, _)| key.as_str())
                })
                .collect();
            let report = serde_json::json!({
                "plan": plan.display().to_string(),
                "agents": loaded.agents.len(),
                "tasks": registry.len(),
                "initially_eligible": eligible,
                "valid": true,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

fn load_plan(path: &Path) -> anyhow::Result<Plan> {
    let plan = parse_plan(path)?;
    info!(
        path = %path.display(),
        agents = plan.agents.len(),
        tasks = plan.tasks.len(),
        "Plan loaded"
    );
    Ok(plan)
}

async fn load_config(path: &Path) -> anyhow::Result<OrchestratorConfig> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    Ok(OrchestratorConfig::from_toml_str(&raw)?)
}

async fn run_plan(
    plan: Plan,
    max_cycles: usize,
    executor: SimulatedExecutor,
    follow: bool,
) -> anyhow::Result<()> {
    if plan.agents.is_empty() {
        warn!("Plan has no agents; every task will stay pending");
    }

    let roster = Arc::new(StaticRoster::new(plan.agents.clone()));
    let orchestrator = Arc::new(Orchestrator::new(
        plan.config.clone(),
        roster,
        Arc::new(executor),
    )?);
    plan.register(orchestrator.registry())
        .context("Plan has invalid dependencies")?;

    let summary = if follow {
        let (tx, rx) = watch::channel(false);
        let runner = {
            let orchestrator = Arc::clone(&orchestrator);
            tokio::spawn(async move { orchestrator.run(rx).await })
        };
        tokio::signal::ctrl_c().await?;
        info!("Shutdown requested");
        // The receiver lives inside the runner; a send error means it already stopped.
        let _ = tx.send(true);
        runner.await?;
        orchestrator.run_until_settled(0).await
    } else {
        orchestrator.run_until_settled(max_cycles).await
    };

    let report = serde_json::json!({
        "summary": summary,
        "tasks": orchestrator.registry().all_tasks(),
        "agents": orchestrator.monitor().to_json().await,
        "chaos": orchestrator.chaos().stats(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
