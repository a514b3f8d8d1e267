//! `wavecrew workers` commands: inspect the registry and probe workers.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use wavecrew_core::hub::Hub;
use wavecrew_core::worker::{WorkerRegistry, WorkerSupervisor};

use crate::WorkersCommands;
use crate::config::WavecrewConfig;

/// Dispatch a `WorkersCommands` variant to the appropriate handler.
pub async fn run_workers_command(command: WorkersCommands, config: &WavecrewConfig) -> Result<()> {
    let registry = WorkerRegistry::load(&config.registry_path)
        .with_context(|| format!("failed to load worker registry {}", config.registry_path.display()))?;
    match command {
        WorkersCommands::List => cmd_list(&registry),
        WorkersCommands::Tools { id, timeout } => cmd_tools(&registry, &id, Duration::from_secs(timeout)).await,
    }
}

fn cmd_list(registry: &WorkerRegistry) -> Result<()> {
    if registry.workers.is_empty() {
        println!("No workers in registry.");
        return Ok(());
    }

    println!("{:<20} {:<8} {:<8} {:>4}  COMMAND", "ID", "TYPE", "ENABLED", "MAX");
    for entry in &registry.workers {
        let config = entry.to_config()?;
        let mut command = config.command.clone();
        if !config.args.is_empty() {
            command.push(' ');
            command.push_str(&config.args.join(" "));
        }
        println!(
            "{:<20} {:<8} {:<8} {:>4}  {}",
            config.id,
            config.kind.as_str(),
            if config.enabled { "yes" } else { "no" },
            config.max_concurrent_tasks,
            command
        );
        if !config.completion_signal {
            println!("{:<20} (no completion signal, assumed after {:?})", "", config.completion_fallback);
        }
    }
    if !registry.global_forbid.is_empty() {
        println!();
        println!("Global forbid: {}", registry.global_forbid.join(", "));
    }
    Ok(())
}

async fn cmd_tools(registry: &WorkerRegistry, worker_id: &str, timeout: Duration) -> Result<()> {
    let entry = registry
        .workers
        .iter()
        .find(|w| w.id == worker_id)
        .with_context(|| format!("worker {worker_id} not found in registry"))?;
    let supervisor = WorkerSupervisor::new(entry.to_config()?, Arc::new(Hub::new()));

    supervisor
        .start()
        .await
        .with_context(|| format!("failed to start worker {worker_id}"))?;
    let tools = supervisor.list_tools(timeout).await;
    if let Err(e) = supervisor.stop().await {
        tracing::warn!(worker_id = %worker_id, error = %e, "failed to stop worker cleanly");
    }
    let tools = tools.with_context(|| format!("worker {worker_id} did not list its tools"))?;

    if tools.is_empty() {
        println!("Worker {worker_id} offers no tools.");
        return Ok(());
    }
    println!("Tools offered by {worker_id}:");
    for tool in &tools {
        if tool.description.is_empty() {
            println!("  {}", tool.name);
        } else {
            println!("  {}: {}", tool.name, tool.description);
        }
    }
    Ok(())
}
