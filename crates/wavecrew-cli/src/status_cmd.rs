//! `wavecrew status` command: show recorded runs and their status history.

use anyhow::{Context, Result};
use uuid::Uuid;

use wavecrew_core::store::{FsStore, OrchestrationRecord, Store};

use crate::config::WavecrewConfig;

const REQUEST_WIDTH: usize = 48;

/// Run the status command.
///
/// When `orchestration_id` is `Some`, shows that run with its status history.
/// When `None`, lists all recorded runs.
pub async fn run_status(config: &WavecrewConfig, orchestration_id: Option<&str>) -> Result<()> {
    let store = FsStore::new(&config.data_dir);
    match orchestration_id {
        Some(id) => run_one(&store, id).await,
        None => run_all(&store).await,
    }
}

async fn run_all(store: &FsStore) -> Result<()> {
    let records = store.list_orchestrations().await?;
    if records.is_empty() {
        println!("No orchestrations recorded in {}.", store.root().display());
        return Ok(());
    }

    println!("{:<36}  {:<18}  {:<19}  REQUEST", "ID", "PHASE", "CREATED");
    for record in &records {
        println!(
            "{:<36}  {:<18}  {:<19}  {}",
            record.id,
            record.phase.as_str(),
            record.created_at.format("%Y-%m-%d %H:%M:%S"),
            truncate(&record.request, REQUEST_WIDTH)
        );
    }
    Ok(())
}

async fn run_one(store: &FsStore, id_str: &str) -> Result<()> {
    let id = Uuid::parse_str(id_str).with_context(|| format!("invalid orchestration ID: {id_str}"))?;
    let record = store
        .get_orchestration(id)
        .await?
        .with_context(|| format!("orchestration {id} not found"))?;

    print_record(store, &record);

    let history = store.status_history(id).await?;
    if history.is_empty() {
        return Ok(());
    }
    println!();
    println!("History:");
    for status in &history {
        println!(
            "  {}  {:<18} {:>3}%  {}",
            status.updated_at.format("%H:%M:%S"),
            status.phase.as_str(),
            status.progress_percent,
            status.current_activity
        );
    }
    if let Some(last) = history.last() {
        for error in &last.errors {
            println!("  [!] {error}");
        }
    }
    Ok(())
}

fn print_record(store: &FsStore, record: &OrchestrationRecord) {
    println!("Orchestration: {}", record.id);
    println!("Request: {}", record.request);
    println!("Phase: {}", record.phase);
    println!("Created: {}", record.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("Updated: {}", record.updated_at.format("%Y-%m-%d %H:%M:%S UTC"));
    if !record.uploaded_files.is_empty() {
        println!("Files: {}", record.uploaded_files.join(", "));
    }
    if let Some(error) = &record.error {
        println!("Error: {error}");
    }

    let artifacts = [
        ("Analysis", "analyses", record.analysis_id),
        ("Plan", "plans", record.plan_id),
        ("Accomplishment", "accomplishments", record.accomplishment_id),
    ];
    for (label, kind, artifact_id) in artifacts {
        if let Some(artifact_id) = artifact_id {
            println!("{label}: {}", store.markdown_path(kind, artifact_id).display());
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{head}...")
    }
}
