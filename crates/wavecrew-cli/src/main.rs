mod config;
mod plan_cmds;
mod run_cmd;
mod status_cmd;
#[cfg(test)]
mod test_util;
mod workers_cmd;

use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};

use config::WavecrewConfig;

#[derive(Parser)]
#[command(name = "wavecrew", about = "Wave-scheduled coding agent orchestrator")]
struct Cli {
    /// Worker registry file (overrides WAVECREW_REGISTRY env var)
    #[arg(long, global = true)]
    registry: Option<String>,

    /// Directory for run records and artifacts (overrides WAVECREW_DATA_DIR env var)
    #[arg(long, global = true)]
    data_dir: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a wavecrew config file
    Init {
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Run one orchestration: analyze, plan, execute in waves, report
    Run {
        /// What the team should do
        request: String,
        /// Files the request refers to (repeatable)
        #[arg(long = "file")]
        files: Vec<String>,
        /// Project root to analyze and document (defaults to the current directory)
        #[arg(long)]
        project: Option<PathBuf>,
        /// Objective plan TOML to use instead of automatic decomposition
        #[arg(long)]
        objectives: Option<PathBuf>,
        /// Plan and validate without dispatching to workers
        #[arg(long)]
        dry_run: bool,
        /// Print progress events as JSON lines
        #[arg(long)]
        json: bool,
    },
    /// Objective plan tools
    Plan {
        #[command(subcommand)]
        command: PlanCommands,
    },
    /// Worker registry tools
    Workers {
        #[command(subcommand)]
        command: WorkersCommands,
    },
    /// Show recorded runs (omit the id to list all runs)
    Status {
        /// Orchestration ID to show
        orchestration_id: Option<String>,
    },
    /// Print shell completions
    Completions {
        /// Target shell
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
pub enum PlanCommands {
    /// Validate an objective plan file and show its wave schedule
    Validate {
        /// Path to the objective plan TOML file
        file: String,
        /// Defer conflicting objectives instead of only reporting them
        #[arg(long)]
        resolve: bool,
        /// Bound on resolution passes
        #[arg(long, default_value_t = wavecrew_core::scope::DEFAULT_MAX_RESOLUTION_PASSES)]
        max_passes: usize,
    },
}

#[derive(Subcommand)]
pub enum WorkersCommands {
    /// List workers in the registry
    List,
    /// Start one worker, list the tools it offers, and stop it
    Tools {
        /// Worker ID from the registry
        id: String,
        /// Seconds to wait for the tools response
        #[arg(long, default_value_t = 10)]
        timeout: u64,
    },
}

/// Execute the `wavecrew init` command: write config file.
fn cmd_init(registry: Option<&str>, data_dir: Option<&str>, force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let registry_path = registry.unwrap_or(config::DEFAULT_REGISTRY).to_string();
    let data_dir = data_dir.unwrap_or(config::DEFAULT_DATA_DIR).to_string();
    let cfg = config::ConfigFile {
        registry: config::RegistrySection {
            path: Some(registry_path.clone()),
        },
        storage: config::StorageSection {
            dir: Some(data_dir.clone()),
        },
        orchestration: config::OrchestrationSection::default(),
    };

    config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    println!("  registry.path = {registry_path}");
    println!("  storage.dir = {data_dir}");
    println!();
    println!("Next: describe your workers in {registry_path}, then `wavecrew run \"<request>\"`.");

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { force } => {
            cmd_init(cli.registry.as_deref(), cli.data_dir.as_deref(), force)?;
        }
        Commands::Run {
            request,
            files,
            project,
            objectives,
            dry_run,
            json,
        } => {
            let resolved = WavecrewConfig::resolve(cli.registry.as_deref(), cli.data_dir.as_deref());
            let args = run_cmd::RunArgs {
                request,
                files,
                project,
                objectives,
                dry_run,
                json,
            };
            run_cmd::run_orchestration(&resolved, args).await?;
        }
        Commands::Plan { command } => {
            plan_cmds::run_plan_command(command)?;
        }
        Commands::Workers { command } => {
            let resolved = WavecrewConfig::resolve(cli.registry.as_deref(), cli.data_dir.as_deref());
            workers_cmd::run_workers_command(command, &resolved).await?;
        }
        Commands::Status { orchestration_id } => {
            let resolved = WavecrewConfig::resolve(cli.registry.as_deref(), cli.data_dir.as_deref());
            status_cmd::run_status(&resolved, orchestration_id.as_deref()).await?;
        }
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "wavecrew", &mut std::io::stdout());
        }
    }

    Ok(())
}
