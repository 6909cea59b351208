//! Command-line interface for manual sandbox pool operation.

use std::sync::Arc;

use clap::Parser;
use tracing::info;

use crate::config::SandboxConfig;
use crate::driver::docker::BollardDriver;
use crate::driver::ContainerDriver;
use crate::manager::SandboxManager;

/// Operate a sandbox pool from the command line.
#[derive(Parser)]
#[command(name = "sandboxd")]
#[command(about = "Operate a container-backed sandbox pool")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

#[derive(clap::Subcommand)]
pub enum Commands {
    /// Initialize the pool and warm it up to `min_warm`.
    Warm,
    /// Acquire a sandbox, run a one-off command, release it, and print the result.
    Exec(ExecArgs),
    /// Print a point-in-time pool occupancy snapshot as JSON.
    Stats,
    /// Gracefully shut down the pool.
    Shutdown,
}

#[derive(Parser, Debug)]
pub struct ExecArgs {
    /// Command to run inside a freshly acquired sandbox.
    #[arg(trailing_var_arg = true, required = true)]
    pub cmd: Vec<String>,
}

pub fn parse_cli() -> Cli {
    Cli::parse()
}

pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    crate::metrics::ensure_initialized();

    let config = SandboxConfig::load(None)?;
    let driver: Arc<dyn ContainerDriver> = Arc::new(BollardDriver::new()?);
    let manager = SandboxManager::new(config, driver);

    match cli.command {
        Commands::Warm => {
            manager.initialize().await?;
            let stats = manager.get_stats().await;
            info!(?stats, "pool warmed");
            println!("{}", serde_json::to_string_pretty(&stats_json(&stats))?);
        }
        Commands::Exec(args) => {
            let handle = manager.acquire(None).await?;
            let result = handle.exec(&args.cmd.join(" ")).await?;
            println!("{}", serde_json::to_string_pretty(&serde_json::json!({
                "stdout": result.stdout,
                "stderr": result.stderr,
                "exitCode": result.exit_code,
            }))?);
            handle.release().await;
        }
        Commands::Stats => {
            manager.initialize().await?;
            let stats = manager.get_stats().await;
            println!("{}", serde_json::to_string_pretty(&stats_json(&stats))?);
        }
        Commands::Shutdown => {
            manager.shutdown().await;
        }
    }

    Ok(())
}

fn stats_json(stats: &crate::manager::PoolStats) -> serde_json::Value {
    serde_json::json!({
        "total": stats.total,
        "ready": stats.ready,
        "executing": stats.executing,
        "idle": stats.idle,
        "suspended": stats.suspended,
    })
}
