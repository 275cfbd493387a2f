use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use crate::init::{self, InitOptions};
use crate::types::{Assignment, ItemId, RemovalOutcome, WorkerKey};

#[derive(Parser)]
#[command(name = "sluice")]
#[command(about = "Sluice - worker leases and work reservation", long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default search)
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Database URL (overrides config file and env vars)
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    /// Lease store URL (overrides config file and env vars)
    #[arg(long, global = true)]
    pub lease_store_url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug, Clone)]
pub struct WorkerArgs {
    /// Worker network address
    #[arg(short = 'a', long = "address")]
    pub address: String,

    /// Worker identifier
    #[arg(short = 'w', long = "worker-id")]
    pub worker_id: String,
}

impl WorkerArgs {
    fn key(&self) -> WorkerKey {
        WorkerKey::new(&self.address, &self.worker_id)
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Record a heartbeat for a worker
    Heartbeat {
        /// Worker network address
        #[arg(short = 'a', long = "address")]
        address: String,

        /// Worker identifier (a random one is generated when omitted)
        #[arg(short = 'w', long = "worker-id")]
        worker_id: Option<String>,

        /// Items processed since the previous heartbeat
        #[arg(short = 'p', long = "processed", default_value = "0")]
        processed: u64,

        /// Lease TTL in seconds (default from config)
        #[arg(long)]
        ttl: Option<u64>,

        /// Replace the assigned ids (comma-separated)
        #[arg(long, value_delimiter = ',')]
        ids: Option<Vec<ItemId>>,
    },

    /// Reserve free work items for a worker
    Claim {
        #[command(flatten)]
        worker: WorkerArgs,

        /// Maximum number of items (default: 10)
        #[arg(short = 'l', long = "limit", default_value = "10")]
        limit: u32,
    },

    /// List active workers
    Workers,

    /// Print aggregate worker statistics as JSON
    Stats,

    /// Print the reservation set
    Reserved,

    /// Remove a worker and release its outstanding items
    Remove {
        #[command(flatten)]
        worker: WorkerArgs,
    },

    /// Show catalog backlog counts
    Backlog,

    /// Print the effective configuration
    Config,
}

/// Run the CLI by parsing process arguments
pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    run_cli_with_args(cli).await
}

/// Run the CLI with provided arguments (for wrappers that need to filter args)
pub async fn run_cli_from_args(args: Vec<String>) -> Result<()> {
    let cli = Cli::parse_from(args);
    run_cli_with_args(cli).await
}

fn format_ids(ids: &[ItemId]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Internal function that handles CLI commands
async fn run_cli_with_args(cli: Cli) -> Result<()> {
    let options = InitOptions {
        database_url: cli.database_url,
        lease_store_url: cli.lease_store_url,
        config_path: cli.config,
    };

    // Eagerly load and validate configuration before executing any command
    let config = init::load_config(&options)?;

    if matches!(cli.command, Commands::Config) {
        print!("{}", config.to_redacted_toml()?);
        return Ok(());
    }

    let app = init::initialize(options).await?;
    let leases = &app.lease_service;

    match cli.command {
        Commands::Heartbeat {
            address,
            worker_id,
            processed,
            ttl,
            ids,
        } => {
            let worker_id = worker_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let worker = WorkerKey::new(address, worker_id);
            let assignment = Assignment::from(ids);
            leases
                .heartbeat(worker.clone(), processed, ttl, assignment)
                .await
                .context("Failed to record heartbeat")?;
            println!("✓ Heartbeat recorded for {}", worker);
        }

        Commands::Claim { worker, limit } => {
            let ids = leases
                .claim_work(worker.key(), limit)
                .await
                .context("Failed to claim work")?;
            if ids.is_empty() {
                println!("No free items");
            } else {
                println!("✓ Claimed {} item(s): {}", ids.len(), format_ids(&ids));
            }
        }

        Commands::Workers => {
            let workers = leases.list_active().await?;

            if workers.is_empty() {
                println!("No active workers");
            } else {
                println!("Found {} worker(s):\n", workers.len());
                for lease in workers {
                    println!(
                        "  {}:{} | processed {} | active {}s | last seen {} | ids [{}]",
                        lease.address,
                        lease.worker_id,
                        lease.total_processed_data,
                        lease.active_time_secs,
                        lease.last_connection_time,
                        format_ids(&lease.legislation_ids)
                    );
                }
            }
        }

        Commands::Stats => {
            let stats = leases.aggregate_stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }

        Commands::Reserved => {
            let ids = leases.reserved_ids().await?;
            println!("{} reserved: [{}]", ids.len(), format_ids(&ids));
        }

        Commands::Remove { worker } => {
            let key = worker.key();
            let outcome = leases.remove_worker(&key).await?;
            match outcome {
                RemovalOutcome::Deleted { released } => {
                    println!("✓ Removed {} (released {} item(s))", key, released);
                }
                RemovalOutcome::NotFound => {
                    app.shutdown().await;
                    eprintln!("Worker {} not found", key);
                    std::process::exit(1);
                }
            }
        }

        Commands::Backlog => {
            let stats = leases.backlog_stats().await?;
            println!("Total items: {}", stats.total);
            println!(
                "With payload: {} ({:.1}%)",
                stats.with_payload,
                stats.payload_percent()
            );
            println!("With text: {} ({:.1}%)", stats.with_text, stats.text_percent());
            println!("Loaded: {} ({:.1}%)", stats.loaded, stats.loaded_percent());
        }

        Commands::Config => print!("{}", app.config().to_redacted_toml()?),
    }

    app.shutdown().await;
    Ok(())
}
