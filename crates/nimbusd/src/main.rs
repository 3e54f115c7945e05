mod setup;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use nimbus_config::NimbusConfig;
use nimbus_controlplane::{SyncResult, SyncScope, TaskState, TaskStore};
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

#[derive(Parser)]
#[command(name = "nimbusd")]
#[command(about = "Nimbus control plane daemon", version, long_about = None)]
struct Cli {
    /// Config file (default: NIMBUS_CONFIG_PATH, ./nimbus.yaml, ./.nimbus/nimbus.yaml, ~/.config/nimbus/nimbus.yaml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run task workers and the periodic reconciliation loop
    Run {
        /// Stop after the first reconciliation round
        #[arg(long)]
        once: bool,
    },
    /// Run one reconciliation round and print the per-scope results
    Sync,
    /// List persisted tasks
    Tasks {
        /// Include finished tasks
        #[arg(short, long)]
        all: bool,
    },
    /// Check the credentials of every configured provider
    CheckAuth,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match &cli.config {
        Some(path) => NimbusConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => NimbusConfig::discover()?,
    };

    match cli.command {
        Commands::Run { once } => run(&config, once).await,
        Commands::Sync => sync_once(&config).await,
        Commands::Tasks { all } => list_tasks(&config, all).await,
        Commands::CheckAuth => check_auth(&config).await,
    }
}

async fn run(config: &NimbusConfig, once: bool) -> Result<()> {
    let plane = setup::build_plane(config).await?;

    let recovered = plane.tasks().recover().await?;
    if recovered > 0 {
        tracing::warn!("Failed {} task(s) left unfinished by the previous run", recovered);
    }
    let workers = plane.tasks().start(config.workers)?;

    let scopes = setup::sync_scopes(config, &plane.services().adapters)?;
    tracing::info!(
        "nimbusd started: {} provider(s), {} sync scope(s), every {}s",
        config.providers.len(),
        scopes.len(),
        config.sync_interval_secs
    );

    let mut ticker = tokio::time::interval(Duration::from_secs(config.sync_interval_secs.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let outcomes = plane.reconciler().sync_all(&scopes).await;
                log_round(&outcomes);
                if once {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                break;
            }
        }
    }

    workers.abort();
    Ok(())
}

fn log_round(outcomes: &[(SyncScope, nimbus_controlplane::Result<SyncResult>)]) {
    let mut total = SyncResult::default();
    let mut failed = 0usize;
    for (_, outcome) in outcomes {
        match outcome {
            Ok(result) => total.merge(result.clone()),
            Err(_) => failed += 1,
        }
    }
    tracing::info!(
        "Sync round finished: {} ({} scope(s) failed)",
        total,
        failed
    );
}

async fn sync_once(config: &NimbusConfig) -> Result<()> {
    let plane = setup::build_plane(config).await?;
    let scopes = setup::sync_scopes(config, &plane.services().adapters)?;

    for (scope, outcome) in plane.reconciler().sync_all(&scopes).await {
        let label = format!(
            "{} {}/{}",
            scope.manager_id,
            scope.region_id.as_deref().unwrap_or("-"),
            scope.kind
        );
        match outcome {
            Ok(result) if result.is_error() => {
                println!("{} {}: {}", "!".yellow(), label, result);
                for error in &result.errors {
                    println!("    {}", error.dimmed());
                }
            }
            Ok(result) => println!("{} {}: {}", "✓".green(), label, result),
            Err(e) => println!("{} {}: {}", "✗".red(), label, e),
        }
    }
    Ok(())
}

async fn list_tasks(config: &NimbusConfig, all: bool) -> Result<()> {
    let store = TaskStore::open(&config.state_dir).await?;
    let tasks: Vec<_> = store
        .list()
        .await
        .into_iter()
        .filter(|t| all || !t.is_terminal())
        .collect();

    if tasks.is_empty() {
        println!("{}", "No tasks".dimmed());
        return Ok(());
    }

    for task in tasks {
        let state = match task.state {
            TaskState::Completed => task.state.to_string().green(),
            TaskState::Failed => task.state.to_string().red(),
            TaskState::Created | TaskState::Running => task.state.to_string().cyan(),
        };
        println!(
            "{}  {:<20} {:<10} {:<32} {}",
            task.id,
            task.kind.to_string(),
            state,
            task.stage.to_string(),
            task.created_at.format("%Y-%m-%d %H:%M:%S")
        );
        if let Some(reason) = &task.reason {
            println!("    {}", reason.dimmed());
        }
    }
    Ok(())
}

async fn check_auth(config: &NimbusConfig) -> Result<()> {
    let adapters = setup::build_adapters(config)?;
    if adapters.is_empty() {
        println!("{}", "No providers configured".yellow());
        return Ok(());
    }

    let mut failed = false;
    for manager_id in adapters.manager_ids() {
        let adapter = adapters.get(manager_id)?;
        match adapter.check_auth().await {
            Ok(status) if status.authenticated => println!(
                "{} {} ({}): {}",
                "✓".green(),
                manager_id,
                adapter.display_name(),
                status.account_info.unwrap_or_default()
            ),
            Ok(status) => {
                failed = true;
                println!(
                    "{} {} ({}): {}",
                    "✗".red(),
                    manager_id,
                    adapter.display_name(),
                    status.error.unwrap_or_default()
                );
            }
            Err(e) => {
                failed = true;
                println!("{} {}: {}", "✗".red(), manager_id, e);
            }
        }
    }

    if failed {
        anyhow::bail!("some providers are not authenticated");
    }
    Ok(())
}
