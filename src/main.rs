use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use subkeeper::config::{Home, DEFAULT_HOME, HOME_ENV};
use subkeeper::error::SubkeeperErrorTrait;
use subkeeper::manager::SubscriptionManager;
use subkeeper::shutdown::{wait_for_signal, Shutdown, ShutdownListener};

#[derive(Parser)]
#[command(
    name = "subkeeper",
    version,
    about = "Keeps proxy subscriptions mirrored on disk with scheduled, rollback-safe updates",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Home directory holding config.yaml and subscribe/
    #[arg(short = 'd', long, global = true, env = HOME_ENV, default_value = DEFAULT_HOME)]
    home: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json)
    #[arg(long, global = true, default_value = "text")]
    log_format: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Bootstrap the current subscription and keep every subscription updated
    Run,

    /// Update one subscription now
    Update {
        /// Subscription name (defaults to the current one)
        name: Option<String>,
    },

    /// List configured subscriptions
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing/logging
    setup_tracing(&cli.log_format, cli.verbose)?;

    let result = execute(cli).await;
    if let Err(e) = &result {
        if let Some(err) = e.downcast_ref::<subkeeper::error::Error>() {
            tracing::error!(
                category = %err.category(),
                recoverable = err.is_recoverable(),
                error = %err,
                "Command failed"
            );
        }
    }
    result
}

async fn execute(cli: Cli) -> Result<()> {
    let home = Home::resolve(&cli.home)
        .with_context(|| format!("Failed to resolve home directory {}", cli.home.display()))?;
    tracing::info!(home = %home.root().display(), "subkeeper starting");

    let manager = SubscriptionManager::from_home(home).context("Failed to load configuration")?;

    match cli.command {
        Commands::Run => {
            let listener = spawn_signal_handler();
            manager.run(listener).await?;
        }
        Commands::Update { name } => {
            let mut listener = spawn_signal_handler();
            let report = manager.update_now(name.as_deref(), &mut listener).await?;
            println!("Updated {} -> {}", report.name, report.active.display());
            if let Some(backup) = report.backup {
                println!("Previous document kept at {}", backup.display());
            }
        }
        Commands::List => list(&manager),
    }

    Ok(())
}

/// Trigger shutdown on SIGINT/SIGTERM
fn spawn_signal_handler() -> ShutdownListener {
    let shutdown = Shutdown::new();
    let listener = shutdown.listener();
    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("Shutdown signal received");
        shutdown.trigger();
    });
    listener
}

fn list(manager: &SubscriptionManager) {
    let statuses = manager.status(Local::now());
    if statuses.is_empty() {
        println!("No subscription configured");
        return;
    }

    println!(
        "  {:<24} {:<20} {:<20} {}",
        "NAME", "LAST UPDATED", "NEXT DUE", "CRON"
    );
    for status in statuses {
        let marker = if status.current { "*" } else { " " };
        println!(
            "{marker} {:<24} {:<20} {:<20} {}",
            status.name,
            format_time(status.last_updated),
            format_time(status.next_due),
            if status.cron.is_empty() { "-" } else { status.cron.as_str() }
        );
    }
}

fn format_time(time: Option<DateTime<Local>>) -> String {
    time.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn setup_tracing(format: &str, verbose: bool) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            tracing_subscriber::EnvFilter::new("subkeeper=debug,info")
        } else {
            tracing_subscriber::EnvFilter::new("subkeeper=info,warn")
        }
    });

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()?;
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .try_init()?;
        }
    }

    Ok(())
}
