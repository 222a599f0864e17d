//! cpu-usage CLI: run a ledger worker or inspect and feed the ledger.

use cpu_usage_ledger::clock::{Clock, SystemClock};
use cpu_usage_ledger::config::Config;
use cpu_usage_ledger::db::Db;
use cpu_usage_ledger::model::{NewWorkItem, UsageOperation};
use cpu_usage_ledger::notify::LogNotifier;
use cpu_usage_ledger::store::Store;
use cpu_usage_ledger::telemetry::{TelemetryConfig, init_telemetry};
use cpu_usage_ledger::worker::LedgerWorker;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "cpu-usage", about = "CPU-hours ledger worker")]
struct Cli {
    /// TOML file with a [worker] section; environment variables override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Register a worker and process usage until interrupted
    Serve,
    /// Queue a usage work item for a user
    Enqueue {
        /// Username the usage belongs to (created if unknown)
        username: String,
        /// add, subtract or reset
        operation: String,
        /// Decimal CPU hours, e.g. 2.5
        value: String,
    },
    /// Show a user's current CPU-hours total
    Total {
        username: String,
    },
    /// List registered workers
    Workers,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::from_env()?,
    };

    match cli.command {
        Command::Serve => cmd_serve(config).await,
        Command::Enqueue {
            username,
            operation,
            value,
        } => cmd_enqueue(&connect(&config).await?, &username, &operation, &value).await,
        Command::Total { username } => cmd_total(&connect(&config).await?, &username).await,
        Command::Workers => cmd_workers(&connect(&config).await?).await,
    }
}

async fn connect(config: &Config) -> anyhow::Result<Db> {
    let db = Db::connect_with(
        config.database_url.expose_secret(),
        config.database_max_connections,
    )
    .await?;
    db.migrate().await?;
    Ok(db)
}

async fn cmd_serve(config: Config) -> anyhow::Result<()> {
    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "cpu-usage".to_string(),
        log_level: config.log_level.clone(),
    })?;

    let db = connect(&config).await?;
    let worker = LedgerWorker::register(
        Arc::new(db),
        Arc::new(SystemClock),
        Arc::new(LogNotifier),
        config.worker,
    )
    .await?;

    let handle = worker.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("interrupt received, shutting down");
        handle.shutdown();
    });

    worker.run().await?;
    Ok(())
}

async fn cmd_enqueue(db: &Db, username: &str, operation: &str, value: &str) -> anyhow::Result<()> {
    let operation: UsageOperation = operation.parse()?;
    let value: Decimal = value
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid value '{value}': {e}"))?;

    let user = db.ensure_user(username).await?;
    let item = db
        .enqueue_work_item(NewWorkItem::new(user.id, operation, value), SystemClock.now())
        .await?;

    println!("Queued: {} ({} {} for {})", item.id, item.operation, item.value, user.username);
    Ok(())
}

async fn cmd_total(db: &Db, username: &str) -> anyhow::Result<()> {
    let user = db.user_by_name(username).await?;
    match db.current_total(user.id, SystemClock.now()).await? {
        Some(hours) => {
            println!("User:       {}", user.username);
            println!("Total:      {}", hours.total);
            println!("Effective:  {} .. {}", hours.effective_start, hours.effective_end);
            println!("Modified:   {}", hours.last_modified);
        }
        None => println!("No current total for {}.", user.username),
    }
    Ok(())
}

async fn cmd_workers(db: &Db) -> anyhow::Result<()> {
    let workers = db.list_workers().await?;
    if workers.is_empty() {
        println!("No registered workers.");
        return Ok(());
    }

    let now = SystemClock.now();
    println!("{:<32}  {:<24}  {:<5}  EXPIRES", "ID", "NAME", "ALIVE");
    println!("{}", "-".repeat(90));
    for worker in &workers {
        println!(
            "{:<32}  {:<24}  {:<5}  {}",
            worker.id,
            worker.name,
            worker.is_alive(now),
            worker.expires_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    println!("\n{} worker(s)", workers.len());
    Ok(())
}
