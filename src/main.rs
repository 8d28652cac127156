use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use polycast::app::App;
use polycast::config::Config;
use polycast::models::ContentItem;
use polycast::ops::OpsServer;
use polycast::orchestrator::{CycleKind, CycleOutcome};
use polycast::store::{ContentStore, SqliteStore};

#[derive(Parser)]
#[command(
    name = "polycast",
    version,
    about = "Autonomous governance core for multilingual content pipelines",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML); environment variables otherwise
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); overrides the configuration
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the orchestrator and the ops HTTP server
    Run {
        /// Override the ops server port
        #[arg(short, long)]
        port: Option<u16>,

        /// Compute schedules without persisting them
        #[arg(long, default_value = "false")]
        dry_run: bool,
    },

    /// Preview a schedule without persisting it
    Plan {
        /// Maximum content items to consider
        #[arg(short, long, default_value = "50")]
        max_items: usize,

        /// Print the full plan as JSON
        #[arg(long, default_value = "false")]
        json: bool,
    },

    /// Run a single cycle once and exit
    Cycle {
        /// Cycle name (trend_refresh, scheduling, batch_creation, health_check, maintenance)
        name: String,
    },

    /// Import content items from a JSON array
    Import {
        /// Input JSON file
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref())?;
    let format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| config.logging.format.clone());
    setup_tracing(&format, &config.logging.level, cli.verbose)?;

    tracing::info!("polycast starting");

    match cli.command {
        Commands::Run { port, dry_run } => run(config, port, dry_run).await?,
        Commands::Plan { max_items, json } => plan(config, max_items, json).await?,
        Commands::Cycle { name } => cycle(config, &name).await?,
        Commands::Import { input } => import(config, input).await?,
        Commands::Config => print!("{}", config.to_toml()?),
    }

    Ok(())
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("polycast=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("polycast={level},warn")))
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}

fn build_app(config: Config) -> Result<App> {
    if let Some(parent) = config.database.sqlite_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let store = Arc::new(SqliteStore::new(&config.database.sqlite_path)?);
    Ok(App::builder(config, store).build()?)
}

async fn run(mut config: Config, port: Option<u16>, dry_run: bool) -> Result<()> {
    if let Some(port) = port {
        config.server.port = port;
    }
    if dry_run {
        config.orchestrator.auto_execute = false;
    }

    if let Err(e) = polycast::metrics::init_metrics() {
        tracing::warn!(error = %e, "Prometheus metrics unavailable");
    }

    let app = build_app(config.clone())?;
    app.orchestrator.start().await?;

    let server = OpsServer::new(config.server, app.clone());
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        }
        tracing::info!("Shutdown signal received");
    };
    let served = server.start_with_shutdown(shutdown).await;

    app.orchestrator.stop().await;
    served?;
    Ok(())
}

async fn plan(config: Config, max_items: usize, json: bool) -> Result<()> {
    let app = build_app(config)?;
    let outcome = app.planner.preview(max_items).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    println!(
        "Considered {} items, scored {} pairs ({} below threshold, {} over cap)",
        outcome.items_considered, outcome.pairs_scored, outcome.below_threshold, outcome.over_cap
    );
    for entry in &outcome.entries {
        println!(
            "  {:<8} {:<36} {:>6.1}  {}  {:?}",
            entry.language.as_str(),
            entry.content_id,
            entry.priority,
            entry.publish_at.format("%Y-%m-%d %H:%M UTC"),
            entry.approval
        );
    }
    Ok(())
}

async fn cycle(config: Config, name: &str) -> Result<()> {
    let kind = CycleKind::parse(name).with_context(|| format!("Unknown cycle: {name}"))?;
    let app = build_app(config)?;
    let report = app.orchestrator.execute_now(kind).await;
    app.batches.wait_for_in_flight().await;

    println!("{}", serde_json::to_string_pretty(&report)?);
    if report.outcome == CycleOutcome::Failed {
        anyhow::bail!("{} cycle failed", kind.as_str());
    }
    Ok(())
}

async fn import(config: Config, input: PathBuf) -> Result<()> {
    let content = std::fs::read_to_string(&input)
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let items: Vec<ContentItem> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", input.display()))?;

    let app = build_app(config)?;
    for item in &items {
        app.store.insert_content(item).await?;
    }

    println!("Imported {} content items", items.len());
    Ok(())
}
