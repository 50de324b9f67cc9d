use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use medtel_warehouse::config::AppConfig;
use medtel_warehouse::context::RunContext;
use medtel_warehouse::db::Warehouse;
use medtel_warehouse::logging::init_logging;
use medtel_warehouse::models::RunStatus;
use medtel_warehouse::scheduler::{standard_stages, transform_stages, Scheduler};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline: load, dimensions, facts
    Run,
    /// Load Collector/Enricher output into the raw store only
    Load,
    /// Rebuild dimensions and facts from the raw store only
    Transform,
    /// Show recent pipeline run summaries
    Status {
        /// Number of runs to show
        #[arg(short, long, default_value = "5")]
        limit: usize,
    },
    /// Create the database and run migrations
    InitDb,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load().context("Failed to load configuration")?;
    let _log_guard = init_logging(
        Some(&config.get_log_level()),
        config.logging.file_path.as_deref().map(Path::new),
    )?;

    let warehouse = Arc::new(Warehouse::new(
        &config.get_database_url(),
        config.database.max_connections,
        Duration::from_secs(config.database.busy_timeout_secs),
    )?);

    match cli.command {
        Commands::Run => {
            let ctx = RunContext::new(config);
            run_pipeline(&warehouse, &ctx, standard_stages(&warehouse)).await
        }
        Commands::Load => {
            let ctx = RunContext::new(config);
            let stages = vec![standard_stages(&warehouse)
                .into_iter()
                .next()
                .context("standard pipeline has no stages")?];
            run_pipeline(&warehouse, &ctx, stages).await
        }
        Commands::Transform => {
            let ctx = RunContext::new(config);
            run_pipeline(&warehouse, &ctx, transform_stages(&warehouse)).await
        }
        Commands::Status { limit } => show_status(&warehouse, limit),
        Commands::InitDb => {
            info!("Database initialized and migrations applied");
            Ok(())
        }
    }
}

async fn run_pipeline(
    warehouse: &Arc<Warehouse>,
    ctx: &RunContext,
    stages: Vec<Arc<dyn medtel_warehouse::scheduler::PipelineStage>>,
) -> Result<()> {
    // Ctrl-C cancels the run cooperatively at the next stage boundary
    let token = ctx.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Cancellation requested; run will stop at the next stage boundary");
            token.cancel();
        }
    });

    let scheduler = Scheduler::new(warehouse.clone());
    let summary = scheduler.run(ctx, &stages).await?;

    for stage in &summary.stages {
        info!(
            stage = %stage.stage,
            status = %stage.status,
            attempts = stage.attempts,
            rows = stage.rows_affected,
            error = stage.error.as_deref().unwrap_or(""),
            "Stage result"
        );
    }

    match summary.status {
        RunStatus::Succeeded => {
            info!(run_id = summary.run_id, "Pipeline run succeeded");
            Ok(())
        }
        status => anyhow::bail!("pipeline run {} finished with status {status}", summary.run_id),
    }
}

fn show_status(warehouse: &Arc<Warehouse>, limit: usize) -> Result<()> {
    let summaries = warehouse.recent_runs(limit)?;

    if summaries.is_empty() {
        println!("No pipeline runs recorded yet");
        return Ok(());
    }

    for summary in summaries {
        println!(
            "run {} [{}] {} started {} finished {}",
            summary.run_id,
            summary.pipeline,
            summary.status,
            summary.started_at,
            summary
                .finished_at
                .map_or_else(|| "-".to_string(), |t| t.to_string()),
        );
        for stage in summary.stages {
            println!(
                "  {} {} attempts={} rows={}{}",
                stage.stage,
                stage.status,
                stage.attempts,
                stage.rows_affected,
                stage
                    .error
                    .map_or_else(String::new, |e| format!(" error={e}")),
            );
        }
    }

    Ok(())
}
