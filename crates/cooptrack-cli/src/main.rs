use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cooptrack_store::{JobStore, MemoryJobStore};
use cooptrack_sync::{PullConfig, PullPipeline};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "cooptrack")]
#[command(about = "Coop Tracker ingestion pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch the posting document once and reconcile it into the store.
    Pull {
        /// Override the remote document URL.
        #[arg(long)]
        source_url: Option<String>,
        /// Override the fetch timeout in seconds.
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// Run cron-scheduled pulls until interrupted.
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Pull {
        source_url: None,
        timeout_secs: None,
    }) {
        Commands::Pull {
            source_url,
            timeout_secs,
        } => {
            let mut config = PullConfig::from_env();
            if let Some(url) = source_url {
                config.source_url = url;
            }
            if let Some(secs) = timeout_secs {
                config.http_timeout_secs = secs;
            }

            let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
            let pipeline = PullPipeline::new(config, store)?;
            let summary = pipeline.run_once().await?;
            println!(
                "pull complete: inserted={} updated={} total_parsed={}",
                summary.inserted_count, summary.updated_count, summary.total_parsed_count
            );
        }
        Commands::Watch => {
            let mut config = PullConfig::from_env();
            config.scheduler_enabled = true;

            let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
            let pipeline = Arc::new(PullPipeline::new(config, store)?);
            let scheduler = pipeline
                .maybe_build_scheduler()
                .await?
                .context("scheduler should be enabled in watch mode")?;
            scheduler.start().await.context("starting scheduler")?;
            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
        }
    }

    Ok(())
}
