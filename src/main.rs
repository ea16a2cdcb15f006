//! Leasefinder entry point
//!
//! `serve` runs the HTTP lookup service against the in-memory demo store;
//! `config` prints the resolved configuration for deployment debugging.

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use leasefinder_core::config::AppConfig;
use leasefinder_core::quota::DailyQuota;
use leasefinder_core::search::SearchService;
use leasefinder_core::server::create_server;
use leasefinder_core::store::MemoryLeaseStore;

#[derive(Parser)]
#[command(name = "leasefinder")]
#[command(about = "Property-lease lookup with search admission control")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Server bind address (overrides HOST)
    #[arg(long)]
    bind: Option<String>,

    /// Server port (overrides PORT)
    #[arg(long)]
    port: Option<u16>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP lookup server
    Serve,
    /// Print the resolved configuration and exit
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    leasefinder_core::init_tracing();

    let cli = Cli::parse();
    let mut config = AppConfig::from_env();
    if let Some(bind) = cli.bind {
        config.server.host = bind;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    match cli.command {
        Commands::Serve => serve(config).await,
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

async fn serve(config: AppConfig) -> Result<()> {
    info!(
        max_concurrent = config.search.max_concurrent_searches,
        max_time_ms = config.search.max_time_ms,
        "initializing search engine"
    );

    let store = Arc::new(MemoryLeaseStore::with_sample_data());
    let quota = Arc::new(DailyQuota::new(config.search.daily_limit));
    let search = Arc::new(
        SearchService::new(config.search.clone(), store, quota)
            .map_err(|e| anyhow::anyhow!("classifier pattern error: {e}"))?,
    );

    create_server(config.server, search).await
}
