//! `arena` binary entrypoint.
//!
//! Bootstraps configuration and tracing, opens the database, wires up every
//! component, and hands off to the scheduler until a shutdown signal arrives.

use agent_arena_core::agent_lock::AgentLocks;
use agent_arena_core::config::{Config, EnforcementMode};
use agent_arena_core::ledger::LedgerStore;
use agent_arena_core::llm::build_provider;
use agent_arena_core::market::{MarketCatalog, MarketMaker, ResolutionEngine};
use agent_arena_core::metrics_sink::MetricsSink;
use agent_arena_core::storage::Db;
use agent_arena_core::stream::StreamPublisher;
use agent_arena_core::tick::TickEngine;
use agent_arena_core::tools::ToolGateway;
use agent_arena_core::Scheduler;
use clap::Parser;
use tracing_subscriber::EnvFilter;

/// CLI overrides layered on top of the env-driven [`Config`]. Every flag
/// also reads from its env var via clap's `env` feature, so a bare
/// `arena` invocation behaves identically to the Python daemon's
/// env-only bootstrap.
#[derive(Parser, Debug)]
#[command(name = "arena")]
#[command(about = "Runs the agent arena tick scheduler")]
struct Args {
    /// Path to the SQLite database file.
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Enforce solvency and entropy writes instead of only observing them.
    #[arg(long, env = "ENFORCEMENT_MODE")]
    enforce: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let args = Args::parse();
    let mut config = Config::from_env();
    if let Some(db_url) = args.database_url {
        config.database_url = db_url;
    }
    if args.enforce {
        config.enforcement_mode = EnforcementMode::Enforce;
    }
    tracing::info!(
        mode = ?config.enforcement_mode,
        tick_rate = config.tick_rate_seconds,
        db = %config.database_url,
        "arena starting"
    );

    let db = Db::open(&config.database_url)?;
    let ledger = LedgerStore::new(db.clone());
    let catalog = MarketCatalog::new(db.clone());
    let resolution = ResolutionEngine::new(db.clone(), catalog.clone(), ledger.clone());
    let maker = MarketMaker::new(catalog.clone(), &config);
    let llm = build_provider(&config)?;

    let tick_engine = TickEngine::new(
        ledger.clone(),
        catalog.clone(),
        ResolutionEngine::new(db.clone(), catalog.clone(), ledger.clone()),
        llm,
        ToolGateway::new(),
        StreamPublisher::default(),
        MetricsSink::new(db.clone()),
        AgentLocks::new(),
        config.clone(),
    );

    let scheduler = Scheduler::new(ledger, catalog, resolution, maker, tick_engine, config);
    scheduler.run_daemon().await;

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
