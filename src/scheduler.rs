//! Scheduler (SPEC_FULL.md §4.K).
//!
//! Two independently-paced loops, both signal-aware: the fleet tick cycle
//! (every `TICK_RATE` seconds, one [`crate::tick::TickEngine::execute_tick`]
//! call per ALIVE agent) and the market-maker/resolution sweep (every
//! `MARKET_MAKER_INTERVAL` seconds). Kept as separate tasks so a slow
//! external fetch in the sweep never delays the fleet's tick cadence — the
//! same split the teacher draws between its fast order-book poll and its
//! slower reconciliation task in `main.rs`.

use crate::config::Config;
use crate::ledger::LedgerStore;
use crate::market::{MarketCatalog, MarketMaker, ResolutionEngine};
use crate::tick::TickEngine;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{error, info, warn};

const MIN_OPEN_MARKETS: usize = 6;
const MIN_OPEN_RESEARCH_MARKETS: usize = 2;
const SHUTDOWN_POLL_MS: u64 = 250;

pub struct Scheduler {
    ledger: LedgerStore,
    catalog: MarketCatalog,
    resolution: Arc<ResolutionEngine>,
    maker: MarketMaker,
    tick_engine: Arc<TickEngine>,
    config: Config,
    shutdown: Arc<AtomicBool>,
}

impl Scheduler {
    pub fn new(
        ledger: LedgerStore,
        catalog: MarketCatalog,
        resolution: ResolutionEngine,
        maker: MarketMaker,
        tick_engine: TickEngine,
        config: Config,
    ) -> Self {
        Self {
            ledger,
            catalog,
            resolution: Arc::new(resolution),
            maker,
            tick_engine: Arc::new(tick_engine),
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Runs both loops until ctrl-c, returning once each has wound down.
    pub async fn run_daemon(self) {
        let shutdown_signal = self.shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received, draining in-flight ticks");
                shutdown_signal.store(true, Ordering::SeqCst);
            }
        });

        let tick_loop = self.run_tick_loop();
        let market_loop = self.run_market_loop();
        tokio::join!(tick_loop, market_loop);
        info!("scheduler stopped");
    }

    async fn run_tick_loop(&self) {
        let interval = Duration::from_secs(self.config.tick_rate_seconds);
        while !self.shutdown.load(Ordering::SeqCst) {
            let started = tokio::time::Instant::now();
            match self.ledger.list_alive().await {
                Ok(agents) => {
                    for agent_id in agents {
                        if self.shutdown.load(Ordering::SeqCst) {
                            break;
                        }
                        let engine = self.tick_engine.clone();
                        let id = agent_id.clone();
                        if let Err(e) = engine.execute_tick(&id).await {
                            error!(agent = %id, error = %e, "tick failed, continuing fleet");
                        }
                    }
                }
                Err(e) => error!(error = %e, "failed to list alive agents"),
            }
            self.sleep_until_next(started.elapsed(), interval).await;
        }
    }

    async fn run_market_loop(&self) {
        let interval = Duration::from_secs(self.config.market_maker_interval_seconds);
        while !self.shutdown.load(Ordering::SeqCst) {
            let started = tokio::time::Instant::now();

            if let Err(e) = self.maker.ensure_open_markets(MIN_OPEN_MARKETS).await {
                warn!(error = %e, "market maker sweep failed");
            }
            if let Err(e) = self
                .maker
                .ensure_research_markets(MIN_OPEN_RESEARCH_MARKETS)
                .await
            {
                warn!(error = %e, "research market top-up failed");
            }
            if let Err(e) = self.sweep_deadlines().await {
                warn!(error = %e, "deadline sweep failed");
            }

            self.sleep_until_next(started.elapsed(), interval).await;
        }
    }

    async fn sweep_deadlines(&self) -> crate::error::ArenaResult<()> {
        let due = self.catalog.list_open_past_deadline(chrono::Utc::now()).await?;
        for market in due {
            let reading = match &market.criteria {
                crate::market::Criteria::Weather { city, lat, lon, .. } => {
                    fetch_current_temperature(*lat, *lon).await.unwrap_or_else(|| {
                        warn!(city = %city, "weather reading unavailable at deadline, skipping");
                        f64::NAN
                    })
                }
                crate::market::Criteria::Github { repo, .. } => {
                    fetch_star_count(repo).await.unwrap_or(f64::NAN)
                }
                crate::market::Criteria::News { .. } => 0.0,
                crate::market::Criteria::Research { .. } => continue,
            };
            if reading.is_nan() {
                continue;
            }
            if let Err(e) = self.resolution.resolve_market_with_reading(&market, reading).await {
                warn!(market = %market.market_id, error = %e, "deferred resolution failed");
            }
        }
        Ok(())
    }

    async fn sleep_until_next(&self, elapsed: Duration, target: Duration) {
        let remaining = target.saturating_sub(elapsed);
        let mut slept = Duration::ZERO;
        let step = Duration::from_millis(SHUTDOWN_POLL_MS);
        while slept < remaining {
            if self.shutdown.load(Ordering::SeqCst) {
                return;
            }
            let this_step = step.min(remaining - slept);
            tokio::time::sleep(this_step).await;
            slept += this_step;
        }
    }
}

async fn fetch_current_temperature(lat: f64, lon: f64) -> Option<f64> {
    let url = format!(
        "https://api.open-meteo.com/v1/forecast?latitude={lat}&longitude={lon}&current=temperature_2m"
    );
    let response = reqwest::get(&url).await.ok()?;
    if !response.status().is_success() {
        return None;
    }
    let value: serde_json::Value = response.json().await.ok()?;
    value["current"]["temperature_2m"].as_f64()
}

async fn fetch_star_count(repo: &str) -> Option<f64> {
    let client = reqwest::Client::builder()
        .user_agent("agent-arena/1.0 (deadline sweep)")
        .build()
        .ok()?;
    let url = format!("https://api.github.com/repos/{repo}");
    let response = client
        .get(&url)
        .header("Accept", "application/vnd.github+json")
        .send()
        .await
        .ok()?;
    if !response.status().is_success() {
        return None;
    }
    let value: serde_json::Value = response.json().await.ok()?;
    value["stargazers_count"].as_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    #[tokio::test]
    async fn tick_loop_runs_one_pass_then_stops_on_shutdown() {
        let db = crate::storage::Db::open_in_memory().unwrap();
        let ledger = LedgerStore::new(db.clone());
        let catalog = MarketCatalog::new(db.clone());
        let resolution = ResolutionEngine::new(db.clone(), catalog.clone(), ledger.clone());
        let mut config = Config::from_env();
        config.tick_rate_seconds = 3600;
        let maker = MarketMaker::new(catalog.clone(), &config);

        let llm: Arc<dyn crate::llm::LlmProvider> = Arc::new(crate::llm::MockProvider::new());
        let tick_engine = TickEngine::new(
            ledger.clone(),
            catalog.clone(),
            ResolutionEngine::new(db.clone(), catalog.clone(), ledger.clone()),
            llm,
            crate::tools::ToolGateway::new(),
            crate::stream::StreamPublisher::default(),
            crate::metrics_sink::MetricsSink::new(db.clone()),
            crate::agent_lock::AgentLocks::new(),
            config.clone(),
        );

        ledger
            .genesis("agent-1", Decimal::from_str("100.00").unwrap(), None)
            .await
            .unwrap();

        let scheduler = Scheduler::new(ledger.clone(), catalog, resolution, maker, tick_engine, config);

        let shutdown = scheduler.shutdown.clone();
        let handle = tokio::spawn(async move {
            scheduler.run_tick_loop().await;
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.store(true, Ordering::SeqCst);
        handle.await.unwrap();

        let chain = ledger.load_chain("agent-1").await.unwrap();
        assert!(chain.len() >= 2, "tick loop should have executed at least one tick");
    }
}
