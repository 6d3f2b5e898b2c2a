//! Integration tests for the tick engine running against a file-backed
//! SQLite database (not `:memory:`), exercising the full fleet path the
//! `arena` binary drives: ledger + catalog + resolution + mock LLM + tools
//! + stream + metrics, wired exactly like `main.rs`.

use agent_arena_core::agent_lock::AgentLocks;
use agent_arena_core::config::{Config, EnforcementMode};
use agent_arena_core::ledger::{LedgerKind, LedgerStore};
use agent_arena_core::llm::{LlmProvider, MockProvider};
use agent_arena_core::market::{MarketCatalog, ResolutionEngine};
use agent_arena_core::metrics_sink::MetricsSink;
use agent_arena_core::storage::Db;
use agent_arena_core::stream::StreamPublisher;
use agent_arena_core::tick::{TickEngine, TickOutcome};
use agent_arena_core::tools::ToolGateway;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;

fn open_tempfile_db() -> (tempfile::TempDir, Db) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("arena.sqlite3");
    let db = Db::open(path.to_str().unwrap()).expect("open tempfile db");
    (dir, db)
}

fn build_engine(db: Db, mode: EnforcementMode) -> TickEngine {
    let ledger = LedgerStore::new(db.clone());
    let catalog = MarketCatalog::new(db.clone());
    let resolution = ResolutionEngine::new(db.clone(), catalog.clone(), ledger.clone());
    let llm: Arc<dyn LlmProvider> = Arc::new(MockProvider::new());
    let mut config = Config::from_env();
    config.enforcement_mode = mode;
    TickEngine::new(
        ledger,
        catalog,
        resolution,
        llm,
        ToolGateway::new(),
        StreamPublisher::default(),
        MetricsSink::new(db),
        AgentLocks::new(),
        config,
    )
}

/// No open markets means every tick can only ever produce a HEARTBEAT (pure
/// entropy decay) or a WAGER (the standalone fallback, which isn't gated on
/// market availability) — never RESEARCH/PORTFOLIO/LIQUIDATION. Both of
/// those outcomes are strictly balance-decreasing in enforce mode, so the
/// chain must stay valid and the balance must fall monotonically.
#[tokio::test]
async fn enforce_mode_fleet_run_keeps_chain_valid_and_drains_balance() {
    let (_dir, db) = open_tempfile_db();
    let engine = build_engine(db.clone(), EnforcementMode::Enforce);
    let ledger = LedgerStore::new(db);

    ledger
        .genesis("agent-1", Decimal::from_str("500.00").unwrap(), None)
        .await
        .unwrap();

    let mut previous_balance = ledger.chain_sum("agent-1").await.unwrap();
    for _ in 0..6 {
        let outcome = engine.execute_tick("agent-1").await.unwrap();
        assert!(
            matches!(outcome, TickOutcome::Heartbeat | TickOutcome::Wager),
            "no markets exist, only entropy or a standalone wager is possible, got {outcome:?}"
        );

        assert_eq!(
            ledger.verify_chain("agent-1").await.unwrap(),
            None,
            "hash chain must stay valid after every tick"
        );

        let balance = ledger.chain_sum("agent-1").await.unwrap();
        assert!(
            balance < previous_balance,
            "entropy fee must strictly reduce the balance every solvent tick"
        );
        previous_balance = balance;

        let agent = ledger.get_agent("agent-1").await.unwrap().unwrap();
        assert_eq!(agent.cached_balance, balance, "cached balance must reconcile");
    }
}

/// Observe mode never writes the entropy/phantom-enforcement tax to the
/// ledger — only an agent's own chosen action (here, the standalone wager)
/// can grow the chain. So no HEARTBEAT entry should ever appear.
#[tokio::test]
async fn observe_mode_never_writes_heartbeat_entries() {
    let (_dir, db) = open_tempfile_db();
    let engine = build_engine(db.clone(), EnforcementMode::Observe);
    let ledger = LedgerStore::new(db);

    ledger
        .genesis("agent-1", Decimal::from_str("200.00").unwrap(), None)
        .await
        .unwrap();

    for _ in 0..6 {
        engine.execute_tick("agent-1").await.unwrap();
    }

    let agent = ledger.get_agent("agent-1").await.unwrap().unwrap();
    assert_eq!(agent.status, agent_arena_core::ledger::AgentStatus::Alive);

    let chain = ledger.load_chain("agent-1").await.unwrap();
    for entry in chain.iter().skip(1) {
        assert_ne!(
            entry.kind,
            LedgerKind::Heartbeat,
            "observe mode must never write the entropy tax to the ledger"
        );
    }
    assert_eq!(ledger.verify_chain("agent-1").await.unwrap(), None);
}

/// Two agents ticking through the same engine never cross-contaminate each
/// other's chains — each agent's sequence numbers and digests are scoped to
/// its own chain.
#[tokio::test]
async fn two_agents_tick_independently() {
    let (_dir, db) = open_tempfile_db();
    let engine = build_engine(db.clone(), EnforcementMode::Enforce);
    let ledger = LedgerStore::new(db);

    ledger
        .genesis("agent-a", Decimal::from_str("500.00").unwrap(), None)
        .await
        .unwrap();
    ledger
        .genesis("agent-b", Decimal::from_str("500.00").unwrap(), None)
        .await
        .unwrap();

    for _ in 0..4 {
        engine.execute_tick("agent-a").await.unwrap();
        engine.execute_tick("agent-b").await.unwrap();
    }

    assert_eq!(ledger.verify_chain("agent-a").await.unwrap(), None);
    assert_eq!(ledger.verify_chain("agent-b").await.unwrap(), None);

    let chain_a = ledger.load_chain("agent-a").await.unwrap();
    let chain_b = ledger.load_chain("agent-b").await.unwrap();
    assert!(chain_a.iter().all(|e| e.agent_id == "agent-a"));
    assert!(chain_b.iter().all(|e| e.agent_id == "agent-b"));
}
