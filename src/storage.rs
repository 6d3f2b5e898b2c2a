//! Shared SQLite handle and schema.
//!
//! A single `Arc<Mutex<Connection>>`, mirroring `vault::vault_db::VaultDb`:
//! one connection, WAL journaling, `prepare_cached` everywhere. Every table
//! this crate needs lives behind this one handle so a single mutex acquire
//! serializes all writes to the file, which is one of the two sanctioned
//! ways SPEC_FULL.md §5 allows per-agent tick serialization (paired with the
//! in-process per-agent lock in [`crate::tick`]).

use crate::error::ArenaResult;
use rusqlite::Connection;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Clone)]
pub struct Db {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl Db {
    pub fn open(db_path: &str) -> ArenaResult<Self> {
        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        conn.pragma_update(None, "foreign_keys", "ON").ok();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS agents (
                agent_id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                cached_balance TEXT NOT NULL,
                last_action_at INTEGER NOT NULL,
                genesis_at INTEGER NOT NULL,
                personality TEXT
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS ledger_entries (
                agent_id TEXT NOT NULL,
                sequence INTEGER NOT NULL,
                amount TEXT NOT NULL,
                kind TEXT NOT NULL,
                reference TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                previous_digest TEXT NOT NULL,
                digest TEXT NOT NULL,
                PRIMARY KEY (agent_id, sequence)
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_ledger_entries_agent_seq
             ON ledger_entries(agent_id, sequence DESC)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS markets (
                market_id TEXT PRIMARY KEY,
                description TEXT NOT NULL,
                source_kind TEXT NOT NULL,
                criteria TEXT NOT NULL,
                bounty TEXT NOT NULL,
                deadline TEXT NOT NULL,
                status TEXT NOT NULL,
                outcome TEXT,
                created_at TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_markets_status_deadline
             ON markets(status, deadline)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_markets_source_status
             ON markets(source_kind, status)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS market_predictions (
                id TEXT PRIMARY KEY,
                market_id TEXT NOT NULL,
                agent_id TEXT NOT NULL,
                outcome_text TEXT NOT NULL,
                stake TEXT NOT NULL,
                status TEXT NOT NULL,
                payout TEXT,
                created_at TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_predictions_market
             ON market_predictions(market_id)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_predictions_agent_market
             ON market_predictions(agent_id, market_id)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS metrics_records (
                id TEXT PRIMARY KEY,
                agent_id TEXT NOT NULL,
                tick_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                payload TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_metrics_records_ts ON metrics_records(timestamp DESC)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_metrics_records_tick ON metrics_records(tick_id)",
            [],
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database for tests.
    #[cfg(test)]
    pub fn open_in_memory() -> ArenaResult<Self> {
        Self::open(":memory:")
    }
}
