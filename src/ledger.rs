//! Hash-chained append-only ledger (SPEC_FULL.md §3, §4.A).
//!
//! Agent balance is never trusted directly — `chain_sum` recomputes it from
//! the entries every time it matters for a financial decision. `cached_balance`
//! on the agent row exists purely so out-of-scope read paths (an insights
//! endpoint) don't have to sum the whole chain; [`LedgerStore::reconcile`]
//! is the only writer of that field and always derives it from `chain_sum`.

use crate::error::{ArenaError, ArenaResult};
use crate::money::canonical;
use crate::storage::Db;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rusqlite::{params, OptionalExtension};
use sha2::{Digest, Sha256};
use std::str::FromStr;

pub const GENESIS_DIGEST: &str = "0000000000000000000000000000000000000000000000000000000000000000";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    Alive,
    Dead,
}

impl AgentStatus {
    fn as_str(self) -> &'static str {
        match self {
            AgentStatus::Alive => "ALIVE",
            AgentStatus::Dead => "DEAD",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "DEAD" => AgentStatus::Dead,
            _ => AgentStatus::Alive,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Agent {
    pub agent_id: String,
    pub status: AgentStatus,
    pub cached_balance: Decimal,
    pub last_action_at: i64,
    pub genesis_at: i64,
    pub personality: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerKind {
    Grant,
    Wager,
    MarketStake,
    ResearchPayout,
    ResearchLookupFee,
    Heartbeat,
    Liquidation,
    Revive,
}

impl LedgerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LedgerKind::Grant => "GRANT",
            LedgerKind::Wager => "WAGER",
            LedgerKind::MarketStake => "MARKET_STAKE",
            LedgerKind::ResearchPayout => "RESEARCH_PAYOUT",
            LedgerKind::ResearchLookupFee => "RESEARCH_LOOKUP_FEE",
            LedgerKind::Heartbeat => "HEARTBEAT",
            LedgerKind::Liquidation => "LIQUIDATION",
            LedgerKind::Revive => "REVIVE",
        }
    }
}

impl FromStr for LedgerKind {
    type Err = ArenaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "GRANT" => LedgerKind::Grant,
            "WAGER" => LedgerKind::Wager,
            "MARKET_STAKE" => LedgerKind::MarketStake,
            "RESEARCH_PAYOUT" => LedgerKind::ResearchPayout,
            "RESEARCH_LOOKUP_FEE" => LedgerKind::ResearchLookupFee,
            "HEARTBEAT" => LedgerKind::Heartbeat,
            "LIQUIDATION" => LedgerKind::Liquidation,
            "REVIVE" => LedgerKind::Revive,
            other => return Err(ArenaError::Configuration(format!("unknown ledger kind {other}"))),
        })
    }
}

#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub agent_id: String,
    pub sequence: i64,
    pub amount: Decimal,
    pub kind: LedgerKind,
    pub reference: String,
    pub timestamp: DateTime<Utc>,
    pub previous_digest: String,
    pub digest: String,
}

fn compute_digest(
    agent_id: &str,
    amount: Decimal,
    kind: LedgerKind,
    reference: &str,
    timestamp: &DateTime<Utc>,
    previous_digest: &str,
    sequence: i64,
) -> String {
    let payload = format!(
        "{}|{}|{}|{}|{}|{}|{}",
        agent_id,
        canonical(amount),
        kind.as_str(),
        reference,
        timestamp.to_rfc3339(),
        previous_digest,
        sequence,
    );
    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Clone)]
pub struct LedgerStore {
    db: Db,
}

impl LedgerStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Shared handle for callers (the tick engine) that need to open and
    /// hold their own transaction spanning several ledger/market writes.
    pub(crate) fn db(&self) -> Db {
        self.db.clone()
    }

    /// Creates an agent and writes its opening GRANT entry atomically.
    pub async fn genesis(
        &self,
        agent_id: &str,
        initial_grant: Decimal,
        personality: Option<String>,
    ) -> ArenaResult<Agent> {
        let mut conn = self.db.conn.lock().await;
        let tx = conn.transaction()?;
        let now = Utc::now();

        tx.execute(
            "INSERT INTO agents (agent_id, status, cached_balance, last_action_at, genesis_at, personality)
             VALUES (?1, 'ALIVE', '0', ?2, ?2, ?3)",
            params![agent_id, now.timestamp(), personality],
        )?;

        let digest = compute_digest(
            agent_id,
            initial_grant,
            LedgerKind::Grant,
            "genesis",
            &now,
            GENESIS_DIGEST,
            1,
        );
        tx.execute(
            "INSERT INTO ledger_entries
             (agent_id, sequence, amount, kind, reference, timestamp, previous_digest, digest)
             VALUES (?1, 1, ?2, 'GRANT', 'genesis', ?3, ?4, ?5)",
            params![
                agent_id,
                canonical(initial_grant),
                now.to_rfc3339(),
                GENESIS_DIGEST,
                digest,
            ],
        )?;
        tx.execute(
            "UPDATE agents SET cached_balance = ?1 WHERE agent_id = ?2",
            params![canonical(initial_grant), agent_id],
        )?;
        tx.commit()?;

        Ok(Agent {
            agent_id: agent_id.to_string(),
            status: AgentStatus::Alive,
            cached_balance: initial_grant,
            last_action_at: now.timestamp(),
            genesis_at: now.timestamp(),
            personality: None,
        })
    }

    /// Operator-only transition: DEAD -> ALIVE with a fresh grant.
    pub async fn revive(&self, agent_id: &str, grant_amount: Decimal) -> ArenaResult<()> {
        let agent = self
            .get_agent(agent_id)
            .await?
            .ok_or_else(|| ArenaError::AgentNotFound(agent_id.to_string()))?;
        if agent.status != AgentStatus::Dead {
            return Err(ArenaError::AgentNotAlive(agent_id.to_string()));
        }
        let mut conn = self.db.conn.lock().await;
        let tx = conn.transaction()?;
        append_entry_in_tx(&tx, agent_id, grant_amount, LedgerKind::Revive, "revive")?;
        tx.execute(
            "UPDATE agents SET status = 'ALIVE' WHERE agent_id = ?1",
            params![agent_id],
        )?;
        tx.commit()?;
        drop(conn);
        self.reconcile(agent_id).await
    }

    pub async fn get_agent(&self, agent_id: &str) -> ArenaResult<Option<Agent>> {
        let conn = self.db.conn.lock().await;
        let row = conn
            .query_row(
                "SELECT agent_id, status, cached_balance, last_action_at, genesis_at, personality
                 FROM agents WHERE agent_id = ?1",
                params![agent_id],
                |row| {
                    let balance_str: String = row.get(2)?;
                    Ok(Agent {
                        agent_id: row.get(0)?,
                        status: AgentStatus::parse(&row.get::<_, String>(1)?),
                        cached_balance: Decimal::from_str(&balance_str)
                            .unwrap_or(Decimal::ZERO),
                        last_action_at: row.get(3)?,
                        genesis_at: row.get(4)?,
                        personality: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub async fn list_alive(&self) -> ArenaResult<Vec<String>> {
        let conn = self.db.conn.lock().await;
        let mut stmt = conn.prepare_cached("SELECT agent_id FROM agents WHERE status = 'ALIVE'")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(ids)
    }

    /// Appends one ledger entry within its own transaction. Most tick-engine
    /// call sites should prefer [`LedgerStore::append_many`] so several
    /// entries from one tick share a transaction, but this is exposed for
    /// single-entry cases (HEARTBEAT, LIQUIDATION).
    pub async fn append(
        &self,
        agent_id: &str,
        amount: Decimal,
        kind: LedgerKind,
        reference: &str,
    ) -> ArenaResult<LedgerEntry> {
        let mut conn = self.db.conn.lock().await;
        let tx = conn.transaction()?;
        let entry = append_entry_in_tx(&tx, agent_id, amount, kind, reference)?;
        tx.commit()?;
        Ok(entry)
    }

    /// Appends several entries for the same agent atomically, then reconciles
    /// the cached balance. Used by the tick engine so a research payout and
    /// its heartbeat land in a single transaction (SPEC_FULL §4.J).
    pub async fn append_many(
        &self,
        agent_id: &str,
        writes: &[(Decimal, LedgerKind, &str)],
    ) -> ArenaResult<Vec<LedgerEntry>> {
        let mut conn = self.db.conn.lock().await;
        let tx = conn.transaction()?;
        let mut out = Vec::with_capacity(writes.len());
        for (amount, kind, reference) in writes {
            out.push(append_entry_in_tx(&tx, agent_id, *amount, *kind, reference)?);
        }
        let sum = chain_sum_in_conn(&tx, agent_id)?;
        tx.execute(
            "UPDATE agents SET cached_balance = ?1, last_action_at = ?2 WHERE agent_id = ?3",
            params![canonical(sum), Utc::now().timestamp(), agent_id],
        )?;
        tx.commit()?;
        Ok(out)
    }

    pub async fn chain_sum(&self, agent_id: &str) -> ArenaResult<Decimal> {
        let conn = self.db.conn.lock().await;
        chain_sum_in_conn(&conn, agent_id)
    }

    /// Overwrites `cached_balance` with `chain_sum` — the only write path for
    /// that field outside of a tick's own atomic append.
    pub async fn reconcile(&self, agent_id: &str) -> ArenaResult<Decimal> {
        let conn = self.db.conn.lock().await;
        let sum = chain_sum_in_conn(&conn, agent_id)?;
        conn.execute(
            "UPDATE agents SET cached_balance = ?1 WHERE agent_id = ?2",
            params![canonical(sum), agent_id],
        )?;
        Ok(sum)
    }

    /// Counts the consecutive HEARTBEAT entries at the tip of the chain.
    pub async fn idle_streak(&self, agent_id: &str) -> ArenaResult<u32> {
        let conn = self.db.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT kind FROM ledger_entries WHERE agent_id = ?1 ORDER BY sequence DESC",
        )?;
        let kinds = stmt.query_map(params![agent_id], |row| row.get::<_, String>(0))?;
        let mut streak = 0u32;
        for kind in kinds {
            let kind = kind?;
            if kind == LedgerKind::Heartbeat.as_str() {
                streak += 1;
            } else {
                break;
            }
        }
        Ok(streak)
    }

    pub async fn load_chain(&self, agent_id: &str) -> ArenaResult<Vec<LedgerEntry>> {
        let conn = self.db.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT agent_id, sequence, amount, kind, reference, timestamp, previous_digest, digest
             FROM ledger_entries WHERE agent_id = ?1 ORDER BY sequence ASC",
        )?;
        let rows = stmt.query_map(params![agent_id], |row| row_to_entry(row))?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    /// Walks the full chain recomputing every digest/link. Returns the
    /// sequence number of the first broken link, if any.
    pub async fn verify_chain(&self, agent_id: &str) -> ArenaResult<Option<i64>> {
        let entries = self.load_chain(agent_id).await?;
        let mut prev_digest = GENESIS_DIGEST.to_string();
        for (i, entry) in entries.iter().enumerate() {
            let expected_sequence = (i as i64) + 1;
            if entry.sequence != expected_sequence || entry.previous_digest != prev_digest {
                return Ok(Some(entry.sequence));
            }
            let recomputed = compute_digest(
                &entry.agent_id,
                entry.amount,
                entry.kind,
                &entry.reference,
                &entry.timestamp,
                &entry.previous_digest,
                entry.sequence,
            );
            if recomputed != entry.digest {
                return Ok(Some(entry.sequence));
            }
            prev_digest = entry.digest.clone();
        }
        Ok(None)
    }

    pub async fn liquidate(&self, agent_id: &str, drain_amount: Decimal) -> ArenaResult<LedgerEntry> {
        let mut conn = self.db.conn.lock().await;
        let tx = conn.transaction()?;
        let entry = liquidate_in_tx(&tx, agent_id, drain_amount)?;
        tx.commit()?;
        Ok(entry)
    }
}

/// Transaction-scoped counterpart of [`LedgerStore::get_agent`]. Used by the
/// tick engine so agent-load participates in the tick's own transaction
/// instead of taking a second lock on the shared connection.
pub(crate) fn get_agent_in_tx(tx: &rusqlite::Transaction, agent_id: &str) -> ArenaResult<Option<Agent>> {
    tx.query_row(
        "SELECT agent_id, status, cached_balance, last_action_at, genesis_at, personality
         FROM agents WHERE agent_id = ?1",
        params![agent_id],
        |row| {
            let balance_str: String = row.get(2)?;
            Ok(Agent {
                agent_id: row.get(0)?,
                status: AgentStatus::parse(&row.get::<_, String>(1)?),
                cached_balance: Decimal::from_str(&balance_str).unwrap_or(Decimal::ZERO),
                last_action_at: row.get(3)?,
                genesis_at: row.get(4)?,
                personality: row.get(5)?,
            })
        },
    )
    .optional()
    .map_err(ArenaError::from)
}

/// Transaction-scoped counterpart of [`LedgerStore::idle_streak`].
pub(crate) fn idle_streak_in_tx(tx: &rusqlite::Transaction, agent_id: &str) -> ArenaResult<u32> {
    let mut stmt = tx.prepare_cached(
        "SELECT kind FROM ledger_entries WHERE agent_id = ?1 ORDER BY sequence DESC",
    )?;
    let kinds = stmt.query_map(params![agent_id], |row| row.get::<_, String>(0))?;
    let mut streak = 0u32;
    for kind in kinds {
        let kind = kind?;
        if kind == LedgerKind::Heartbeat.as_str() {
            streak += 1;
        } else {
            break;
        }
    }
    Ok(streak)
}

/// Transaction-scoped counterpart of [`LedgerStore::reconcile`].
pub(crate) fn reconcile_in_tx(tx: &rusqlite::Transaction, agent_id: &str) -> ArenaResult<Decimal> {
    let sum = chain_sum_in_conn(tx, agent_id)?;
    tx.execute(
        "UPDATE agents SET cached_balance = ?1 WHERE agent_id = ?2",
        params![canonical(sum), agent_id],
    )?;
    Ok(sum)
}

/// Transaction-scoped counterpart of [`LedgerStore::liquidate`].
pub(crate) fn liquidate_in_tx(
    tx: &rusqlite::Transaction,
    agent_id: &str,
    drain_amount: Decimal,
) -> ArenaResult<LedgerEntry> {
    let entry = append_entry_in_tx(tx, agent_id, -drain_amount, LedgerKind::Liquidation, "insolvency")?;
    tx.execute(
        "UPDATE agents SET status = 'DEAD', cached_balance = '0' WHERE agent_id = ?1",
        params![agent_id],
    )?;
    Ok(entry)
}

fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<LedgerEntry> {
    let amount_str: String = row.get(2)?;
    let kind_str: String = row.get(3)?;
    let timestamp_str: String = row.get(5)?;
    Ok(LedgerEntry {
        agent_id: row.get(0)?,
        sequence: row.get(1)?,
        amount: Decimal::from_str(&amount_str).unwrap_or(Decimal::ZERO),
        kind: LedgerKind::from_str(&kind_str).unwrap_or(LedgerKind::Heartbeat),
        reference: row.get(4)?,
        timestamp: DateTime::parse_from_rfc3339(&timestamp_str)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        previous_digest: row.get(6)?,
        digest: row.get(7)?,
    })
}

pub(crate) fn chain_sum_in_conn(conn: &rusqlite::Connection, agent_id: &str) -> ArenaResult<Decimal> {
    let mut stmt =
        conn.prepare_cached("SELECT amount FROM ledger_entries WHERE agent_id = ?1")?;
    let amounts = stmt.query_map(params![agent_id], |row| row.get::<_, String>(0))?;
    let mut sum = Decimal::ZERO;
    for amount in amounts {
        let amount = amount?;
        sum += Decimal::from_str(&amount).unwrap_or(Decimal::ZERO);
    }
    Ok(sum)
}

pub(crate) fn append_entry_in_tx(
    tx: &rusqlite::Transaction,
    agent_id: &str,
    amount: Decimal,
    kind: LedgerKind,
    reference: &str,
) -> ArenaResult<LedgerEntry> {
    let tip: Option<(i64, String)> = tx
        .query_row(
            "SELECT sequence, digest FROM ledger_entries
             WHERE agent_id = ?1 ORDER BY sequence DESC LIMIT 1",
            params![agent_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let (sequence, previous_digest) = match tip {
        Some((seq, digest)) => (seq + 1, digest),
        None => (1, GENESIS_DIGEST.to_string()),
    };

    let timestamp = Utc::now();
    let digest = compute_digest(
        agent_id,
        amount,
        kind,
        reference,
        &timestamp,
        &previous_digest,
        sequence,
    );

    let inserted = tx.execute(
        "INSERT INTO ledger_entries
         (agent_id, sequence, amount, kind, reference, timestamp, previous_digest, digest)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            agent_id,
            sequence,
            canonical(amount),
            kind.as_str(),
            reference,
            timestamp.to_rfc3339(),
            previous_digest,
            digest,
        ],
    );

    match inserted {
        Ok(_) => Ok(LedgerEntry {
            agent_id: agent_id.to_string(),
            sequence,
            amount,
            kind,
            reference: reference.to_string(),
            timestamp,
            previous_digest,
            digest,
        }),
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Err(ArenaError::SequenceConflict {
                agent_id: agent_id.to_string(),
                sequence,
            })
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> LedgerStore {
        let db = Db::open_in_memory().unwrap();
        LedgerStore::new(db)
    }

    #[tokio::test]
    async fn genesis_writes_grant_and_reconciled_balance() {
        let store = store().await;
        let grant = Decimal::from_str("100.00").unwrap();
        store.genesis("agent-1", grant, None).await.unwrap();
        let sum = store.chain_sum("agent-1").await.unwrap();
        assert_eq!(sum, grant);
        let agent = store.get_agent("agent-1").await.unwrap().unwrap();
        assert_eq!(agent.cached_balance, grant);
        assert_eq!(agent.status, AgentStatus::Alive);
    }

    #[tokio::test]
    async fn chain_links_and_digests_verify() {
        let store = store().await;
        store
            .genesis("agent-1", Decimal::from_str("100.00").unwrap(), None)
            .await
            .unwrap();
        store
            .append(
                "agent-1",
                Decimal::from_str("-0.50").unwrap(),
                LedgerKind::Heartbeat,
                "tick-1",
            )
            .await
            .unwrap();
        store
            .append(
                "agent-1",
                Decimal::from_str("-0.50").unwrap(),
                LedgerKind::Heartbeat,
                "tick-2",
            )
            .await
            .unwrap();

        assert_eq!(store.verify_chain("agent-1").await.unwrap(), None);
        let chain = store.load_chain("agent-1").await.unwrap();
        assert_eq!(chain.len(), 3);
        assert_eq!(chain[0].sequence, 1);
        assert_eq!(chain[1].previous_digest, chain[0].digest);
        assert_eq!(chain[2].previous_digest, chain[1].digest);
    }

    #[tokio::test]
    async fn idle_streak_counts_trailing_heartbeats_only() {
        let store = store().await;
        store
            .genesis("agent-1", Decimal::from_str("10.00").unwrap(), None)
            .await
            .unwrap();
        store
            .append(
                "agent-1",
                Decimal::from_str("1.00").unwrap(),
                LedgerKind::ResearchPayout,
                "payout",
            )
            .await
            .unwrap();
        store
            .append(
                "agent-1",
                Decimal::from_str("-0.50").unwrap(),
                LedgerKind::Heartbeat,
                "tick",
            )
            .await
            .unwrap();
        store
            .append(
                "agent-1",
                Decimal::from_str("-0.50").unwrap(),
                LedgerKind::Heartbeat,
                "tick",
            )
            .await
            .unwrap();

        assert_eq!(store.idle_streak("agent-1").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn liquidation_marks_agent_dead_and_drains_balance() {
        let store = store().await;
        store
            .genesis("agent-1", Decimal::from_str("0.20").unwrap(), None)
            .await
            .unwrap();
        store
            .liquidate("agent-1", Decimal::from_str("0.20").unwrap())
            .await
            .unwrap();

        let agent = store.get_agent("agent-1").await.unwrap().unwrap();
        assert_eq!(agent.status, AgentStatus::Dead);
        assert_eq!(agent.cached_balance, Decimal::ZERO);
        assert_eq!(store.chain_sum("agent-1").await.unwrap(), Decimal::ZERO);
    }

    #[test]
    fn digest_is_deterministic_for_same_inputs() {
        let ts = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let a = compute_digest(
            "agent-1",
            Decimal::from_str("1.00").unwrap(),
            LedgerKind::Heartbeat,
            "tick-1",
            &ts,
            GENESIS_DIGEST,
            1,
        );
        let b = compute_digest(
            "agent-1",
            Decimal::from_str("1.00").unwrap(),
            LedgerKind::Heartbeat,
            "tick-1",
            &ts,
            GENESIS_DIGEST,
            1,
        );
        assert_eq!(a, b);
    }
}
