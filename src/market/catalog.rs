//! Market Catalog (SPEC_FULL.md §4.C).

use super::{Criteria, Market, MarketStatus, SourceKind};
use crate::error::ArenaResult;
use crate::money::canonical;
use crate::storage::Db;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rusqlite::{params, OptionalExtension};
use std::str::FromStr;

#[derive(Clone)]
pub struct MarketCatalog {
    db: Db,
}

impl MarketCatalog {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub async fn create(
        &self,
        description: &str,
        source_kind: SourceKind,
        criteria: Criteria,
        bounty: Decimal,
        deadline: DateTime<Utc>,
    ) -> ArenaResult<Market> {
        let conn = self.db.conn.lock().await;
        let existing: Option<String> = conn
            .query_row(
                "SELECT market_id FROM markets WHERE description = ?1 AND status = 'OPEN'",
                params![description],
                |row| row.get(0),
            )
            .optional()?;
        if existing.is_some() {
            return Err(crate::error::ArenaError::Configuration(format!(
                "duplicate open market: {description}"
            )));
        }

        let market_id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let criteria_json = serde_json::to_string(&criteria)?;
        conn.execute(
            "INSERT INTO markets
             (market_id, description, source_kind, criteria, bounty, deadline, status, outcome, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'OPEN', NULL, ?7)",
            params![
                market_id,
                description,
                source_kind.as_str(),
                criteria_json,
                canonical(bounty),
                deadline.to_rfc3339(),
                now.to_rfc3339(),
            ],
        )?;

        Ok(Market {
            market_id,
            description: description.to_string(),
            source_kind,
            criteria,
            bounty,
            deadline,
            status: MarketStatus::Open,
            outcome: None,
            created_at: now,
        })
    }

    pub async fn get(&self, market_id: &str) -> ArenaResult<Option<Market>> {
        let conn = self.db.conn.lock().await;
        let row = conn
            .query_row(
                "SELECT market_id, description, source_kind, criteria, bounty, deadline, status, outcome, created_at
                 FROM markets WHERE market_id = ?1",
                params![market_id],
                row_to_market,
            )
            .optional()?;
        Ok(row)
    }

    /// Returns OPEN markets the agent has no existing prediction against
    /// (regardless of WIN/LOSS/PENDING — resolved per the "no resubmission"
    /// decision in DESIGN.md), ordered by soonest deadline.
    pub async fn list_active_for_agent(&self, agent_id: &str, limit: usize) -> ArenaResult<Vec<Market>> {
        let limit = limit.clamp(1, 200) as i64;
        let conn = self.db.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT market_id, description, source_kind, criteria, bounty, deadline, status, outcome, created_at
             FROM markets
             WHERE status = 'OPEN'
               AND market_id NOT IN (
                   SELECT market_id FROM market_predictions WHERE agent_id = ?1
               )
             ORDER BY deadline ASC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![agent_id, limit], row_to_market)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub async fn count_open(&self, source_kind: Option<SourceKind>) -> ArenaResult<usize> {
        let conn = self.db.conn.lock().await;
        let count: i64 = match source_kind {
            Some(kind) => conn.query_row(
                "SELECT COUNT(*) FROM markets WHERE status = 'OPEN' AND source_kind = ?1",
                params![kind.as_str()],
                |row| row.get(0),
            )?,
            None => conn.query_row(
                "SELECT COUNT(*) FROM markets WHERE status = 'OPEN'",
                [],
                |row| row.get(0),
            )?,
        };
        Ok(count as usize)
    }

    pub async fn list_open_past_deadline(&self, now: DateTime<Utc>) -> ArenaResult<Vec<Market>> {
        let conn = self.db.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT market_id, description, source_kind, criteria, bounty, deadline, status, outcome, created_at
             FROM markets WHERE status = 'OPEN' AND deadline <= ?1",
        )?;
        let rows = stmt.query_map(params![now.to_rfc3339()], row_to_market)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }
}

/// Transaction-scoped counterpart of [`MarketCatalog::get`]. Lets the tick
/// engine re-check a market's status inside its own write transaction
/// instead of trusting a read taken before the LLM call.
pub(crate) fn get_in_tx(tx: &rusqlite::Transaction, market_id: &str) -> ArenaResult<Option<Market>> {
    tx.query_row(
        "SELECT market_id, description, source_kind, criteria, bounty, deadline, status, outcome, created_at
         FROM markets WHERE market_id = ?1",
        params![market_id],
        row_to_market,
    )
    .optional()
    .map_err(crate::error::ArenaError::from)
}

fn row_to_market(row: &rusqlite::Row) -> rusqlite::Result<Market> {
    let source_kind_str: String = row.get(2)?;
    let criteria_str: String = row.get(3)?;
    let bounty_str: String = row.get(4)?;
    let deadline_str: String = row.get(5)?;
    let status_str: String = row.get(6)?;
    let created_at_str: String = row.get(8)?;
    Ok(Market {
        market_id: row.get(0)?,
        description: row.get(1)?,
        source_kind: SourceKind::from_str(&source_kind_str)
            .unwrap_or(super::SourceKind::Research),
        criteria: serde_json::from_str(&criteria_str).unwrap_or(Criteria::Research {
            answer_hash: String::new(),
        }),
        bounty: Decimal::from_str(&bounty_str).unwrap_or(Decimal::ZERO),
        deadline: DateTime::parse_from_rfc3339(&deadline_str)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        status: MarketStatus::parse(&status_str),
        outcome: row.get(7)?,
        created_at: DateTime::parse_from_rfc3339(&created_at_str)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn catalog() -> MarketCatalog {
        let db = Db::open_in_memory().unwrap();
        MarketCatalog::new(db)
    }

    #[tokio::test]
    async fn create_and_get_roundtrip() {
        let catalog = catalog();
        let deadline = Utc::now() + Duration::minutes(5);
        let created = catalog
            .create(
                "What is the capital of France?",
                SourceKind::Research,
                Criteria::Research {
                    answer_hash: "abc123".to_string(),
                },
                Decimal::from_str("25.00").unwrap(),
                deadline,
            )
            .await
            .unwrap();

        let fetched = catalog.get(&created.market_id).await.unwrap().unwrap();
        assert_eq!(fetched.description, "What is the capital of France?");
        assert_eq!(fetched.status, MarketStatus::Open);
    }

    #[tokio::test]
    async fn duplicate_open_description_rejected() {
        let catalog = catalog();
        let deadline = Utc::now() + Duration::minutes(5);
        let criteria = Criteria::Research {
            answer_hash: "abc".to_string(),
        };
        catalog
            .create("dup?", SourceKind::Research, criteria.clone(), Decimal::from_str("25.00").unwrap(), deadline)
            .await
            .unwrap();
        let result = catalog
            .create("dup?", SourceKind::Research, criteria, Decimal::from_str("25.00").unwrap(), deadline)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn list_active_excludes_markets_agent_already_staked() {
        let catalog = catalog();
        let deadline = Utc::now() + Duration::minutes(5);
        let market = catalog
            .create(
                "q1",
                SourceKind::Research,
                Criteria::Research { answer_hash: "x".into() },
                Decimal::from_str("25.00").unwrap(),
                deadline,
            )
            .await
            .unwrap();

        let conn = catalog.db.conn.lock().await;
        conn.execute(
            "INSERT INTO market_predictions (id, market_id, agent_id, outcome_text, stake, status, payout, created_at)
             VALUES ('p1', ?1, 'agent-1', 'x', '1.00', 'PENDING', NULL, ?2)",
            params![market.market_id, Utc::now().to_rfc3339()],
        )
        .unwrap();
        drop(conn);

        let active = catalog.list_active_for_agent("agent-1", 10).await.unwrap();
        assert!(active.is_empty());
        let active_other = catalog.list_active_for_agent("agent-2", 10).await.unwrap();
        assert_eq!(active_other.len(), 1);
    }
}
