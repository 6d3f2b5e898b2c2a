//! Resolution Engine (SPEC_FULL.md §4.D).
//!
//! Instant settlement for knowledge markets via cryptographic commitment;
//! deferred settlement for deadline-based markets, driven by a periodic
//! sweep. Tie-breaking for deferred markets is strict-operator (DESIGN.md
//! open question #2): `>`/`<` for WEATHER, `>=` for GITHUB, literal
//! substring containment for NEWS.

use super::{Criteria, Market, MarketCatalog, MarketPrediction, MarketStatus, PredictionStatus};
use crate::error::{ArenaError, ArenaResult};
use crate::ledger::{LedgerKind, LedgerStore};
use crate::money::canonical;
use crate::storage::Db;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rusqlite::params;
use sha2::{Digest, Sha256};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionOutcome {
    Correct,
    Wrong,
    Closed,
}

pub struct ResolutionEngine {
    db: Db,
    catalog: MarketCatalog,
    ledger: LedgerStore,
}

impl ResolutionEngine {
    pub fn new(db: Db, catalog: MarketCatalog, ledger: LedgerStore) -> Self {
        Self { db, catalog, ledger }
    }

    /// Instant path for knowledge (RESEARCH-sourced) markets. Always records
    /// a prediction and a stake entry, even on CORRECT/WRONG; returns
    /// `(None, Closed)` with no writes if the market is no longer OPEN.
    pub async fn submit_research_answer(
        &self,
        agent_id: &str,
        market_id: &str,
        answer_text: &str,
        stake: Decimal,
    ) -> ArenaResult<(Option<MarketPrediction>, ResolutionOutcome)> {
        let Some(market) = self.catalog.get(market_id).await? else {
            return Ok((None, ResolutionOutcome::Closed));
        };
        if market.status != MarketStatus::Open {
            return Ok((None, ResolutionOutcome::Closed));
        }
        let Criteria::Research { answer_hash } = &market.criteria else {
            return Err(ArenaError::Configuration(format!(
                "market {market_id} is not a knowledge market"
            )));
        };

        let trimmed = answer_text.trim();
        let candidate_hash = hex_sha256(trimmed);
        let is_correct = &candidate_hash == answer_hash;

        self.ledger
            .append(agent_id, -stake, LedgerKind::MarketStake, market_id)
            .await?;

        let prediction_id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();

        if is_correct {
            let payout = market.bounty + stake;
            {
                let conn = self.db.conn.lock().await;
                conn.execute(
                    "INSERT INTO market_predictions
                     (id, market_id, agent_id, outcome_text, stake, status, payout, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, 'WIN', ?6, ?7)",
                    params![
                        prediction_id,
                        market_id,
                        agent_id,
                        trimmed,
                        canonical(stake),
                        canonical(payout),
                        now.to_rfc3339(),
                    ],
                )?;
                conn.execute(
                    "UPDATE markets SET status = 'RESOLVED', outcome = ?1 WHERE market_id = ?2",
                    params![trimmed, market_id],
                )?;
            }
            self.ledger
                .append(agent_id, payout, LedgerKind::ResearchPayout, market_id)
                .await?;

            Ok((
                Some(MarketPrediction {
                    id: prediction_id,
                    market_id: market_id.to_string(),
                    agent_id: agent_id.to_string(),
                    outcome_text: trimmed.to_string(),
                    stake,
                    status: PredictionStatus::Win,
                    payout: Some(payout),
                    created_at: now,
                }),
                ResolutionOutcome::Correct,
            ))
        } else {
            let conn = self.db.conn.lock().await;
            conn.execute(
                "INSERT INTO market_predictions
                 (id, market_id, agent_id, outcome_text, stake, status, payout, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'LOSS', NULL, ?6)",
                params![
                    prediction_id,
                    market_id,
                    agent_id,
                    trimmed,
                    canonical(stake),
                    now.to_rfc3339(),
                ],
            )?;
            drop(conn);

            Ok((
                Some(MarketPrediction {
                    id: prediction_id,
                    market_id: market_id.to_string(),
                    agent_id: agent_id.to_string(),
                    outcome_text: trimmed.to_string(),
                    stake,
                    status: PredictionStatus::Loss,
                    payout: None,
                    created_at: now,
                }),
                ResolutionOutcome::Wrong,
            ))
        }
    }

    pub async fn place_market_bet(
        &self,
        agent_id: &str,
        market_id: &str,
        outcome_text: &str,
        stake: Decimal,
    ) -> ArenaResult<MarketPrediction> {
        let market = self
            .catalog
            .get(market_id)
            .await?
            .ok_or_else(|| ArenaError::MarketNotFound(market_id.to_string()))?;
        if market.status != MarketStatus::Open {
            return Err(ArenaError::MarketNotOpen(market_id.to_string()));
        }

        self.ledger
            .append(agent_id, -stake, LedgerKind::MarketStake, market_id)
            .await?;

        let prediction_id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let conn = self.db.conn.lock().await;
        conn.execute(
            "INSERT INTO market_predictions
             (id, market_id, agent_id, outcome_text, stake, status, payout, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'PENDING', NULL, ?6)",
            params![
                prediction_id,
                market_id,
                agent_id,
                outcome_text,
                canonical(stake),
                now.to_rfc3339(),
            ],
        )?;
        drop(conn);

        Ok(MarketPrediction {
            id: prediction_id,
            market_id: market_id.to_string(),
            agent_id: agent_id.to_string(),
            outcome_text: outcome_text.to_string(),
            stake,
            status: PredictionStatus::Pending,
            payout: None,
            created_at: now,
        })
    }

    /// Deferred sweep: evaluates every OPEN market past its deadline against
    /// a freshly-fetched reading and pays pro-rata winners. `reading` is
    /// supplied by the caller (the scheduler, via the Tool Gateway /
    /// external APIs) so this engine stays free of direct HTTP concerns.
    pub async fn resolve_market_with_reading(
        &self,
        market: &Market,
        reading: f64,
    ) -> ArenaResult<()> {
        let side = match &market.criteria {
            Criteria::Weather {
                operator, threshold, ..
            } => {
                let hit = match operator.as_str() {
                    ">" => reading > *threshold,
                    "<" => reading < *threshold,
                    _ => reading > *threshold,
                };
                if hit { "yes" } else { "no" }
            }
            Criteria::Github { threshold, .. } => {
                if (reading as i64) >= *threshold {
                    "yes"
                } else {
                    "no"
                }
            }
            Criteria::News { .. } => {
                if reading > 0.0 {
                    "yes"
                } else {
                    "no"
                }
            }
            Criteria::Research { .. } => {
                return Err(ArenaError::Configuration(
                    "research markets resolve via submit_research_answer".to_string(),
                ))
            }
        };

        self.settle_deferred(market, side).await
    }

    async fn settle_deferred(&self, market: &Market, winning_side: &str) -> ArenaResult<()> {
        let predictions = {
            let conn = self.db.conn.lock().await;
            let mut stmt = conn.prepare_cached(
                "SELECT id, agent_id, outcome_text, stake FROM market_predictions
                 WHERE market_id = ?1 AND status = 'PENDING'",
            )?;
            let rows = stmt.query_map(params![market.market_id], |row| {
                let id: String = row.get(0)?;
                let agent_id: String = row.get(1)?;
                let outcome_text: String = row.get(2)?;
                let stake_str: String = row.get(3)?;
                Ok((id, agent_id, outcome_text, stake_str))
            })?;
            let mut out = Vec::new();
            for r in rows {
                out.push(r?);
            }
            out
        };

        let winners: Vec<_> = predictions
            .iter()
            .filter(|(_, _, outcome_text, _)| outcome_text.eq_ignore_ascii_case(winning_side))
            .collect();

        let payout_share = if winners.is_empty() {
            Decimal::ZERO
        } else {
            market.bounty / Decimal::from(winners.len() as i64)
        };

        {
            let conn = self.db.conn.lock().await;
            for (id, _agent_id, outcome_text, stake_str) in &predictions {
                let is_winner = outcome_text.eq_ignore_ascii_case(winning_side);
                let status = if is_winner { "WIN" } else { "LOSS" };
                let payout = if is_winner {
                    let stake = Decimal::from_str(stake_str).unwrap_or(Decimal::ZERO);
                    Some(stake + payout_share)
                } else {
                    None
                };
                conn.execute(
                    "UPDATE market_predictions SET status = ?1, payout = ?2 WHERE id = ?3",
                    params![status, payout.map(canonical), id],
                )?;
            }
            conn.execute(
                "UPDATE markets SET status = 'RESOLVED', outcome = ?1 WHERE market_id = ?2",
                params![winning_side, market.market_id],
            )?;
        }

        for (_, agent_id, outcome_text, stake_str) in &predictions {
            if outcome_text.eq_ignore_ascii_case(winning_side) {
                let stake = Decimal::from_str(stake_str).unwrap_or(Decimal::ZERO);
                let payout = stake + payout_share;
                self.ledger
                    .append(agent_id, payout, LedgerKind::ResearchPayout, &market.market_id)
                    .await?;
            }
        }

        Ok(())
    }
}

/// Transaction-scoped counterpart of [`ResolutionEngine::submit_research_answer`],
/// used by the tick engine so the stake, the prediction row, and any payout
/// land in the same commit as the entropy write for that tick.
pub(crate) fn submit_research_answer_in_tx(
    tx: &rusqlite::Transaction,
    agent_id: &str,
    market_id: &str,
    answer_text: &str,
    stake: Decimal,
) -> ArenaResult<(Option<MarketPrediction>, ResolutionOutcome)> {
    let Some(market) = super::catalog::get_in_tx(tx, market_id)? else {
        return Ok((None, ResolutionOutcome::Closed));
    };
    if market.status != MarketStatus::Open {
        return Ok((None, ResolutionOutcome::Closed));
    }
    let Criteria::Research { answer_hash } = &market.criteria else {
        return Err(ArenaError::Configuration(format!(
            "market {market_id} is not a knowledge market"
        )));
    };

    let trimmed = answer_text.trim();
    let candidate_hash = hex_sha256(trimmed);
    let is_correct = &candidate_hash == answer_hash;

    crate::ledger::append_entry_in_tx(tx, agent_id, -stake, LedgerKind::MarketStake, market_id)?;

    let prediction_id = uuid::Uuid::new_v4().to_string();
    let now = Utc::now();

    if is_correct {
        let payout = market.bounty + stake;
        tx.execute(
            "INSERT INTO market_predictions
             (id, market_id, agent_id, outcome_text, stake, status, payout, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'WIN', ?6, ?7)",
            params![
                prediction_id,
                market_id,
                agent_id,
                trimmed,
                canonical(stake),
                canonical(payout),
                now.to_rfc3339(),
            ],
        )?;
        tx.execute(
            "UPDATE markets SET status = 'RESOLVED', outcome = ?1 WHERE market_id = ?2",
            params![trimmed, market_id],
        )?;
        crate::ledger::append_entry_in_tx(tx, agent_id, payout, LedgerKind::ResearchPayout, market_id)?;

        Ok((
            Some(MarketPrediction {
                id: prediction_id,
                market_id: market_id.to_string(),
                agent_id: agent_id.to_string(),
                outcome_text: trimmed.to_string(),
                stake,
                status: PredictionStatus::Win,
                payout: Some(payout),
                created_at: now,
            }),
            ResolutionOutcome::Correct,
        ))
    } else {
        tx.execute(
            "INSERT INTO market_predictions
             (id, market_id, agent_id, outcome_text, stake, status, payout, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'LOSS', NULL, ?6)",
            params![
                prediction_id,
                market_id,
                agent_id,
                trimmed,
                canonical(stake),
                now.to_rfc3339(),
            ],
        )?;

        Ok((
            Some(MarketPrediction {
                id: prediction_id,
                market_id: market_id.to_string(),
                agent_id: agent_id.to_string(),
                outcome_text: trimmed.to_string(),
                stake,
                status: PredictionStatus::Loss,
                payout: None,
                created_at: now,
            }),
            ResolutionOutcome::Wrong,
        ))
    }
}

/// Transaction-scoped counterpart of [`ResolutionEngine::place_market_bet`].
/// Writes the stake entry and the PENDING prediction row atomically, in the
/// caller's own transaction rather than opening one of its own.
pub(crate) fn place_market_bet_in_tx(
    tx: &rusqlite::Transaction,
    agent_id: &str,
    market_id: &str,
    outcome_text: &str,
    stake: Decimal,
) -> ArenaResult<MarketPrediction> {
    let market = super::catalog::get_in_tx(tx, market_id)?
        .ok_or_else(|| ArenaError::MarketNotFound(market_id.to_string()))?;
    if market.status != MarketStatus::Open {
        return Err(ArenaError::MarketNotOpen(market_id.to_string()));
    }

    crate::ledger::append_entry_in_tx(tx, agent_id, -stake, LedgerKind::MarketStake, market_id)?;

    let prediction_id = uuid::Uuid::new_v4().to_string();
    let now = Utc::now();
    tx.execute(
        "INSERT INTO market_predictions
         (id, market_id, agent_id, outcome_text, stake, status, payout, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 'PENDING', NULL, ?6)",
        params![
            prediction_id,
            market_id,
            agent_id,
            outcome_text,
            canonical(stake),
            now.to_rfc3339(),
        ],
    )?;

    Ok(MarketPrediction {
        id: prediction_id,
        market_id: market_id.to_string(),
        agent_id: agent_id.to_string(),
        outcome_text: outcome_text.to_string(),
        stake,
        status: PredictionStatus::Pending,
        payout: None,
        created_at: now,
    })
}

pub fn hex_sha256(s: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::SourceKind;
    use chrono::Duration;

    async fn engine() -> (ResolutionEngine, MarketCatalog, LedgerStore) {
        let db = Db::open_in_memory().unwrap();
        let catalog = MarketCatalog::new(db.clone());
        let ledger = LedgerStore::new(db.clone());
        let engine = ResolutionEngine::new(db, catalog.clone(), ledger.clone());
        (engine, catalog, ledger)
    }

    #[tokio::test]
    async fn correct_answer_pays_bounty_plus_stake() {
        let (engine, catalog, ledger) = engine().await;
        ledger
            .genesis("agent-1", Decimal::from_str("100.00").unwrap(), None)
            .await
            .unwrap();
        let market = catalog
            .create(
                "what is the answer",
                SourceKind::Research,
                Criteria::Research {
                    answer_hash: hex_sha256("42"),
                },
                Decimal::from_str("25.00").unwrap(),
                Utc::now() + Duration::minutes(5),
            )
            .await
            .unwrap();

        let (prediction, outcome) = engine
            .submit_research_answer(
                "agent-1",
                &market.market_id,
                "42",
                Decimal::from_str("1.00").unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(outcome, ResolutionOutcome::Correct);
        assert!(prediction.is_some());
        let balance = ledger.chain_sum("agent-1").await.unwrap();
        assert_eq!(balance, Decimal::from_str("124.00").unwrap());

        let resolved = catalog.get(&market.market_id).await.unwrap().unwrap();
        assert_eq!(resolved.status, MarketStatus::Resolved);
        assert_eq!(resolved.outcome.as_deref(), Some("42"));
    }

    #[tokio::test]
    async fn wrong_answer_only_charges_stake_and_market_stays_open() {
        let (engine, catalog, ledger) = engine().await;
        ledger
            .genesis("agent-1", Decimal::from_str("100.00").unwrap(), None)
            .await
            .unwrap();
        let market = catalog
            .create(
                "what is the answer 2",
                SourceKind::Research,
                Criteria::Research {
                    answer_hash: hex_sha256("17"),
                },
                Decimal::from_str("25.00").unwrap(),
                Utc::now() + Duration::minutes(5),
            )
            .await
            .unwrap();

        let (_, outcome) = engine
            .submit_research_answer(
                "agent-1",
                &market.market_id,
                "19",
                Decimal::from_str("1.00").unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(outcome, ResolutionOutcome::Wrong);
        let balance = ledger.chain_sum("agent-1").await.unwrap();
        assert_eq!(balance, Decimal::from_str("99.00").unwrap());
        let market_after = catalog.get(&market.market_id).await.unwrap().unwrap();
        assert_eq!(market_after.status, MarketStatus::Open);
    }
}
