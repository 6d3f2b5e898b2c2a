//! Sidecar observability store (SPEC_FULL.md §3, §4.B).
//!
//! Append-only, best-effort: a failure here must never fail the tick that
//! produced the record. Ported from `AgentMetrics` in the original ClawX
//! `metrics.py`, flattened to a JSON payload column the way the teacher
//! stores its own free-form activity rows in `vault_activity`.

use crate::error::ArenaResult;
use crate::storage::Db;
use chrono::Utc;
use rusqlite::params;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MetricsRecord {
    pub agent_id: String,
    pub tick_id: String,
    pub timestamp: String,

    pub token_cost: f64,
    pub tokens_used: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub wasted_tokens_pct: f64,

    pub idle_time_pct: f64,
    pub idle_streak: u32,

    pub decision_density: f64,
    pub confidence_avg: f64,

    pub roi_trend: f64,
    pub cost_per_output: f64,
    pub cost_per_quality_point: f64,

    pub human_interventions: u32,
    pub decisions_avoided: u32,
    pub context_switches_prevented: u32,

    pub enforcement_mode: String,
    pub phantom_entropy_fee: f64,
    pub would_have_been_liquidated: bool,

    pub tick_outcome: String,
    pub balance_snapshot: f64,

    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Clone)]
pub struct MetricsSink {
    db: Db,
}

impl MetricsSink {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub async fn record(&self, record: &MetricsRecord) -> ArenaResult<()> {
        let id = uuid::Uuid::new_v4().to_string();
        let payload = serde_json::to_string(record)?;
        let conn = self.db.conn.lock().await;
        conn.execute(
            "INSERT INTO metrics_records (id, agent_id, tick_id, timestamp, payload)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, record.agent_id, record.tick_id, record.timestamp, payload],
        )?;
        Ok(())
    }

    pub async fn recent(&self, limit: usize) -> ArenaResult<Vec<MetricsRecord>> {
        let limit = limit.clamp(1, 1000) as i64;
        let conn = self.db.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT payload FROM metrics_records ORDER BY timestamp DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            let payload = row?;
            if let Ok(rec) = serde_json::from_str(&payload) {
                out.push(rec);
            }
        }
        Ok(out)
    }

    pub async fn for_tick(&self, tick_id: &str) -> ArenaResult<Vec<MetricsRecord>> {
        let conn = self.db.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT payload FROM metrics_records WHERE tick_id = ?1 ORDER BY timestamp ASC",
        )?;
        let rows = stmt.query_map(params![tick_id], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            let payload = row?;
            if let Ok(rec) = serde_json::from_str(&payload) {
                out.push(rec);
            }
        }
        Ok(out)
    }
}

pub fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recent_returns_most_recently_written_first() {
        let db = Db::open_in_memory().unwrap();
        let sink = MetricsSink::new(db);
        let mut rec = MetricsRecord {
            agent_id: "a".into(),
            tick_id: "t1".into(),
            timestamp: now_iso(),
            ..Default::default()
        };
        sink.record(&rec).await.unwrap();
        rec.tick_id = "t2".into();
        rec.timestamp = now_iso();
        sink.record(&rec).await.unwrap();

        let all = sink.recent(10).await.unwrap();
        assert_eq!(all.len(), 2);
    }
}
