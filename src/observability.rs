//! Context-propagating metrics collector (SPEC_FULL.md §4.I).
//!
//! Mirrors the original ClawX `@observe` decorator and `MetricsCollector`:
//! a fluent builder activated for the span of one tick via a scoped
//! context value. `tokio::task_local!` is the Rust analogue of Python's
//! `contextvars.ContextVar` — it follows the current task across `.await`
//! points without leaking into unrelated concurrent tasks.

use crate::config::EnforcementMode;
use crate::metrics_sink::{now_iso, MetricsRecord};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

tokio::task_local! {
    static CURRENT_COLLECTOR: Arc<MetricsCollector>;
}

/// Builds one [`MetricsRecord`] across the lifetime of a tick.
pub struct MetricsCollector {
    inner: Mutex<MetricsRecord>,
    started: Instant,
}

impl MetricsCollector {
    pub fn new(agent_id: &str, tick_id: &str, enforcement_mode: EnforcementMode) -> Self {
        let mode = match enforcement_mode {
            EnforcementMode::Observe => "observe",
            EnforcementMode::Enforce => "enforce",
        };
        Self {
            inner: Mutex::new(MetricsRecord {
                agent_id: agent_id.to_string(),
                tick_id: tick_id.to_string(),
                timestamp: now_iso(),
                enforcement_mode: mode.to_string(),
                ..Default::default()
            }),
            started: Instant::now(),
        }
    }

    pub fn set_input_tokens(&self, n: u64) {
        let mut m = self.inner.lock();
        m.input_tokens = n;
        m.tokens_used = m.input_tokens + m.output_tokens;
    }

    pub fn set_output_tokens(&self, n: u64) {
        let mut m = self.inner.lock();
        m.output_tokens = n;
        m.tokens_used = m.input_tokens + m.output_tokens;
    }

    /// Accumulates token usage and cost. Called once per language-model call
    /// within a tick, so repeated strategy/research/portfolio calls all add up.
    pub fn increment_tokens(&self, input_tokens: u64, output_tokens: u64, cost: f64) {
        let mut m = self.inner.lock();
        m.input_tokens += input_tokens;
        m.output_tokens += output_tokens;
        m.tokens_used = m.input_tokens + m.output_tokens;
        m.token_cost += cost;
    }

    pub fn set_wasted_tokens(&self, pct: f64) {
        self.inner.lock().wasted_tokens_pct = pct.clamp(0.0, 100.0);
    }

    pub fn set_idle(&self, idle_streak: u32, idle_time_pct: f64) {
        let mut m = self.inner.lock();
        m.idle_streak = idle_streak;
        m.idle_time_pct = idle_time_pct.clamp(0.0, 100.0);
    }

    pub fn set_decisions(&self, density: f64, confidence_avg: f64) {
        let mut m = self.inner.lock();
        m.decision_density = density;
        m.confidence_avg = confidence_avg;
    }

    pub fn record_phantom_enforcement(&self, fee: f64, would_liquidate: bool) {
        let mut m = self.inner.lock();
        m.phantom_entropy_fee = fee;
        m.would_have_been_liquidated = would_liquidate;
    }

    pub fn set_outcome(&self, outcome: &str, balance: f64) {
        let mut m = self.inner.lock();
        m.tick_outcome = outcome.to_string();
        m.balance_snapshot = balance;
    }

    pub fn set_extra(&self, key: &str, value: serde_json::Value) {
        self.inner.lock().extra.insert(key.to_string(), value);
    }

    pub fn snapshot(&self) -> MetricsRecord {
        self.inner.lock().clone()
    }

    /// Finalizes elapsed wall-clock time, logs one structured line, and
    /// returns the record. Matches `MetricsCollector.emit()`'s log shape.
    pub fn emit(&self) -> MetricsRecord {
        let elapsed = self.started.elapsed().as_secs_f64();
        let mut m = self.inner.lock();
        m.extra
            .insert("elapsed_s".to_string(), serde_json::json!((elapsed * 1000.0).round() / 1000.0));
        info!(
            agent = %m.agent_id,
            tick = %short(&m.tick_id),
            mode = %m.enforcement_mode,
            outcome = %m.tick_outcome,
            phantom_fee = m.phantom_entropy_fee,
            would_liquidate = m.would_have_been_liquidated,
            idle = m.idle_streak,
            density = m.decision_density,
            "METRICS"
        );
        m.clone()
    }
}

fn short(s: &str) -> String {
    s.chars().take(8).collect()
}

/// Returns the collector active in the current task, if any.
pub fn current_collector() -> Option<Arc<MetricsCollector>> {
    CURRENT_COLLECTOR.try_with(|c| c.clone()).ok()
}

/// Runs `body` with a fresh collector activated for the task, emitting the
/// record on every exit path (success or error) the way the original
/// `@observe` decorator's `finally` block does.
pub async fn observe<F, Fut, T>(
    agent_id: &str,
    tick_id: &str,
    enforcement_mode: EnforcementMode,
    body: F,
) -> (T, MetricsRecord)
where
    F: FnOnce(Arc<MetricsCollector>) -> Fut,
    Fut: Future<Output = T>,
{
    let collector = Arc::new(MetricsCollector::new(agent_id, tick_id, enforcement_mode));
    let collector_for_body = collector.clone();
    let result = CURRENT_COLLECTOR
        .scope(collector.clone(), async move { body(collector_for_body).await })
        .await;
    let record = collector.emit();
    (result, record)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn collector_propagates_through_await_points() {
        let (_, record) = observe("agent-1", "tick-1", EnforcementMode::Observe, |_| async {
            let inner = current_collector().expect("collector active inside observe");
            inner.increment_tokens(10, 20, 0.001);
            tokio::task::yield_now().await;
            inner.set_outcome("HEARTBEAT", 99.5);
        })
        .await;

        assert_eq!(record.tokens_used, 30);
        assert_eq!(record.tick_outcome, "HEARTBEAT");
    }

    #[tokio::test]
    async fn no_collector_outside_observe_scope() {
        assert!(current_collector().is_none());
    }
}
