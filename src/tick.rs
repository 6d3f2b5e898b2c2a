//! The Tick Engine (SPEC_FULL.md §4.J) — the orchestrator tying the ledger,
//! market layer, language-model gateway, tool gateway, stream publisher,
//! and observability envelope together for one agent's one scheduled
//! invocation.

use crate::agent_lock::AgentLocks;
use crate::config::{Config, EnforcementMode};
use crate::error::ArenaResult;
use crate::ledger::{self, AgentStatus, LedgerKind, LedgerStore};
use crate::llm::{parse_tolerant_json, ChatMessage, GenerateOptions, LlmProvider};
use crate::market::{self, Criteria, MarketCatalog, MarketStatus, ResolutionEngine, ResolutionOutcome, SourceKind};
use crate::metrics_sink::MetricsSink;
use crate::observability::{self, MetricsCollector};
use crate::storage::Db;
use crate::stream::{StreamOutcome, StreamPublisher};
use crate::tools::ToolGateway;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

/// What one tick decided to do, gathered during the decision phase (LLM and
/// Tool Gateway calls) before a single transaction applies it. Keeping the
/// decision and the write apart means the only thing inside the tick's
/// transaction is plain synchronous SQL — no suspension points, no risk of
/// the transaction outliving the lock it's scoped to.
enum TickAction {
    Research {
        market_id: String,
        answer: String,
        lookup_fee: Decimal,
    },
    Portfolio {
        bets: Vec<(String, String, Decimal)>,
    },
    Wager {
        amount: Decimal,
    },
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Research,
    Portfolio,
    Wager,
    Heartbeat,
    Liquidation,
    LiquidationObserved,
}

impl TickOutcome {
    fn as_str(self) -> &'static str {
        match self {
            TickOutcome::Research => "RESEARCH",
            TickOutcome::Portfolio => "PORTFOLIO",
            TickOutcome::Wager => "WAGER",
            TickOutcome::Heartbeat => "HEARTBEAT",
            TickOutcome::Liquidation => "LIQUIDATION",
            TickOutcome::LiquidationObserved => "LIQUIDATION_OBSERVED",
        }
    }

    fn stream_code(self) -> Option<StreamOutcome> {
        match self {
            TickOutcome::Research => Some(StreamOutcome::Research),
            TickOutcome::Portfolio => Some(StreamOutcome::Portfolio),
            TickOutcome::Wager => Some(StreamOutcome::Wager),
            TickOutcome::Heartbeat => Some(StreamOutcome::Heartbeat),
            TickOutcome::Liquidation => Some(StreamOutcome::Liquidation),
            TickOutcome::LiquidationObserved => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
    Research,
    Portfolio,
    Wager,
    Wait,
}

pub struct TickEngine {
    ledger: LedgerStore,
    catalog: MarketCatalog,
    resolution: ResolutionEngine,
    llm: Arc<dyn LlmProvider>,
    tools: ToolGateway,
    stream: StreamPublisher,
    metrics_sink: MetricsSink,
    locks: AgentLocks,
    config: Config,
    db: Db,
}

impl TickEngine {
    pub fn new(
        ledger: LedgerStore,
        catalog: MarketCatalog,
        resolution: ResolutionEngine,
        llm: Arc<dyn LlmProvider>,
        tools: ToolGateway,
        stream: StreamPublisher,
        metrics_sink: MetricsSink,
        locks: AgentLocks,
        config: Config,
    ) -> Self {
        let db = ledger.db();
        Self {
            ledger,
            catalog,
            resolution,
            llm,
            tools,
            stream,
            metrics_sink,
            locks,
            config,
            db,
        }
    }

    pub async fn execute_tick(&self, agent_id: &str) -> ArenaResult<TickOutcome> {
        let _guard = self.locks.acquire(agent_id).await;
        let tick_id = uuid::Uuid::new_v4().to_string();

        let (outcome, record) = observability::observe(
            agent_id,
            &tick_id,
            self.config.enforcement_mode,
            |collector| self.run_tick(agent_id, &tick_id, collector),
        )
        .await;
        let outcome = outcome?;

        let _ = self.metrics_sink.record(&record).await;
        if let Some(code) = outcome.stream_code() {
            self.stream.publish_tick_event(agent_id, code, None);
        }
        info!(
            agent = agent_id,
            tick = &tick_id[..8],
            outcome = outcome.as_str(),
            mode = ?self.config.enforcement_mode,
            "TICK"
        );
        Ok(outcome)
    }

    /// Step 13: a failure anywhere past agent-load must still produce an
    /// accounted outcome. `enforce` mode opens a fresh transaction — the
    /// failed tick's own transaction never reached its commit and rolled
    /// back on drop, so this cannot stack on top of a partial write — and
    /// writes a HEARTBEAT (or LIQUIDATION, if the agent is insolvent)
    /// referencing the original tick with an `:ERROR:` suffix; `observe`
    /// mode only records the failure on the metrics collector.
    async fn run_error_boundary(
        &self,
        agent_id: &str,
        tick_id: &str,
        error: &crate::error::ArenaError,
        collector: &MetricsCollector,
    ) -> ArenaResult<TickOutcome> {
        let error_type = error_type_name(error);
        tracing::warn!(agent = agent_id, tick = &tick_id[..8], error = %error, "tick failed, entering error boundary");

        collector.set_extra("error_type", serde_json::json!(error_type));
        collector.set_extra(
            "enforcement_noop",
            serde_json::json!(!self.config.enforcement_mode.is_enforce()),
        );

        if !self.config.enforcement_mode.is_enforce() {
            return Ok(TickOutcome::Heartbeat);
        }

        let reference = format!("{tick_id}:ERROR:{error_type}");
        let mut conn = self.db.conn.lock().await;
        let tx = conn.transaction()?;

        let Some(agent) = ledger::get_agent_in_tx(&tx, agent_id)? else {
            return Ok(TickOutcome::Heartbeat);
        };
        if agent.status != AgentStatus::Alive {
            return Ok(TickOutcome::Heartbeat);
        }

        let balance = ledger::chain_sum_in_conn(&tx, agent_id)?;
        let idle_streak = ledger::idle_streak_in_tx(&tx, agent_id)?;
        let economics = &self.config.economics;
        let tiers = Decimal::from(idle_streak / economics.entropy_penalty_interval.max(1));
        let fee = (economics.entropy_base + tiers * economics.entropy_penalty)
            .min(economics.entropy_max_fee);

        if balance < fee {
            ledger::liquidate_in_tx(&tx, agent_id, balance)?;
            tx.commit()?;
            collector.set_outcome(TickOutcome::Liquidation.as_str(), 0.0);
            Ok(TickOutcome::Liquidation)
        } else {
            ledger::append_entry_in_tx(&tx, agent_id, -fee, LedgerKind::Heartbeat, &reference)?;
            let balance_after = ledger::reconcile_in_tx(&tx, agent_id)?;
            tx.commit()?;
            collector.set_outcome(TickOutcome::Heartbeat.as_str(), to_f64(balance_after));
            Ok(TickOutcome::Heartbeat)
        }
    }

    async fn run_tick(
        &self,
        agent_id: &str,
        tick_id: &str,
        collector: Arc<MetricsCollector>,
    ) -> ArenaResult<TickOutcome> {
        match self.run_tick_body(agent_id, tick_id, collector.clone()).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => self.run_error_boundary(agent_id, tick_id, &e, &collector).await,
        }
    }

    async fn run_tick_body(
        &self,
        agent_id: &str,
        _tick_id: &str,
        collector: Arc<MetricsCollector>,
    ) -> ArenaResult<TickOutcome> {
        let Some(agent) = self.ledger.get_agent(agent_id).await? else {
            collector.set_outcome(TickOutcome::Heartbeat.as_str(), 0.0);
            return Ok(TickOutcome::Heartbeat);
        };
        if agent.status != AgentStatus::Alive {
            collector.set_outcome(TickOutcome::Heartbeat.as_str(), 0.0);
            return Ok(TickOutcome::Heartbeat);
        }

        let balance = self.ledger.chain_sum(agent_id).await?;
        let idle_streak = self.ledger.idle_streak(agent_id).await?;
        let economics = &self.config.economics;

        let tiers = Decimal::from(idle_streak / economics.entropy_penalty_interval.max(1));
        let fee = (economics.entropy_base + tiers * economics.entropy_penalty)
            .min(economics.entropy_max_fee);

        collector.set_idle(idle_streak, 0.0);

        if balance < fee {
            return self
                .handle_insolvency(agent_id, balance, fee, &collector)
                .await;
        }

        let active_markets = self.catalog.list_active_for_agent(agent_id, 20).await?;
        let research_markets: Vec<_> = active_markets
            .iter()
            .filter(|m| m.source_kind == SourceKind::Research)
            .cloned()
            .collect();
        let portfolio_markets: Vec<_> = active_markets
            .iter()
            .filter(|m| m.source_kind != SourceKind::Research)
            .cloned()
            .collect();

        // Decision phase: every LLM / Tool Gateway call a tick can make
        // happens here, before any transaction is open. What comes out is a
        // plain description of the write this tick wants to make.
        let action = self
            .decide_action(fee, balance, idle_streak, &research_markets, &portfolio_markets, &collector)
            .await?;

        // Write phase: steps 7-11 collapse into one transaction, committed
        // exactly once. If anything in here fails, the transaction rolls
        // back on drop and the step-13 error boundary takes over with a
        // clean slate — no partial stake or payout left behind.
        let (final_outcome, balance_after) = self.commit_tick(agent_id, fee, action, &collector).await?;

        collector.set_outcome(final_outcome.as_str(), to_f64(balance_after));
        Ok(final_outcome)
    }

    /// Runs the tick's single write transaction: whichever action the
    /// decision phase chose, plus the entropy finalization (SPEC_FULL.md
    /// §4.J steps 7-11). Mirrors [`crate::ledger::LedgerStore::append_many`]'s
    /// shape but spans the market-layer writes too, since a research payout
    /// or a portfolio stake must land in the same commit as the HEARTBEAT
    /// that closes out the tick.
    async fn commit_tick(
        &self,
        agent_id: &str,
        fee: Decimal,
        action: TickAction,
        collector: &MetricsCollector,
    ) -> ArenaResult<(TickOutcome, Decimal)> {
        let mut conn = self.db.conn.lock().await;
        let tx = conn.transaction()?;

        let mut outcome = None;

        match action {
            TickAction::Research { market_id, answer, lookup_fee } => {
                if lookup_fee > Decimal::ZERO {
                    ledger::append_entry_in_tx(
                        &tx,
                        agent_id,
                        -lookup_fee,
                        LedgerKind::ResearchLookupFee,
                        &market_id,
                    )?;
                }
                let (_, research_outcome) = market::submit_research_answer_in_tx(
                    &tx,
                    agent_id,
                    &market_id,
                    &answer,
                    self.config.economics.research_stake,
                )?;
                if !matches!(research_outcome, ResolutionOutcome::Closed) {
                    outcome = Some(TickOutcome::Research);
                }
            }
            TickAction::Portfolio { bets } => {
                let mut placed = 0u32;
                for (market_id, outcome_text, stake) in &bets {
                    if market::place_market_bet_in_tx(&tx, agent_id, market_id, outcome_text, *stake).is_ok() {
                        placed += 1;
                    }
                }
                if placed > 0 {
                    outcome = Some(TickOutcome::Portfolio);
                }
            }
            TickAction::Wager { amount } => {
                ledger::append_entry_in_tx(&tx, agent_id, -amount, LedgerKind::Wager, "standalone-wager")?;
                outcome = Some(TickOutcome::Wager);
            }
            TickAction::None => {}
        }

        let final_outcome = if self.config.enforcement_mode.is_enforce() {
            ledger::append_entry_in_tx(&tx, agent_id, -fee, LedgerKind::Heartbeat, "entropy")?;
            ledger::reconcile_in_tx(&tx, agent_id)?;
            outcome.unwrap_or(TickOutcome::Heartbeat)
        } else {
            collector.record_phantom_enforcement(to_f64(fee), false);
            ledger::reconcile_in_tx(&tx, agent_id)?;
            outcome.unwrap_or(TickOutcome::Heartbeat)
        };

        let balance_after = ledger::chain_sum_in_conn(&tx, agent_id)?;
        tx.commit()?;
        Ok((final_outcome, balance_after))
    }

    async fn handle_insolvency(
        &self,
        agent_id: &str,
        balance: Decimal,
        fee: Decimal,
        collector: &MetricsCollector,
    ) -> ArenaResult<TickOutcome> {
        if self.config.enforcement_mode.is_enforce() {
            self.ledger.liquidate(agent_id, balance).await?;
            collector.set_outcome(TickOutcome::Liquidation.as_str(), 0.0);
            Ok(TickOutcome::Liquidation)
        } else {
            collector.record_phantom_enforcement(to_f64(fee), true);
            collector.set_outcome(
                TickOutcome::LiquidationObserved.as_str(),
                to_f64(balance),
            );
            Ok(TickOutcome::LiquidationObserved)
        }
    }

    async fn decide_strategy(
        &self,
        idle_streak: u32,
        fee: Decimal,
        research_available: bool,
        portfolio_available: bool,
    ) -> Strategy {
        let mut prompt = format!(
            "Idle Streak: {idle_streak}. Entropy fee this tick: {fee}. "
        );
        if research_available {
            prompt.push_str("research markets are available. ");
        }
        if portfolio_available {
            prompt.push_str("portfolio markets are available. ");
        }
        prompt.push_str("Choose an action: RESEARCH, PORTFOLIO, WAGER, or WAIT.");

        let messages = vec![ChatMessage::system(
            "You manage an autonomous trading agent's tick-by-tick strategy.",
        ), ChatMessage::user(prompt)];
        let opts = GenerateOptions::json(150);

        let content = self.llm.generate(&messages, &opts).await.ok().flatten();
        let action = content
            .as_deref()
            .and_then(parse_tolerant_json)
            .and_then(|v| v.get("action").and_then(|a| a.as_str()).map(|s| s.to_string()));

        match action.as_deref() {
            Some("RESEARCH") if research_available => Strategy::Research,
            Some("PORTFOLIO") if portfolio_available => Strategy::Portfolio,
            Some("WAGER") => Strategy::Wager,
            Some("WAIT") => Strategy::Wait,
            _ => {
                // Fallback priority chain: RESEARCH -> PORTFOLIO -> WAGER -> WAIT.
                if research_available {
                    Strategy::Research
                } else if portfolio_available {
                    Strategy::Portfolio
                } else {
                    Strategy::Wager
                }
            }
        }
    }

    /// Runs every LLM / Tool Gateway call a tick might make (steps 6-9) and
    /// reduces the outcome to a single planned write, priority-chained
    /// RESEARCH -> PORTFOLIO -> WAGER exactly as the strategy decision
    /// intends. No ledger or market write happens here.
    async fn decide_action(
        &self,
        fee: Decimal,
        balance: Decimal,
        idle_streak: u32,
        research_markets: &[crate::market::Market],
        portfolio_markets: &[crate::market::Market],
        collector: &MetricsCollector,
    ) -> ArenaResult<TickAction> {
        let strategy = self
            .decide_strategy(idle_streak, fee, !research_markets.is_empty(), !portfolio_markets.is_empty())
            .await;

        if matches!(strategy, Strategy::Research) && !research_markets.is_empty() {
            if let Some(action) = self.plan_research(&research_markets[0], collector).await {
                return Ok(action);
            }
        }

        if matches!(strategy, Strategy::Portfolio | Strategy::Research) && !portfolio_markets.is_empty() {
            if let Some(action) = self.plan_portfolio(balance, portfolio_markets, collector).await {
                return Ok(action);
            }
        }

        if matches!(strategy, Strategy::Wager) {
            let post_fee_balance = balance - fee;
            if post_fee_balance >= self.config.economics.single_wager_floor {
                if let Some(action) = self.plan_wager(post_fee_balance, collector).await {
                    return Ok(action);
                }
            }
        }

        Ok(TickAction::None)
    }

    async fn plan_research(
        &self,
        market: &crate::market::Market,
        collector: &MetricsCollector,
    ) -> Option<TickAction> {
        let prompt = format!(
            "Research Question: {}\nRespond with your best answer and a confidence from 0 to 1.",
            market.description
        );
        let messages = vec![ChatMessage::user(prompt)];
        let opts = GenerateOptions::json(150);
        let content = self.llm.generate(&messages, &opts).await.ok().flatten();
        let parsed = content.as_deref().and_then(parse_tolerant_json);

        let mut answer = parsed
            .as_ref()
            .and_then(|v| v.get("answer").and_then(|a| a.as_str()).map(|s| s.to_string()));
        let confidence = parsed
            .as_ref()
            .and_then(|v| v.get("confidence").and_then(|c| c.as_f64()))
            .unwrap_or(0.0);

        collector.set_decisions(1.0, confidence);

        let mut lookup_fee = Decimal::ZERO;
        if confidence < 0.5 {
            if let Criteria::Research { .. } = &market.criteria {
                let title = extract_title(&market.description);
                if let Ok(Some(summary)) = self.tools.knowledge_lookup(&title).await {
                    lookup_fee = self.config.economics.research_lookup_fee;
                    answer = Some(summary.id.to_string());
                }
            }
        }

        let answer = answer?;

        // Re-check before committing to this branch so a market that closed
        // between the read at the top of the tick and now still falls back
        // to the portfolio attempt within the same tick (the commit phase
        // re-checks again regardless, as the authoritative guard).
        match self.catalog.get(&market.market_id).await {
            Ok(Some(current)) if current.status == MarketStatus::Open => {}
            _ => return None,
        }

        Some(TickAction::Research {
            market_id: market.market_id.clone(),
            answer,
            lookup_fee,
        })
    }

    async fn plan_portfolio(
        &self,
        balance: Decimal,
        markets: &[crate::market::Market],
        collector: &MetricsCollector,
    ) -> Option<TickAction> {
        let economics = &self.config.economics;
        let listing: String = markets
            .iter()
            .take(economics.portfolio_max_bets as usize * 3)
            .map(|m| format!("- {} ({})", m.market_id, m.description))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Available Markets:\n{listing}\nPropose up to {} bets as JSON with market_id, outcome, confidence, reasoning.",
            economics.portfolio_max_bets
        );
        let messages = vec![ChatMessage::user(prompt)];
        let opts = GenerateOptions::json(300);
        let content = self.llm.generate(&messages, &opts).await.ok().flatten();
        let parsed = content.as_deref().and_then(parse_tolerant_json)?;
        let bets = parsed.get("bets").and_then(|b| b.as_array())?;

        let mut chosen = Vec::new();
        let mut aggregate_stake = Decimal::ZERO;
        let mut seen_markets = std::collections::HashSet::new();
        let mut confidence_sum = 0.0;

        for bet in bets.iter().take(economics.portfolio_max_bets as usize) {
            let Some(market_id) = bet.get("market_id").and_then(|v| v.as_str()) else {
                continue;
            };
            let Some(outcome) = bet.get("outcome").and_then(|v| v.as_str()) else {
                continue;
            };
            let confidence = bet.get("confidence").and_then(|v| v.as_f64()).unwrap_or(0.0);
            let confidence_floor: f64 = economics.portfolio_confidence_floor.to_string().parse().unwrap_or(0.55);
            if confidence < confidence_floor {
                continue;
            }
            if !seen_markets.insert(market_id.to_string()) {
                continue;
            }
            if !markets.iter().any(|m| m.market_id == market_id) {
                continue;
            }

            let confidence_dec = Decimal::from_str(&format!("{:.4}", confidence)).unwrap_or(Decimal::ZERO);
            let stake = (balance * confidence_dec * economics.portfolio_stake_coeff)
                .round_dp(2);
            if stake <= Decimal::ZERO {
                continue;
            }
            if aggregate_stake + stake > balance * economics.portfolio_aggregate_cap {
                continue;
            }

            aggregate_stake += stake;
            confidence_sum += confidence;
            chosen.push((market_id.to_string(), outcome.to_string(), stake));
        }

        if chosen.is_empty() {
            return None;
        }

        collector.set_decisions(
            chosen.len() as f64 / economics.portfolio_max_bets.max(1) as f64,
            confidence_sum / chosen.len() as f64,
        );

        Some(TickAction::Portfolio { bets: chosen })
    }

    async fn plan_wager(&self, available_balance: Decimal, collector: &MetricsCollector) -> Option<TickAction> {
        let messages = vec![ChatMessage::user(
            "No markets are currently available. Propose a standalone wager outcome and confidence.".to_string(),
        )];
        let opts = GenerateOptions::json(100);
        let content = self.llm.generate(&messages, &opts).await.ok().flatten();
        let parsed = content.as_deref().and_then(parse_tolerant_json)?;
        let confidence = parsed.get("confidence").and_then(|v| v.as_f64()).unwrap_or(0.0);
        collector.set_decisions(1.0, confidence);

        let fraction = self.config.economics.single_wager_fraction;
        let wager = (available_balance * fraction).round_dp(2);
        if wager <= Decimal::ZERO {
            return None;
        }

        Some(TickAction::Wager { amount: wager })
    }
}

fn error_type_name(error: &crate::error::ArenaError) -> &'static str {
    use crate::error::ArenaError;
    match error {
        ArenaError::AgentNotFound(_) => "AgentNotFound",
        ArenaError::AgentNotAlive(_) => "AgentNotAlive",
        ArenaError::SequenceConflict { .. } => "SequenceConflict",
        ArenaError::ChainIntegrity { .. } => "ChainIntegrity",
        ArenaError::MarketNotFound(_) => "MarketNotFound",
        ArenaError::MarketNotOpen(_) => "MarketNotOpen",
        ArenaError::Configuration(_) => "Configuration",
        ArenaError::ExternalPermanent(_) => "ExternalPermanent",
        ArenaError::ExternalTransient(_) => "ExternalTransient",
        ArenaError::NoContent => "NoContent",
        ArenaError::Storage(_) => "Storage",
        ArenaError::Http(_) => "Http",
        ArenaError::Serde(_) => "Serde",
    }
}

fn to_f64(d: Decimal) -> f64 {
    d.to_string().parse().unwrap_or(0.0)
}

fn extract_title(description: &str) -> String {
    description
        .rsplit('"')
        .nth(1)
        .unwrap_or(description)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Db;

    fn test_config(mode: EnforcementMode) -> Config {
        let mut config = Config::from_env();
        config.enforcement_mode = mode;
        config
    }

    fn build_engine(db: Db, mode: EnforcementMode) -> TickEngine {
        let ledger = LedgerStore::new(db.clone());
        let catalog = MarketCatalog::new(db.clone());
        let resolution = ResolutionEngine::new(db.clone(), catalog.clone(), ledger.clone());
        let llm: Arc<dyn LlmProvider> = Arc::new(crate::llm::MockProvider::new());
        TickEngine::new(
            ledger,
            catalog,
            resolution,
            llm,
            ToolGateway::new(),
            StreamPublisher::default(),
            MetricsSink::new(db),
            AgentLocks::new(),
            test_config(mode),
        )
    }

    #[tokio::test]
    async fn idle_agent_pays_base_fee_in_enforce_mode() {
        let db = Db::open_in_memory().unwrap();
        let engine = build_engine(db.clone(), EnforcementMode::Enforce);
        let ledger = LedgerStore::new(db);
        ledger
            .genesis("agent-1", Decimal::from_str("100.00").unwrap(), None)
            .await
            .unwrap();

        let outcome = engine.execute_tick("agent-1").await.unwrap();
        assert_eq!(outcome, TickOutcome::Heartbeat);

        let balance = ledger.chain_sum("agent-1").await.unwrap();
        assert_eq!(balance, Decimal::from_str("99.50").unwrap());
    }

    #[tokio::test]
    async fn insolvent_agent_liquidates_in_enforce_mode() {
        let db = Db::open_in_memory().unwrap();
        let engine = build_engine(db.clone(), EnforcementMode::Enforce);
        let ledger = LedgerStore::new(db);
        ledger
            .genesis("agent-1", Decimal::from_str("0.20").unwrap(), None)
            .await
            .unwrap();

        let outcome = engine.execute_tick("agent-1").await.unwrap();
        assert_eq!(outcome, TickOutcome::Liquidation);

        let agent = ledger.get_agent("agent-1").await.unwrap().unwrap();
        assert_eq!(agent.status, AgentStatus::Dead);
    }

    #[tokio::test]
    async fn insolvent_agent_stays_alive_in_observe_mode() {
        let db = Db::open_in_memory().unwrap();
        let engine = build_engine(db.clone(), EnforcementMode::Observe);
        let ledger = LedgerStore::new(db);
        ledger
            .genesis("agent-1", Decimal::from_str("0.20").unwrap(), None)
            .await
            .unwrap();

        let outcome = engine.execute_tick("agent-1").await.unwrap();
        assert_eq!(outcome, TickOutcome::LiquidationObserved);

        let agent = ledger.get_agent("agent-1").await.unwrap().unwrap();
        assert_eq!(agent.status, AgentStatus::Alive);
        let chain = ledger.load_chain("agent-1").await.unwrap();
        assert_eq!(chain.len(), 1);
    }

    #[tokio::test]
    async fn observe_mode_writes_no_heartbeat_entropy_entry() {
        let db = Db::open_in_memory().unwrap();
        let engine = build_engine(db.clone(), EnforcementMode::Observe);
        let ledger = LedgerStore::new(db);
        ledger
            .genesis("agent-1", Decimal::from_str("100.00").unwrap(), None)
            .await
            .unwrap();

        engine.execute_tick("agent-1").await.unwrap();

        let chain = ledger.load_chain("agent-1").await.unwrap();
        assert_eq!(chain.len(), 1, "no entropy heartbeat written in observe mode");
    }

    #[tokio::test]
    async fn missing_agent_returns_heartbeat_without_writes() {
        let db = Db::open_in_memory().unwrap();
        let engine = build_engine(db, EnforcementMode::Enforce);
        let outcome = engine.execute_tick("ghost").await.unwrap();
        assert_eq!(outcome, TickOutcome::Heartbeat);
    }

    #[tokio::test]
    async fn sequence_conflict_error_boundary_writes_tagged_heartbeat() {
        let db = Db::open_in_memory().unwrap();
        let engine = build_engine(db.clone(), EnforcementMode::Enforce);
        let ledger = LedgerStore::new(db);
        ledger
            .genesis("agent-1", Decimal::from_str("100.00").unwrap(), None)
            .await
            .unwrap();

        let tick_id = "11111111-1111-1111-1111-111111111111";
        let error = crate::error::ArenaError::SequenceConflict {
            agent_id: "agent-1".to_string(),
            sequence: 1,
        };
        let collector = Arc::new(MetricsCollector::new("agent-1", tick_id, EnforcementMode::Enforce));

        let outcome = engine
            .run_error_boundary("agent-1", tick_id, &error, &collector)
            .await
            .unwrap();
        assert_eq!(outcome, TickOutcome::Heartbeat);

        let chain = ledger.load_chain("agent-1").await.unwrap();
        assert_eq!(chain.len(), 2, "error boundary must write exactly one recovery entry");
        let recovery = &chain[1];
        assert_eq!(recovery.reference, format!("{tick_id}:ERROR:SequenceConflict"));
        assert_eq!(recovery.amount, -Decimal::from_str("0.50").unwrap());

        let balance = ledger.chain_sum("agent-1").await.unwrap();
        assert_eq!(balance, Decimal::from_str("99.50").unwrap());
    }

    #[tokio::test]
    async fn sequence_conflict_error_boundary_is_metrics_only_in_observe_mode() {
        let db = Db::open_in_memory().unwrap();
        let engine = build_engine(db.clone(), EnforcementMode::Observe);
        let ledger = LedgerStore::new(db);
        ledger
            .genesis("agent-1", Decimal::from_str("100.00").unwrap(), None)
            .await
            .unwrap();

        let tick_id = "22222222-2222-2222-2222-222222222222";
        let error = crate::error::ArenaError::SequenceConflict {
            agent_id: "agent-1".to_string(),
            sequence: 1,
        };
        let collector = Arc::new(MetricsCollector::new("agent-1", tick_id, EnforcementMode::Observe));

        let outcome = engine
            .run_error_boundary("agent-1", tick_id, &error, &collector)
            .await
            .unwrap();
        assert_eq!(outcome, TickOutcome::Heartbeat);

        let chain = ledger.load_chain("agent-1").await.unwrap();
        assert_eq!(chain.len(), 1, "observe mode must not write on the error boundary");

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.extra.get("error_type").unwrap(), "SequenceConflict");
        assert_eq!(snapshot.extra.get("enforcement_noop").unwrap(), true);
    }
}
