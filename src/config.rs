//! Environment-driven configuration.
//!
//! Follows the `env::var(...).ok().and_then(...).filter(...).unwrap_or(default)`
//! idiom the teacher uses in `main.rs`'s `DataSourceKillSwitch::new` for every
//! tunable, so a missing or malformed env var never panics at startup.

use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnforcementMode {
    Observe,
    Enforce,
}

impl EnforcementMode {
    pub fn is_enforce(self) -> bool {
        matches!(self, EnforcementMode::Enforce)
    }
}

fn env_decimal(var: &str, default: Decimal) -> Decimal {
    env::var(var)
        .ok()
        .and_then(|v| Decimal::from_str(&v).ok())
        .filter(|v| !v.is_sign_negative())
        .unwrap_or(default)
}

fn env_u32(var: &str, default: u32) -> u32 {
    env::var(var)
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .filter(|&v| v > 0)
        .unwrap_or(default)
}

fn env_u64(var: &str, default: u64) -> u64 {
    env::var(var)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|&v| v > 0)
        .unwrap_or(default)
}

/// Tunable tick-economics constants (SPEC_FULL.md §4.J).
#[derive(Debug, Clone)]
pub struct TickEconomics {
    pub entropy_base: Decimal,
    pub entropy_penalty: Decimal,
    pub entropy_max_fee: Decimal,
    pub entropy_penalty_interval: u32,
    pub research_stake: Decimal,
    pub research_lookup_fee: Decimal,
    pub portfolio_max_bets: u32,
    pub portfolio_confidence_floor: Decimal,
    pub portfolio_stake_coeff: Decimal,
    pub portfolio_aggregate_cap: Decimal,
    pub single_wager_floor: Decimal,
    pub single_wager_fraction: Decimal,
}

impl Default for TickEconomics {
    fn default() -> Self {
        Self {
            entropy_base: dec(0.50),
            entropy_penalty: dec(0.25),
            entropy_max_fee: dec(3.00),
            entropy_penalty_interval: 5,
            research_stake: dec(1.00),
            research_lookup_fee: dec(0.50),
            portfolio_max_bets: 3,
            portfolio_confidence_floor: dec(0.55),
            portfolio_stake_coeff: dec(0.10),
            portfolio_aggregate_cap: dec(0.30),
            single_wager_floor: dec(0.50),
            single_wager_fraction: dec(0.10),
        }
    }
}

impl TickEconomics {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            entropy_base: env_decimal("ENTROPY_BASE", defaults.entropy_base),
            entropy_penalty: env_decimal("ENTROPY_PENALTY", defaults.entropy_penalty),
            entropy_max_fee: env_decimal("ENTROPY_MAX_FEE", defaults.entropy_max_fee),
            entropy_penalty_interval: env_u32(
                "ENTROPY_PENALTY_INTERVAL",
                defaults.entropy_penalty_interval,
            ),
            research_stake: env_decimal("RESEARCH_STAKE", defaults.research_stake),
            research_lookup_fee: env_decimal("RESEARCH_LOOKUP_FEE", defaults.research_lookup_fee),
            portfolio_max_bets: env_u32("PORTFOLIO_MAX_BETS", defaults.portfolio_max_bets),
            portfolio_confidence_floor: env_decimal(
                "PORTFOLIO_CONFIDENCE_FLOOR",
                defaults.portfolio_confidence_floor,
            ),
            portfolio_stake_coeff: env_decimal(
                "PORTFOLIO_STAKE_COEFF",
                defaults.portfolio_stake_coeff,
            ),
            portfolio_aggregate_cap: env_decimal(
                "PORTFOLIO_AGGREGATE_CAP",
                defaults.portfolio_aggregate_cap,
            ),
            single_wager_floor: env_decimal("SINGLE_WAGER_FLOOR", defaults.single_wager_floor),
            single_wager_fraction: env_decimal(
                "SINGLE_WAGER_FRACTION",
                defaults.single_wager_fraction,
            ),
        }
    }
}

fn dec(v: f64) -> Decimal {
    Decimal::from_str(&v.to_string()).expect("literal decimal constant")
}

/// Process-wide configuration, assembled once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub enforcement_mode: EnforcementMode,
    pub tick_rate_seconds: u64,
    pub market_maker_interval_seconds: u64,
    pub database_url: String,
    pub llm_provider: String,
    pub llm_api_key: Option<String>,
    pub llm_base_url: Option<String>,
    pub llm_model: String,
    pub input_cost_per_million: Decimal,
    pub output_cost_per_million: Decimal,
    pub github_watchlist: Vec<String>,
    pub news_keywords: Vec<String>,
    pub news_api_key: Option<String>,
    pub economics: TickEconomics,
}

impl Config {
    pub fn from_env() -> Self {
        let enforcement_mode = match env::var("ENFORCEMENT_MODE").as_deref() {
            Ok("enforce") => EnforcementMode::Enforce,
            _ => EnforcementMode::Observe,
        };

        Self {
            enforcement_mode,
            tick_rate_seconds: env_u64("TICK_RATE", 10),
            market_maker_interval_seconds: env_u64("MARKET_MAKER_INTERVAL", 60),
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "arena.sqlite3".into()),
            llm_provider: env::var("LLM_PROVIDER").unwrap_or_else(|_| "mock".into()),
            llm_api_key: env::var("LLM_API_KEY").ok().filter(|s| !s.is_empty()),
            llm_base_url: env::var("LLM_BASE_URL").ok().filter(|s| !s.is_empty()),
            llm_model: env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into()),
            input_cost_per_million: env_decimal("CLAWX_INPUT_COST_PER_M", dec(3.0)),
            output_cost_per_million: env_decimal("CLAWX_OUTPUT_COST_PER_M", dec(10.0)),
            github_watchlist: env::var("GITHUB_WATCHLIST")
                .ok()
                .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
                .filter(|v: &Vec<String>| !v.is_empty())
                .unwrap_or_else(|| {
                    vec![
                        "rust-lang/rust".to_string(),
                        "tokio-rs/tokio".to_string(),
                        "serde-rs/serde".to_string(),
                    ]
                }),
            news_keywords: env::var("NEWS_KEYWORDS")
                .ok()
                .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
                .filter(|v: &Vec<String>| !v.is_empty())
                .unwrap_or_else(|| {
                    vec![
                        "artificial intelligence".to_string(),
                        "climate".to_string(),
                        "election".to_string(),
                    ]
                }),
            news_api_key: env::var("NEWS_API_KEY").ok().filter(|s| !s.is_empty()),
            economics: TickEconomics::from_env(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_economics_matches_scenario_constants() {
        let e = TickEconomics::default();
        assert_eq!(e.entropy_base, dec(0.50));
        assert_eq!(e.entropy_penalty, dec(0.25));
        assert_eq!(e.entropy_max_fee, dec(3.00));
        assert_eq!(e.entropy_penalty_interval, 5);
    }

    #[test]
    fn enforcement_mode_defaults_to_observe() {
        env::remove_var("ENFORCEMENT_MODE");
        let cfg = Config::from_env();
        assert_eq!(cfg.enforcement_mode, EnforcementMode::Observe);
    }
}
