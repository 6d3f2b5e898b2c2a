//! Market Catalog, Resolution Engine, and Market Maker (SPEC_FULL.md §4.C/D/E).

mod catalog;
mod maker;
mod resolution;

pub use catalog::MarketCatalog;
pub use maker::MarketMaker;
pub use resolution::{ResolutionEngine, ResolutionOutcome};

/// Transaction-scoped functions used by the tick engine to fold market
/// writes into its own single commit (SPEC_FULL.md §4.J). Market reads for
/// a tick happen earlier, in the decision phase, before any transaction is
/// open, so only the writers need a tx-scoped counterpart here.
pub(crate) use resolution::{place_market_bet_in_tx, submit_research_answer_in_tx};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::ArenaError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceKind {
    Research,
    Weather,
    Github,
    News,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Research => "RESEARCH",
            SourceKind::Weather => "WEATHER",
            SourceKind::Github => "GITHUB",
            SourceKind::News => "NEWS",
        }
    }
}

impl FromStr for SourceKind {
    type Err = ArenaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "RESEARCH" => SourceKind::Research,
            "WEATHER" => SourceKind::Weather,
            "GITHUB" => SourceKind::Github,
            "NEWS" => SourceKind::News,
            other => {
                return Err(ArenaError::Configuration(format!(
                    "unknown market source kind {other}"
                )))
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketStatus {
    Open,
    Locked,
    Resolved,
}

impl MarketStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MarketStatus::Open => "OPEN",
            MarketStatus::Locked => "LOCKED",
            MarketStatus::Resolved => "RESOLVED",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "RESOLVED" => MarketStatus::Resolved,
            "LOCKED" => MarketStatus::Locked,
            _ => MarketStatus::Open,
        }
    }
}

/// Per-source resolution criteria. Serialized to the `markets.criteria`
/// JSON column; each variant's fields mirror one generator in
/// `market::maker` and one evaluator in `market::resolution`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Criteria {
    #[serde(rename = "RESEARCH")]
    Research { answer_hash: String },
    #[serde(rename = "WEATHER")]
    Weather {
        city: String,
        lat: f64,
        lon: f64,
        operator: String,
        threshold: f64,
        current_reading: f64,
    },
    #[serde(rename = "GITHUB")]
    Github { repo: String, threshold: i64 },
    #[serde(rename = "NEWS")]
    News {
        keyword: String,
        sources: Vec<String>,
        match_type: String,
    },
}

#[derive(Debug, Clone)]
pub struct Market {
    pub market_id: String,
    pub description: String,
    pub source_kind: SourceKind,
    pub criteria: Criteria,
    pub bounty: Decimal,
    pub deadline: DateTime<Utc>,
    pub status: MarketStatus,
    pub outcome: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredictionStatus {
    Pending,
    Win,
    Loss,
}

impl PredictionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PredictionStatus::Pending => "PENDING",
            PredictionStatus::Win => "WIN",
            PredictionStatus::Loss => "LOSS",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "WIN" => PredictionStatus::Win,
            "LOSS" => PredictionStatus::Loss,
            _ => PredictionStatus::Pending,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MarketPrediction {
    pub id: String,
    pub market_id: String,
    pub agent_id: String,
    pub outcome_text: String,
    pub stake: Decimal,
    pub status: PredictionStatus,
    pub payout: Option<Decimal>,
    pub created_at: DateTime<Utc>,
}
