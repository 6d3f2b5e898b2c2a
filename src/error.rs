//! Error taxonomy for the arena core.
//!
//! Library-internal failure modes are modeled as [`ArenaError`] variants so
//! call sites can branch on them; top-level orchestration (the scheduler,
//! `main`) propagates with `anyhow::Result` the way the teacher's own
//! `main.rs` does.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArenaError {
    #[error("agent {0} not found")]
    AgentNotFound(String),

    #[error("agent {0} is not ALIVE")]
    AgentNotAlive(String),

    #[error("sequence conflict for agent {agent_id} at sequence {sequence}")]
    SequenceConflict { agent_id: String, sequence: i64 },

    #[error("ledger chain integrity broken for agent {agent_id} at sequence {sequence}")]
    ChainIntegrity { agent_id: String, sequence: i64 },

    #[error("market {0} not found")]
    MarketNotFound(String),

    #[error("market {0} is not open")]
    MarketNotOpen(String),

    #[error("required configuration missing: {0}")]
    Configuration(String),

    #[error("external call failed permanently: {0}")]
    ExternalPermanent(String),

    #[error("external call failed transiently after retries: {0}")]
    ExternalTransient(String),

    #[error("language model returned no usable content")]
    NoContent,

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type ArenaResult<T> = std::result::Result<T, ArenaError>;
