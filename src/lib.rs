//! Autonomous-agent arena core library.
//!
//! Exposes every standalone module for use by the `arena` binary and by
//! integration tests. The module layout mirrors SPEC_FULL.md's component
//! breakdown: storage primitives at the bottom, the tick engine and
//! scheduler as the top-level orchestration that wires everything together.

pub mod agent_lock;
pub mod config;
pub mod error;
pub mod ledger;
pub mod llm;
pub mod market;
pub mod metrics_sink;
pub mod money;
pub mod observability;
pub mod scheduler;
pub mod storage;
pub mod stream;
pub mod tick;
pub mod tools;

pub use config::Config;
pub use error::{ArenaError, ArenaResult};
pub use scheduler::Scheduler;
pub use tick::TickEngine;
