//! Provider factory keyed on `LLM_PROVIDER` (SPEC_FULL.md §4.F, §9).
//!
//! Ported from `services/llm/factory.py`'s env-based singleton selection;
//! this crate builds a fresh provider per call instead of caching a
//! process-wide singleton (the teacher's vault clients are constructed once
//! at startup and handed around as `Arc`s the same way — the caller owns
//! the lifetime, the factory is just the decision tree).

use super::{LlmProvider, MockProvider, OpenAiCompatibleProvider, TrackedProvider};
use crate::config::Config;
use crate::error::ArenaResult;
use std::sync::Arc;

/// Builds the base provider for `config.llm_provider`, wrapped in
/// [`TrackedProvider`] so token usage always flows into an active collector
/// when one exists; outside an `observe` scope the wrapper is a no-op
/// passthrough.
pub fn build_provider(config: &Config) -> ArenaResult<Arc<dyn LlmProvider>> {
    let input_cost: f64 = config
        .input_cost_per_million
        .to_string()
        .parse()
        .unwrap_or(3.0);
    let output_cost: f64 = config
        .output_cost_per_million
        .to_string()
        .parse()
        .unwrap_or(10.0);

    match config.llm_provider.as_str() {
        "mock" | "" => Ok(Arc::new(TrackedProvider::new(
            MockProvider::new(),
            input_cost,
            output_cost,
        ))),
        _ => {
            let provider = OpenAiCompatibleProvider::from_env(
                config.llm_base_url.clone(),
                config.llm_api_key.clone(),
                config.llm_model.clone(),
            )?;
            Ok(Arc::new(TrackedProvider::new(
                provider,
                input_cost,
                output_cost,
            )))
        }
    }
}
