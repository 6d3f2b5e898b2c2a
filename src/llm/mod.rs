//! Language Model Gateway (SPEC_FULL.md §4.F).
//!
//! Provider-agnostic: a small async trait, a deterministic mock backend, an
//! OpenAI-compatible HTTP backend, and a factory keyed on `LLM_PROVIDER`.
//! Grounded on `vault/llm.rs`'s `OpenRouterClient` for the HTTP shape and on
//! `services/llm/{factory,mock,tracked_provider}.py` for the provider
//! contract and the mock's deterministic response shapes.

mod factory;
mod guardrail;
mod json;
mod mock;
mod openai;

pub use factory::build_provider;
pub use guardrail::apply_guardrail;
pub use json::parse_tolerant_json;
pub use mock::MockProvider;
pub use openai::OpenAiCompatibleProvider;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub max_tokens: u32,
    pub temperature: f32,
    pub want_json: bool,
}

impl GenerateOptions {
    pub fn json(max_tokens: u32) -> Self {
        Self {
            max_tokens,
            temperature: 0.7,
            want_json: true,
        }
    }
}

/// Base contract every backend implements. `generate` is what tick-engine
/// call sites use directly; `generate_tracked` additionally surfaces usage
/// so the token-tracking wrapper (SPEC_FULL §4.F, §9) can bill a collector.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        opts: &GenerateOptions,
    ) -> crate::error::ArenaResult<Option<String>>;

    /// Default fallback for providers that don't expose usage metadata (the
    /// mock): passthrough with a zero usage report.
    async fn generate_tracked(
        &self,
        messages: &[ChatMessage],
        opts: &GenerateOptions,
    ) -> crate::error::ArenaResult<(Option<String>, u64, u64)> {
        let content = self.generate(messages, opts).await?;
        Ok((content, 0, 0))
    }
}

/// Wraps any [`LlmProvider`] to push usage and estimated cost into the
/// currently active [`crate::observability::MetricsCollector`], if one is
/// active. Outside an `observe` scope this is pure passthrough.
pub struct TrackedProvider<P: LlmProvider> {
    base: P,
    input_cost_per_token: f64,
    output_cost_per_token: f64,
}

impl<P: LlmProvider> TrackedProvider<P> {
    pub fn new(base: P, input_cost_per_million: f64, output_cost_per_million: f64) -> Self {
        Self {
            base,
            input_cost_per_token: input_cost_per_million / 1_000_000.0,
            output_cost_per_token: output_cost_per_million / 1_000_000.0,
        }
    }
}

#[async_trait]
impl<P: LlmProvider> LlmProvider for TrackedProvider<P> {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        opts: &GenerateOptions,
    ) -> crate::error::ArenaResult<Option<String>> {
        let collector = crate::observability::current_collector();
        let Some(collector) = collector else {
            let content = self.base.generate(messages, opts).await?;
            return Ok(guardrail::apply_guardrail(content));
        };

        let (content, prompt_tokens, completion_tokens) =
            self.base.generate_tracked(messages, opts).await?;
        let cost = prompt_tokens as f64 * self.input_cost_per_token
            + completion_tokens as f64 * self.output_cost_per_token;
        collector.increment_tokens(prompt_tokens, completion_tokens, cost);
        Ok(guardrail::apply_guardrail(content))
    }
}
