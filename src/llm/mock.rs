//! Deterministic mock backend (SPEC_FULL.md §4.F).
//!
//! Ported from `services/llm/mock.py`: the response is a pure function of a
//! hash over the concatenated prompt content, and the response *shape* is
//! sniffed from prompt substrings so the same mock serves strategy,
//! research, and portfolio prompts without per-caller configuration. This
//! is the default provider — tests never touch the network.

use super::{ChatMessage, GenerateOptions, LlmProvider};
use crate::error::ArenaResult;
use async_trait::async_trait;
use sha2::{Digest, Sha256};

pub struct MockProvider;

impl MockProvider {
    pub fn new() -> Self {
        Self
    }

    fn seed(messages: &[ChatMessage]) -> u64 {
        let joined: String = messages.iter().map(|m| m.content.as_str()).collect();
        let mut hasher = Sha256::new();
        hasher.update(joined.as_bytes());
        let digest = hasher.finalize();
        u64::from_be_bytes(digest[0..8].try_into().unwrap())
    }

    fn respond(messages: &[ChatMessage]) -> String {
        let joined: String = messages.iter().map(|m| m.content.as_str()).collect();
        let seed = Self::seed(messages);

        if joined.contains("Idle Streak") {
            return Self::strategy_response(&joined, seed);
        }
        if joined.contains("Research Question") || joined.contains("Wikipedia page ID") {
            return Self::research_response(seed);
        }
        if joined.contains("Available Markets") {
            return Self::portfolio_response(&joined, seed);
        }
        Self::legacy_wager_response(seed)
    }

    fn strategy_response(prompt: &str, seed: u64) -> String {
        let action = if prompt.contains("research markets are available") {
            "RESEARCH"
        } else if prompt.contains("portfolio markets are available") {
            "PORTFOLIO"
        } else if seed % 2 == 0 {
            "WAGER"
        } else {
            "WAIT"
        };
        serde_json::json!({
            "action": action,
            "reasoning": format!("mock strategy seed={seed}"),
        })
        .to_string()
    }

    fn research_response(seed: u64) -> String {
        let confidence = 0.4 + (seed % 50) as f64 / 100.0;
        serde_json::json!({
            "answer": format!("{}", seed % 1000),
            "confidence": (confidence * 100.0).round() / 100.0,
        })
        .to_string()
    }

    fn portfolio_response(prompt: &str, seed: u64) -> String {
        let ids = extract_uuids(prompt);
        if ids.is_empty() {
            return serde_json::json!({ "bets": [] }).to_string();
        }
        let take = if seed % 2 == 0 { 1 } else { 2.min(ids.len()) };
        let bets: Vec<_> = ids
            .into_iter()
            .take(take)
            .enumerate()
            .map(|(i, market_id)| {
                serde_json::json!({
                    "market_id": market_id,
                    "outcome": if (seed as usize + i) % 2 == 0 { "yes" } else { "no" },
                    "confidence": 0.5 + ((seed as usize + i) % 40) as f64 / 100.0,
                    "reasoning": "mock portfolio pick",
                })
            })
            .collect();
        serde_json::json!({ "bets": bets }).to_string()
    }

    fn legacy_wager_response(seed: u64) -> String {
        serde_json::json!({
            "outcome": if seed % 2 == 0 { "yes" } else { "no" },
            "confidence": 0.5 + (seed % 40) as f64 / 100.0,
        })
        .to_string()
    }
}

fn extract_uuids(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    for token in text.split(|c: char| c.is_whitespace() || c == ',' || c == '"') {
        if token.len() == 36 && token.matches('-').count() == 4 {
            out.push(token.to_string());
        }
    }
    out
}

#[async_trait]
impl LlmProvider for MockProvider {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        _opts: &GenerateOptions,
    ) -> ArenaResult<Option<String>> {
        Ok(Some(Self::respond(messages)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_prompt_yields_same_response() {
        let provider = MockProvider::new();
        let messages = vec![ChatMessage::user("Idle Streak: 3")];
        let opts = GenerateOptions::default();
        let a = provider.generate(&messages, &opts).await.unwrap();
        let b = provider.generate(&messages, &opts).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn strategy_mode_is_sniffed_from_prompt() {
        let provider = MockProvider::new();
        let messages = vec![ChatMessage::user(
            "Idle Streak: 2. research markets are available.",
        )];
        let opts = GenerateOptions::default();
        let response = provider.generate(&messages, &opts).await.unwrap().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&response).unwrap();
        assert_eq!(parsed["action"], "RESEARCH");
    }

    #[tokio::test]
    async fn research_mode_response_has_answer_and_confidence() {
        let provider = MockProvider::new();
        let messages = vec![ChatMessage::user("Research Question: what is the capital?")];
        let opts = GenerateOptions::default();
        let response = provider.generate(&messages, &opts).await.unwrap().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&response).unwrap();
        assert!(parsed["answer"].is_string());
        assert!(parsed["confidence"].is_number());
    }
}
