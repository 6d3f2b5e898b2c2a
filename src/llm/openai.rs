//! OpenAI-compatible chat-completions backend.
//!
//! Grounded on `vault::llm::OpenRouterClient`: same `from_env` construction
//! shape, same bearer-auth POST, same response-shape extraction — adapted
//! to a generic base URL so any OpenAI-compatible provider (OpenRouter,
//! the real OpenAI API, a self-hosted gateway) can be selected via
//! `LLM_BASE_URL` without a new backend per vendor.

use super::{ChatMessage, GenerateOptions, LlmProvider};
use crate::error::{ArenaError, ArenaResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub struct OpenAiCompatibleProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiCompatibleProvider {
    pub fn new(base_url: String, api_key: String, model: String) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("reqwest client"),
            base_url,
            api_key,
            model,
        }
    }

    pub fn from_env(
        base_url: Option<String>,
        api_key: Option<String>,
        model: String,
    ) -> ArenaResult<Self> {
        let api_key = api_key.ok_or_else(|| {
            ArenaError::Configuration("LLM_API_KEY is required for this provider".to_string())
        })?;
        let base_url = base_url.unwrap_or_else(|| "https://openrouter.ai/api/v1".to_string());
        Ok(Self::new(base_url, api_key, model))
    }

    async fn post_chat(
        &self,
        messages: &[ChatMessage],
        opts: &GenerateOptions,
        response_format: Option<serde_json::Value>,
    ) -> ArenaResult<(String, reqwest::Response)> {
        let request = ChatCompletionRequest {
            model: &self.model,
            messages,
            max_tokens: opts.max_tokens,
            temperature: opts.temperature,
            response_format,
        };

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;
        Ok((url, response))
    }

    async fn parse_response(
        url: &str,
        response: reqwest::Response,
    ) -> ArenaResult<(Option<String>, u64, u64)> {
        if !response.status().is_success() {
            let status = response.status();
            return if status.as_u16() == 404 {
                Err(ArenaError::ExternalPermanent(format!(
                    "llm endpoint {url} returned 404"
                )))
            } else {
                Err(ArenaError::ExternalTransient(format!(
                    "llm endpoint {url} returned {status}"
                )))
            };
        }

        let parsed: ChatCompletionResponse = response.json().await?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content);
        let usage = parsed.usage.unwrap_or_default();
        Ok((content, usage.prompt_tokens, usage.completion_tokens))
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageOut,
}

#[derive(Deserialize)]
struct ChatMessageOut {
    content: Option<String>,
}

#[derive(Deserialize, Default)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        opts: &GenerateOptions,
    ) -> ArenaResult<Option<String>> {
        let (content, _, _) = self.generate_tracked(messages, opts).await?;
        Ok(content)
    }

    async fn generate_tracked(
        &self,
        messages: &[ChatMessage],
        opts: &GenerateOptions,
    ) -> ArenaResult<(Option<String>, u64, u64)> {
        let response_format = opts
            .want_json
            .then(|| serde_json::json!({"type": "json_object"}));
        let wants_json = response_format.is_some();

        let (url, response) = self.post_chat(messages, opts, response_format).await?;

        // Some OpenAI-compatible providers reject `response_format` outright
        // (400) instead of ignoring it. Retry once without the field, asking
        // for JSON through the prompt instead of the API.
        if wants_json && response.status().as_u16() == 400 {
            let mut fallback_messages = messages.to_vec();
            fallback_messages.push(ChatMessage::system(
                "Respond with a single JSON object only. No prose, no markdown fences.",
            ));
            let (url, response) = self.post_chat(&fallback_messages, opts, None).await?;
            return Self::parse_response(&url, response).await;
        }

        Self::parse_response(&url, response).await
    }
}
