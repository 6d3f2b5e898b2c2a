//! Tool Gateway: external-knowledge lookup with retry/backoff (SPEC_FULL.md §4.G).
//!
//! Grounded on `scrapers::hashdive_api::HashdiveScraper`: same
//! `MAX_RETRIES`/`INITIAL_BACKOFF_MS` doubling-backoff shape, same
//! identifying user agent, same "404 is final" / "429 and timeout retry"
//! split. Adds the teacher's 403-triggers-fallback-endpoint behavior.

use crate::error::{ArenaError, ArenaResult};
use serde::Deserialize;
use std::time::Duration;

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 200;
const USER_AGENT: &str = "agent-arena/1.0 (knowledge lookup)";

#[derive(Debug, Clone, Deserialize)]
pub struct KnowledgeSummary {
    pub title: String,
    #[serde(rename = "pageid")]
    pub id: i64,
    pub extract: String,
}

pub struct ToolGateway {
    client: reqwest::Client,
    primary_base: String,
    fallback_base: String,
}

impl ToolGateway {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .user_agent(USER_AGENT)
                .build()
                .expect("reqwest client"),
            primary_base: "https://en.wikipedia.org/api/rest_v1/page/summary".to_string(),
            fallback_base: "https://en.m.wikipedia.org/api/rest_v1/page/summary".to_string(),
        }
    }

    #[cfg(test)]
    pub fn with_bases(primary_base: String, fallback_base: String) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .user_agent(USER_AGENT)
                .build()
                .expect("reqwest client"),
            primary_base,
            fallback_base,
        }
    }

    pub async fn knowledge_lookup(&self, title: &str) -> ArenaResult<Option<KnowledgeSummary>> {
        match self.fetch(&self.primary_base, title).await {
            Ok(summary) => Ok(summary),
            Err(ArenaError::ExternalPermanent(msg)) if msg.contains("403") => {
                self.fetch(&self.fallback_base, title).await
            }
            Err(e) => Err(e),
        }
    }

    async fn fetch(&self, base: &str, title: &str) -> ArenaResult<Option<KnowledgeSummary>> {
        let url = format!("{}/{}", base.trim_end_matches('/'), urlencode(title));
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        for attempt in 0..=MAX_RETRIES {
            let response = self.client.get(&url).send().await;
            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let summary: KnowledgeSummary = resp.json().await?;
                        return Ok(Some(summary));
                    }
                    if status.as_u16() == 404 {
                        return Ok(None);
                    }
                    if status.as_u16() == 403 {
                        return Err(ArenaError::ExternalPermanent(format!(
                            "{url} returned 403"
                        )));
                    }
                    if status.as_u16() == 429 && attempt < MAX_RETRIES {
                        tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                        backoff_ms *= 2;
                        continue;
                    }
                    return Err(ArenaError::ExternalTransient(format!(
                        "{url} returned {status}"
                    )));
                }
                Err(e) if e.is_timeout() && attempt < MAX_RETRIES => {
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2;
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(ArenaError::ExternalTransient(format!(
            "{url} exhausted retries"
        )))
    }
}

impl Default for ToolGateway {
    fn default() -> Self {
        Self::new()
    }
}

fn urlencode(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c.to_string()
            } else if c == ' ' {
                "_".to_string()
            } else {
                let mut buf = [0u8; 4];
                let encoded = c.encode_utf8(&mut buf);
                encoded
                    .bytes()
                    .map(|b| format!("%{:02X}", b))
                    .collect::<String>()
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urlencode_replaces_spaces_and_keeps_word_chars() {
        assert_eq!(urlencode("Albert Einstein"), "Albert_Einstein");
    }
}
