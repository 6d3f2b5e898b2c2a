//! Stream Publisher (SPEC_FULL.md §4.H, §6).
//!
//! Fire-and-forget fan-out of tick events on the `arena:stream` channel.
//! Ported from `ws_publisher.py`'s channel name and event-code map, backed
//! by `tokio::sync::broadcast` the same way the teacher's `main.rs` fans
//! WebSocket events out to connected clients — in-process, so there is no
//! external Redis dependency to reconnect (see DESIGN.md's note on this
//! substitution). Never fails a tick: sends are dropped silently if there
//! are no subscribers or the channel is full.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::broadcast;

pub const CHANNEL: &str = "arena:stream";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    Wager,
    Heartbeat,
    Liquidation,
    Research,
    Portfolio,
}

impl StreamOutcome {
    fn code(self) -> &'static str {
        match self {
            StreamOutcome::Wager => "W",
            StreamOutcome::Heartbeat => "H",
            StreamOutcome::Liquidation => "L",
            StreamOutcome::Research | StreamOutcome::Portfolio => "R",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamEvent {
    #[serde(rename = "t")]
    pub timestamp: i64,
    #[serde(rename = "e")]
    pub event_code: &'static str,
    #[serde(rename = "b")]
    pub agent_id: String,
    #[serde(rename = "a", skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
}

#[derive(Clone)]
pub struct StreamPublisher {
    sender: broadcast::Sender<String>,
}

impl StreamPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _rx) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.sender.subscribe()
    }

    /// Fire-and-forget: publish failures (e.g. zero subscribers) never
    /// propagate to the caller, matching `publish_tick_event`'s contract.
    pub fn publish_tick_event(&self, agent_id: &str, outcome: StreamOutcome, amount: Option<Decimal>) {
        let payload = StreamEvent {
            timestamp: Utc::now().timestamp(),
            event_code: outcome.code(),
            agent_id: agent_id.to_string(),
            amount: amount.and_then(|a| a.round_dp(4).to_string().parse::<f64>().ok()),
        };
        if let Ok(json) = serde_json::to_string(&payload) {
            let _ = self.sender.send(json);
        }
    }
}

impl Default for StreamPublisher {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn publish_never_panics_without_subscribers() {
        let publisher = StreamPublisher::default();
        publisher.publish_tick_event("agent-1", StreamOutcome::Heartbeat, None);
    }

    #[tokio::test]
    async fn subscriber_receives_event_code() {
        let publisher = StreamPublisher::default();
        let mut rx = publisher.subscribe();
        publisher.publish_tick_event(
            "agent-1",
            StreamOutcome::Wager,
            Some(Decimal::from_str("1.25").unwrap()),
        );
        let received = rx.recv().await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&received).unwrap();
        assert_eq!(parsed["e"], "W");
        assert_eq!(parsed["b"], "agent-1");
        assert_eq!(parsed["a"], 1.25);
    }
}
