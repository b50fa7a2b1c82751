//! Inter-agent messaging (§4.13 "Messaging"): one FIFO queue per agent,
//! kept in memory only — a restart loses undelivered messages, matching
//! the orchestrator's own recovery story (agents resume from checkpoints,
//! not from replayed conversations).

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    pub from_agent: String,
    pub to_agent: String,
    pub content: String,
    pub message_type: String,
    pub metadata: HashMap<String, JsonValue>,
    pub timestamp: DateTime<Utc>,
}

type Queue = Mutex<mpsc::UnboundedReceiver<AgentMessage>>;

/// Per-agent unbounded FIFO mailbox. `DashMap` lets senders and the owning
/// agent's receiver both reach a queue without a global lock.
#[derive(Default)]
pub struct MessageBus {
    senders: DashMap<String, mpsc::UnboundedSender<AgentMessage>>,
    receivers: DashMap<String, Queue>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh mailbox for `agent_id`, replacing any existing one.
    pub fn create_queue(&self, agent_id: &str) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.insert(agent_id.to_string(), tx);
        self.receivers.insert(agent_id.to_string(), Mutex::new(rx));
    }

    pub fn remove_queue(&self, agent_id: &str) {
        self.senders.remove(agent_id);
        self.receivers.remove(agent_id);
    }

    pub fn has_queue(&self, agent_id: &str) -> bool {
        self.senders.contains_key(agent_id)
    }

    pub fn active_agents(&self) -> Vec<String> {
        self.senders.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Enqueues a message for `to_agent`. Returns `false` if no mailbox
    /// exists for the recipient (agent not active).
    pub fn send(&self, message: AgentMessage) -> bool {
        let Some(sender) = self.senders.get(&message.to_agent) else {
            debug!(to = %message.to_agent, "no message queue for agent");
            return false;
        };
        sender.send(message).is_ok()
    }

    /// Drains every message currently queued for `agent_id`, waiting up to
    /// `wait_timeout` for at least the first one to arrive.
    pub async fn receive(&self, agent_id: &str, wait_timeout: Duration) -> Vec<AgentMessage> {
        let Some(queue) = self.receivers.get(agent_id) else {
            return Vec::new();
        };
        let mut rx = queue.lock().await;
        let mut messages = Vec::new();
        loop {
            match tokio::time::timeout(wait_timeout, rx.recv()).await {
                Ok(Some(message)) => messages.push(message),
                _ => break,
            }
            // After the first message, drain anything already buffered
            // without waiting again.
            while let Ok(message) = rx.try_recv() {
                messages.push(message);
            }
            break;
        }
        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(from: &str, to: &str, content: &str) -> AgentMessage {
        AgentMessage {
            from_agent: from.to_string(),
            to_agent: to.to_string(),
            content: content.to_string(),
            message_type: "text".to_string(),
            metadata: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn send_without_a_queue_reports_failure() {
        let bus = MessageBus::new();
        assert!(!bus.send(message("a", "b", "hi")));
    }

    #[tokio::test]
    async fn queued_messages_are_received_fifo() {
        let bus = MessageBus::new();
        bus.create_queue("b");
        assert!(bus.send(message("a", "b", "first")));
        assert!(bus.send(message("a", "b", "second")));

        let received = bus.receive("b", Duration::from_millis(50)).await;
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].content, "first");
        assert_eq!(received[1].content, "second");
    }

    #[tokio::test]
    async fn receive_times_out_on_an_empty_queue() {
        let bus = MessageBus::new();
        bus.create_queue("b");
        let received = bus.receive("b", Duration::from_millis(20)).await;
        assert!(received.is_empty());
    }
}
