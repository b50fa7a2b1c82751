//! Checkpoint persistence and recovery (§4.14).
//!
//! A checkpoint is a snapshot of an agent's progress: enough to resume a
//! fresh run with context, never enough (nor intended) to replay history
//! message-by-message. Conversation history is kept for audit only.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sibyl_common::ids::entity_id;
use sibyl_graph::GraphClient;
use tracing::instrument;

use crate::errors::AgentError;
use crate::types::MessageSummary;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub agent_id: String,
    pub task_id: Option<String>,
    pub current_step: String,
    pub conversation_history: Vec<MessageSummary>,
    pub tokens_used: u64,
    pub cost_usd: f64,
    pub session_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

pub struct CheckpointManager {
    graph: Arc<GraphClient>,
    organization_id: String,
}

impl CheckpointManager {
    pub fn new(graph: Arc<GraphClient>, organization_id: impl Into<String>) -> Self {
        Self { graph, organization_id: organization_id.into() }
    }

    #[instrument(skip(self, checkpoint))]
    pub async fn save(&self, checkpoint: &Checkpoint) -> Result<(), AgentError> {
        let history = serde_json::to_string(&checkpoint.conversation_history).map_err(|e| AgentError::Other(e.into()))?;
        self.graph
            .execute_write(
                &self.organization_id,
                &["id"],
                "MERGE (n:Entity {id: $id}) \
                 SET n.entity_type = 'checkpoint', n.name = $agent_id, n.organization_id = $org_id, \
                     n.agent_id = $agent_id, n.task_id = $task_id, n.current_step = $current_step, \
                     n.conversation_history = $conversation_history, n.tokens_used = $tokens_used, \
                     n.cost_usd = $cost_usd, n.session_id = $session_id, n.timestamp = $timestamp, \
                     n.created_at = coalesce(n.created_at, $timestamp) \
                 RETURN n.id AS id",
                &[
                    ("id", serde_json::json!(checkpoint.id)),
                    ("agent_id", serde_json::json!(checkpoint.agent_id)),
                    ("org_id", serde_json::json!(self.organization_id)),
                    ("task_id", checkpoint.task_id.as_ref().map(|t| serde_json::json!(t)).unwrap_or(JsonValue::Null)),
                    ("current_step", serde_json::json!(checkpoint.current_step)),
                    ("conversation_history", serde_json::json!(history)),
                    ("tokens_used", serde_json::json!(checkpoint.tokens_used)),
                    ("cost_usd", serde_json::json!(checkpoint.cost_usd)),
                    (
                        "session_id",
                        checkpoint.session_id.as_ref().map(|s| serde_json::json!(s)).unwrap_or(JsonValue::Null),
                    ),
                    ("timestamp", serde_json::json!(checkpoint.timestamp.to_rfc3339())),
                ],
            )
            .await
            .map_err(|e| AgentError::Graph(e.to_string()))?;
        Ok(())
    }

    /// Returns the most recent checkpoint for an agent, if any.
    #[instrument(skip(self))]
    pub async fn get_latest(&self, agent_id: &str) -> Result<Option<Checkpoint>, AgentError> {
        let rows = self
            .graph
            .execute_read(
                &self.organization_id,
                &["id", "agent_id", "task_id", "current_step", "conversation_history", "tokens_used", "cost_usd", "session_id", "timestamp"],
                "MATCH (n:Entity {entity_type: 'checkpoint', agent_id: $agent_id}) \
                 RETURN n.id AS id, n.agent_id AS agent_id, n.task_id AS task_id, n.current_step AS current_step, \
                        n.conversation_history AS conversation_history, n.tokens_used AS tokens_used, \
                        n.cost_usd AS cost_usd, n.session_id AS session_id, n.timestamp AS timestamp \
                 ORDER BY n.timestamp DESC LIMIT 1",
                &[("agent_id", serde_json::json!(agent_id))],
            )
            .await
            .map_err(|e| AgentError::Graph(e.to_string()))?;

        let Some(row) = rows.into_iter().next() else { return Ok(None) };
        row_to_checkpoint(&row).map(Some)
    }

    pub fn new_checkpoint_id(&self, agent_id: &str, timestamp: DateTime<Utc>) -> String {
        entity_id("checkpoint", &[agent_id, &timestamp.to_rfc3339()])
    }
}

fn row_to_checkpoint(row: &sibyl_graph::GraphRow) -> Result<Checkpoint, AgentError> {
    let get_str = |key: &str| row.get(key).and_then(|v| v.as_str()).map(|s| s.to_string());
    let id = get_str("id").ok_or_else(|| AgentError::Other(anyhow::anyhow!("checkpoint row missing id")))?;
    let agent_id = get_str("agent_id").unwrap_or_default();
    let current_step = get_str("current_step").unwrap_or_default();
    let history_raw = get_str("conversation_history").unwrap_or_else(|| "[]".to_string());
    let conversation_history: Vec<MessageSummary> = serde_json::from_str(&history_raw).unwrap_or_default();
    let tokens_used = row.get("tokens_used").and_then(|v| v.as_u64()).unwrap_or(0);
    let cost_usd = row.get("cost_usd").and_then(|v| v.as_f64()).unwrap_or(0.0);
    let timestamp = get_str("timestamp")
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    Ok(Checkpoint {
        id,
        agent_id,
        task_id: get_str("task_id"),
        current_step,
        conversation_history,
        tokens_used,
        cost_usd,
        session_id: get_str("session_id"),
        timestamp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_round_trips_through_json_history_encoding() {
        let history = vec![MessageSummary::User { content: "hi".into() }];
        let encoded = serde_json::to_string(&history).unwrap();
        let decoded: Vec<MessageSummary> = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.len(), 1);
    }
}
