//! Human-in-the-loop approval gate for dangerous tool calls (§6, §9).
//!
//! The source tree this was distilled from references an `ApprovalService`
//! extensively from `AgentRunner`/hook wiring, but its own module was not
//! part of the retrieval pack. This reconstructs it from that call-site
//! contract: constructed per-agent, exposes a `PreToolUse` hook matcher that
//! gates a configurable set of dangerous tools, and a `cancel_all` used when
//! an agent is stopped so no approval is left dangling forever.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sibyl_common::ids::entity_id;
use sibyl_graph::GraphClient;
use tokio::sync::{Mutex, Notify};
use tracing::{info, instrument, warn};

use crate::errors::AgentError;
use crate::hooks::{Hook, HookRegistry};
use crate::types::{HookEventKind, HookInput, HookOutput};

const DEFAULT_APPROVAL_TIMEOUT: Duration = Duration::from_secs(300);

/// Tool-name substrings that always require a human approval before the
/// runtime is allowed to proceed.
const DANGEROUS_TOOL_PATTERNS: &[&str] = &["Bash", "Write", "MultiEdit"];

#[derive(Debug, Clone)]
pub struct PendingApproval {
    pub id: String,
    pub tool_name: String,
    pub tool_input: JsonValue,
    pub created_at: DateTime<Utc>,
    pub resolved: bool,
    pub approved: bool,
    pub reason: Option<String>,
}

struct Waiter {
    approval: Mutex<PendingApproval>,
    notify: Notify,
}

pub struct ApprovalService {
    graph: Arc<GraphClient>,
    organization_id: String,
    project_id: String,
    agent_id: String,
    task_id: Option<String>,
    pending: Arc<Mutex<HashMap<String, Arc<Waiter>>>>,
    timeout: Duration,
}

impl ApprovalService {
    pub fn new(
        graph: Arc<GraphClient>,
        organization_id: impl Into<String>,
        project_id: impl Into<String>,
        agent_id: impl Into<String>,
        task_id: Option<String>,
    ) -> Self {
        Self {
            graph,
            organization_id: organization_id.into(),
            project_id: project_id.into(),
            agent_id: agent_id.into(),
            task_id,
            pending: Arc::new(Mutex::new(HashMap::new())),
            timeout: DEFAULT_APPROVAL_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn requires_approval(tool_name: &str) -> bool {
        DANGEROUS_TOOL_PATTERNS.iter().any(|p| tool_name.contains(p))
    }

    #[instrument(skip(self, tool_input))]
    async fn persist(&self, approval: &PendingApproval) -> Result<(), AgentError> {
        self.graph
            .execute_write(
                &self.organization_id,
                &["id"],
                "MERGE (n:Entity {id: $id}) \
                 SET n.entity_type = 'approval', n.name = $tool_name, n.organization_id = $org_id, \
                     n.project_id = $project_id, n.agent_id = $agent_id, n.task_id = $task_id, \
                     n.tool_input = $tool_input, n.resolved = $resolved, n.approved = $approved, \
                     n.reason = $reason, n.created_at = coalesce(n.created_at, $created_at) \
                 RETURN n.id AS id",
                &[
                    ("id", serde_json::json!(approval.id)),
                    ("tool_name", serde_json::json!(approval.tool_name)),
                    ("org_id", serde_json::json!(self.organization_id)),
                    ("project_id", serde_json::json!(self.project_id)),
                    ("agent_id", serde_json::json!(self.agent_id)),
                    ("task_id", self.task_id.as_ref().map(|t| serde_json::json!(t)).unwrap_or(JsonValue::Null)),
                    ("tool_input", approval.tool_input.clone()),
                    ("resolved", serde_json::json!(approval.resolved)),
                    ("approved", serde_json::json!(approval.approved)),
                    ("reason", approval.reason.as_ref().map(|r| serde_json::json!(r)).unwrap_or(JsonValue::Null)),
                    ("created_at", serde_json::json!(approval.created_at.to_rfc3339())),
                ],
            )
            .await
            .map_err(|e| AgentError::Graph(e.to_string()))?;
        Ok(())
    }

    /// Requests approval for a tool call, blocking the caller until a
    /// resolution arrives (via `resolve`/`cancel_all`) or `timeout` elapses,
    /// at which point the request is treated as denied.
    #[instrument(skip(self, tool_input))]
    async fn request(&self, tool_name: &str, tool_input: JsonValue) -> Result<bool, AgentError> {
        let approval_id = entity_id("approval", &[&self.agent_id, tool_name, &Utc::now().to_rfc3339()]);
        let approval = PendingApproval {
            id: approval_id.clone(),
            tool_name: tool_name.to_string(),
            tool_input,
            created_at: Utc::now(),
            resolved: false,
            approved: false,
            reason: None,
        };
        self.persist(&approval).await?;

        let waiter = Arc::new(Waiter { approval: Mutex::new(approval), notify: Notify::new() });
        self.pending.lock().await.insert(approval_id.clone(), waiter.clone());

        let outcome = tokio::time::timeout(self.timeout, waiter.notify.notified()).await;
        let snapshot = waiter.approval.lock().await.clone();
        self.pending.lock().await.remove(&approval_id);

        if outcome.is_err() {
            warn!(approval_id, "approval timed out; denying by default");
            return Ok(false);
        }
        Ok(snapshot.approved)
    }

    /// Resolves a pending approval (called from an external UI/API surface).
    #[instrument(skip(self))]
    pub async fn resolve(&self, approval_id: &str, approved: bool, reason: Option<String>) -> Result<(), AgentError> {
        let pending = self.pending.lock().await;
        let waiter = pending.get(approval_id).ok_or_else(|| AgentError::ApprovalNotFound(approval_id.to_string()))?;
        {
            let mut approval = waiter.approval.lock().await;
            approval.resolved = true;
            approval.approved = approved;
            approval.reason = reason;
            self.persist(&approval).await?;
        }
        waiter.notify.notify_waiters();
        Ok(())
    }

    /// Cancels every outstanding approval for this agent, denying them all.
    /// Called on `stop` so nothing is left waiting on a terminated agent.
    #[instrument(skip(self))]
    pub async fn cancel_all(&self, reason: &str) -> usize {
        let pending = self.pending.lock().await;
        let count = pending.len();
        for waiter in pending.values() {
            let mut approval = waiter.approval.lock().await;
            approval.resolved = true;
            approval.approved = false;
            approval.reason = Some(reason.to_string());
            if let Err(err) = self.persist(&approval).await {
                warn!(error = %err, "failed to persist cancelled approval");
            }
            waiter.notify.notify_waiters();
        }
        info!(count, reason, "cancelled outstanding approvals");
        count
    }

    pub fn hook_registry(self: &Arc<Self>) -> HookRegistry {
        let mut registry: HookRegistry = HashMap::new();
        registry
            .entry(HookEventKind::PreToolUse)
            .or_default()
            .push(Arc::new(ApprovalHook { service: self.clone() }));
        registry
    }
}

struct ApprovalHook {
    service: Arc<ApprovalService>,
}

#[async_trait]
impl Hook for ApprovalHook {
    async fn call(&self, input: &HookInput) -> Result<HookOutput, AgentError> {
        let Some(tool_name) = &input.tool_name else {
            return Ok(HookOutput::allow());
        };
        if !ApprovalService::requires_approval(tool_name) {
            return Ok(HookOutput::allow());
        }
        let tool_input = input.tool_input.clone().unwrap_or(JsonValue::Null);
        let approved = self.service.request(tool_name, tool_input).await?;
        if approved {
            Ok(HookOutput::allow())
        } else {
            Ok(HookOutput::deny(format!("approval for {tool_name} was denied or timed out")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requires_approval_matches_configured_dangerous_tools() {
        assert!(ApprovalService::requires_approval("Bash"));
        assert!(ApprovalService::requires_approval("MultiEdit"));
        assert!(!ApprovalService::requires_approval("Read"));
    }
}
