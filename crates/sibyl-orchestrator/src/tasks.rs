//! Minimal task-entity read/write shared by the orchestrator (task
//! assignment) and the tool dispatcher (`manage` workflow transitions).
//! Tasks are plain `Entity{entity_type:'task'}` nodes like everything
//! else in this graph — there is no separate task-CRUD component in the
//! system, so both callers go through the same direct-Cypher helpers.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sibyl_common::entity::{EntityHeader, TaskEntity, TaskPriority, TaskStatus};
use sibyl_graph::GraphClient;
use tracing::instrument;

use crate::errors::OrchestratorError;

#[instrument(skip(graph))]
pub async fn fetch_task(
    graph: &GraphClient,
    organization_id: &str,
    task_id: &str,
) -> Result<Option<TaskEntity>, OrchestratorError> {
    let rows = graph
        .execute_read(
            organization_id,
            &[
                "id", "name", "description", "organization_id", "project_id", "status", "priority",
                "technologies", "assigned_agent", "claimed_at", "created_at", "updated_at",
                "estimated_hours", "actual_hours",
            ],
            "MATCH (n:Entity {id: $id, entity_type: 'task'}) \
             RETURN n.id AS id, n.name AS name, n.description AS description, \
                    n.organization_id AS organization_id, n.project_id AS project_id, \
                    n.status AS status, n.priority AS priority, n.technologies AS technologies, \
                    n.assigned_agent AS assigned_agent, n.claimed_at AS claimed_at, \
                    n.created_at AS created_at, n.updated_at AS updated_at, \
                    n.estimated_hours AS estimated_hours, n.actual_hours AS actual_hours",
            &[("id", serde_json::json!(task_id))],
        )
        .await
        .map_err(|e| OrchestratorError::Graph(e.to_string()))?;

    Ok(rows.into_iter().next().map(|row| row_to_task(&row)))
}

fn row_to_task(row: &sibyl_graph::GraphRow) -> TaskEntity {
    let get_str = |key: &str| row.get(key).and_then(|v| v.as_str()).map(str::to_string);
    let parse_dt = |key: &str| {
        get_str(key).and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|dt| dt.with_timezone(&Utc))
    };
    let get_f32 = |key: &str| row.get(key).and_then(|v| v.as_f64()).map(|f| f as f32);

    let id = get_str("id").unwrap_or_default();
    let organization_id = get_str("organization_id").unwrap_or_default();
    let mut header = EntityHeader::new(id, get_str("name").unwrap_or_default(), organization_id);
    header.description = get_str("description").unwrap_or_default();
    header.project_id = get_str("project_id");
    header.created_at = parse_dt("created_at").unwrap_or_else(Utc::now);
    header.updated_at = parse_dt("updated_at").unwrap_or_else(Utc::now);

    let technologies: Vec<String> = get_str("technologies")
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default();

    TaskEntity {
        project_id: header.project_id.clone().unwrap_or_default(),
        header,
        epic_id: None,
        status: get_str("status").and_then(|s| s.parse().ok()).unwrap_or(TaskStatus::Backlog),
        priority: get_str("priority").and_then(|s| s.parse().ok()).unwrap_or(TaskPriority::Medium),
        complexity: None,
        assignees: Vec::new(),
        technologies,
        depends_on: Vec::new(),
        learnings: None,
        commit_shas: Vec::new(),
        pr_url: None,
        estimated_hours: get_f32("estimated_hours"),
        actual_hours: get_f32("actual_hours"),
        blocked_reason: None,
        assigned_agent: get_str("assigned_agent"),
        claimed_at: parse_dt("claimed_at"),
        heartbeat_at: None,
        last_checkpoint: None,
        started_at: None,
        reviewed_at: None,
        completed_at: None,
        worktree_path: None,
        worktree_branch: None,
        collaborators: Vec::new(),
        handoff_history: Vec::new(),
    }
}

/// Full upsert, used by the dispatcher's `add` operation when creating a
/// brand-new task synchronously.
#[instrument(skip(graph, task))]
pub async fn persist_task(graph: &GraphClient, task: &TaskEntity) -> Result<(), OrchestratorError> {
    let technologies = serde_json::to_string(&task.technologies).unwrap_or_else(|_| "[]".to_string());
    graph
        .execute_write(
            &task.header.organization_id,
            &["id"],
            "MERGE (n:Entity {id: $id}) \
             SET n.entity_type = 'task', n.name = $name, n.description = $description, \
                 n.organization_id = $organization_id, n.project_id = $project_id, n.status = $status, \
                 n.priority = $priority, n.technologies = $technologies, n.assigned_agent = $assigned_agent, \
                 n.claimed_at = $claimed_at, n.created_at = coalesce(n.created_at, $created_at), \
                 n.estimated_hours = $estimated_hours, n.actual_hours = $actual_hours, \
                 n.updated_at = $updated_at \
             RETURN n.id AS id",
            &[
                ("id", serde_json::json!(task.header.id)),
                ("name", serde_json::json!(task.header.name)),
                ("description", serde_json::json!(task.header.description)),
                ("organization_id", serde_json::json!(task.header.organization_id)),
                ("project_id", serde_json::json!(task.project_id)),
                ("status", serde_json::json!(task.status.to_string())),
                ("priority", serde_json::json!(task.priority.to_string())),
                ("technologies", serde_json::json!(technologies)),
                ("assigned_agent", task.assigned_agent.clone().map(|s| serde_json::json!(s)).unwrap_or(JsonValue::Null)),
                ("claimed_at", task.claimed_at.map(|t| serde_json::json!(t.to_rfc3339())).unwrap_or(JsonValue::Null)),
                ("created_at", serde_json::json!(task.header.created_at.to_rfc3339())),
                ("estimated_hours", task.estimated_hours.map(|h| serde_json::json!(h)).unwrap_or(JsonValue::Null)),
                ("actual_hours", task.actual_hours.map(|h| serde_json::json!(h)).unwrap_or(JsonValue::Null)),
                ("updated_at", serde_json::json!(Utc::now().to_rfc3339())),
            ],
        )
        .await
        .map_err(|e| OrchestratorError::Graph(e.to_string()))?;
    Ok(())
}

/// Partial update for the handful of fields the orchestrator and
/// dispatcher mutate without re-reading and rewriting the whole entity.
#[instrument(skip(graph, fields))]
pub async fn update_task_fields(
    graph: &GraphClient,
    organization_id: &str,
    task_id: &str,
    fields: HashMap<&'static str, JsonValue>,
) -> Result<(), OrchestratorError> {
    if fields.is_empty() {
        return Ok(());
    }
    let set_clause: Vec<String> = fields.keys().map(|k| format!("n.{k} = ${k}")).collect();
    let query = format!(
        "MATCH (n:Entity {{id: $id, entity_type: 'task'}}) SET {}, n.updated_at = $updated_at RETURN n.id AS id",
        set_clause.join(", ")
    );
    let mut params: Vec<(&str, JsonValue)> = fields.into_iter().collect();
    params.push(("id", serde_json::json!(task_id)));
    params.push(("updated_at", serde_json::json!(Utc::now().to_rfc3339())));

    graph
        .execute_write(organization_id, &["id"], &query, &params)
        .await
        .map_err(|e| OrchestratorError::Graph(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;

    #[test]
    fn row_to_task_defaults_missing_optional_fields() {
        let mut row: sibyl_graph::GraphRow = StdHashMap::new();
        row.insert("id".to_string(), serde_json::json!("task_1"));
        row.insert("name".to_string(), serde_json::json!("Write docs"));
        row.insert("organization_id".to_string(), serde_json::json!("org_1"));
        let task = row_to_task(&row);
        assert_eq!(task.header.id, "task_1");
        assert_eq!(task.status, TaskStatus::Backlog);
        assert_eq!(task.priority, TaskPriority::Medium);
        assert!(task.technologies.is_empty());
    }
}
