//! `ToolDispatcher` (§4.15, component N): the four externally-visible
//! operations — `search`, `explore`, `add`, `manage` — each resolving a
//! tenant before touching anything underneath.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value as JsonValue;
use sibyl_common::entity::{
    EntityHeader, EpisodeEntity, EpisodeType, KnowledgeEntity, NoteEntity, TaskEntity, TaskPriority, TaskStatus,
};
use sibyl_common::relationship::{Relationship, RelationshipType};
use sibyl_common::task_state;
use sibyl_graph::GraphClient;
use sibyl_lock::LockManager;
use sibyl_queue::{Job, JobQueue, JobType};
use sibyl_retrieval::{DependencyNode, ExploreEngine, ExploreMode, ExploreNode, HybridRetrievalEngine, SearchFilters, SearchHit};
use tracing::{info, instrument, warn};

use crate::errors::OrchestratorError;
use crate::tasks::{self, fetch_task};

const MAX_TITLE_LEN: usize = 200;
const MAX_CONTENT_LEN: usize = 50_000;
const AUTO_LINK_THRESHOLD: f32 = 0.75;
const AUTO_LINK_LIMIT: usize = 5;
const LOCK_WAIT: Duration = Duration::from_secs(10);
const SIMILAR_TASK_LIMIT: usize = 5;
const SUGGEST_KNOWLEDGE_LIMIT: usize = 3;

#[derive(Debug, Clone)]
pub enum AddOutcome {
    Created { id: String },
    Enqueued { id: String, job_id: String },
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ManageResult {
    pub action: String,
    pub entity_id: String,
    pub data: JsonValue,
}

pub struct ToolDispatcher {
    graph: Arc<GraphClient>,
    retrieval: Arc<HybridRetrievalEngine>,
    explore: Arc<ExploreEngine>,
    locks: Arc<LockManager>,
    queue: Arc<JobQueue>,
    organization_id: String,
    auto_link: bool,
}

impl ToolDispatcher {
    pub fn new(
        graph: Arc<GraphClient>,
        retrieval: Arc<HybridRetrievalEngine>,
        explore: Arc<ExploreEngine>,
        locks: Arc<LockManager>,
        queue: Arc<JobQueue>,
        organization_id: impl Into<String>,
    ) -> Self {
        Self { graph, retrieval, explore, locks, queue, organization_id: organization_id.into(), auto_link: true }
    }

    pub fn with_auto_link(mut self, enabled: bool) -> Self {
        self.auto_link = enabled;
        self
    }

    // -------------------------------------------------------------------
    // search
    // -------------------------------------------------------------------

    #[instrument(skip(self, filters))]
    pub async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<SearchHit>, OrchestratorError> {
        Ok(self.retrieval.search(&self.organization_id, query, filters, limit, offset).await?)
    }

    // -------------------------------------------------------------------
    // explore
    // -------------------------------------------------------------------

    #[instrument(skip(self))]
    pub async fn explore(
        &self,
        mode: ExploreMode,
        entity_type_or_id: &str,
        depth: usize,
        limit: usize,
    ) -> Result<Vec<ExploreNode>, OrchestratorError> {
        let nodes = match mode {
            ExploreMode::List => self.explore.list(&self.organization_id, entity_type_or_id, limit).await?,
            ExploreMode::Related => self.explore.related(&self.organization_id, entity_type_or_id, limit).await?,
            ExploreMode::Traverse => self.explore.traverse(&self.organization_id, entity_type_or_id, depth, limit).await?,
            ExploreMode::Dependencies => {
                return Err(OrchestratorError::UnsupportedEntityType(
                    "use explore_dependencies for ExploreMode::Dependencies".to_string(),
                ))
            }
        };
        Ok(nodes)
    }

    #[instrument(skip(self))]
    pub async fn explore_dependencies(&self, task_id: &str) -> Result<Vec<DependencyNode>, OrchestratorError> {
        Ok(self.explore.dependencies(&self.organization_id, task_id).await?)
    }

    // -------------------------------------------------------------------
    // add
    // -------------------------------------------------------------------

    /// Creates a knowledge/note/task entity. `sync = true` creates it
    /// immediately and runs auto-link before returning; `sync = false`
    /// (the default in the source) enqueues a `create_entity` job and
    /// returns the id the entity will eventually have.
    #[instrument(skip(self, content))]
    pub async fn add(
        &self,
        title: &str,
        content: &str,
        entity_type: &str,
        sync: bool,
        project_id: Option<String>,
    ) -> Result<AddOutcome, OrchestratorError> {
        if title.len() > MAX_TITLE_LEN {
            return Err(OrchestratorError::TooLong { field: "title", max: MAX_TITLE_LEN });
        }
        if content.len() > MAX_CONTENT_LEN {
            return Err(OrchestratorError::TooLong { field: "content", max: MAX_CONTENT_LEN });
        }

        let id = sibyl_common::ids::entity_id(entity_type, &[&self.organization_id, title]);

        if !sync {
            let payload = serde_json::json!({
                "id": id,
                "title": title,
                "content": content,
                "entity_type": entity_type,
                "project_id": project_id,
                "auto_link": self.auto_link,
            });
            let job = Job::new(self.organization_id.clone(), JobType::CreateEntity, payload, 5);
            let job_id = self.queue.enqueue(&job).await?;
            return Ok(AddOutcome::Enqueued { id, job_id });
        }

        self.create_entity_sync(&id, title, content, entity_type, project_id).await?;

        if self.auto_link {
            if let Err(err) = self.auto_link_entity(&id, title, content).await {
                warn!(entity_id = %id, error = %err, "auto-link pass failed after synchronous add");
            }
        }

        Ok(AddOutcome::Created { id })
    }

    /// Materializes a `create_entity` job payload produced by `add`'s
    /// async path, run by the background worker rather than the request
    /// path. Payload shape matches exactly what `add` enqueues.
    #[instrument(skip(self, payload))]
    pub async fn process_create_entity_job(&self, payload: &JsonValue) -> Result<(), OrchestratorError> {
        let id = payload.get("id").and_then(JsonValue::as_str).unwrap_or_default();
        let title = payload.get("title").and_then(JsonValue::as_str).unwrap_or_default();
        let content = payload.get("content").and_then(JsonValue::as_str).unwrap_or_default();
        let entity_type = payload.get("entity_type").and_then(JsonValue::as_str).unwrap_or_default();
        let project_id = payload.get("project_id").and_then(JsonValue::as_str).map(str::to_string);
        let auto_link = payload.get("auto_link").and_then(JsonValue::as_bool).unwrap_or(false);

        self.create_entity_sync(id, title, content, entity_type, project_id).await?;

        if auto_link {
            if let Err(err) = self.auto_link_entity(id, title, content).await {
                warn!(entity_id = %id, error = %err, "auto-link pass failed for queued entity");
            }
        }
        Ok(())
    }

    async fn create_entity_sync(
        &self,
        id: &str,
        title: &str,
        content: &str,
        entity_type: &str,
        project_id: Option<String>,
    ) -> Result<(), OrchestratorError> {
        match entity_type {
            "pattern" | "rule" | "template" | "topic" | "convention" => {
                let mut header = EntityHeader::new(id, title, self.organization_id.clone());
                header.content = content.to_string();
                header.project_id = project_id;
                let entity = KnowledgeEntity { header, category: None, languages: Vec::new(), severity: None };
                persist_knowledge_entity(&self.graph, entity_type, &entity).await
            }
            "note" => {
                let mut header = EntityHeader::new(id, title, self.organization_id.clone());
                header.content = content.to_string();
                header.project_id = project_id.clone();
                let entity = NoteEntity { header, task_id: project_id.unwrap_or_default(), author: "dispatcher".to_string() };
                persist_note_entity(&self.graph, &entity).await
            }
            "task" => {
                let mut header = EntityHeader::new(id, title, self.organization_id.clone());
                header.content = content.to_string();
                let task = TaskEntity {
                    project_id: project_id.clone().unwrap_or_default(),
                    header,
                    epic_id: None,
                    status: TaskStatus::Backlog,
                    priority: TaskPriority::Medium,
                    complexity: None,
                    assignees: Vec::new(),
                    technologies: Vec::new(),
                    depends_on: Vec::new(),
                    learnings: None,
                    commit_shas: Vec::new(),
                    pr_url: None,
                    estimated_hours: None,
                    actual_hours: None,
                    blocked_reason: None,
                    assigned_agent: None,
                    claimed_at: None,
                    heartbeat_at: None,
                    last_checkpoint: None,
                    started_at: None,
                    reviewed_at: None,
                    completed_at: None,
                    worktree_path: None,
                    worktree_branch: None,
                    collaborators: Vec::new(),
                    handoff_history: Vec::new(),
                };
                tasks::persist_task(&self.graph, &task).await
            }
            other => Err(OrchestratorError::UnsupportedEntityType(other.to_string())),
        }
    }

    /// Runs a similarity search for the newly created entity and writes
    /// `RELATED_TO` edges (flagged `auto_linked=true`) to any sufficiently
    /// close match (§4.15).
    #[instrument(skip(self, content))]
    async fn auto_link_entity(&self, id: &str, title: &str, content: &str) -> Result<(), OrchestratorError> {
        let query = format!("{title} {content}");
        let filters = SearchFilters::default();
        let hits = self.retrieval.search(&self.organization_id, &query, &filters, AUTO_LINK_LIMIT, 0).await?;

        for hit in hits {
            if hit.id == id || hit.score < AUTO_LINK_THRESHOLD {
                continue;
            }
            let relationship = Relationship::new(id, &hit.id, RelationshipType::RelatedTo, self.organization_id.clone())
                .auto_linked();
            persist_relationship(&self.graph, &relationship).await?;
        }
        Ok(())
    }

    // -------------------------------------------------------------------
    // manage
    // -------------------------------------------------------------------

    /// Routes a `manage` call to task-workflow transitions, source
    /// operations, analysis, or admin, per §4.15. Task transitions run
    /// under the per-entity lock.
    #[instrument(skip(self, data))]
    pub async fn manage(&self, action: &str, entity_id: &str, data: JsonValue) -> Result<ManageResult, OrchestratorError> {
        if let Some(to) = task_action_target(action) {
            return self.manage_task_transition(entity_id, to, action, data).await;
        }

        match action {
            "crawl" => self.manage_enqueue(entity_id, JobType::CrawlSource, data).await,
            "sync" => self.manage_enqueue(entity_id, JobType::SyncSource, data).await,
            "refresh" => self.manage_enqueue(entity_id, JobType::SyncAll, data).await,
            "link_graph" => self.manage_enqueue(entity_id, JobType::LinkGraph, data).await,
            "detect_cycles" => self.manage_detect_cycles(entity_id).await,
            "estimate" => self.manage_estimate(entity_id).await,
            "suggest" => self.manage_suggest(entity_id).await,
            "prioritize" => {
                Ok(ManageResult { action: action.to_string(), entity_id: entity_id.to_string(), data: JsonValue::Null })
            }
            "health" => self.manage_health().await,
            "stats" => self.manage_stats().await,
            "rebuild_index" => self.manage_rebuild_index().await,
            other => Err(OrchestratorError::UnknownAction(other.to_string())),
        }
    }

    async fn manage_task_transition(
        &self,
        task_id: &str,
        to: TaskStatus,
        action: &str,
        data: JsonValue,
    ) -> Result<ManageResult, OrchestratorError> {
        let graph = self.graph.clone();
        let organization_id = self.organization_id.clone();
        let task_id_owned = task_id.to_string();
        let action_owned = action.to_string();

        let outcome: Result<ManageResult, OrchestratorError> = self
            .locks
            .with_lock(&self.organization_id, task_id, Some(LOCK_WAIT), move || {
                let graph = graph.clone();
                let organization_id = organization_id.clone();
                let task_id = task_id_owned.clone();
                let action = action_owned.clone();
                async move {
                    let task = fetch_task(&graph, &organization_id, &task_id)
                        .await?
                        .ok_or_else(|| OrchestratorError::TaskNotFound(task_id.clone()))?;

                    task_state::validate_transition(&task_id, task.status, to)?;

                    let mut fields: HashMap<&'static str, JsonValue> = HashMap::new();
                    fields.insert("status", serde_json::json!(to.to_string()));
                    let now = chrono::Utc::now().to_rfc3339();
                    match to {
                        TaskStatus::Doing if task.started_at.is_none() => {
                            fields.insert("started_at", serde_json::json!(now));
                        }
                        TaskStatus::Blocked => {
                            if let Some(reason) = data.get("reason").and_then(JsonValue::as_str) {
                                fields.insert("blocked_reason", serde_json::json!(reason));
                            }
                        }
                        TaskStatus::Review => {
                            fields.insert("reviewed_at", serde_json::json!(now));
                        }
                        TaskStatus::Done => {
                            fields.insert("completed_at", serde_json::json!(now));
                        }
                        _ => {}
                    }
                    tasks::update_task_fields(&graph, &organization_id, &task_id, fields).await?;

                    let mut result_data = serde_json::json!({ "from": task.status.to_string(), "to": to.to_string() });

                    if action == "complete_task" {
                        if let Some(learnings) = data.get("learnings").and_then(JsonValue::as_str) {
                            let episode_id = create_completion_episode(&graph, &organization_id, &task_id, learnings).await?;
                            if let JsonValue::Object(map) = &mut result_data {
                                map.insert("episode_id".to_string(), serde_json::json!(episode_id));
                            }
                        }
                    }

                    Ok(ManageResult { action, entity_id: task_id, data: result_data })
                }
            })
            .await?;

        outcome
    }

    async fn manage_enqueue(&self, entity_id: &str, job_type: JobType, data: JsonValue) -> Result<ManageResult, OrchestratorError> {
        let mut payload = data;
        if let JsonValue::Object(map) = &mut payload {
            map.insert("entity_id".to_string(), serde_json::json!(entity_id));
        }
        let job = Job::new(self.organization_id.clone(), job_type, payload, 5);
        let job_id = self.queue.enqueue(&job).await?;
        Ok(ManageResult {
            action: job_type.to_string(),
            entity_id: entity_id.to_string(),
            data: serde_json::json!({ "job_id": job_id }),
        })
    }

    async fn manage_detect_cycles(&self, task_id: &str) -> Result<ManageResult, OrchestratorError> {
        match self.explore.dependencies(&self.organization_id, task_id).await {
            Ok(nodes) => Ok(ManageResult {
                action: "detect_cycles".to_string(),
                entity_id: task_id.to_string(),
                data: serde_json::json!({ "cyclic": false, "order": nodes.len() }),
            }),
            Err(sibyl_retrieval::RetrievalError::DependencyCycle { from_id, to_id }) => Ok(ManageResult {
                action: "detect_cycles".to_string(),
                entity_id: task_id.to_string(),
                data: serde_json::json!({ "cyclic": true, "from_id": from_id, "to_id": to_id }),
            }),
            Err(err) => Err(err.into()),
        }
    }

    /// Estimates remaining effort from a similarity-weighted average of
    /// recorded `actual_hours` on the most similar other tasks.
    async fn manage_estimate(&self, task_id: &str) -> Result<ManageResult, OrchestratorError> {
        let task = fetch_task(&self.graph, &self.organization_id, task_id)
            .await?
            .ok_or_else(|| OrchestratorError::TaskNotFound(task_id.to_string()))?;

        let query = format!("{} {}", task.header.name, task.header.description);
        let filters = SearchFilters { entity_types: vec!["task".to_string()], ..SearchFilters::default() };
        let hits = self.retrieval.search(&self.organization_id, &query, &filters, SIMILAR_TASK_LIMIT + 1, 0).await?;

        let mut similar_tasks = Vec::new();
        let mut weighted_sum = 0.0_f64;
        let mut weight_total = 0.0_f64;
        let mut with_hours = 0usize;
        for hit in hits.into_iter().filter(|h| h.id != task_id).take(SIMILAR_TASK_LIMIT) {
            let Some(candidate) = fetch_task(&self.graph, &self.organization_id, &hit.id).await? else { continue };
            if let Some(actual_hours) = candidate.actual_hours {
                weighted_sum += actual_hours as f64 * hit.score as f64;
                weight_total += hit.score as f64;
                with_hours += 1;
            }
            similar_tasks.push(serde_json::json!({
                "task_id": hit.id,
                "score": hit.score,
                "actual_hours": candidate.actual_hours,
            }));
        }

        let data = if similar_tasks.is_empty() {
            serde_json::json!({
                "estimated_hours": JsonValue::Null,
                "confidence": 0.0,
                "reason": "No similar tasks found to estimate from",
                "based_on_tasks": 0,
                "similar_tasks": similar_tasks,
            })
        } else if weight_total <= 0.0 {
            serde_json::json!({
                "estimated_hours": JsonValue::Null,
                "confidence": 0.0,
                "reason": "Similar tasks found but none have recorded time tracking",
                "based_on_tasks": 0,
                "similar_tasks": similar_tasks,
            })
        } else {
            let estimated_hours = weighted_sum / weight_total;
            let confidence = (weight_total / with_hours as f64).min(1.0);
            serde_json::json!({
                "estimated_hours": estimated_hours,
                "confidence": confidence,
                "reason": format!("Weighted average of {with_hours} similar task(s) with recorded hours"),
                "based_on_tasks": with_hours,
                "similar_tasks": similar_tasks,
            })
        };

        Ok(ManageResult { action: "estimate".to_string(), entity_id: task_id.to_string(), data })
    }

    /// Searches five knowledge categories relevant to a task and returns
    /// `(id, score)` suggestions for each, capped per category.
    async fn manage_suggest(&self, task_id: &str) -> Result<ManageResult, OrchestratorError> {
        let task = fetch_task(&self.graph, &self.organization_id, task_id)
            .await?
            .ok_or_else(|| OrchestratorError::TaskNotFound(task_id.to_string()))?;
        let query = format!("{} {}", task.header.name, task.header.description);

        let categories: [(&str, SearchFilters); 5] = [
            ("patterns", SearchFilters { entity_types: vec!["pattern".to_string()], ..SearchFilters::default() }),
            ("rules", SearchFilters { entity_types: vec!["rule".to_string()], ..SearchFilters::default() }),
            ("templates", SearchFilters { entity_types: vec!["template".to_string()], ..SearchFilters::default() }),
            ("past_learnings", SearchFilters { entity_types: vec!["episode".to_string()], ..SearchFilters::default() }),
            (
                "error_patterns",
                SearchFilters {
                    entity_types: vec!["convention".to_string()],
                    category_substring: Some("error".to_string()),
                    ..SearchFilters::default()
                },
            ),
        ];

        let mut data = serde_json::Map::new();
        for (key, filters) in categories {
            let hits = self.retrieval.search(&self.organization_id, &query, &filters, SUGGEST_KNOWLEDGE_LIMIT, 0).await?;
            let suggestions: Vec<JsonValue> = hits.into_iter().map(|hit| serde_json::json!([hit.id, hit.score])).collect();
            data.insert(key.to_string(), JsonValue::Array(suggestions));
        }

        Ok(ManageResult { action: "suggest".to_string(), entity_id: task_id.to_string(), data: JsonValue::Object(data) })
    }

    async fn manage_health(&self) -> Result<ManageResult, OrchestratorError> {
        Ok(ManageResult {
            action: "health".to_string(),
            entity_id: self.organization_id.clone(),
            data: serde_json::json!({ "status": "ok" }),
        })
    }

    async fn manage_stats(&self) -> Result<ManageResult, OrchestratorError> {
        let rows = self
            .graph
            .execute_read(
                &self.organization_id,
                &["entity_type", "count"],
                "MATCH (n:Entity) RETURN n.entity_type AS entity_type, count(n) AS count",
                &[],
            )
            .await
            .map_err(|e| OrchestratorError::Graph(e.to_string()))?;

        let mut by_type = serde_json::Map::new();
        for row in rows {
            if let (Some(entity_type), Some(count)) =
                (row.get("entity_type").and_then(JsonValue::as_str), row.get("count").and_then(JsonValue::as_u64))
            {
                by_type.insert(entity_type.to_string(), serde_json::json!(count));
            }
        }
        Ok(ManageResult {
            action: "stats".to_string(),
            entity_id: self.organization_id.clone(),
            data: JsonValue::Object(by_type),
        })
    }

    async fn manage_rebuild_index(&self) -> Result<ManageResult, OrchestratorError> {
        self.graph.ensure_indexes(&self.organization_id).await.map_err(|e| OrchestratorError::Graph(e.to_string()))?;
        info!(organization_id = %self.organization_id, "rebuilt indexes");
        Ok(ManageResult {
            action: "rebuild_index".to_string(),
            entity_id: self.organization_id.clone(),
            data: JsonValue::Null,
        })
    }
}

/// Maps a `manage` action name onto the task-status target it transitions
/// to, per the named lifecycle verbs in §4.15 (`start_task`, `block_task`,
/// ...), not the raw `TaskStatus` variants.
fn task_action_target(action: &str) -> Option<TaskStatus> {
    match action {
        "start_task" => Some(TaskStatus::Doing),
        "block_task" => Some(TaskStatus::Blocked),
        "unblock_task" => Some(TaskStatus::Doing),
        "submit_review" => Some(TaskStatus::Review),
        "complete_task" => Some(TaskStatus::Done),
        "archive_task" => Some(TaskStatus::Archived),
        "move_to_todo" => Some(TaskStatus::Todo),
        _ => None,
    }
}

/// Records a `TaskCompletion` episode carrying the agent's learnings, linked
/// back to the task with a `DERIVED_FROM` edge (§4.15 scenario 3).
async fn create_completion_episode(
    graph: &GraphClient,
    organization_id: &str,
    task_id: &str,
    learnings: &str,
) -> Result<String, OrchestratorError> {
    let now = chrono::Utc::now();
    let id = sibyl_common::ids::entity_id("episode", &[organization_id, task_id, &now.to_rfc3339()]);
    let mut header = EntityHeader::new(id.clone(), format!("Completion: {task_id}"), organization_id.to_string());
    header.content = learnings.to_string();
    let episode = EpisodeEntity { header, episode_type: EpisodeType::TaskCompletion, valid_from: now };

    graph
        .execute_write(
            organization_id,
            &["id"],
            "MERGE (n:Entity {id: $id}) \
             SET n.entity_type = 'episode', n.name = $name, n.content = $content, \
                 n.organization_id = $organization_id, n.episode_type = $episode_type, n.valid_from = $valid_from, \
                 n.created_at = coalesce(n.created_at, $created_at), n.updated_at = $updated_at \
             RETURN n.id AS id",
            &[
                ("id", serde_json::json!(episode.header.id)),
                ("name", serde_json::json!(episode.header.name)),
                ("content", serde_json::json!(episode.header.content)),
                ("organization_id", serde_json::json!(episode.header.organization_id)),
                ("episode_type", serde_json::json!(episode.episode_type.to_string())),
                ("valid_from", serde_json::json!(episode.valid_from.to_rfc3339())),
                ("created_at", serde_json::json!(episode.header.created_at.to_rfc3339())),
                ("updated_at", serde_json::json!(now.to_rfc3339())),
            ],
        )
        .await
        .map_err(|e| OrchestratorError::Graph(e.to_string()))?;

    let relationship = Relationship::new(&episode.header.id, task_id, RelationshipType::DerivedFrom, organization_id.to_string());
    persist_relationship(graph, &relationship).await?;

    Ok(id)
}

async fn persist_knowledge_entity(graph: &GraphClient, entity_type: &str, entity: &KnowledgeEntity) -> Result<(), OrchestratorError> {
    graph
        .execute_write(
            &entity.header.organization_id,
            &["id"],
            "MERGE (n:Entity {id: $id}) \
             SET n.entity_type = $entity_type, n.name = $name, n.content = $content, \
                 n.organization_id = $organization_id, n.project_id = $project_id, n.category = $category, \
                 n.languages = $languages, n.severity = $severity, \
                 n.created_at = coalesce(n.created_at, $created_at), n.updated_at = $updated_at \
             RETURN n.id AS id",
            &[
                ("id", serde_json::json!(entity.header.id)),
                ("entity_type", serde_json::json!(entity_type)),
                ("name", serde_json::json!(entity.header.name)),
                ("content", serde_json::json!(entity.header.content)),
                ("organization_id", serde_json::json!(entity.header.organization_id)),
                ("project_id", entity.header.project_id.clone().map(|s| serde_json::json!(s)).unwrap_or(JsonValue::Null)),
                ("category", entity.category.clone().map(|s| serde_json::json!(s)).unwrap_or(JsonValue::Null)),
                ("languages", serde_json::json!(entity.languages)),
                ("severity", entity.severity.map(|s| serde_json::json!(s.to_string())).unwrap_or(JsonValue::Null)),
                ("created_at", serde_json::json!(entity.header.created_at.to_rfc3339())),
                ("updated_at", serde_json::json!(chrono::Utc::now().to_rfc3339())),
            ],
        )
        .await
        .map_err(|e| OrchestratorError::Graph(e.to_string()))?;
    Ok(())
}

async fn persist_note_entity(graph: &GraphClient, entity: &NoteEntity) -> Result<(), OrchestratorError> {
    graph
        .execute_write(
            &entity.header.organization_id,
            &["id"],
            "MERGE (n:Entity {id: $id}) \
             SET n.entity_type = 'note', n.name = $name, n.content = $content, \
                 n.organization_id = $organization_id, n.task_id = $task_id, n.author = $author, \
                 n.created_at = coalesce(n.created_at, $created_at), n.updated_at = $updated_at \
             RETURN n.id AS id",
            &[
                ("id", serde_json::json!(entity.header.id)),
                ("name", serde_json::json!(entity.header.name)),
                ("content", serde_json::json!(entity.header.content)),
                ("organization_id", serde_json::json!(entity.header.organization_id)),
                ("task_id", serde_json::json!(entity.task_id)),
                ("author", serde_json::json!(entity.author)),
                ("created_at", serde_json::json!(entity.header.created_at.to_rfc3339())),
                ("updated_at", serde_json::json!(chrono::Utc::now().to_rfc3339())),
            ],
        )
        .await
        .map_err(|e| OrchestratorError::Graph(e.to_string()))?;
    Ok(())
}

async fn persist_relationship(graph: &GraphClient, relationship: &Relationship) -> Result<(), OrchestratorError> {
    graph
        .execute_write(
            &relationship.group_id,
            &["id"],
            "MATCH (a:Entity {id: $from_id}), (b:Entity {id: $to_id}) \
             MERGE (a)-[r:RELATIONSHIP {id: $id}]->(b) \
             SET r.relationship_type = $relationship_type, r.weight = $weight, r.metadata = $metadata, \
                 r.group_id = $group_id \
             RETURN r.id AS id",
            &[
                ("id", serde_json::json!(relationship.id())),
                ("from_id", serde_json::json!(relationship.from_id)),
                ("to_id", serde_json::json!(relationship.to_id)),
                ("relationship_type", serde_json::json!(relationship.relationship_type.to_string())),
                ("weight", serde_json::json!(relationship.weight)),
                ("metadata", serde_json::json!(relationship.metadata)),
                ("group_id", serde_json::json!(relationship.group_id)),
            ],
        )
        .await
        .map_err(|e| OrchestratorError::Graph(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_rejects_titles_over_the_length_limit() {
        let err = OrchestratorError::TooLong { field: "title", max: MAX_TITLE_LEN };
        assert!(matches!(err, OrchestratorError::TooLong { field: "title", max: 200 }));
    }
}
