//! `AgentOrchestrator` (§4.13, component L): the central per-tenant/project
//! coordinator. Unlike `AgentRunner`, which drives one agent's session, the
//! orchestrator tracks every agent for a project, routes messages between
//! them, distributes tasks, and recovers state across restarts.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sibyl_agent::{
    compose_hooks, sibyl_hooks, AgentInstance, AgentRunner, AgentSpawnSource, ApprovalService, Checkpoint,
    CheckpointManager, HookRegistry, SpawnOptions,
};
use sibyl_common::entity::{AgentRecord, AgentStatus, AgentType, TaskEntity, TaskStatus};
use sibyl_graph::GraphClient;
use sibyl_retrieval::HybridRetrievalEngine;
use sibyl_worktree::WorktreeManager;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use crate::errors::OrchestratorError;
use crate::messages::{AgentMessage, MessageBus};
use crate::tasks::{fetch_task, update_task_fields};

/// Default `HEALTH_CHECK_INTERVAL` (§4.13), matching
/// `SibylConfig::health_check_interval_ms`'s default of 60s.
pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(60);
/// Default `STALE_HEARTBEAT_THRESHOLD` (§4.13), matching
/// `SibylConfig::stale_heartbeat_threshold_ms`'s default of 120s.
pub const DEFAULT_STALE_HEARTBEAT_THRESHOLD: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, serde::Serialize)]
pub struct AgentStatusDetail {
    pub id: String,
    pub status: AgentStatus,
    pub agent_type: AgentType,
    pub is_active: bool,
    pub task_id: Option<String>,
    pub tokens_used: u64,
    pub cost_usd: f64,
    pub worktree_path: Option<String>,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct Workload {
    pub total_agents: usize,
    pub active_agents: usize,
    pub by_status: HashMap<String, usize>,
    pub by_type: HashMap<String, usize>,
}

pub struct AgentOrchestrator {
    graph: Arc<GraphClient>,
    retrieval: Arc<HybridRetrievalEngine>,
    worktree_manager: Arc<WorktreeManager>,
    runner: Arc<AgentRunner>,
    checkpoints: CheckpointManager,
    organization_id: String,
    project_id: String,
    running: std::sync::atomic::AtomicBool,
    health_check_task: Mutex<Option<JoinHandle<()>>>,
    message_bus: Arc<MessageBus>,
    approvals: RwLock<HashMap<String, Arc<ApprovalService>>>,
    health_check_interval: Duration,
    stale_heartbeat_threshold: Duration,
}

impl AgentOrchestrator {
    pub fn new(
        graph: Arc<GraphClient>,
        runtime: Arc<dyn sibyl_agent::AgentRuntime>,
        retrieval: Arc<HybridRetrievalEngine>,
        organization_id: impl Into<String>,
        project_id: impl Into<String>,
        repo_path: impl Into<PathBuf>,
        worktree_base: Option<PathBuf>,
    ) -> Self {
        let organization_id = organization_id.into();
        let project_id = project_id.into();
        let worktree_manager = Arc::new(WorktreeManager::new(graph.clone(), repo_path.into(), worktree_base));
        let runner = Arc::new(AgentRunner::new(
            graph.clone(),
            runtime,
            worktree_manager.clone(),
            organization_id.clone(),
            project_id.clone(),
        ));
        let checkpoints = CheckpointManager::new(graph.clone(), organization_id.clone());
        Self {
            graph,
            retrieval,
            worktree_manager,
            runner,
            checkpoints,
            organization_id,
            project_id,
            running: std::sync::atomic::AtomicBool::new(false),
            health_check_task: Mutex::new(None),
            message_bus: Arc::new(MessageBus::new()),
            approvals: RwLock::new(HashMap::new()),
            health_check_interval: DEFAULT_HEALTH_CHECK_INTERVAL,
            stale_heartbeat_threshold: DEFAULT_STALE_HEARTBEAT_THRESHOLD,
        }
    }

    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    pub fn with_stale_heartbeat_threshold(mut self, threshold: Duration) -> Self {
        self.stale_heartbeat_threshold = threshold;
        self
    }

    // -------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------

    #[instrument(skip(self))]
    pub async fn start(self: &Arc<Self>) -> Result<(), OrchestratorError> {
        info!(project_id = %self.project_id, "starting orchestrator");
        self.running.store(true, std::sync::atomic::Ordering::SeqCst);

        self.recover_agents().await;

        let this = self.clone();
        let handle = tokio::spawn(async move { this.health_check_loop().await });
        *self.health_check_task.lock().await = Some(handle);

        info!("orchestrator started");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn stop(&self) -> Result<(), OrchestratorError> {
        info!("stopping orchestrator");
        self.running.store(false, std::sync::atomic::Ordering::SeqCst);

        if let Some(handle) = self.health_check_task.lock().await.take() {
            handle.abort();
        }

        for instance in self.runner.list_active().await {
            if let Err(err) = instance.checkpoint(&self.checkpoints, "orchestrator_shutdown").await {
                warn!(agent_id = instance.id(), error = %err, "failed to checkpoint agent during shutdown");
            }
            if let Err(err) = instance.stop("orchestrator_shutdown").await {
                warn!(agent_id = instance.id(), error = %err, "failed to stop agent during shutdown");
            }
        }

        self.worktree_manager.cleanup_orphaned(&self.organization_id, 24).await?;

        info!("orchestrator stopped");
        Ok(())
    }

    // -------------------------------------------------------------------
    // Agent lifecycle
    // -------------------------------------------------------------------

    #[instrument(skip(self, prompt))]
    pub async fn spawn_agent(
        &self,
        prompt: &str,
        agent_type: AgentType,
        task: Option<TaskEntity>,
        spawn_source: AgentSpawnSource,
    ) -> Result<Arc<AgentInstance>, OrchestratorError> {
        let agent_id = self.runner.reserve_agent_id();

        let approvals = Arc::new(ApprovalService::new(
            self.graph.clone(),
            self.organization_id.clone(),
            self.project_id.clone(),
            agent_id.clone(),
            task.as_ref().map(|t| t.header.id.clone()),
        ));
        let (sibyl_registry, _tracker) = sibyl_hooks(self.retrieval.clone(), self.organization_id.clone());
        let hooks = compose_hooks(approvals.hook_registry(), sibyl_registry);

        let options = SpawnOptions {
            agent_type,
            task,
            spawn_source,
            create_worktree: true,
            custom_instructions: None,
            base_ref: "HEAD".to_string(),
            hooks,
            agent_id: Some(agent_id),
        };
        let instance = self.runner.spawn(prompt, options).await?;

        self.message_bus.create_queue(instance.id());
        self.approvals.write().await.insert(instance.id().to_string(), approvals);

        info!(agent_id = instance.id(), "orchestrator spawned agent");
        Ok(instance)
    }

    #[instrument(skip(self, task))]
    pub async fn spawn_for_task(
        &self,
        task: TaskEntity,
        agent_type: Option<AgentType>,
    ) -> Result<Arc<AgentInstance>, OrchestratorError> {
        let agent_type = agent_type.unwrap_or_else(|| select_agent_type_for_task(&task));
        let prompt = format!("Please work on this task:\n\n{}\n\n{}", task.header.name, task.header.description);
        let task_id = task.header.id.clone();

        let instance = self.spawn_agent(&prompt, agent_type, Some(task), AgentSpawnSource::Orchestrator).await?;

        let mut fields = HashMap::new();
        fields.insert("assigned_agent", serde_json::json!(instance.id()));
        fields.insert("claimed_at", serde_json::json!(Utc::now().to_rfc3339()));
        fields.insert("status", serde_json::json!(TaskStatus::Doing.to_string()));
        update_task_fields(&self.graph, &self.organization_id, &task_id, fields).await?;

        Ok(instance)
    }

    #[instrument(skip(self))]
    pub async fn terminate_agent(
        &self,
        agent_id: &str,
        reason: &str,
        checkpoint: bool,
    ) -> Result<bool, OrchestratorError> {
        let Some(instance) = self.runner.get_agent(agent_id).await else {
            return Ok(false);
        };

        if checkpoint {
            if let Err(err) = instance.checkpoint(&self.checkpoints, &format!("terminated: {reason}")).await {
                warn!(agent_id, error = %err, "failed to checkpoint agent before termination");
            }
        }

        if let Some(approvals) = self.approvals.write().await.remove(agent_id) {
            approvals.cancel_all(reason).await;
        }
        self.message_bus.remove_queue(agent_id);

        Ok(self.runner.stop_agent(agent_id, reason).await?)
    }

    #[instrument(skip(self))]
    pub async fn pause_agent(&self, agent_id: &str, reason: &str) -> Result<bool, OrchestratorError> {
        let Some(instance) = self.runner.get_agent(agent_id).await else {
            return Ok(false);
        };
        instance.checkpoint(&self.checkpoints, &format!("paused: {reason}")).await?;
        instance.pause(reason).await?;
        Ok(true)
    }

    #[instrument(skip(self, prompt))]
    pub async fn resume_agent(
        &self,
        agent_id: &str,
        prompt: &str,
    ) -> Result<Option<Arc<AgentInstance>>, OrchestratorError> {
        let Some(checkpoint) = self.checkpoints.get_latest(agent_id).await? else {
            warn!(agent_id, "no checkpoint found; cannot resume");
            return Ok(None);
        };

        let approvals = Arc::new(ApprovalService::new(
            self.graph.clone(),
            self.organization_id.clone(),
            self.project_id.clone(),
            agent_id.to_string(),
            checkpoint.task_id.clone(),
        ));
        let (sibyl_registry, _tracker) = sibyl_hooks(self.retrieval.clone(), self.organization_id.clone());
        let hooks = compose_hooks(approvals.hook_registry(), sibyl_registry);

        let instance = self.runner.resume_from_checkpoint(&checkpoint, prompt, hooks).await?;
        self.message_bus.create_queue(instance.id());
        self.approvals.write().await.insert(instance.id().to_string(), approvals);
        Ok(Some(instance))
    }

    // -------------------------------------------------------------------
    // Registry
    // -------------------------------------------------------------------

    #[instrument(skip(self))]
    pub async fn list_agents(
        &self,
        status: Option<AgentStatus>,
        agent_type: Option<AgentType>,
        limit: usize,
    ) -> Result<Vec<AgentRecord>, OrchestratorError> {
        let rows = self
            .graph
            .execute_read(
                &self.organization_id,
                &["id", "name", "project_id", "agent_type", "status", "task_id", "last_heartbeat"],
                "MATCH (n:Entity {entity_type: 'agent', project_id: $project_id}) \
                 RETURN n.id AS id, n.name AS name, n.project_id AS project_id, n.agent_type AS agent_type, \
                        n.status AS status, n.task_id AS task_id, n.last_heartbeat AS last_heartbeat \
                 LIMIT $limit",
                &[("project_id", serde_json::json!(self.project_id)), ("limit", serde_json::json!((limit * 2) as u64))],
            )
            .await
            .map_err(|e| OrchestratorError::Graph(e.to_string()))?;

        let mut agents: Vec<AgentRecord> = Vec::new();
        for row in rows {
            let get_str = |key: &str| row.get(key).and_then(|v| v.as_str()).map(str::to_string);
            let Some(id) = get_str("id") else { continue };
            let record_status: AgentStatus = get_str("status").and_then(|s| s.parse().ok()).unwrap_or(AgentStatus::Initializing);
            let record_type: AgentType = get_str("agent_type").and_then(|s| s.parse().ok()).unwrap_or_default();
            if let Some(want) = status {
                if record_status != want {
                    continue;
                }
            }
            if let Some(want) = agent_type {
                if record_type != want {
                    continue;
                }
            }
            let mut header = sibyl_common::entity::EntityHeader::new(id, get_str("name").unwrap_or_default(), self.organization_id.clone());
            header.project_id = get_str("project_id");
            agents.push(AgentRecord {
                header,
                agent_type: record_type,
                status: record_status,
                spawn_source: String::new(),
                session_id: None,
                tokens_used: 0,
                cost_usd: 0.0,
                started_at: None,
                completed_at: None,
                last_heartbeat: get_str("last_heartbeat").and_then(|s| chrono::DateTime::parse_from_rfc3339(&s).ok()).map(|dt| dt.with_timezone(&Utc)),
                worktree_path: None,
                worktree_branch: None,
                error_message: None,
                task_id: get_str("task_id"),
            });
            if agents.len() >= limit {
                break;
            }
        }
        Ok(agents)
    }

    #[instrument(skip(self))]
    pub async fn get_agent_status(&self, agent_id: &str) -> Result<AgentStatusDetail, OrchestratorError> {
        let instance = self.runner.get_agent(agent_id).await;
        let record = match &instance {
            Some(instance) => instance.record().await,
            None => {
                let agents = self.list_agents(None, None, 500).await?;
                agents
                    .into_iter()
                    .find(|a| a.header.id == agent_id)
                    .ok_or_else(|| OrchestratorError::AgentNotFound(agent_id.to_string()))?
            }
        };

        Ok(AgentStatusDetail {
            id: record.header.id.clone(),
            status: record.status,
            agent_type: record.agent_type,
            is_active: instance.is_some(),
            task_id: record.task_id.clone(),
            tokens_used: record.tokens_used,
            cost_usd: record.cost_usd,
            worktree_path: record.worktree_path.clone(),
            session_id: match &instance {
                Some(instance) => instance.session_id().await,
                None => record.session_id.clone(),
            },
        })
    }

    // -------------------------------------------------------------------
    // Task distribution
    // -------------------------------------------------------------------

    #[instrument(skip(self, task))]
    pub async fn assign_task(&self, task: TaskEntity) -> Result<Arc<AgentInstance>, OrchestratorError> {
        // An idle agent of the preferred type could in principle be
        // reassigned here; we always spawn fresh so each agent keeps
        // task-specific context, matching the resolved design choice.
        self.spawn_for_task(task, None).await
    }

    #[instrument(skip(self))]
    pub async fn unassign_task(&self, task_id: &str) -> Result<bool, OrchestratorError> {
        let Some(task) = fetch_task(&self.graph, &self.organization_id, task_id).await? else {
            return Ok(false);
        };

        if let Some(agent_id) = &task.assigned_agent {
            self.terminate_agent(agent_id, "task_unassigned", true).await?;
        }

        let mut fields = HashMap::new();
        fields.insert("assigned_agent", serde_json::Value::Null);
        fields.insert("claimed_at", serde_json::Value::Null);
        fields.insert("status", serde_json::json!(TaskStatus::Todo.to_string()));
        update_task_fields(&self.graph, &self.organization_id, task_id, fields).await?;
        Ok(true)
    }

    #[instrument(skip(self))]
    pub async fn get_workload(&self) -> Result<Workload, OrchestratorError> {
        let agents = self.list_agents(None, None, 500).await?;
        let mut workload = Workload { total_agents: agents.len(), ..Default::default() };
        for agent in &agents {
            *workload.by_status.entry(agent.status.to_string()).or_insert(0) += 1;
            *workload.by_type.entry(agent.agent_type.to_string()).or_insert(0) += 1;
        }
        workload.active_agents = self.runner.list_active().await.len();
        Ok(workload)
    }

    // -------------------------------------------------------------------
    // Inter-agent messaging
    // -------------------------------------------------------------------

    pub async fn send_message(
        &self,
        from_agent: &str,
        to_agent: &str,
        content: &str,
        message_type: &str,
        metadata: HashMap<String, serde_json::Value>,
    ) -> bool {
        self.message_bus.send(AgentMessage {
            from_agent: from_agent.to_string(),
            to_agent: to_agent.to_string(),
            content: content.to_string(),
            message_type: message_type.to_string(),
            metadata,
            timestamp: Utc::now(),
        })
    }

    pub async fn receive_messages(&self, agent_id: &str, wait_timeout: Duration) -> Vec<AgentMessage> {
        self.message_bus.receive(agent_id, wait_timeout).await
    }

    pub async fn broadcast(&self, from_agent: &str, content: &str, exclude: &[String]) -> usize {
        let mut count = 0;
        for agent_id in self.message_bus.active_agents() {
            if agent_id == from_agent || exclude.contains(&agent_id) {
                continue;
            }
            if self.send_message(from_agent, &agent_id, content, "broadcast", HashMap::new()).await {
                count += 1;
            }
        }
        count
    }

    // -------------------------------------------------------------------
    // Internal
    // -------------------------------------------------------------------

    #[instrument(skip(self))]
    async fn recover_agents(&self) {
        let agents = match self.list_agents(None, None, 500).await {
            Ok(agents) => agents,
            Err(err) => {
                warn!(error = %err, "failed to list agents for recovery");
                return;
            }
        };
        let recoverable: Vec<&AgentRecord> = agents.iter().filter(|a| a.status.is_recoverable()).collect();
        info!(count = recoverable.len(), "found agents to recover");

        for record in recoverable {
            match self.resume_agent(&record.header.id, "Continue from where you left off.").await {
                Ok(Some(_)) => info!(agent_id = %record.header.id, "recovered agent"),
                Ok(None) => {
                    if let Err(err) = self.mark_agent_failed(&record.header.id).await {
                        warn!(agent_id = %record.header.id, error = %err, "failed to mark unrecoverable agent as failed");
                    }
                }
                Err(err) => warn!(agent_id = %record.header.id, error = %err, "failed to recover agent"),
            }
        }
    }

    async fn mark_agent_failed(&self, agent_id: &str) -> Result<(), OrchestratorError> {
        self.graph
            .execute_write(
                &self.organization_id,
                &["id"],
                "MATCH (n:Entity {id: $id, entity_type: 'agent'}) \
                 SET n.status = $status, n.error_message = $error_message RETURN n.id AS id",
                &[
                    ("id", serde_json::json!(agent_id)),
                    ("status", serde_json::json!(AgentStatus::Failed.to_string())),
                    ("error_message", serde_json::json!("Failed to recover after restart")),
                ],
            )
            .await
            .map_err(|e| OrchestratorError::Graph(e.to_string()))?;
        Ok(())
    }

    async fn health_check_loop(&self) {
        loop {
            tokio::time::sleep(self.health_check_interval).await;
            if !self.running.load(std::sync::atomic::Ordering::SeqCst) {
                break;
            }
            self.check_agent_health().await;
        }
    }

    #[instrument(skip(self))]
    async fn check_agent_health(&self) {
        let now = Utc::now();
        for instance in self.runner.list_active().await {
            let record = instance.record().await;
            let Some(heartbeat) = record.last_heartbeat else { continue };
            let age = now.signed_duration_since(heartbeat);
            if age.to_std().unwrap_or_default() > self.stale_heartbeat_threshold {
                warn!(agent_id = instance.id(), age_secs = age.num_seconds(), "agent stale, no recent heartbeat");
                if let Err(err) = instance.checkpoint(&self.checkpoints, "stale_heartbeat").await {
                    warn!(agent_id = instance.id(), error = %err, "failed to checkpoint stale agent");
                    continue;
                }
                if let Err(err) = self.mark_agent_failed(instance.id()).await {
                    warn!(agent_id = instance.id(), error = %err, "failed to mark stale agent as failed");
                }
            }
        }
    }
}

/// Selects an agent type from a task's declared technologies, the closest
/// available heuristic signal since this port's `TaskEntity` carries no
/// free-form tags/domain field.
fn select_agent_type_for_task(task: &TaskEntity) -> AgentType {
    let haystack = task.technologies.join(" ").to_lowercase();
    if haystack.contains("test") {
        AgentType::Tester
    } else if haystack.contains("review") {
        AgentType::Reviewer
    } else if haystack.contains("design") || haystack.contains("plan") {
        AgentType::Planner
    } else if haystack.contains("merge") || haystack.contains("integration") {
        AgentType::Integrator
    } else {
        AgentType::Implementer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sibyl_common::entity::EntityHeader;

    fn task(technologies: Vec<&str>) -> TaskEntity {
        TaskEntity {
            header: EntityHeader::new("task_1", "Some task", "org_1"),
            project_id: "proj_1".to_string(),
            epic_id: None,
            status: TaskStatus::Todo,
            priority: Default::default(),
            complexity: None,
            assignees: Vec::new(),
            technologies: technologies.into_iter().map(String::from).collect(),
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
        }
    }

    #[test]
    fn selects_tester_for_testing_technologies() {
        assert_eq!(select_agent_type_for_task(&task(vec!["pytest", "testing"])), AgentType::Tester);
    }

    #[test]
    fn defaults_to_implementer() {
        assert_eq!(select_agent_type_for_task(&task(vec!["rust"])), AgentType::Implementer);
    }
}
