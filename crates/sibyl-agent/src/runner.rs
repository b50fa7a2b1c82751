//! Agent spawn, execution, and lifecycle management (§4.12, component K).
//!
//! `AgentRunner` owns the active-agent registry for one organization/project
//! pair; `AgentInstance` wraps a single running agent: heartbeat, streaming
//! execution, pause/stop, and conversation-history checkpointing.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use futures_util::stream::StreamExt;
use sha2::{Digest, Sha256};
use sibyl_common::agent_state::validate_transition;
use sibyl_common::entity::{AgentRecord, AgentStatus, AgentType, EntityHeader, TaskEntity};
use sibyl_graph::GraphClient;
use sibyl_worktree::WorktreeManager;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use crate::checkpoint::{Checkpoint, CheckpointManager};
use crate::errors::AgentError;
use crate::hooks::HookRegistry;
use crate::runtime::{AgentRuntime, RuntimeOptions};
use crate::types::{Message, MessageSummary, Metadata};

const HEARTBEAT_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);

const SYSTEM_PROMPT_PREAMBLE: &str = "You are an AI agent working on a software development task.\n\
You have access to Sibyl's knowledge graph for:\n\
- Searching past learnings and patterns\n\
- Tracking task progress\n\
- Capturing new insights\n\n\
Guidelines:\n\
- Search Sibyl for relevant patterns before implementing\n\
- Update task status as you progress\n\
- Capture non-obvious learnings when you discover them\n\
- Request human review when completing significant milestones\n";

fn agent_type_prompt(agent_type: AgentType) -> &'static str {
    match agent_type {
        AgentType::General => "You are a general-purpose agent.",
        AgentType::Planner => {
            "You are a senior software architect. Break features into implementable tasks with clear scope and dependencies."
        }
        AgentType::Implementer => {
            "You are a senior developer. Write clean, tested code that follows existing patterns in the codebase."
        }
        AgentType::Tester => {
            "You are a QA engineer. Write comprehensive tests that cover edge cases and ensure code correctness."
        }
        AgentType::Reviewer => {
            "You are a code reviewer. Analyze code for bugs, security issues, performance problems, and style violations."
        }
        AgentType::Integrator => {
            "You are a git expert. Merge branches, resolve conflicts, and ensure clean integration of parallel work."
        }
        AgentType::Orchestrator => {
            "You are a project coordinator. Manage multiple agents, track dependencies, and ensure work completes efficiently."
        }
    }
}

fn generate_agent_id(organization_id: &str, project_id: &str, timestamp: &str) -> String {
    let combined = format!("{organization_id}:{project_id}:{timestamp}");
    let mut hasher = Sha256::new();
    hasher.update(combined.as_bytes());
    let hex = hasher.finalize().iter().map(|b| format!("{b:02x}")).collect::<String>();
    format!("agent_{}", &hex[..12])
}

fn build_system_prompt(agent_type: AgentType, task: Option<&TaskEntity>, custom_instructions: Option<&str>) -> String {
    let mut parts = vec![SYSTEM_PROMPT_PREAMBLE.to_string()];

    let type_prompt = agent_type_prompt(agent_type);
    if !type_prompt.is_empty() {
        parts.push(format!("\n## Role\n{type_prompt}"));
    }

    if let Some(task) = task {
        let mut context = format!(
            "\n## Current Task\nTitle: {}\nDescription: {}\nStatus: {}\nPriority: {}\n",
            task.header.name, task.header.description, task.status, task.priority
        );
        if !task.technologies.is_empty() {
            context.push_str(&format!("Technologies: {}\n", task.technologies.join(", ")));
        }
        parts.push(context);
    }

    if let Some(custom) = custom_instructions {
        parts.push(format!("\n## Additional Instructions\n{custom}"));
    }

    parts.join("\n")
}

/// How an agent came to exist. Stored as plain text in `AgentRecord.spawn_source`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentSpawnSource {
    User,
    Orchestrator,
    ScheduledJob,
}

impl AgentSpawnSource {
    fn as_str(self) -> &'static str {
        match self {
            AgentSpawnSource::User => "user",
            AgentSpawnSource::Orchestrator => "orchestrator",
            AgentSpawnSource::ScheduledJob => "scheduled_job",
        }
    }
}

#[derive(Default)]
pub struct SpawnOptions {
    pub agent_type: AgentType,
    pub task: Option<TaskEntity>,
    pub spawn_source: AgentSpawnSource,
    pub create_worktree: bool,
    pub custom_instructions: Option<String>,
    pub base_ref: String,
    pub hooks: HookRegistry,
    /// Pre-generated agent id. Callers that need the id before the instance
    /// exists (to build an `ApprovalService` and wire its hook in before
    /// spawning) can reserve one via `AgentRunner::reserve_agent_id` and
    /// pass it here; otherwise one is generated fresh.
    pub agent_id: Option<String>,
}

impl Default for AgentSpawnSource {
    fn default() -> Self {
        AgentSpawnSource::User
    }
}

pub struct AgentRunner {
    graph: Arc<GraphClient>,
    runtime: Arc<dyn AgentRuntime>,
    worktree_manager: Arc<WorktreeManager>,
    organization_id: String,
    project_id: String,
    active_agents: RwLock<HashMap<String, Arc<AgentInstance>>>,
}

impl AgentRunner {
    pub fn new(
        graph: Arc<GraphClient>,
        runtime: Arc<dyn AgentRuntime>,
        worktree_manager: Arc<WorktreeManager>,
        organization_id: impl Into<String>,
        project_id: impl Into<String>,
    ) -> Self {
        Self {
            graph,
            runtime,
            worktree_manager,
            organization_id: organization_id.into(),
            project_id: project_id.into(),
            active_agents: RwLock::new(HashMap::new()),
        }
    }

    /// Generates the id that the next `spawn()` call would assign, so a
    /// caller can build id-scoped collaborators (an `ApprovalService`) and
    /// wire their hooks in before the instance exists.
    pub fn reserve_agent_id(&self) -> String {
        let timestamp = Utc::now().to_rfc3339();
        generate_agent_id(&self.organization_id, &self.project_id, &timestamp)
    }

    #[instrument(skip(self, prompt, options))]
    pub async fn spawn(&self, prompt: &str, options: SpawnOptions) -> Result<Arc<AgentInstance>, AgentError> {
        info!(agent_type = %options.agent_type, task = options.task.as_ref().map(|t| t.header.id.as_str()).unwrap_or("adhoc"), "spawning agent");

        let agent_id = match &options.agent_id {
            Some(id) => id.clone(),
            None => self.reserve_agent_id(),
        };

        let mut header = EntityHeader::new(agent_id.clone(), format!("{}-{}", options.agent_type, &agent_id[agent_id.len() - 8..]), self.organization_id.clone());
        header.project_id = Some(self.project_id.clone());
        header.content = prompt.chars().take(500).collect();

        let mut record = AgentRecord {
            header,
            agent_type: options.agent_type,
            status: AgentStatus::Initializing,
            spawn_source: options.spawn_source.as_str().to_string(),
            session_id: None,
            tokens_used: 0,
            cost_usd: 0.0,
            started_at: None,
            completed_at: None,
            last_heartbeat: None,
            worktree_path: None,
            worktree_branch: None,
            error_message: None,
            task_id: options.task.as_ref().map(|t| t.header.id.clone()),
        };
        self.persist_agent(&record).await?;

        let mut worktree_path: Option<PathBuf> = None;
        if options.create_worktree {
            let branch_name = match &options.task {
                Some(task) => {
                    let safe_title: String =
                        task.header.name.chars().take(30).collect::<String>().to_lowercase().replace(' ', "-");
                    format!("agent/{}-{safe_title}", &record.header.id[record.header.id.len() - 8..])
                }
                None => format!("agent/{}", &record.header.id[record.header.id.len() - 12..]),
            };
            let base_ref = if options.base_ref.is_empty() { "HEAD" } else { &options.base_ref };
            let worktree = self
                .worktree_manager
                .create(
                    &self.organization_id,
                    &self.project_id,
                    Some(options.task.as_ref().map(|t| t.header.id.as_str()).unwrap_or(record.header.id.as_str())),
                    &branch_name,
                    base_ref,
                    Some(&record.header.id),
                )
                .await?;
            worktree_path = Some(PathBuf::from(&worktree.path));
            record.worktree_path = Some(worktree.path);
            record.worktree_branch = Some(worktree.branch);
            self.persist_agent(&record).await?;
        }

        let system_prompt =
            build_system_prompt(options.agent_type, options.task.as_ref(), options.custom_instructions.as_deref());

        let runtime_options = RuntimeOptions { cwd: worktree_path.clone(), system_prompt, hooks: options.hooks };

        self.transition(&mut record, AgentStatus::Working).await?;
        record.started_at = Some(Utc::now());
        self.persist_agent(&record).await?;

        let instance = Arc::new(AgentInstance::new(
            self.graph.clone(),
            self.runtime.clone(),
            record,
            runtime_options,
            prompt.to_string(),
            worktree_path,
        ));
        self.active_agents.write().await.insert(instance.id().to_string(), instance.clone());

        info!(agent_id = instance.id(), "agent spawned and ready");
        Ok(instance)
    }

    /// Convenience wrapper that spawns an implementer agent scoped to a task.
    pub async fn spawn_for_task(&self, task: TaskEntity, hooks: HookRegistry) -> Result<Arc<AgentInstance>, AgentError> {
        let prompt = format!("Please work on this task:\n\n{}\n\n{}", task.header.name, task.header.description);
        let options = SpawnOptions {
            agent_type: AgentType::Implementer,
            task: Some(task),
            spawn_source: AgentSpawnSource::Orchestrator,
            create_worktree: true,
            custom_instructions: None,
            base_ref: "HEAD".to_string(),
            hooks,
            agent_id: None,
        };
        self.spawn(&prompt, options).await
    }

    pub async fn get_agent(&self, agent_id: &str) -> Option<Arc<AgentInstance>> {
        self.active_agents.read().await.get(agent_id).cloned()
    }

    pub async fn list_active(&self) -> Vec<Arc<AgentInstance>> {
        self.active_agents.read().await.values().cloned().collect()
    }

    pub async fn stop_agent(&self, agent_id: &str, reason: &str) -> Result<bool, AgentError> {
        let instance = self.active_agents.write().await.remove(agent_id);
        match instance {
            Some(instance) => {
                instance.stop(reason).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn stop_all(&self, reason: &str) -> Result<usize, AgentError> {
        let ids: Vec<String> = self.active_agents.read().await.keys().cloned().collect();
        let mut stopped = 0;
        for id in ids {
            if self.stop_agent(&id, reason).await? {
                stopped += 1;
            }
        }
        Ok(stopped)
    }

    async fn transition(&self, record: &mut AgentRecord, to: AgentStatus) -> Result<(), AgentError> {
        validate_transition(&record.header.id, record.status, to).map_err(AgentError::from)?;
        record.status = to;
        Ok(())
    }

    async fn persist_agent(&self, record: &AgentRecord) -> Result<(), AgentError> {
        persist_agent_record(&self.graph, record).await
    }

    /// Resumes a paused or crashed agent from its latest checkpoint.
    ///
    /// Reconstructs runtime options (worktree path, hooks) from the
    /// persisted `AgentRecord` only — conversation history is kept for
    /// audit and is never replayed into the fresh query.
    #[instrument(skip(self, checkpoint, hooks))]
    pub async fn resume_from_checkpoint(
        &self,
        checkpoint: &Checkpoint,
        prompt: &str,
        hooks: HookRegistry,
    ) -> Result<Arc<AgentInstance>, AgentError> {
        let mut record = self
            .fetch_agent_record(&checkpoint.agent_id)
            .await?
            .ok_or_else(|| AgentError::NotFound(checkpoint.agent_id.clone()))?;

        let worktree_path = record.worktree_path.clone().map(PathBuf::from);
        let system_prompt = build_system_prompt(record.agent_type, None, None);
        let runtime_options = RuntimeOptions { cwd: worktree_path.clone(), system_prompt, hooks };

        self.transition(&mut record, AgentStatus::Working).await?;
        self.persist_agent(&record).await?;

        let instance = Arc::new(AgentInstance::new(
            self.graph.clone(),
            self.runtime.clone(),
            record,
            runtime_options,
            prompt.to_string(),
            worktree_path,
        ));
        self.active_agents.write().await.insert(instance.id().to_string(), instance.clone());
        info!(agent_id = instance.id(), "agent resumed from checkpoint");
        Ok(instance)
    }

    #[instrument(skip(self))]
    async fn fetch_agent_record(&self, agent_id: &str) -> Result<Option<AgentRecord>, AgentError> {
        let rows = self
            .graph
            .execute_read(
                &self.organization_id,
                &[
                    "id", "name", "organization_id", "project_id", "agent_type", "status", "spawn_source",
                    "session_id", "tokens_used", "cost_usd", "started_at", "completed_at", "last_heartbeat",
                    "worktree_path", "worktree_branch", "error_message", "task_id", "created_at",
                ],
                "MATCH (n:Entity {id: $id, entity_type: 'agent'}) \
                 RETURN n.id AS id, n.name AS name, n.organization_id AS organization_id, \
                        n.project_id AS project_id, n.agent_type AS agent_type, n.status AS status, \
                        n.spawn_source AS spawn_source, n.session_id AS session_id, n.tokens_used AS tokens_used, \
                        n.cost_usd AS cost_usd, n.started_at AS started_at, n.completed_at AS completed_at, \
                        n.last_heartbeat AS last_heartbeat, n.worktree_path AS worktree_path, \
                        n.worktree_branch AS worktree_branch, n.error_message AS error_message, \
                        n.task_id AS task_id, n.created_at AS created_at",
                &[("id", serde_json::json!(agent_id))],
            )
            .await
            .map_err(|e| AgentError::Graph(e.to_string()))?;

        Ok(rows.into_iter().next().map(|row| row_to_agent_record(&row)))
    }
}

fn row_to_agent_record(row: &sibyl_graph::GraphRow) -> AgentRecord {
    let get_str = |key: &str| row.get(key).and_then(|v| v.as_str()).map(str::to_string);
    let parse_dt = |key: &str| {
        get_str(key).and_then(|s| chrono::DateTime::parse_from_rfc3339(&s).ok()).map(|dt| dt.with_timezone(&Utc))
    };

    let id = get_str("id").unwrap_or_default();
    let organization_id = get_str("organization_id").unwrap_or_default();
    let mut header = EntityHeader::new(id, get_str("name").unwrap_or_default(), organization_id);
    header.project_id = get_str("project_id");
    header.created_at = parse_dt("created_at").unwrap_or_else(Utc::now);

    AgentRecord {
        header,
        agent_type: get_str("agent_type").and_then(|s| s.parse().ok()).unwrap_or_default(),
        status: get_str("status").and_then(|s| s.parse().ok()).unwrap_or(AgentStatus::Initializing),
        spawn_source: get_str("spawn_source").unwrap_or_else(|| "user".to_string()),
        session_id: get_str("session_id"),
        tokens_used: row.get("tokens_used").and_then(|v| v.as_u64()).unwrap_or(0),
        cost_usd: row.get("cost_usd").and_then(|v| v.as_f64()).unwrap_or(0.0),
        started_at: parse_dt("started_at"),
        completed_at: parse_dt("completed_at"),
        last_heartbeat: parse_dt("last_heartbeat"),
        worktree_path: get_str("worktree_path"),
        worktree_branch: get_str("worktree_branch"),
        error_message: get_str("error_message"),
        task_id: get_str("task_id"),
    }
}

#[instrument(skip(graph, record))]
async fn persist_agent_record(graph: &GraphClient, record: &AgentRecord) -> Result<(), AgentError> {
    graph
        .execute_write(
            &record.header.organization_id,
            &["id"],
            "MERGE (n:Entity {id: $id}) \
             SET n.entity_type = 'agent', n.name = $name, n.organization_id = $organization_id, \
                 n.project_id = $project_id, n.agent_type = $agent_type, n.status = $status, \
                 n.spawn_source = $spawn_source, n.session_id = $session_id, n.tokens_used = $tokens_used, \
                 n.cost_usd = $cost_usd, n.started_at = $started_at, n.completed_at = $completed_at, \
                 n.last_heartbeat = $last_heartbeat, n.worktree_path = $worktree_path, \
                 n.worktree_branch = $worktree_branch, n.error_message = $error_message, n.task_id = $task_id, \
                 n.created_at = coalesce(n.created_at, $created_at), n.updated_at = $updated_at \
             RETURN n.id AS id",
            &[
                ("id", serde_json::json!(record.header.id)),
                ("name", serde_json::json!(record.header.name)),
                ("organization_id", serde_json::json!(record.header.organization_id)),
                ("project_id", record.header.project_id.clone().map(|s| serde_json::json!(s)).unwrap_or(serde_json::Value::Null)),
                ("agent_type", serde_json::json!(record.agent_type.to_string())),
                ("status", serde_json::json!(record.status.to_string())),
                ("spawn_source", serde_json::json!(record.spawn_source)),
                ("session_id", record.session_id.clone().map(|s| serde_json::json!(s)).unwrap_or(serde_json::Value::Null)),
                ("tokens_used", serde_json::json!(record.tokens_used)),
                ("cost_usd", serde_json::json!(record.cost_usd)),
                ("started_at", record.started_at.map(|t| serde_json::json!(t.to_rfc3339())).unwrap_or(serde_json::Value::Null)),
                ("completed_at", record.completed_at.map(|t| serde_json::json!(t.to_rfc3339())).unwrap_or(serde_json::Value::Null)),
                ("last_heartbeat", record.last_heartbeat.map(|t| serde_json::json!(t.to_rfc3339())).unwrap_or(serde_json::Value::Null)),
                ("worktree_path", record.worktree_path.clone().map(|s| serde_json::json!(s)).unwrap_or(serde_json::Value::Null)),
                ("worktree_branch", record.worktree_branch.clone().map(|s| serde_json::json!(s)).unwrap_or(serde_json::Value::Null)),
                ("error_message", record.error_message.clone().map(|s| serde_json::json!(s)).unwrap_or(serde_json::Value::Null)),
                ("task_id", record.task_id.clone().map(|s| serde_json::json!(s)).unwrap_or(serde_json::Value::Null)),
                ("created_at", serde_json::json!(record.header.created_at.to_rfc3339())),
                ("updated_at", serde_json::json!(Utc::now().to_rfc3339())),
            ],
        )
        .await
        .map_err(|e| AgentError::Graph(e.to_string()))?;
    Ok(())
}

struct InstanceState {
    record: AgentRecord,
    running: bool,
    conversation_history: Vec<Message>,
    tokens_used: u64,
    cost_usd: f64,
    session_id: Option<String>,
}

/// A single running agent. Cheaply clonable via `Arc`; internal mutable
/// state is behind an async mutex since heartbeat, execution, and
/// pause/stop all touch it concurrently.
pub struct AgentInstance {
    id: String,
    graph: Arc<GraphClient>,
    runtime: Arc<dyn AgentRuntime>,
    runtime_options: RuntimeOptions,
    initial_prompt: String,
    worktree_path: Option<PathBuf>,
    state: Mutex<InstanceState>,
    heartbeat_handle: Mutex<Option<JoinHandle<()>>>,
}

impl AgentInstance {
    fn new(
        graph: Arc<GraphClient>,
        runtime: Arc<dyn AgentRuntime>,
        record: AgentRecord,
        runtime_options: RuntimeOptions,
        initial_prompt: String,
        worktree_path: Option<PathBuf>,
    ) -> Self {
        let id = record.header.id.clone();
        Self {
            id,
            graph,
            runtime,
            runtime_options,
            initial_prompt,
            worktree_path,
            state: Mutex::new(InstanceState {
                record,
                running: false,
                conversation_history: Vec::new(),
                tokens_used: 0,
                cost_usd: 0.0,
                session_id: None,
            }),
            heartbeat_handle: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn worktree_path(&self) -> Option<&Path> {
        self.worktree_path.as_deref()
    }

    pub async fn status(&self) -> AgentStatus {
        self.state.lock().await.record.status
    }

    /// Runs the agent to completion, streaming every message back to the
    /// caller as it arrives. Starts a background heartbeat for the
    /// duration of the run; on success or failure the heartbeat is always
    /// stopped and the final status is persisted.
    #[instrument(skip(self))]
    pub async fn execute(self: &Arc<Self>) -> Result<Vec<Message>, AgentError> {
        {
            let mut state = self.state.lock().await;
            state.running = true;
        }
        self.start_heartbeat().await;

        let run_result = self.run_stream(self.initial_prompt.clone()).await;

        self.stop_heartbeat().await;
        {
            let mut state = self.state.lock().await;
            state.running = false;
        }

        match run_result {
            Ok(messages) => {
                self.update_status(AgentStatus::Completed, None, HashMap::new()).await?;
                Ok(messages)
            }
            Err(err) => {
                error!(agent_id = %self.id, error = %err, "agent execution failed");
                let truncated: String = err.to_string().chars().take(2000).collect();
                self.update_status(AgentStatus::Failed, Some(truncated), HashMap::new()).await?;
                Err(err)
            }
        }
    }

    /// Sends a follow-up message to an already-running agent and streams
    /// back the response. Does not touch status transitions — the agent
    /// stays `Working` for the duration of the conversation.
    #[instrument(skip(self, content))]
    pub async fn send_message(self: &Arc<Self>, content: &str) -> Result<Vec<Message>, AgentError> {
        self.run_stream(content.to_string()).await
    }

    async fn run_stream(&self, prompt: String) -> Result<Vec<Message>, AgentError> {
        let mut stream = self.runtime.query(&prompt, &self.runtime_options).await?;
        let mut emitted = Vec::new();
        while let Some(item) = stream.next().await {
            let message = item?;
            {
                let mut state = self.state.lock().await;
                state.conversation_history.push(message.clone());
                if let Message::Result { usage, total_cost_usd, session_id, .. } = &message {
                    if let Some(usage) = usage {
                        state.tokens_used += usage.input_tokens + usage.output_tokens;
                    }
                    if let Some(cost) = total_cost_usd {
                        state.cost_usd = *cost;
                    }
                    if let Some(session) = session_id {
                        state.session_id = Some(session.clone());
                    }
                }
            }
            emitted.push(message);
        }
        Ok(emitted)
    }

    /// Stops the agent: cancels the heartbeat, cancels any approvals still
    /// pending for it (the caller is expected to have wired its
    /// `ApprovalService::cancel_all` before/around this call), and marks it
    /// `Terminated`.
    #[instrument(skip(self))]
    pub async fn stop(self: &Arc<Self>, reason: &str) -> Result<(), AgentError> {
        {
            let mut state = self.state.lock().await;
            state.running = false;
        }
        self.stop_heartbeat().await;

        let mut metadata = HashMap::new();
        metadata.insert("stop_reason".to_string(), reason.to_string());
        self.update_status(AgentStatus::Terminated, None, metadata).await
    }

    /// Pauses the agent: cancels the heartbeat but deliberately leaves any
    /// pending approvals untouched, so a resumed agent can still see them
    /// resolved.
    #[instrument(skip(self))]
    pub async fn pause(self: &Arc<Self>, reason: &str) -> Result<(), AgentError> {
        {
            let mut state = self.state.lock().await;
            state.running = false;
        }
        self.stop_heartbeat().await;

        let mut metadata = HashMap::new();
        metadata.insert("paused_reason".to_string(), reason.to_string());
        self.update_status(AgentStatus::Paused, None, metadata).await
    }

    async fn start_heartbeat(self: &Arc<Self>) {
        let this = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(HEARTBEAT_INTERVAL).await;
                let running = this.state.lock().await.running;
                if !running {
                    break;
                }
                if let Err(err) = this.beat().await {
                    warn!(agent_id = %this.id, error = %err, "heartbeat failed for agent");
                }
            }
        });
        *self.heartbeat_handle.lock().await = Some(handle);
    }

    async fn stop_heartbeat(&self) {
        if let Some(handle) = self.heartbeat_handle.lock().await.take() {
            handle.abort();
        }
    }

    async fn beat(&self) -> Result<(), AgentError> {
        let (id, organization_id, tokens_used, cost_usd) = {
            let state = self.state.lock().await;
            (state.record.header.id.clone(), state.record.header.organization_id.clone(), state.tokens_used, state.cost_usd)
        };
        let now = Utc::now();
        self.graph
            .execute_write(
                &organization_id,
                &["id"],
                "MATCH (n:Entity {id: $id, entity_type: 'agent'}) \
                 SET n.last_heartbeat = $now, n.tokens_used = $tokens_used, n.cost_usd = $cost_usd \
                 RETURN n.id AS id",
                &[
                    ("id", serde_json::json!(id)),
                    ("now", serde_json::json!(now.to_rfc3339())),
                    ("tokens_used", serde_json::json!(tokens_used)),
                    ("cost_usd", serde_json::json!(cost_usd)),
                ],
            )
            .await
            .map_err(|e| AgentError::Graph(e.to_string()))?;
        let mut state = self.state.lock().await;
        state.record.last_heartbeat = Some(now);
        Ok(())
    }

    async fn update_status(&self, status: AgentStatus, error: Option<String>, metadata: Metadata) -> Result<(), AgentError> {
        let mut state = self.state.lock().await;
        validate_transition(&state.record.header.id, state.record.status, status).map_err(AgentError::from)?;
        state.record.status = status;

        if status == AgentStatus::Completed {
            state.record.completed_at = Some(Utc::now());
            state.record.tokens_used = state.tokens_used;
            state.record.cost_usd = state.cost_usd;
        }
        if let Some(session_id) = &state.session_id {
            state.record.session_id = Some(session_id.clone());
        }
        if let Some(error) = error {
            state.record.error_message = Some(error);
        }
        for (key, value) in metadata {
            state.record.header.metadata.insert(key, value);
        }

        persist_agent_record(&self.graph, &state.record).await
    }

    /// Serializable conversation history for checkpointing. Kept for
    /// audit/context only; a resume never replays it message-by-message.
    pub async fn conversation_history(&self) -> Vec<MessageSummary> {
        let state = self.state.lock().await;
        state.conversation_history.iter().map(MessageSummary::from).collect()
    }

    pub async fn tokens_used(&self) -> u64 {
        self.state.lock().await.tokens_used
    }

    pub async fn cost_usd(&self) -> f64 {
        self.state.lock().await.cost_usd
    }

    pub async fn session_id(&self) -> Option<String> {
        self.state.lock().await.session_id.clone()
    }

    pub async fn task_id(&self) -> Option<String> {
        self.state.lock().await.record.task_id.clone()
    }

    /// Snapshot of the current `AgentRecord`, for callers (the orchestrator's
    /// health-check loop) that need more than the individual accessors above.
    pub async fn record(&self) -> AgentRecord {
        self.state.lock().await.record.clone()
    }

    /// Writes a checkpoint capturing the agent's current progress.
    #[instrument(skip(self, manager))]
    pub async fn checkpoint(&self, manager: &CheckpointManager, current_step: &str) -> Result<(), AgentError> {
        let (agent_id, task_id, tokens_used, cost_usd, session_id) = {
            let state = self.state.lock().await;
            (state.record.header.id.clone(), state.record.task_id.clone(), state.tokens_used, state.cost_usd, state.session_id.clone())
        };
        let timestamp = Utc::now();
        let checkpoint = Checkpoint {
            id: manager.new_checkpoint_id(&agent_id, timestamp),
            agent_id,
            task_id,
            current_step: current_step.to_string(),
            conversation_history: self.conversation_history().await,
            tokens_used,
            cost_usd,
            session_id,
            timestamp,
        };
        manager.save(&checkpoint).await
    }
}
