//! The tenant-scoped entity sum type (§3).
//!
//! The source represents entity variants via inheritance and runtime type
//! checks; here they are a tagged `enum` with a common header struct
//! (`EntityHeader`) flattened into each variant's serialized form, per the
//! design note in `SPEC_FULL.md` §3. Retrieval paths that only need the
//! header + opaque metadata should match on `Entity::header()` rather than
//! destructuring every variant; only `add`/`manage` need exhaustive
//! variant handling.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Fields shared by every entity variant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityHeader {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Tenant id. Every node carries this; queries without it are rejected
    /// by the graph adapter (§3 invariants).
    pub organization_id: String,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub name_embedding: Option<Vec<f32>>,
}

impl EntityHeader {
    pub fn new(id: impl Into<String>, name: impl Into<String>, organization_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            content: String::new(),
            created_at: now,
            updated_at: now,
            organization_id: organization_id.into(),
            project_id: None,
            metadata: HashMap::new(),
            name_embedding: None,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EntityType {
    Episode,
    Pattern,
    Rule,
    Template,
    Topic,
    Convention,
    Project,
    Epic,
    Task,
    Note,
    Agent,
    Worktree,
    Community,
    Document,
    DocumentChunk,
    CrawlSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProjectStatus {
    #[default]
    Planning,
    Active,
    OnHold,
    Completed,
    Archived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EpicStatus {
    #[default]
    Planning,
    InProgress,
    Blocked,
    Completed,
    Archived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Backlog,
    Todo,
    Doing,
    Blocked,
    Review,
    Done,
    Archived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TaskPriority {
    Critical,
    High,
    #[default]
    Medium,
    Low,
    Someday,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AgentType {
    #[default]
    General,
    Planner,
    Implementer,
    Tester,
    Reviewer,
    Integrator,
    Orchestrator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AgentStatus {
    #[default]
    Initializing,
    Working,
    WaitingApproval,
    WaitingDependency,
    Paused,
    Failed,
    Completed,
    Terminated,
}

impl AgentStatus {
    /// Agents recoverable after a restart — §3 invariant: implies a
    /// checkpoint must exist.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Working | Self::Paused | Self::WaitingApproval | Self::WaitingDependency
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::Completed | Self::Terminated)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum WorktreeStatus {
    #[default]
    Active,
    Orphaned,
    Merged,
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Durable-knowledge payload shared by Pattern/Rule/Template/Topic/Convention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeEntity {
    #[serde(flatten)]
    pub header: EntityHeader,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub severity: Option<Severity>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EpisodeType {
    TaskCompletion,
    IngestionRun,
    Observation,
    Incident,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeEntity {
    #[serde(flatten)]
    pub header: EntityHeader,
    pub episode_type: EpisodeType,
    pub valid_from: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectEntity {
    #[serde(flatten)]
    pub header: EntityHeader,
    #[serde(default)]
    pub status: ProjectStatus,
    #[serde(default)]
    pub repository_url: Option<String>,
    #[serde(default)]
    pub tasks_total: u32,
    #[serde(default)]
    pub tasks_done: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpicEntity {
    #[serde(flatten)]
    pub header: EntityHeader,
    /// Mandatory — an Epic without a project is a `ValidationError`.
    pub project_id: String,
    #[serde(default)]
    pub status: EpicStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HandoffRecord {
    pub from_agent: String,
    pub to_agent: String,
    pub at: DateTime<Utc>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEntity {
    #[serde(flatten)]
    pub header: EntityHeader,
    /// Mandatory post-migration (§9 open question resolution).
    pub project_id: String,
    #[serde(default)]
    pub epic_id: Option<String>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default)]
    pub complexity: Option<u8>,
    #[serde(default)]
    pub assignees: Vec<String>,
    #[serde(default)]
    pub technologies: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub learnings: Option<String>,
    #[serde(default)]
    pub commit_shas: Vec<String>,
    #[serde(default)]
    pub pr_url: Option<String>,
    #[serde(default)]
    pub estimated_hours: Option<f32>,
    #[serde(default)]
    pub actual_hours: Option<f32>,
    #[serde(default)]
    pub blocked_reason: Option<String>,

    // Agent-coordination fields.
    #[serde(default)]
    pub assigned_agent: Option<String>,
    #[serde(default)]
    pub claimed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub heartbeat_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_checkpoint: Option<DateTime<Utc>>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reviewed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub worktree_path: Option<String>,
    #[serde(default)]
    pub worktree_branch: Option<String>,
    #[serde(default)]
    pub collaborators: Vec<String>,
    #[serde(default)]
    pub handoff_history: Vec<HandoffRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteEntity {
    #[serde(flatten)]
    pub header: EntityHeader,
    pub task_id: String,
    pub author: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    #[serde(flatten)]
    pub header: EntityHeader,
    #[serde(default)]
    pub agent_type: AgentType,
    #[serde(default)]
    pub status: AgentStatus,
    pub spawn_source: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub tokens_used: u64,
    #[serde(default)]
    pub cost_usd: f64,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_heartbeat: Option<DateTime<Utc>>,
    #[serde(default)]
    pub worktree_path: Option<String>,
    #[serde(default)]
    pub worktree_branch: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub task_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorktreeRecord {
    #[serde(flatten)]
    pub header: EntityHeader,
    pub path: String,
    pub branch: String,
    pub base_commit: String,
    #[serde(default)]
    pub last_commit: Option<String>,
    #[serde(default)]
    pub status: WorktreeStatus,
    #[serde(default)]
    pub has_uncommitted: bool,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub agent_id: Option<String>,
    pub last_used: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommunityEntity {
    #[serde(flatten)]
    pub header: EntityHeader,
    pub member_ids: Vec<String>,
    pub level: u32,
    pub resolution: f64,
    #[serde(default)]
    pub modularity: Option<f64>,
    #[serde(default)]
    pub parent_community_id: Option<String>,
    #[serde(default)]
    pub child_community_ids: Vec<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub key_concepts: Vec<String>,
}

/// The tenant-scoped entity sum type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "entity_type")]
pub enum Entity {
    Episode(EpisodeEntity),
    Pattern(KnowledgeEntity),
    Rule(KnowledgeEntity),
    Template(KnowledgeEntity),
    Topic(KnowledgeEntity),
    Convention(KnowledgeEntity),
    Project(ProjectEntity),
    Epic(EpicEntity),
    Task(TaskEntity),
    Note(NoteEntity),
    Agent(AgentRecord),
    Worktree(WorktreeRecord),
    Community(CommunityEntity),
}

impl Entity {
    pub fn header(&self) -> &EntityHeader {
        match self {
            Entity::Episode(e) => &e.header,
            Entity::Pattern(e) | Entity::Rule(e) | Entity::Template(e) | Entity::Topic(e) | Entity::Convention(e) => {
                &e.header
            }
            Entity::Project(e) => &e.header,
            Entity::Epic(e) => &e.header,
            Entity::Task(e) => &e.header,
            Entity::Note(e) => &e.header,
            Entity::Agent(e) => &e.header,
            Entity::Worktree(e) => &e.header,
            Entity::Community(e) => &e.header,
        }
    }

    pub fn header_mut(&mut self) -> &mut EntityHeader {
        match self {
            Entity::Episode(e) => &mut e.header,
            Entity::Pattern(e) | Entity::Rule(e) | Entity::Template(e) | Entity::Topic(e) | Entity::Convention(e) => {
                &mut e.header
            }
            Entity::Project(e) => &mut e.header,
            Entity::Epic(e) => &mut e.header,
            Entity::Task(e) => &mut e.header,
            Entity::Note(e) => &mut e.header,
            Entity::Agent(e) => &mut e.header,
            Entity::Worktree(e) => &mut e.header,
            Entity::Community(e) => &mut e.header,
        }
    }

    pub fn entity_type(&self) -> EntityType {
        match self {
            Entity::Episode(_) => EntityType::Episode,
            Entity::Pattern(_) => EntityType::Pattern,
            Entity::Rule(_) => EntityType::Rule,
            Entity::Template(_) => EntityType::Template,
            Entity::Topic(_) => EntityType::Topic,
            Entity::Convention(_) => EntityType::Convention,
            Entity::Project(_) => EntityType::Project,
            Entity::Epic(_) => EntityType::Epic,
            Entity::Task(_) => EntityType::Task,
            Entity::Note(_) => EntityType::Note,
            Entity::Agent(_) => EntityType::Agent,
            Entity::Worktree(_) => EntityType::Worktree,
            Entity::Community(_) => EntityType::Community,
        }
    }

    pub fn id(&self) -> &str {
        &self.header().id
    }

    pub fn organization_id(&self) -> &str {
        &self.header().organization_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_status_recoverable_matches_spec_set() {
        assert!(AgentStatus::Working.is_recoverable());
        assert!(AgentStatus::Paused.is_recoverable());
        assert!(AgentStatus::WaitingApproval.is_recoverable());
        assert!(AgentStatus::WaitingDependency.is_recoverable());
        assert!(!AgentStatus::Initializing.is_recoverable());
        assert!(!AgentStatus::Failed.is_recoverable());
    }

    #[test]
    fn entity_header_accessor_dispatches_across_variants() {
        let header = EntityHeader::new("task_1", "Write docs", "org_1");
        let task = Entity::Task(TaskEntity {
            header: header.clone(),
            project_id: "project_1".into(),
            epic_id: None,
            status: TaskStatus::Todo,
            priority: TaskPriority::Medium,
            complexity: None,
            assignees: vec![],
            technologies: vec![],
            depends_on: vec![],
            learnings: None,
            commit_shas: vec![],
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
            collaborators: vec![],
            handoff_history: vec![],
        });
        assert_eq!(task.id(), "task_1");
        assert_eq!(task.organization_id(), "org_1");
        assert_eq!(task.entity_type(), EntityType::Task);
    }

    #[test]
    fn entity_round_trips_through_json() {
        let header = EntityHeader::new("pattern_1", "Retry with backoff", "org_1");
        let pattern = Entity::Pattern(KnowledgeEntity {
            header,
            category: Some("resilience".into()),
            languages: vec!["rust".into()],
            severity: None,
        });
        let json = serde_json::to_string(&pattern).unwrap();
        assert!(json.contains("\"entity_type\":\"pattern\""));
        let back: Entity = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id(), "pattern_1");
    }
}
