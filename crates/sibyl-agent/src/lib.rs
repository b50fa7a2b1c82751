//! Agent runtime: spawn/execute/pause/stop lifecycle, hook composition,
//! approvals, and checkpointing (components K, M — §4.12 through §4.14).

pub mod approvals;
pub mod checkpoint;
pub mod errors;
pub mod hooks;
pub mod runner;
pub mod runtime;
pub mod types;

pub use approvals::{ApprovalService, PendingApproval};
pub use checkpoint::{Checkpoint, CheckpointManager};
pub use errors::AgentError;
pub use hooks::{compose_hooks, run_hooks, sibyl_hooks, Hook, HookRegistry, WorkflowTracker};
pub use runner::{AgentInstance, AgentRunner, AgentSpawnSource, SpawnOptions};
pub use runtime::{mock_runtime, AgentRuntime, MockAgentRuntime, RuntimeOptions};
pub use types::{HookEventKind, HookInput, HookOutput, Message, MessageSummary, TokenUsage};
