//! Multi-agent coordination and the tool dispatcher (components L, N,
//! §4.13-§4.15): the `AgentOrchestrator` tracks agent lifecycles, routes
//! inter-agent messages, and recovers state across restarts, while the
//! `ToolDispatcher` exposes the four operations (`search`, `explore`,
//! `add`, `manage`) the rest of the system calls into.

pub mod dispatcher;
pub mod errors;
pub mod messages;
pub mod orchestrator;
pub mod tasks;

pub use dispatcher::{AddOutcome, ManageResult, ToolDispatcher};
pub use errors::OrchestratorError;
pub use messages::{AgentMessage, MessageBus};
pub use orchestrator::{AgentOrchestrator, AgentStatusDetail, Workload, DEFAULT_HEALTH_CHECK_INTERVAL, DEFAULT_STALE_HEARTBEAT_THRESHOLD};
