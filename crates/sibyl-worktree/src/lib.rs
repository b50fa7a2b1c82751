//! Git worktree lifecycle manager for isolated agent workspaces (component J).

pub mod errors;
pub mod manager;

pub use errors::WorktreeError;
pub use manager::{generate_worktree_id, GitOutput, WorktreeAudit, WorktreeManager};
