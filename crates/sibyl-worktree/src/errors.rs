//! Worktree manager error kinds (component J).

use sibyl_common::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorktreeError {
    #[error("tenant id missing on a worktree operation")]
    TenantMissing,

    #[error("graph backend error: {0}")]
    Graph(String),

    #[error("worktree {0} not found")]
    NotFound(String),

    #[error("a worktree already exists at path {0}")]
    PathConflict(String),

    #[error("git {command} failed (exit {code}): {stderr}")]
    GitCommand { command: String, code: i32, stderr: String },

    #[error("worktree {0} has uncommitted changes; pass force to discard")]
    UncommittedChanges(String),

    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<WorktreeError> for CoreError {
    fn from(err: WorktreeError) -> Self {
        match err {
            WorktreeError::TenantMissing => CoreError::TenantMissing,
            WorktreeError::Graph(msg) => CoreError::upstream("worktree.graph", msg),
            WorktreeError::NotFound(id) => CoreError::not_found("Worktree", id, ""),
            WorktreeError::PathConflict(path) => CoreError::Conflict(format!("worktree path already in use: {path}")),
            WorktreeError::GitCommand { command, code, stderr } => {
                CoreError::upstream("worktree.git", format!("{command} exited {code}: {stderr}"))
            }
            WorktreeError::UncommittedChanges(id) => {
                CoreError::Conflict(format!("worktree {id} has uncommitted changes"))
            }
            WorktreeError::Io(e) => CoreError::Other(e.into()),
            WorktreeError::Other(e) => CoreError::Other(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn git_command_message_carries_exit_code_and_stderr() {
        let err = WorktreeError::GitCommand {
            command: "worktree add".into(),
            code: 128,
            stderr: "already exists".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("128"));
        assert!(msg.contains("already exists"));
    }
}
