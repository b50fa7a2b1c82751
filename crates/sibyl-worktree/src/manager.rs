//! `WorktreeManager` (§4.11): creates and tears down git worktrees that give
//! each agent an isolated working copy of the repository, and keeps a graph
//! record of each worktree's filesystem path, branch, and lifecycle status.
//!
//! Every lifecycle command (`worktree add`, `status --porcelain`, `diff`,
//! `fetch`, `merge --no-commit --no-ff` / `merge --abort`, `branch -D`) is
//! shelled out to the system `git` binary rather than driven through `git2`,
//! matching how the source manager works — `git2` has no dry-run
//! merge-then-abort primitive that maps cleanly onto `check_conflicts`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{json, Value as JsonValue};
use sha2::{Digest, Sha256};
use sibyl_common::entity::{EntityHeader, WorktreeRecord, WorktreeStatus};
use sibyl_graph::GraphClient;
use tokio::process::Command;
use tracing::{instrument, warn};

use crate::errors::WorktreeError;

/// Reconstructs a `WorktreeRecord` from a flat graph row. Fields not
/// persisted on the node (`description`, `content`, `metadata`,
/// `name_embedding`) take their `EntityHeader` defaults.
fn row_to_record(row: &std::collections::HashMap<String, JsonValue>) -> Option<WorktreeRecord> {
    let id = row.get("id").and_then(JsonValue::as_str)?.to_string();
    let organization_id = row.get("organization_id").and_then(JsonValue::as_str)?.to_string();
    let branch = row.get("branch").and_then(JsonValue::as_str)?.to_string();
    let path = row.get("path").and_then(JsonValue::as_str)?.to_string();
    let base_commit = row.get("base_commit").and_then(JsonValue::as_str).unwrap_or_default().to_string();

    let parse_dt = |key: &str| {
        row.get(key)
            .and_then(JsonValue::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    };

    let mut header = EntityHeader::new(id, branch.clone(), organization_id);
    header.project_id = row.get("project_id").and_then(JsonValue::as_str).map(str::to_string);
    header.created_at = parse_dt("created_at").unwrap_or_else(Utc::now);
    header.updated_at = parse_dt("updated_at").unwrap_or_else(Utc::now);

    let status = row
        .get("status")
        .and_then(JsonValue::as_str)
        .and_then(|s| s.parse().ok())
        .unwrap_or(WorktreeStatus::Active);

    Some(WorktreeRecord {
        header,
        path,
        branch,
        base_commit,
        last_commit: row.get("last_commit").and_then(JsonValue::as_str).map(str::to_string),
        status,
        has_uncommitted: row.get("has_uncommitted").and_then(JsonValue::as_bool).unwrap_or(false),
        task_id: row.get("task_id").and_then(JsonValue::as_str).map(str::to_string),
        agent_id: row.get("agent_id").and_then(JsonValue::as_str).map(str::to_string),
        last_used: parse_dt("last_used").unwrap_or_else(Utc::now),
    })
}

const DEFAULT_BASE_DIR: &str = ".sibyl-worktrees";

/// Deterministic worktree id: stable across repeated `create` calls for the
/// same `(organization_id, project_id, branch_name)` triple.
pub fn generate_worktree_id(organization_id: &str, project_id: &str, branch_name: &str) -> String {
    let joined = format!("{organization_id}:{project_id}:{branch_name}");
    let mut hasher = Sha256::new();
    hasher.update(joined.as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    format!("worktree_{}", &hex[..12])
}

fn sanitize_branch(branch_name: &str) -> String {
    branch_name.replace(['/', '\\'], "_")
}

fn short(id: &str) -> &str {
    &id[..id.len().min(8)]
}

pub struct GitOutput {
    pub stdout: String,
    pub stderr: String,
    pub code: i32,
}

#[derive(Debug, Clone, Default)]
pub struct WorktreeAudit {
    pub active: Vec<String>,
    pub orphaned: Vec<String>,
    pub missing: Vec<String>,
    pub unregistered: Vec<String>,
}

pub struct WorktreeManager {
    graph: Arc<GraphClient>,
    repo_path: PathBuf,
    worktree_base: PathBuf,
}

impl WorktreeManager {
    pub fn new(graph: Arc<GraphClient>, repo_path: impl Into<PathBuf>, worktree_base: Option<PathBuf>) -> Self {
        let worktree_base = worktree_base.unwrap_or_else(|| {
            dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(DEFAULT_BASE_DIR)
        });
        Self { graph, repo_path: repo_path.into(), worktree_base }
    }

    pub fn worktree_path(&self, organization_id: &str, project_id: &str, branch_name: &str) -> PathBuf {
        self.worktree_base
            .join(short(organization_id))
            .join(short(project_id))
            .join(sanitize_branch(branch_name))
    }

    /// Runs `git <args>` in `cwd`. When `check` is true, a nonzero exit
    /// becomes `WorktreeError::GitCommand`; callers that need to inspect a
    /// failing exit code themselves (e.g. the conflict dry-run) pass false.
    async fn run_git(&self, args: &[&str], cwd: &Path, check: bool) -> Result<GitOutput, WorktreeError> {
        let output = Command::new("git").args(args).current_dir(cwd).output().await?;
        let code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if check && !output.status.success() {
            return Err(WorktreeError::GitCommand { command: args.join(" "), code, stderr });
        }
        Ok(GitOutput { stdout, stderr, code })
    }

    #[instrument(skip(self))]
    pub async fn create(
        &self,
        organization_id: &str,
        project_id: &str,
        task_id: Option<&str>,
        branch_name: &str,
        base_ref: &str,
        agent_id: Option<&str>,
    ) -> Result<WorktreeRecord, WorktreeError> {
        let worktree_id = generate_worktree_id(organization_id, project_id, branch_name);
        let path = self.worktree_path(organization_id, project_id, branch_name);

        if let Some(existing) = self.get(organization_id, &worktree_id).await? {
            if path.exists() {
                return Ok(existing);
            }
            warn!(worktree_id, "graph record exists but path is gone; recreating");
        } else if path.exists() {
            // Unregistered leftover directory from a prior failed attempt.
            tokio::fs::remove_dir_all(&path).await.ok();
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let base_sha = self
            .run_git(&["rev-parse", base_ref], &self.repo_path, true)
            .await?
            .stdout
            .trim()
            .to_string();

        self.run_git(
            &["worktree", "add", "-b", branch_name, path.to_string_lossy().as_ref(), base_ref],
            &self.repo_path,
            true,
        )
        .await?;

        let mut header = EntityHeader::new(worktree_id, branch_name, organization_id);
        header.project_id = Some(project_id.to_string());
        let record = WorktreeRecord {
            header,
            path: path.to_string_lossy().to_string(),
            branch: branch_name.to_string(),
            base_commit: base_sha.clone(),
            last_commit: Some(base_sha),
            status: WorktreeStatus::Active,
            has_uncommitted: false,
            task_id: task_id.map(str::to_string),
            agent_id: agent_id.map(str::to_string),
            last_used: Utc::now(),
        };
        self.persist(&record).await?;
        Ok(record)
    }

    async fn persist(&self, record: &WorktreeRecord) -> Result<(), WorktreeError> {
        self.graph
            .execute_write(
                &record.header.organization_id,
                &["id"],
                "MERGE (n:Entity {id: $id}) \
                 SET n.entity_type = 'worktree', n.name = $branch, n.organization_id = $organization_id, \
                 n.project_id = $project_id, n.path = $path, n.branch = $branch, n.base_commit = $base_commit, \
                 n.last_commit = $last_commit, n.status = $status, n.has_uncommitted = $has_uncommitted, \
                 n.task_id = $task_id, n.agent_id = $agent_id, n.last_used = $last_used, \
                 n.created_at = coalesce(n.created_at, $created_at), n.updated_at = $updated_at \
                 RETURN n.id AS id",
                &[
                    ("id", json!(record.header.id)),
                    ("organization_id", json!(record.header.organization_id)),
                    ("project_id", record.header.project_id.clone().map(|s| json!(s)).unwrap_or(JsonValue::Null)),
                    ("path", json!(record.path)),
                    ("branch", json!(record.branch)),
                    ("base_commit", json!(record.base_commit)),
                    ("last_commit", record.last_commit.clone().map(|s| json!(s)).unwrap_or(JsonValue::Null)),
                    ("status", json!(record.status.to_string())),
                    ("has_uncommitted", json!(record.has_uncommitted)),
                    ("task_id", record.task_id.clone().map(|s| json!(s)).unwrap_or(JsonValue::Null)),
                    ("agent_id", record.agent_id.clone().map(|s| json!(s)).unwrap_or(JsonValue::Null)),
                    ("last_used", json!(record.last_used.to_rfc3339())),
                    ("created_at", json!(record.header.created_at.to_rfc3339())),
                    ("updated_at", json!(record.header.updated_at.to_rfc3339())),
                ],
            )
            .await
            .map_err(|e| WorktreeError::Graph(e.to_string()))?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn get(&self, organization_id: &str, worktree_id: &str) -> Result<Option<WorktreeRecord>, WorktreeError> {
        let rows = self
            .graph
            .execute_read(
                organization_id,
                &[
                    "id", "organization_id", "project_id", "path", "branch", "base_commit", "last_commit",
                    "status", "has_uncommitted", "task_id", "agent_id", "last_used", "created_at", "updated_at",
                ],
                "MATCH (n:Entity {id: $id, entity_type: 'worktree'}) RETURN n.id AS id, n.organization_id AS organization_id, \
                 n.project_id AS project_id, n.path AS path, n.branch AS branch, n.base_commit AS base_commit, \
                 n.last_commit AS last_commit, n.status AS status, n.has_uncommitted AS has_uncommitted, \
                 n.task_id AS task_id, n.agent_id AS agent_id, n.last_used AS last_used, \
                 n.created_at AS created_at, n.updated_at AS updated_at",
                &[("id", json!(worktree_id))],
            )
            .await
            .map_err(|e| WorktreeError::Graph(e.to_string()))?;
        Ok(rows.into_iter().next().and_then(|row| row_to_record(&row)))
    }

    #[instrument(skip(self))]
    pub async fn find_by_path(&self, organization_id: &str, path: &Path) -> Result<Option<WorktreeRecord>, WorktreeError> {
        let target = path.to_string_lossy().to_string();
        let rows = self
            .graph
            .execute_read(
                organization_id,
                &["id"],
                "MATCH (n:Entity {entity_type: 'worktree', path: $path}) RETURN n.id AS id",
                &[("path", json!(target))],
            )
            .await
            .map_err(|e| WorktreeError::Graph(e.to_string()))?;
        match rows.into_iter().next().and_then(|row| row.get("id").and_then(JsonValue::as_str).map(str::to_string)) {
            Some(id) => self.get(organization_id, &id).await,
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    pub async fn list_for_task(&self, organization_id: &str, task_id: &str) -> Result<Vec<WorktreeRecord>, WorktreeError> {
        let rows = self
            .graph
            .execute_read(
                organization_id,
                &["id"],
                "MATCH (n:Entity {entity_type: 'worktree', task_id: $task_id}) RETURN n.id AS id",
                &[("task_id", json!(task_id))],
            )
            .await
            .map_err(|e| WorktreeError::Graph(e.to_string()))?;
        let mut out = Vec::new();
        for row in rows {
            if let Some(id) = row.get("id").and_then(JsonValue::as_str) {
                if let Some(record) = self.get(organization_id, id).await? {
                    out.push(record);
                }
            }
        }
        Ok(out)
    }

    #[instrument(skip(self))]
    pub async fn update_status(&self, organization_id: &str, worktree_id: &str, status: WorktreeStatus) -> Result<(), WorktreeError> {
        self.graph
            .execute_write(
                organization_id,
                &[],
                "MATCH (n:Entity {id: $id, entity_type: 'worktree'}) SET n.status = $status, n.updated_at = $updated_at",
                &[("id", json!(worktree_id)), ("status", json!(status.to_string())), ("updated_at", json!(Utc::now().to_rfc3339()))],
            )
            .await
            .map_err(|e| WorktreeError::Graph(e.to_string()))?;
        Ok(())
    }

    pub async fn mark_merged(&self, organization_id: &str, worktree_id: &str) -> Result<(), WorktreeError> {
        self.update_status(organization_id, worktree_id, WorktreeStatus::Merged).await
    }

    pub async fn mark_orphaned(&self, organization_id: &str, worktree_id: &str) -> Result<(), WorktreeError> {
        self.update_status(organization_id, worktree_id, WorktreeStatus::Orphaned).await
    }

    #[instrument(skip(self))]
    pub async fn check_uncommitted(&self, organization_id: &str, worktree_id: &str) -> Result<bool, WorktreeError> {
        let record = self.get(organization_id, worktree_id).await?.ok_or_else(|| WorktreeError::NotFound(worktree_id.to_string()))?;
        let status = self.run_git(&["status", "--porcelain"], Path::new(&record.path), true).await?;
        let has_uncommitted = !status.stdout.trim().is_empty();
        self.graph
            .execute_write(
                organization_id,
                &[],
                "MATCH (n:Entity {id: $id, entity_type: 'worktree'}) SET n.has_uncommitted = $has_uncommitted",
                &[("id", json!(worktree_id)), ("has_uncommitted", json!(has_uncommitted))],
            )
            .await
            .map_err(|e| WorktreeError::Graph(e.to_string()))?;
        Ok(has_uncommitted)
    }

    #[instrument(skip(self))]
    pub async fn uncommitted_diff(&self, organization_id: &str, worktree_id: &str) -> Result<String, WorktreeError> {
        let record = self.get(organization_id, worktree_id).await?.ok_or_else(|| WorktreeError::NotFound(worktree_id.to_string()))?;
        let diff = self.run_git(&["diff", "HEAD"], Path::new(&record.path), true).await?;
        Ok(diff.stdout)
    }

    /// Dry-run merges `target_branch` into the worktree and immediately
    /// aborts, reporting whether a real merge would conflict.
    #[instrument(skip(self))]
    pub async fn check_conflicts(&self, organization_id: &str, worktree_id: &str, target_branch: &str) -> Result<bool, WorktreeError> {
        let record = self.get(organization_id, worktree_id).await?.ok_or_else(|| WorktreeError::NotFound(worktree_id.to_string()))?;
        let cwd = PathBuf::from(&record.path);

        self.run_git(&["fetch", "origin", target_branch], &cwd, true).await?;
        let merge = self
            .run_git(&["merge", "--no-commit", "--no-ff", &format!("origin/{target_branch}")], &cwd, false)
            .await?;
        // Always abort: this call only probes for conflicts, it never commits.
        self.run_git(&["merge", "--abort"], &cwd, false).await.ok();

        Ok(merge.code != 0 && merge.stderr.contains("CONFLICT"))
    }

    #[instrument(skip(self))]
    pub async fn latest_commit(&self, organization_id: &str, worktree_id: &str) -> Result<String, WorktreeError> {
        let record = self.get(organization_id, worktree_id).await?.ok_or_else(|| WorktreeError::NotFound(worktree_id.to_string()))?;
        let head = self.run_git(&["rev-parse", "HEAD"], Path::new(&record.path), true).await?;
        let sha = head.stdout.trim().to_string();
        self.graph
            .execute_write(
                organization_id,
                &[],
                "MATCH (n:Entity {id: $id, entity_type: 'worktree'}) SET n.last_commit = $sha, n.last_used = $now",
                &[("id", json!(worktree_id)), ("sha", json!(sha)), ("now", json!(Utc::now().to_rfc3339()))],
            )
            .await
            .map_err(|e| WorktreeError::Graph(e.to_string()))?;
        Ok(sha)
    }

    /// Removes the worktree's filesystem checkout and branch, marking the
    /// record `Deleted`. Refuses when there are uncommitted changes unless
    /// `force` is set.
    #[instrument(skip(self))]
    pub async fn cleanup(&self, organization_id: &str, worktree_id: &str, force: bool) -> Result<bool, WorktreeError> {
        let record = self.get(organization_id, worktree_id).await?.ok_or_else(|| WorktreeError::NotFound(worktree_id.to_string()))?;

        if !force && self.check_uncommitted(organization_id, worktree_id).await? {
            return Err(WorktreeError::UncommittedChanges(worktree_id.to_string()));
        }

        let path = PathBuf::from(&record.path);
        let removed = self.run_git(&["worktree", "remove", "--force", path.to_string_lossy().as_ref()], &self.repo_path, false).await?;
        if removed.code != 0 && path.exists() {
            tokio::fs::remove_dir_all(&path).await.ok();
        }
        self.run_git(&["worktree", "prune"], &self.repo_path, false).await.ok();
        self.run_git(&["branch", "-D", &record.branch], &self.repo_path, false).await.ok();

        self.update_status(organization_id, worktree_id, WorktreeStatus::Deleted).await?;
        Ok(true)
    }

    /// Sweeps `Orphaned` records older than `max_age_hours` and force-cleans
    /// them, tolerating per-record failures so one bad worktree doesn't
    /// block the rest.
    #[instrument(skip(self))]
    pub async fn cleanup_orphaned(&self, organization_id: &str, max_age_hours: i64) -> Result<Vec<String>, WorktreeError> {
        let rows = self
            .graph
            .execute_read(
                organization_id,
                &["id", "last_used"],
                "MATCH (n:Entity {entity_type: 'worktree', status: 'orphaned'}) RETURN n.id AS id, n.last_used AS last_used",
                &[],
            )
            .await
            .map_err(|e| WorktreeError::Graph(e.to_string()))?;

        let cutoff = Utc::now() - chrono::Duration::hours(max_age_hours);
        let mut cleaned = Vec::new();
        for row in rows {
            let Some(id) = row.get("id").and_then(JsonValue::as_str) else { continue };
            let last_used = row
                .get("last_used")
                .and_then(JsonValue::as_str)
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc));
            if last_used.map(|dt| dt < cutoff).unwrap_or(true) {
                match self.cleanup(organization_id, id, true).await {
                    Ok(_) => cleaned.push(id.to_string()),
                    Err(err) => warn!(worktree_id = id, error = %err, "orphan cleanup failed, skipping"),
                }
            }
        }
        Ok(cleaned)
    }

    /// Cross-checks graph records against the worktree base directory:
    /// `active`/`orphaned` records whose path still exists, records whose
    /// path is `missing`, and directories on disk with no matching record
    /// (`unregistered`).
    #[instrument(skip(self))]
    pub async fn audit_worktrees(&self, organization_id: &str, project_id: &str) -> Result<WorktreeAudit, WorktreeError> {
        let rows = self
            .graph
            .execute_read(
                organization_id,
                &["id", "path", "status"],
                "MATCH (n:Entity {entity_type: 'worktree', project_id: $project_id}) RETURN n.id AS id, n.path AS path, n.status AS status",
                &[("project_id", json!(project_id))],
            )
            .await
            .map_err(|e| WorktreeError::Graph(e.to_string()))?;

        let mut audit = WorktreeAudit::default();
        let mut registered_paths: HashSet<String> = HashSet::new();
        for row in &rows {
            let (Some(id), Some(path), Some(status)) = (
                row.get("id").and_then(JsonValue::as_str),
                row.get("path").and_then(JsonValue::as_str),
                row.get("status").and_then(JsonValue::as_str),
            ) else {
                continue;
            };
            registered_paths.insert(path.to_string());
            if !Path::new(path).exists() {
                audit.missing.push(id.to_string());
                continue;
            }
            match status {
                "active" => audit.active.push(id.to_string()),
                "orphaned" => audit.orphaned.push(id.to_string()),
                _ => {}
            }
        }

        let scan_dir = self.worktree_base.join(short(organization_id)).join(short(project_id));
        if scan_dir.is_dir() {
            for entry in walkdir::WalkDir::new(&scan_dir).min_depth(1).max_depth(1).into_iter().filter_map(Result::ok) {
                if !entry.file_type().is_dir() {
                    continue;
                }
                let path = entry.path().to_string_lossy().to_string();
                if !registered_paths.contains(&path) {
                    audit.unregistered.push(path);
                }
            }
        }

        Ok(audit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worktree_id_is_deterministic_and_type_prefixed() {
        let a = generate_worktree_id("org_1", "proj_1", "feature/x");
        let b = generate_worktree_id("org_1", "proj_1", "feature/x");
        assert_eq!(a, b);
        assert!(a.starts_with("worktree_"));
    }

    #[test]
    fn worktree_id_differs_on_branch_change() {
        let a = generate_worktree_id("org_1", "proj_1", "feature/x");
        let b = generate_worktree_id("org_1", "proj_1", "feature/y");
        assert_ne!(a, b);
    }

    #[test]
    fn sanitize_branch_replaces_path_separators() {
        assert_eq!(sanitize_branch("feature/nested/x"), "feature_nested_x");
        assert_eq!(sanitize_branch(r"feature\win"), "feature_win");
    }

    #[test]
    fn short_truncates_to_eight_chars_or_fewer() {
        assert_eq!(short("organization_12345"), "organiza");
        assert_eq!(short("org1"), "org1");
    }
}
