//! Layered runtime configuration: defaults → optional TOML file →
//! environment → explicit CLI overrides, mirroring the teacher's
//! `ForgeConfig`/`Config::new` layering.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Per-operation timeout budgets (§5).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Timeouts {
    pub graph_query_ms: u64,
    pub vector_search_ms: u64,
    pub llm_call_ms: u64,
    pub crawl_page_ms: u64,
    pub lock_acquire_ms: u64,
    pub heartbeat_interval_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            graph_query_ms: 10_000,
            vector_search_ms: 15_000,
            llm_call_ms: 120_000,
            crawl_page_ms: 30_000,
            lock_acquire_ms: 10_000,
            heartbeat_interval_ms: 30_000,
        }
    }
}

impl Timeouts {
    pub fn graph_query(&self) -> Duration {
        Duration::from_millis(self.graph_query_ms)
    }
    pub fn vector_search(&self) -> Duration {
        Duration::from_millis(self.vector_search_ms)
    }
    pub fn llm_call(&self) -> Duration {
        Duration::from_millis(self.llm_call_ms)
    }
    pub fn crawl_page(&self) -> Duration {
        Duration::from_millis(self.crawl_page_ms)
    }
    pub fn lock_acquire(&self) -> Duration {
        Duration::from_millis(self.lock_acquire_ms)
    }
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SibylConfig {
    /// FalkorDB-protocol (Redis wire) endpoint backing the graph adapter.
    #[serde(default = "default_graph_url")]
    pub graph_url: String,
    /// Postgres + pgvector endpoint backing the document store.
    #[serde(default = "default_document_store_url")]
    pub document_store_url: String,
    /// Redis endpoint backing the lock manager and event bus.
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    #[serde(default = "default_embedding_dimension")]
    pub embedding_dimension: usize,
    #[serde(default = "default_write_semaphore_width")]
    pub graph_write_semaphore_width: usize,
    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,
    #[serde(default = "default_stale_heartbeat_threshold_ms")]
    pub stale_heartbeat_threshold_ms: u64,
    #[serde(default)]
    pub timeouts: Timeouts,
    #[serde(default = "default_worktree_base")]
    pub worktree_base: PathBuf,
    #[serde(default)]
    pub verbose: bool,
}

fn default_graph_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}
fn default_document_store_url() -> String {
    "postgresql://localhost/sibyl".to_string()
}
fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}
fn default_embedding_dimension() -> usize {
    1536
}
fn default_write_semaphore_width() -> usize {
    20
}
fn default_health_check_interval_ms() -> u64 {
    60_000
}
fn default_stale_heartbeat_threshold_ms() -> u64 {
    120_000
}
fn default_worktree_base() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".sibyl-worktrees")
}

impl Default for SibylConfig {
    fn default() -> Self {
        Self {
            graph_url: default_graph_url(),
            document_store_url: default_document_store_url(),
            redis_url: default_redis_url(),
            embedding_dimension: default_embedding_dimension(),
            graph_write_semaphore_width: default_write_semaphore_width(),
            health_check_interval_ms: default_health_check_interval_ms(),
            stale_heartbeat_threshold_ms: default_stale_heartbeat_threshold_ms(),
            timeouts: Timeouts::default(),
            worktree_base: default_worktree_base(),
            verbose: false,
        }
    }
}

impl SibylConfig {
    /// Load defaults, overlay an optional TOML file, overlay environment
    /// variables (`SIBYL_*`), matching the teacher's file → env → CLI
    /// layering order.
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = config_file
            && path.exists()
        {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            config = toml::from_str(&raw)
                .with_context(|| format!("failed to parse config file {}", path.display()))?;
        }

        if let Ok(url) = std::env::var("SIBYL_GRAPH_URL") {
            config.graph_url = url;
        }
        if let Ok(url) = std::env::var("SIBYL_DOCUMENT_STORE_URL") {
            config.document_store_url = url;
        }
        if let Ok(url) = std::env::var("SIBYL_REDIS_URL") {
            config.redis_url = url;
        }
        if let Ok(dim) = std::env::var("SIBYL_EMBEDDING_DIMENSION") {
            config.embedding_dimension = dim
                .parse()
                .context("SIBYL_EMBEDDING_DIMENSION must be an integer")?;
        }

        Ok(config)
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn ensure_worktree_base(&self) -> Result<()> {
        std::fs::create_dir_all(&self.worktree_base).with_context(|| {
            format!(
                "failed to create worktree base directory {}",
                self.worktree_base.display()
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_budgets() {
        let config = SibylConfig::default();
        assert_eq!(config.graph_write_semaphore_width, 20);
        assert_eq!(config.timeouts.lock_acquire_ms, 10_000);
        assert_eq!(config.timeouts.llm_call_ms, 120_000);
    }

    #[test]
    fn load_with_missing_file_falls_back_to_defaults() {
        let config = SibylConfig::load(Some(Path::new("/does/not/exist.toml"))).unwrap();
        assert_eq!(config.embedding_dimension, 1536);
    }

    #[test]
    fn load_parses_toml_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sibyl.toml");
        std::fs::write(&path, "embedding_dimension = 768\n").unwrap();
        let config = SibylConfig::load(Some(&path)).unwrap();
        assert_eq!(config.embedding_dimension, 768);
    }
}
