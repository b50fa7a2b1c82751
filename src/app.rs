//! Process-wide singleton wiring: one `App` owns every backend connection
//! and hands `Arc`-shared handles to the orchestrator, dispatcher, and job
//! worker. Built once at startup from `SibylConfig`, following the
//! teacher's `Config`/`ClaudeRunner` construction pattern but for
//! long-lived service dependencies rather than per-phase CLI state.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use sibyl_agent::AgentRuntime;
use sibyl_cache::QueryCache;
use sibyl_common::config::SibylConfig;
use sibyl_docstore::DocStore;
use sibyl_events::EventBus;
use sibyl_graph::GraphClient;
use sibyl_lock::LockManager;
use sibyl_orchestrator::{AgentOrchestrator, ToolDispatcher};
use sibyl_queue::JobQueue;
use sibyl_retrieval::{ExploreEngine, HybridRetrievalEngine, MockQueryEmbedder, QueryEmbedder, RetrievalConfig};
use tracing::info;

/// Everything a tenant-scoped operation needs, constructed once per
/// process and cheaply cloned (every field is an `Arc` or a plain value).
pub struct App {
    pub config: SibylConfig,
    pub graph: Arc<GraphClient>,
    pub docstore: Arc<DocStore>,
    pub cache: Arc<QueryCache>,
    pub events: Arc<EventBus>,
    pub queue: Arc<JobQueue>,
    pub retrieval: Arc<HybridRetrievalEngine>,
    pub explore: Arc<ExploreEngine>,
    pub locks: Arc<LockManager>,
}

impl App {
    /// Connects to every backend the config names. Real embedding/LLM
    /// wire protocols are out of scope (§1 Non-goals); `embedder` defaults
    /// to the deterministic mock unless a caller supplies their own
    /// capability via `with_embedder`.
    pub async fn bootstrap(config: SibylConfig) -> Result<Self> {
        info!(graph_url = %config.graph_url, "bootstrapping sibyl");
        config.ensure_worktree_base().context("failed to create worktree base directory")?;

        let graph = Arc::new(
            GraphClient::connect(
                &config.graph_url,
                config.graph_write_semaphore_width,
                config.embedding_dimension,
                config.timeouts,
            )
            .await
            .context("failed to connect to graph backend")?,
        );

        let pool = sibyl_docstore::build_pool(&config.document_store_url).context("failed to build document store pool")?;
        let docstore = Arc::new(DocStore::new(pool));

        let cache = Arc::new(QueryCache::default());

        let events = Arc::new(EventBus::new(&config.redis_url).context("failed to open event bus connection")?);

        let queue = Arc::new(JobQueue::connect(&config.redis_url).await.context("failed to connect job queue")?);

        let redis_client = redis::Client::open(config.redis_url.clone()).context("failed to open redis client for locks")?;
        let lock_conn = redis::aio::ConnectionManager::new(redis_client)
            .await
            .context("failed to open lock manager connection")?;
        let locks = Arc::new(LockManager::new(lock_conn));

        let embedder: Arc<dyn QueryEmbedder> = Arc::new(MockQueryEmbedder::new(config.embedding_dimension));
        let retrieval = Arc::new(HybridRetrievalEngine::new(
            graph.clone(),
            docstore.clone(),
            embedder,
            Some(cache.clone()),
            RetrievalConfig::default(),
        ));
        let explore = Arc::new(ExploreEngine::new(graph.clone()));

        info!("sibyl bootstrap complete");
        Ok(Self { config, graph, docstore, cache, events, queue, retrieval, explore, locks })
    }

    /// Builds a `ToolDispatcher` scoped to one tenant, sharing this app's
    /// connections.
    pub fn dispatcher(&self, organization_id: impl Into<String>) -> ToolDispatcher {
        ToolDispatcher::new(
            self.graph.clone(),
            self.retrieval.clone(),
            self.explore.clone(),
            self.locks.clone(),
            self.queue.clone(),
            organization_id,
        )
    }

    /// Builds an `AgentOrchestrator` scoped to one tenant/project/repo,
    /// sharing this app's graph and retrieval connections.
    pub fn orchestrator(
        &self,
        runtime: Arc<dyn AgentRuntime>,
        organization_id: impl Into<String>,
        project_id: impl Into<String>,
        repo_path: impl Into<PathBuf>,
    ) -> AgentOrchestrator {
        AgentOrchestrator::new(
            self.graph.clone(),
            runtime,
            self.retrieval.clone(),
            organization_id,
            project_id,
            repo_path,
            Some(self.config.worktree_base.clone()),
        )
        .with_health_check_interval(self.config.timeouts.heartbeat_interval())
    }
}
