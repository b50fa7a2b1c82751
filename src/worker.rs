//! Background job worker: claims jobs off the durable queue and dispatches
//! each `JobType` to its handler, acking on success and routing failures
//! through `retry_or_dead_letter` (§4.5).

use std::sync::Arc;
use std::time::Duration;

use sibyl_common::document::SourceType;
use sibyl_ingest::{
    BatchEmbedder, IngestionPipeline, IngestionPipelineConfig, MockEmbedder, SourceCrawler, WalkdirCrawler, WebCrawler,
};
use sibyl_queue::{reconcile, ClaimedJob, JobType};
use tracing::{error, info, instrument, warn};

use crate::app::App;

const CLAIM_BATCH: usize = 10;
const CLAIM_BLOCK: Duration = Duration::from_secs(5);
const EMBED_BATCH_SIZE: usize = 64;

/// Runs until `shutdown` resolves, repeatedly claiming and processing
/// jobs. Intended to run alongside `AgentOrchestrator::start` inside the
/// `serve` command.
pub async fn run(app: Arc<App>, consumer: impl Into<String>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
    let consumer = consumer.into();
    info!(consumer = %consumer, "job worker starting");
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("job worker shutting down");
                    break;
                }
            }
            claimed = app.queue.claim(&consumer, CLAIM_BATCH, CLAIM_BLOCK) => {
                match claimed {
                    Ok(jobs) => {
                        for claimed_job in jobs {
                            process_one(&app, claimed_job).await;
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "job claim failed, backing off");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}

#[instrument(skip(app, claimed), fields(job_id = %claimed.job.id, job_type = %claimed.job.job_type))]
async fn process_one(app: &App, claimed: ClaimedJob) {
    let ClaimedJob { stream_id, job } = claimed;
    let organization_id = job.organization_id.clone();
    let result = dispatch(app, &organization_id, job.job_type, &job.payload).await;

    match result {
        Ok(()) => {
            if let Err(err) = app.queue.ack(&stream_id).await {
                error!(error = %err, "failed to ack completed job");
            }
        }
        Err(err) => {
            warn!(error = %err, "job handler failed");
            if let Err(err) = app.queue.retry_or_dead_letter(&stream_id, job, &err.to_string()).await {
                error!(error = %err, "job exhausted its retry budget");
            }
        }
    }
}

async fn dispatch(app: &App, organization_id: &str, job_type: JobType, payload: &serde_json::Value) -> anyhow::Result<()> {
    match job_type {
        JobType::CrawlSource => crawl_source(app, organization_id, payload).await,
        JobType::SyncSource => sync_source(app, organization_id, payload).await,
        JobType::SyncAll => sync_all(app, organization_id, payload).await,
        JobType::CreateEntity => {
            let dispatcher = app.dispatcher(organization_id);
            dispatcher.process_create_entity_job(payload).await?;
            Ok(())
        }
        JobType::UpdateEntity | JobType::LinkGraph => {
            let entity_id = payload.get("entity_id").and_then(|v| v.as_str()).unwrap_or_default();
            info!(entity_id, job_type = %job_type, "acknowledging graph-maintenance job with no further action needed");
            Ok(())
        }
        JobType::CreateLearningEpisode => {
            info!(job_type = %job_type, "learning-episode jobs are created inline by manage(complete_task), nothing to do here");
            Ok(())
        }
    }
}

async fn crawl_source(app: &App, organization_id: &str, payload: &serde_json::Value) -> anyhow::Result<()> {
    let source_id = payload
        .get("entity_id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("crawl job payload missing entity_id"))?;
    let source = app.docstore.get_source(organization_id, source_id).await?;

    let crawler: Arc<dyn SourceCrawler> = match source.source_type {
        SourceType::LocalFiles | SourceType::Git => Arc::new(WalkdirCrawler::default()),
        SourceType::Web => Arc::new(WebCrawler::default()),
    };

    let embedder = BatchEmbedder::new(Arc::new(MockEmbedder::new(app.config.embedding_dimension)), EMBED_BATCH_SIZE);
    let pipeline = IngestionPipeline::new(
        organization_id.to_string(),
        crawler,
        Some(embedder),
        app.docstore.clone(),
        Some(app.graph.clone()),
        IngestionPipelineConfig::default(),
    );

    let stats = pipeline.ingest_source(&source, None).await?;
    let error = if stats.errors > 0 { Some(format!("{} chunk(s) failed to embed or store", stats.errors)) } else { None };
    app.events
        .publish(&sibyl_events::Event::crawl_complete(
            organization_id,
            source_id,
            stats.documents_stored,
            stats.chunks_created,
            stats.duration_ms,
            error.as_deref(),
        ))
        .await;
    info!(source_id, ?stats, "crawl job complete");
    Ok(())
}

async fn sync_source(app: &App, organization_id: &str, payload: &serde_json::Value) -> anyhow::Result<()> {
    let source_id = payload
        .get("entity_id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("sync job payload missing entity_id"))?;
    reconcile::sync_source(&app.docstore, &app.events, organization_id, source_id).await?;
    Ok(())
}

async fn sync_all(app: &App, organization_id: &str, payload: &serde_json::Value) -> anyhow::Result<()> {
    let source_ids: Vec<String> = payload
        .get("source_ids")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default();
    let report = reconcile::sync_all_sources(&app.docstore, &app.events, organization_id, &source_ids).await?;
    if !report.failed.is_empty() {
        warn!(failed = report.failed.len(), succeeded = report.succeeded.len(), "sync_all completed with partial failures");
    }
    Ok(())
}
