//! Crawl-source reconciliation: recompute a source's counts from the
//! document store's ground truth and flip its status, rather than trust
//! whatever the crawl job last wrote before failing partway through
//! (`jobs/crawl.py::sync_source`/`sync_all_sources`).

use chrono::Utc;
use sibyl_common::document::CrawlStatus;
use sibyl_docstore::DocStore;
use sibyl_events::{Event, EventBus};
use tracing::{error, info, instrument, warn};

use crate::errors::QueueError;

/// Recompute one source's `document_count`/`chunk_count` from the document
/// store and mark it `Completed`, publishing `crawl_sync_complete`.
#[instrument(skip(docstore, events))]
pub async fn sync_source(
    docstore: &DocStore,
    events: &EventBus,
    organization_id: &str,
    source_id: &str,
) -> Result<(u32, u32), QueueError> {
    if organization_id.trim().is_empty() {
        return Err(QueueError::TenantMissing);
    }

    let mut source = docstore
        .get_source(organization_id, source_id)
        .await
        .map_err(|e| QueueError::Backend(e.to_string()))?;

    let (document_count, chunk_count) = docstore
        .count_documents_and_chunks(organization_id, source_id)
        .await
        .map_err(|e| QueueError::Backend(e.to_string()))?;

    docstore
        .touch_source_crawl_stats(organization_id, source_id, document_count, chunk_count)
        .await
        .map_err(|e| QueueError::Backend(e.to_string()))?;

    source.document_count = document_count;
    source.chunk_count = chunk_count;
    source.status = CrawlStatus::Completed;
    source.last_crawled_at = Some(Utc::now());

    events
        .publish(&Event::crawl_sync_complete(organization_id, source_id, document_count, chunk_count))
        .await;

    info!(source_id, document_count, chunk_count, "reconciled crawl source");
    Ok((document_count, chunk_count))
}

/// Outcome of reconciling every source for a tenant: per-source failures
/// are tolerated and recorded rather than aborting the whole batch.
#[derive(Debug, Default)]
pub struct SyncAllReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<(String, String)>,
}

/// Reconcile every crawl source belonging to `organization_id`.
#[instrument(skip(docstore, events))]
pub async fn sync_all_sources(
    docstore: &DocStore,
    events: &EventBus,
    organization_id: &str,
    source_ids: &[String],
) -> Result<SyncAllReport, QueueError> {
    if organization_id.trim().is_empty() {
        return Err(QueueError::TenantMissing);
    }

    let mut report = SyncAllReport::default();
    for source_id in source_ids {
        match sync_source(docstore, events, organization_id, source_id).await {
            Ok(_) => report.succeeded.push(source_id.clone()),
            Err(err) => {
                warn!(source_id, error = %err, "source reconciliation failed, continuing batch");
                report.failed.push((source_id.clone(), err.to_string()));
            }
        }
    }

    if report.failed.len() == source_ids.len() && !source_ids.is_empty() {
        error!(organization_id, "every source in sync_all failed to reconcile");
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_all_report_starts_empty() {
        let report = SyncAllReport::default();
        assert!(report.succeeded.is_empty());
        assert!(report.failed.is_empty());
    }
}
