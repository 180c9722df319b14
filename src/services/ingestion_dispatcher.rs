use async_trait::async_trait;
use std::sync::Arc;

use crate::models::job::IngestionJob;
use crate::queue::JobHandler;
use crate::services::bulk_sync_service::BulkSyncService;
use crate::services::ingest_error::Result;
use crate::services::webhook_processor::WebhookProcessor;

/// Routes queue jobs to the bulk sync engine or the webhook processor.
pub struct IngestionDispatcher {
    bulk_sync: Arc<BulkSyncService>,
    webhooks: Arc<WebhookProcessor>,
}

impl IngestionDispatcher {
    pub fn new(bulk_sync: Arc<BulkSyncService>, webhooks: Arc<WebhookProcessor>) -> Self {
        Self {
            bulk_sync,
            webhooks,
        }
    }
}

#[async_trait]
impl JobHandler for IngestionDispatcher {
    async fn handle(&self, job: &IngestionJob) -> Result<()> {
        match job {
            IngestionJob::SyncTenant {
                tenant_id,
                credentials,
            } => {
                // A partial sync still completes the job; failed phases are
                // picked up again by the next scheduled run.
                let summary = self.bulk_sync.sync_all_data(*tenant_id, credentials).await?;
                if summary.is_partial() {
                    tracing::warn!(
                        "Sync job for tenant {} completed with failed phases: {:?}",
                        tenant_id,
                        summary
                            .failed_phases
                            .iter()
                            .map(|f| f.phase.as_str())
                            .collect::<Vec<_>>()
                    );
                }
                Ok(())
            }
            IngestionJob::ProcessWebhook {
                tenant_id,
                topic,
                payload,
            } => {
                self.webhooks.process(*tenant_id, *topic, payload).await?;
                Ok(())
            }
        }
    }
}
