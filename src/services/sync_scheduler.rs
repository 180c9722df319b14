/// Sync Scheduler
///
/// Periodically enqueues one `sync-tenant` job per tenant that has a
/// storefront access token. The jobs carry a snapshot of the credential;
/// the scheduler never runs a sync itself.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::models::job::{IngestionJob, JobOptions};
use crate::queue::JobQueue;
use crate::repositories::tenant_repo::TenantStore;
use crate::services::ingest_error::Result;

#[derive(Debug, Default, Clone, Serialize)]
pub struct ScheduledRunStats {
    pub tenants_found: usize,
    pub jobs_enqueued: usize,
    pub errors_encountered: usize,
}

pub struct SyncScheduler {
    tenants: Arc<dyn TenantStore>,
    queue: Arc<dyn JobQueue>,
    job_options: JobOptions,
    interval: Duration,
}

impl SyncScheduler {
    pub fn new(
        tenants: Arc<dyn TenantStore>,
        queue: Arc<dyn JobQueue>,
        job_options: JobOptions,
        interval_hours: u64,
    ) -> Self {
        Self::with_interval(
            tenants,
            queue,
            job_options,
            Duration::from_secs(interval_hours.max(1) * 3600),
        )
    }

    pub fn with_interval(
        tenants: Arc<dyn TenantStore>,
        queue: Arc<dyn JobQueue>,
        job_options: JobOptions,
        interval: Duration,
    ) -> Self {
        Self {
            tenants,
            queue,
            job_options,
            interval,
        }
    }

    /// Tick until `shutdown` flips to true. The first tick fires one full
    /// interval after start.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        // Skip first tick (fires immediately)
        ticker.tick().await;

        tracing::info!("Sync scheduler started - enqueueing every {:?}", self.interval);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.enqueue_all().await {
                        tracing::error!("Scheduled sync run failed: {}", e);
                    }
                }
            }
        }

        tracing::info!("Sync scheduler stopped");
    }

    /// One scheduler tick. Enqueue failures for one tenant do not stop the others.
    pub async fn enqueue_all(&self) -> Result<ScheduledRunStats> {
        let tenants = self.tenants.list_syncable().await?;
        let mut stats = ScheduledRunStats {
            tenants_found: tenants.len(),
            ..ScheduledRunStats::default()
        };

        for tenant in tenants {
            let Some(credentials) = tenant.credentials() else {
                continue;
            };

            let job = IngestionJob::SyncTenant {
                tenant_id: tenant.id,
                credentials,
            };

            match self.queue.enqueue(job, self.job_options).await {
                Ok(job_id) => {
                    stats.jobs_enqueued += 1;
                    tracing::debug!("Enqueued sync job {} for tenant {}", job_id, tenant.id);
                }
                Err(e) => {
                    stats.errors_encountered += 1;
                    tracing::error!("Failed to enqueue sync for tenant {}: {}", tenant.id, e);
                }
            }
        }

        tracing::info!(
            "Scheduled sync: {} tenant(s), {} job(s) enqueued, {} error(s)",
            stats.tenants_found,
            stats.jobs_enqueued,
            stats.errors_encountered
        );

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::JobStatus;
    use crate::models::tenant::NewTenant;
    use crate::queue::MemoryJobQueue;
    use crate::repositories::tenant_repo::MemoryTenantStore;

    #[tokio::test]
    async fn test_enqueues_only_tenants_with_tokens() {
        let tenants = Arc::new(MemoryTenantStore::new());
        let queue = Arc::new(MemoryJobQueue::default());

        for (domain, token) in [
            ("a.myshopify.com", Some("shpat_a")),
            ("b.myshopify.com", None),
            ("c.myshopify.com", Some("shpat_c")),
        ] {
            tenants
                .create(&NewTenant {
                    shop_domain: domain.to_string(),
                    email: "owner@example.com".to_string(),
                    access_token: token.map(str::to_string),
                })
                .await
                .unwrap();
        }

        let scheduler = SyncScheduler::new(tenants, queue.clone(), JobOptions::default(), 6);
        let stats = scheduler.enqueue_all().await.unwrap();

        assert_eq!(stats.tenants_found, 2);
        assert_eq!(stats.jobs_enqueued, 2);
        assert_eq!(queue.count_with_status(JobStatus::Queued).await, 2);

        let jobs = queue.reserve(10).await.unwrap();
        assert!(jobs.iter().all(|j| j.job.name() == "sync-tenant"));
    }
}
