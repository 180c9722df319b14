use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;

use crate::middleware::metrics::record_job_outcome;
use crate::models::job::{IngestionJob, QueuedJob};
use crate::queue::JobQueue;
use crate::services::ingest_error::Result;
use crate::utils::log_sanitizer::sanitize_for_log;

/// Executes one job. `Ok` completes the job; `Err` hands the failure back to
/// the worker, which retries or buries based on `IngestError::is_retryable`.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &IngestionJob) -> Result<()>;
}

/// Outcome of one delivery, for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Completed,
    Retried,
    Dead,
}

impl Delivery {
    pub fn as_str(&self) -> &'static str {
        match self {
            Delivery::Completed => "completed",
            Delivery::Retried => "retried",
            Delivery::Dead => "dead",
        }
    }
}

/// Polls the queue and runs up to `concurrency` jobs at once, each on its own task.
#[derive(Clone)]
pub struct IngestionWorker {
    queue: Arc<dyn JobQueue>,
    handler: Arc<dyn JobHandler>,
    permits: Arc<Semaphore>,
    concurrency: usize,
    poll_interval: Duration,
}

impl IngestionWorker {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        handler: Arc<dyn JobHandler>,
        concurrency: usize,
        poll_interval: Duration,
    ) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            queue,
            handler,
            permits: Arc::new(Semaphore::new(concurrency)),
            concurrency,
            poll_interval,
        }
    }

    /// Run until `shutdown` flips to true, then wait for in-flight jobs.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            "Ingestion worker started (concurrency {}, poll every {:?})",
            self.concurrency,
            self.poll_interval
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let idle = match self.dispatch().await {
                Ok(handles) => handles.is_empty(),
                Err(e) => {
                    tracing::error!("Failed to reserve jobs: {}", e);
                    true
                }
            };

            if idle {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(self.poll_interval) => {}
                }
            } else {
                tokio::task::yield_now().await;
            }
        }

        tracing::info!("Ingestion worker stopping, waiting for in-flight jobs");
        let all = u32::try_from(self.concurrency).unwrap_or(u32::MAX);
        if let Ok(permits) = self.permits.acquire_many(all).await {
            drop(permits);
        }
        tracing::info!("Ingestion worker stopped");
    }

    /// Reserve as many jobs as there are free permits and wait for them all.
    /// Returns the number of jobs executed.
    pub async fn run_once(&self) -> Result<usize> {
        let handles = self.dispatch().await?;
        let count = handles.len();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!("Job task panicked: {}", e);
            }
        }
        Ok(count)
    }

    async fn dispatch(&self) -> Result<Vec<JoinHandle<()>>> {
        let available = self.permits.available_permits();
        if available == 0 {
            return Ok(Vec::new());
        }

        let jobs = self.queue.reserve(available).await?;
        let mut handles = Vec::with_capacity(jobs.len());

        for job in jobs {
            let permit = match self.permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let worker = self.clone();
            handles.push(tokio::spawn(async move {
                worker.execute(job).await;
                drop(permit);
            }));
        }

        Ok(handles)
    }

    /// Run one reserved job and settle it on the queue.
    pub async fn execute(&self, job: QueuedJob) -> Delivery {
        let name = job.job.name();
        tracing::debug!(
            "Running {} job {} (attempt {}/{})",
            name,
            job.id,
            job.attempts,
            job.options.max_attempts
        );

        let delivery = match self.handler.handle(&job.job).await {
            Ok(()) => {
                if let Err(e) = self.queue.complete(job.id).await {
                    tracing::error!("Failed to mark job {} completed: {}", job.id, e);
                }
                Delivery::Completed
            }
            Err(e) if e.is_retryable() && !job.attempts_exhausted() => {
                let delay = job.options.backoff.delay_after(job.attempts);
                let reason = sanitize_for_log(&e.to_string());
                tracing::warn!(
                    "{} job {} failed (attempt {}/{}), retrying in {}ms: {}",
                    name,
                    job.id,
                    job.attempts,
                    job.options.max_attempts,
                    delay.num_milliseconds(),
                    reason
                );
                if let Err(e) = self.queue.retry(job.id, &reason, Utc::now() + delay).await {
                    tracing::error!("Failed to reschedule job {}: {}", job.id, e);
                }
                Delivery::Retried
            }
            Err(e) => {
                let reason = sanitize_for_log(&e.to_string());
                tracing::error!(
                    "{} job {} for tenant {} is dead after {} attempt(s) ({}): {}",
                    name,
                    job.id,
                    job.job.tenant_id(),
                    job.attempts,
                    e.kind(),
                    reason
                );
                if let Err(e) = self.queue.bury(job.id, &reason).await {
                    tracing::error!("Failed to bury job {}: {}", job.id, e);
                }
                Delivery::Dead
            }
        };

        record_job_outcome(name, delivery.as_str());
        delivery
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::{Backoff, JobOptions, JobStatus, WebhookTopic};
    use crate::queue::MemoryJobQueue;
    use crate::services::ingest_error::IngestError;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    struct Failing {
        calls: AtomicUsize,
        transient: bool,
    }

    #[async_trait]
    impl JobHandler for Failing {
        async fn handle(&self, _job: &IngestionJob) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.transient {
                Err(IngestError::TransientIo("upstream timeout".to_string()))
            } else {
                Err(IngestError::validation("order payload is missing id"))
            }
        }
    }

    fn job() -> IngestionJob {
        IngestionJob::ProcessWebhook {
            tenant_id: Uuid::new_v4(),
            topic: WebhookTopic::OrderCreated,
            payload: json!({"id": 1}),
        }
    }

    fn immediate_retries(max_attempts: i32) -> JobOptions {
        JobOptions {
            max_attempts,
            backoff: Backoff::Fixed { delay_ms: 0 },
        }
    }

    #[tokio::test]
    async fn test_transient_failures_retry_then_die() {
        let queue = Arc::new(MemoryJobQueue::default());
        let handler = Arc::new(Failing {
            calls: AtomicUsize::new(0),
            transient: true,
        });
        let worker = IngestionWorker::new(queue.clone(), handler.clone(), 2, Duration::from_millis(10));
        let id = queue.enqueue(job(), immediate_retries(3)).await.unwrap();

        for _ in 0..3 {
            assert_eq!(worker.run_once().await.unwrap(), 1);
        }
        assert_eq!(worker.run_once().await.unwrap(), 0);

        let stored = queue.get(id).await.unwrap();
        assert_eq!(stored.status, JobStatus::Dead);
        assert_eq!(stored.attempts, 3);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_validation_failure_is_buried_without_retry() {
        let queue = Arc::new(MemoryJobQueue::default());
        let handler = Arc::new(Failing {
            calls: AtomicUsize::new(0),
            transient: false,
        });
        let worker = IngestionWorker::new(queue.clone(), handler.clone(), 2, Duration::from_millis(10));
        let id = queue.enqueue(job(), immediate_retries(5)).await.unwrap();

        worker.run_once().await.unwrap();

        let stored = queue.get(id).await.unwrap();
        assert_eq!(stored.status, JobStatus::Dead);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(queue.dead_jobs(None, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let queue = Arc::new(MemoryJobQueue::default());
        let handler = Arc::new(Failing {
            calls: AtomicUsize::new(0),
            transient: false,
        });
        let worker = IngestionWorker::new(queue, handler, 1, Duration::from_millis(5));
        let (tx, rx) = watch::channel(false);

        let task = tokio::spawn(async move { worker.run(rx).await });
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("worker stops")
            .unwrap();
    }
}
