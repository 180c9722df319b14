use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::job::{DeadJob, IngestionJob, JobOptions, JobStatus, QueuedJob};
use crate::queue::JobQueue;
use crate::services::ingest_error::Result;

struct Entry {
    job: QueuedJob,
    locked_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

/// In-process queue with the same ordering and retry semantics as
/// `PgJobQueue`. Jobs do not survive a restart.
pub struct MemoryJobQueue {
    // Kept in enqueue order.
    entries: Mutex<Vec<Entry>>,
    stale_after: Duration,
}

impl Default for MemoryJobQueue {
    fn default() -> Self {
        Self::new(900)
    }
}

impl MemoryJobQueue {
    pub fn new(stale_after_secs: u64) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            stale_after: Duration::seconds(stale_after_secs.min(1_000_000_000) as i64),
        }
    }

    pub async fn get(&self, id: Uuid) -> Option<QueuedJob> {
        self.entries
            .lock()
            .await
            .iter()
            .find(|e| e.job.id == id)
            .map(|e| e.job.clone())
    }

    pub async fn count_with_status(&self, status: JobStatus) -> usize {
        self.entries
            .lock()
            .await
            .iter()
            .filter(|e| e.job.status == status)
            .count()
    }

    async fn update<F>(&self, id: Uuid, f: F)
    where
        F: FnOnce(&mut Entry) + Send,
    {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.iter_mut().find(|e| e.job.id == id) {
            f(entry);
            entry.updated_at = Utc::now();
        }
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, job: IngestionJob, options: JobOptions) -> Result<Uuid> {
        let now = Utc::now();
        let id = Uuid::new_v4();
        let ordering_key = job.ordering_key();

        self.entries.lock().await.push(Entry {
            job: QueuedJob {
                id,
                job,
                ordering_key,
                status: JobStatus::Queued,
                attempts: 0,
                options,
                last_error: None,
                run_at: now,
                created_at: now,
            },
            locked_at: None,
            updated_at: now,
        });

        Ok(id)
    }

    async fn reserve(&self, limit: usize) -> Result<Vec<QueuedJob>> {
        let mut entries = self.entries.lock().await;
        let now = Utc::now();

        for entry in entries.iter_mut() {
            if entry.job.status == JobStatus::Running
                && entry.locked_at.map_or(false, |at| at + self.stale_after < now)
            {
                entry.locked_at = None;
                entry.updated_at = now;
                if entry.job.attempts_exhausted() {
                    tracing::warn!("Burying stale job {} with attempts exhausted", entry.job.id);
                    entry.job.status = JobStatus::Dead;
                    entry.job.last_error = Some("worker lost the job on its final attempt".to_string());
                } else {
                    tracing::warn!("Reclaimed stale running job {}", entry.job.id);
                    entry.job.status = JobStatus::Queued;
                }
            }
        }

        let mut busy_keys: HashSet<String> = entries
            .iter()
            .filter(|e| e.job.status == JobStatus::Running)
            .map(|e| e.job.ordering_key.clone())
            .collect();

        let mut reserved = Vec::new();
        for entry in entries.iter_mut() {
            if reserved.len() >= limit {
                break;
            }
            if entry.job.status != JobStatus::Queued {
                continue;
            }
            // The first queued job of a key blocks the ones behind it,
            // whether or not it is ready yet.
            if !busy_keys.insert(entry.job.ordering_key.clone()) {
                continue;
            }
            if entry.job.run_at > now {
                continue;
            }

            entry.job.status = JobStatus::Running;
            entry.job.attempts += 1;
            entry.locked_at = Some(now);
            entry.updated_at = now;
            reserved.push(entry.job.clone());
        }

        Ok(reserved)
    }

    async fn complete(&self, id: Uuid) -> Result<()> {
        self.update(id, |entry| {
            entry.job.status = JobStatus::Completed;
            entry.job.last_error = None;
            entry.locked_at = None;
        })
        .await;
        Ok(())
    }

    async fn retry(&self, id: Uuid, error: &str, run_at: DateTime<Utc>) -> Result<()> {
        let error = error.to_string();
        self.update(id, move |entry| {
            entry.job.status = JobStatus::Queued;
            entry.job.last_error = Some(error);
            entry.job.run_at = run_at;
            entry.locked_at = None;
        })
        .await;
        Ok(())
    }

    async fn bury(&self, id: Uuid, error: &str) -> Result<()> {
        let error = error.to_string();
        self.update(id, move |entry| {
            entry.job.status = JobStatus::Dead;
            entry.job.last_error = Some(error);
            entry.locked_at = None;
        })
        .await;
        Ok(())
    }

    async fn dead_jobs(&self, tenant_id: Option<Uuid>, limit: i64) -> Result<Vec<DeadJob>> {
        let entries = self.entries.lock().await;
        let mut dead: Vec<&Entry> = entries
            .iter()
            .filter(|e| e.job.status == JobStatus::Dead)
            .filter(|e| tenant_id.map_or(true, |t| e.job.job.tenant_id() == t))
            .collect();
        dead.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

        Ok(dead
            .into_iter()
            .take(usize::try_from(limit.max(0)).unwrap_or(usize::MAX))
            .map(|e| DeadJob {
                id: e.job.id,
                job_name: e.job.job.name().to_string(),
                tenant_id: e.job.job.tenant_id(),
                ordering_key: e.job.ordering_key.clone(),
                attempts: e.job.attempts,
                last_error: e.job.last_error.clone(),
                created_at: e.job.created_at,
                updated_at: e.updated_at,
            })
            .collect())
    }
}
