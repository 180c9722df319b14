//! Durable job queue for ingestion work.
//!
//! Delivery is at-least-once. A job is reserved (status `running`), then
//! completed, rescheduled with backoff, or buried as dead. Jobs sharing an
//! ordering key are handed out one at a time in enqueue order.

pub mod memory_queue;
pub mod pg_queue;
pub mod worker;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::job::{DeadJob, IngestionJob, JobOptions, QueuedJob};
use crate::services::ingest_error::Result;

pub use memory_queue::MemoryJobQueue;
pub use pg_queue::PgJobQueue;
pub use worker::{IngestionWorker, JobHandler};

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: IngestionJob, options: JobOptions) -> Result<Uuid>;

    /// Claim up to `limit` ready jobs. A job is ready when its `run_at` has
    /// passed, it is the oldest queued job of its ordering key, and no other
    /// job of that key is running. Each claim counts as one attempt.
    ///
    /// Running jobs whose lock has gone stale are first requeued, or buried
    /// when they have already used all their attempts.
    async fn reserve(&self, limit: usize) -> Result<Vec<QueuedJob>>;

    async fn complete(&self, id: Uuid) -> Result<()>;

    /// Return a running job to the queue, not to be handed out before `run_at`.
    async fn retry(&self, id: Uuid, error: &str, run_at: DateTime<Utc>) -> Result<()>;

    /// Move a job to the terminal dead state.
    async fn bury(&self, id: Uuid, error: &str) -> Result<()>;

    /// Dead jobs, newest first, optionally restricted to one tenant.
    /// Listing never decodes payloads, so an undecodable job still shows up.
    async fn dead_jobs(&self, tenant_id: Option<Uuid>, limit: i64) -> Result<Vec<DeadJob>>;
}
