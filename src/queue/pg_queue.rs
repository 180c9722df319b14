use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::job::{Backoff, DeadJob, IngestionJob, JobOptions, JobStatus, QueuedJob};
use crate::queue::JobQueue;
use crate::services::ingest_error::{IngestError, Result};

const JOB_COLUMNS: &str = "id, job_name, ordering_key, payload, status, attempts, max_attempts, \
                           backoff, last_error, run_at, created_at";

/// Postgres-backed queue over the `ingestion_jobs` table. Safe for several
/// worker processes: reservation uses `FOR UPDATE SKIP LOCKED`.
pub struct PgJobQueue {
    pool: PgPool,
    stale_after_secs: i64,
}

impl PgJobQueue {
    pub fn new(pool: PgPool, stale_after_secs: u64) -> Self {
        Self {
            pool,
            stale_after_secs: i64::try_from(stale_after_secs).unwrap_or(i64::MAX),
        }
    }

    fn decode(row: &PgRow) -> Result<QueuedJob> {
        let payload: serde_json::Value = row.try_get("payload")?;
        let backoff: serde_json::Value = row.try_get("backoff")?;
        let status: String = row.try_get("status")?;

        Ok(QueuedJob {
            id: row.try_get("id")?,
            job: serde_json::from_value::<IngestionJob>(payload)?,
            ordering_key: row.try_get("ordering_key")?,
            status: status.parse::<JobStatus>().map_err(IngestError::validation)?,
            attempts: row.try_get("attempts")?,
            options: JobOptions {
                max_attempts: row.try_get("max_attempts")?,
                backoff: serde_json::from_value::<Backoff>(backoff)?,
            },
            last_error: row.try_get("last_error")?,
            run_at: row.try_get("run_at")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn enqueue(&self, job: IngestionJob, options: JobOptions) -> Result<Uuid> {
        let id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO ingestion_jobs (id, job_name, tenant_id, ordering_key, payload, status, attempts, max_attempts, backoff)
            VALUES ($1, $2, $3, $4, $5, 'queued', 0, $6, $7)
            "#,
        )
        .bind(id)
        .bind(job.name())
        .bind(job.tenant_id())
        .bind(job.ordering_key())
        .bind(serde_json::to_value(&job)?)
        .bind(options.max_attempts)
        .bind(serde_json::to_value(options.backoff)?)
        .execute(&self.pool)
        .await?;

        tracing::debug!("Enqueued {} job {} for tenant {}", job.name(), id, job.tenant_id());
        Ok(id)
    }

    async fn reserve(&self, limit: usize) -> Result<Vec<QueuedJob>> {
        let mut tx = self.pool.begin().await?;

        // A worker that died mid-job leaves it running forever. Hand it out
        // again, unless it has no attempts left.
        let reclaimed = sqlx::query(
            r#"
            UPDATE ingestion_jobs
            SET status = CASE WHEN attempts >= max_attempts THEN 'dead' ELSE 'queued' END,
                last_error = CASE WHEN attempts >= max_attempts
                                  THEN 'worker lost the job on its final attempt'
                                  ELSE last_error END,
                locked_at = NULL,
                updated_at = NOW()
            WHERE status = 'running' AND locked_at < NOW() - make_interval(secs => $1)
            RETURNING status
            "#,
        )
        .bind(self.stale_after_secs as f64)
        .fetch_all(&mut *tx)
        .await?;

        if !reclaimed.is_empty() {
            let buried = reclaimed
                .iter()
                .filter(|row| row.try_get::<String, _>("status").map_or(false, |s| s == "dead"))
                .count();
            tracing::warn!(
                "Reclaimed {} stale running job(s), {} buried with attempts exhausted",
                reclaimed.len(),
                buried
            );
        }

        let rows = sqlx::query(&format!(
            r#"
            WITH heads AS (
                SELECT DISTINCT ON (ordering_key) id, status, run_at
                FROM ingestion_jobs
                WHERE status IN ('queued', 'running')
                ORDER BY ordering_key, (status = 'running') DESC, seq
            ), ready AS (
                SELECT j.id
                FROM ingestion_jobs j
                JOIN heads h ON h.id = j.id
                WHERE h.status = 'queued' AND h.run_at <= NOW()
                ORDER BY j.run_at, j.seq
                LIMIT $1
                FOR UPDATE OF j SKIP LOCKED
            )
            UPDATE ingestion_jobs j
            SET status = 'running', attempts = j.attempts + 1, locked_at = NOW(), updated_at = NOW()
            FROM ready
            WHERE j.id = ready.id
            RETURNING {}
            "#,
            JOB_COLUMNS
                .split(", ")
                .map(|c| format!("j.{}", c.trim()))
                .collect::<Vec<_>>()
                .join(", ")
        ))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&mut *tx)
        .await?;

        let mut jobs = Vec::with_capacity(rows.len());
        for row in &rows {
            match Self::decode(row) {
                Ok(job) => jobs.push(job),
                Err(e) => {
                    // An undecodable payload can never succeed.
                    let id: Uuid = row.try_get("id")?;
                    tracing::error!("Burying undecodable job {}: {}", id, e);
                    sqlx::query(
                        "UPDATE ingestion_jobs SET status = 'dead', last_error = $2, locked_at = NULL, updated_at = NOW() WHERE id = $1",
                    )
                    .bind(id)
                    .bind(e.to_string())
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }

        tx.commit().await?;
        Ok(jobs)
    }

    async fn complete(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE ingestion_jobs
            SET status = 'completed', locked_at = NULL, last_error = NULL, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn retry(&self, id: Uuid, error: &str, run_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE ingestion_jobs
            SET status = 'queued', locked_at = NULL, last_error = $2, run_at = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(run_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn bury(&self, id: Uuid, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE ingestion_jobs
            SET status = 'dead', locked_at = NULL, last_error = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn dead_jobs(&self, tenant_id: Option<Uuid>, limit: i64) -> Result<Vec<DeadJob>> {
        let jobs = sqlx::query_as::<_, DeadJob>(
            r#"
            SELECT id, job_name, tenant_id, ordering_key, attempts, last_error, created_at, updated_at
            FROM ingestion_jobs
            WHERE status = 'dead' AND ($1::uuid IS NULL OR tenant_id = $1)
            ORDER BY updated_at DESC
            LIMIT $2
            "#,
        )
        .bind(tenant_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(jobs)
    }
}
