use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use serde::Deserialize;

use crate::middleware::error_handling::{AppError, Result};
use crate::middleware::Claims;
use crate::models::job::{DeadJob, IngestionJob};
use crate::models::sync::SyncSummary;
use crate::services::IngestError;
use crate::AppState;

/// Run a full sync for the caller's tenant and return the summary.
/// POST /api/sync
pub async fn sync_now(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<SyncSummary>> {
    tracing::info!("Manual sync requested for tenant {}", claims.tenant_id);
    let summary = state.bulk_sync.sync_tenant(claims.tenant_id).await?;
    Ok(Json(summary))
}

/// Queue a sync job for the caller's tenant.
/// POST /api/sync/enqueue
pub async fn enqueue_sync(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse> {
    let tenant = state
        .tenants
        .find_by_id(claims.tenant_id)
        .await?
        .ok_or(IngestError::TenantNotFound(claims.tenant_id))?;

    let credentials = tenant
        .credentials()
        .ok_or(IngestError::SyncDisabled(tenant.id))?;

    let job_id = state
        .queue
        .enqueue(
            IngestionJob::SyncTenant {
                tenant_id: tenant.id,
                credentials,
            },
            state.job_options,
        )
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "status": "queued",
            "job_id": job_id,
        })),
    ))
}

#[derive(Debug, Deserialize)]
pub struct DeadJobsQuery {
    pub limit: Option<i64>,
}

/// Dead jobs of the caller's tenant, newest first.
/// GET /api/jobs/dead?limit=50
pub async fn list_dead_jobs(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(params): Query<DeadJobsQuery>,
) -> Result<Json<Vec<DeadJob>>> {
    let limit = params.limit.unwrap_or(50);
    if !(1..=500).contains(&limit) {
        return Err(AppError::BadRequest("limit must be between 1 and 500".to_string()));
    }

    let jobs = state.queue.dead_jobs(Some(claims.tenant_id), limit).await?;
    Ok(Json(jobs))
}
